//! Bill (receipt document) endpoints

use std::path::Path;

use serde_json::Value;

use super::client::ApiClient;
use super::error::ApiError;
use super::request::{FormPart, OutboundRequest};
use super::scope::Scope;
use crate::models::{Bill, BillFilters, BillUpload};

const BILLS_PATH: &str = "/api/v1/bills";

#[derive(Clone)]
pub struct BillService {
    client: ApiClient,
}

impl BillService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self, company_id: Option<i64>) -> Result<Vec<Bill>, ApiError> {
        let scope = Scope::from_company(company_id);
        let mut req = OutboundRequest::get(BILLS_PATH).skip_tenant_scope(scope == Scope::Personal);
        if let Some(id) = scope.company_id() {
            req = req.query("companyId", id);
        }
        decode_list(self.client.send(&req).await?.value()?)
    }

    pub async fn search(&self, filters: &BillFilters) -> Result<Vec<Bill>, ApiError> {
        let pairs = [
            ("billNumber", filters.bill_number.clone()),
            ("merchant", filters.merchant.clone()),
            ("categoryId", filters.category_id.map(|v| v.to_string())),
            ("startDate", filters.start_date.clone()),
            ("endDate", filters.end_date.clone()),
            ("companyId", filters.company_id.filter(|id| *id > 0).map(|v| v.to_string())),
        ];
        let query = pairs
            .into_iter()
            .filter_map(|(k, v)| v.filter(|v| !v.is_empty()).map(|v| (k.to_string(), v)));

        let req = OutboundRequest::get(format!("{}/search", BILLS_PATH)).query_pairs(query);
        decode_list(self.client.send(&req).await?.value()?)
    }

    pub async fn get(&self, id: i64) -> Result<Bill, ApiError> {
        self.client
            .send(&OutboundRequest::get(format!("{}/{}", BILLS_PATH, id)))
            .await?
            .json()
    }

    /// Raw file bytes of the stored document.
    pub async fn download(&self, id: i64) -> Result<Vec<u8>, ApiError> {
        let resp = self
            .client
            .send(&OutboundRequest::get(format!("{}/{}/download", BILLS_PATH, id)))
            .await?;
        Ok(resp.body)
    }

    pub async fn upload(&self, upload: &BillUpload) -> Result<Bill, ApiError> {
        let mut parts = vec![super::file_part("file", &upload.file).await?];
        let fields = [
            ("billNumber", upload.bill_number.clone()),
            ("expenseId", upload.expense_id.map(|v| v.to_string())),
            ("categoryId", upload.category_id.map(|v| v.to_string())),
            ("merchant", upload.merchant.clone()),
            ("amount", upload.amount.map(|v| v.to_string())),
            ("currency", upload.currency.clone()),
            ("billDate", upload.bill_date.clone()),
            ("notes", upload.notes.clone()),
            ("companyId", upload.company_id.filter(|id| *id > 0).map(|v| v.to_string())),
        ];
        parts.extend(
            fields
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| FormPart::text(name, v))),
        );

        let scope = Scope::from_company(upload.company_id);
        let req = OutboundRequest::post(BILLS_PATH)
            .multipart(parts)
            .skip_tenant_scope(scope == Scope::Personal);
        self.client.send(&req).await?.json()
    }

    pub async fn delete(&self, id: i64) -> Result<(), ApiError> {
        self.client
            .send(&OutboundRequest::delete(format!("{}/{}", BILLS_PATH, id)))
            .await?;
        Ok(())
    }
}

fn decode_list(body: Value) -> Result<Vec<Bill>, ApiError> {
    let items = match body {
        Value::Null => return Ok(Vec::new()),
        Value::Object(mut map) if map.contains_key("content") => {
            map.remove("content").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(items).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Save downloaded bytes into `dir`, using the bill's original file name
/// when it has one. Directory parts of that name are ignored.
pub async fn save_download(bill: &Bill, bytes: &[u8], dir: &Path) -> anyhow::Result<std::path::PathBuf> {
    use anyhow::Context;

    let name = bill
        .file_name
        .as_deref()
        .and_then(|n| Path::new(n).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("bill-{}", bill.id));
    let path = dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
