//! API client module for the expense backend

pub mod bills;
pub mod client;
pub mod coalesce;
pub mod companies;
pub mod error;
pub mod expenses;
pub mod groups;
pub mod request;
pub mod scope;
pub mod transactions;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::auth::SessionContext;
use crate::config::{Config, FileSecretStore};
use bills::BillService;
use client::ApiClient;
use companies::CompanyService;
use error::ApiError;
use expenses::ExpenseService;
use groups::GroupService;
use request::FormPart;
use scope::Scope;
use transactions::TransactionService;
use transport::ReqwestTransport;

/// Client plus every service, sharing one session.
#[derive(Clone)]
pub struct Backend {
    pub client: ApiClient,
    pub expenses: ExpenseService,
    pub bills: BillService,
    pub transactions: TransactionService,
    pub companies: CompanyService,
    pub groups: GroupService,
}

impl Backend {
    pub fn new(client: ApiClient, cooldown: Duration) -> Self {
        Self {
            expenses: ExpenseService::new(client.clone(), cooldown),
            bills: BillService::new(client.clone()),
            transactions: TransactionService::new(client.clone()),
            companies: CompanyService::new(client.clone()),
            groups: GroupService::new(client.clone()),
            client,
        }
    }

    /// Production wiring: reqwest transport, file-backed credentials.
    pub fn connect(config: &Config) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        let store = Arc::new(FileSecretStore::default_location()?);
        let session = SessionContext::from_store(store, config.active_company_id)
            .on_session_expired(|| {
                eprintln!("Session expired. Run `expense-cli login` to sign in again.");
            });

        let client = ApiClient::new(transport, Arc::new(session), &config.api_base_url())?
            .with_network_logs(config.enable_network_logs);
        Ok(Self::new(client, config.coalesce_cooldown()))
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        self.client.session()
    }

    /// Scope matching the active tenant.
    pub fn scope(&self) -> Scope {
        Scope::from_company(self.session().tenant().active())
    }

    /// Change the active company (`None` or non-positive for personal).
    /// Cached lists belong to the previous scope, so they are dropped.
    pub fn switch_company(&self, company_id: Option<i64>) -> Scope {
        self.session().tenant().set(company_id);
        self.expenses.clear_cache();
        let scope = self.scope();
        tracing::info!("Switched to {} scope", scope.label());
        scope
    }
}

/// Multipart file field with a content type guessed from the extension.
pub(crate) async fn file_part(name: &str, path: &Path) -> Result<FormPart, ApiError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ApiError::Invalid(format!("Cannot read {}: {}", path.display(), e)))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let mime = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    };

    Ok(FormPart::File {
        name: name.to_string(),
        file_name,
        mime: mime.to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::expenses::DateRange;
    use crate::api::testing::{json_response, MockTransport};
    use crate::auth::Credential;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn backend(transport: Arc<MockTransport>) -> Backend {
        let session = SessionContext::in_memory();
        session.establish(Credential::new("token", Some("refresh".into())));
        let client = ApiClient::new(transport, Arc::new(session), "http://backend.test").unwrap();
        Backend::new(client, Duration::from_secs(3))
    }

    #[tokio::test]
    async fn test_switch_company_rescopes_and_drops_cache() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!([]))));
        let backend = backend(transport.clone());
        let range = DateRange::default();

        assert_eq!(backend.scope(), Scope::Personal);
        assert_ok!(backend.expenses.list(&range, 0, 10, backend.scope()).await);
        assert_ok!(backend.expenses.list(&range, 0, 10, backend.scope()).await);
        assert_eq!(transport.calls().len(), 1);

        let scope = backend.switch_company(Some(12));
        assert_eq!(scope, Scope::Company(12));
        assert_ok!(backend.expenses.list(&range, 0, 10, scope).await);
        assert_eq!(transport.calls().len(), 2);
        assert_eq!(transport.calls()[1].header("X-Company-Id"), Some("12"));

        assert_eq!(backend.switch_company(Some(0)), Scope::Personal);
        assert_eq!(backend.session().tenant().active(), None);
    }

    #[tokio::test]
    async fn test_file_part_guesses_mime() {
        let dir = std::env::temp_dir().join(format!("file-part-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let pdf = dir.join("Invoice.PDF");
        std::fs::write(&pdf, b"%PDF").unwrap();

        let part = assert_ok!(file_part("file", &pdf).await);
        assert_eq!(
            part,
            FormPart::File {
                name: "file".into(),
                file_name: "Invoice.PDF".into(),
                mime: "application/pdf".into(),
                bytes: b"%PDF".to_vec(),
            }
        );

        let missing = assert_err!(file_part("file", &dir.join("missing.png")).await);
        assert!(matches!(missing, ApiError::Invalid(_)));

        std::fs::remove_dir_all(&dir).ok();
    }
}
