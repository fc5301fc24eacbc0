//! Company (tenant) endpoints

use super::client::ApiClient;
use super::error::ApiError;
use super::request::OutboundRequest;
use crate::models::Company;

const COMPANIES_PATH: &str = "/api/v1/companies";

#[derive(Clone)]
pub struct CompanyService {
    client: ApiClient,
}

impl CompanyService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Companies the user belongs to. A backend without company support
    /// yields an empty list; auth failures still propagate.
    pub async fn list(&self) -> Result<Vec<Company>, ApiError> {
        let result = self
            .client
            .send(&OutboundRequest::get(COMPANIES_PATH))
            .await
            .and_then(|resp| {
                if resp.value()?.is_null() {
                    return Ok(Vec::new());
                }
                resp.json()
            });

        match result {
            Ok(companies) => Ok(companies),
            Err(e) if e.is_auth_error() => Err(e),
            Err(e) => {
                tracing::warn!("Could not load companies: {}", e);
                Ok(Vec::new())
            }
        }
    }

    pub async fn get(&self, id: i64) -> Result<Company, ApiError> {
        self.client
            .send(&OutboundRequest::get(format!("{}/{}", COMPANIES_PATH, id)))
            .await?
            .json()
    }
}
