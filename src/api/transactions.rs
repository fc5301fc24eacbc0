//! Transaction endpoints

use super::client::ApiClient;
use super::error::ApiError;
use super::request::OutboundRequest;
use super::scope::Scope;
use crate::models::Transaction;

const TRANSACTIONS_PATH: &str = "/api/v1/transactions";

#[derive(Clone)]
pub struct TransactionService {
    client: ApiClient,
}

impl TransactionService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self, scope: Scope) -> Result<Vec<Transaction>, ApiError> {
        let req = scope.apply(OutboundRequest::get(TRANSACTIONS_PATH));
        let resp = self.client.send(&req).await?;
        if resp.value()?.is_null() {
            return Ok(Vec::new());
        }
        resp.json()
    }

    pub async fn get(&self, id: i64, scope: Scope) -> Result<Transaction, ApiError> {
        let req = scope.apply(OutboundRequest::get(format!("{}/{}", TRANSACTIONS_PATH, id)));
        self.client.send(&req).await?.json()
    }
}
