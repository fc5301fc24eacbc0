//! Company (tenant) models

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: i64,
    pub company_name: String,
    pub company_code: Option<String>,
    pub currency: Option<String>,
    pub time_zone: Option<String>,
    pub status: Option<String>,
}
