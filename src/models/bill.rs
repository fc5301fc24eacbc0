//! Bill (uploaded receipt document) models

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    pub id: i64,
    pub bill_number: Option<String>,
    pub expense_id: Option<i64>,
    pub user_id: Option<i64>,
    pub company_id: Option<i64>,
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
    pub category_id: Option<i64>,
    pub merchant: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub bill_date: Option<String>,
    pub uploaded_at: Option<String>,
    pub notes: Option<String>,
}

/// Input for a bill upload
#[derive(Debug, Clone, Default)]
pub struct BillUpload {
    pub file: PathBuf,
    pub bill_number: Option<String>,
    pub expense_id: Option<i64>,
    pub category_id: Option<i64>,
    pub merchant: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub bill_date: Option<String>,
    pub notes: Option<String>,
    pub company_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct BillFilters {
    pub bill_number: Option<String>,
    pub merchant: Option<String>,
    pub category_id: Option<i64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub company_id: Option<i64>,
}
