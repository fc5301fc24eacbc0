//! Expense-related models

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: i64,
    pub name: Option<String>,
}

/// Expense as listed by the backend, after normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: i64,
    pub amount: f64,
    pub merchant: Option<String>,
    pub currency: Option<String>,
    pub base_amount: Option<f64>,
    pub base_currency: Option<String>,
    /// `YYYY-MM-DD`
    pub occurred_on: Option<String>,
    pub group_id: Option<i64>,
    pub group: Option<GroupRef>,
    pub company_id: Option<i64>,
    pub category: Option<Category>,
    pub description: Option<String>,
    pub notes: Option<String>,
    /// `PENDING`, `APPROVED` or `REJECTED`
    pub status: Option<String>,
    pub receipt_url: Option<String>,
    #[serde(default)]
    pub reimbursable: bool,
}

impl Expense {
    /// Amount in the user's base currency when the backend converted it.
    pub fn effective_amount(&self) -> f64 {
        self.base_amount.unwrap_or(self.amount)
    }
}

/// Input for creating an expense
#[derive(Debug, Clone, Default)]
pub struct NewExpense {
    pub amount: f64,
    pub currency: String,
    /// Defaults to today when empty.
    pub occurred_on: Option<String>,
    pub category_id: Option<i64>,
    pub merchant: Option<String>,
    pub notes: Option<String>,
    pub group_id: Option<i64>,
    pub reimbursable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpenseSummary {
    pub total: f64,
    pub transactions: u64,
    pub categories: u64,
}

/// Search filters for `/api/v1/expenses/search`
#[derive(Debug, Clone, Default)]
pub struct ExpenseFilters {
    pub category_id: Option<i64>,
    pub currency: Option<String>,
    pub merchant: Option<String>,
    pub description: Option<String>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub company_id: Option<i64>,
}
