//! Expense endpoints
//!
//! Listing goes through the request coalescer; the backend is inconsistent
//! about field names across versions, so records are normalized before they
//! are validated and decoded.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde_json::{json, Map, Value};

use super::client::ApiClient;
use super::coalesce::{retain_valid, FieldRule, RecordRules, RequestCoalescer};
use super::error::ApiError;
use super::request::OutboundRequest;
use super::scope::Scope;
use crate::models::{Category, Expense, ExpenseFilters, ExpenseSummary, NewExpense};

const EXPENSES_PATH: &str = "/api/v1/expenses";
const SUMMARY_PATH: &str = "/api/v1/expenses/summary";
const SEARCH_PATH: &str = "/api/v1/expenses/search";

/// Records without a usable id and amount cannot be shown or summed.
const EXPENSE_RULES: RecordRules = &[("id", FieldRule::Id), ("amount", FieldRule::Number)];

const DATE_ALIASES: &[&str] = &[
    "occurredOn",
    "occurred_on",
    "date",
    "billDate",
    "transactionDate",
    "createdAt",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl DateRange {
    fn query_pairs(&self) -> Vec<(String, String)> {
        [("from", &self.from), ("to", &self.to)]
            .into_iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone())))
            .collect()
    }
}

#[derive(Clone)]
pub struct ExpenseService {
    client: ApiClient,
    cache: RequestCoalescer<Vec<Value>, ApiError>,
    cooldown: Duration,
}

impl ExpenseService {
    pub fn new(client: ApiClient, cooldown: Duration) -> Self {
        Self {
            client,
            cache: RequestCoalescer::new(),
            cooldown,
        }
    }

    /// Call when switching between personal and company mode.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// One page of expenses, newest first.
    pub async fn list(
        &self,
        range: &DateRange,
        page: u32,
        size: u32,
        scope: Scope,
    ) -> Result<Vec<Expense>, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("page".to_string(), page.to_string());
        params.insert("size".to_string(), size.to_string());
        params.insert("sort".to_string(), "occurredOn,desc".to_string());
        params.extend(range.query_pairs());
        params.extend(scope.query_pairs());

        let key = cache_key(EXPENSES_PATH, &params, scope);
        let req = OutboundRequest::get(EXPENSES_PATH)
            .query_pairs(params)
            .skip_tenant_scope(scope == Scope::Personal);
        let client = self.client.clone();

        tracing::debug!("Fetching expenses {}", key);
        let records = self
            .cache
            .fetch_records(
                &key,
                EXPENSE_RULES,
                move || async move {
                    let resp = client.send(&req).await?;
                    let records = extract_records(resp.value()?);
                    Ok::<Vec<Value>, ApiError>(records.into_iter().map(normalize).collect())
                },
                self.cooldown,
            )
            .await?;

        Ok(decode(records))
    }

    /// Totals for a date range. Uses the dedicated endpoint when the backend
    /// has it, otherwise sums the first 1000 expenses. Only auth failures
    /// are surfaced; anything else yields a zero summary.
    pub async fn summary(&self, range: &DateRange, scope: Scope) -> Result<ExpenseSummary, ApiError> {
        match self.try_summary(range, scope).await {
            Ok(summary) => Ok(summary),
            Err(e) if e.is_auth_error() => Err(e),
            Err(e) => {
                tracing::warn!("Expense summary unavailable, using zeros: {}", e);
                Ok(ExpenseSummary::default())
            }
        }
    }

    async fn try_summary(&self, range: &DateRange, scope: Scope) -> Result<ExpenseSummary, ApiError> {
        let req = scope.apply(
            OutboundRequest::get(SUMMARY_PATH)
                .query_pairs(range.query_pairs())
                .suppress_error_log(),
        );

        match self.client.send(&req).await.and_then(|r| r.value()) {
            Ok(body) if body.get("total").is_some_and(|t| !t.is_null()) => {
                return Ok(ExpenseSummary {
                    total: round_cents(as_f64(&body["total"])),
                    transactions: as_f64(&body["transactions"]) as u64,
                    categories: as_f64(&body["categories"]) as u64,
                });
            }
            Ok(_) => tracing::debug!("Summary endpoint returned no total, calculating locally"),
            Err(e) => tracing::debug!("Summary endpoint not available ({}), calculating locally", e),
        }

        let expenses = self.list(range, 0, 1000, scope).await?;
        Ok(summarize(&expenses))
    }

    pub async fn create(&self, new: &NewExpense, scope: Scope) -> Result<Expense, ApiError> {
        if !new.amount.is_finite() || new.amount <= 0.0 {
            return Err(ApiError::Invalid("Amount must be a positive number".into()));
        }
        let currency = new.currency.trim();
        if currency.is_empty() {
            return Err(ApiError::Invalid("Currency is required".into()));
        }
        let occurred_on = new
            .occurred_on
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(normalize_date)
            .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());

        let mut payload = Map::new();
        payload.insert("amount".into(), json!(new.amount));
        payload.insert("currency".into(), json!(currency));
        payload.insert("occurredOn".into(), json!(occurred_on));
        payload.insert("reimbursable".into(), json!(new.reimbursable));
        let optional = [
            ("categoryId", new.category_id.map(Value::from)),
            ("merchant", new.merchant.clone().map(Value::from)),
            ("notes", new.notes.clone().map(Value::from)),
            ("groupId", new.group_id.map(Value::from)),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                payload.insert(name.into(), value);
            }
        }
        // Explicit null marks a personal expense.
        payload.insert("companyId".into(), json!(scope.company_id()));

        let req = scope.apply(OutboundRequest::post(EXPENSES_PATH).json(Value::Object(payload.clone())));
        let created = self.client.send(&req).await?.value()?;

        // Some backend versions echo only the id.
        let mut created = created;
        if let Value::Object(map) = &mut created {
            for (k, v) in payload {
                map.entry(k).or_insert(v);
            }
        }
        decode_one(normalize(created))
    }

    pub async fn update(&self, id: i64, patch: Value, scope: Scope) -> Result<Expense, ApiError> {
        let req = scope.apply(OutboundRequest::put(format!("{}/{}", EXPENSES_PATH, id)).json(patch));
        let updated = self.client.send(&req).await?.value()?;
        decode_one(normalize(updated))
    }

    pub async fn delete(&self, id: i64, scope: Scope) -> Result<(), ApiError> {
        let req = scope.apply(OutboundRequest::delete(format!("{}/{}", EXPENSES_PATH, id)));
        self.client.send(&req).await?;
        Ok(())
    }

    pub async fn search(&self, filters: &ExpenseFilters) -> Result<Vec<Expense>, ApiError> {
        let mut req = OutboundRequest::get(SEARCH_PATH).query_pairs(search_params(filters));
        if let Some(company) = filters.company_id.filter(|id| *id > 0) {
            req = req.header("X-Company-Id", company.to_string());
        }

        let resp = self.client.send(&req).await?;
        let records: Vec<Value> = extract_records(resp.value()?)
            .into_iter()
            .map(normalize)
            .collect();
        let (records, dropped) = retain_valid(records, EXPENSE_RULES);
        if dropped > 0 {
            tracing::warn!("Filtered out {} invalid expenses from search", dropped);
        }
        Ok(decode(records))
    }

    pub async fn categories(&self) -> Result<Vec<Category>, ApiError> {
        self.client
            .send(&OutboundRequest::get("/api/v1/categories"))
            .await?
            .json()
    }

    pub async fn currencies(&self) -> Result<Value, ApiError> {
        self.client
            .send(&OutboundRequest::get("/api/v1/currencies"))
            .await?
            .value()
    }

    pub async fn upload_receipt(&self, expense_id: i64, file: &Path) -> Result<Value, ApiError> {
        let part = super::file_part("file", file).await?;
        let req = OutboundRequest::post(format!("{}/{}/receipt", EXPENSES_PATH, expense_id))
            .multipart(vec![part]);
        self.client.send(&req).await?.value()
    }
}

/// Order-independent key: sorted params plus the scope marker.
fn cache_key(path: &str, params: &BTreeMap<String, String>, scope: Scope) -> String {
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}#{}", path, query, scope.label())
}

fn search_params(filters: &ExpenseFilters) -> Vec<(String, String)> {
    let pairs = [
        ("categoryId", filters.category_id.map(|v| v.to_string())),
        ("currency", filters.currency.clone()),
        ("merchant", filters.merchant.clone()),
        ("description", filters.description.clone()),
        ("minAmount", filters.min_amount.map(|v| v.to_string())),
        ("maxAmount", filters.max_amount.map(|v| v.to_string())),
        ("startDate", filters.start_date.clone()),
        ("endDate", filters.end_date.clone()),
    ];
    pairs
        .into_iter()
        .filter_map(|(k, v)| v.filter(|v| !v.is_empty()).map(|v| (k.to_string(), v)))
        .collect()
}

/// Accepts a bare array, a Spring page (`content`), or a single record.
fn extract_records(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            if let Some(Value::Array(items)) = map.remove("content") {
                items
            } else if map.get("id").is_some_and(|id| !id.is_null()) {
                vec![Value::Object(map)]
            } else if map.get("totalElements").and_then(Value::as_u64) == Some(0) {
                Vec::new()
            } else {
                tracing::warn!("Unexpected expense list format, ignoring response");
                Vec::new()
            }
        }
        Value::Null => {
            tracing::warn!("No data in expense response");
            Vec::new()
        }
        _ => {
            tracing::warn!("Unexpected expense list format, ignoring response");
            Vec::new()
        }
    }
}

fn first_present<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|n| map.get(*n))
        .find(|v| !v.is_null())
}

fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Map field-name variants onto the canonical expense shape.
fn normalize(record: Value) -> Value {
    let Value::Object(mut map) = record else {
        return record;
    };

    // Some versions serialize ids and decimals as strings.
    if let Some(id) = map.get("id").filter(|v| v.is_string()).and_then(as_id) {
        map.insert("id".into(), json!(id));
    }
    let amount = map
        .get("amount")
        .and_then(Value::as_str)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|a| a.is_finite());
    if let Some(amount) = amount {
        map.insert("amount".into(), json!(amount));
    }

    if map.get("category").map_or(true, Value::is_null) {
        let id = map.get("categoryId").filter(|v| !v.is_null()).cloned();
        let name = map.get("categoryName").filter(|v| !v.is_null()).cloned();
        if id.is_some() || name.is_some() {
            map.insert("category".into(), json!({ "id": id, "name": name }));
        }
    }

    let group_id = first_present(&map, &["groupId", "group_id"])
        .or_else(|| map.get("group").and_then(|g| g.get("id")))
        .and_then(as_id);
    if let Some(gid) = group_id {
        map.insert("groupId".into(), json!(gid));
        if map.get("group").map_or(true, Value::is_null) {
            let name = map.get("groupName").cloned().unwrap_or(Value::Null);
            map.insert("group".into(), json!({ "id": gid, "name": name }));
        }
    }

    let company_id = first_present(&map, &["companyId", "company_id"])
        .or_else(|| map.get("company").and_then(|c| c.get("id")))
        .and_then(as_id);
    if let Some(cid) = company_id {
        map.insert("companyId".into(), json!(cid));
    }

    let occurred = first_present(&map, DATE_ALIASES)
        .and_then(Value::as_str)
        .map(normalize_date);
    if let Some(date) = occurred {
        map.insert("occurredOn".into(), json!(date));
    }

    let reimbursable = map
        .get("reimbursable")
        .and_then(Value::as_bool)
        .or_else(|| map.get("isReimbursable").and_then(Value::as_bool))
        .unwrap_or_else(|| map.get("reimbursement").is_some_and(|r| !r.is_null()));
    map.insert("reimbursable".into(), json!(reimbursable));

    Value::Object(map)
}

/// Reduce ISO dates and datetimes to `YYYY-MM-DD`; unknown formats pass
/// through for the backend to judge.
fn normalize_date(input: &str) -> String {
    let input = input.trim();
    if let Some(prefix) = input.get(..10) {
        let rest = &input[10..];
        let is_date = chrono::NaiveDate::parse_from_str(prefix, "%Y-%m-%d").is_ok();
        if is_date && (rest.is_empty() || rest.starts_with('T') || rest.starts_with(' ')) {
            return prefix.to_string();
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(input) {
        return dt.format("%Y-%m-%d").to_string();
    }
    input.to_string()
}

fn decode_one(record: Value) -> Result<Expense, ApiError> {
    serde_json::from_value(record).map_err(|e| ApiError::Decode(e.to_string()))
}

fn decode(records: Vec<Value>) -> Vec<Expense> {
    records
        .into_iter()
        .filter_map(|record| match decode_one(record) {
            Ok(expense) => Some(expense),
            Err(e) => {
                tracing::warn!("Skipping undecodable expense: {}", e);
                None
            }
        })
        .collect()
}

fn summarize(expenses: &[Expense]) -> ExpenseSummary {
    let total: f64 = expenses.iter().map(Expense::effective_amount).sum();
    let categories: HashSet<&str> = expenses
        .iter()
        .filter_map(|e| e.category.as_ref()?.name.as_deref())
        .filter(|name| !name.is_empty())
        .collect();

    ExpenseSummary {
        total: round_cents(total),
        transactions: expenses.len() as u64,
        categories: categories.len() as u64,
    }
}
