//! Command implementations: call the backend and print to stdout.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::api::expenses::DateRange;
use crate::api::{bills, Backend};
use crate::auth;
use crate::config::Config;
use crate::models::{Bill, BillUpload, Expense, ExpenseFilters, Group, NewExpense, Transaction};

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

pub async fn login(backend: &Backend, email: Option<String>, password: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = match password {
        Some(password) => password,
        None => prompt("Password: ")?,
    };

    let tokens = auth::login(&backend.client, &email, &password).await?;
    println!("Logged in as {}.", email.trim());
    if let Some(secs) = tokens.expires_in_seconds {
        println!("Access token valid for {} minutes.", secs / 60);
    }
    Ok(())
}

pub async fn logout(backend: &Backend) -> Result<()> {
    auth::logout(&backend.client).await;
    println!("Logged out.");
    Ok(())
}

pub fn status(backend: &Backend, config: &Config) {
    let status = auth::status(backend.session());

    println!("Backend:     {}", config.api_base_url());
    match (status.authenticated, status.is_expired()) {
        (true, false) => println!("Access tok:  valid"),
        (true, true) => println!("Access tok:  expired (will refresh on next request)"),
        (false, _) => println!("Access tok:  none"),
    }
    if let Some(exp) = status.expires_at {
        println!("  expires_at: {}", exp.to_rfc3339());
    }
    if status.has_refresh_token {
        println!("Refresh tok: present");
    } else {
        println!("Refresh tok: none");
    }
    if let Some(ref user) = status.user_id {
        println!("User ID:     {}", user);
    }
    match status.company_id {
        Some(id) => println!("Scope:       company {}", id),
        None => println!("Scope:       personal"),
    }
}

pub fn show_config(config: &Config) -> Result<()> {
    println!("Config dir:  {}", Config::config_dir()?.display());
    println!("Base URL:    {}", config.api_base_url());
    println!("Timeout:     {}s", config.request_timeout().as_secs());
    println!("Cool-down:   {}ms", config.coalesce_cooldown().as_millis());
    println!("Network log: {}", config.enable_network_logs);
    match config.active_company_id {
        Some(id) => println!("Company:     {}", id),
        None => println!("Company:     (personal)"),
    }
    Ok(())
}

pub fn set_url(config: &mut Config, url: &str) -> Result<()> {
    let url = config.set_base_url(url)?;
    config.save()?;
    println!("Base URL set to {}", url);
    Ok(())
}

/// Persist and apply the active company. `None` switches to personal mode.
pub async fn use_company(backend: &Backend, config: &mut Config, id: Option<i64>) -> Result<()> {
    if let Some(id) = id {
        if id <= 0 {
            bail!("Company id must be positive");
        }
        let company = backend
            .companies
            .get(id)
            .await
            .with_context(|| format!("Company {} is not available", id))?;
        println!("Using company {} ({})", company.company_name, company.id);
    } else {
        println!("Using personal scope");
    }

    let scope = backend.switch_company(id);
    config.active_company_id = scope.company_id();
    config.save()
}

pub async fn list_companies(backend: &Backend) -> Result<()> {
    let companies = backend.companies.list().await?;
    let active = backend.session().tenant().active();

    println!("\nCompanies:");
    println!("{:-<60}", "");
    if companies.is_empty() {
        println!("  (no companies)");
        return Ok(());
    }
    for company in &companies {
        let marker = if Some(company.id) == active { "*" } else { " " };
        println!(
            "{} {:>5}  {}  [{}]",
            marker,
            company.id,
            company.company_name,
            or_dash(company.currency.as_deref())
        );
    }
    Ok(())
}

fn print_expense(expense: &Expense) {
    let category = expense
        .category
        .as_ref()
        .and_then(|c| c.name.as_deref());
    println!(
        "{:>6}  {}  {:>10.2} {:<3}  {:<20}  {}",
        expense.id,
        or_dash(expense.occurred_on.as_deref()),
        expense.amount,
        or_dash(expense.currency.as_deref()),
        or_dash(expense.merchant.as_deref()),
        or_dash(category),
    );
}

fn print_expenses(title: &str, expenses: &[Expense]) {
    println!("\n{}:", title);
    println!("{:-<72}", "");
    if expenses.is_empty() {
        println!("  (no expenses found)");
        return;
    }
    for expense in expenses {
        print_expense(expense);
    }
}

pub async fn list_expenses(backend: &Backend, range: DateRange, page: u32, size: u32) -> Result<()> {
    let scope = backend.scope();
    let expenses = backend.expenses.list(&range, page, size, scope).await?;
    print_expenses(&format!("Expenses ({})", scope.label()), &expenses);
    Ok(())
}

pub async fn expense_summary(backend: &Backend, range: DateRange) -> Result<()> {
    let summary = backend.expenses.summary(&range, backend.scope()).await?;
    println!("Total:        {:.2}", summary.total);
    println!("Transactions: {}", summary.transactions);
    println!("Categories:   {}", summary.categories);
    Ok(())
}

pub async fn add_expense(backend: &Backend, new: NewExpense, receipt: Option<&Path>) -> Result<()> {
    let expense = backend.expenses.create(&new, backend.scope()).await?;
    println!("Created expense {}", expense.id);
    print_expense(&expense);

    if let Some(path) = receipt {
        backend.expenses.upload_receipt(expense.id, path).await?;
        println!("Attached receipt {}", path.display());
    }
    Ok(())
}

pub async fn edit_expense(backend: &Backend, id: i64, patch: serde_json::Value) -> Result<()> {
    if patch.as_object().is_some_and(|p| p.is_empty()) {
        bail!("Nothing to change");
    }
    let expense = backend.expenses.update(id, patch, backend.scope()).await?;
    println!("Updated expense {}", expense.id);
    print_expense(&expense);
    Ok(())
}

pub async fn delete_expense(backend: &Backend, id: i64) -> Result<()> {
    backend.expenses.delete(id, backend.scope()).await?;
    println!("Deleted expense {}", id);
    Ok(())
}

pub async fn search_expenses(backend: &Backend, mut filters: ExpenseFilters) -> Result<()> {
    if filters.company_id.is_none() {
        filters.company_id = backend.scope().company_id();
    }
    let expenses = backend.expenses.search(&filters).await?;
    print_expenses("Matching expenses", &expenses);
    Ok(())
}

pub async fn list_categories(backend: &Backend) -> Result<()> {
    let categories = backend.expenses.categories().await?;
    println!("\nCategories:");
    println!("{:-<40}", "");
    for category in &categories {
        let id = category.id.map(|id| id.to_string());
        println!(
            "{:>5}  {}",
            or_dash(id.as_deref()),
            or_dash(category.name.as_deref())
        );
    }
    Ok(())
}

pub async fn list_currencies(backend: &Backend) -> Result<()> {
    let currencies = backend.expenses.currencies().await?;
    println!("\nCurrencies:");
    println!("{:-<40}", "");
    match currencies {
        serde_json::Value::Array(items) => {
            for item in &items {
                match item {
                    serde_json::Value::String(code) => println!("  {}", code),
                    other => {
                        let code = other.get("code").and_then(|c| c.as_str());
                        let name = other.get("name").and_then(|n| n.as_str());
                        println!("  {:<5} {}", or_dash(code), or_dash(name));
                    }
                }
            }
        }
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}

fn print_bill(bill: &Bill) {
    let amount = bill
        .amount
        .map(|a| format!("{:.2}", a))
        .unwrap_or_else(|| "-".into());
    println!(
        "{:>6}  {}  {:>10} {:<3}  {:<20}  {}",
        bill.id,
        or_dash(bill.bill_date.as_deref()),
        amount,
        or_dash(bill.currency.as_deref()),
        or_dash(bill.merchant.as_deref()),
        or_dash(bill.file_name.as_deref()),
    );
}

pub async fn list_bills(backend: &Backend) -> Result<()> {
    let bills = backend.bills.list(backend.scope().company_id()).await?;
    println!("\nBills:");
    println!("{:-<72}", "");
    if bills.is_empty() {
        println!("  (no bills found)");
        return Ok(());
    }
    for bill in &bills {
        print_bill(bill);
    }
    Ok(())
}

pub async fn show_bill(backend: &Backend, id: i64) -> Result<()> {
    let bill = backend.bills.get(id).await?;
    print_bill(&bill);
    if let Some(ref notes) = bill.notes {
        println!("  Notes: {}", notes);
    }
    if let Some(expense) = bill.expense_id {
        println!("  Expense: {}", expense);
    }
    Ok(())
}

pub async fn download_bill(backend: &Backend, id: i64, dir: &Path) -> Result<()> {
    let bill = backend.bills.get(id).await?;
    let bytes = backend.bills.download(id).await?;
    let path = bills::save_download(&bill, &bytes, dir).await?;
    println!("Saved {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

pub async fn upload_bill(backend: &Backend, mut upload: BillUpload) -> Result<()> {
    if upload.company_id.is_none() {
        upload.company_id = backend.scope().company_id();
    }
    let bill = backend.bills.upload(&upload).await?;
    println!("Uploaded bill {}", bill.id);
    print_bill(&bill);
    Ok(())
}

pub async fn delete_bill(backend: &Backend, id: i64) -> Result<()> {
    backend.bills.delete(id).await?;
    println!("Deleted bill {}", id);
    Ok(())
}

fn print_transaction(tx: &Transaction) {
    let id = tx.id.map(|id| id.to_string());
    println!(
        "{:>6}  {}  {:>10.2}  {:<8}  {}",
        or_dash(id.as_deref()),
        tx.transaction_date,
        tx.amount,
        format!("{:?}", tx.kind),
        tx.description,
    );
}

pub async fn list_transactions(backend: &Backend) -> Result<()> {
    let transactions = backend.transactions.list(backend.scope()).await?;
    println!("\nTransactions:");
    println!("{:-<72}", "");
    if transactions.is_empty() {
        println!("  (no transactions found)");
        return Ok(());
    }
    for tx in &transactions {
        print_transaction(tx);
    }
    Ok(())
}

pub async fn show_transaction(backend: &Backend, id: i64) -> Result<()> {
    let tx = backend.transactions.get(id, backend.scope()).await?;
    print_transaction(&tx);
    if let Some(ref category) = tx.category {
        println!("  Category: {}", category);
    }
    if let Some(ref notes) = tx.notes {
        println!("  Notes: {}", notes);
    }
    Ok(())
}

fn print_group(group: &Group) {
    println!(
        "{:>5}  {:<24}  {} members",
        group.id,
        group.name,
        group.members.len()
    );
}

pub async fn list_groups(backend: &Backend) -> Result<()> {
    let groups = backend.groups.list().await?;
    println!("\nGroups:");
    println!("{:-<60}", "");
    if groups.is_empty() {
        println!("  (no groups)");
        return Ok(());
    }
    for group in &groups {
        print_group(group);
    }
    Ok(())
}

pub async fn show_group(backend: &Backend, id: i64) -> Result<()> {
    let group = backend.groups.get(id).await?;
    print_group(&group);
    if let Some(ref description) = group.description {
        println!("  {}", description);
    }
    let owner = group.owner.as_ref().map(|o| o.id);
    for member in &group.members {
        let marker = if Some(member.id) == owner { "*" } else { " " };
        println!(
            "  {} {:<24} {:<28} {}",
            marker,
            member.name,
            or_dash(Some(member.email.as_str())),
            or_dash(member.role.as_deref())
        );
    }
    Ok(())
}
