//! Expense CLI - command-line client for the expense tracking backend
//!
//! Personal and company expenses, bills and transactions from a terminal.

mod api;
mod auth;
mod commands;
mod config;
mod models;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::expenses::DateRange;
use api::Backend;
use config::Config;
use models::{BillUpload, ExpenseFilters, NewExpense};

#[derive(Parser)]
#[command(name = "expense-cli")]
#[command(about = "Command-line client for the expense tracking backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email (prompted when omitted)
        #[arg(short, long)]
        email: Option<String>,

        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Log out and clear stored credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Show or change settings
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Choose between personal and company scope
    #[command(subcommand)]
    Company(CompanyCommand),

    /// Personal or company expenses
    #[command(subcommand)]
    Expenses(ExpenseCommand),

    /// Uploaded bills and receipts
    #[command(subcommand)]
    Bills(BillCommand),

    /// Income and expense transactions
    #[command(subcommand)]
    Transactions(TransactionCommand),

    /// Expense-sharing groups
    #[command(subcommand)]
    Groups(GroupCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Set the backend URL (e.g. 192.168.1.10:18080)
    SetUrl { url: String },
}

#[derive(Subcommand)]
enum CompanyCommand {
    /// Scope subsequent commands to a company
    Use { id: i64 },

    /// Switch back to personal expenses
    Personal,

    /// List companies you belong to
    List,
}

#[derive(clap::Args)]
struct RangeArgs {
    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,

    /// End date (YYYY-MM-DD)
    #[arg(long)]
    to: Option<String>,
}

impl From<RangeArgs> for DateRange {
    fn from(args: RangeArgs) -> Self {
        DateRange {
            from: args.from,
            to: args.to,
        }
    }
}

#[derive(Subcommand)]
enum ExpenseCommand {
    /// List expenses, newest first
    List {
        #[command(flatten)]
        range: RangeArgs,

        /// Page number (0-based)
        #[arg(long, default_value = "0")]
        page: u32,

        /// Page size
        #[arg(short, long, default_value = "50")]
        size: u32,
    },

    /// Totals for a date range
    Summary {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Record a new expense
    Add {
        #[arg(short, long)]
        amount: f64,

        /// ISO currency code
        #[arg(short, long)]
        currency: String,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,

        #[arg(short, long)]
        merchant: Option<String>,

        #[arg(long)]
        category: Option<i64>,

        #[arg(short, long)]
        notes: Option<String>,

        #[arg(long)]
        group: Option<i64>,

        #[arg(long)]
        reimbursable: bool,

        /// Receipt image or PDF to attach
        #[arg(long)]
        receipt: Option<PathBuf>,
    },

    /// Change fields of an existing expense
    Edit {
        id: i64,

        #[arg(short, long)]
        amount: Option<f64>,

        #[arg(short, long)]
        merchant: Option<String>,

        #[arg(short, long)]
        notes: Option<String>,

        #[arg(long)]
        category: Option<i64>,
    },

    /// Delete an expense
    Delete { id: i64 },

    /// Search expenses by merchant, amount or date
    Search {
        #[arg(short, long)]
        merchant: Option<String>,

        #[arg(long)]
        currency: Option<String>,

        #[arg(long)]
        category: Option<i64>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        min: Option<f64>,

        #[arg(long)]
        max: Option<f64>,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// List expense categories
    Categories,

    /// List supported currencies
    Currencies,
}

#[derive(Subcommand)]
enum BillCommand {
    /// List bills
    List,

    /// Show one bill
    Get { id: i64 },

    /// Download a bill's file
    Download {
        id: i64,

        /// Target directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },

    /// Upload a bill
    Upload {
        file: PathBuf,

        #[arg(long)]
        number: Option<String>,

        /// Expense to link the bill to
        #[arg(long)]
        expense: Option<i64>,

        #[arg(long)]
        category: Option<i64>,

        #[arg(short, long)]
        merchant: Option<String>,

        #[arg(short, long)]
        amount: Option<f64>,

        #[arg(short, long)]
        currency: Option<String>,

        /// Bill date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Delete a bill
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum TransactionCommand {
    /// List transactions
    List,

    /// Show one transaction
    Get { id: i64 },
}

#[derive(Subcommand)]
enum GroupCommand {
    /// List groups you belong to
    List,

    /// Show one group and its members
    Get { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = Config::load()?;

    // Config commands must work before a backend is reachable.
    match &cli.command {
        Commands::Config(ConfigCommand::Show) => {
            return commands::show_config(&config);
        }
        Commands::Config(ConfigCommand::SetUrl { url }) => {
            return commands::set_url(&mut config, url);
        }
        _ => {}
    }

    let backend = Backend::connect(&config)?;

    match cli.command {
        Commands::Config(_) => {}
        Commands::Login { email, password } => {
            tracing::info!("Logging in to {}", config.api_base_url());
            commands::login(&backend, email, password).await?;
        }
        Commands::Logout => {
            commands::logout(&backend).await?;
        }
        Commands::Status => {
            commands::status(&backend, &config);
        }
        Commands::Company(cmd) => match cmd {
            CompanyCommand::Use { id } => {
                commands::use_company(&backend, &mut config, Some(id)).await?;
            }
            CompanyCommand::Personal => {
                commands::use_company(&backend, &mut config, None).await?;
            }
            CompanyCommand::List => {
                commands::list_companies(&backend).await?;
            }
        },
        Commands::Expenses(cmd) => match cmd {
            ExpenseCommand::List { range, page, size } => {
                commands::list_expenses(&backend, range.into(), page, size).await?;
            }
            ExpenseCommand::Summary { range } => {
                commands::expense_summary(&backend, range.into()).await?;
            }
            ExpenseCommand::Add {
                amount,
                currency,
                date,
                merchant,
                category,
                notes,
                group,
                reimbursable,
                receipt,
            } => {
                let new = NewExpense {
                    amount,
                    currency,
                    occurred_on: date,
                    category_id: category,
                    merchant,
                    notes,
                    group_id: group,
                    reimbursable,
                };
                commands::add_expense(&backend, new, receipt.as_deref()).await?;
            }
            ExpenseCommand::Edit {
                id,
                amount,
                merchant,
                notes,
                category,
            } => {
                let mut patch = serde_json::Map::new();
                if let Some(amount) = amount {
                    patch.insert("amount".into(), amount.into());
                }
                if let Some(merchant) = merchant {
                    patch.insert("merchant".into(), merchant.into());
                }
                if let Some(notes) = notes {
                    patch.insert("notes".into(), notes.into());
                }
                if let Some(category) = category {
                    patch.insert("categoryId".into(), category.into());
                }
                commands::edit_expense(&backend, id, patch.into()).await?;
            }
            ExpenseCommand::Delete { id } => {
                commands::delete_expense(&backend, id).await?;
            }
            ExpenseCommand::Search {
                merchant,
                currency,
                category,
                description,
                min,
                max,
                range,
            } => {
                let filters = ExpenseFilters {
                    category_id: category,
                    currency,
                    merchant,
                    description,
                    min_amount: min,
                    max_amount: max,
                    start_date: range.from,
                    end_date: range.to,
                    company_id: None,
                };
                commands::search_expenses(&backend, filters).await?;
            }
            ExpenseCommand::Categories => {
                commands::list_categories(&backend).await?;
            }
            ExpenseCommand::Currencies => {
                commands::list_currencies(&backend).await?;
            }
        },
        Commands::Bills(cmd) => match cmd {
            BillCommand::List => {
                commands::list_bills(&backend).await?;
            }
            BillCommand::Get { id } => {
                commands::show_bill(&backend, id).await?;
            }
            BillCommand::Download { id, dir } => {
                commands::download_bill(&backend, id, &dir).await?;
            }
            BillCommand::Upload {
                file,
                number,
                expense,
                category,
                merchant,
                amount,
                currency,
                date,
                notes,
            } => {
                let upload = BillUpload {
                    file,
                    bill_number: number,
                    expense_id: expense,
                    category_id: category,
                    merchant,
                    amount,
                    currency,
                    bill_date: date,
                    notes,
                    company_id: None,
                };
                commands::upload_bill(&backend, upload).await?;
            }
            BillCommand::Delete { id } => {
                commands::delete_bill(&backend, id).await?;
            }
        },
        Commands::Transactions(cmd) => match cmd {
            TransactionCommand::List => {
                commands::list_transactions(&backend).await?;
            }
            TransactionCommand::Get { id } => {
                commands::show_transaction(&backend, id).await?;
            }
        },
        Commands::Groups(cmd) => match cmd {
            GroupCommand::List => {
                commands::list_groups(&backend).await?;
            }
            GroupCommand::Get { id } => {
                commands::show_group(&backend, id).await?;
            }
        },
    }

    Ok(())
}
