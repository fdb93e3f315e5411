use chrono::Utc;
use clap::{Parser, Subcommand};
use hms_core::config::near_expiry_days_from_env_value;
use hms_core::{
    AlertService, CoreConfig, Database, InventoryService, StockLedger, TransactionKind,
    TransactionMeta,
};
use rust_decimal::Decimal;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hms")]
#[command(about = "Hospital back-office CLI")]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "HMS_DATABASE_PATH", default_value = "hms.db", global = true)]
    database: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,
    /// List unresolved stock alerts
    Alerts {
        /// Rebuild alerts from current stock first
        #[arg(long)]
        regenerate: bool,
    },
    /// Mark a stock alert as handled
    ResolveAlert {
        alert_id: i64,
        /// Id of the user resolving it
        #[arg(long)]
        by: i64,
    },
    /// Record a stock transaction
    Record {
        /// Inventory item (batch) id
        item_id: i64,
        /// purchase, sale, return, adjustment, transfer or write_off
        kind: TransactionKind,
        /// Signed quantity: positive for purchase/adjustment, negative otherwise
        #[arg(allow_hyphen_values = true)]
        quantity: i64,
        /// Unit price (defaults from the item)
        #[arg(long)]
        unit_price: Option<Decimal>,
        /// Id of the user recording it
        #[arg(long)]
        by: i64,
        #[arg(long, default_value = "")]
        reference: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Undo a stock transaction by its ST number
    Reverse { transaction_id: String },
    /// List active items at or under their reorder level
    LowStock,
    /// List active items expiring within the window
    NearExpiry {
        /// Days ahead (defaults to HMS_NEAR_EXPIRY_DAYS or 30)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Print the cost value of active stock
    InventoryValue,
    /// Compare an item's cached quantity with its ledger balance
    Audit { item_id: i64 },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();
    run(cli, &mut stdout)
}

fn run(cli: Cli, out: &mut impl Write) -> Result<(), Box<dyn std::error::Error>> {
    let Some(command) = cli.command else {
        writeln!(out, "Use 'hms --help' for commands")?;
        return Ok(());
    };

    let near_expiry_days =
        near_expiry_days_from_env_value(std::env::var("HMS_NEAR_EXPIRY_DAYS").ok())?;
    let cfg = Arc::new(CoreConfig::new(cli.database, near_expiry_days, None)?);
    let db = Arc::new(Database::open(cfg.database_path())?);
    let now = Utc::now();

    match command {
        Commands::Migrate => {
            writeln!(out, "Database ready at {}", cfg.database_path().display())?;
        }
        Commands::Alerts { regenerate } => {
            let service = AlertService::new(cfg.clone(), db);
            let alerts = if regenerate {
                service.regenerate_alerts(now)?
            } else {
                service.list_unresolved()?
            };
            if alerts.is_empty() {
                writeln!(out, "No unresolved alerts.")?;
            }
            for alert in alerts {
                writeln!(
                    out,
                    "#{} [{}] {}: {}",
                    alert.id, alert.severity, alert.kind, alert.message
                )?;
            }
        }
        Commands::ResolveAlert { alert_id, by } => {
            let alert = AlertService::new(cfg.clone(), db).resolve(alert_id, by, now)?;
            writeln!(out, "Resolved alert #{}", alert.id)?;
        }
        Commands::Record {
            item_id,
            kind,
            quantity,
            unit_price,
            by,
            reference,
            notes,
        } => {
            let meta = TransactionMeta {
                reference,
                notes,
                ..TransactionMeta::by(by)
            };
            let tx = StockLedger::new(db.clone())
                .record_transaction(item_id, kind, quantity, unit_price, meta, now)?;
            let item = InventoryService::new(db).get_item(item_id)?;
            writeln!(
                out,
                "{} {} {} x {} = {} (on hand: {})",
                tx.transaction_id, tx.kind, tx.quantity, tx.unit_price, tx.total_amount, item.quantity
            )?;
        }
        Commands::Reverse { transaction_id } => {
            let tx = StockLedger::new(db).reverse_transaction(&transaction_id)?;
            writeln!(out, "Reversed {} ({} {})", tx.transaction_id, tx.kind, tx.quantity)?;
        }
        Commands::LowStock => {
            let items = InventoryService::new(db).list_low_stock()?;
            if items.is_empty() {
                writeln!(out, "No items at or under their reorder level.")?;
            }
            for item in items {
                writeln!(
                    out,
                    "#{} batch {}: {} on hand (min {})",
                    item.id, item.batch_number, item.quantity, item.min_stock_level
                )?;
            }
        }
        Commands::NearExpiry { days } => {
            let days = days.unwrap_or(cfg.near_expiry_days());
            let today = now.date_naive();
            for item in InventoryService::new(db).list_near_expiry(today, days)? {
                writeln!(
                    out,
                    "#{} batch {}: expires {} ({} days)",
                    item.id,
                    item.batch_number,
                    item.expiry_date,
                    item.days_until_expiry(today)
                )?;
            }
        }
        Commands::InventoryValue => {
            let total = InventoryService::new(db).total_value()?;
            writeln!(out, "Total inventory value: {total}")?;
        }
        Commands::Audit { item_id } => {
            let audit = StockLedger::new(db).reconcile_quantity(item_id)?;
            let verdict = if audit.is_consistent() { "ok" } else { "DRIFT" };
            writeln!(
                out,
                "item #{}: cached {} ledger {} {}",
                audit.inventory_item_id, audit.cached_quantity, audit.ledger_balance, verdict
            )?;
        }
    }

    Ok(())
}
