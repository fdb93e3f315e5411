//! Stock alert generation.
//!
//! Alerts are a derived view of the active batches. [`AlertService::regenerate_alerts`] drops
//! every unresolved alert and derives a fresh set, so two runs over the same stock produce the
//! same set. Resolved alerts are history and are kept, but a condition that still holds is raised
//! again as a new unresolved alert.

use crate::config::CoreConfig;
use crate::constants::NEAR_EXPIRY_HIGH_SEVERITY_DAYS;
use crate::db::{date_col, opt_ts_col, ts_col, ts_to_sql, Database};
use crate::status::{AlertKind, ItemStatus, Severity};
use crate::{HmsError, HmsResult};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub id: i64,
    pub inventory_item_id: i64,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub is_resolved: bool,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The parts of a batch alerting looks at.
#[derive(Clone, Debug)]
pub struct BatchSnapshot {
    pub item_id: i64,
    pub medicine_name: String,
    pub batch_number: String,
    pub quantity: i64,
    pub min_stock_level: i64,
    pub expiry_date: NaiveDate,
}

/// An alert before it is stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertDraft {
    pub inventory_item_id: i64,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
}

/// Derive alerts for active batches.
///
/// - `low_stock` when quantity is at or below the minimum; critical at zero, high otherwise.
/// - `expired` when the expiry date is before `today`; always critical.
/// - `near_expiry` when the batch expires within `near_expiry_days` of `today` (inclusive);
///   high at seven days or fewer, medium otherwise.
///
/// A batch can raise a stock alert and an expiry alert at the same time.
pub fn derive_alerts(
    batches: &[BatchSnapshot],
    today: NaiveDate,
    near_expiry_days: u32,
) -> Vec<AlertDraft> {
    let mut drafts = Vec::new();

    for b in batches.iter().filter(|b| b.quantity <= b.min_stock_level) {
        drafts.push(AlertDraft {
            inventory_item_id: b.item_id,
            kind: AlertKind::LowStock,
            severity: if b.quantity == 0 {
                Severity::Critical
            } else {
                Severity::High
            },
            message: format!(
                "Low stock alert: {} has only {} units left (min: {}).",
                b.medicine_name, b.quantity, b.min_stock_level
            ),
        });
    }

    for b in batches.iter().filter(|b| b.expiry_date < today) {
        drafts.push(AlertDraft {
            inventory_item_id: b.item_id,
            kind: AlertKind::Expired,
            severity: Severity::Critical,
            message: format!(
                "Expired item: {} (Batch: {}) expired on {}.",
                b.medicine_name, b.batch_number, b.expiry_date
            ),
        });
    }

    for b in batches {
        let days = (b.expiry_date - today).num_days();
        if !(0..=i64::from(near_expiry_days)).contains(&days) {
            continue;
        }
        drafts.push(AlertDraft {
            inventory_item_id: b.item_id,
            kind: AlertKind::NearExpiry,
            severity: if days <= NEAR_EXPIRY_HIGH_SEVERITY_DAYS {
                Severity::High
            } else {
                Severity::Medium
            },
            message: format!(
                "Near expiry: {} (Batch: {}) expires in {} days.",
                b.medicine_name, b.batch_number, days
            ),
        });
    }

    drafts
}

#[derive(Clone, Debug)]
pub struct AlertService {
    cfg: Arc<CoreConfig>,
    db: Arc<Database>,
}

impl AlertService {
    pub fn new(cfg: Arc<CoreConfig>, db: Arc<Database>) -> Self {
        Self { cfg, db }
    }

    /// Replace all unresolved alerts with a fresh derivation and return them.
    pub fn regenerate_alerts(&self, now: DateTime<Utc>) -> HmsResult<Vec<StockAlert>> {
        let today = now.date_naive();
        let near_expiry_days = self.cfg.near_expiry_days();

        let alerts = self.db.write(|tx| {
            let removed = tx.execute("DELETE FROM stock_alerts WHERE is_resolved = 0", [])?;
            let drafts = derive_alerts(&active_batches(tx)?, today, near_expiry_days);
            for draft in &drafts {
                tx.execute(
                    "INSERT INTO stock_alerts (inventory_item_id, kind, severity, message,
                         is_resolved, created_at)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                    params![
                        draft.inventory_item_id,
                        draft.kind,
                        draft.severity,
                        draft.message,
                        ts_to_sql(now)
                    ],
                )?;
            }
            tracing::info!(removed, raised = drafts.len(), "stock alerts regenerated");
            list(tx, false)
        })?;
        Ok(alerts)
    }

    pub fn list_unresolved(&self) -> HmsResult<Vec<StockAlert>> {
        self.db.read(|conn| list(conn, false))
    }

    /// Mark an alert handled by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HmsError::InvalidTransition`] if the alert is already resolved.
    pub fn resolve(&self, alert_id: i64, user_id: i64, now: DateTime<Utc>) -> HmsResult<StockAlert> {
        self.db.write(|tx| {
            let alert = load(tx, alert_id)?;
            if alert.is_resolved {
                return Err(HmsError::InvalidTransition {
                    entity: "stock alert",
                    from: "resolved".into(),
                    to: "resolved".into(),
                });
            }
            tx.execute(
                "UPDATE stock_alerts SET is_resolved = 1, resolved_by = ?1, resolved_at = ?2
                 WHERE id = ?3",
                params![user_id, ts_to_sql(now), alert_id],
            )?;
            load(tx, alert_id)
        })
    }
}

fn active_batches(conn: &Connection) -> HmsResult<Vec<BatchSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, m.name, i.batch_number, i.quantity, i.min_stock_level, i.expiry_date
         FROM inventory_items i JOIN medicines m ON m.id = i.medicine_id
         WHERE i.status = ?1
         ORDER BY i.id",
    )?;
    let rows = stmt.query_map(params![ItemStatus::Active], |row| {
        Ok(BatchSnapshot {
            item_id: row.get(0)?,
            medicine_name: row.get(1)?,
            batch_number: row.get(2)?,
            quantity: row.get(3)?,
            min_stock_level: row.get(4)?,
            expiry_date: date_col(row, 5)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

const SELECT_ALERT: &str = "SELECT id, inventory_item_id, kind, severity, message, is_resolved,
    resolved_by, resolved_at, created_at FROM stock_alerts";

fn map_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<StockAlert> {
    Ok(StockAlert {
        id: row.get(0)?,
        inventory_item_id: row.get(1)?,
        kind: row.get(2)?,
        severity: row.get(3)?,
        message: row.get(4)?,
        is_resolved: row.get(5)?,
        resolved_by: row.get(6)?,
        resolved_at: opt_ts_col(row, 7)?,
        created_at: ts_col(row, 8)?,
    })
}

fn list(conn: &Connection, resolved: bool) -> HmsResult<Vec<StockAlert>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_ALERT} WHERE is_resolved = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![resolved], map_alert)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn load(conn: &Connection, id: i64) -> HmsResult<StockAlert> {
    conn.query_row(
        &format!("{SELECT_ALERT} WHERE id = ?1"),
        params![id],
        map_alert,
    )
    .optional()?
    .ok_or_else(|| HmsError::not_found("stock alert", id))
}
