//! Stock ledger.
//!
//! Every change to a batch's quantity is a signed [`StockTransaction`]. The batch's cached
//! `quantity` column is updated in the same SQL transaction as the ledger row, so at every commit
//! point `item.quantity == sum(tx.quantity)` over the item's transactions.
//!
//! Sign rules: `purchase` and `adjustment` are incoming and carry a positive quantity. `sale`,
//! `return` (to supplier), `transfer` and `write_off` are outgoing and carry a negative quantity
//! whose magnitude may not exceed the stock on hand.

use crate::db::{money_col, money_to_sql, next_document_number, ts_col, ts_to_sql, Database};
use crate::status::{ItemStatus, TransactionKind};
use crate::{HmsError, HmsResult};
use chrono::{DateTime, Utc};
use hms_ids::DocumentKind;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransaction {
    pub id: i64,
    /// Human-readable `ST{yymmdd}{seq:04}` number.
    pub transaction_id: String,
    pub inventory_item_id: i64,
    pub kind: TransactionKind,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub reference: String,
    pub notes: String,
    pub created_by: i64,
    pub transaction_date: DateTime<Utc>,
    pub patient_id: Option<i64>,
    pub prescription_id: Option<i64>,
}

/// Who and what a transaction is recorded for.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TransactionMeta {
    pub created_by: i64,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub notes: String,
    pub patient_id: Option<i64>,
    pub prescription_id: Option<i64>,
}

impl TransactionMeta {
    pub fn by(created_by: i64) -> Self {
        Self {
            created_by,
            ..Default::default()
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }
}

/// Difference between a batch's cached quantity and its ledger fold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QuantityAudit {
    pub inventory_item_id: i64,
    pub cached_quantity: i64,
    pub ledger_balance: i64,
}

impl QuantityAudit {
    pub fn is_consistent(&self) -> bool {
        self.cached_quantity == self.ledger_balance
    }
}

/// Records and reverses stock movements.
#[derive(Clone, Debug)]
pub struct StockLedger {
    db: Arc<Database>,
}

impl StockLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a stock movement and adjust the batch's quantity.
    ///
    /// # Arguments
    ///
    /// * `item_id` - The inventory batch being moved.
    /// * `kind` - Transaction kind; decides the required sign of `quantity`.
    /// * `quantity` - Signed quantity. Positive for incoming kinds, negative for outgoing.
    /// * `unit_price` - Price per unit. Defaults to the batch's cost price for purchases and its
    ///   selling price otherwise.
    /// * `meta` - Creator and optional references.
    /// * `now` - Transaction timestamp; its date also codes the transaction number.
    ///
    /// # Errors
    ///
    /// - [`HmsError::InvalidQuantitySign`] if `quantity` is zero or has the wrong sign for `kind`.
    /// - [`HmsError::InsufficientStock`] if an outgoing quantity exceeds the stock on hand.
    /// - [`HmsError::NotFound`] if the batch does not exist.
    ///
    /// A rejected transaction leaves the batch untouched.
    pub fn record_transaction(
        &self,
        item_id: i64,
        kind: TransactionKind,
        quantity: i64,
        unit_price: Option<Decimal>,
        meta: TransactionMeta,
        now: DateTime<Utc>,
    ) -> HmsResult<StockTransaction> {
        self.db
            .write(|tx| record_in(tx, item_id, kind, quantity, unit_price, &meta, now))
    }

    /// Undo a transaction: apply the inverse delta and delete the ledger row together.
    ///
    /// # Errors
    ///
    /// Returns [`HmsError::InsufficientStock`] when undoing an incoming transaction would take
    /// the batch below zero (the stock was already consumed). Nothing changes in that case.
    pub fn reverse_transaction(&self, transaction_id: &str) -> HmsResult<StockTransaction> {
        self.db.write(|tx| {
            let original = load_by_number(tx, transaction_id)?;
            apply_delta(tx, original.inventory_item_id, -original.quantity)?;
            tx.execute(
                "DELETE FROM stock_transactions WHERE id = ?1",
                params![original.id],
            )?;
            tracing::info!(
                transaction_id,
                item_id = original.inventory_item_id,
                quantity = original.quantity,
                "stock transaction reversed"
            );
            Ok(original)
        })
    }

    pub fn get(&self, transaction_id: &str) -> HmsResult<StockTransaction> {
        self.db.read(|conn| load_by_number(conn, transaction_id))
    }

    /// All transactions for a batch, oldest first.
    pub fn list_for_item(&self, item_id: i64) -> HmsResult<Vec<StockTransaction>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_TRANSACTION} WHERE inventory_item_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![item_id], map_transaction)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Net sum of every recorded quantity for a batch.
    pub fn ledger_balance(&self, item_id: i64) -> HmsResult<i64> {
        self.db.read(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(SUM(quantity), 0) FROM stock_transactions WHERE inventory_item_id = ?1",
                params![item_id],
                |row| row.get(0),
            )?)
        })
    }

    /// Compare a batch's cached quantity against its ledger fold.
    pub fn reconcile_quantity(&self, item_id: i64) -> HmsResult<QuantityAudit> {
        self.db.read(|conn| {
            let audit = conn
                .query_row(
                    "SELECT i.quantity, COALESCE(SUM(t.quantity), 0)
                     FROM inventory_items i
                     LEFT JOIN stock_transactions t ON t.inventory_item_id = i.id
                     WHERE i.id = ?1
                     GROUP BY i.id",
                    params![item_id],
                    |row| {
                        Ok(QuantityAudit {
                            inventory_item_id: item_id,
                            cached_quantity: row.get(0)?,
                            ledger_balance: row.get(1)?,
                        })
                    },
                )
                .optional()?
                .ok_or_else(|| HmsError::not_found("inventory item", item_id))?;
            if !audit.is_consistent() {
                tracing::warn!(
                    item_id,
                    cached = audit.cached_quantity,
                    ledger = audit.ledger_balance,
                    "stock quantity drift"
                );
            }
            Ok(audit)
        })
    }
}

/// Reject zero and wrong-signed quantities.
pub fn validate_sign(kind: TransactionKind, quantity: i64) -> HmsResult<()> {
    let ok = if kind.is_incoming() {
        quantity > 0
    } else {
        quantity < 0
    };
    if ok {
        Ok(())
    } else {
        Err(HmsError::InvalidQuantitySign {
            kind: kind.to_string(),
            quantity,
        })
    }
}

struct Pricing {
    quantity: i64,
    cost_price: Decimal,
    selling_price: Decimal,
}

/// Record a transaction inside an open write transaction.
///
/// Shared by [`StockLedger`], opening stock on item creation, and auto-dispense.
pub(crate) fn record_in(
    conn: &Connection,
    item_id: i64,
    kind: TransactionKind,
    quantity: i64,
    unit_price: Option<Decimal>,
    meta: &TransactionMeta,
    now: DateTime<Utc>,
) -> HmsResult<StockTransaction> {
    validate_sign(kind, quantity)?;

    let item = conn
        .query_row(
            "SELECT quantity, cost_price, selling_price FROM inventory_items WHERE id = ?1",
            params![item_id],
            |row| {
                Ok(Pricing {
                    quantity: row.get(0)?,
                    cost_price: money_col(row, 1)?,
                    selling_price: money_col(row, 2)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| HmsError::not_found("inventory item", item_id))?;

    if !kind.is_incoming() && quantity.abs() > item.quantity {
        return Err(HmsError::InsufficientStock {
            requested: quantity.abs(),
            available: item.quantity,
        });
    }

    let unit_price = match unit_price {
        Some(price) => {
            crate::validation::validate_positive_amount("unit price", price)?;
            price
        }
        None if kind == TransactionKind::Purchase => item.cost_price,
        None => item.selling_price,
    };
    let total_amount = (Decimal::from(quantity.abs()) * unit_price).round_dp(2);

    let number = next_document_number(
        conn,
        DocumentKind::StockTransaction,
        "stock_transactions",
        "transaction_id",
        now.date_naive(),
    )?;

    conn.execute(
        "INSERT INTO stock_transactions (transaction_id, inventory_item_id, kind, quantity,
             unit_price, total_amount, reference, notes, created_by, transaction_date,
             patient_id, prescription_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            number.to_string(),
            item_id,
            kind,
            quantity,
            money_to_sql(unit_price),
            money_to_sql(total_amount),
            meta.reference,
            meta.notes,
            meta.created_by,
            ts_to_sql(now),
            meta.patient_id,
            meta.prescription_id,
        ],
    )?;
    let id = conn.last_insert_rowid();

    apply_delta(conn, item_id, quantity)?;

    tracing::info!(
        transaction_id = %number,
        item_id,
        %kind,
        quantity,
        "stock transaction recorded"
    );

    Ok(StockTransaction {
        id,
        transaction_id: number.to_string(),
        inventory_item_id: item_id,
        kind,
        quantity,
        unit_price,
        total_amount,
        reference: meta.reference.clone(),
        notes: meta.notes.clone(),
        created_by: meta.created_by,
        transaction_date: now,
        patient_id: meta.patient_id,
        prescription_id: meta.prescription_id,
    })
}

/// Add `delta` to a batch's quantity, deactivating it at exactly zero.
///
/// The `quantity + delta >= 0` guard makes the update a compare-and-set on the stored value.
fn apply_delta(conn: &Connection, item_id: i64, delta: i64) -> HmsResult<()> {
    let changed = conn.execute(
        "UPDATE inventory_items
         SET quantity = quantity + ?1,
             status = CASE WHEN quantity + ?1 = 0 THEN ?2 ELSE status END
         WHERE id = ?3 AND quantity + ?1 >= 0",
        params![delta, ItemStatus::Inactive, item_id],
    )?;
    if changed == 1 {
        return Ok(());
    }

    let available: Option<i64> = conn
        .query_row(
            "SELECT quantity FROM inventory_items WHERE id = ?1",
            params![item_id],
            |row| row.get(0),
        )
        .optional()?;
    match available {
        None => Err(HmsError::not_found("inventory item", item_id)),
        Some(available) => Err(HmsError::InsufficientStock {
            requested: delta.abs(),
            available,
        }),
    }
}

const SELECT_TRANSACTION: &str = "SELECT id, transaction_id, inventory_item_id, kind, quantity,
    unit_price, total_amount, reference, notes, created_by, transaction_date, patient_id,
    prescription_id FROM stock_transactions";

fn map_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<StockTransaction> {
    Ok(StockTransaction {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        inventory_item_id: row.get(2)?,
        kind: row.get(3)?,
        quantity: row.get(4)?,
        unit_price: money_col(row, 5)?,
        total_amount: money_col(row, 6)?,
        reference: row.get(7)?,
        notes: row.get(8)?,
        created_by: row.get(9)?,
        transaction_date: ts_col(row, 10)?,
        patient_id: row.get(11)?,
        prescription_id: row.get(12)?,
    })
}

fn load_by_number(conn: &Connection, transaction_id: &str) -> HmsResult<StockTransaction> {
    conn.query_row(
        &format!("{SELECT_TRANSACTION} WHERE transaction_id = ?1"),
        params![transaction_id],
        map_transaction,
    )
    .optional()?
    .ok_or_else(|| HmsError::not_found("stock transaction", transaction_id))
}

/// Outgoing `sale` quantity per batch since `since`, used by usage statistics.
pub(crate) fn sold_since(conn: &Connection, item_id: i64, since: DateTime<Utc>) -> HmsResult<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(-quantity), 0) FROM stock_transactions
         WHERE inventory_item_id = ?1 AND kind = ?2 AND transaction_date >= ?3",
        params![item_id, TransactionKind::Sale, ts_to_sql(since)],
        |row| row.get(0),
    )?)
}
