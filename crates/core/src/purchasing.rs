//! Purchase orders to suppliers.

use crate::db::{
    date_col, date_to_sql, money_col, money_to_sql, next_document_number, opt_date_col, ts_col,
    ts_to_sql, Database,
};
use crate::status::{ensure_transition, PurchaseOrderStatus};
use crate::validation::validate_positive_amount;
use crate::{HmsError, HmsResult};
use chrono::{DateTime, NaiveDate, Utc};
use hms_ids::DocumentKind;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: i64,
    pub po_number: String,
    pub supplier_id: i64,
    pub order_date: NaiveDate,
    pub expected_delivery: Option<NaiveDate>,
    pub status: PurchaseOrderStatus,
    pub total_amount: Decimal,
    pub notes: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<PurchaseOrderItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub id: i64,
    pub medicine_id: i64,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewPurchaseOrderItem {
    pub medicine_id: i64,
    pub quantity: u32,
    pub unit_price: Decimal,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_id: i64,
    pub expected_delivery: Option<NaiveDate>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub items: Vec<NewPurchaseOrderItem>,
}

#[derive(Clone, Debug)]
pub struct PurchaseOrderService {
    db: Arc<Database>,
}

impl PurchaseOrderService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Draft a purchase order numbered `PO{yymmdd}{seq:04}`.
    pub fn create(
        &self,
        new: NewPurchaseOrder,
        created_by: i64,
        now: DateTime<Utc>,
    ) -> HmsResult<PurchaseOrder> {
        let today = now.date_naive();
        if new.expected_delivery.is_some_and(|d| d < today) {
            return Err(HmsError::Validation(
                "expected delivery cannot be in the past".into(),
            ));
        }
        for item in &new.items {
            validate_item(item)?;
        }

        self.db.write(|tx| {
            let number = next_document_number(
                tx,
                DocumentKind::PurchaseOrder,
                "purchase_orders",
                "po_number",
                today,
            )?;
            tx.execute(
                "INSERT INTO purchase_orders (po_number, supplier_id, order_date, expected_delivery,
                     status, total_amount, notes, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, '0.00', ?6, ?7, ?8, ?8)",
                params![
                    number.to_string(),
                    new.supplier_id,
                    date_to_sql(today),
                    new.expected_delivery.map(date_to_sql),
                    PurchaseOrderStatus::Draft,
                    new.notes,
                    created_by,
                    ts_to_sql(now),
                ],
            )?;
            let id = tx.last_insert_rowid();
            for item in &new.items {
                insert_item(tx, id, item)?;
            }
            recompute_total(tx, id)?;
            tracing::info!(id, po_number = %number, "purchase order drafted");
            load(tx, id)
        })
    }

    /// Add a line to a draft order.
    pub fn add_item(
        &self,
        order_id: i64,
        item: NewPurchaseOrderItem,
        now: DateTime<Utc>,
    ) -> HmsResult<PurchaseOrder> {
        validate_item(&item)?;
        self.db.write(|tx| {
            let order = load(tx, order_id)?;
            if order.status != PurchaseOrderStatus::Draft {
                return Err(HmsError::Validation(format!(
                    "items can only be added to a draft order, {} is {}",
                    order.po_number, order.status
                )));
            }
            insert_item(tx, order_id, &item)?;
            recompute_total(tx, order_id)?;
            touch(tx, order_id, now)?;
            load(tx, order_id)
        })
    }

    /// Move an order along draft → submitted → approved → ordered → received, or cancel it.
    pub fn transition_status(
        &self,
        order_id: i64,
        next: PurchaseOrderStatus,
        now: DateTime<Utc>,
    ) -> HmsResult<PurchaseOrder> {
        self.db.write(|tx| {
            let order = load(tx, order_id)?;
            ensure_transition(
                "purchase order",
                order.status,
                next,
                order.status.can_transition_to(next),
            )?;
            if next == PurchaseOrderStatus::Submitted && order.items.is_empty() {
                return Err(HmsError::Validation(
                    "an empty purchase order cannot be submitted".into(),
                ));
            }
            tx.execute(
                "UPDATE purchase_orders SET status = ?1 WHERE id = ?2",
                params![next, order_id],
            )?;
            touch(tx, order_id, now)?;
            load(tx, order_id)
        })
    }

    pub fn get(&self, order_id: i64) -> HmsResult<PurchaseOrder> {
        self.db.read(|conn| load(conn, order_id))
    }
}

fn validate_item(item: &NewPurchaseOrderItem) -> HmsResult<()> {
    if item.quantity == 0 {
        return Err(HmsError::Validation("order quantity must be positive".into()));
    }
    validate_positive_amount("unit price", item.unit_price)
}

fn insert_item(conn: &Connection, order_id: i64, item: &NewPurchaseOrderItem) -> HmsResult<()> {
    conn.execute(
        "INSERT INTO purchase_order_items (purchase_order_id, medicine_id, quantity, unit_price,
             total_price)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            order_id,
            item.medicine_id,
            item.quantity,
            money_to_sql(item.unit_price),
            money_to_sql(Decimal::from(item.quantity) * item.unit_price),
        ],
    )?;
    Ok(())
}

fn recompute_total(conn: &Connection, order_id: i64) -> HmsResult<()> {
    let mut stmt =
        conn.prepare("SELECT total_price FROM purchase_order_items WHERE purchase_order_id = ?1")?;
    let prices = stmt.query_map(params![order_id], |row| money_col(row, 0))?;
    let total = prices.collect::<Result<Vec<_>, _>>()?.into_iter().sum::<Decimal>();
    conn.execute(
        "UPDATE purchase_orders SET total_amount = ?1 WHERE id = ?2",
        params![money_to_sql(total), order_id],
    )?;
    Ok(())
}

fn touch(conn: &Connection, order_id: i64, now: DateTime<Utc>) -> HmsResult<()> {
    conn.execute(
        "UPDATE purchase_orders SET updated_at = ?1 WHERE id = ?2",
        params![ts_to_sql(now), order_id],
    )?;
    Ok(())
}

fn load(conn: &Connection, id: i64) -> HmsResult<PurchaseOrder> {
    let mut order = conn
        .query_row(
            "SELECT id, po_number, supplier_id, order_date, expected_delivery, status,
                 total_amount, notes, created_by, created_at, updated_at
             FROM purchase_orders WHERE id = ?1",
            params![id],
            |row| {
                Ok(PurchaseOrder {
                    id: row.get(0)?,
                    po_number: row.get(1)?,
                    supplier_id: row.get(2)?,
                    order_date: date_col(row, 3)?,
                    expected_delivery: opt_date_col(row, 4)?,
                    status: row.get(5)?,
                    total_amount: money_col(row, 6)?,
                    notes: row.get(7)?,
                    created_by: row.get(8)?,
                    created_at: ts_col(row, 9)?,
                    updated_at: ts_col(row, 10)?,
                    items: Vec::new(),
                })
            },
        )
        .optional()?
        .ok_or_else(|| HmsError::not_found("purchase order", id))?;

    let mut stmt = conn.prepare(
        "SELECT id, medicine_id, quantity, unit_price, total_price
         FROM purchase_order_items WHERE purchase_order_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok(PurchaseOrderItem {
            id: row.get(0)?,
            medicine_id: row.get(1)?,
            quantity: row.get(2)?,
            unit_price: money_col(row, 3)?,
            total_price: money_col(row, 4)?,
        })
    })?;
    order.items = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::seed;
    use crate::records::RecordService;
    use chrono::TimeZone;
    use hms_types::{NonEmptyText, PhoneNumber};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_purchase_order_lifecycle() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let seed = seed(&db);
        let supplier = RecordService::new(db.clone())
            .create_supplier(
                NonEmptyText::new("Dawa Ltd").unwrap(),
                "Wambui",
                PhoneNumber::parse("+254 711 000 111").unwrap(),
                "orders@dawa.example",
            )
            .unwrap();
        let orders = PurchaseOrderService::new(db);

        let order = orders
            .create(
                NewPurchaseOrder {
                    supplier_id: supplier.id,
                    expected_delivery: None,
                    notes: String::new(),
                    items: vec![NewPurchaseOrderItem {
                        medicine_id: seed.medicine_id,
                        quantity: 100,
                        unit_price: dec!(9.50),
                    }],
                },
                seed.pharmacist_id,
                now(),
            )
            .expect("create should succeed");
        assert_eq!(order.po_number, "PO2610180001");
        assert_eq!(order.status, PurchaseOrderStatus::Draft);
        assert_eq!(order.total_amount, dec!(950.00));

        let order = orders
            .add_item(
                order.id,
                NewPurchaseOrderItem {
                    medicine_id: seed.medicine_id,
                    quantity: 20,
                    unit_price: dec!(2.25),
                },
                now(),
            )
            .unwrap();
        assert_eq!(order.total_amount, dec!(995.00));
        assert_eq!(order.items.len(), 2);

        for next in [
            PurchaseOrderStatus::Submitted,
            PurchaseOrderStatus::Approved,
            PurchaseOrderStatus::Ordered,
            PurchaseOrderStatus::Received,
        ] {
            orders
                .transition_status(order.id, next, now())
                .expect("forward transition should succeed");
        }

        let err = orders
            .transition_status(order.id, PurchaseOrderStatus::Cancelled, now())
            .expect_err("received is terminal");
        assert!(matches!(err, HmsError::InvalidTransition { .. }));
    }

    #[test]
    fn test_skipping_a_step_is_rejected() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let seed = seed(&db);
        let supplier = RecordService::new(db.clone())
            .create_supplier(
                NonEmptyText::new("Dawa Ltd").unwrap(),
                "",
                PhoneNumber::parse("0711000111").unwrap(),
                "",
            )
            .unwrap();
        let orders = PurchaseOrderService::new(db);
        let order = orders
            .create(
                NewPurchaseOrder {
                    supplier_id: supplier.id,
                    expected_delivery: Some(NaiveDate::from_ymd_opt(2026, 11, 1).unwrap()),
                    notes: String::new(),
                    items: vec![],
                },
                seed.pharmacist_id,
                now(),
            )
            .unwrap();

        assert!(matches!(
            orders.transition_status(order.id, PurchaseOrderStatus::Ordered, now()),
            Err(HmsError::InvalidTransition { .. })
        ));
        assert!(matches!(
            orders.transition_status(order.id, PurchaseOrderStatus::Submitted, now()),
            Err(HmsError::Validation(_))
        ));
        orders
            .transition_status(order.id, PurchaseOrderStatus::Cancelled, now())
            .expect("draft can be cancelled");
    }
}
