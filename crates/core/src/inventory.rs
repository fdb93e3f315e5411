//! Inventory batches and stock queries.
//!
//! An [`InventoryItem`] is one batch of one medicine. Its `quantity` is owned by the
//! [`ledger`](crate::ledger): creation records opening stock as a purchase, and
//! [`InventoryService::update_item`] never touches it.

use crate::constants::{
    DEFAULT_MAX_STOCK_LEVEL, DEFAULT_MIN_STOCK_LEVEL, INITIAL_STOCK_REFERENCE, USAGE_WINDOW_DAYS,
};
use crate::db::{date_col, date_to_sql, money_col, money_to_sql, Database};
use crate::ledger::{self, TransactionMeta};
use crate::status::{ItemStatus, TransactionKind};
use crate::validation::{validate_expiry, validate_prices, validate_stock_levels};
use crate::{HmsError, HmsResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use hms_ids::Barcode;
use hms_types::NonEmptyText;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: i64,
    pub medicine_id: i64,
    pub category_id: Option<i64>,
    pub supplier_id: Option<i64>,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: u32,
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    pub received_date: NaiveDate,
    pub min_stock_level: u32,
    pub max_stock_level: u32,
    pub location: String,
    pub status: ItemStatus,
    pub barcode: String,
}

impl InventoryItem {
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.min_stock_level
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date < today
    }

    /// Negative once the batch has expired.
    pub fn days_until_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }

    /// Stock value at cost.
    pub fn total_value(&self) -> Decimal {
        Decimal::from(self.quantity) * self.cost_price
    }

    /// Markup over cost as a percentage, rounded to two places.
    pub fn profit_margin(&self) -> Decimal {
        if self.cost_price.is_zero() {
            return Decimal::ZERO;
        }
        ((self.selling_price - self.cost_price) / self.cost_price * Decimal::ONE_HUNDRED)
            .round_dp(2)
    }
}

/// A batch as received.
#[derive(Clone, Debug, Deserialize)]
pub struct NewInventoryItem {
    pub medicine_id: i64,
    pub category_id: Option<i64>,
    pub supplier_id: Option<i64>,
    pub batch_number: NonEmptyText,
    pub expiry_date: NaiveDate,
    /// Opening stock, recorded as an "Initial Stock" purchase when non-zero.
    #[serde(default)]
    pub quantity: u32,
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    pub received_date: Option<NaiveDate>,
    pub min_stock_level: Option<u32>,
    pub max_stock_level: Option<u32>,
    #[serde(default)]
    pub location: String,
    /// Supplier barcode; one is generated when absent.
    pub barcode: Option<String>,
}

/// Editable batch fields. Quantity is deliberately absent.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ItemUpdate {
    pub cost_price: Option<Decimal>,
    pub selling_price: Option<Decimal>,
    pub min_stock_level: Option<u32>,
    pub max_stock_level: Option<u32>,
    pub location: Option<String>,
    pub status: Option<ItemStatus>,
}

#[derive(Clone, Debug)]
pub struct InventoryService {
    db: Arc<Database>,
}

impl InventoryService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Register a new batch and record its opening stock.
    ///
    /// # Errors
    ///
    /// - [`HmsError::Validation`] for bad prices, a past expiry date or inverted stock levels.
    /// - [`HmsError::Duplicate`] when the medicine already has a batch with this number, or the
    ///   barcode is taken.
    pub fn create_item(
        &self,
        new: NewInventoryItem,
        created_by: i64,
        now: DateTime<Utc>,
    ) -> HmsResult<InventoryItem> {
        let today = now.date_naive();
        validate_prices(new.cost_price, new.selling_price)?;
        validate_expiry(new.expiry_date, today)?;
        let min = new.min_stock_level.unwrap_or(DEFAULT_MIN_STOCK_LEVEL);
        let max = new.max_stock_level.unwrap_or(DEFAULT_MAX_STOCK_LEVEL);
        validate_stock_levels(min, max)?;

        let barcode = new
            .barcode
            .as_deref()
            .and_then(Barcode::supplied)
            .unwrap_or_else(|| Barcode::generate(new.medicine_id));

        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO inventory_items (medicine_id, category_id, supplier_id, batch_number,
                     expiry_date, quantity, cost_price, selling_price, received_date,
                     min_stock_level, max_stock_level, location, status, barcode)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    new.medicine_id,
                    new.category_id,
                    new.supplier_id,
                    new.batch_number.as_str(),
                    date_to_sql(new.expiry_date),
                    money_to_sql(new.cost_price),
                    money_to_sql(new.selling_price),
                    date_to_sql(new.received_date.unwrap_or(today)),
                    min,
                    max,
                    new.location,
                    ItemStatus::Active,
                    barcode.as_str(),
                ],
            )?;
            let id = tx.last_insert_rowid();

            if new.quantity > 0 {
                let meta = TransactionMeta::by(created_by).with_reference(INITIAL_STOCK_REFERENCE);
                ledger::record_in(
                    tx,
                    id,
                    TransactionKind::Purchase,
                    i64::from(new.quantity),
                    Some(new.cost_price),
                    &meta,
                    now,
                )?;
            }

            tracing::info!(id, batch = new.batch_number.as_str(), "inventory item created");
            load(tx, id)
        })
    }

    /// Change prices, levels, location or status of a batch.
    pub fn update_item(&self, id: i64, update: ItemUpdate) -> HmsResult<InventoryItem> {
        self.db.write(|tx| {
            let mut item = load(tx, id)?;
            if let Some(cost) = update.cost_price {
                item.cost_price = cost;
            }
            if let Some(selling) = update.selling_price {
                item.selling_price = selling;
            }
            if let Some(min) = update.min_stock_level {
                item.min_stock_level = min;
            }
            if let Some(max) = update.max_stock_level {
                item.max_stock_level = max;
            }
            if let Some(location) = update.location {
                item.location = location;
            }
            if let Some(status) = update.status {
                item.status = status;
            }
            validate_prices(item.cost_price, item.selling_price)?;
            validate_stock_levels(item.min_stock_level, item.max_stock_level)?;

            tx.execute(
                "UPDATE inventory_items SET cost_price = ?1, selling_price = ?2,
                     min_stock_level = ?3, max_stock_level = ?4, location = ?5, status = ?6
                 WHERE id = ?7",
                params![
                    money_to_sql(item.cost_price),
                    money_to_sql(item.selling_price),
                    item.min_stock_level,
                    item.max_stock_level,
                    item.location,
                    item.status,
                    id,
                ],
            )?;
            Ok(item)
        })
    }

    pub fn get_item(&self, id: i64) -> HmsResult<InventoryItem> {
        self.db.read(|conn| load(conn, id))
    }

    /// All batches, soonest expiry first.
    pub fn list_items(&self) -> HmsResult<Vec<InventoryItem>> {
        self.query("ORDER BY expiry_date, id", &[])
    }

    /// Active batches at or below their reorder threshold.
    pub fn list_low_stock(&self) -> HmsResult<Vec<InventoryItem>> {
        self.query(
            "WHERE status = ?1 AND quantity <= min_stock_level ORDER BY quantity, id",
            &[&ItemStatus::Active],
        )
    }

    /// Active batches whose expiry date is before `today`.
    pub fn list_expired(&self, today: NaiveDate) -> HmsResult<Vec<InventoryItem>> {
        self.query(
            "WHERE status = ?1 AND expiry_date < ?2 ORDER BY expiry_date, id",
            &[&ItemStatus::Active, &date_to_sql(today)],
        )
    }

    /// Active batches expiring between `today` and `today + days`, inclusive.
    pub fn list_near_expiry(&self, today: NaiveDate, days: u32) -> HmsResult<Vec<InventoryItem>> {
        let horizon = today + Duration::days(i64::from(days));
        self.query(
            "WHERE status = ?1 AND expiry_date >= ?2 AND expiry_date <= ?3
             ORDER BY expiry_date, id",
            &[&ItemStatus::Active, &date_to_sql(today), &date_to_sql(horizon)],
        )
    }

    /// Value at cost of all active stock.
    pub fn total_value(&self) -> HmsResult<Decimal> {
        let items = self.query("WHERE status = ?1", &[&ItemStatus::Active])?;
        Ok(items.iter().map(InventoryItem::total_value).sum())
    }

    /// Average units sold per month over the trailing six months.
    pub fn monthly_usage(&self, item_id: i64, now: DateTime<Utc>) -> HmsResult<Decimal> {
        let since = now - Duration::days(USAGE_WINDOW_DAYS);
        self.db.read(|conn| {
            load(conn, item_id)?;
            let sold = ledger::sold_since(conn, item_id, since)?;
            Ok((Decimal::from(sold) / Decimal::from(USAGE_WINDOW_DAYS / 30)).round_dp(2))
        })
    }

    /// Whether `quantity` units can be taken from an active batch right now.
    pub fn check_availability(&self, item_id: i64, quantity: u32) -> HmsResult<bool> {
        let item = self.get_item(item_id)?;
        Ok(item.status == ItemStatus::Active && item.quantity >= quantity)
    }

    fn query(&self, clause: &str, args: &[&dyn ToSql]) -> HmsResult<Vec<InventoryItem>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_ITEM} {clause}"))?;
            let rows = stmt.query_map(args, map_item)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

pub(crate) const SELECT_ITEM: &str = "SELECT id, medicine_id, category_id, supplier_id,
    batch_number, expiry_date, quantity, cost_price, selling_price, received_date,
    min_stock_level, max_stock_level, location, status, barcode FROM inventory_items";

pub(crate) fn map_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<InventoryItem> {
    Ok(InventoryItem {
        id: row.get(0)?,
        medicine_id: row.get(1)?,
        category_id: row.get(2)?,
        supplier_id: row.get(3)?,
        batch_number: row.get(4)?,
        expiry_date: date_col(row, 5)?,
        quantity: row.get(6)?,
        cost_price: money_col(row, 7)?,
        selling_price: money_col(row, 8)?,
        received_date: date_col(row, 9)?,
        min_stock_level: row.get(10)?,
        max_stock_level: row.get(11)?,
        location: row.get(12)?,
        status: row.get(13)?,
        barcode: row.get(14)?,
    })
}

pub(crate) fn load(conn: &Connection, id: i64) -> HmsResult<InventoryItem> {
    conn.query_row(&format!("{SELECT_ITEM} WHERE id = ?1"), params![id], map_item)
        .optional()?
        .ok_or_else(|| HmsError::not_found("inventory item", id))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::records::fixtures::{seed, Seed};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap()
    }

    pub(crate) fn today() -> NaiveDate {
        now().date_naive()
    }

    /// Test batch description with sensible defaults: cost 10.00, selling 15.00, min 10.
    #[derive(Clone)]
    pub(crate) struct ItemSpec {
        batch: String,
        expiry: NaiveDate,
        quantity: i64,
        min: u32,
        medicine_id: Option<i64>,
    }

    impl Default for ItemSpec {
        fn default() -> Self {
            Self {
                batch: "B001".into(),
                expiry: NaiveDate::from_ymd_opt(2027, 6, 30).unwrap(),
                quantity: 0,
                min: 10,
                medicine_id: None,
            }
        }
    }

    impl ItemSpec {
        pub(crate) fn quantity(mut self, quantity: i64) -> Self {
            self.quantity = quantity;
            self
        }

        pub(crate) fn batch(mut self, batch: &str) -> Self {
            self.batch = batch.into();
            self
        }

        pub(crate) fn expiry(mut self, expiry: NaiveDate) -> Self {
            self.expiry = expiry;
            self
        }

        pub(crate) fn min(mut self, min: u32) -> Self {
            self.min = min;
            self
        }

        pub(crate) fn medicine(mut self, medicine_id: i64) -> Self {
            self.medicine_id = Some(medicine_id);
            self
        }
    }

    fn new_item(seed: &Seed, spec: &ItemSpec) -> NewInventoryItem {
        NewInventoryItem {
            medicine_id: spec.medicine_id.unwrap_or(seed.medicine_id),
            category_id: None,
            supplier_id: None,
            batch_number: NonEmptyText::new(&spec.batch).unwrap(),
            expiry_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            quantity: u32::try_from(spec.quantity).unwrap(),
            cost_price: dec!(10.00),
            selling_price: dec!(15.00),
            received_date: None,
            min_stock_level: Some(spec.min),
            max_stock_level: Some(100),
            location: "Shelf A".into(),
            barcode: None,
        }
    }

    /// Creates a batch, then back-dates its expiry directly so expired batches can be set up.
    pub(crate) fn insert_item(db: &Arc<Database>, seed: &Seed, spec: ItemSpec) -> i64 {
        let service = InventoryService::new(db.clone());
        let item = service
            .create_item(new_item(seed, &spec), seed.pharmacist_id, now())
            .expect("create_item should succeed");
        db.write(|tx| {
            tx.execute(
                "UPDATE inventory_items SET expiry_date = ?1 WHERE id = ?2",
                params![date_to_sql(spec.expiry), item.id],
            )?;
            Ok(())
        })
        .expect("expiry update should succeed");
        item.id
    }

    fn setup() -> (Arc<Database>, InventoryService, Seed) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let seed = seed(&db);
        (db.clone(), InventoryService::new(db), seed)
    }

    #[test]
    fn test_create_records_initial_stock_purchase() {
        let (db, service, seed) = setup();
        let item = service
            .create_item(
                new_item(&seed, &ItemSpec::default().quantity(40)),
                seed.pharmacist_id,
                now(),
            )
            .expect("create_item should succeed");

        assert_eq!(item.quantity, 40);
        assert_eq!(item.status, ItemStatus::Active);
        assert!(item.barcode.starts_with(&format!("MED{:06}", seed.medicine_id)));

        let history = crate::ledger::StockLedger::new(db)
            .list_for_item(item.id)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TransactionKind::Purchase);
        assert_eq!(history[0].quantity, 40);
        assert_eq!(history[0].reference, INITIAL_STOCK_REFERENCE);
        assert_eq!(history[0].total_amount, dec!(400.00));
    }

    #[test]
    fn test_create_validates_fields() {
        let (_, service, seed) = setup();

        let mut cheap = new_item(&seed, &ItemSpec::default());
        cheap.selling_price = dec!(9.00);
        assert!(matches!(
            service.create_item(cheap, seed.pharmacist_id, now()),
            Err(HmsError::Validation(_))
        ));

        let mut stale = new_item(&seed, &ItemSpec::default());
        stale.expiry_date = today().pred_opt().unwrap();
        assert!(matches!(
            service.create_item(stale, seed.pharmacist_id, now()),
            Err(HmsError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_batch_is_rejected() {
        let (_, service, seed) = setup();
        service
            .create_item(new_item(&seed, &ItemSpec::default()), seed.pharmacist_id, now())
            .unwrap();
        let err = service
            .create_item(new_item(&seed, &ItemSpec::default()), seed.pharmacist_id, now())
            .expect_err("same medicine and batch should fail");
        assert!(matches!(err, HmsError::Duplicate(_)));
    }

    #[test]
    fn test_update_never_touches_quantity() {
        let (db, service, seed) = setup();
        let id = insert_item(&db, &seed, ItemSpec::default().quantity(12));
        let updated = service
            .update_item(
                id,
                ItemUpdate {
                    selling_price: Some(dec!(18.50)),
                    location: Some("Cold room".into()),
                    ..Default::default()
                },
            )
            .expect("update should succeed");
        assert_eq!(updated.quantity, 12);
        assert_eq!(updated.selling_price, dec!(18.50));
        assert_eq!(service.get_item(id).unwrap().location, "Cold room");
    }

    #[test]
    fn test_stock_queries() {
        let (db, service, seed) = setup();
        let low = insert_item(&db, &seed, ItemSpec::default().batch("LOW").quantity(5));
        let expired = insert_item(
            &db,
            &seed,
            ItemSpec::default()
                .batch("OLD")
                .quantity(50)
                .expiry(NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()),
        );
        let soon = insert_item(
            &db,
            &seed,
            ItemSpec::default()
                .batch("SOON")
                .quantity(50)
                .expiry(today() + Duration::days(30)),
        );
        insert_item(
            &db,
            &seed,
            ItemSpec::default()
                .batch("LATER")
                .quantity(50)
                .expiry(today() + Duration::days(31)),
        );

        let ids = |items: Vec<InventoryItem>| items.into_iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(ids(service.list_low_stock().unwrap()), vec![low]);
        assert_eq!(ids(service.list_expired(today()).unwrap()), vec![expired]);
        assert_eq!(ids(service.list_near_expiry(today(), 30).unwrap()), vec![soon]);
        assert_eq!(service.total_value().unwrap(), dec!(1550.00));
    }

    #[test]
    fn test_margin_usage_and_availability() {
        let (db, service, seed) = setup();
        let id = insert_item(&db, &seed, ItemSpec::default().quantity(30));
        let item = service.get_item(id).unwrap();
        assert_eq!(item.profit_margin(), dec!(50.00));
        assert_eq!(item.days_until_expiry(today()), 255);

        crate::ledger::StockLedger::new(db)
            .record_transaction(
                id,
                TransactionKind::Sale,
                -12,
                None,
                TransactionMeta::by(seed.pharmacist_id),
                now(),
            )
            .unwrap();
        assert_eq!(service.monthly_usage(id, now()).unwrap(), dec!(2.00));

        assert!(service.check_availability(id, 18).unwrap());
        assert!(!service.check_availability(id, 19).unwrap());
    }
}
