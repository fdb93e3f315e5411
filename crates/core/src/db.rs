//! SQLite storage.
//!
//! A [`Database`] owns one connection behind a mutex. Every write runs inside
//! [`Database::write`], which holds the mutex and an `IMMEDIATE` transaction for the whole
//! read-check-then-write sequence, so two bookings for the same slot or two sales from the same
//! batch can never both pass validation. Reads go through [`Database::read`].
//!
//! Column conventions:
//! - money is `TEXT` holding a [`Decimal`] rendered with two decimal places,
//! - instants are `TEXT` in RFC 3339 UTC with second precision (`2026-10-18T10:00:00Z`),
//! - calendar dates are `TEXT` in `YYYY-MM-DD`.
//!
//! Both time formats are fixed-width, so SQL string comparison orders them correctly.

use crate::{HmsError, HmsResult};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use hms_ids::{DocumentKind, DocumentNumber};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clinics (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    address TEXT NOT NULL,
    phone TEXT NOT NULL,
    email TEXT NOT NULL,
    registration_number TEXT NOT NULL,
    established_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    full_name TEXT NOT NULL,
    role TEXT NOT NULL,
    phone TEXT NOT NULL DEFAULT '',
    specialization TEXT,
    license_number TEXT
);

CREATE TABLE IF NOT EXISTS patients (
    id INTEGER PRIMARY KEY,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    date_of_birth TEXT NOT NULL,
    gender TEXT NOT NULL,
    blood_group TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL,
    email TEXT NOT NULL DEFAULT '',
    address TEXT NOT NULL,
    emergency_contact TEXT NOT NULL DEFAULT '',
    emergency_phone TEXT NOT NULL DEFAULT '',
    allergies TEXT NOT NULL DEFAULT '',
    registration_date TEXT NOT NULL,
    clinic_id INTEGER NOT NULL REFERENCES clinics(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS appointments (
    id INTEGER PRIMARY KEY,
    patient_id INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
    doctor_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    clinic_id INTEGER NOT NULL REFERENCES clinics(id) ON DELETE CASCADE,
    start_time TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL CHECK (duration_minutes > 0),
    status TEXT NOT NULL,
    reason TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS appointments_doctor_start ON appointments(doctor_id, start_time);
CREATE INDEX IF NOT EXISTS appointments_patient_start ON appointments(patient_id, start_time);

CREATE TABLE IF NOT EXISTS medicines (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    generic_name TEXT NOT NULL DEFAULT '',
    manufacturer TEXT NOT NULL DEFAULT '',
    dosage_form TEXT NOT NULL DEFAULT '',
    strength TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS suppliers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    contact_person TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL,
    email TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS inventory_items (
    id INTEGER PRIMARY KEY,
    medicine_id INTEGER NOT NULL REFERENCES medicines(id) ON DELETE CASCADE,
    category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
    supplier_id INTEGER REFERENCES suppliers(id) ON DELETE SET NULL,
    batch_number TEXT NOT NULL,
    expiry_date TEXT NOT NULL,
    quantity INTEGER NOT NULL DEFAULT 0 CHECK (quantity >= 0),
    cost_price TEXT NOT NULL,
    selling_price TEXT NOT NULL,
    received_date TEXT NOT NULL,
    min_stock_level INTEGER NOT NULL,
    max_stock_level INTEGER NOT NULL,
    location TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    barcode TEXT NOT NULL UNIQUE,
    UNIQUE (medicine_id, batch_number)
);

CREATE TABLE IF NOT EXISTS prescriptions (
    id INTEGER PRIMARY KEY,
    patient_id INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
    doctor_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    prescription_date TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    is_dispensed INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS prescribed_medicines (
    id INTEGER PRIMARY KEY,
    prescription_id INTEGER NOT NULL REFERENCES prescriptions(id) ON DELETE CASCADE,
    medicine_id INTEGER NOT NULL REFERENCES medicines(id) ON DELETE CASCADE,
    dosage TEXT NOT NULL,
    frequency TEXT NOT NULL,
    duration TEXT NOT NULL,
    instructions TEXT NOT NULL DEFAULT '',
    quantity INTEGER NOT NULL CHECK (quantity > 0)
);

CREATE TABLE IF NOT EXISTS stock_transactions (
    id INTEGER PRIMARY KEY,
    transaction_id TEXT NOT NULL UNIQUE,
    inventory_item_id INTEGER NOT NULL REFERENCES inventory_items(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    unit_price TEXT NOT NULL,
    total_amount TEXT NOT NULL,
    reference TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT '',
    created_by INTEGER NOT NULL REFERENCES users(id),
    transaction_date TEXT NOT NULL,
    patient_id INTEGER REFERENCES patients(id) ON DELETE SET NULL,
    prescription_id INTEGER REFERENCES prescriptions(id) ON DELETE SET NULL
);
CREATE INDEX IF NOT EXISTS stock_transactions_item ON stock_transactions(inventory_item_id);

CREATE TABLE IF NOT EXISTS stock_alerts (
    id INTEGER PRIMARY KEY,
    inventory_item_id INTEGER NOT NULL REFERENCES inventory_items(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    severity TEXT NOT NULL,
    message TEXT NOT NULL,
    is_resolved INTEGER NOT NULL DEFAULT 0,
    resolved_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    resolved_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS purchase_orders (
    id INTEGER PRIMARY KEY,
    po_number TEXT NOT NULL UNIQUE,
    supplier_id INTEGER NOT NULL REFERENCES suppliers(id) ON DELETE CASCADE,
    order_date TEXT NOT NULL,
    expected_delivery TEXT,
    status TEXT NOT NULL,
    total_amount TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    created_by INTEGER NOT NULL REFERENCES users(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS purchase_order_items (
    id INTEGER PRIMARY KEY,
    purchase_order_id INTEGER NOT NULL REFERENCES purchase_orders(id) ON DELETE CASCADE,
    medicine_id INTEGER NOT NULL REFERENCES medicines(id) ON DELETE CASCADE,
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    unit_price TEXT NOT NULL,
    total_price TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bills (
    id INTEGER PRIMARY KEY,
    bill_number TEXT NOT NULL UNIQUE,
    patient_id INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
    bill_date TEXT NOT NULL,
    due_date TEXT NOT NULL,
    status TEXT NOT NULL,
    payment_status TEXT NOT NULL,
    total_amount TEXT NOT NULL,
    paid_amount TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    created_by INTEGER NOT NULL REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS bill_items (
    id INTEGER PRIMARY KEY,
    bill_id INTEGER NOT NULL REFERENCES bills(id) ON DELETE CASCADE,
    description TEXT NOT NULL,
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    unit_price TEXT NOT NULL,
    amount TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY,
    bill_id INTEGER NOT NULL REFERENCES bills(id) ON DELETE CASCADE,
    amount TEXT NOT NULL,
    payment_date TEXT NOT NULL,
    method TEXT NOT NULL,
    reference_number TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS mpesa_payments (
    id INTEGER PRIMARY KEY,
    bill_id INTEGER NOT NULL REFERENCES bills(id) ON DELETE CASCADE,
    phone_number TEXT NOT NULL,
    amount TEXT NOT NULL,
    balance_due TEXT NOT NULL,
    checkout_request_id TEXT NOT NULL UNIQUE,
    merchant_request_id TEXT NOT NULL,
    response_code TEXT NOT NULL,
    response_description TEXT NOT NULL,
    customer_message TEXT NOT NULL,
    state TEXT NOT NULL,
    result_code INTEGER,
    created_at TEXT NOT NULL,
    settled_at TEXT
);
"#;

/// Shared handle to the relational store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Opens (creating if needed) the database file at `path` and applies the schema.
    pub fn open(path: &Path) -> HmsResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database with the schema applied.
    pub fn open_in_memory() -> HmsResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> HmsResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` inside an `IMMEDIATE` transaction, committing only if it returns `Ok`.
    ///
    /// Any error rolls the whole unit back, so a rejected write never leaves partial state.
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> HmsResult<T>) -> HmsResult<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| HmsError::StorageUnavailable(e.to_string()))?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Runs a read-only closure against the connection.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> HmsResult<T>) -> HmsResult<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| HmsError::StorageUnavailable(e.to_string()))?;
        f(&guard)
    }
}

/// Creates every table and index that does not exist yet.
pub fn migrate(conn: &Connection) -> HmsResult<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Issues the next `{prefix}{yymmdd}{seq:04}` number for `kind` on `date`.
///
/// Must run inside [`Database::write`] so the lookup and the caller's insert are serialised.
pub(crate) fn next_document_number(
    conn: &Connection,
    kind: DocumentKind,
    table: &'static str,
    column: &'static str,
    date: NaiveDate,
) -> HmsResult<DocumentNumber> {
    let pattern = format!("{}%", DocumentNumber::day_prefix(kind, date));
    let last: Option<String> = conn
        .query_row(
            &format!("SELECT {column} FROM {table} WHERE {column} LIKE ?1 ORDER BY {column} DESC LIMIT 1"),
            params![pattern],
            |row| row.get(0),
        )
        .optional()?;
    let last = last
        .map(|raw| DocumentNumber::parse(kind, &raw))
        .transpose()?;
    Ok(DocumentNumber::next(kind, date, last.as_ref())?)
}

// ============================================================================
// COLUMN CONVERSIONS
// ============================================================================

/// Money is stored with exactly two decimal places.
pub(crate) fn money_to_sql(value: Decimal) -> String {
    let mut cents = value.round_dp(2);
    cents.rescale(2);
    cents.to_string()
}

pub(crate) fn ts_to_sql(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn date_to_sql(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn money_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn ts_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_ts_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

pub(crate) fn date_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_date_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_error(idx, e)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_schema_on_disk() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("hms.db");

        let db = Database::open(&path).expect("open should succeed");
        assert!(path.is_file(), "database file should exist");

        let tables: i64 = db
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .expect("count should succeed");
        assert_eq!(tables, 18);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("hms.db");

        drop(Database::open(&path).expect("first open should succeed"));
        Database::open(&path).expect("second open should succeed");
    }

    #[test]
    fn test_write_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: HmsResult<()> = db.write(|tx| {
            tx.execute(
                "INSERT INTO medicines (name) VALUES (?1)",
                rusqlite::params!["Amoxicillin"],
            )?;
            Err(HmsError::Validation("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM medicines", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0, "insert should have been rolled back");
    }

    #[test]
    fn test_unique_violation_maps_to_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let insert = |db: &Database| {
            db.write(|tx| {
                tx.execute(
                    "INSERT INTO users (username, full_name, role) VALUES ('amina', 'Dr Amina', 'doctor')",
                    [],
                )?;
                Ok(())
            })
        };
        insert(&db).expect("first insert should succeed");
        let err = insert(&db).expect_err("second insert should fail");
        assert!(matches!(err, HmsError::Duplicate(_)), "got {err:?}");
    }

    #[test]
    fn test_timestamp_text_is_fixed_width() {
        let a = chrono::DateTime::parse_from_rfc3339("2026-10-18T09:05:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = chrono::DateTime::parse_from_rfc3339("2026-10-18T10:00:00.750Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(ts_to_sql(a), "2026-10-18T09:05:00Z");
        assert_eq!(ts_to_sql(b), "2026-10-18T10:00:00Z");
        assert!(ts_to_sql(a) < ts_to_sql(b));
    }
}
