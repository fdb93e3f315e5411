//! Prescriptions and stock deduction on dispensing.
//!
//! Marking a prescription dispensed yields a [`PrescriptionDispensed`] event. The
//! [`DispenseService`] consumes it and records one `sale` per prescribed line against the
//! earliest-expiring active batch that can cover it. [`DispenseService::dispense`] raises and
//! consumes the event in one transaction.

use crate::db::{date_col, date_to_sql, Database};
use crate::ledger::{self, StockTransaction, TransactionMeta};
use crate::status::{ItemStatus, TransactionKind};
use crate::{HmsError, HmsResult};
use chrono::{DateTime, NaiveDate, Utc};
use hms_types::NonEmptyText;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub prescription_date: NaiveDate,
    pub notes: String,
    pub is_dispensed: bool,
    pub medicines: Vec<PrescribedMedicine>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescribedMedicine {
    pub id: i64,
    pub medicine_id: i64,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub instructions: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewPrescribedMedicine {
    pub medicine_id: i64,
    pub dosage: NonEmptyText,
    pub frequency: NonEmptyText,
    pub duration: NonEmptyText,
    #[serde(default)]
    pub instructions: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewPrescription {
    pub patient_id: i64,
    pub doctor_id: i64,
    #[serde(default)]
    pub notes: String,
    pub medicines: Vec<NewPrescribedMedicine>,
}

/// Raised once, when a prescription first moves to dispensed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PrescriptionDispensed {
    pub prescription_id: i64,
    pub patient_id: i64,
    pub dispensed_by: i64,
    pub lines: Vec<DispenseLine>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DispenseLine {
    pub medicine_id: i64,
    pub quantity: u32,
}

/// A line no batch could cover.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedLine {
    pub medicine_id: i64,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DispenseReport {
    pub prescription_id: i64,
    pub dispensed: Vec<StockTransaction>,
    pub skipped: Vec<SkippedLine>,
}

#[derive(Clone, Debug)]
pub struct PrescriptionService {
    db: Arc<Database>,
}

impl PrescriptionService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Write a prescription with its medicine lines.
    ///
    /// # Errors
    ///
    /// Returns [`HmsError::Validation`] if there are no lines or a line has a zero quantity.
    pub fn create(&self, new: NewPrescription, today: NaiveDate) -> HmsResult<Prescription> {
        if new.medicines.is_empty() {
            return Err(HmsError::Validation(
                "a prescription needs at least one medicine".into(),
            ));
        }
        if new.medicines.iter().any(|m| m.quantity == 0) {
            return Err(HmsError::Validation(
                "prescribed quantity must be positive".into(),
            ));
        }

        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO prescriptions (patient_id, doctor_id, prescription_date, notes, is_dispensed)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![new.patient_id, new.doctor_id, date_to_sql(today), new.notes],
            )?;
            let id = tx.last_insert_rowid();
            for line in &new.medicines {
                tx.execute(
                    "INSERT INTO prescribed_medicines (prescription_id, medicine_id, dosage,
                         frequency, duration, instructions, quantity)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        id,
                        line.medicine_id,
                        line.dosage.as_str(),
                        line.frequency.as_str(),
                        line.duration.as_str(),
                        line.instructions,
                        line.quantity,
                    ],
                )?;
            }
            load(tx, id)
        })
    }

    pub fn get(&self, id: i64) -> HmsResult<Prescription> {
        self.db.read(|conn| load(conn, id))
    }
}

/// Flag a prescription as dispensed inside `tx` and return the event to act on.
///
/// # Errors
///
/// - [`HmsError::InvalidTransition`] if it was already dispensed.
/// - [`HmsError::NotFound`] if the prescription or the dispensing user does not exist.
fn mark_dispensed_in(
    tx: &Connection,
    id: i64,
    dispensed_by: i64,
) -> HmsResult<PrescriptionDispensed> {
    let prescription = load(tx, id)?;
    if prescription.is_dispensed {
        return Err(HmsError::InvalidTransition {
            entity: "prescription",
            from: "dispensed".into(),
            to: "dispensed".into(),
        });
    }
    let known_user = tx
        .query_row(
            "SELECT 1 FROM users WHERE id = ?1",
            params![dispensed_by],
            |_| Ok(()),
        )
        .optional()?;
    if known_user.is_none() {
        return Err(HmsError::not_found("user", dispensed_by));
    }
    tx.execute(
        "UPDATE prescriptions SET is_dispensed = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(PrescriptionDispensed {
        prescription_id: id,
        patient_id: prescription.patient_id,
        dispensed_by,
        lines: prescription
            .medicines
            .iter()
            .map(|m| DispenseLine {
                medicine_id: m.medicine_id,
                quantity: m.quantity,
            })
            .collect(),
    })
}

/// Turns dispensing events into stock sales.
#[derive(Clone, Debug)]
pub struct DispenseService {
    db: Arc<Database>,
}

impl DispenseService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Mark a prescription dispensed and deduct its stock.
    ///
    /// The flag and every sale commit together: if any deduction fails the prescription stays
    /// undispensed and the call can be retried.
    ///
    /// # Errors
    ///
    /// - [`HmsError::InvalidTransition`] if the prescription was already dispensed.
    /// - [`HmsError::NotFound`] if the prescription or `dispensed_by` does not exist.
    pub fn dispense(
        &self,
        prescription_id: i64,
        dispensed_by: i64,
        now: DateTime<Utc>,
    ) -> HmsResult<DispenseReport> {
        self.db.write(|tx| {
            let event = mark_dispensed_in(tx, prescription_id, dispensed_by)?;
            apply_event(tx, &event, now)
        })
    }

    /// Record a `sale` for each line of a dispensed prescription.
    ///
    /// Each line takes the active batch with enough stock and the earliest expiry date. Lines
    /// with no such batch are skipped and listed in [`DispenseReport::skipped`]; they never fail
    /// the whole event.
    pub fn on_prescription_dispensed(
        &self,
        event: &PrescriptionDispensed,
        now: DateTime<Utc>,
    ) -> HmsResult<DispenseReport> {
        self.db.write(|tx| apply_event(tx, event, now))
    }
}

fn apply_event(
    tx: &Connection,
    event: &PrescriptionDispensed,
    now: DateTime<Utc>,
) -> HmsResult<DispenseReport> {
    let mut report = DispenseReport {
        prescription_id: event.prescription_id,
        dispensed: Vec::new(),
        skipped: Vec::new(),
    };

    for line in &event.lines {
        let Some(batch_id) = fifo_batch(tx, line)? else {
            tracing::warn!(
                prescription_id = event.prescription_id,
                medicine_id = line.medicine_id,
                quantity = line.quantity,
                "no batch can cover prescribed line; skipped"
            );
            report.skipped.push(SkippedLine {
                medicine_id: line.medicine_id,
                quantity: line.quantity,
            });
            continue;
        };

        let meta = TransactionMeta {
            created_by: event.dispensed_by,
            reference: format!("Prescription #{}", event.prescription_id),
            notes: String::new(),
            patient_id: Some(event.patient_id),
            prescription_id: Some(event.prescription_id),
        };
        let sale = ledger::record_in(
            tx,
            batch_id,
            TransactionKind::Sale,
            -i64::from(line.quantity),
            None,
            &meta,
            now,
        )?;
        report.dispensed.push(sale);
    }

    Ok(report)
}

/// Expiry orders the candidates but does not exclude them; expired stock leaves the pool
/// by being written off or marked inactive.
fn fifo_batch(conn: &Connection, line: &DispenseLine) -> HmsResult<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM inventory_items
             WHERE medicine_id = ?1 AND status = ?2 AND quantity >= ?3
             ORDER BY expiry_date, id LIMIT 1",
            params![line.medicine_id, ItemStatus::Active, line.quantity],
            |row| row.get(0),
        )
        .optional()?)
}

fn load(conn: &Connection, id: i64) -> HmsResult<Prescription> {
    let mut prescription = conn
        .query_row(
            "SELECT id, patient_id, doctor_id, prescription_date, notes, is_dispensed
             FROM prescriptions WHERE id = ?1",
            params![id],
            |row| {
                Ok(Prescription {
                    id: row.get(0)?,
                    patient_id: row.get(1)?,
                    doctor_id: row.get(2)?,
                    prescription_date: date_col(row, 3)?,
                    notes: row.get(4)?,
                    is_dispensed: row.get(5)?,
                    medicines: Vec::new(),
                })
            },
        )
        .optional()?
        .ok_or_else(|| HmsError::not_found("prescription", id))?;

    let mut stmt = conn.prepare(
        "SELECT id, medicine_id, dosage, frequency, duration, instructions, quantity
         FROM prescribed_medicines WHERE prescription_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok(PrescribedMedicine {
            id: row.get(0)?,
            medicine_id: row.get(1)?,
            dosage: row.get(2)?,
            frequency: row.get(3)?,
            duration: row.get(4)?,
            instructions: row.get(5)?,
            quantity: row.get(6)?,
        })
    })?;
    prescription.medicines = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(prescription)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::tests::{insert_item, now, ItemSpec};
    use crate::records::fixtures::{seed, Seed};
    use crate::records::{NewMedicine, RecordService};
    use chrono::Duration;

    fn line(medicine_id: i64, quantity: u32) -> NewPrescribedMedicine {
        NewPrescribedMedicine {
            medicine_id,
            dosage: NonEmptyText::new("1 tab").unwrap(),
            frequency: NonEmptyText::new("3x daily").unwrap(),
            duration: NonEmptyText::new("5 days").unwrap(),
            instructions: String::new(),
            quantity,
        }
    }

    fn setup() -> (Arc<Database>, PrescriptionService, DispenseService, Seed) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let seed = seed(&db);
        (
            db.clone(),
            PrescriptionService::new(db.clone()),
            DispenseService::new(db),
            seed,
        )
    }

    fn prescribe(
        prescriptions: &PrescriptionService,
        seed: &Seed,
        lines: Vec<NewPrescribedMedicine>,
    ) -> Prescription {
        prescriptions
            .create(
                NewPrescription {
                    patient_id: seed.patient_id,
                    doctor_id: seed.doctor_id,
                    notes: String::new(),
                    medicines: lines,
                },
                now().date_naive(),
            )
            .expect("create should succeed")
    }

    fn quantity(db: &Database, item_id: i64) -> i64 {
        db.read(|conn| {
            Ok(conn.query_row(
                "SELECT quantity FROM inventory_items WHERE id = ?1",
                params![item_id],
                |row| row.get(0),
            )?)
        })
        .unwrap()
    }

    #[test]
    fn test_dispense_uses_earliest_expiring_batch() {
        let (db, prescriptions, dispenser, seed) = setup();
        let today = now().date_naive();
        let later = insert_item(
            &db,
            &seed,
            ItemSpec::default()
                .batch("LATE")
                .quantity(100)
                .expiry(today + Duration::days(300)),
        );
        let earlier = insert_item(
            &db,
            &seed,
            ItemSpec::default()
                .batch("EARLY")
                .quantity(100)
                .expiry(today + Duration::days(60)),
        );
        let too_small = insert_item(
            &db,
            &seed,
            ItemSpec::default()
                .batch("TINY")
                .quantity(5)
                .expiry(today + Duration::days(10)),
        );

        let prescription = prescribe(&prescriptions, &seed, vec![line(seed.medicine_id, 15)]);
        let report = dispenser
            .dispense(prescription.id, seed.pharmacist_id, now())
            .expect("dispense should succeed");

        assert!(report.skipped.is_empty());
        assert_eq!(report.dispensed.len(), 1);
        let sale = &report.dispensed[0];
        assert_eq!(sale.inventory_item_id, earlier);
        assert_eq!(sale.quantity, -15);
        assert_eq!(sale.patient_id, Some(seed.patient_id));
        assert_eq!(sale.prescription_id, Some(prescription.id));

        assert_eq!(quantity(&db, earlier), 85);
        assert_eq!(quantity(&db, later), 100);
        assert_eq!(quantity(&db, too_small), 5);
        assert!(prescriptions.get(prescription.id).unwrap().is_dispensed);
    }

    #[test]
    fn test_unfulfillable_line_is_skipped_and_reported() {
        let (db, prescriptions, dispenser, seed) = setup();
        let other_medicine = RecordService::new(db.clone())
            .create_medicine(NewMedicine {
                name: NonEmptyText::new("Paracetamol").unwrap(),
                generic_name: String::new(),
                manufacturer: String::new(),
                dosage_form: String::new(),
                strength: String::new(),
            })
            .unwrap()
            .id;
        let stocked = insert_item(&db, &seed, ItemSpec::default().quantity(20));
        let short = insert_item(
            &db,
            &seed,
            ItemSpec::default()
                .medicine(other_medicine)
                .batch("SHORT")
                .quantity(1),
        );

        let prescription = prescribe(
            &prescriptions,
            &seed,
            vec![line(seed.medicine_id, 10), line(other_medicine, 2)],
        );
        let report = dispenser
            .dispense(prescription.id, seed.pharmacist_id, now())
            .unwrap();

        assert_eq!(report.dispensed.len(), 1);
        assert_eq!(
            report.skipped,
            vec![SkippedLine {
                medicine_id: other_medicine,
                quantity: 2
            }]
        );
        assert_eq!(quantity(&db, stocked), 10);
        assert_eq!(quantity(&db, short), 1);
    }

    #[test]
    fn test_expired_batch_is_eligible_while_active() {
        let (db, prescriptions, dispenser, seed) = setup();
        let today = now().date_naive();
        let expired = insert_item(
            &db,
            &seed,
            ItemSpec::default()
                .batch("OLD")
                .quantity(30)
                .expiry(today - Duration::days(3)),
        );
        let fresh = insert_item(
            &db,
            &seed,
            ItemSpec::default()
                .batch("NEW")
                .quantity(30)
                .expiry(today + Duration::days(90)),
        );

        let first = prescribe(&prescriptions, &seed, vec![line(seed.medicine_id, 4)]);
        let report = dispenser
            .dispense(first.id, seed.pharmacist_id, now())
            .unwrap();
        assert_eq!(report.dispensed[0].inventory_item_id, expired);

        db.write(|tx| {
            tx.execute(
                "UPDATE inventory_items SET status = ?1 WHERE id = ?2",
                params![ItemStatus::Inactive, expired],
            )?;
            Ok(())
        })
        .unwrap();

        let second = prescribe(&prescriptions, &seed, vec![line(seed.medicine_id, 4)]);
        let report = dispenser
            .dispense(second.id, seed.pharmacist_id, now())
            .unwrap();
        assert_eq!(report.dispensed[0].inventory_item_id, fresh);
        assert_eq!(quantity(&db, expired), 26);
        assert_eq!(quantity(&db, fresh), 26);
    }

    #[test]
    fn test_second_dispense_is_rejected() {
        let (db, prescriptions, dispenser, seed) = setup();
        let item = insert_item(&db, &seed, ItemSpec::default().quantity(10));
        let prescription = prescribe(&prescriptions, &seed, vec![line(seed.medicine_id, 1)]);
        dispenser
            .dispense(prescription.id, seed.pharmacist_id, now())
            .unwrap();

        let err = dispenser
            .dispense(prescription.id, seed.pharmacist_id, now())
            .expect_err("already dispensed");
        assert!(matches!(err, HmsError::InvalidTransition { .. }));
        assert!(prescriptions.get(prescription.id).unwrap().is_dispensed);
        assert_eq!(quantity(&db, item), 9);
    }

    #[test]
    fn test_failed_deduction_leaves_prescription_undispensed() {
        let (db, prescriptions, dispenser, seed) = setup();
        let item = insert_item(&db, &seed, ItemSpec::default().quantity(20));
        let prescription = prescribe(&prescriptions, &seed, vec![line(seed.medicine_id, 5)]);

        db.write(|tx| {
            tx.execute_batch(
                "CREATE TRIGGER ledger_offline BEFORE INSERT ON stock_transactions
                 BEGIN SELECT RAISE(ABORT, 'ledger offline'); END;",
            )?;
            Ok(())
        })
        .unwrap();
        dispenser
            .dispense(prescription.id, seed.pharmacist_id, now())
            .expect_err("sale insert should fail");
        assert!(!prescriptions.get(prescription.id).unwrap().is_dispensed);
        assert_eq!(quantity(&db, item), 20);

        db.write(|tx| {
            tx.execute_batch("DROP TRIGGER ledger_offline;")?;
            Ok(())
        })
        .unwrap();
        let report = dispenser
            .dispense(prescription.id, seed.pharmacist_id, now())
            .expect("retry should succeed");
        assert_eq!(report.dispensed.len(), 1);
        assert_eq!(quantity(&db, item), 15);
    }

    #[test]
    fn test_unknown_dispenser_changes_nothing() {
        let (db, prescriptions, dispenser, seed) = setup();
        let item = insert_item(&db, &seed, ItemSpec::default().quantity(20));
        let prescription = prescribe(&prescriptions, &seed, vec![line(seed.medicine_id, 5)]);

        let err = dispenser
            .dispense(prescription.id, 999, now())
            .expect_err("unknown user should fail");
        assert!(matches!(err, HmsError::NotFound { entity: "user", .. }));
        assert!(!prescriptions.get(prescription.id).unwrap().is_dispensed);
        assert_eq!(quantity(&db, item), 20);

        dispenser
            .dispense(prescription.id, seed.pharmacist_id, now())
            .expect("dispense by a known user should succeed");
        assert_eq!(quantity(&db, item), 15);
    }

    #[test]
    fn test_event_can_be_consumed_on_its_own() {
        let (db, prescriptions, dispenser, seed) = setup();
        let item = insert_item(&db, &seed, ItemSpec::default().quantity(12));
        let prescription = prescribe(&prescriptions, &seed, vec![line(seed.medicine_id, 12)]);
        let event = PrescriptionDispensed {
            prescription_id: prescription.id,
            patient_id: seed.patient_id,
            dispensed_by: seed.pharmacist_id,
            lines: vec![DispenseLine {
                medicine_id: seed.medicine_id,
                quantity: 12,
            }],
        };
        let report = dispenser
            .on_prescription_dispensed(&event, now())
            .expect("consume should succeed");
        assert_eq!(report.dispensed[0].quantity, -12);
        assert_eq!(quantity(&db, item), 0);
    }

    #[test]
    fn test_empty_prescription_is_rejected() {
        let (_, prescriptions, _, seed) = setup();
        let err = prescriptions
            .create(
                NewPrescription {
                    patient_id: seed.patient_id,
                    doctor_id: seed.doctor_id,
                    notes: String::new(),
                    medicines: vec![],
                },
                now().date_naive(),
            )
            .unwrap_err();
        assert!(matches!(err, HmsError::Validation(_)));
    }
}
