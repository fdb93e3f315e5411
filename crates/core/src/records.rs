//! Reference records the rule engines point at: clinics, staff, patients, medicines,
//! suppliers and categories.
//!
//! These are plain create/get operations with field validation. Their only job in the core is to
//! give appointments, stock movements and bills something real to reference.

use crate::db::{date_col, date_to_sql, Database};
use crate::status::{Gender, UserRole};
use crate::{HmsError, HmsResult};
use chrono::{Datelike, NaiveDate};
use hms_types::{NonEmptyText, PhoneNumber};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clinic {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub registration_number: String,
    pub established_date: NaiveDate,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewClinic {
    pub name: NonEmptyText,
    pub address: NonEmptyText,
    pub phone: PhoneNumber,
    pub email: String,
    pub registration_number: NonEmptyText,
    pub established_date: NaiveDate,
}

/// A member of staff. Doctors are users with [`UserRole::Doctor`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub role: UserRole,
    pub phone: String,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub username: NonEmptyText,
    pub full_name: NonEmptyText,
    pub role: UserRole,
    pub phone: Option<PhoneNumber>,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub blood_group: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub emergency_contact: String,
    pub emergency_phone: String,
    pub allergies: String,
    pub registration_date: NaiveDate,
    pub clinic_id: i64,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Age in whole years on `date`.
    pub fn age_on(&self, date: NaiveDate) -> u32 {
        let dob = self.date_of_birth;
        let mut years = date.year() - dob.year();
        if (date.month(), date.day()) < (dob.month(), dob.day()) {
            years -= 1;
        }
        years.max(0) as u32
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewPatient {
    pub first_name: NonEmptyText,
    pub last_name: NonEmptyText,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    #[serde(default)]
    pub blood_group: String,
    pub phone: PhoneNumber,
    #[serde(default)]
    pub email: String,
    pub address: NonEmptyText,
    #[serde(default)]
    pub emergency_contact: String,
    pub emergency_phone: Option<PhoneNumber>,
    #[serde(default)]
    pub allergies: String,
    pub clinic_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medicine {
    pub id: i64,
    pub name: String,
    pub generic_name: String,
    pub manufacturer: String,
    pub dosage_form: String,
    pub strength: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewMedicine {
    pub name: NonEmptyText,
    #[serde(default)]
    pub generic_name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub dosage_form: String,
    #[serde(default)]
    pub strength: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: i64,
    pub name: String,
    pub contact_person: String,
    pub phone: String,
    pub email: String,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// Create/get access to reference records.
#[derive(Clone, Debug)]
pub struct RecordService {
    db: Arc<Database>,
}

impl RecordService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create_clinic(&self, new: NewClinic) -> HmsResult<Clinic> {
        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO clinics (name, address, phone, email, registration_number, established_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.name.as_str(),
                    new.address.as_str(),
                    new.phone.as_str(),
                    new.email.trim(),
                    new.registration_number.as_str(),
                    date_to_sql(new.established_date),
                ],
            )?;
            Ok(Clinic {
                id: tx.last_insert_rowid(),
                name: new.name.into_inner(),
                address: new.address.into_inner(),
                phone: new.phone.as_str().to_owned(),
                email: new.email.trim().to_owned(),
                registration_number: new.registration_number.into_inner(),
                established_date: new.established_date,
            })
        })
    }

    pub fn create_user(&self, new: NewUser) -> HmsResult<User> {
        let phone = new
            .phone
            .as_ref()
            .map(|p| p.as_str().to_owned())
            .unwrap_or_default();
        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO users (username, full_name, role, phone, specialization, license_number)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.username.as_str(),
                    new.full_name.as_str(),
                    new.role,
                    phone,
                    new.specialization,
                    new.license_number,
                ],
            )?;
            Ok(User {
                id: tx.last_insert_rowid(),
                username: new.username.into_inner(),
                full_name: new.full_name.into_inner(),
                role: new.role,
                phone,
                specialization: new.specialization,
                license_number: new.license_number,
            })
        })
    }

    pub fn get_user(&self, id: i64) -> HmsResult<User> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT id, username, full_name, role, phone, specialization, license_number
                 FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        full_name: row.get(2)?,
                        role: row.get(3)?,
                        phone: row.get(4)?,
                        specialization: row.get(5)?,
                        license_number: row.get(6)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| HmsError::not_found("user", id))
        })
    }

    /// Register a patient.
    ///
    /// # Errors
    ///
    /// Returns [`HmsError::Validation`] if the date of birth is after `today`.
    pub fn create_patient(&self, new: NewPatient, today: NaiveDate) -> HmsResult<Patient> {
        if new.date_of_birth > today {
            return Err(HmsError::Validation(
                "date of birth cannot be in the future".into(),
            ));
        }
        let emergency_phone = new
            .emergency_phone
            .as_ref()
            .map(|p| p.as_str().to_owned())
            .unwrap_or_default();

        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO patients (first_name, last_name, date_of_birth, gender, blood_group,
                     phone, email, address, emergency_contact, emergency_phone, allergies,
                     registration_date, clinic_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    new.first_name.as_str(),
                    new.last_name.as_str(),
                    date_to_sql(new.date_of_birth),
                    new.gender,
                    new.blood_group,
                    new.phone.as_str(),
                    new.email,
                    new.address.as_str(),
                    new.emergency_contact,
                    emergency_phone,
                    new.allergies,
                    date_to_sql(today),
                    new.clinic_id,
                ],
            )?;
            Ok(Patient {
                id: tx.last_insert_rowid(),
                first_name: new.first_name.into_inner(),
                last_name: new.last_name.into_inner(),
                date_of_birth: new.date_of_birth,
                gender: new.gender,
                blood_group: new.blood_group,
                phone: new.phone.as_str().to_owned(),
                email: new.email,
                address: new.address.into_inner(),
                emergency_contact: new.emergency_contact,
                emergency_phone,
                allergies: new.allergies,
                registration_date: today,
                clinic_id: new.clinic_id,
            })
        })
    }

    pub fn get_patient(&self, id: i64) -> HmsResult<Patient> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT id, first_name, last_name, date_of_birth, gender, blood_group, phone, email,
                     address, emergency_contact, emergency_phone, allergies, registration_date,
                     clinic_id
                 FROM patients WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Patient {
                        id: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        date_of_birth: date_col(row, 3)?,
                        gender: row.get(4)?,
                        blood_group: row.get(5)?,
                        phone: row.get(6)?,
                        email: row.get(7)?,
                        address: row.get(8)?,
                        emergency_contact: row.get(9)?,
                        emergency_phone: row.get(10)?,
                        allergies: row.get(11)?,
                        registration_date: date_col(row, 12)?,
                        clinic_id: row.get(13)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| HmsError::not_found("patient", id))
        })
    }

    pub fn create_medicine(&self, new: NewMedicine) -> HmsResult<Medicine> {
        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO medicines (name, generic_name, manufacturer, dosage_form, strength)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.name.as_str(),
                    new.generic_name,
                    new.manufacturer,
                    new.dosage_form,
                    new.strength,
                ],
            )?;
            Ok(Medicine {
                id: tx.last_insert_rowid(),
                name: new.name.into_inner(),
                generic_name: new.generic_name,
                manufacturer: new.manufacturer,
                dosage_form: new.dosage_form,
                strength: new.strength,
            })
        })
    }

    pub fn get_medicine(&self, id: i64) -> HmsResult<Medicine> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT id, name, generic_name, manufacturer, dosage_form, strength
                 FROM medicines WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Medicine {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        generic_name: row.get(2)?,
                        manufacturer: row.get(3)?,
                        dosage_form: row.get(4)?,
                        strength: row.get(5)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| HmsError::not_found("medicine", id))
        })
    }

    pub fn create_supplier(
        &self,
        name: NonEmptyText,
        contact_person: &str,
        phone: PhoneNumber,
        email: &str,
    ) -> HmsResult<Supplier> {
        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO suppliers (name, contact_person, phone, email, is_active)
                 VALUES (?1, ?2, ?3, ?4, 1)",
                params![name.as_str(), contact_person, phone.as_str(), email],
            )?;
            Ok(Supplier {
                id: tx.last_insert_rowid(),
                name: name.into_inner(),
                contact_person: contact_person.to_owned(),
                phone: phone.as_str().to_owned(),
                email: email.to_owned(),
                is_active: true,
            })
        })
    }

    pub fn create_category(&self, name: NonEmptyText, description: &str) -> HmsResult<Category> {
        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO categories (name, description) VALUES (?1, ?2)",
                params![name.as_str(), description],
            )?;
            Ok(Category {
                id: tx.last_insert_rowid(),
                name: name.into_inner(),
                description: description.to_owned(),
            })
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Minimal reference data shared by the rule-engine tests.

    use super::*;

    pub(crate) struct Seed {
        pub clinic_id: i64,
        pub doctor_id: i64,
        pub other_doctor_id: i64,
        pub pharmacist_id: i64,
        pub patient_id: i64,
        pub other_patient_id: i64,
        pub medicine_id: i64,
    }

    fn text(s: &str) -> NonEmptyText {
        NonEmptyText::new(s).expect("fixture text should be valid")
    }

    fn phone(s: &str) -> PhoneNumber {
        PhoneNumber::parse(s).expect("fixture phone should be valid")
    }

    fn user(records: &RecordService, username: &str, role: UserRole) -> i64 {
        records
            .create_user(NewUser {
                username: text(username),
                full_name: text(username),
                role,
                phone: None,
                specialization: None,
                license_number: None,
            })
            .expect("create_user should succeed")
            .id
    }

    fn patient(records: &RecordService, clinic_id: i64, first: &str) -> i64 {
        records
            .create_patient(
                NewPatient {
                    first_name: text(first),
                    last_name: text("Otieno"),
                    date_of_birth: NaiveDate::from_ymd_opt(1990, 5, 17).unwrap(),
                    gender: Gender::Female,
                    blood_group: "O+".into(),
                    phone: phone("0712345678"),
                    email: String::new(),
                    address: text("Kisumu"),
                    emergency_contact: String::new(),
                    emergency_phone: None,
                    allergies: String::new(),
                    clinic_id,
                },
                NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            )
            .expect("create_patient should succeed")
            .id
    }

    pub(crate) fn seed(db: &Arc<Database>) -> Seed {
        let records = RecordService::new(db.clone());
        let clinic_id = records
            .create_clinic(NewClinic {
                name: text("Lakeside Clinic"),
                address: text("Oginga Odinga St"),
                phone: phone("0700000001"),
                email: "info@lakeside.example".into(),
                registration_number: text("REG-001"),
                established_date: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
            })
            .expect("create_clinic should succeed")
            .id;

        let medicine_id = records
            .create_medicine(NewMedicine {
                name: text("Amoxicillin"),
                generic_name: "amoxicillin".into(),
                manufacturer: "Cosmos".into(),
                dosage_form: "capsule".into(),
                strength: "500mg".into(),
            })
            .expect("create_medicine should succeed")
            .id;

        Seed {
            clinic_id,
            doctor_id: user(&records, "dr_wanjiru", UserRole::Doctor),
            other_doctor_id: user(&records, "dr_kamau", UserRole::Doctor),
            pharmacist_id: user(&records, "achieng", UserRole::Pharmacist),
            patient_id: patient(&records, clinic_id, "Akinyi"),
            other_patient_id: patient(&records, clinic_id, "Baraka"),
            medicine_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> RecordService {
        RecordService::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_age_on_respects_birthday() {
        let records = service();
        let seed = fixtures::seed(&records.db);
        let patient = records
            .get_patient(seed.patient_id)
            .expect("get_patient should succeed");

        assert_eq!(patient.age_on(NaiveDate::from_ymd_opt(2026, 5, 16).unwrap()), 35);
        assert_eq!(patient.age_on(NaiveDate::from_ymd_opt(2026, 5, 17).unwrap()), 36);
        assert_eq!(patient.full_name(), "Akinyi Otieno");
        assert_eq!(patient.phone, "254712345678");
    }

    #[test]
    fn test_future_date_of_birth_is_rejected() {
        let records = service();
        let seed = fixtures::seed(&records.db);
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();

        let err = records
            .create_patient(
                NewPatient {
                    first_name: NonEmptyText::new("Zawadi").unwrap(),
                    last_name: NonEmptyText::new("Mwangi").unwrap(),
                    date_of_birth: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
                    gender: Gender::Female,
                    blood_group: String::new(),
                    phone: PhoneNumber::parse("0722000000").unwrap(),
                    email: String::new(),
                    address: NonEmptyText::new("Nairobi").unwrap(),
                    emergency_contact: String::new(),
                    emergency_phone: None,
                    allergies: String::new(),
                    clinic_id: seed.clinic_id,
                },
                today,
            )
            .expect_err("future birth date should fail");
        assert!(matches!(err, HmsError::Validation(_)));
    }

    #[test]
    fn test_duplicate_username_is_rejected() {
        let records = service();
        fixtures::seed(&records.db);
        let err = records
            .create_user(NewUser {
                username: NonEmptyText::new("dr_wanjiru").unwrap(),
                full_name: NonEmptyText::new("Another").unwrap(),
                role: UserRole::Staff,
                phone: None,
                specialization: None,
                license_number: None,
            })
            .expect_err("duplicate username should fail");
        assert!(matches!(err, HmsError::Duplicate(_)));
    }

    #[test]
    fn test_missing_user_is_not_found() {
        let records = service();
        assert!(matches!(
            records.get_user(42),
            Err(HmsError::NotFound { entity: "user", .. })
        ));
    }
}
