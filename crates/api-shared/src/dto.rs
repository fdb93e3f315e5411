//! JSON bodies of the HTTP API.
//!
//! Requests carry loosely typed fields (plain strings for names and statuses) and are checked
//! when converted into core inputs, so a malformed value is reported the same way as any other
//! validation failure. Responses are flattened views of core records.

use chrono::{DateTime, NaiveDate, Utc};
use hms_core::alerts::StockAlert;
use hms_core::billing::{Bill, MpesaPayment, NewBill, NewBillItem, NewPayment};
use hms_core::dispense::{
    DispenseReport, NewPrescribedMedicine, NewPrescription, Prescription, SkippedLine,
};
use hms_core::inventory::{InventoryItem, NewInventoryItem};
use hms_core::ledger::{StockTransaction, TransactionMeta};
use hms_core::purchasing::{NewPurchaseOrder, NewPurchaseOrderItem, PurchaseOrder};
use hms_core::records::{
    Category, Clinic, Medicine, NewClinic, NewMedicine, NewPatient, NewUser, Patient, Supplier,
    User,
};
use hms_core::scheduling::{Appointment, AppointmentChanges, NewAppointment};
use hms_core::{Gender, HmsResult, NonEmptyText, PaymentMethod, PhoneNumber, UserRole};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Body of every non-2xx response.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
    /// True when the same request may succeed later.
    pub retryable: bool,
}

/// The gateway only needs to see a 200 with this body.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CallbackAck {
    pub status: String,
}

impl CallbackAck {
    pub fn ok() -> Self {
        Self {
            status: "ok".into(),
        }
    }
}

// Reference records

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateClinicReq {
    pub name: String,
    pub address: String,
    pub phone: String,
    #[serde(default)]
    pub email: String,
    pub registration_number: String,
    pub established_date: NaiveDate,
}

impl CreateClinicReq {
    pub fn into_core(self) -> HmsResult<NewClinic> {
        Ok(NewClinic {
            name: NonEmptyText::new(&self.name)?,
            address: NonEmptyText::new(&self.address)?,
            phone: PhoneNumber::parse(&self.phone)?,
            email: self.email,
            registration_number: NonEmptyText::new(&self.registration_number)?,
            established_date: self.established_date,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ClinicRes {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub registration_number: String,
    pub established_date: NaiveDate,
}

impl From<Clinic> for ClinicRes {
    fn from(c: Clinic) -> Self {
        Self {
            id: c.id,
            name: c.name,
            address: c.address,
            phone: c.phone,
            email: c.email,
            registration_number: c.registration_number,
            established_date: c.established_date,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateUserReq {
    pub username: String,
    pub full_name: String,
    /// admin | doctor | staff | pharmacist
    pub role: String,
    pub phone: Option<String>,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
}

impl CreateUserReq {
    pub fn into_core(self) -> HmsResult<NewUser> {
        Ok(NewUser {
            username: NonEmptyText::new(&self.username)?,
            full_name: NonEmptyText::new(&self.full_name)?,
            role: self.role.parse::<UserRole>()?,
            phone: self.phone.as_deref().map(PhoneNumber::parse).transpose()?,
            specialization: self.specialization,
            license_number: self.license_number,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UserRes {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub role: String,
    pub phone: String,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
}

impl From<User> for UserRes {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            full_name: u.full_name,
            role: u.role.as_str().to_owned(),
            phone: u.phone,
            specialization: u.specialization,
            license_number: u.license_number,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePatientReq {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    /// M | F | O
    pub gender: String,
    #[serde(default)]
    pub blood_group: String,
    pub phone: String,
    #[serde(default)]
    pub email: String,
    pub address: String,
    #[serde(default)]
    pub emergency_contact: String,
    pub emergency_phone: Option<String>,
    #[serde(default)]
    pub allergies: String,
    pub clinic_id: i64,
}

impl CreatePatientReq {
    pub fn into_core(self) -> HmsResult<NewPatient> {
        Ok(NewPatient {
            first_name: NonEmptyText::new(&self.first_name)?,
            last_name: NonEmptyText::new(&self.last_name)?,
            date_of_birth: self.date_of_birth,
            gender: self.gender.parse::<Gender>()?,
            blood_group: self.blood_group,
            phone: PhoneNumber::parse(&self.phone)?,
            email: self.email,
            address: NonEmptyText::new(&self.address)?,
            emergency_contact: self.emergency_contact,
            emergency_phone: self
                .emergency_phone
                .as_deref()
                .map(PhoneNumber::parse)
                .transpose()?,
            allergies: self.allergies,
            clinic_id: self.clinic_id,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PatientRes {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub phone: String,
    pub address: String,
    pub allergies: String,
    pub registration_date: NaiveDate,
    pub clinic_id: i64,
}

impl From<Patient> for PatientRes {
    fn from(p: Patient) -> Self {
        Self {
            id: p.id,
            first_name: p.first_name,
            last_name: p.last_name,
            date_of_birth: p.date_of_birth,
            gender: p.gender.as_str().to_owned(),
            phone: p.phone,
            address: p.address,
            allergies: p.allergies,
            registration_date: p.registration_date,
            clinic_id: p.clinic_id,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateMedicineReq {
    pub name: String,
    #[serde(default)]
    pub generic_name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub dosage_form: String,
    #[serde(default)]
    pub strength: String,
}

impl CreateMedicineReq {
    pub fn into_core(self) -> HmsResult<NewMedicine> {
        Ok(NewMedicine {
            name: NonEmptyText::new(&self.name)?,
            generic_name: self.generic_name,
            manufacturer: self.manufacturer,
            dosage_form: self.dosage_form,
            strength: self.strength,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MedicineRes {
    pub id: i64,
    pub name: String,
    pub generic_name: String,
    pub manufacturer: String,
    pub dosage_form: String,
    pub strength: String,
}

impl From<Medicine> for MedicineRes {
    fn from(m: Medicine) -> Self {
        Self {
            id: m.id,
            name: m.name,
            generic_name: m.generic_name,
            manufacturer: m.manufacturer,
            dosage_form: m.dosage_form,
            strength: m.strength,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSupplierReq {
    pub name: String,
    #[serde(default)]
    pub contact_person: String,
    pub phone: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SupplierRes {
    pub id: i64,
    pub name: String,
    pub contact_person: String,
    pub phone: String,
    pub email: String,
    pub is_active: bool,
}

impl From<Supplier> for SupplierRes {
    fn from(s: Supplier) -> Self {
        Self {
            id: s.id,
            name: s.name,
            contact_person: s.contact_person,
            phone: s.phone,
            email: s.email,
            is_active: s.is_active,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateCategoryReq {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CategoryRes {
    pub id: i64,
    pub name: String,
    pub description: String,
}

impl From<Category> for CategoryRes {
    fn from(c: Category) -> Self {
        Self {
            id: c.id,
            name: c.name,
            description: c.description,
        }
    }
}

// Appointments

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BookAppointmentReq {
    pub patient_id: i64,
    pub doctor_id: i64,
    pub clinic_id: i64,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
    pub reason: String,
    #[serde(default)]
    pub notes: String,
}

impl BookAppointmentReq {
    pub fn into_core(self) -> HmsResult<NewAppointment> {
        Ok(NewAppointment {
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            clinic_id: self.clinic_id,
            start_time: self.start_time,
            duration_minutes: self.duration_minutes,
            reason: NonEmptyText::new(&self.reason)?,
            notes: self.notes,
        })
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct RescheduleAppointmentReq {
    pub doctor_id: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl RescheduleAppointmentReq {
    pub fn into_core(self) -> HmsResult<AppointmentChanges> {
        Ok(AppointmentChanges {
            doctor_id: self.doctor_id,
            start_time: self.start_time,
            duration_minutes: self.duration_minutes,
            reason: self.reason.map(NonEmptyText::new).transpose()?,
            notes: self.notes,
        })
    }
}

/// Target status, in its lowercase text form.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusChangeReq {
    pub status: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AppointmentRes {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub clinic_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: String,
    pub reason: String,
    pub notes: String,
}

impl From<Appointment> for AppointmentRes {
    fn from(a: Appointment) -> Self {
        Self {
            end_time: a.end_time(),
            id: a.id,
            patient_id: a.patient_id,
            doctor_id: a.doctor_id,
            clinic_id: a.clinic_id,
            start_time: a.start_time,
            duration_minutes: a.duration_minutes,
            status: a.status.as_str().to_owned(),
            reason: a.reason,
            notes: a.notes,
        }
    }
}

// Inventory and the stock ledger

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateInventoryItemReq {
    pub medicine_id: i64,
    pub category_id: Option<i64>,
    pub supplier_id: Option<i64>,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    /// Opening stock.
    #[serde(default)]
    pub quantity: u32,
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    pub received_date: Option<NaiveDate>,
    pub min_stock_level: Option<u32>,
    pub max_stock_level: Option<u32>,
    #[serde(default)]
    pub location: String,
    pub barcode: Option<String>,
    pub created_by: i64,
}

impl CreateInventoryItemReq {
    /// Split into the core input and the acting user.
    pub fn into_core(self) -> HmsResult<(NewInventoryItem, i64)> {
        let item = NewInventoryItem {
            medicine_id: self.medicine_id,
            category_id: self.category_id,
            supplier_id: self.supplier_id,
            batch_number: NonEmptyText::new(&self.batch_number)?,
            expiry_date: self.expiry_date,
            quantity: self.quantity,
            cost_price: self.cost_price,
            selling_price: self.selling_price,
            received_date: self.received_date,
            min_stock_level: self.min_stock_level,
            max_stock_level: self.max_stock_level,
            location: self.location,
            barcode: self.barcode,
        };
        Ok((item, self.created_by))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct InventoryItemRes {
    pub id: i64,
    pub medicine_id: i64,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: u32,
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    pub min_stock_level: u32,
    pub max_stock_level: u32,
    pub location: String,
    pub status: String,
    pub barcode: String,
    pub is_low_stock: bool,
}

impl From<InventoryItem> for InventoryItemRes {
    fn from(i: InventoryItem) -> Self {
        Self {
            is_low_stock: i.is_low_stock(),
            id: i.id,
            medicine_id: i.medicine_id,
            batch_number: i.batch_number,
            expiry_date: i.expiry_date,
            quantity: i.quantity,
            cost_price: i.cost_price,
            selling_price: i.selling_price,
            min_stock_level: i.min_stock_level,
            max_stock_level: i.max_stock_level,
            location: i.location,
            status: i.status.as_str().to_owned(),
            barcode: i.barcode,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct InventoryValueRes {
    pub total_value: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RecordTransactionReq {
    pub inventory_item_id: i64,
    /// purchase | sale | return | adjustment | transfer | write_off
    pub transaction_type: String,
    /// Signed: positive for purchase and adjustment, negative for the other kinds.
    pub quantity: i64,
    /// Defaults from the item's prices.
    pub unit_price: Option<Decimal>,
    pub created_by: i64,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub notes: String,
    pub patient_id: Option<i64>,
    pub prescription_id: Option<i64>,
}

impl RecordTransactionReq {
    pub fn meta(&self) -> TransactionMeta {
        TransactionMeta {
            created_by: self.created_by,
            reference: self.reference.clone(),
            notes: self.notes.clone(),
            patient_id: self.patient_id,
            prescription_id: self.prescription_id,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StockTransactionRes {
    pub transaction_id: String,
    pub inventory_item_id: i64,
    pub transaction_type: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub reference: String,
    pub notes: String,
    pub created_by: i64,
    pub transaction_date: DateTime<Utc>,
}

impl From<StockTransaction> for StockTransactionRes {
    fn from(t: StockTransaction) -> Self {
        Self {
            transaction_id: t.transaction_id,
            inventory_item_id: t.inventory_item_id,
            transaction_type: t.kind.as_str().to_owned(),
            quantity: t.quantity,
            unit_price: t.unit_price,
            total_amount: t.total_amount,
            reference: t.reference,
            notes: t.notes,
            created_by: t.created_by,
            transaction_date: t.transaction_date,
        }
    }
}

// Dispensing

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PrescribedMedicineReq {
    pub medicine_id: i64,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    #[serde(default)]
    pub instructions: String,
    pub quantity: u32,
}

impl PrescribedMedicineReq {
    pub fn into_core(self) -> HmsResult<NewPrescribedMedicine> {
        Ok(NewPrescribedMedicine {
            medicine_id: self.medicine_id,
            dosage: NonEmptyText::new(&self.dosage)?,
            frequency: NonEmptyText::new(&self.frequency)?,
            duration: NonEmptyText::new(&self.duration)?,
            instructions: self.instructions,
            quantity: self.quantity,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePrescriptionReq {
    pub patient_id: i64,
    pub doctor_id: i64,
    #[serde(default)]
    pub notes: String,
    pub medicines: Vec<PrescribedMedicineReq>,
}

impl CreatePrescriptionReq {
    pub fn into_core(self) -> HmsResult<NewPrescription> {
        Ok(NewPrescription {
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            notes: self.notes,
            medicines: self
                .medicines
                .into_iter()
                .map(PrescribedMedicineReq::into_core)
                .collect::<HmsResult<Vec<_>>>()?,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PrescribedMedicineRes {
    pub id: i64,
    pub medicine_id: i64,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub instructions: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PrescriptionRes {
    pub id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub prescription_date: NaiveDate,
    pub notes: String,
    pub is_dispensed: bool,
    pub medicines: Vec<PrescribedMedicineRes>,
}

impl From<Prescription> for PrescriptionRes {
    fn from(p: Prescription) -> Self {
        Self {
            id: p.id,
            patient_id: p.patient_id,
            doctor_id: p.doctor_id,
            prescription_date: p.prescription_date,
            notes: p.notes,
            is_dispensed: p.is_dispensed,
            medicines: p
                .medicines
                .into_iter()
                .map(|m| PrescribedMedicineRes {
                    id: m.id,
                    medicine_id: m.medicine_id,
                    dosage: m.dosage,
                    frequency: m.frequency,
                    duration: m.duration,
                    instructions: m.instructions,
                    quantity: m.quantity,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DispenseReq {
    pub dispensed_by: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SkippedLineRes {
    pub medicine_id: i64,
    pub quantity: u32,
}

impl From<SkippedLine> for SkippedLineRes {
    fn from(s: SkippedLine) -> Self {
        Self {
            medicine_id: s.medicine_id,
            quantity: s.quantity,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DispenseReportRes {
    pub prescription_id: i64,
    pub dispensed: Vec<StockTransactionRes>,
    /// Lines no single batch could cover.
    pub skipped: Vec<SkippedLineRes>,
}

impl From<DispenseReport> for DispenseReportRes {
    fn from(r: DispenseReport) -> Self {
        Self {
            prescription_id: r.prescription_id,
            dispensed: r.dispensed.into_iter().map(Into::into).collect(),
            skipped: r.skipped.into_iter().map(Into::into).collect(),
        }
    }
}

// Billing

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BillItemReq {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl BillItemReq {
    pub fn into_core(self) -> HmsResult<NewBillItem> {
        Ok(NewBillItem {
            description: NonEmptyText::new(&self.description)?,
            quantity: self.quantity,
            unit_price: self.unit_price,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateBillReq {
    pub patient_id: i64,
    pub bill_number: Option<String>,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub items: Vec<BillItemReq>,
    pub created_by: i64,
}

impl CreateBillReq {
    pub fn into_core(self) -> HmsResult<(NewBill, i64)> {
        let items = self
            .items
            .into_iter()
            .map(BillItemReq::into_core)
            .collect::<HmsResult<Vec<_>>>()?;
        let bill = NewBill {
            patient_id: self.patient_id,
            bill_number: self.bill_number,
            due_date: self.due_date,
            notes: self.notes,
            items,
        };
        Ok((bill, self.created_by))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentReq {
    pub amount: Decimal,
    /// cash | card | insurance | online
    pub method: String,
    #[serde(default)]
    pub reference_number: String,
    #[serde(default)]
    pub notes: String,
}

impl PaymentReq {
    pub fn into_core(self) -> HmsResult<NewPayment> {
        Ok(NewPayment {
            amount: self.amount,
            method: self.method.parse::<PaymentMethod>()?,
            reference_number: self.reference_number,
            notes: self.notes,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BillRes {
    pub id: i64,
    pub bill_number: String,
    pub patient_id: i64,
    pub bill_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: String,
    pub payment_status: String,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub balance_due: Decimal,
    /// Collected beyond the total; only callback settlements can produce this.
    pub overpayment: Decimal,
}

impl From<Bill> for BillRes {
    fn from(b: Bill) -> Self {
        Self {
            balance_due: b.balance_due(),
            overpayment: b.overpayment(),
            id: b.id,
            bill_number: b.bill_number,
            patient_id: b.patient_id,
            bill_date: b.bill_date,
            due_date: b.due_date,
            status: b.status.as_str().to_owned(),
            payment_status: b.payment_status.as_str().to_owned(),
            total_amount: b.total_amount,
            paid_amount: b.paid_amount,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StkPushReq {
    /// Local (`07XXXXXXXX`) or international (`2547XXXXXXXX`) form.
    pub phone_number: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MpesaPaymentRes {
    pub id: i64,
    pub bill_id: i64,
    pub phone_number: String,
    /// Whole shillings requested from the customer.
    pub amount: Decimal,
    /// Balance the push settles; the bill is credited this much on success.
    pub balance_due: Decimal,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub customer_message: String,
    pub state: String,
}

impl From<MpesaPayment> for MpesaPaymentRes {
    fn from(m: MpesaPayment) -> Self {
        Self {
            id: m.id,
            bill_id: m.bill_id,
            phone_number: m.phone_number,
            amount: m.amount,
            balance_due: m.balance_due,
            checkout_request_id: m.checkout_request_id,
            merchant_request_id: m.merchant_request_id,
            customer_message: m.customer_message,
            state: m.state.as_str().to_owned(),
        }
    }
}

// Purchasing

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PurchaseOrderItemReq {
    pub medicine_id: i64,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl From<PurchaseOrderItemReq> for NewPurchaseOrderItem {
    fn from(i: PurchaseOrderItemReq) -> Self {
        Self {
            medicine_id: i.medicine_id,
            quantity: i.quantity,
            unit_price: i.unit_price,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePurchaseOrderReq {
    pub supplier_id: i64,
    pub expected_delivery: Option<NaiveDate>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub items: Vec<PurchaseOrderItemReq>,
    pub created_by: i64,
}

impl CreatePurchaseOrderReq {
    /// Split into the core input and the acting user.
    pub fn into_core(self) -> (NewPurchaseOrder, i64) {
        let order = NewPurchaseOrder {
            supplier_id: self.supplier_id,
            expected_delivery: self.expected_delivery,
            notes: self.notes,
            items: self.items.into_iter().map(Into::into).collect(),
        };
        (order, self.created_by)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PurchaseOrderItemRes {
    pub id: i64,
    pub medicine_id: i64,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PurchaseOrderRes {
    pub id: i64,
    pub po_number: String,
    pub supplier_id: i64,
    pub order_date: NaiveDate,
    pub expected_delivery: Option<NaiveDate>,
    pub status: String,
    pub total_amount: Decimal,
    pub notes: String,
    pub created_by: i64,
    pub items: Vec<PurchaseOrderItemRes>,
}

impl From<PurchaseOrder> for PurchaseOrderRes {
    fn from(o: PurchaseOrder) -> Self {
        Self {
            id: o.id,
            po_number: o.po_number,
            supplier_id: o.supplier_id,
            order_date: o.order_date,
            expected_delivery: o.expected_delivery,
            status: o.status.as_str().to_owned(),
            total_amount: o.total_amount,
            notes: o.notes,
            created_by: o.created_by,
            items: o
                .items
                .into_iter()
                .map(|i| PurchaseOrderItemRes {
                    id: i.id,
                    medicine_id: i.medicine_id,
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                    total_price: i.total_price,
                })
                .collect(),
        }
    }
}

// Alerts

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ResolveAlertReq {
    pub user_id: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AlertRes {
    pub id: i64,
    pub inventory_item_id: i64,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub is_resolved: bool,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<StockAlert> for AlertRes {
    fn from(a: StockAlert) -> Self {
        Self {
            id: a.id,
            inventory_item_id: a.inventory_item_id,
            alert_type: a.kind.as_str().to_owned(),
            severity: a.severity.as_str().to_owned(),
            message: a.message,
            is_resolved: a.is_resolved,
            resolved_by: a.resolved_by,
            resolved_at: a.resolved_at,
            created_at: a.created_at,
        }
    }
}
