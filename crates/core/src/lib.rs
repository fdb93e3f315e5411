//! # HMS Core
//!
//! Core business logic for the hospital back-office.
//!
//! This crate owns the SQLite store and every rule that keeps it consistent:
//! - appointment booking guarded against double-booking of doctors and patients
//! - the append-only stock ledger and the auto-dispense of prescriptions
//! - billing, STK push initiation and callback reconciliation
//! - stock alert regeneration
//!
//! **No API concerns**: HTTP servers, the CLI and the concrete payment gateway client belong in
//! `api-rest`, `cli` and `mpesa`.

pub mod alerts;
pub mod billing;
pub mod config;
pub mod constants;
pub mod db;
pub mod dispense;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod purchasing;
pub mod records;
pub mod scheduling;
pub mod status;
pub mod validation;

pub use alerts::{AlertService, StockAlert};
pub use billing::gateway::{GatewayError, PaymentGateway, StkPushRequest, StkPushResponse};
pub use billing::{BillingService, CallbackOutcome};
pub use config::{CoreConfig, PushSettings};
pub use db::Database;
pub use dispense::{DispenseService, PrescriptionService};
pub use error::{HmsError, HmsResult};
pub use hms_types::{NonEmptyText, PhoneNumber};
pub use inventory::InventoryService;
pub use ledger::{StockLedger, TransactionMeta};
pub use purchasing::PurchaseOrderService;
pub use records::RecordService;
pub use scheduling::{AppointmentService, SchedulingGuard};
pub use status::*;
