//! # API REST
//!
//! REST API implementation for HMS.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status codes)
//!
//! Uses `api-shared` for request/response bodies and `hms-core` for every rule.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod handlers;

use anyhow::Context;
use async_trait::async_trait;
use axum::routing::{get, post};
use axum::Router;
use hms_core::config::{
    database_path_from_env_value, gateway_timeout_from_env_value,
    near_expiry_days_from_env_value, push_settings_from_env_values,
};
use hms_core::{
    AlertService, AppointmentService, BillingService, CoreConfig, Database, DispenseService,
    GatewayError, InventoryService, PaymentGateway, PrescriptionService, PurchaseOrderService,
    RecordService, StkPushRequest, StkPushResponse, StockLedger,
};
use hms_mpesa::{DarajaClient, DarajaConfig};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Shared state for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub records: RecordService,
    pub appointments: AppointmentService,
    pub inventory: InventoryService,
    pub ledger: StockLedger,
    pub prescriptions: PrescriptionService,
    pub dispense: DispenseService,
    pub purchase_orders: PurchaseOrderService,
    pub billing: BillingService,
    pub alerts: AlertService,
}

impl AppState {
    pub fn new(cfg: Arc<CoreConfig>, db: Arc<Database>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            records: RecordService::new(db.clone()),
            appointments: AppointmentService::new(db.clone()),
            inventory: InventoryService::new(db.clone()),
            ledger: StockLedger::new(db.clone()),
            prescriptions: PrescriptionService::new(db.clone()),
            dispense: DispenseService::new(db.clone()),
            purchase_orders: PurchaseOrderService::new(db.clone()),
            billing: BillingService::new(cfg.clone(), db.clone(), gateway),
            alerts: AlertService::new(cfg, db),
        }
    }

    /// Resolve configuration from the process environment and open the database.
    ///
    /// # Environment Variables
    /// - `HMS_DATABASE_PATH`: SQLite file (default: "hms.db")
    /// - `HMS_NEAR_EXPIRY_DAYS`: near-expiry alert window (default: 30)
    /// - `MPESA_SHORTCODE`, `MPESA_PASSKEY`, `MPESA_CALLBACK_URL`: merchant push settings
    /// - `MPESA_CONSUMER_KEY`, `MPESA_CONSUMER_SECRET`: Daraja credentials
    /// - `MPESA_BASE_URL`: Daraja endpoint (default: Safaricom sandbox)
    /// - `MPESA_TIMEOUT_SECS`: outbound gateway timeout (default: 30)
    ///
    /// # Errors
    /// Returns an error if a value is malformed, if push settings are present without
    /// credentials, or if the database cannot be opened.
    pub fn from_env() -> anyhow::Result<Self> {
        let env = |key: &str| std::env::var(key).ok();

        let push = push_settings_from_env_values(
            env("MPESA_SHORTCODE"),
            env("MPESA_PASSKEY"),
            env("MPESA_CALLBACK_URL"),
        )?;
        let timeout = gateway_timeout_from_env_value(env("MPESA_TIMEOUT_SECS"))?;
        let daraja = DarajaConfig::from_env_values(
            env("MPESA_BASE_URL"),
            env("MPESA_CONSUMER_KEY"),
            env("MPESA_CONSUMER_SECRET"),
            timeout,
        )?;

        let gateway: Arc<dyn PaymentGateway> = match (push.is_some(), daraja) {
            (_, Some(daraja)) => Arc::new(DarajaClient::new(daraja)?),
            (true, None) => anyhow::bail!(
                "MPESA_SHORTCODE is set but MPESA_CONSUMER_KEY and MPESA_CONSUMER_SECRET are not"
            ),
            (false, None) => {
                tracing::info!("mobile-money payments disabled");
                Arc::new(DisabledGateway)
            }
        };

        let cfg = Arc::new(CoreConfig::new(
            database_path_from_env_value(env("HMS_DATABASE_PATH")),
            near_expiry_days_from_env_value(env("HMS_NEAR_EXPIRY_DAYS"))?,
            push,
        )?);
        let db = Database::open(cfg.database_path()).with_context(|| {
            format!("cannot open database {}", cfg.database_path().display())
        })?;

        Ok(Self::new(cfg, Arc::new(db), gateway))
    }
}

/// Stands in for the gateway when no credentials are configured.
struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn request_push(
        &self,
        _request: &StkPushRequest,
    ) -> Result<StkPushResponse, GatewayError> {
        Err(GatewayError::Rejected(
            "mobile-money gateway is not configured".into(),
        ))
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::create_clinic,
        handlers::create_user,
        handlers::get_user,
        handlers::create_patient,
        handlers::get_patient,
        handlers::create_medicine,
        handlers::get_medicine,
        handlers::create_supplier,
        handlers::create_category,
        handlers::book_appointment,
        handlers::get_appointment,
        handlers::reschedule_appointment,
        handlers::change_appointment_status,
        handlers::create_inventory_item,
        handlers::get_inventory_item,
        handlers::low_stock,
        handlers::inventory_value,
        handlers::record_transaction,
        handlers::reverse_transaction,
        handlers::create_prescription,
        handlers::get_prescription,
        handlers::dispense_prescription,
        handlers::create_purchase_order,
        handlers::get_purchase_order,
        handlers::add_purchase_order_item,
        handlers::change_purchase_order_status,
        handlers::create_bill,
        handlers::get_bill,
        handlers::record_payment,
        handlers::initiate_stk_push,
        handlers::mpesa_callback,
        handlers::list_alerts,
        handlers::regenerate_alerts,
        handlers::resolve_alert,
    ),
    components(schemas(
        api_shared::HealthRes,
        api_shared::ErrorRes,
        api_shared::CallbackAck,
        api_shared::CreateClinicReq,
        api_shared::ClinicRes,
        api_shared::CreateUserReq,
        api_shared::UserRes,
        api_shared::CreatePatientReq,
        api_shared::PatientRes,
        api_shared::CreateMedicineReq,
        api_shared::MedicineRes,
        api_shared::CreateSupplierReq,
        api_shared::SupplierRes,
        api_shared::CreateCategoryReq,
        api_shared::CategoryRes,
        api_shared::BookAppointmentReq,
        api_shared::RescheduleAppointmentReq,
        api_shared::StatusChangeReq,
        api_shared::AppointmentRes,
        api_shared::CreateInventoryItemReq,
        api_shared::InventoryItemRes,
        api_shared::InventoryValueRes,
        api_shared::RecordTransactionReq,
        api_shared::StockTransactionRes,
        api_shared::CreatePrescriptionReq,
        api_shared::PrescribedMedicineReq,
        api_shared::PrescriptionRes,
        api_shared::PrescribedMedicineRes,
        api_shared::DispenseReq,
        api_shared::DispenseReportRes,
        api_shared::SkippedLineRes,
        api_shared::CreatePurchaseOrderReq,
        api_shared::PurchaseOrderItemReq,
        api_shared::PurchaseOrderRes,
        api_shared::PurchaseOrderItemRes,
        api_shared::CreateBillReq,
        api_shared::BillItemReq,
        api_shared::BillRes,
        api_shared::PaymentReq,
        api_shared::StkPushReq,
        api_shared::MpesaPaymentRes,
        api_shared::ResolveAlertReq,
        api_shared::AlertRes,
    ))
)]
pub struct ApiDoc;

/// Build the REST router with Swagger UI at `/swagger-ui`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/clinics", post(handlers::create_clinic))
        .route("/users", post(handlers::create_user))
        .route("/users/:id", get(handlers::get_user))
        .route("/patients", post(handlers::create_patient))
        .route("/patients/:id", get(handlers::get_patient))
        .route("/medicines", post(handlers::create_medicine))
        .route("/medicines/:id", get(handlers::get_medicine))
        .route("/suppliers", post(handlers::create_supplier))
        .route("/categories", post(handlers::create_category))
        .route("/appointments", post(handlers::book_appointment))
        .route(
            "/appointments/:id",
            get(handlers::get_appointment).put(handlers::reschedule_appointment),
        )
        .route(
            "/appointments/:id/status",
            post(handlers::change_appointment_status),
        )
        .route("/inventory", post(handlers::create_inventory_item))
        .route("/inventory/low-stock", get(handlers::low_stock))
        .route("/inventory/value", get(handlers::inventory_value))
        .route("/inventory/:id", get(handlers::get_inventory_item))
        .route("/stock-transactions", post(handlers::record_transaction))
        .route(
            "/stock-transactions/:transaction_id/reverse",
            post(handlers::reverse_transaction),
        )
        .route("/prescriptions", post(handlers::create_prescription))
        .route("/prescriptions/:id", get(handlers::get_prescription))
        .route(
            "/prescriptions/:id/dispense",
            post(handlers::dispense_prescription),
        )
        .route("/purchase-orders", post(handlers::create_purchase_order))
        .route("/purchase-orders/:id", get(handlers::get_purchase_order))
        .route(
            "/purchase-orders/:id/items",
            post(handlers::add_purchase_order_item),
        )
        .route(
            "/purchase-orders/:id/status",
            post(handlers::change_purchase_order_status),
        )
        .route("/bills", post(handlers::create_bill))
        .route("/bills/:id", get(handlers::get_bill))
        .route("/bills/:id/payments", post(handlers::record_payment))
        .route("/bills/:id/stk-push", post(handlers::initiate_stk_push))
        .route("/mpesa/callback", post(handlers::mpesa_callback))
        .route("/alerts", get(handlers::list_alerts))
        .route("/alerts/regenerate", post(handlers::regenerate_alerts))
        .route("/alerts/:id/resolve", post(handlers::resolve_alert))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
