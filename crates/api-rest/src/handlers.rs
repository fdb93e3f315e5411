//! Request handlers. Each one converts the body, calls one core operation and maps the result.

use crate::error::ApiResult;
use crate::AppState;
use api_shared::{
    AlertRes, AppointmentRes, BillRes, BookAppointmentReq, CallbackAck, CategoryRes, ClinicRes,
    CreateBillReq, CreateCategoryReq, CreateClinicReq, CreateInventoryItemReq,
    CreateMedicineReq, CreatePatientReq, CreatePrescriptionReq, CreatePurchaseOrderReq,
    CreateSupplierReq, CreateUserReq, DispenseReportRes, DispenseReq, ErrorRes, HealthRes,
    HealthService, InventoryItemRes, InventoryValueRes, MedicineRes, MpesaPaymentRes, PatientRes,
    PaymentReq, PrescriptionRes, PurchaseOrderItemReq, PurchaseOrderRes, RecordTransactionReq,
    RescheduleAppointmentReq, ResolveAlertReq, StatusChangeReq, StkPushReq, StockTransactionRes,
    SupplierRes, UserRes,
};
use axum::body::Bytes;
use axum::extract::{Path as AxumPath, State};
use axum::response::Json;
use chrono::Utc;
use hms_core::billing::callback::parse_callback;
use hms_core::{
    AppointmentStatus, HmsError, NonEmptyText, PhoneNumber, PurchaseOrderStatus, TransactionKind,
};

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
#[axum::debug_handler]
pub async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/clinics",
    request_body = CreateClinicReq,
    responses(
        (status = 200, description = "Clinic registered", body = ClinicRes),
        (status = 400, description = "Blank field or malformed phone", body = ErrorRes),
        (status = 409, description = "Registration number already used", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_clinic(
    State(state): State<AppState>,
    Json(req): Json<CreateClinicReq>,
) -> ApiResult<ClinicRes> {
    Ok(Json(state.records.create_clinic(req.into_core()?)?.into()))
}

#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserReq,
    responses(
        (status = 200, description = "User created", body = UserRes),
        (status = 400, description = "Unknown role or blank name", body = ErrorRes),
        (status = 409, description = "Username taken", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserReq>,
) -> ApiResult<UserRes> {
    Ok(Json(state.records.create_user(req.into_core()?)?.into()))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    responses(
        (status = 200, description = "User", body = UserRes),
        (status = 404, description = "No such user", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_user(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<UserRes> {
    Ok(Json(state.records.get_user(id)?.into()))
}

#[utoipa::path(
    post,
    path = "/patients",
    request_body = CreatePatientReq,
    responses(
        (status = 200, description = "Patient registered", body = PatientRes),
        (status = 400, description = "Invalid field", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_patient(
    State(state): State<AppState>,
    Json(req): Json<CreatePatientReq>,
) -> ApiResult<PatientRes> {
    let patient = state
        .records
        .create_patient(req.into_core()?, Utc::now().date_naive())?;
    Ok(Json(patient.into()))
}

#[utoipa::path(
    get,
    path = "/patients/{id}",
    responses(
        (status = 200, description = "Patient", body = PatientRes),
        (status = 404, description = "No such patient", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_patient(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<PatientRes> {
    Ok(Json(state.records.get_patient(id)?.into()))
}

#[utoipa::path(
    post,
    path = "/medicines",
    request_body = CreateMedicineReq,
    responses(
        (status = 200, description = "Medicine added to the catalogue", body = MedicineRes),
        (status = 400, description = "Blank name", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_medicine(
    State(state): State<AppState>,
    Json(req): Json<CreateMedicineReq>,
) -> ApiResult<MedicineRes> {
    Ok(Json(state.records.create_medicine(req.into_core()?)?.into()))
}

#[utoipa::path(
    get,
    path = "/medicines/{id}",
    responses(
        (status = 200, description = "Medicine", body = MedicineRes),
        (status = 404, description = "No such medicine", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_medicine(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<MedicineRes> {
    Ok(Json(state.records.get_medicine(id)?.into()))
}

#[utoipa::path(
    post,
    path = "/suppliers",
    request_body = CreateSupplierReq,
    responses(
        (status = 200, description = "Supplier added", body = SupplierRes),
        (status = 400, description = "Blank name or malformed phone", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_supplier(
    State(state): State<AppState>,
    Json(req): Json<CreateSupplierReq>,
) -> ApiResult<SupplierRes> {
    let name = NonEmptyText::new(&req.name).map_err(HmsError::from)?;
    let phone = PhoneNumber::parse(&req.phone).map_err(HmsError::from)?;
    let supplier = state
        .records
        .create_supplier(name, &req.contact_person, phone, &req.email)?;
    Ok(Json(supplier.into()))
}

#[utoipa::path(
    post,
    path = "/categories",
    request_body = CreateCategoryReq,
    responses(
        (status = 200, description = "Category added", body = CategoryRes),
        (status = 409, description = "Category name taken", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_category(
    State(state): State<AppState>,
    Json(req): Json<CreateCategoryReq>,
) -> ApiResult<CategoryRes> {
    let name = NonEmptyText::new(&req.name).map_err(HmsError::from)?;
    Ok(Json(
        state.records.create_category(name, &req.description)?.into(),
    ))
}

#[utoipa::path(
    post,
    path = "/appointments",
    request_body = BookAppointmentReq,
    responses(
        (status = 200, description = "Appointment booked", body = AppointmentRes),
        (status = 400, description = "Invalid request", body = ErrorRes),
        (status = 409, description = "Doctor or patient already booked", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<AppState>,
    Json(req): Json<BookAppointmentReq>,
) -> ApiResult<AppointmentRes> {
    let appointment = state.appointments.book(req.into_core()?, Utc::now())?;
    Ok(Json(appointment.into()))
}

#[utoipa::path(
    get,
    path = "/appointments/{id}",
    responses(
        (status = 200, description = "Appointment", body = AppointmentRes),
        (status = 404, description = "No such appointment", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<AppointmentRes> {
    Ok(Json(state.appointments.get(id)?.into()))
}

#[utoipa::path(
    put,
    path = "/appointments/{id}",
    request_body = RescheduleAppointmentReq,
    responses(
        (status = 200, description = "Appointment rescheduled", body = AppointmentRes),
        (status = 409, description = "New slot is taken or the appointment is cancelled", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<RescheduleAppointmentReq>,
) -> ApiResult<AppointmentRes> {
    let appointment = state
        .appointments
        .reschedule(id, req.into_core()?, Utc::now())?;
    Ok(Json(appointment.into()))
}

#[utoipa::path(
    post,
    path = "/appointments/{id}/status",
    request_body = StatusChangeReq,
    responses(
        (status = 200, description = "Status changed", body = AppointmentRes),
        (status = 400, description = "Unknown status", body = ErrorRes),
        (status = 409, description = "Transition not allowed", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn change_appointment_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<StatusChangeReq>,
) -> ApiResult<AppointmentRes> {
    let next = req
        .status
        .parse::<AppointmentStatus>()
        .map_err(HmsError::from)?;
    let appointment = state.appointments.transition_status(id, next, Utc::now())?;
    Ok(Json(appointment.into()))
}

#[utoipa::path(
    post,
    path = "/inventory",
    request_body = CreateInventoryItemReq,
    responses(
        (status = 200, description = "Item created with its opening stock", body = InventoryItemRes),
        (status = 400, description = "Invalid prices, levels or expiry", body = ErrorRes),
        (status = 409, description = "Batch or barcode already exists", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_inventory_item(
    State(state): State<AppState>,
    Json(req): Json<CreateInventoryItemReq>,
) -> ApiResult<InventoryItemRes> {
    let (item, created_by) = req.into_core()?;
    let item = state.inventory.create_item(item, created_by, Utc::now())?;
    Ok(Json(item.into()))
}

#[utoipa::path(
    get,
    path = "/inventory/{id}",
    responses(
        (status = 200, description = "Inventory item", body = InventoryItemRes),
        (status = 404, description = "No such item", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_inventory_item(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<InventoryItemRes> {
    Ok(Json(state.inventory.get_item(id)?.into()))
}

#[utoipa::path(
    get,
    path = "/inventory/low-stock",
    responses(
        (status = 200, description = "Active items at or under their reorder level", body = [InventoryItemRes])
    )
)]
#[axum::debug_handler]
pub async fn low_stock(State(state): State<AppState>) -> ApiResult<Vec<InventoryItemRes>> {
    let items = state.inventory.list_low_stock()?;
    Ok(Json(items.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/inventory/value",
    responses(
        (status = 200, description = "Cost value of active stock", body = InventoryValueRes)
    )
)]
#[axum::debug_handler]
pub async fn inventory_value(State(state): State<AppState>) -> ApiResult<InventoryValueRes> {
    Ok(Json(InventoryValueRes {
        total_value: state.inventory.total_value()?,
    }))
}

#[utoipa::path(
    post,
    path = "/stock-transactions",
    request_body = RecordTransactionReq,
    responses(
        (status = 200, description = "Transaction recorded", body = StockTransactionRes),
        (status = 400, description = "Quantity sign does not match the kind", body = ErrorRes),
        (status = 409, description = "Insufficient stock", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn record_transaction(
    State(state): State<AppState>,
    Json(req): Json<RecordTransactionReq>,
) -> ApiResult<StockTransactionRes> {
    let kind = req
        .transaction_type
        .parse::<TransactionKind>()
        .map_err(HmsError::from)?;
    let tx = state.ledger.record_transaction(
        req.inventory_item_id,
        kind,
        req.quantity,
        req.unit_price,
        req.meta(),
        Utc::now(),
    )?;
    Ok(Json(tx.into()))
}

#[utoipa::path(
    post,
    path = "/stock-transactions/{transaction_id}/reverse",
    responses(
        (status = 200, description = "Transaction undone and removed from the ledger", body = StockTransactionRes),
        (status = 404, description = "No such transaction", body = ErrorRes),
        (status = 409, description = "Reversal would drive stock negative", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn reverse_transaction(
    State(state): State<AppState>,
    AxumPath(transaction_id): AxumPath<String>,
) -> ApiResult<StockTransactionRes> {
    Ok(Json(state.ledger.reverse_transaction(&transaction_id)?.into()))
}

#[utoipa::path(
    post,
    path = "/prescriptions",
    request_body = CreatePrescriptionReq,
    responses(
        (status = 200, description = "Prescription written", body = PrescriptionRes),
        (status = 400, description = "No lines or a zero quantity", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_prescription(
    State(state): State<AppState>,
    Json(req): Json<CreatePrescriptionReq>,
) -> ApiResult<PrescriptionRes> {
    let prescription = state
        .prescriptions
        .create(req.into_core()?, Utc::now().date_naive())?;
    Ok(Json(prescription.into()))
}

#[utoipa::path(
    get,
    path = "/prescriptions/{id}",
    responses(
        (status = 200, description = "Prescription with its lines", body = PrescriptionRes),
        (status = 404, description = "No such prescription", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_prescription(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<PrescriptionRes> {
    Ok(Json(state.prescriptions.get(id)?.into()))
}

#[utoipa::path(
    post,
    path = "/prescriptions/{id}/dispense",
    request_body = DispenseReq,
    responses(
        (status = 200, description = "Prescription dispensed; uncovered lines are listed", body = DispenseReportRes),
        (status = 404, description = "No such prescription or dispensing user", body = ErrorRes),
        (status = 409, description = "Already dispensed", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn dispense_prescription(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<DispenseReq>,
) -> ApiResult<DispenseReportRes> {
    let report = state.dispense.dispense(id, req.dispensed_by, Utc::now())?;
    Ok(Json(report.into()))
}

#[utoipa::path(
    post,
    path = "/purchase-orders",
    request_body = CreatePurchaseOrderReq,
    responses(
        (status = 200, description = "Draft order created", body = PurchaseOrderRes),
        (status = 400, description = "Past delivery date or invalid line", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_purchase_order(
    State(state): State<AppState>,
    Json(req): Json<CreatePurchaseOrderReq>,
) -> ApiResult<PurchaseOrderRes> {
    let (order, created_by) = req.into_core();
    let order = state
        .purchase_orders
        .create(order, created_by, Utc::now())?;
    Ok(Json(order.into()))
}

#[utoipa::path(
    get,
    path = "/purchase-orders/{id}",
    responses(
        (status = 200, description = "Purchase order with its lines", body = PurchaseOrderRes),
        (status = 404, description = "No such order", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_purchase_order(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<PurchaseOrderRes> {
    Ok(Json(state.purchase_orders.get(id)?.into()))
}

#[utoipa::path(
    post,
    path = "/purchase-orders/{id}/items",
    request_body = PurchaseOrderItemReq,
    responses(
        (status = 200, description = "Line added and total recomputed", body = PurchaseOrderRes),
        (status = 400, description = "Invalid line or the order is no longer a draft", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn add_purchase_order_item(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<PurchaseOrderItemReq>,
) -> ApiResult<PurchaseOrderRes> {
    let order = state
        .purchase_orders
        .add_item(id, req.into(), Utc::now())?;
    Ok(Json(order.into()))
}

#[utoipa::path(
    post,
    path = "/purchase-orders/{id}/status",
    request_body = StatusChangeReq,
    responses(
        (status = 200, description = "Status changed", body = PurchaseOrderRes),
        (status = 400, description = "Unknown status or an empty order submitted", body = ErrorRes),
        (status = 409, description = "Transition not allowed", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn change_purchase_order_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<StatusChangeReq>,
) -> ApiResult<PurchaseOrderRes> {
    let next = req
        .status
        .parse::<PurchaseOrderStatus>()
        .map_err(HmsError::from)?;
    let order = state
        .purchase_orders
        .transition_status(id, next, Utc::now())?;
    Ok(Json(order.into()))
}

#[utoipa::path(
    post,
    path = "/bills",
    request_body = CreateBillReq,
    responses(
        (status = 200, description = "Bill created", body = BillRes),
        (status = 409, description = "Bill number already used", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_bill(
    State(state): State<AppState>,
    Json(req): Json<CreateBillReq>,
) -> ApiResult<BillRes> {
    let (bill, created_by) = req.into_core()?;
    let bill = state.billing.create_bill(bill, created_by, Utc::now())?;
    Ok(Json(bill.into()))
}

#[utoipa::path(
    get,
    path = "/bills/{id}",
    responses(
        (status = 200, description = "Bill", body = BillRes),
        (status = 404, description = "No such bill", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_bill(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<BillRes> {
    Ok(Json(state.billing.get_bill(id)?.into()))
}

#[utoipa::path(
    post,
    path = "/bills/{id}/payments",
    request_body = PaymentReq,
    responses(
        (status = 200, description = "Payment recorded", body = BillRes),
        (status = 400, description = "Amount exceeds the balance due", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn record_payment(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<PaymentReq>,
) -> ApiResult<BillRes> {
    let bill = state
        .billing
        .record_payment(id, req.into_core()?, Utc::now())?;
    Ok(Json(bill.into()))
}

#[utoipa::path(
    post,
    path = "/bills/{id}/stk-push",
    request_body = StkPushReq,
    responses(
        (status = 200, description = "Push accepted; awaiting callback", body = MpesaPaymentRes),
        (status = 422, description = "Gateway refused the push", body = ErrorRes),
        (status = 503, description = "Gateway timed out or is unreachable", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn initiate_stk_push(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<StkPushReq>,
) -> ApiResult<MpesaPaymentRes> {
    let phone = PhoneNumber::parse(&req.phone_number).map_err(HmsError::from)?;
    let request = state.billing.initiate_push(id, &phone, Utc::now()).await?;
    Ok(Json(request.into()))
}

#[utoipa::path(
    post,
    path = "/mpesa/callback",
    responses(
        (status = 200, description = "Always acknowledged", body = CallbackAck)
    )
)]
/// Gateway callback receiver.
///
/// Answers `{"status":"ok"}` whatever happens, so the gateway never retries a delivery that
/// was unreadable or unmatched. Problems are logged instead.
#[axum::debug_handler]
pub async fn mpesa_callback(State(state): State<AppState>, body: Bytes) -> Json<CallbackAck> {
    match parse_callback(&body) {
        Err(e) => tracing::warn!(error = %e, "unreadable mpesa callback"),
        Ok(callback) => {
            let receipt = callback.receipt_number();
            match state.billing.reconcile_callback(
                &callback.checkout_request_id,
                callback.result_code,
                receipt.as_deref(),
                Utc::now(),
            ) {
                Ok(outcome) => tracing::debug!(
                    checkout_request_id = %callback.checkout_request_id,
                    ?outcome,
                    "mpesa callback handled"
                ),
                Err(e) => tracing::error!(
                    checkout_request_id = %callback.checkout_request_id,
                    error = %e,
                    "mpesa callback could not be applied"
                ),
            }
        }
    }
    Json(CallbackAck::ok())
}

#[utoipa::path(
    get,
    path = "/alerts",
    responses(
        (status = 200, description = "Unresolved stock alerts", body = [AlertRes])
    )
)]
#[axum::debug_handler]
pub async fn list_alerts(State(state): State<AppState>) -> ApiResult<Vec<AlertRes>> {
    let alerts = state.alerts.list_unresolved()?;
    Ok(Json(alerts.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/alerts/regenerate",
    responses(
        (status = 200, description = "Unresolved alerts rebuilt from current stock", body = [AlertRes])
    )
)]
#[axum::debug_handler]
pub async fn regenerate_alerts(State(state): State<AppState>) -> ApiResult<Vec<AlertRes>> {
    let alerts = state.alerts.regenerate_alerts(Utc::now())?;
    Ok(Json(alerts.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/alerts/{id}/resolve",
    request_body = ResolveAlertReq,
    responses(
        (status = 200, description = "Alert resolved", body = AlertRes),
        (status = 409, description = "Already resolved", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn resolve_alert(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<ResolveAlertReq>,
) -> ApiResult<AlertRes> {
    Ok(Json(state.alerts.resolve(id, req.user_id, Utc::now())?.into()))
}
