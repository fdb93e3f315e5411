//! Bills, payments and mobile-money reconciliation.
//!
//! A bill's `total_amount` is the sum of its items and `paid_amount` the sum of its settled
//! payments. Mobile-money collection is a two-step flow correlated only by the gateway's
//! checkout request id:
//!
//! 1. [`BillingService::initiate_push`] asks the gateway to prompt the customer and, once the
//!    gateway accepts, stores an [`MpesaPayment`] awaiting its callback.
//! 2. [`BillingService::reconcile_callback`] settles that request exactly once, however many
//!    times and in whatever order the gateway delivers the callback.

pub mod callback;
pub mod gateway;

use crate::config::CoreConfig;
use crate::constants::STK_PUSH_DESCRIPTION;
use crate::db::{
    date_col, date_to_sql, money_col, money_to_sql, next_document_number, opt_ts_col, ts_col,
    ts_to_sql, Database,
};
use crate::status::{ensure_transition, BillStatus, MpesaRequestState, PaymentMethod, PaymentStatus};
use crate::validation::validate_positive_amount;
use crate::{HmsError, HmsResult};
use chrono::{DateTime, NaiveDate, Utc};
use gateway::{GatewayError, PaymentGateway, StkPushRequest};
use hms_ids::{DocumentKind, DocumentNumber};
use hms_types::{NonEmptyText, PhoneNumber};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub id: i64,
    pub bill_number: String,
    pub patient_id: i64,
    pub bill_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: BillStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub notes: String,
    pub created_by: i64,
}

impl Bill {
    pub fn balance_due(&self) -> Decimal {
        self.total_amount - self.paid_amount
    }

    /// Amount collected beyond the total, zero when not overpaid.
    pub fn overpayment(&self) -> Decimal {
        (self.paid_amount - self.total_amount).max(Decimal::ZERO)
    }

    /// Status implied by the amounts, ignoring cancellation.
    fn settled_status(&self) -> BillStatus {
        if self.paid_amount >= self.total_amount {
            BillStatus::Paid
        } else if self.paid_amount > Decimal::ZERO {
            BillStatus::Partial
        } else {
            BillStatus::Pending
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillItem {
    pub id: i64,
    pub bill_id: i64,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub bill_id: i64,
    pub amount: Decimal,
    pub payment_date: DateTime<Utc>,
    pub method: PaymentMethod,
    pub reference_number: String,
    pub notes: String,
}

/// A pending or settled mobile-money request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpesaPayment {
    pub id: i64,
    pub bill_id: i64,
    pub phone_number: String,
    /// Whole shillings requested from the customer.
    pub amount: Decimal,
    /// Unrounded balance at push time; this is what a successful callback credits.
    pub balance_due: Decimal,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub response_code: String,
    pub response_description: String,
    pub customer_message: String,
    pub state: MpesaRequestState,
    pub result_code: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewBillItem {
    pub description: NonEmptyText,
    pub quantity: u32,
    pub unit_price: Decimal,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewBill {
    pub patient_id: i64,
    /// Generated as `BILL{yymmdd}{seq:04}` when absent.
    pub bill_number: Option<String>,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub items: Vec<NewBillItem>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewPayment {
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[serde(default)]
    pub reference_number: String,
    #[serde(default)]
    pub notes: String,
}

/// What a callback did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// The request was settled now; `success` mirrors the result code.
    ///
    /// `rounding` is what the customer paid above the credited balance because the push was
    /// rounded up to whole shillings. It is zero for failed settlements.
    Settled {
        success: bool,
        bill: Bill,
        rounding: Decimal,
    },
    /// No request carries this checkout id.
    Unmatched,
    /// The request had already been settled by an earlier delivery.
    Duplicate,
}

/// Bill lifecycle and payment collection.
#[derive(Clone)]
pub struct BillingService {
    cfg: Arc<CoreConfig>,
    db: Arc<Database>,
    gateway: Arc<dyn PaymentGateway>,
}

impl std::fmt::Debug for BillingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingService").finish_non_exhaustive()
    }
}

impl BillingService {
    pub fn new(cfg: Arc<CoreConfig>, db: Arc<Database>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { cfg, db, gateway }
    }

    /// Open a bill, optionally with its first items.
    pub fn create_bill(
        &self,
        new: NewBill,
        created_by: i64,
        now: DateTime<Utc>,
    ) -> HmsResult<Bill> {
        let today = now.date_naive();
        if new.due_date < today {
            return Err(HmsError::Validation("due date cannot be in the past".into()));
        }
        for item in &new.items {
            validate_item(item)?;
        }
        let supplied_number = new
            .bill_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);

        self.db.write(|tx| {
            let bill_number = match supplied_number {
                Some(number) => number,
                None => next_document_number(tx, DocumentKind::Bill, "bills", "bill_number", today)?
                    .to_string(),
            };
            tx.execute(
                "INSERT INTO bills (bill_number, patient_id, bill_date, due_date, status,
                     payment_status, total_amount, paid_amount, notes, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, '0.00', '0.00', ?7, ?8)",
                params![
                    bill_number,
                    new.patient_id,
                    date_to_sql(today),
                    date_to_sql(new.due_date),
                    BillStatus::Pending,
                    PaymentStatus::Pending,
                    new.notes,
                    created_by,
                ],
            )?;
            let id = tx.last_insert_rowid();
            for item in &new.items {
                insert_item(tx, id, item)?;
            }
            recompute_total(tx, id)?;
            tracing::info!(id, %bill_number, "bill created");
            load_bill(tx, id)
        })
    }

    /// Add a line to an open bill and recompute its total.
    pub fn add_item(&self, bill_id: i64, item: NewBillItem) -> HmsResult<Bill> {
        validate_item(&item)?;
        self.db.write(|tx| {
            let bill = load_bill(tx, bill_id)?;
            if matches!(bill.status, BillStatus::Paid | BillStatus::Cancelled) {
                return Err(HmsError::Validation(format!(
                    "cannot add items to a {} bill",
                    bill.status
                )));
            }
            insert_item(tx, bill_id, &item)?;
            recompute_total(tx, bill_id)?;
            load_bill(tx, bill_id)
        })
    }

    /// Record a cash, card, insurance or online payment taken at the desk.
    ///
    /// # Errors
    ///
    /// - [`HmsError::Validation`] if `amount` is not positive or exceeds the balance due.
    /// - [`HmsError::InvalidTransition`] if the bill is already paid or cancelled.
    pub fn record_payment(
        &self,
        bill_id: i64,
        payment: NewPayment,
        now: DateTime<Utc>,
    ) -> HmsResult<Bill> {
        validate_positive_amount("payment amount", payment.amount)?;
        self.db.write(|tx| {
            let mut bill = load_bill(tx, bill_id)?;
            if payment.amount > bill.balance_due() {
                return Err(HmsError::Validation(format!(
                    "payment {} exceeds balance due {}",
                    payment.amount,
                    bill.balance_due()
                )));
            }
            bill.paid_amount += payment.amount;
            let next = bill.settled_status();
            ensure_transition("bill", bill.status, next, bill.status.can_transition_to(next))?;

            insert_payment(
                tx,
                bill_id,
                payment.amount,
                payment.method,
                &payment.reference_number,
                &payment.notes,
                now,
            )?;
            tx.execute(
                "UPDATE bills SET paid_amount = ?1, status = ?2 WHERE id = ?3",
                params![money_to_sql(bill.paid_amount), next, bill_id],
            )?;
            tracing::info!(bill_id, amount = %payment.amount, method = %payment.method, "payment recorded");
            load_bill(tx, bill_id)
        })
    }

    pub fn cancel_bill(&self, bill_id: i64) -> HmsResult<Bill> {
        self.db.write(|tx| {
            let bill = load_bill(tx, bill_id)?;
            let next = BillStatus::Cancelled;
            ensure_transition("bill", bill.status, next, bill.status.can_transition_to(next))?;
            tx.execute(
                "UPDATE bills SET status = ?1 WHERE id = ?2",
                params![next, bill_id],
            )?;
            load_bill(tx, bill_id)
        })
    }

    pub fn get_bill(&self, bill_id: i64) -> HmsResult<Bill> {
        self.db.read(|conn| load_bill(conn, bill_id))
    }

    pub fn bill_items(&self, bill_id: i64) -> HmsResult<Vec<BillItem>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, bill_id, description, quantity, unit_price, amount
                 FROM bill_items WHERE bill_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![bill_id], |row| {
                Ok(BillItem {
                    id: row.get(0)?,
                    bill_id: row.get(1)?,
                    description: row.get(2)?,
                    quantity: row.get(3)?,
                    unit_price: money_col(row, 4)?,
                    amount: money_col(row, 5)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn payments(&self, bill_id: i64) -> HmsResult<Vec<Payment>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, bill_id, amount, payment_date, method, reference_number, notes
                 FROM payments WHERE bill_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![bill_id], |row| {
                Ok(Payment {
                    id: row.get(0)?,
                    bill_id: row.get(1)?,
                    amount: money_col(row, 2)?,
                    payment_date: ts_col(row, 3)?,
                    method: row.get(4)?,
                    reference_number: row.get(5)?,
                    notes: row.get(6)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn mpesa_requests(&self, bill_id: i64) -> HmsResult<Vec<MpesaPayment>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MPESA} WHERE bill_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![bill_id], map_mpesa)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Prompt the customer's phone to pay the bill's balance.
    ///
    /// The balance is rounded up to whole shillings, the unit the gateway accepts. The stored
    /// request keeps the unrounded balance too, and a successful callback credits only that, so
    /// `paid_amount` never picks up the rounding.
    ///
    /// # Errors
    ///
    /// - [`HmsError::Validation`] if nothing is due or the bill is cancelled before the push.
    /// - [`HmsError::Config`] if push settings were not configured.
    /// - [`HmsError::Gateway`] with [`GatewayError::Rejected`] when the gateway refuses; with
    ///   [`GatewayError::Timeout`] or [`GatewayError::Transport`] when the outcome is unknown.
    ///
    /// No state changes unless the gateway accepted the push. A bill cancelled while the push
    /// was in flight still gets the request stored, since the customer may already be paying;
    /// the callback then records the payment without reopening the bill.
    pub async fn initiate_push(
        &self,
        bill_id: i64,
        phone: &PhoneNumber,
        now: DateTime<Utc>,
    ) -> HmsResult<MpesaPayment> {
        let settings = self.cfg.push()?;
        let bill = self.get_bill(bill_id)?;
        if bill.status == BillStatus::Cancelled {
            return Err(HmsError::Validation("bill is cancelled".into()));
        }
        let balance = bill.balance_due();
        if balance <= Decimal::ZERO {
            return Err(HmsError::Validation(format!(
                "bill {} has no balance due",
                bill.bill_number
            )));
        }
        let amount = balance.ceil();

        let request = StkPushRequest {
            shortcode: settings.shortcode().to_owned(),
            passkey: settings.passkey().to_owned(),
            phone_number: phone.as_str().to_owned(),
            amount,
            callback_url: settings.callback_url().to_owned(),
            account_reference: bill.bill_number.clone(),
            description: STK_PUSH_DESCRIPTION.to_owned(),
        };

        // The database lock is not held across the gateway call.
        let response = self.gateway.request_push(&request).await.map_err(|e| {
            tracing::warn!(bill_id, error = %e, "stk push failed");
            e
        })?;
        if !response.is_accepted() {
            tracing::warn!(
                bill_id,
                code = %response.response_code,
                description = %response.response_description,
                "stk push rejected"
            );
            return Err(GatewayError::Rejected(response.response_description).into());
        }

        self.db.write(|tx| {
            let current = load_bill(tx, bill_id)?;
            if current.status == BillStatus::Cancelled {
                tracing::warn!(
                    bill_id,
                    checkout_request_id = %response.checkout_request_id,
                    "bill cancelled while the push was in flight"
                );
            }
            ensure_transition(
                "payment",
                current.payment_status,
                PaymentStatus::Pending,
                current.payment_status.can_transition_to(PaymentStatus::Pending),
            )?;
            tx.execute(
                "INSERT INTO mpesa_payments (bill_id, phone_number, amount, balance_due,
                     checkout_request_id, merchant_request_id, response_code,
                     response_description, customer_message, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    bill_id,
                    request.phone_number,
                    money_to_sql(amount),
                    money_to_sql(balance),
                    response.checkout_request_id,
                    response.merchant_request_id,
                    response.response_code,
                    response.response_description,
                    response.customer_message,
                    MpesaRequestState::AwaitingCallback,
                    ts_to_sql(now),
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE bills SET payment_status = ?1 WHERE id = ?2",
                params![PaymentStatus::Pending, bill_id],
            )?;
            tracing::info!(
                bill_id,
                checkout_request_id = %response.checkout_request_id,
                %amount,
                "stk push accepted"
            );
            load_mpesa(tx, "id = ?1", &id)?
                .ok_or_else(|| HmsError::not_found("mpesa payment", id))
        })
    }

    /// Settle a pending request from the gateway's callback.
    ///
    /// Unknown and already-settled checkout ids are logged and reported, never raised, so the
    /// callback endpoint can always acknowledge.
    pub fn reconcile_callback(
        &self,
        checkout_request_id: &str,
        result_code: i64,
        receipt_number: Option<&str>,
        now: DateTime<Utc>,
    ) -> HmsResult<CallbackOutcome> {
        self.db.write(|tx| {
            let Some(request) = load_mpesa(tx, "checkout_request_id = ?1", &checkout_request_id)?
            else {
                tracing::warn!(checkout_request_id, result_code, "callback for unknown request");
                return Ok(CallbackOutcome::Unmatched);
            };
            if request.state.is_settled() {
                tracing::warn!(
                    checkout_request_id,
                    result_code,
                    state = %request.state,
                    "duplicate callback ignored"
                );
                return Ok(CallbackOutcome::Duplicate);
            }

            let mut bill = load_bill(tx, request.bill_id)?;
            let success = result_code == 0;
            let mut rounding = Decimal::ZERO;
            let state = if success {
                bill.paid_amount += request.balance_due;
                rounding = request.amount - request.balance_due;
                if rounding > Decimal::ZERO {
                    tracing::info!(
                        bill_id = bill.id,
                        %rounding,
                        "collected above the balance due to whole-shilling rounding"
                    );
                }
                bill.payment_status = PaymentStatus::Successful;
                if bill.status == BillStatus::Cancelled {
                    tracing::warn!(bill_id = bill.id, "payment settled on a cancelled bill");
                } else {
                    bill.status = bill.settled_status();
                }
                if bill.overpayment() > Decimal::ZERO {
                    tracing::warn!(
                        bill_id = bill.id,
                        overpayment = %bill.overpayment(),
                        "bill overpaid"
                    );
                }
                let reference = receipt_number.unwrap_or(checkout_request_id);
                insert_payment(
                    tx,
                    bill.id,
                    request.balance_due,
                    PaymentMethod::Online,
                    reference,
                    "M-Pesa STK push",
                    now,
                )?;
                MpesaRequestState::SettledSuccess
            } else {
                bill.payment_status = PaymentStatus::Failed;
                MpesaRequestState::SettledFailed
            };

            tx.execute(
                "UPDATE bills SET paid_amount = ?1, status = ?2, payment_status = ?3 WHERE id = ?4",
                params![
                    money_to_sql(bill.paid_amount),
                    bill.status,
                    bill.payment_status,
                    bill.id
                ],
            )?;
            tx.execute(
                "UPDATE mpesa_payments SET state = ?1, result_code = ?2, settled_at = ?3 WHERE id = ?4",
                params![state, result_code, ts_to_sql(now), request.id],
            )?;
            tracing::info!(
                checkout_request_id,
                bill_id = bill.id,
                result_code,
                status = %bill.status,
                "callback reconciled"
            );
            Ok(CallbackOutcome::Settled {
                success,
                bill,
                rounding,
            })
        })
    }
}

fn validate_item(item: &NewBillItem) -> HmsResult<()> {
    if item.quantity == 0 {
        return Err(HmsError::Validation("item quantity must be positive".into()));
    }
    validate_positive_amount("unit price", item.unit_price)
}

fn insert_item(conn: &Connection, bill_id: i64, item: &NewBillItem) -> HmsResult<()> {
    let amount = Decimal::from(item.quantity) * item.unit_price;
    conn.execute(
        "INSERT INTO bill_items (bill_id, description, quantity, unit_price, amount)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            bill_id,
            item.description.as_str(),
            item.quantity,
            money_to_sql(item.unit_price),
            money_to_sql(amount),
        ],
    )?;
    Ok(())
}

fn insert_payment(
    conn: &Connection,
    bill_id: i64,
    amount: Decimal,
    method: PaymentMethod,
    reference_number: &str,
    notes: &str,
    now: DateTime<Utc>,
) -> HmsResult<()> {
    conn.execute(
        "INSERT INTO payments (bill_id, amount, payment_date, method, reference_number, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            bill_id,
            money_to_sql(amount),
            ts_to_sql(now),
            method,
            reference_number,
            notes
        ],
    )?;
    Ok(())
}

fn recompute_total(conn: &Connection, bill_id: i64) -> HmsResult<()> {
    let mut stmt = conn.prepare("SELECT amount FROM bill_items WHERE bill_id = ?1")?;
    let amounts = stmt.query_map(params![bill_id], |row| money_col(row, 0))?;
    let mut total = Decimal::ZERO;
    for amount in amounts {
        total += amount?;
    }
    conn.execute(
        "UPDATE bills SET total_amount = ?1 WHERE id = ?2",
        params![money_to_sql(total), bill_id],
    )?;
    Ok(())
}

fn load_bill(conn: &Connection, id: i64) -> HmsResult<Bill> {
    conn.query_row(
        "SELECT id, bill_number, patient_id, bill_date, due_date, status, payment_status,
             total_amount, paid_amount, notes, created_by
         FROM bills WHERE id = ?1",
        params![id],
        |row| {
            Ok(Bill {
                id: row.get(0)?,
                bill_number: row.get(1)?,
                patient_id: row.get(2)?,
                bill_date: date_col(row, 3)?,
                due_date: date_col(row, 4)?,
                status: row.get(5)?,
                payment_status: row.get(6)?,
                total_amount: money_col(row, 7)?,
                paid_amount: money_col(row, 8)?,
                notes: row.get(9)?,
                created_by: row.get(10)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| HmsError::not_found("bill", id))
}

/// Validate a printed bill number.
pub fn parse_bill_number(input: &str) -> HmsResult<DocumentNumber> {
    Ok(DocumentNumber::parse(DocumentKind::Bill, input)?)
}

const SELECT_MPESA: &str = "SELECT id, bill_id, phone_number, amount, balance_due,
    checkout_request_id, merchant_request_id, response_code, response_description,
    customer_message, state, result_code, created_at, settled_at FROM mpesa_payments";

fn map_mpesa(row: &rusqlite::Row<'_>) -> rusqlite::Result<MpesaPayment> {
    Ok(MpesaPayment {
        id: row.get(0)?,
        bill_id: row.get(1)?,
        phone_number: row.get(2)?,
        amount: money_col(row, 3)?,
        balance_due: money_col(row, 4)?,
        checkout_request_id: row.get(5)?,
        merchant_request_id: row.get(6)?,
        response_code: row.get(7)?,
        response_description: row.get(8)?,
        customer_message: row.get(9)?,
        state: row.get(10)?,
        result_code: row.get(11)?,
        created_at: ts_col(row, 12)?,
        settled_at: opt_ts_col(row, 13)?,
    })
}

fn load_mpesa(
    conn: &Connection,
    condition: &str,
    key: &dyn rusqlite::ToSql,
) -> HmsResult<Option<MpesaPayment>> {
    Ok(conn
        .query_row(
            &format!("{SELECT_MPESA} WHERE {condition}"),
            [key],
            map_mpesa,
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::gateway::fake::{accepted, FakeGateway};
    use super::gateway::StkPushResponse;
    use super::*;
    use async_trait::async_trait;
    use crate::config::PushSettings;
    use crate::records::fixtures::{seed, Seed};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::path::PathBuf;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 11, 0, 0).unwrap()
    }

    fn config() -> Arc<CoreConfig> {
        let push = PushSettings::new("174379", "passkey", "https://hms.example.org/mpesa/callback")
            .expect("push settings should be valid");
        Arc::new(CoreConfig::new(PathBuf::from(":memory:"), 30, Some(push)).unwrap())
    }

    /// Accepts the push but cancels the bill before answering, as a clerk racing the gateway would.
    struct CancellingGateway {
        db: Arc<Database>,
    }

    #[async_trait]
    impl PaymentGateway for CancellingGateway {
        async fn request_push(
            &self,
            request: &StkPushRequest,
        ) -> Result<StkPushResponse, GatewayError> {
            self.db
                .write(|tx| {
                    tx.execute(
                        "UPDATE bills SET status = ?1 WHERE bill_number = ?2",
                        params![BillStatus::Cancelled, request.account_reference],
                    )?;
                    Ok(())
                })
                .expect("cancel should succeed");
            Ok(accepted("ws_CO_LATE"))
        }
    }

    fn setup(gateway: FakeGateway) -> (BillingService, Arc<FakeGateway>, Seed) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let seed = seed(&db);
        let gateway = Arc::new(gateway);
        let service = BillingService::new(config(), db, gateway.clone());
        (service, gateway, seed)
    }

    fn item(description: &str, quantity: u32, unit_price: Decimal) -> NewBillItem {
        NewBillItem {
            description: NonEmptyText::new(description).unwrap(),
            quantity,
            unit_price,
        }
    }

    fn bill_of(service: &BillingService, seed: &Seed, total: Decimal) -> Bill {
        service
            .create_bill(
                NewBill {
                    patient_id: seed.patient_id,
                    bill_number: None,
                    due_date: NaiveDate::from_ymd_opt(2026, 11, 18).unwrap(),
                    notes: String::new(),
                    items: vec![item("Consultation", 1, total)],
                },
                seed.doctor_id,
                now(),
            )
            .expect("create_bill should succeed")
    }

    fn phone() -> PhoneNumber {
        PhoneNumber::parse("0712345678").unwrap()
    }

    #[tokio::test]
    async fn test_successful_push_then_callback_pays_bill() {
        let (service, gateway, seed) = setup(FakeGateway::accepting("ws_CO_001"));
        let bill = bill_of(&service, &seed, dec!(1000.00));
        assert_eq!(bill.bill_number, "BILL2610180001");

        let request = service
            .initiate_push(bill.id, &phone(), now())
            .await
            .expect("push should succeed");
        assert_eq!(request.amount, dec!(1000));
        assert_eq!(request.state, MpesaRequestState::AwaitingCallback);
        assert_eq!(
            service.get_bill(bill.id).unwrap().payment_status,
            PaymentStatus::Pending
        );

        let sent = gateway.seen.lock().unwrap()[0].clone();
        assert_eq!(sent.account_reference, "BILL2610180001");
        assert_eq!(sent.description, "Hospital Bill Payment");
        assert_eq!(sent.phone_number, "254712345678");

        let outcome = service
            .reconcile_callback("ws_CO_001", 0, Some("NLJ7RT61SV"), now())
            .expect("reconcile should succeed");
        let CallbackOutcome::Settled {
            success,
            bill,
            rounding,
        } = outcome
        else {
            panic!("expected settlement, got {outcome:?}");
        };
        assert!(success);
        assert_eq!(rounding, Decimal::ZERO);
        assert_eq!(bill.paid_amount, dec!(1000.00));
        assert_eq!(bill.status, BillStatus::Paid);
        assert_eq!(bill.payment_status, PaymentStatus::Successful);
        assert_eq!(bill.balance_due(), Decimal::ZERO);

        let payments = service.payments(bill.id).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].reference_number, "NLJ7RT61SV");
        assert_eq!(payments[0].method, PaymentMethod::Online);
    }

    #[tokio::test]
    async fn test_failed_callback_leaves_amounts() {
        let (service, _, seed) = setup(FakeGateway::accepting("ws_CO_002"));
        let bill = bill_of(&service, &seed, dec!(1000.00));
        service.initiate_push(bill.id, &phone(), now()).await.unwrap();

        let outcome = service
            .reconcile_callback("ws_CO_002", 1, None, now())
            .unwrap();
        let CallbackOutcome::Settled {
            success,
            bill,
            rounding,
        } = outcome
        else {
            panic!("expected settlement");
        };
        assert!(!success);
        assert_eq!(rounding, Decimal::ZERO);
        assert_eq!(bill.paid_amount, Decimal::ZERO);
        assert_eq!(bill.status, BillStatus::Pending);
        assert_eq!(bill.payment_status, PaymentStatus::Failed);
        assert_eq!(
            service.mpesa_requests(bill.id).unwrap()[0].state,
            MpesaRequestState::SettledFailed
        );
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_callbacks_change_nothing() {
        let (service, _, seed) = setup(FakeGateway::accepting("ws_CO_003"));
        let bill = bill_of(&service, &seed, dec!(1000.00));

        assert_eq!(
            service.reconcile_callback("unknown-id", 0, None, now()).unwrap(),
            CallbackOutcome::Unmatched
        );
        assert_eq!(service.get_bill(bill.id).unwrap(), bill);

        service.initiate_push(bill.id, &phone(), now()).await.unwrap();
        service.reconcile_callback("ws_CO_003", 0, None, now()).unwrap();
        let settled = service.get_bill(bill.id).unwrap();

        assert_eq!(
            service.reconcile_callback("ws_CO_003", 0, None, now()).unwrap(),
            CallbackOutcome::Duplicate
        );
        assert_eq!(
            service.reconcile_callback("ws_CO_003", 1, None, now()).unwrap(),
            CallbackOutcome::Duplicate
        );
        assert_eq!(service.get_bill(bill.id).unwrap(), settled);
        assert_eq!(settled.paid_amount, dec!(1000.00));
    }

    #[tokio::test]
    async fn test_partial_payment_then_push_for_balance() {
        let (service, gateway, seed) = setup(FakeGateway::accepting("ws_CO_004"));
        let bill = bill_of(&service, &seed, dec!(1000.00));

        let after_cash = service
            .record_payment(
                bill.id,
                NewPayment {
                    amount: dec!(400.00),
                    method: PaymentMethod::Cash,
                    reference_number: String::new(),
                    notes: String::new(),
                },
                now(),
            )
            .expect("cash payment should succeed");
        assert_eq!(after_cash.status, BillStatus::Partial);

        service.initiate_push(bill.id, &phone(), now()).await.unwrap();
        assert_eq!(gateway.seen.lock().unwrap()[0].amount, dec!(600));

        let CallbackOutcome::Settled { bill, .. } = service
            .reconcile_callback("ws_CO_004", 0, None, now())
            .unwrap()
        else {
            panic!("expected settlement");
        };
        assert_eq!(bill.status, BillStatus::Paid);
        assert_eq!(bill.paid_amount, dec!(1000.00));
    }

    #[tokio::test]
    async fn test_rejected_push_changes_nothing() {
        let mut rejected = accepted("ws_CO_005");
        rejected.response_code = "1".into();
        rejected.response_description = "Invalid PhoneNumber".into();
        let (service, _, seed) = setup(FakeGateway::replying(vec![Ok(rejected)]));
        let bill = bill_of(&service, &seed, dec!(250.00));

        let err = service
            .initiate_push(bill.id, &phone(), now())
            .await
            .expect_err("rejected push should fail");
        assert!(matches!(&err, HmsError::Gateway(GatewayError::Rejected(msg)) if msg == "Invalid PhoneNumber"));
        assert!(err.is_business_rule());
        assert!(service.mpesa_requests(bill.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_timeout_is_retryable_and_changes_nothing() {
        let (service, _, seed) = setup(FakeGateway::replying(vec![Err(GatewayError::Timeout)]));
        let bill = bill_of(&service, &seed, dec!(250.00));

        let err = service
            .initiate_push(bill.id, &phone(), now())
            .await
            .expect_err("timeout should fail");
        assert!(err.is_retryable());
        assert!(!err.is_business_rule());
        assert_eq!(service.get_bill(bill.id).unwrap(), bill);
    }

    #[tokio::test]
    async fn test_push_requires_balance() {
        let (service, _, seed) = setup(FakeGateway::accepting("ws_CO_006"));
        let bill = bill_of(&service, &seed, dec!(100.00));
        service
            .record_payment(
                bill.id,
                NewPayment {
                    amount: dec!(100.00),
                    method: PaymentMethod::Card,
                    reference_number: "POS-1".into(),
                    notes: String::new(),
                },
                now(),
            )
            .unwrap();

        let err = service.initiate_push(bill.id, &phone(), now()).await.unwrap_err();
        assert!(matches!(err, HmsError::Validation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_pushes_record_overpayment() {
        let (service, _, seed) = setup(FakeGateway::replying(vec![
            Ok(accepted("ws_CO_A")),
            Ok(accepted("ws_CO_B")),
        ]));
        let bill = bill_of(&service, &seed, dec!(500.00));
        service.initiate_push(bill.id, &phone(), now()).await.unwrap();
        service.initiate_push(bill.id, &phone(), now()).await.unwrap();

        service.reconcile_callback("ws_CO_A", 0, None, now()).unwrap();
        let CallbackOutcome::Settled { bill, .. } =
            service.reconcile_callback("ws_CO_B", 0, None, now()).unwrap()
        else {
            panic!("expected settlement");
        };
        assert_eq!(bill.paid_amount, dec!(1000.00));
        assert_eq!(bill.status, BillStatus::Paid);
        assert_eq!(bill.overpayment(), dec!(500.00));
    }

    #[test]
    fn test_manual_overpayment_is_rejected() {
        let (service, _, seed) = setup(FakeGateway::replying(vec![]));
        let bill = bill_of(&service, &seed, dec!(100.00));
        let err = service
            .record_payment(
                bill.id,
                NewPayment {
                    amount: dec!(100.01),
                    method: PaymentMethod::Cash,
                    reference_number: String::new(),
                    notes: String::new(),
                },
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, HmsError::Validation(_)));
        assert_eq!(service.get_bill(bill.id).unwrap().paid_amount, Decimal::ZERO);
    }

    #[test]
    fn test_items_recompute_total_and_balance() {
        let (service, _, seed) = setup(FakeGateway::replying(vec![]));
        let bill = bill_of(&service, &seed, dec!(500.00));
        let bill = service
            .add_item(bill.id, item("Amoxicillin 500mg", 3, dec!(15.50)))
            .expect("add_item should succeed");
        assert_eq!(bill.total_amount, dec!(546.50));
        assert_eq!(bill.balance_due(), dec!(546.50));
        assert_eq!(service.bill_items(bill.id).unwrap().len(), 2);

        let second = bill_of(&service, &seed, dec!(10.00));
        assert_eq!(second.bill_number, "BILL2610180002");
        assert_eq!(parse_bill_number(&second.bill_number).unwrap().sequence(), 2);
    }

    #[test]
    fn test_cancel_is_terminal() {
        let (service, _, seed) = setup(FakeGateway::replying(vec![]));
        let bill = bill_of(&service, &seed, dec!(100.00));
        let cancelled = service.cancel_bill(bill.id).unwrap();
        assert_eq!(cancelled.status, BillStatus::Cancelled);

        assert!(matches!(
            service.cancel_bill(bill.id),
            Err(HmsError::InvalidTransition { entity: "bill", .. })
        ));
        assert!(service
            .add_item(bill.id, item("Late fee", 1, dec!(5.00)))
            .is_err());
    }

    #[tokio::test]
    async fn test_fractional_balance_credits_the_balance_not_the_rounded_amount() {
        let (service, gateway, seed) = setup(FakeGateway::accepting("ws_CO_007"));
        let bill = bill_of(&service, &seed, dec!(100.50));

        let request = service.initiate_push(bill.id, &phone(), now()).await.unwrap();
        assert_eq!(request.amount, dec!(101));
        assert_eq!(request.balance_due, dec!(100.50));
        assert_eq!(gateway.seen.lock().unwrap()[0].amount, dec!(101));

        let outcome = service
            .reconcile_callback("ws_CO_007", 0, Some("NLJ7RT61SX"), now())
            .unwrap();
        let CallbackOutcome::Settled {
            success,
            bill,
            rounding,
        } = outcome
        else {
            panic!("expected settlement, got {outcome:?}");
        };
        assert!(success);
        assert_eq!(rounding, dec!(0.50));
        assert_eq!(bill.paid_amount, dec!(100.50));
        assert_eq!(bill.status, BillStatus::Paid);
        assert_eq!(bill.overpayment(), Decimal::ZERO);
        assert_eq!(service.payments(bill.id).unwrap()[0].amount, dec!(100.50));
    }

    #[tokio::test]
    async fn test_bill_cancelled_during_push_keeps_request_traceable() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let seed = seed(&db);
        let gateway = Arc::new(CancellingGateway { db: db.clone() });
        let service = BillingService::new(config(), db, gateway);
        let bill = bill_of(&service, &seed, dec!(300.00));

        let request = service
            .initiate_push(bill.id, &phone(), now())
            .await
            .expect("accepted push should be stored");
        assert_eq!(request.state, MpesaRequestState::AwaitingCallback);
        assert_eq!(service.get_bill(bill.id).unwrap().status, BillStatus::Cancelled);

        let CallbackOutcome::Settled { bill, .. } = service
            .reconcile_callback("ws_CO_LATE", 0, Some("NLJ7RT61SY"), now())
            .unwrap()
        else {
            panic!("expected settlement");
        };
        assert_eq!(bill.status, BillStatus::Cancelled);
        assert_eq!(bill.paid_amount, dec!(300.00));
        assert_eq!(service.payments(bill.id).unwrap().len(), 1);

        let err = service.initiate_push(bill.id, &phone(), now()).await.unwrap_err();
        assert!(matches!(err, HmsError::Validation(_)));
    }
}
