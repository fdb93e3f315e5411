//! Wire shapes of the Daraja STK push API.

use crate::MpesaError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, FixedOffset, Utc};
use hms_core::{StkPushRequest, StkPushResponse};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Daraja timestamps are East Africa Time.
const EAT_OFFSET_SECS: i32 = 3 * 3600;

const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";

/// `YYYYMMDDHHMMSS` in East Africa Time.
pub fn timestamp(now: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(EAT_OFFSET_SECS) {
        Some(eat) => now.with_timezone(&eat).format("%Y%m%d%H%M%S").to_string(),
        None => now.format("%Y%m%d%H%M%S").to_string(),
    }
}

/// `base64(shortcode + passkey + timestamp)`.
pub fn password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushPayload {
    pub business_short_code: String,
    pub password: String,
    pub timestamp: String,
    pub transaction_type: &'static str,
    /// Whole shillings.
    pub amount: u64,
    pub party_a: String,
    pub party_b: String,
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    pub account_reference: String,
    pub transaction_desc: String,
}

impl StkPushPayload {
    /// # Errors
    ///
    /// Returns [`MpesaError::Payload`] when the amount is not a positive whole number.
    pub fn build(request: &StkPushRequest, now: DateTime<Utc>) -> Result<Self, MpesaError> {
        if !request.amount.fract().is_zero() {
            return Err(MpesaError::Payload(format!(
                "amount {} is not whole shillings",
                request.amount
            )));
        }
        let amount = request
            .amount
            .to_u64()
            .filter(|a| *a > 0)
            .ok_or_else(|| MpesaError::Payload(format!("amount {} is not positive", request.amount)))?;

        let timestamp = timestamp(now);
        Ok(Self {
            business_short_code: request.shortcode.clone(),
            password: password(&request.shortcode, &request.passkey, &timestamp),
            timestamp,
            transaction_type: TRANSACTION_TYPE,
            amount,
            party_a: request.phone_number.clone(),
            party_b: request.shortcode.clone(),
            phone_number: request.phone_number.clone(),
            callback_url: request.callback_url.clone(),
            account_reference: request.account_reference.clone(),
            transaction_desc: request.description.clone(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenReply {
    pub access_token: String,
    /// Seconds, sent as a string.
    #[serde(default)]
    pub expires_in: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PushReply {
    Answered {
        #[serde(rename = "MerchantRequestID")]
        merchant_request_id: String,
        #[serde(rename = "CheckoutRequestID")]
        checkout_request_id: String,
        #[serde(rename = "ResponseCode")]
        response_code: String,
        #[serde(rename = "ResponseDescription", default)]
        response_description: String,
        #[serde(rename = "CustomerMessage", default)]
        customer_message: String,
    },
    Failed {
        #[serde(rename = "errorCode", default)]
        error_code: Option<String>,
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

/// Interpret a push response body.
///
/// An answered push is returned as-is, including non-zero response codes; callers decide
/// acceptance. An `errorMessage` body is a rejection.
pub fn parse_push_reply(body: &[u8]) -> Result<StkPushResponse, MpesaError> {
    let reply: PushReply =
        serde_json::from_slice(body).map_err(|e| MpesaError::Decode(e.to_string()))?;
    match reply {
        PushReply::Answered {
            merchant_request_id,
            checkout_request_id,
            response_code,
            response_description,
            customer_message,
        } => Ok(StkPushResponse {
            response_code,
            checkout_request_id,
            merchant_request_id,
            response_description,
            customer_message,
        }),
        PushReply::Failed {
            error_code,
            error_message,
        } => Err(MpesaError::Rejected(match error_code {
            Some(code) => format!("{code}: {error_message}"),
            None => error_message,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn request() -> StkPushRequest {
        StkPushRequest {
            shortcode: "174379".into(),
            passkey: "bfb279f9aa9bdbcf158e97dd71a467cd".into(),
            phone_number: "254712345678".into(),
            amount: dec!(600),
            callback_url: "https://hms.example/mpesa/callback".into(),
            account_reference: "BILL2610180001".into(),
            description: "Hospital Bill Payment".into(),
        }
    }

    #[test]
    fn test_timestamp_is_east_africa_time() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 22, 30, 5).unwrap();
        assert_eq!(timestamp(now), "20261019013005");
    }

    #[test]
    fn test_password_concatenates_before_encoding() {
        assert_eq!(password("1", "2", "3"), STANDARD.encode("123"));
    }

    #[test]
    fn test_payload_field_names_and_amount() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        let payload = StkPushPayload::build(&request(), now).expect("build should succeed");
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["BusinessShortCode"], "174379");
        assert_eq!(json["Timestamp"], "20261018120000");
        assert_eq!(json["TransactionType"], "CustomerPayBillOnline");
        assert_eq!(json["Amount"], 600);
        assert_eq!(json["PartyA"], "254712345678");
        assert_eq!(json["PartyB"], "174379");
        assert_eq!(json["CallBackURL"], "https://hms.example/mpesa/callback");
        assert_eq!(json["AccountReference"], "BILL2610180001");
        assert_eq!(
            json["Password"],
            password("174379", "bfb279f9aa9bdbcf158e97dd71a467cd", "20261018120000")
        );
    }

    #[test]
    fn test_fractional_amount_is_refused() {
        let mut req = request();
        req.amount = dec!(600.50);
        assert!(matches!(
            StkPushPayload::build(&req, Utc::now()),
            Err(MpesaError::Payload(_))
        ));
    }

    #[test]
    fn test_parse_answered_reply() {
        let body = br#"{"MerchantRequestID":"29115-34620561-1","CheckoutRequestID":"ws_CO_1","ResponseCode":"0","ResponseDescription":"Success. Request accepted for processing","CustomerMessage":"Success. Request accepted for processing"}"#;
        let reply = parse_push_reply(body).expect("parse should succeed");
        assert!(reply.is_accepted());
        assert_eq!(reply.checkout_request_id, "ws_CO_1");
    }

    #[test]
    fn test_parse_error_reply_is_rejection() {
        let body = br#"{"requestId":"1-2","errorCode":"400.002.02","errorMessage":"Bad Request - Invalid PhoneNumber"}"#;
        match parse_push_reply(body) {
            Err(MpesaError::Rejected(msg)) => {
                assert_eq!(msg, "400.002.02: Bad Request - Invalid PhoneNumber")
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn test_parse_garbage_is_decode_error() {
        assert!(matches!(
            parse_push_reply(b"<html>bad gateway</html>"),
            Err(MpesaError::Decode(_))
        ));
    }
}
