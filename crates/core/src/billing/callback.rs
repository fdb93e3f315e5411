//! Inbound STK callback body.
//!
//! The gateway posts `{"Body": {"stkCallback": {...}}}`. Only the correlation id and the result
//! code drive reconciliation; the rest is kept for logging and receipts.

use crate::{HmsError, HmsResult};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    /// The M-Pesa receipt number, present on successful payments.
    pub fn receipt_number(&self) -> Option<String> {
        self.callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == "MpesaReceiptNumber")
            .and_then(|item| item.value.as_ref())
            .and_then(|value| value.as_str().map(str::to_owned))
    }
}

/// Parse a raw callback body.
///
/// # Errors
///
/// Returns [`HmsError::Validation`] naming the offending JSON path when the body does not match
/// the callback shape.
pub fn parse_callback(body: &[u8]) -> HmsResult<StkCallback> {
    let mut de = serde_json::Deserializer::from_slice(body);
    let envelope: StkCallbackEnvelope = serde_path_to_error::deserialize(&mut de)
        .map_err(|e| HmsError::Validation(format!("callback body at {}: {}", e.path(), e.inner())))?;
    Ok(envelope.body.stk_callback)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUCCESS: &str = r#"{
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": 1.00},
                        {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                        {"Name": "Balance"},
                        {"Name": "PhoneNumber", "Value": 254708374149}
                    ]
                }
            }
        }
    }"#;

    #[test]
    fn test_parse_successful_callback() {
        let callback = parse_callback(SUCCESS.as_bytes()).expect("parse should succeed");
        assert_eq!(callback.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(callback.result_code, 0);
        assert_eq!(callback.receipt_number().as_deref(), Some("NLJ7RT61SV"));
    }

    #[test]
    fn test_parse_cancelled_callback_without_metadata() {
        let body = br#"{"Body":{"stkCallback":{"MerchantRequestID":"m","CheckoutRequestID":"ws_CO_1","ResultCode":1032,"ResultDesc":"Request cancelled by user"}}}"#;
        let callback = parse_callback(body).expect("parse should succeed");
        assert_eq!(callback.result_code, 1032);
        assert!(callback.receipt_number().is_none());
    }

    #[test]
    fn test_parse_error_names_the_path() {
        let body = br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_CO_1","ResultCode":"zero"}}}"#;
        let err = parse_callback(body).expect_err("string result code should fail");
        match err {
            HmsError::Validation(msg) => assert!(msg.contains("Body.stkCallback.ResultCode"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
