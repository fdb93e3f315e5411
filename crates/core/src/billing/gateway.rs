//! Outbound mobile-money push contract.
//!
//! Billing only sees this trait. The HTTP protocol (token exchange, password derivation) lives
//! in the `hms-mpesa` crate, and tests substitute an in-process fake.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One STK push as the gateway needs it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StkPushRequest {
    pub shortcode: String,
    pub passkey: String,
    /// Normalised `2547XXXXXXXX` form.
    pub phone_number: String,
    pub amount: Decimal,
    pub callback_url: String,
    pub account_reference: String,
    pub description: String,
}

/// The gateway's synchronous answer to a push.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StkPushResponse {
    pub response_code: String,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub response_description: String,
    pub customer_message: String,
}

impl StkPushResponse {
    pub fn is_accepted(&self) -> bool {
        self.response_code == crate::constants::GATEWAY_ACCEPTED_CODE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The gateway answered and refused the request.
    #[error("push rejected: {0}")]
    Rejected(String),
    /// No answer within the configured timeout. The push may or may not have reached the phone.
    #[error("gateway did not answer in time")]
    Timeout,
    #[error("gateway unreachable: {0}")]
    Transport(String),
}

impl GatewayError {
    /// Timeouts and transport failures are uncertain outcomes; a rejection is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout | GatewayError::Transport(_))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_push(&self, request: &StkPushRequest)
        -> Result<StkPushResponse, GatewayError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Scripted gateway that records every request it receives.
    pub(crate) struct FakeGateway {
        replies: Mutex<Vec<Result<StkPushResponse, GatewayError>>>,
        pub(crate) seen: Mutex<Vec<StkPushRequest>>,
    }

    impl FakeGateway {
        pub(crate) fn replying(replies: Vec<Result<StkPushResponse, GatewayError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn accepting(checkout_request_id: &str) -> Self {
            Self::replying(vec![Ok(accepted(checkout_request_id))])
        }
    }

    pub(crate) fn accepted(checkout_request_id: &str) -> StkPushResponse {
        StkPushResponse {
            response_code: "0".into(),
            checkout_request_id: checkout_request_id.into(),
            merchant_request_id: format!("mr-{checkout_request_id}"),
            response_description: "Success. Request accepted for processing".into(),
            customer_message: "Success. Request accepted for processing".into(),
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn request_push(
            &self,
            request: &StkPushRequest,
        ) -> Result<StkPushResponse, GatewayError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(GatewayError::Transport("no scripted reply".into())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::Timeout.is_retryable());
        assert!(GatewayError::Transport("connection reset".into()).is_retryable());
        assert!(!GatewayError::Rejected("Invalid PhoneNumber".into()).is_retryable());
    }

    #[test]
    fn test_only_code_zero_is_accepted() {
        let mut response = fake::accepted("ws_CO_1");
        assert!(response.is_accepted());
        response.response_code = "1".into();
        assert!(!response.is_accepted());
    }
}
