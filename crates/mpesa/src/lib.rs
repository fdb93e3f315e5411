//! # HMS M-Pesa
//!
//! HTTP client for the Safaricom Daraja STK push API, exposed to billing as a
//! [`PaymentGateway`]. Tokens are fetched with client credentials and cached until shortly
//! before they expire.

pub mod payload;

use async_trait::async_trait;
use chrono::Utc;
use hms_core::{GatewayError, PaymentGateway, StkPushRequest, StkPushResponse};
use payload::{parse_push_reply, StkPushPayload, TokenReply};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub use payload::{password, timestamp};

/// Safaricom sandbox, used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://sandbox.safaricom.co.ke";

const TOKEN_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";
const PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";

/// Assumed token lifetime when the reply omits `expires_in`.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3599);
/// Tokens are refreshed this long before their stated expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum MpesaError {
    #[error("invalid gateway configuration: {0}")]
    Config(String),
    #[error("cannot build push payload: {0}")]
    Payload(String),
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("gateway did not answer in time")]
    Timeout,
    #[error("http error: {0}")]
    Http(reqwest::Error),
    #[error("unexpected gateway reply: {0}")]
    Decode(String),
}

pub type MpesaResult<T> = std::result::Result<T, MpesaError>;

impl From<reqwest::Error> for MpesaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MpesaError::Timeout
        } else {
            MpesaError::Http(err)
        }
    }
}

impl From<MpesaError> for GatewayError {
    fn from(err: MpesaError) -> Self {
        match err {
            MpesaError::Timeout => GatewayError::Timeout,
            MpesaError::Rejected(msg) | MpesaError::Payload(msg) => GatewayError::Rejected(msg),
            MpesaError::Config(msg) => GatewayError::Rejected(msg),
            MpesaError::Http(e) => GatewayError::Transport(e.to_string()),
            MpesaError::Decode(msg) => GatewayError::Transport(msg),
        }
    }
}

/// Credentials and endpoint for the Daraja API.
#[derive(Clone)]
pub struct DarajaConfig {
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
    timeout: Duration,
}

impl std::fmt::Debug for DarajaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DarajaConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DarajaConfig {
    pub fn new(
        base_url: &str,
        consumer_key: &str,
        consumer_secret: &str,
        timeout: Duration,
    ) -> MpesaResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(MpesaError::Config(format!(
                "base URL must be http(s): {base_url}"
            )));
        }
        if consumer_key.trim().is_empty() || consumer_secret.trim().is_empty() {
            return Err(MpesaError::Config(
                "consumer key and secret are required".into(),
            ));
        }
        if timeout.is_zero() {
            return Err(MpesaError::Config("timeout must be positive".into()));
        }
        Ok(Self {
            base_url: base_url.to_owned(),
            consumer_key: consumer_key.trim().to_owned(),
            consumer_secret: consumer_secret.trim().to_owned(),
            timeout,
        })
    }

    /// Build from optional environment values.
    ///
    /// Returns `Ok(None)` when neither credential is set. `base_url` falls back to
    /// [`DEFAULT_BASE_URL`].
    pub fn from_env_values(
        base_url: Option<String>,
        consumer_key: Option<String>,
        consumer_secret: Option<String>,
        timeout: Duration,
    ) -> MpesaResult<Option<Self>> {
        let set = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        match (set(consumer_key), set(consumer_secret)) {
            (None, None) => Ok(None),
            (Some(key), Some(secret)) => {
                let base = set(base_url).unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
                Self::new(&base, &key, &secret, timeout).map(Some)
            }
            _ => Err(MpesaError::Config(
                "MPESA_CONSUMER_KEY and MPESA_CONSUMER_SECRET must be set together".into(),
            )),
        }
    }
}

struct CachedToken {
    value: String,
    refresh_after: Instant,
}

/// Daraja client. One instance is shared by every request handler.
pub struct DarajaClient {
    cfg: DarajaConfig,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for DarajaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DarajaClient")
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

impl DarajaClient {
    pub fn new(cfg: DarajaConfig) -> MpesaResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(MpesaError::Http)?;
        Ok(Self {
            cfg,
            http,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> MpesaResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_after {
                return Ok(token.value.clone());
            }
        }

        let reply: TokenReply = self
            .http
            .get(format!("{}{}", self.cfg.base_url, TOKEN_PATH))
            .basic_auth(&self.cfg.consumer_key, Some(&self.cfg.consumer_secret))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MpesaError::Timeout
                } else {
                    MpesaError::Decode(e.to_string())
                }
            })?;

        let ttl = reply
            .expires_in
            .as_deref()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        tracing::debug!(ttl_secs = ttl.as_secs(), "daraja token refreshed");

        *cached = Some(CachedToken {
            value: reply.access_token.clone(),
            refresh_after: Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_MARGIN),
        });
        Ok(reply.access_token)
    }

    /// Send one STK push and return the gateway's synchronous answer.
    pub async fn push(&self, request: &StkPushRequest) -> MpesaResult<StkPushResponse> {
        let payload = StkPushPayload::build(request, Utc::now())?;
        let token = self.access_token().await?;

        let response = self
            .http
            .post(format!("{}{}", self.cfg.base_url, PUSH_PATH))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        match parse_push_reply(&body) {
            Err(MpesaError::Decode(msg)) if !status.is_success() => {
                tracing::warn!(%status, "daraja push failed without a readable body");
                Err(MpesaError::Decode(format!("{status}: {msg}")))
            }
            other => other,
        }
    }
}

#[async_trait]
impl PaymentGateway for DarajaClient {
    async fn request_push(
        &self,
        request: &StkPushRequest,
    ) -> Result<StkPushResponse, GatewayError> {
        self.push(request).await.map_err(GatewayError::from)
    }
}
