//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services, so
//! request handling never reads process-wide environment variables. The binaries own the
//! environment lookups; this module only validates the values they hand over.

use crate::constants::{DEFAULT_DATABASE_PATH, DEFAULT_GATEWAY_TIMEOUT_SECS, DEFAULT_NEAR_EXPIRY_DAYS};
use crate::{HmsError, HmsResult};
use hms_types::NonEmptyText;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Merchant settings sent with every STK push.
#[derive(Clone, Debug)]
pub struct PushSettings {
    shortcode: NonEmptyText,
    passkey: NonEmptyText,
    callback_url: String,
}

impl PushSettings {
    /// Create push settings.
    ///
    /// # Errors
    ///
    /// Returns [`HmsError::Config`] if the shortcode is not numeric or the callback URL is not
    /// an absolute `http(s)` URL.
    pub fn new(shortcode: &str, passkey: &str, callback_url: &str) -> HmsResult<Self> {
        let shortcode = NonEmptyText::new(shortcode)
            .map_err(|_| HmsError::Config("MPESA_SHORTCODE cannot be empty".into()))?;
        if !shortcode.as_str().bytes().all(|b| b.is_ascii_digit()) {
            return Err(HmsError::Config("MPESA_SHORTCODE must be numeric".into()));
        }

        let passkey = NonEmptyText::new(passkey)
            .map_err(|_| HmsError::Config("MPESA_PASSKEY cannot be empty".into()))?;

        let callback_url = callback_url.trim();
        if !(callback_url.starts_with("https://") || callback_url.starts_with("http://")) {
            return Err(HmsError::Config(
                "MPESA_CALLBACK_URL must be an absolute http(s) URL".into(),
            ));
        }

        Ok(Self {
            shortcode,
            passkey,
            callback_url: callback_url.to_owned(),
        })
    }

    pub fn shortcode(&self) -> &str {
        self.shortcode.as_str()
    }

    pub fn passkey(&self) -> &str {
        self.passkey.as_str()
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    database_path: PathBuf,
    near_expiry_days: u32,
    push: Option<PushSettings>,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// `push` may be `None` for tools that never collect payments (the CLI, batch jobs).
    pub fn new(
        database_path: PathBuf,
        near_expiry_days: u32,
        push: Option<PushSettings>,
    ) -> HmsResult<Self> {
        if database_path.as_os_str().is_empty() {
            return Err(HmsError::Config("database path cannot be empty".into()));
        }
        if near_expiry_days == 0 {
            return Err(HmsError::Config(
                "near-expiry window must be at least one day".into(),
            ));
        }

        Ok(Self {
            database_path,
            near_expiry_days,
            push,
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn near_expiry_days(&self) -> u32 {
        self.near_expiry_days
    }

    /// Push settings, or a configuration error when payments were not configured.
    pub fn push(&self) -> HmsResult<&PushSettings> {
        self.push.as_ref().ok_or_else(|| {
            HmsError::Config("mobile-money push settings are not configured".into())
        })
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve the database path from an optional string value, falling back to
/// [`DEFAULT_DATABASE_PATH`].
pub fn database_path_from_env_value(value: Option<String>) -> PathBuf {
    PathBuf::from(trimmed(value).unwrap_or_else(|| DEFAULT_DATABASE_PATH.into()))
}

/// Parse the near-expiry window (days) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_NEAR_EXPIRY_DAYS`].
pub fn near_expiry_days_from_env_value(value: Option<String>) -> HmsResult<u32> {
    match trimmed(value) {
        None => Ok(DEFAULT_NEAR_EXPIRY_DAYS),
        Some(v) => v
            .parse::<u32>()
            .map_err(|_| HmsError::Config(format!("HMS_NEAR_EXPIRY_DAYS is not a number: {v}"))),
    }
}

/// Parse the outbound gateway timeout (seconds) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_GATEWAY_TIMEOUT_SECS`].
pub fn gateway_timeout_from_env_value(value: Option<String>) -> HmsResult<Duration> {
    let secs = match trimmed(value) {
        None => DEFAULT_GATEWAY_TIMEOUT_SECS,
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| HmsError::Config(format!("MPESA_TIMEOUT_SECS is not a number: {v}")))?,
    };
    if secs == 0 {
        return Err(HmsError::Config("MPESA_TIMEOUT_SECS must be positive".into()));
    }
    Ok(Duration::from_secs(secs))
}

/// Build [`PushSettings`] from the three optional environment values.
///
/// Returns `Ok(None)` when none of them is set, so deployments without mobile money still
/// start. Setting only some of them is a configuration error.
pub fn push_settings_from_env_values(
    shortcode: Option<String>,
    passkey: Option<String>,
    callback_url: Option<String>,
) -> HmsResult<Option<PushSettings>> {
    match (trimmed(shortcode), trimmed(passkey), trimmed(callback_url)) {
        (None, None, None) => Ok(None),
        (Some(s), Some(p), Some(c)) => PushSettings::new(&s, &p, &c).map(Some),
        _ => Err(HmsError::Config(
            "MPESA_SHORTCODE, MPESA_PASSKEY and MPESA_CALLBACK_URL must be set together".into(),
        )),
    }
}
