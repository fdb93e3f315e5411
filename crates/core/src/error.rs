use crate::billing::gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum HmsError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("scheduling conflict: {0}")]
    Conflict(String),
    #[error("quantity {quantity} has the wrong sign for a {kind} transaction")]
    InvalidQuantitySign { kind: String, quantity: i64 },
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },
    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("duplicate {0}")]
    Duplicate(String),
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("identifier error: {0}")]
    Id(#[from] hms_ids::IdError),
    #[error("invalid text: {0}")]
    Text(#[from] hms_types::TextError),
    #[error("database error: {0}")]
    Database(rusqlite::Error),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HmsError {
    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        HmsError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// True when the write was rejected by a business rule rather than by infrastructure.
    ///
    /// Presentation layers use this to choose between "fix the input" and "try again later".
    pub fn is_business_rule(&self) -> bool {
        match self {
            HmsError::Validation(_)
            | HmsError::Conflict(_)
            | HmsError::InvalidQuantitySign { .. }
            | HmsError::InsufficientStock { .. }
            | HmsError::InvalidTransition { .. }
            | HmsError::NotFound { .. }
            | HmsError::Duplicate(_)
            | HmsError::Text(_) => true,
            HmsError::Gateway(e) => !e.is_retryable(),
            HmsError::Id(_)
            | HmsError::Database(_)
            | HmsError::StorageUnavailable(_)
            | HmsError::Config(_) => false,
        }
    }

    /// True when repeating the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HmsError::Gateway(e) => e.is_retryable(),
            HmsError::StorageUnavailable(_) => true,
            HmsError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for HmsError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref e, ref msg) = err {
            if e.code == rusqlite::ErrorCode::ConstraintViolation {
                let detail = msg.clone().unwrap_or_else(|| "constraint violation".into());
                if detail.contains("UNIQUE") {
                    return HmsError::Duplicate(detail);
                }
                return HmsError::Validation(detail);
            }
        }
        HmsError::Database(err)
    }
}

impl From<crate::status::UnknownVariant> for HmsError {
    fn from(err: crate::status::UnknownVariant) -> Self {
        HmsError::Validation(err.to_string())
    }
}

pub type HmsResult<T> = std::result::Result<T, HmsError>;
