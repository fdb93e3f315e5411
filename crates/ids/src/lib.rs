//! Human-readable document numbers and barcodes.
//!
//! Back-office records carry identifiers that staff read aloud, print on receipts and type into
//! search boxes. They are date-coded and sequential within a day:
//!
//! - stock transactions: `ST{yymmdd}{seq:04}`, e.g. `ST2610180001`
//! - purchase orders: `PO{yymmdd}{seq:04}`
//! - bills: `BILL{yymmdd}{seq:04}`
//!
//! The sequence restarts at `0001` every day. Callers are expected to look up the highest number
//! already issued for the day (see [`DocumentNumber::day_prefix`]) and pass it to
//! [`DocumentNumber::next`] while holding the storage write lock, so two writers never compute
//! the same successor.
//!
//! Inventory barcodes are `MED{medicine_id:06}{6 uppercase hex}` where the hex suffix is taken
//! from a fresh v4 UUID.

mod barcode;
mod document;

pub use barcode::Barcode;
pub use document::{DocumentKind, DocumentNumber};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// The daily sequence for a document kind has run out
    #[error("document sequence exhausted for {0}")]
    SequenceExhausted(String),
}

/// Result type for identifier operations.
pub type IdResult<T> = Result<T, IdError>;
