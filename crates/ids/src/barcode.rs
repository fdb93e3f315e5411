//! Inventory barcodes.

use std::fmt;
use uuid::Uuid;

/// Barcode printed on an inventory batch label.
///
/// Generated barcodes have the form `MED{medicine_id:06}{XXXXXX}` where the suffix is six
/// uppercase hex characters from a random v4 UUID. Barcodes supplied by a supplier are kept
/// verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Barcode(String);

impl Barcode {
    /// Generates a barcode for a batch of the given medicine.
    pub fn generate(medicine_id: i64) -> Self {
        let suffix = Uuid::new_v4().simple().to_string()[..6].to_ascii_uppercase();
        Self(format!("MED{:06}{}", medicine_id, suffix))
    }

    /// Wraps an externally supplied barcode, returning `None` for blank input.
    pub fn supplied(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Barcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
