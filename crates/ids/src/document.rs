//! Date-coded sequential document numbers.

use crate::{IdError, IdResult};
use chrono::NaiveDate;
use std::{fmt, str::FromStr};

/// The kinds of document that carry a sequential number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    StockTransaction,
    PurchaseOrder,
    Bill,
}

impl DocumentKind {
    const ALL: [DocumentKind; 3] = [
        DocumentKind::StockTransaction,
        DocumentKind::PurchaseOrder,
        DocumentKind::Bill,
    ];

    /// The literal prefix written in front of the date code.
    pub fn prefix(self) -> &'static str {
        match self {
            DocumentKind::StockTransaction => "ST",
            DocumentKind::PurchaseOrder => "PO",
            DocumentKind::Bill => "BILL",
        }
    }
}

/// A parsed document number such as `ST2610180007`.
///
/// Ordering of the string form matches issue order within a kind, which lets storage find the
/// latest number for a day with a plain `ORDER BY ... DESC`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentNumber {
    kind: DocumentKind,
    date: NaiveDate,
    sequence: u32,
}

impl DocumentNumber {
    /// Highest sequence that still fits the four-digit field.
    pub const MAX_SEQUENCE: u32 = 9_999;

    /// Returns the text every number of `kind` issued on `date` starts with.
    ///
    /// Suitable for a `LIKE '{prefix}%'` lookup of the latest number issued that day.
    pub fn day_prefix(kind: DocumentKind, date: NaiveDate) -> String {
        format!("{}{}", kind.prefix(), date.format("%y%m%d"))
    }

    /// Computes the successor of `last` for a document issued on `date`.
    ///
    /// When `last` is `None`, belongs to another kind, or was issued on another day, the
    /// sequence restarts at 1.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::SequenceExhausted`] when `last` already holds
    /// [`DocumentNumber::MAX_SEQUENCE`] for the same day.
    pub fn next(
        kind: DocumentKind,
        date: NaiveDate,
        last: Option<&DocumentNumber>,
    ) -> IdResult<Self> {
        let sequence = match last {
            Some(prev) if prev.kind == kind && prev.date == date => {
                if prev.sequence >= Self::MAX_SEQUENCE {
                    return Err(IdError::SequenceExhausted(Self::day_prefix(kind, date)));
                }
                prev.sequence + 1
            }
            _ => 1,
        };

        Ok(Self {
            kind,
            date,
            sequence,
        })
    }

    /// Parses `input` as a number of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidInput`] if the prefix, date code or sequence is malformed.
    pub fn parse(kind: DocumentKind, input: &str) -> IdResult<Self> {
        let rest = input.strip_prefix(kind.prefix()).ok_or_else(|| {
            IdError::InvalidInput(format!(
                "expected '{}' prefix, got: '{}'",
                kind.prefix(),
                input
            ))
        })?;

        if rest.len() != 10 || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::InvalidInput(format!(
                "expected 6-digit date and 4-digit sequence, got: '{}'",
                input
            )));
        }

        let (date_code, seq_code) = rest.split_at(6);
        let date = NaiveDate::parse_from_str(&format!("20{date_code}"), "%Y%m%d").map_err(|e| {
            IdError::InvalidInput(format!("invalid date code '{}': {}", date_code, e))
        })?;
        let sequence: u32 = seq_code
            .parse()
            .map_err(|_| IdError::InvalidInput(format!("invalid sequence '{}'", seq_code)))?;
        if sequence == 0 {
            return Err(IdError::InvalidInput(format!(
                "sequence must start at 0001, got: '{}'",
                input
            )));
        }

        Ok(Self {
            kind,
            date,
            sequence,
        })
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:04}",
            Self::day_prefix(self.kind, self.date),
            self.sequence
        )
    }
}

impl FromStr for DocumentNumber {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for kind in DocumentKind::ALL {
            if s.starts_with(kind.prefix()) {
                return Self::parse(kind, s);
            }
        }
        Err(IdError::InvalidInput(format!(
            "unknown document number prefix: '{}'",
            s
        )))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for DocumentNumber {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for DocumentNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
