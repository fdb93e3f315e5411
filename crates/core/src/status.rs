//! Closed vocabularies stored as text columns, and the transition tables between states.
//!
//! Each enum round-trips through its lowercase text form in SQLite, JSON and the CLI.

use crate::{HmsError, HmsResult};

/// A text value that does not name any variant of the target enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_owned(),
                    }),
                }
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum! {
    /// Lifecycle of an appointment.
    AppointmentStatus {
        Scheduled => "scheduled",
        Confirmed => "confirmed",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
        NoShow => "no_show",
    }
}

impl AppointmentStatus {
    /// Whether an appointment in this state still occupies its slot.
    pub fn blocks_slot(self) -> bool {
        self != AppointmentStatus::Cancelled
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Scheduled, Confirmed | InProgress | Cancelled | NoShow)
                | (Confirmed, InProgress | Cancelled | NoShow)
                | (InProgress, Completed)
        )
    }
}

text_enum! {
    /// Whether an inventory batch may be sold or dispensed.
    ItemStatus {
        Active => "active",
        Inactive => "inactive",
        Discontinued => "discontinued",
    }
}

text_enum! {
    /// Kinds of stock movement.
    TransactionKind {
        Purchase => "purchase",
        Sale => "sale",
        Return => "return",
        Adjustment => "adjustment",
        Transfer => "transfer",
        WriteOff => "write_off",
    }
}

impl TransactionKind {
    /// Incoming kinds carry a positive quantity, every other kind a negative one.
    ///
    /// `return` is a return *to the supplier* and therefore outgoing.
    pub fn is_incoming(self) -> bool {
        matches!(self, TransactionKind::Purchase | TransactionKind::Adjustment)
    }
}

text_enum! {
    /// Settlement state of a bill.
    BillStatus {
        Pending => "pending",
        Paid => "paid",
        Partial => "partial",
        Cancelled => "cancelled",
    }
}

impl BillStatus {
    pub fn can_transition_to(self, next: BillStatus) -> bool {
        use BillStatus::*;
        matches!(
            (self, next),
            (Pending, Partial | Paid | Cancelled) | (Partial, Partial | Paid | Cancelled)
        )
    }
}

text_enum! {
    /// Outcome of the latest mobile-money attempt on a bill.
    PaymentStatus {
        Pending => "pending",
        Successful => "successful",
        Failed => "failed",
    }
}

impl PaymentStatus {
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Pending | Successful | Failed) | (Successful | Failed, Pending)
        )
    }
}

text_enum! {
    /// How a settled payment was made.
    PaymentMethod {
        Cash => "cash",
        Card => "card",
        Insurance => "insurance",
        Online => "online",
    }
}

text_enum! {
    /// Where a pending mobile-money request stands.
    MpesaRequestState {
        AwaitingCallback => "awaiting_callback",
        SettledSuccess => "settled_success",
        SettledFailed => "settled_failed",
    }
}

impl MpesaRequestState {
    pub fn is_settled(self) -> bool {
        self != MpesaRequestState::AwaitingCallback
    }
}

text_enum! {
    /// Stock conditions that raise an alert.
    AlertKind {
        LowStock => "low_stock",
        Expired => "expired",
        NearExpiry => "near_expiry",
    }
}

text_enum! {
    Severity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

text_enum! {
    /// Staff roles.
    UserRole {
        Admin => "admin",
        Doctor => "doctor",
        Staff => "staff",
        Pharmacist => "pharmacist",
    }
}

text_enum! {
    Gender {
        Male => "M",
        Female => "F",
        Other => "O",
    }
}

text_enum! {
    /// Lifecycle of a purchase order to a supplier.
    PurchaseOrderStatus {
        Draft => "draft",
        Submitted => "submitted",
        Approved => "approved",
        Ordered => "ordered",
        Received => "received",
        Cancelled => "cancelled",
    }
}

impl PurchaseOrderStatus {
    pub fn can_transition_to(self, next: PurchaseOrderStatus) -> bool {
        use PurchaseOrderStatus::*;
        matches!(
            (self, next),
            (Draft, Submitted | Cancelled)
                | (Submitted, Approved | Cancelled)
                | (Approved, Ordered | Cancelled)
                | (Ordered, Received | Cancelled)
        )
    }
}

/// Fail with [`HmsError::InvalidTransition`] unless `allowed`.
pub(crate) fn ensure_transition(
    entity: &'static str,
    from: impl std::fmt::Display,
    to: impl std::fmt::Display,
    allowed: bool,
) -> HmsResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(HmsError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
