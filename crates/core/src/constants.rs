//! Constants used throughout the HMS core crate.

/// Default SQLite database file when no explicit path is configured.
pub const DEFAULT_DATABASE_PATH: &str = "hms.db";

/// Appointment length used when a booking does not specify one.
pub const DEFAULT_APPOINTMENT_MINUTES: u32 = 30;

/// Items expiring within this many days raise a near-expiry alert.
pub const DEFAULT_NEAR_EXPIRY_DAYS: u32 = 30;

/// Near-expiry alerts at or under this many days are raised as high severity.
pub const NEAR_EXPIRY_HIGH_SEVERITY_DAYS: i64 = 7;

/// Default reorder threshold for new inventory items.
pub const DEFAULT_MIN_STOCK_LEVEL: u32 = 10;

/// Default maximum shelf level for new inventory items.
pub const DEFAULT_MAX_STOCK_LEVEL: u32 = 100;

/// Window used for average monthly usage figures.
pub const USAGE_WINDOW_DAYS: i64 = 180;

/// Account reference description sent with every STK push.
pub const STK_PUSH_DESCRIPTION: &str = "Hospital Bill Payment";

/// Gateway response code meaning "request accepted for processing".
pub const GATEWAY_ACCEPTED_CODE: &str = "0";

/// Default outbound gateway timeout.
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;

/// Reference written on the opening purchase of a newly created item.
pub const INITIAL_STOCK_REFERENCE: &str = "Initial Stock";
