//! Time utilities and constants.

use chrono::{DateTime, Utc};

/// Timing defaults.
pub mod constants {
    use std::time::Duration;

    /// Lock acquisition timeout (10 seconds).
    pub fn lock_acquisition_timeout() -> Duration {
        Duration::from_secs(10)
    }

    /// Maximum time a unit of work may take before it is rolled back (5 seconds).
    pub fn unit_of_work_timeout() -> Duration {
        Duration::from_secs(5)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(s: &str) -> Result<Timestamp, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
