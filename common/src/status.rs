//! Transaction status and its state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a persisted transaction.
///
/// There is no pending state: a transfer is either committed as
/// `Completed` or never recorded at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Funds moved from sender to receiver.
    Completed,
    /// The movement was undone by a reversal.
    Reversed,
}

impl TransactionStatus {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[TransactionStatus] {
        match self {
            TransactionStatus::Completed => &[TransactionStatus::Reversed],
            TransactionStatus::Reversed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Stable string form used by persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Reversed => "REVERSED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown transaction status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for TransactionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "REVERSED" => Ok(TransactionStatus::Reversed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(TransactionStatus::Completed.can_transition_to(TransactionStatus::Reversed));
        assert!(!TransactionStatus::Reversed.can_transition_to(TransactionStatus::Reversed));
        assert!(!TransactionStatus::Reversed.can_transition_to(TransactionStatus::Completed));
        assert!(TransactionStatus::Reversed.is_final());
        assert!(!TransactionStatus::Completed.is_final());
    }

    #[test]
    fn test_string_form_matches_serde() {
        for status in [TransactionStatus::Completed, TransactionStatus::Reversed] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
        assert!("PENDING".parse::<TransactionStatus>().is_err());
    }
}
