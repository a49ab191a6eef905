//! Duplicate-delivery policy for creation workers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a creation worker does when the row it would insert already exists.
///
/// The queue delivers at least once, so a successfully processed event can
/// arrive again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplicatePolicy {
    /// An existing row with an identical payload is a successful no-op;
    /// a conflicting payload is an error.
    #[default]
    SkipIdentical,
    /// Blind insert: any existing row is a uniqueness violation.
    Reject,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkipIdentical => write!(f, "skipIdentical"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skipIdentical" | "skip_identical" | "skip-identical" => Ok(Self::SkipIdentical),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown duplicate policy: {other}")),
        }
    }
}
