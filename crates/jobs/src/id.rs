//! Job identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use talus_core::Error;

/// Identifier of one job: `job` plus a monotonically assigned number.
///
/// Ordering follows the number, so sorting ids yields submission order and
/// the job listing is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    /// Creates an id from its sequence number.
    pub fn new(number: u64) -> Self {
        JobId(number)
    }

    /// The monotonic sequence number.
    pub fn number(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("job")
            .and_then(|n| n.parse::<u64>().ok())
            .map(JobId)
            .ok_or_else(|| Error::Validation {
                reason: format!("invalid job id: {s}"),
            })
    }
}
