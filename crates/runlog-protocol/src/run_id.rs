//! Run identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque identifier of a run known to the coordinator.
///
/// Carried on the wire as an int64, so the valid range is `0..=i64::MAX`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct RunId(u64);

/// A value that cannot be carried as a run identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("run id {0} is not a non-negative int64")]
pub struct InvalidRunId(pub String);

impl RunId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for RunId {
    type Error = InvalidRunId;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            return Err(InvalidRunId(value.to_string()));
        }
        Ok(Self(value))
    }
}

impl TryFrom<i64> for RunId {
    type Error = InvalidRunId;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u64::try_from(value)
            .map(Self)
            .map_err(|_| InvalidRunId(value.to_string()))
    }
}

impl From<RunId> for i64 {
    fn from(id: RunId) -> Self {
        // Construction guarantees the value fits.
        id.0 as i64
    }
}

impl FromStr for RunId {
    type Err = InvalidRunId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u64 = s.trim().parse().map_err(|_| InvalidRunId(s.to_string()))?;
        Self::try_from(value)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
