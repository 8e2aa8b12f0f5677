//! Probe operation types.

use serde::{Deserialize, Serialize};

/// Probe response payload.
///
/// The probe request carries an empty payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResponse {
    /// Lowest protocol version the coordinator speaks.
    pub protocol_min: i32,
    /// Highest protocol version the coordinator speaks.
    pub protocol_max: i32,
    /// Advertised features (see [`crate::features`]).
    #[serde(default)]
    pub features: Vec<String>,
    /// Largest frame the coordinator will send or accept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_bytes: Option<u64>,
}

impl ProbeResponse {
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.iter().any(|f| f == name)
    }

    /// Highest version in the intersection with `[min, max]`, if any.
    pub fn negotiate(&self, min: i32, max: i32) -> Option<i32> {
        let lo = self.protocol_min.max(min);
        let hi = self.protocol_max.min(max);
        (lo <= hi).then_some(hi)
    }
}
