//! Configuration types for the frame tap.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TapConfig {
    /// A page with no frame for this long is reported stale.
    pub stale_after_ms: u64,
    pub maintenance_interval_ms: u64,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 10_000,
            maintenance_interval_ms: 1_000,
        }
    }
}
