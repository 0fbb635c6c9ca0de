//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Default API prefix of every LXD URL.
pub const DEFAULT_API_ROOT: &str = "/1.0";

/// Default failure threshold: completion status codes at or above this value
/// fail the operation (LXD reports `200` for success, `400` for failure and
/// `401` for cancellation).
pub const DEFAULT_FAILURE_STATUS: u16 = 400;

/// Settings shared by every operation issued through one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix of the `operations` sub-resources (`<api_root>/operations/<id>/wait`).
    pub api_root: String,

    /// A completed operation fails when its `status_code` is at or above this
    /// value. Servers following the older `> 300` rule are matched with `301`.
    pub failure_status: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            failure_status: DEFAULT_FAILURE_STATUS,
        }
    }
}

impl EngineConfig {
    /// Returns `true` if `status_code` denotes a failed operation.
    pub fn is_failure(&self, status_code: u16) -> bool {
        status_code >= self.failure_status
    }
}
