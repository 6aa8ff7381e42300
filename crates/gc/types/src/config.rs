use serde::{Deserialize, Serialize};

/// Default number of key blocks between collector activations.
pub const DEFAULT_GC_INTERVAL: u64 = 50_000;

/// Default number of heights behind the top whose roots stay reachable.
pub const DEFAULT_GC_HISTORY: u64 = 500;

/// Configuration of the account-state garbage collector.
///
/// Read once at node init; the collector never reconfigures at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Whether the collector runs at all. Disabled by default.
    pub enabled: bool,
    /// Key-block period between collector activations. A reachability scan
    /// only starts at heights divisible by this value.
    pub interval: u64,
    /// Number of heights behind the top whose trie roots must remain intact
    /// after a swap.
    pub history: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { enabled: false, interval: DEFAULT_GC_INTERVAL, history: DEFAULT_GC_HISTORY }
    }
}

impl GcConfig {
    /// Ensures the configured periods are usable.
    pub const fn validate(&self) -> Result<(), GcConfigError> {
        if self.interval == 0 {
            return Err(GcConfigError::ZeroInterval)
        }
        if self.history == 0 {
            return Err(GcConfigError::ZeroHistory)
        }
        Ok(())
    }
}

/// Error returned by [`GcConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GcConfigError {
    /// `interval` must be at least one key block.
    #[error("gc interval must be at least 1")]
    ZeroInterval,
    /// `history` must retain at least one height.
    #[error("gc history must be at least 1")]
    ZeroHistory,
}
