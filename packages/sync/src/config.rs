use serde::{Deserialize, Serialize};

/// Tuning for client stores and the tasks around them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Pending queue length past which every new op logs a warning
    #[serde(default = "default_pending_warn_threshold")]
    pub pending_warn_threshold: usize,

    /// Capacity of the channel carrying ops to the server
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Capacity of the change event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Undo steps kept per client (0 = unlimited)
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
}

fn default_pending_warn_threshold() -> usize {
    1_000
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_event_capacity() -> usize {
    1_024
}

fn default_history_depth() -> usize {
    100
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pending_warn_threshold: default_pending_warn_threshold(),
            outbound_capacity: default_outbound_capacity(),
            event_capacity: default_event_capacity(),
            history_depth: default_history_depth(),
        }
    }
}
