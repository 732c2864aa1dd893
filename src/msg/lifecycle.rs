use serde::{Deserialize, Serialize};

/// Periodic liveness beacon from a component.
///
/// `seq` increments on every beat so an observer holding only the latest
/// message (cache depth 1) can still detect staleness: a seq that has not
/// advanced for more than twice `period_s` means the sender is gone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub name: String,
    pub period_s: f64,
    pub seq: u64,
}

/// Broadcast once when the experiment ends; every component shuts down on
/// observing it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSignal {}
