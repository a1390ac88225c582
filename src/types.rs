use serde::Serialize;
use std::time::Duration;

/// Per-category exit counts collected by the exit loop.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExitCounters {
    pub total: u64,
    pub io: u64,
    pub mmio: u64,
}

/// Outcome of a guest that halted cleanly.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub exits: ExitCounters,
    pub elapsed: Duration,
    /// Bytes written by the guest to the console port
    pub console_bytes: u64,
}
