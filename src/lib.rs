//! Minimal KVM monitor for flat real-mode guests.
//!
//! The guest talks to the host only through byte-wide port I/O:
//!
//! | port | dir | device |
//! |------|-----|--------|
//! | 0x42 | OUT | console byte |
//! | 0x44 | IN  | next key |
//! | 0x45 | IN/OUT | key status / acknowledge |
//! | 0x46 | OUT | timer interval (ms) |
//! | 0x47 | IN/OUT | timer status / control |

pub mod config;
pub mod error;
pub mod types;
pub mod vmm;

pub use config::VmConfig;
pub use error::{FatalExit, IoDirection, VmmError};
pub use types::{ExitCounters, RunSummary};
pub use vmm::devices::{Devices, ManualClock, MonotonicClock, PortRegistry};
pub use vmm::event_loop::{LoopLimits, LoopState, VcpuRun, VmLoop};
pub use vmm::exit::{classify, ExitRecord, VmExit};
pub use vmm::input::{KeySource, NoKeys};
pub use vmm::run::run_vm;
