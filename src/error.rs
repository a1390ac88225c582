use std::fmt;
use thiserror::Error;

/// Direction of a port I/O transfer as seen from the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IoDirection {
    In,
    Out,
}

impl fmt::Display for IoDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoDirection::In => write!(f, "IN"),
            IoDirection::Out => write!(f, "OUT"),
        }
    }
}

/// Terminal conditions of the exit loop. Any of these means the guest/host
/// contract is broken and the guest is not resumed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalExit {
    #[error("unhandled port I/O: {direction} port=0x{port:x} size={size} count={count}")]
    UnhandledIo { port: u16, direction: IoDirection, size: u8, count: u32 },

    #[error("exit record access out of bounds: offset=0x{offset:x} len={len} record_len={record_len}")]
    RecordBounds { offset: u64, len: usize, record_len: usize },

    #[error("KVM_EXIT_IO with invalid direction {0}")]
    BadDirection(u8),

    #[error("KVM_EXIT_FAIL_ENTRY: hardware_entry_failure_reason = 0x{reason:x} (cpu {cpu})")]
    FailEntry { reason: u64, cpu: u32 },

    #[error("KVM_EXIT_INTERNAL_ERROR: suberror = 0x{suberror:x}")]
    InternalError { suberror: u32 },

    #[error("guest shutdown (triple fault)")]
    Shutdown,

    #[error("exit_reason = 0x{reason:x}")]
    UnknownExit { reason: u32 },

    #[error("exit budget of {limit} exits exhausted")]
    ExitBudget { limit: u64 },

    #[error("guest exceeded deadline of {timeout_ms} ms")]
    Deadline { timeout_ms: u64 },
}

#[derive(Debug, Error)]
pub enum VmmError {
    #[error(transparent)]
    Fatal(#[from] FatalExit),

    #[error("KVM_RUN failed: {0}")]
    Run(#[source] vmm_sys_util::errno::Error),

    #[error("host output error: {0}")]
    Host(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl VmmError {
    /// The loop-level diagnostic, if this error ended the loop in the fatal state.
    pub fn fatal(&self) -> Option<&FatalExit> {
        match self {
            VmmError::Fatal(f) => Some(f),
            _ => None,
        }
    }
}

pub type Result<T, E = VmmError> = std::result::Result<T, E>;
