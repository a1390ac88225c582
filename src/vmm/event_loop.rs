use super::devices::{Clock, Devices, PortRegistry};
use super::exit::{classify, ExitRecord, VmExit};
use super::input::KeySource;
use crate::error::{FatalExit, VmmError};
use crate::types::{ExitCounters, RunSummary};
use log::{debug, error, info, trace, warn};
use std::io::Write;
use std::time::Duration;

/// The hypervisor's run primitive: enter the guest and block until the next
/// VM exit. The returned record is only valid until the next call.
pub trait VcpuRun {
    fn run(&mut self) -> Result<ExitRecord<'_>, VmmError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// Guest executed HLT.
    Halted,
    Fatal(FatalExit),
}

/// Optional guards against a guest that never halts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopLimits {
    pub max_exits: Option<u64>,
    pub timeout_ms: Option<u64>,
}

/// Trap-and-emulate loop for one vCPU. Owns every device; nothing else
/// touches device state.
pub struct VmLoop<V, K, W, C> {
    vcpu: V,
    keys: K,
    registry: PortRegistry,
    devices: Devices<W, C>,
    limits: LoopLimits,
    state: LoopState,
    counters: ExitCounters,
    started_ms: u64,
}

impl<V, K, W, C> VmLoop<V, K, W, C>
where
    V: VcpuRun,
    K: KeySource,
    W: Write,
    C: Clock,
{
    pub fn new(vcpu: V, keys: K, devices: Devices<W, C>, limits: LoopLimits) -> Self {
        let started_ms = devices.timer.clock().now_ms();
        Self {
            vcpu,
            keys,
            registry: PortRegistry::standard(),
            devices,
            limits,
            state: LoopState::Running,
            counters: ExitCounters::default(),
            started_ms,
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn vcpu(&self) -> &V {
        &self.vcpu
    }

    pub fn devices(&self) -> &Devices<W, C> {
        &self.devices
    }

    pub fn counters(&self) -> &ExitCounters {
        &self.counters
    }

    fn check_limits(&self) -> Option<FatalExit> {
        if let Some(limit) = self.limits.max_exits {
            if self.counters.total >= limit {
                return Some(FatalExit::ExitBudget { limit });
            }
        }
        if let Some(timeout_ms) = self.limits.timeout_ms {
            let now = self.devices.timer.clock().now_ms();
            if now.saturating_sub(self.started_ms) >= timeout_ms {
                return Some(FatalExit::Deadline { timeout_ms });
            }
        }
        None
    }

    /// One iteration: host input, timer, one run call, one dispatch.
    /// Errors are host failures; guest faults end in [`LoopState::Fatal`].
    pub fn step(&mut self) -> Result<LoopState, VmmError> {
        if self.state != LoopState::Running {
            return Ok(self.state.clone());
        }
        if let Some(fatal) = self.check_limits() {
            self.state = LoopState::Fatal(fatal);
            return Ok(self.state.clone());
        }

        if let Some(key) = self.keys.poll_key() {
            if self.devices.keyboard.enqueue(key) {
                debug!("key pressed: 0x{:02x}", key);
            } else {
                debug!("keyboard buffer full, dropped 0x{:02x}", key);
            }
        }
        self.devices.timer.poll();

        let mut record = self.vcpu.run()?;
        self.counters.total += 1;

        let exit = match classify(&record) {
            Ok(exit) => exit,
            Err(fatal) => {
                self.state = LoopState::Fatal(fatal);
                return Ok(self.state.clone());
            }
        };
        trace!("exit #{}: {:?}", self.counters.total, exit);

        self.state = match exit {
            VmExit::Halt => {
                self.devices.console.flush_pending()?;
                LoopState::Halted
            }
            VmExit::Io(io) => {
                self.counters.io += 1;
                match self.registry.resolve(&io) {
                    Ok(route) => match self.devices.dispatch(route, &io, &mut record) {
                        Ok(()) => LoopState::Running,
                        Err(VmmError::Fatal(fatal)) => LoopState::Fatal(fatal),
                        Err(e) => return Err(e),
                    },
                    Err(fatal) => LoopState::Fatal(fatal),
                }
            }
            VmExit::Mmio(mmio) => {
                self.counters.mmio += 1;
                let d = mmio.data;
                warn!(
                    "Got an unexpected MMIO exit: phys_addr 0x{:x}, data {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x}, len {}, is_write {}",
                    mmio.phys_addr, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7], mmio.len, mmio.is_write
                );
                LoopState::Running
            }
            VmExit::FailEntry { reason, cpu } => LoopState::Fatal(FatalExit::FailEntry { reason, cpu }),
            VmExit::InternalError { suberror } => LoopState::Fatal(FatalExit::InternalError { suberror }),
            VmExit::Shutdown => LoopState::Fatal(FatalExit::Shutdown),
            VmExit::Unknown { raw_reason } => LoopState::Fatal(FatalExit::UnknownExit { reason: raw_reason }),
        };
        Ok(self.state.clone())
    }

    pub fn summary(&self) -> RunSummary {
        let now = self.devices.timer.clock().now_ms();
        RunSummary {
            exits: self.counters.clone(),
            elapsed: Duration::from_millis(now.saturating_sub(self.started_ms)),
            console_bytes: self.devices.console.bytes_written(),
        }
    }

    /// Run until the guest halts or the loop goes fatal.
    pub fn run_until_exit(&mut self) -> Result<RunSummary, VmmError> {
        loop {
            match self.step()? {
                LoopState::Running => continue,
                LoopState::Halted => {
                    info!("KVM_EXIT_HLT after {} exits", self.counters.total);
                    return Ok(self.summary());
                }
                LoopState::Fatal(fatal) => {
                    error!("guest stopped after {} exits: {}", self.counters.total, fatal);
                    return Err(fatal.into());
                }
            }
        }
    }
}
