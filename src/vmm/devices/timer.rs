use super::{PortDevice, Transfer};
use log::{trace, warn};
use std::cell::Cell;
use std::io;
use std::rc::Rc;
use std::time::Instant;

/// Control byte bit 0: timer enabled.
pub const TIMER_ENABLE: u8 = 1 << 0;
/// Status byte bit 1: an interval elapsed since the last status read.
pub const TIMER_EVENT: u8 = 1 << 1;

/// Millisecond monotonic time source.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// `Instant`-based clock counting from its creation.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven clock; clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock(Rc<Cell<u64>>);

impl ManualClock {
    pub fn set(&self, ms: u64) {
        self.0.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// Polled, repeating interval timer.
///
/// The guest programs an interval in milliseconds and enables the timer; the
/// exit loop calls [`Timer::poll`] once per iteration, which latches
/// [`TIMER_EVENT`] each time a full interval has passed and re-arms from that
/// moment. Reading the status port returns the latched event once and clears
/// it. Intervals that elapse while an event is still unread coalesce into it.
pub struct Timer<C> {
    clock: C,
    enabled: bool,
    interval_ms: u64,
    last_fired: u64,
    pending: bool,
}

impl<C: Clock> Timer<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, enabled: false, interval_ms: 0, last_fired: 0, pending: false }
    }

    /// New threshold; applies from the next poll without re-arming.
    pub fn set_interval(&mut self, interval_ms: u8) {
        self.interval_ms = u64::from(interval_ms);
    }

    pub fn set_control(&mut self, control: u8) {
        let enable = control & TIMER_ENABLE != 0;
        if enable && !self.enabled {
            self.last_fired = self.clock.now_ms();
        }
        self.enabled = enable;
    }

    pub fn poll(&mut self) {
        let now = self.clock.now_ms();
        self.poll_elapsed(now);
    }

    pub fn poll_elapsed(&mut self, now_ms: u64) {
        if self.enabled && now_ms.saturating_sub(self.last_fired) >= self.interval_ms {
            trace!("timer: fired at {} ms (interval {} ms)", now_ms, self.interval_ms);
            self.pending = true;
            self.last_fired = now_ms;
        }
    }

    /// Status byte; clears the event bit.
    pub fn read_status(&mut self) -> u8 {
        let mut status = 0;
        if self.enabled {
            status |= TIMER_ENABLE;
        }
        if std::mem::take(&mut self.pending) {
            status |= TIMER_EVENT;
        }
        status
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Arm time of the current interval; only meaningful while enabled.
    pub fn last_fired(&self) -> u64 {
        self.last_fired
    }
}

impl<C: Clock> PortDevice for Timer<C> {
    fn port_in(&mut self, transfer: Transfer) -> u8 {
        match transfer {
            Transfer::ControlIn => self.read_status(),
            other => {
                warn!("timer: unexpected {:?}", other);
                0
            }
        }
    }

    fn port_out(&mut self, transfer: Transfer, value: u8) -> io::Result<()> {
        match transfer {
            Transfer::DataOut => self.set_interval(value),
            Transfer::ControlOut => self.set_control(value),
            other => warn!("timer: unexpected {:?}", other),
        }
        Ok(())
    }
}
