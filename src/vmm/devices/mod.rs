//! Port-mapped devices and the port registry that routes exits to them.

pub mod console;
pub mod keyboard;
pub mod timer;

pub use console::Console;
pub use keyboard::Keyboard;
pub use timer::{Clock, ManualClock, MonotonicClock, Timer};

use super::exit::{ExitRecord, IoExit};
use crate::error::{FatalExit, IoDirection, VmmError};
use log::trace;
use std::collections::BTreeMap;
use std::io::{self, Write};

pub const CONSOLE_PORT: u16 = 0x42;
pub const KEYBOARD_DATA_PORT: u16 = 0x44;
pub const KEYBOARD_STATUS_PORT: u16 = 0x45;
pub const TIMER_INTERVAL_PORT: u16 = 0x46;
pub const TIMER_CONTROL_PORT: u16 = 0x47;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceId {
    Console,
    Keyboard,
    Timer,
}

/// What a single-byte port access means to the owning device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    StatusIn,
    DataIn,
    DataOut,
    ControlIn,
    ControlOut,
}

impl Transfer {
    pub fn direction(self) -> IoDirection {
        match self {
            Transfer::StatusIn | Transfer::DataIn | Transfer::ControlIn => IoDirection::In,
            Transfer::DataOut | Transfer::ControlOut => IoDirection::Out,
        }
    }
}

/// Byte-wide port device.
pub trait PortDevice {
    /// Value returned to the guest for an IN.
    fn port_in(&mut self, transfer: Transfer) -> u8;
    /// Handle a guest OUT.
    fn port_out(&mut self, transfer: Transfer, value: u8) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub device: DeviceId,
    pub transfer: Transfer,
}

/// Maps `(port, direction)` to the owning device. Holds no device state.
#[derive(Debug, Clone, Default)]
pub struct PortRegistry {
    routes: BTreeMap<(u16, IoDirection), Route>,
}

impl PortRegistry {
    /// The fixed guest-visible port assignment.
    pub fn standard() -> Self {
        let mut reg = Self::default();
        reg.register(CONSOLE_PORT, DeviceId::Console, Transfer::DataOut);
        reg.register(KEYBOARD_DATA_PORT, DeviceId::Keyboard, Transfer::DataIn);
        reg.register(KEYBOARD_STATUS_PORT, DeviceId::Keyboard, Transfer::StatusIn);
        reg.register(KEYBOARD_STATUS_PORT, DeviceId::Keyboard, Transfer::ControlOut);
        reg.register(TIMER_INTERVAL_PORT, DeviceId::Timer, Transfer::DataOut);
        reg.register(TIMER_CONTROL_PORT, DeviceId::Timer, Transfer::ControlOut);
        reg.register(TIMER_CONTROL_PORT, DeviceId::Timer, Transfer::ControlIn);
        reg
    }

    pub fn register(&mut self, port: u16, device: DeviceId, transfer: Transfer) {
        self.routes.insert((port, transfer.direction()), Route { device, transfer });
    }

    /// Route a port I/O exit. Only single, byte-wide transfers to a
    /// registered port are accepted.
    pub fn resolve(&self, io: &IoExit) -> Result<Route, FatalExit> {
        let unhandled = FatalExit::UnhandledIo {
            port: io.port,
            direction: io.direction,
            size: io.size,
            count: io.count,
        };
        if io.size != 1 || io.count != 1 {
            return Err(unhandled);
        }
        self.routes.get(&(io.port, io.direction)).copied().ok_or(unhandled)
    }

    pub fn routes(&self) -> impl Iterator<Item = (u16, IoDirection, Route)> + '_ {
        self.routes.iter().map(|(&(port, dir), &route)| (port, dir, route))
    }
}

/// The device set, owned by the exit loop.
pub struct Devices<W, C> {
    pub console: Console<W>,
    pub keyboard: Keyboard,
    pub timer: Timer<C>,
}

impl<W: Write, C: Clock> Devices<W, C> {
    pub fn new(console_capacity: usize, keyboard_capacity: usize, out: W, clock: C) -> Self {
        Self {
            console: Console::new(console_capacity, out),
            keyboard: Keyboard::new(keyboard_capacity),
            timer: Timer::new(clock),
        }
    }

    pub fn device_mut(&mut self, id: DeviceId) -> &mut dyn PortDevice {
        match id {
            DeviceId::Console => &mut self.console,
            DeviceId::Keyboard => &mut self.keyboard,
            DeviceId::Timer => &mut self.timer,
        }
    }

    /// Run one routed transfer against the exit record's payload byte.
    pub fn dispatch(&mut self, route: Route, io: &IoExit, record: &mut ExitRecord<'_>) -> Result<(), VmmError> {
        let device = self.device_mut(route.device);
        match io.direction {
            IoDirection::In => {
                let value = device.port_in(route.transfer);
                trace!("IN  0x{:02x} -> 0x{:02x} ({:?})", io.port, value, route.device);
                record.write_byte(io.data_offset, value)?;
            }
            IoDirection::Out => {
                let value = record.read_byte(io.data_offset)?;
                trace!("OUT 0x{:02x} <- 0x{:02x} ({:?})", io.port, value, route.device);
                device.port_out(route.transfer, value)?;
            }
        }
        Ok(())
    }
}
