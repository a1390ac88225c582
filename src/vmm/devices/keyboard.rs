use super::{PortDevice, Transfer};
use log::{trace, warn};
use std::io;

/// Buffered keyboard exposed as a status port and a data port.
///
/// Host key presses land in a fixed ring; one slot always stays free so
/// `head == tail` alone means empty. A key arriving while the ring is full is
/// refused, queued keys are never overwritten. Status is live: it reads 1
/// whenever the ring is non-empty, so the guest's acknowledgement write has
/// nothing to clear and is only traced.
pub struct Keyboard {
    ring: Box<[u8]>,
    head: usize,
    tail: usize,
    current_key: u8,
}

impl Keyboard {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "keyboard ring needs at least two slots");
        Self { ring: vec![0u8; capacity].into_boxed_slice(), head: 0, tail: 0, current_key: 0 }
    }

    /// Queue a host key press. Returns false when the ring is full and the key was dropped.
    pub fn enqueue(&mut self, key: u8) -> bool {
        let next_tail = (self.tail + 1) % self.ring.len();
        if next_tail == self.head {
            return false;
        }
        self.ring[self.tail] = key;
        self.tail = next_tail;
        true
    }

    pub fn read_status(&self) -> u8 {
        u8::from(!self.is_empty())
    }

    pub fn ack_status(&mut self, value: u8) {
        trace!("keyboard: status ack 0x{:02x} ({} keys pending)", value, self.len());
    }

    /// Pop the oldest key; 0 when nothing is queued.
    pub fn read_key(&mut self) -> u8 {
        if self.is_empty() {
            return 0;
        }
        let key = self.ring[self.head];
        self.head = (self.head + 1) % self.ring.len();
        self.current_key = key;
        key
    }

    /// Last key handed to the guest.
    pub fn current_key(&self) -> u8 {
        self.current_key
    }

    pub fn len(&self) -> usize {
        (self.tail + self.ring.len() - self.head) % self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }
}

impl PortDevice for Keyboard {
    fn port_in(&mut self, transfer: Transfer) -> u8 {
        match transfer {
            Transfer::StatusIn => self.read_status(),
            Transfer::DataIn => self.read_key(),
            other => {
                warn!("keyboard: unexpected {:?}", other);
                0
            }
        }
    }

    fn port_out(&mut self, transfer: Transfer, value: u8) -> io::Result<()> {
        match transfer {
            Transfer::ControlOut => self.ack_status(value),
            other => warn!("keyboard: unexpected {:?}", other),
        }
        Ok(())
    }
}
