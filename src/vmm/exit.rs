//! VM-exit records and their classification.
//!
//! KVM reports every exit through the `kvm_run` structure it shares with the
//! monitor through an mmap of the vCPU fd. The structure and the port I/O
//! payload that follows it are guest-influenced memory, so all access goes
//! through [`ExitRecord`], which bounds-checks every offset against the
//! length of the mapping instead of doing pointer arithmetic on it.

use crate::error::{FatalExit, IoDirection};
use kvm_bindings::{
    KVM_EXIT_FAIL_ENTRY, KVM_EXIT_HLT, KVM_EXIT_INTERNAL_ERROR, KVM_EXIT_IO, KVM_EXIT_IO_IN,
    KVM_EXIT_IO_OUT, KVM_EXIT_MMIO, KVM_EXIT_SHUTDOWN,
};

// Byte offsets into `struct kvm_run` (linux/kvm.h). The exit-specific union
// starts right after `apic_base`.
const EXIT_REASON: u64 = 8;
const EXIT_UNION: u64 = 32;

const IO_DIRECTION: u64 = EXIT_UNION;
const IO_SIZE: u64 = EXIT_UNION + 1;
const IO_PORT: u64 = EXIT_UNION + 2;
const IO_COUNT: u64 = EXIT_UNION + 4;
const IO_DATA_OFFSET: u64 = EXIT_UNION + 8;

const MMIO_PHYS_ADDR: u64 = EXIT_UNION;
const MMIO_DATA: u64 = EXIT_UNION + 8;
const MMIO_LEN: u64 = EXIT_UNION + 16;
const MMIO_IS_WRITE: u64 = EXIT_UNION + 20;

const FAIL_ENTRY_REASON: u64 = EXIT_UNION;
const FAIL_ENTRY_CPU: u64 = EXIT_UNION + 8;

const INTERNAL_SUBERROR: u64 = EXIT_UNION;

/// Read/write view of one exit, valid for a single run call.
pub struct ExitRecord<'a> {
    raw: &'a mut [u8],
}

impl<'a> ExitRecord<'a> {
    pub fn new(raw: &'a mut [u8]) -> Self {
        Self { raw }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    fn range(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>, FatalExit> {
        let out_of_bounds = || FatalExit::RecordBounds { offset, len, record_len: self.raw.len() };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
        if end > self.raw.len() {
            return Err(out_of_bounds());
        }
        Ok(start..end)
    }

    fn read_array<const N: usize>(&self, offset: u64) -> Result<[u8; N], FatalExit> {
        let r = self.range(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.raw[r]);
        Ok(out)
    }

    pub fn read_byte(&self, offset: u64) -> Result<u8, FatalExit> {
        let [b] = self.read_array::<1>(offset)?;
        Ok(b)
    }

    pub fn write_byte(&mut self, offset: u64, value: u8) -> Result<(), FatalExit> {
        let r = self.range(offset, 1)?;
        self.raw[r.start] = value;
        Ok(())
    }

    fn read_u16(&self, offset: u64) -> Result<u16, FatalExit> {
        self.read_array(offset).map(u16::from_ne_bytes)
    }

    fn read_u32(&self, offset: u64) -> Result<u32, FatalExit> {
        self.read_array(offset).map(u32::from_ne_bytes)
    }

    fn read_u64(&self, offset: u64) -> Result<u64, FatalExit> {
        self.read_array(offset).map(u64::from_ne_bytes)
    }

    pub fn exit_reason(&self) -> Result<u32, FatalExit> {
        self.read_u32(EXIT_REASON)
    }
}

/// Port I/O exit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoExit {
    pub direction: IoDirection,
    pub port: u16,
    /// Bytes per transfer unit
    pub size: u8,
    /// Repeated transfers (string I/O)
    pub count: u32,
    /// Offset of the payload inside the exit record
    pub data_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioExit {
    pub phys_addr: u64,
    pub data: [u8; 8],
    pub len: u32,
    pub is_write: bool,
}

/// Classified VM exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmExit {
    Halt,
    Io(IoExit),
    Mmio(MmioExit),
    FailEntry { reason: u64, cpu: u32 },
    InternalError { suberror: u32 },
    Shutdown,
    Unknown { raw_reason: u32 },
}

/// Decode the exit currently described by `record`. Only field reads can
/// fail, when the record is too short for the exit it claims to be.
pub fn classify(record: &ExitRecord<'_>) -> Result<VmExit, FatalExit> {
    let exit = match record.exit_reason()? {
        KVM_EXIT_HLT => VmExit::Halt,
        KVM_EXIT_IO => {
            let raw = record.read_byte(IO_DIRECTION)?;
            let direction = match u32::from(raw) {
                KVM_EXIT_IO_IN => IoDirection::In,
                KVM_EXIT_IO_OUT => IoDirection::Out,
                _ => return Err(FatalExit::BadDirection(raw)),
            };
            VmExit::Io(IoExit {
                direction,
                size: record.read_byte(IO_SIZE)?,
                port: record.read_u16(IO_PORT)?,
                count: record.read_u32(IO_COUNT)?,
                data_offset: record.read_u64(IO_DATA_OFFSET)?,
            })
        }
        KVM_EXIT_MMIO => VmExit::Mmio(MmioExit {
            phys_addr: record.read_u64(MMIO_PHYS_ADDR)?,
            data: record.read_array(MMIO_DATA)?,
            len: record.read_u32(MMIO_LEN)?,
            is_write: record.read_byte(MMIO_IS_WRITE)? != 0,
        }),
        KVM_EXIT_FAIL_ENTRY => VmExit::FailEntry {
            reason: record.read_u64(FAIL_ENTRY_REASON)?,
            cpu: record.read_u32(FAIL_ENTRY_CPU)?,
        },
        KVM_EXIT_INTERNAL_ERROR => VmExit::InternalError { suberror: record.read_u32(INTERNAL_SUBERROR)? },
        KVM_EXIT_SHUTDOWN => VmExit::Shutdown,
        raw_reason => VmExit::Unknown { raw_reason },
    };
    Ok(exit)
}

/// Builds `kvm_run`-shaped byte buffers for tests that have no vCPU.
/// Only compiled for unit tests and with the `test-util` feature.
#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod fake {
    use super::*;

    /// Payload offset KVM uses for port I/O (one page past the run struct).
    pub const PIO_DATA_OFFSET: u64 = 0x1000;
    pub const RECORD_LEN: usize = 0x2000;

    fn put(buf: &mut [u8], offset: u64, bytes: &[u8]) {
        let o = offset as usize;
        buf[o..o + bytes.len()].copy_from_slice(bytes);
    }

    pub fn record(reason: u32) -> Vec<u8> {
        let mut buf = vec![0u8; RECORD_LEN];
        put(&mut buf, EXIT_REASON, &reason.to_ne_bytes());
        buf
    }

    pub fn halt() -> Vec<u8> {
        record(KVM_EXIT_HLT)
    }

    pub fn io(direction: IoDirection, port: u16, size: u8, count: u32, value: u8) -> Vec<u8> {
        let mut buf = record(KVM_EXIT_IO);
        let dir = match direction {
            IoDirection::In => KVM_EXIT_IO_IN,
            IoDirection::Out => KVM_EXIT_IO_OUT,
        };
        put(&mut buf, IO_DIRECTION, &[dir as u8]);
        put(&mut buf, IO_SIZE, &[size]);
        put(&mut buf, IO_PORT, &port.to_ne_bytes());
        put(&mut buf, IO_COUNT, &count.to_ne_bytes());
        put(&mut buf, IO_DATA_OFFSET, &PIO_DATA_OFFSET.to_ne_bytes());
        put(&mut buf, PIO_DATA_OFFSET, &[value]);
        buf
    }

    pub fn io_out(port: u16, value: u8) -> Vec<u8> {
        io(IoDirection::Out, port, 1, 1, value)
    }

    pub fn io_in(port: u16) -> Vec<u8> {
        io(IoDirection::In, port, 1, 1, 0)
    }

    pub fn mmio(phys_addr: u64, data: [u8; 8], len: u32, is_write: bool) -> Vec<u8> {
        let mut buf = record(KVM_EXIT_MMIO);
        put(&mut buf, MMIO_PHYS_ADDR, &phys_addr.to_ne_bytes());
        put(&mut buf, MMIO_DATA, &data);
        put(&mut buf, MMIO_LEN, &len.to_ne_bytes());
        put(&mut buf, MMIO_IS_WRITE, &[is_write as u8]);
        buf
    }

    pub fn fail_entry(reason: u64, cpu: u32) -> Vec<u8> {
        let mut buf = record(KVM_EXIT_FAIL_ENTRY);
        put(&mut buf, FAIL_ENTRY_REASON, &reason.to_ne_bytes());
        put(&mut buf, FAIL_ENTRY_CPU, &cpu.to_ne_bytes());
        buf
    }

    pub fn internal_error(suberror: u32) -> Vec<u8> {
        let mut buf = record(KVM_EXIT_INTERNAL_ERROR);
        put(&mut buf, INTERNAL_SUBERROR, &suberror.to_ne_bytes());
        buf
    }

    /// Overwrite the port I/O payload offset, e.g. to point it outside the record.
    pub fn set_data_offset(buf: &mut [u8], offset: u64) {
        put(buf, IO_DATA_OFFSET, &offset.to_ne_bytes());
    }
}
