use super::event_loop::VcpuRun;
use super::exit::ExitRecord;
use crate::error::VmmError;
use anyhow::{bail, Context, Result};
use kvm_bindings::{kvm_run, kvm_userspace_memory_region, KVM_API_VERSION};
use kvm_ioctls::{Kvm, VcpuFd, VmFd};
use log::{debug, info};

pub struct KvmContext {
    pub kvm: Kvm,
    pub vm: VmFd,
}

impl KvmContext {
    pub fn new() -> Result<Self> {
        let kvm = Kvm::new().context("/dev/kvm")?;
        let version = kvm.get_api_version();
        if version != KVM_API_VERSION as i32 {
            bail!("KVM_GET_API_VERSION {}, expected {}", version, KVM_API_VERSION);
        }
        let vm = kvm.create_vm().context("KVM_CREATE_VM")?;
        info!("created VM (KVM API version {})", version);
        Ok(Self { kvm, vm })
    }

    /// Map `len` bytes of host memory at `host_addr` into the guest at `guest_addr`.
    ///
    /// # Safety
    ///
    /// The host range must stay mapped for as long as the VM can run.
    pub unsafe fn set_memory(&self, slot: u32, guest_addr: u64, len: u64, host_addr: u64) -> Result<()> {
        let region = kvm_userspace_memory_region {
            slot,
            flags: 0,
            guest_phys_addr: guest_addr,
            memory_size: len,
            userspace_addr: host_addr,
        };
        // SAFETY: the caller guarantees the host range outlives the VM.
        unsafe { self.vm.set_user_memory_region(region) }.context("KVM_SET_USER_MEMORY_REGION")?;
        debug!("slot {}: guest 0x{:x}..0x{:x}", slot, guest_addr, guest_addr + len);
        Ok(())
    }

    pub fn create_vcpu(&self, id: u64) -> Result<KvmVcpu> {
        let fd = self.vm.create_vcpu(id).context("KVM_CREATE_VCPU")?;
        let size = self.kvm.get_vcpu_mmap_size().context("KVM_GET_VCPU_MMAP_SIZE")?;
        if size < std::mem::size_of::<kvm_run>() {
            bail!("KVM_GET_VCPU_MMAP_SIZE unexpectedly small: {}", size);
        }
        Ok(KvmVcpu { fd, run_size: size })
    }
}

/// One vCPU and the size of its shared `kvm_run` area, which includes the
/// port I/O payload page that follows the struct.
pub struct KvmVcpu {
    fd: VcpuFd,
    run_size: usize,
}

impl KvmVcpu {
    pub fn fd(&self) -> &VcpuFd {
        &self.fd
    }
}

impl VcpuRun for KvmVcpu {
    fn run(&mut self) -> Result<ExitRecord<'_>, VmmError> {
        // kvm-ioctls' decoded exit is dropped; the loop reads the raw area so
        // that size, count and data_offset stay visible for validation.
        self.fd.run().map_err(VmmError::Run)?;
        let base = (self.fd.get_kvm_run() as *mut kvm_run).cast::<u8>();
        // SAFETY: `VcpuFd` maps `run_size` bytes (KVM_GET_VCPU_MMAP_SIZE) at
        // `base` and keeps them mapped while `self.fd` lives; the slice
        // borrows `self` mutably so it cannot outlive the next run call.
        let raw = unsafe { std::slice::from_raw_parts_mut(base, self.run_size) };
        Ok(ExitRecord::new(raw))
    }
}
