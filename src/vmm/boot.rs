use anyhow::{Context, Result};
use kvm_ioctls::VcpuFd;
use log::debug;
use std::path::Path;

/// Addends preloaded for the classic `add %bl, %al` sample guests.
const BOOT_RAX: u64 = 2;
const BOOT_RBX: u64 = 2;
/// Bit 1 of RFLAGS is reserved and must be set.
const BOOT_RFLAGS: u64 = 0x2;

pub fn load_flat_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Unable to open file {}", path.display()))
}

/// Start the vCPU in real mode with CS based at 0 and RIP at `entry`.
pub fn setup_real_mode(vcpu: &VcpuFd, entry: u64) -> Result<()> {
    let mut sregs = vcpu.get_sregs().context("KVM_GET_SREGS")?;
    sregs.cs.base = 0;
    sregs.cs.selector = 0;
    vcpu.set_sregs(&sregs).context("KVM_SET_SREGS")?;

    let mut regs = vcpu.get_regs().context("KVM_GET_REGS")?;
    regs.rip = entry;
    regs.rax = BOOT_RAX;
    regs.rbx = BOOT_RBX;
    regs.rflags = BOOT_RFLAGS;
    vcpu.set_regs(&regs).context("KVM_SET_REGS")?;
    debug!("vcpu: real mode, RIP=0x{:x}", entry);
    Ok(())
}
