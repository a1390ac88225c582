use super::devices::{Devices, MonotonicClock};
use super::event_loop::{LoopLimits, VmLoop};
use super::input::StdinKeys;
use super::{boot, kvm_ctx::KvmContext, memory::GuestMem};
use crate::config::VmConfig;
use crate::types::RunSummary;
use anyhow::Result;
use log::info;
use std::path::Path;

/// Boot `image` as a flat real-mode binary and serve its exits until it halts.
pub fn run_vm(image: &Path, cfg: &VmConfig) -> Result<RunSummary> {
    // 1) image + guest memory
    let code = boot::load_flat_image(image)?;
    let gm = GuestMem::create(cfg.load_addr, cfg.mem_size)?;
    gm.load_image(&code)?;
    info!("loaded {} ({} bytes) at 0x{:x}", image.display(), code.len(), cfg.load_addr);

    // 2) VM + vCPU
    let kvm = KvmContext::new()?;
    gm.register(&kvm)?;
    let vcpu = kvm.create_vcpu(0)?;
    boot::setup_real_mode(vcpu.fd(), cfg.load_addr)?;

    // 3) devices + host input
    let devices = Devices::new(
        cfg.console_capacity,
        cfg.keyboard_capacity,
        std::io::stdout(),
        MonotonicClock::new(),
    );
    let keys = StdinKeys::new(cfg.raw_terminal);
    let limits = LoopLimits { max_exits: cfg.max_exits, timeout_ms: cfg.timeout_ms };

    // 4) exit loop until halt or fatal exit
    let mut vml = VmLoop::new(vcpu, keys, devices, limits);
    let summary = vml.run_until_exit()?;
    info!(
        "guest halted: {} exits ({} io, {} mmio) in {:?}",
        summary.exits.total, summary.exits.io, summary.exits.mmio, summary.elapsed
    );
    Ok(summary)
}
