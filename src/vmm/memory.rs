use super::kvm_ctx::KvmContext;
use anyhow::{bail, Context, Result};
use vm_memory::{Bytes, GuestAddress, GuestMemory, GuestMemoryMmap};

/// Single contiguous guest RAM region starting at the load address.
pub struct GuestMem {
    pub mem: GuestMemoryMmap,
    base: GuestAddress,
    size: usize,
}

impl GuestMem {
    pub fn create(base: u64, size: usize) -> Result<Self> {
        let base = GuestAddress(base);
        let mem = GuestMemoryMmap::from_ranges(&[(base, size)]).context("allocating guest memory")?;
        Ok(Self { mem, base, size })
    }

    /// Copy a flat image verbatim to the start of the region.
    pub fn load_image(&self, image: &[u8]) -> Result<()> {
        if image.len() > self.size {
            bail!("guest image too large: {} > {} bytes", image.len(), self.size);
        }
        self.mem.write_slice(image, self.base).context("writing guest image")?;
        Ok(())
    }

    pub fn register(&self, ctx: &KvmContext) -> Result<()> {
        let host = self.mem.get_host_address(self.base).context("guest memory host address")?;
        // SAFETY: `self.mem` is kept alive by the caller until the VM is torn down.
        unsafe { ctx.set_memory(0, self.base.0, self.size as u64, host as u64) }
    }

    pub fn base(&self) -> GuestAddress {
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_lands_at_base() {
        let gm = GuestMem::create(0x1000, 0x2000).unwrap();
        gm.load_image(&[0xe4, 0x45, 0xf4]).unwrap();
        let mut out = [0u8; 4];
        gm.mem.read_slice(&mut out, GuestAddress(0x1000)).unwrap();
        assert_eq!(out, [0xe4, 0x45, 0xf4, 0x00]);
        assert_eq!(gm.base(), GuestAddress(0x1000));
    }

    #[test]
    fn oversized_image_is_rejected() {
        let gm = GuestMem::create(0x1000, 0x1000).unwrap();
        let image = vec![0x90u8; 0x1001];
        assert!(gm.load_image(&image).is_err());
        gm.load_image(&image[..0x1000]).unwrap();
    }
}
