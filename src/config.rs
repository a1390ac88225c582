use crate::error::VmmError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming an optional JSON file with config overrides.
pub const CONFIG_ENV: &str = "FLATVMM_CONFIG";

const PAGE_SIZE: u64 = 0x1000;

/// Monitor configuration. Every field has a default; a JSON file only needs
/// the fields it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Guest physical address the flat image is loaded at; also the entry point.
    pub load_addr: u64,
    /// Guest memory size (bytes), mapped starting at `load_addr`
    pub mem_size: usize,
    /// Console line buffer capacity
    pub console_capacity: usize,
    /// Keyboard ring capacity; holds at most capacity - 1 pending keys
    pub keyboard_capacity: usize,
    /// Stop the guest after this many exits
    pub max_exits: Option<u64>,
    /// Stop the guest once this much wall time has passed (checked between exits)
    pub timeout_ms: Option<u64>,
    /// Switch a TTY stdin to cbreak mode (no echo, no line buffering) for key input
    pub raw_terminal: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            load_addr: 0x1000,
            mem_size: 0x10000,
            console_capacity: 500,
            keyboard_capacity: 32,
            max_exits: None,
            timeout_ms: None,
            raw_terminal: true,
        }
    }
}

impl VmConfig {
    /// Defaults, overridden by the file named in `FLATVMM_CONFIG` when set.
    pub fn load() -> Result<Self, VmmError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, VmmError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VmmError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, VmmError> {
        let cfg: Self = serde_json::from_str(text).map_err(|e| VmmError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), VmmError> {
        if self.console_capacity < 2 {
            return Err(VmmError::Config(format!(
                "console_capacity must be at least 2, got {}",
                self.console_capacity
            )));
        }
        if self.keyboard_capacity < 2 {
            return Err(VmmError::Config(format!(
                "keyboard_capacity must be at least 2, got {}",
                self.keyboard_capacity
            )));
        }
        if self.mem_size == 0 || (self.mem_size as u64) % PAGE_SIZE != 0 {
            return Err(VmmError::Config(format!(
                "mem_size must be a non-zero multiple of 0x{:x}, got 0x{:x}",
                PAGE_SIZE, self.mem_size
            )));
        }
        if self.load_addr % PAGE_SIZE != 0 {
            return Err(VmmError::Config(format!(
                "load_addr must be page aligned, got 0x{:x}",
                self.load_addr
            )));
        }
        Ok(())
    }
}
