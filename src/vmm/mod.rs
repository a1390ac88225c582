pub mod boot;
pub mod devices;
pub mod event_loop;
pub mod exit;
pub mod input;
pub mod kvm_ctx;
pub mod memory;
pub mod run;
