use std::process::Command;

fn flatvmm() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_flatvmm"));
    cmd.env_remove("FLATVMM_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn missing_image_argument_prints_usage() {
    let out = flatvmm().output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage"));
}

#[test]
fn extra_arguments_are_rejected() {
    let out = flatvmm().args(["a.bin", "b.bin"]).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage"));
}

#[test]
fn unreadable_image_fails_before_touching_kvm() {
    let out = flatvmm().arg("/nonexistent/guest.bin").output().unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Unable to open file /nonexistent/guest.bin"), "{}", stderr);
    assert!(out.stdout.is_empty());
}

#[test]
fn bad_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("vmm.json");
    std::fs::write(&cfg, r#"{ "keyboard_capacity": 1 }"#).unwrap();
    let out = flatvmm().arg("/nonexistent/guest.bin").env("FLATVMM_CONFIG", &cfg).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("keyboard_capacity"));
}
