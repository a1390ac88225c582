use anyhow::Result;
use clap::Parser;
use flatvmm::VmConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "flatvmm")]
#[command(about = "Run a flat real-mode binary under KVM with port-mapped console, keyboard and timer")]
struct Args {
    /// Flat guest binary, loaded verbatim at the guest load address
    image: PathBuf,
}

fn run(args: &Args) -> Result<()> {
    let cfg = VmConfig::load()?;
    cfg.validate()?;
    flatvmm::run_vm(&args.image, &cfg)?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
