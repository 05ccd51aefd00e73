// benchenv -- drive a Linux host into a low-variance benchmarking state
// and back out of it, exactly.
//
// Library crate so the integration tests can exercise the controllers
// directly; the binary in main.rs is a thin CLI over `run_set`/`run_reset`.

pub mod check;
pub mod config;
pub mod cpufreq;
pub mod irq;
pub mod services;
pub mod shield;
pub mod util;

use anyhow::Result;
use log::info;

use check::PreChecker;
use config::Config;
use cpufreq::CpufreqController;
use irq::IrqAffinity;
use services::ServiceController;
use shield::ShieldController;

/// Per-subsystem opt-outs for `set`. `reset` deliberately has none: it
/// always restores everything it knows how to restore.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetOptions {
    pub disable_services: bool,
    pub disable_frequency_control: bool,
    pub disable_shielding: bool,
    pub disable_interrupt_affinity: bool,
}

/// The `set` pipeline: baseline checks, then the four subsystems in fixed
/// order. The first failure anywhere aborts the invocation; nothing is
/// rolled back (run `reset` for that).
pub fn run_set(cfg: &Config, opts: &SetOptions) -> Result<()> {
    info!("verifying host against the expected baseline");
    PreChecker::new(cfg).run_all()?;

    if opts.disable_services {
        info!("service control disabled, leaving background services running");
    } else {
        ServiceController::new(cfg).stop_all()?;
    }

    if opts.disable_frequency_control {
        info!("frequency control disabled, leaving cpu scaling untouched");
    } else {
        CpufreqController::new(cfg).set_fixed()?;
    }

    if opts.disable_shielding {
        info!("shielding disabled, leaving cpusets untouched");
    } else {
        ShieldController::new(cfg).setup()?;
    }

    if opts.disable_interrupt_affinity {
        info!("interrupt affinity disabled, leaving interrupt routing untouched");
    } else {
        IrqAffinity::new(cfg).setup()?;
    }

    info!("benchmark environment ready");
    Ok(())
}

/// The `reset` pipeline, the reverse-ish fixed order of `set`. Safe to run
/// no matter how far a previous `set` got, and safe to run twice.
pub fn run_reset(cfg: &Config) -> Result<()> {
    IrqAffinity::new(cfg).reset()?;
    ShieldController::new(cfg).teardown()?;
    CpufreqController::new(cfg).reset_adaptive()?;
    ServiceController::new(cfg).start_all()?;
    info!("benchmark environment restored");
    Ok(())
}
