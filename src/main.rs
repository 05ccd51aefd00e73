use std::path::PathBuf;
use std::process::exit;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::{error, warn};

use benchenv::config::Config;
use benchenv::{run_reset, run_set, SetOptions};

// Shared by every failure kind: usage errors, baseline mismatches, apply
// failures and verification mismatches all abort with this status so
// callers can tell "environment not ready" from the collaborators' own
// exit codes.
const FAILURE_EXIT: i32 = 42;

#[derive(Parser)]
#[command(name = "benchenv")]
#[command(version)]
#[command(about = "Prepare and restore a Linux host for low-variance benchmarking")]
struct Cli {
    #[command(subcommand)]
    command: SubCmd,

    /// Config file (default: ./benchenv.json if present, else built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum SubCmd {
    /// Verify the baseline, then drive the host into the benchmarking state
    Set(SetArgs),

    /// Fully restore the host, regardless of how far a `set` got
    Reset,
}

#[derive(Args)]
struct SetArgs {
    /// Leave background services running
    #[arg(long)]
    disable_services: bool,

    /// Leave CPU frequency scaling untouched
    #[arg(long)]
    disable_frequency_control: bool,

    /// Do not shield the benchmark cores
    #[arg(long)]
    disable_shielding: bool,

    /// Leave interrupt routing untouched
    #[arg(long)]
    disable_interrupt_affinity: bool,
}

fn init_logger(verbose: bool) -> Result<()> {
    let level = if verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        level,
        lcfg.build(),
        simplelog::TerminalMode::Stdout,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let cfg = Config::load(cli.config.as_deref())?;

    // Every collaborator needs root; warn early instead of failing on the
    // first mutation so read-only dry runs against fake roots still work.
    if !nix::unistd::Uid::effective().is_root() {
        warn!("not running as root, mutating the host will likely fail");
    }

    match &cli.command {
        SubCmd::Set(args) => {
            let opts = SetOptions {
                disable_services: args.disable_services,
                disable_frequency_control: args.disable_frequency_control,
                disable_shielding: args.disable_shielding,
                disable_interrupt_affinity: args.disable_interrupt_affinity,
            };
            run_set(&cfg, &opts)
        }
        SubCmd::Reset => run_reset(&cfg),
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // usage problems go to stdout and share the failure status;
            // --help/--version are not failures
            print!("{}", err.render());
            let code = match err.kind() {
                clap::error::ErrorKind::DisplayHelp
                | clap::error::ErrorKind::DisplayVersion => 0,
                _ => FAILURE_EXIT,
            };
            exit(code);
        }
    };

    if let Err(err) = init_logger(cli.verbose) {
        println!("failed to initialize logging: {err}");
        exit(FAILURE_EXIT);
    }

    if let Err(err) = run(&cli) {
        error!("{}", err);
        for cause in err.chain().skip(1) {
            error!("  caused by: {}", cause);
        }
        exit(FAILURE_EXIT);
    }
}
