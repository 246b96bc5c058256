use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use steward::core::catalog::load_catalogs;
use steward::provider::Registry;
use steward::run::{Report, RunOptions};
use steward::secrets::SecretStore;
use steward::{config, run};

/// Converge this host to the state declared in one or more catalog files.
#[derive(Debug, Parser)]
#[command(name = "steward", version)]
struct Cli {
    /// Catalog files, loaded and merged in order.
    #[arg(required = true)]
    catalogs: Vec<PathBuf>,

    /// Keep converging independent branches when a resource fails, instead of halting.
    #[arg(long)]
    continue_on_error: bool,

    /// Secret store to resolve the catalog's `secrets` section from.
    /// Defaults to secrets.yml in the steward configuration directory.
    #[arg(long)]
    secrets: Option<PathBuf>,

    /// Write the serialized run report to this file.
    #[arg(long)]
    report: Option<PathBuf>,
}

/// The interrupt flag shared with the signal handler. The handler itself may only do an atomic
/// store; everything else happens on the main thread, between resources.
static INTERRUPT: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_signal(_: libc::c_int) {
    if let Some(flag) = INTERRUPT.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

fn install_signal_flag(flag: Arc<AtomicBool>) {
    let _ = INTERRUPT.set(flag);
    let handler: extern "C" fn(libc::c_int) = handle_signal;
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match execute(&cli) {
        Ok(report) => match report.exit_code() {
            0 => ExitCode::SUCCESS,
            _ => ExitCode::from(1),
        },
        Err(error) => {
            // Configuration errors: the run never touched the host.
            eprintln!("steward: {error:#}");
            ExitCode::from(2)
        }
    }
}

fn execute(cli: &Cli) -> anyhow::Result<Report> {
    let mut catalog = load_catalogs(&cli.catalogs)?;

    if !catalog.secrets.is_empty() {
        let path = cli
            .secrets
            .clone()
            .unwrap_or_else(|| config::config_dir().join("secrets.yml"));
        let store = SecretStore::load(&path)?;
        catalog.resolve_secrets(&store)?;
    }

    let registry = Registry::with_builtins();
    let options = RunOptions {
        continue_on_error: cli.continue_on_error,
        ..RunOptions::default()
    };
    install_signal_flag(Arc::clone(&options.interrupt));

    let report = run::run(&catalog, &registry, &options)?;
    println!("{report}");

    if let Some(path) = &cli.report {
        let rendered = serde_yaml::to_string(&report).context("failed to serialize run report")?;
        fs::write(path, rendered)
            .with_context(|| format!("failed to write run report to {}", path.display()))?;
    }

    Ok(report)
}
