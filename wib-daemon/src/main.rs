//! WIB control daemon (wibd)
//!
//! Privileged service owning the board's register window and I2C bus,
//! serving the typed request/reply protocol to a remote operator.
//!
//! # Resource Model
//! - One controller instance per process; register mapping and bus handles
//!   are acquired once at startup and released at exit
//! - Requests are processed one at a time behind the controller lock
//!
//! # Hardening
//! - Restrictive umask, working directory set to /
//! - Core dumps disabled, file descriptor limit bounded
//! - Bounded request size, read/write timeouts, connection limit

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use wib_core::sim::{sim_fabric, SimSpy};
use wib_core::{CryoWib, Wib, WibVariant};

use config::{DaemonConfig, Variant, DEFAULT_CONFIG_PATH};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Security Hardening
// ============================================================================

/// Set restrictive umask
fn set_secure_umask() {
    // SAFETY: umask is always safe to call - it only sets the file creation
    // mask for the process.
    unsafe { libc::umask(0o077) };
}

/// Change to the root directory
fn secure_working_directory() {
    if std::env::set_current_dir("/").is_err() {
        warn!("Could not chdir to /");
    }
}

/// Disable core dumps and bound the descriptor count
fn set_resource_limits() {
    set_rlimit(libc::RLIMIT_CORE, 0);
    set_rlimit(libc::RLIMIT_NOFILE, 256);
}

fn set_rlimit(resource: libc::__rlimit_resource_t, limit: u64) {
    let rlim = libc::rlimit {
        rlim_cur: limit as libc::rlim_t,
        rlim_max: limit as libc::rlim_t,
    };
    // SAFETY: setrlimit is safe with a known RLIMIT_* constant and an
    // initialized rlimit struct.
    if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
        warn!("Failed to set rlimit {}", resource);
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Journald when the systemd journal is present, stdout otherwise
fn init_tracing() {
    let log_level = std::env::var("WIB_LOG").unwrap_or_else(|_| "info".to_string());

    if std::path::Path::new("/run/systemd/journal/socket").exists() {
        if let Ok(journald) = tracing_journald::layer() {
            use tracing_subscriber::prelude::*;
            tracing_subscriber::registry()
                .with(journald)
                .with(tracing_subscriber::EnvFilter::new(&log_level))
                .init();
            return;
        }
        eprintln!("Failed to create journald layer, falling back to stdout");
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
}

// ============================================================================
// CLI
// ============================================================================

fn print_help() {
    eprintln!("wibd {} - WIB control daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    wibd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Config file (default {})", DEFAULT_CONFIG_PATH);
    eprintln!("    -l, --listen ADDR   Override the listen address");
    eprintln!("    -s, --simulate      Run against simulated hardware");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    WIB_LOG             Log level (trace, debug, info, warn, error)");
}

struct CliArgs {
    config_path: PathBuf,
    listen: Option<String>,
    simulate: bool,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut out = CliArgs {
        config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        listen: None,
        simulate: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                println!("wibd {}", VERSION);
                std::process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
                out.config_path = PathBuf::from(&args[i]);
            }
            "-l" | "--listen" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --listen requires an address argument");
                    std::process::exit(1);
                }
                out.listen = Some(args[i].clone());
            }
            "-s" | "--simulate" => out.simulate = true,
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    out
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn build_controller(cfg: &DaemonConfig) -> anyhow::Result<Wib> {
    let variant: Box<dyn WibVariant> = match cfg.variant {
        Variant::Cryo => Box::new(CryoWib),
    };

    if cfg.simulation {
        warn!("Running against SIMULATED hardware");
        let (regs, bus, _log) = sim_fabric();
        return Ok(Wib::with_parts(
            Box::new(regs),
            Box::new(bus),
            Box::new(SimSpy),
            variant,
        ));
    }

    Wib::open(&cfg.i2c_device, variant)
        .with_context(|| format!("open WIB hardware (i2c {})", cfg.i2c_device))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    set_secure_umask();
    secure_working_directory();
    set_resource_limits();

    let args = parse_args();
    init_tracing();
    info!("STARTUP: wibd {}", VERSION);

    let mut cfg = DaemonConfig::load(&args.config_path)
        .with_context(|| format!("load config {}", args.config_path.display()))?;
    if let Some(listen) = args.listen {
        cfg.listen = listen;
    }
    if args.simulate {
        cfg.simulation = true;
    }

    let mut wib = build_controller(&cfg)?;
    info!(family = wib.family(), "Controller ready");

    // Bring-up is best-effort at startup; operators can re-run it remotely
    if let Err(e) = wib.initialize() {
        error!("Startup initialization failed: {}", e);
    }

    let listener = TcpListener::bind(&cfg.listen)
        .await
        .with_context(|| format!("bind {}", cfg.listen))?;

    let shared = Arc::new(Mutex::new(wib));
    server::serve(listener, shared).await?;

    info!("Daemon stopped");
    Ok(())
}
