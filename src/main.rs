//! imbroker CLI - text-input broker daemon.
//!
//! This is the main binary entry point. See the `imbroker` library for the
//! core functionality.

use anyhow::{Context, Result};
use imbroker::engine::provider::ProviderTable;
use imbroker::panel::{PanelEndpoint, PanelLauncher};
use imbroker::rendezvous::{self, DisplayInfo};
use imbroker::socket::listener::ListenerEndpoint;
use imbroker::{Broker, BrokerConfig, Reactor};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// Options for `imbroker start`.
struct StartOptions {
    shared: bool,
    display: Option<String>,
    no_panel_spawn: bool,
}

/// Runs the broker until a signal or the panel asks it to stop.
fn run_broker(opts: StartOptions) -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;

    let mut config = BrokerConfig::load()?;
    if opts.shared {
        config.shared_engines = true;
    }

    let display = DisplayInfo::resolve(opts.display.as_deref())?;
    let client_path = rendezvous::client_socket_path(&display)?;
    let panel_path = rendezvous::panel_socket_path(&display)?;

    let listener = ListenerEndpoint::bind(&client_path)
        .with_context(|| format!("cannot listen on {}", client_path.display()))?;

    let launcher = if opts.no_panel_spawn {
        None
    } else {
        config.panel_program().map(|program| PanelLauncher {
            program,
            display: display.raw.clone(),
            config_name: config.panel_config_name.clone(),
        })
    };
    let mut panel = PanelEndpoint::new(&panel_path, launcher);
    if let Err(e) = panel.connect() {
        log::warn!("[panel] not available yet: {e:#}");
    }

    let broker = Broker::new(config, ProviderTable::with_builtin(), panel);
    log::info!(
        "imbroker v{} listening on {} (display {})",
        env!("CARGO_PKG_VERSION"),
        client_path.display(),
        display.raw
    );

    let mut reactor = Reactor::new(Some(listener), broker);
    reactor.run(&SHUTDOWN_FLAG)?;
    log::info!("imbroker stopped");
    Ok(())
}

// CLI
#[derive(Parser)]
#[command(name = "imbroker")]
#[command(version)]
#[command(about = "Text-input broker between client applications, the panel and composition engines")]
struct Cli {
    /// Write logs to this file instead of stderr (also IMBROKER_LOG_FILE)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker daemon
    Start {
        /// Share one engine session across all input contexts
        #[arg(long)]
        shared: bool,
        /// Display to serve (defaults to $DISPLAY)
        #[arg(long)]
        display: Option<String>,
        /// Never spawn the panel, only connect to a running one
        #[arg(long)]
        no_panel_spawn: bool,
    },
    /// Print the client socket path for a display
    SocketPath {
        /// Display to resolve (defaults to $DISPLAY)
        #[arg(long)]
        display: Option<String>,
    },
}

fn init_logging(log_file: Option<PathBuf>) -> Result<()> {
    let log_path = log_file.or_else(|| std::env::var("IMBROKER_LOG_FILE").ok().map(PathBuf::from));
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Some(path) = log_path {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file)?;

    match cli.command {
        Commands::Start {
            shared,
            display,
            no_panel_spawn,
        } => run_broker(StartOptions {
            shared,
            display,
            no_panel_spawn,
        })?,
        Commands::SocketPath { display } => {
            let display = DisplayInfo::resolve(display.as_deref())?;
            println!("{}", rendezvous::client_socket_path(&display)?.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_flags_parse() {
        let cli = Cli::parse_from(["imbroker", "start", "--shared", "--display", ":3"]);
        match cli.command {
            Commands::Start {
                shared, display, ..
            } => {
                assert!(shared);
                assert_eq!(display.as_deref(), Some(":3"));
            }
            Commands::SocketPath { .. } => panic!("expected start"),
        }
    }
}
