//! comonitor - COM vtable monitoring and inspection engine
//!
//! Entry point: argument parsing, logger setup, and the choice between the
//! interactive REPL and one-shot command execution.

use std::path::PathBuf;

use clap::Parser;

use comonitor::app::commands::run_line;
use comonitor::app::session::Session;
use comonitor::debug::EngineTarget;
use comonitor::ui::cli::run_cli;

/// COM vtable monitor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target process id (uses the live debugger backend on Windows)
    #[arg(short, long)]
    pid: Option<u32>,

    /// Preload a saved metadata index
    #[arg(short, long)]
    metadata: Option<PathBuf>,

    /// Execute one command line and exit with its outcome code
    #[arg(short, long)]
    command: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    let target = match args.pid {
        Some(pid) => {
            #[cfg(target_os = "windows")]
            {
                EngineTarget::Live { pid }
            }
            #[cfg(not(target_os = "windows"))]
            {
                log::warn!("no live debugger backend on this platform; using the stub engine");
                EngineTarget::Stub { pid }
            }
        }
        None => EngineTarget::Stub {
            pid: std::process::id(),
        },
    };

    let mut session = Session::new();
    if let Some(path) = &args.metadata {
        let stats = session.metadata_mut().load(path)?;
        log::info!(
            "preloaded metadata index from {}: {} record(s)",
            path.display(),
            stats.indexed
        );
    }

    match args.command {
        Some(line) => {
            let outcome = run_line(&mut session, target, &line);
            session.detach();
            std::process::exit(outcome.exit_code());
        }
        None => run_cli(&mut session, target),
    }
}
