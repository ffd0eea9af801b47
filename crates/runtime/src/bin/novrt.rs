//! Novus runtime CLI.
//!
//! Loads a serialized `.nova` executable, runs it, and translates the
//! terminal executor state into a process exit code. Everything else is the
//! VM's job; this is a thin shell.

use clap::Parser;
use nov_runtime::{ExecState, PlatformInterface, Settings};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "novrt")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Novus runtime - run a compiled 'nova' executable", long_about = None)]
struct Cli {
    /// Path to the executable (defaults to prog.nova in the working
    /// directory)
    #[arg(default_value = "prog.nova")]
    program: PathBuf,

    /// Arguments passed through to the program's environment
    #[arg(trailing_var_arg = true)]
    env_args: Vec<String>,

    /// Disable TCP socket platform calls
    #[arg(long)]
    no_sockets: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("NOV_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let bytes = match std::fs::read(&cli.program) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("novrt: failed to open '{}': {err}", cli.program.display());
            return ExitCode::from(1);
        }
    };

    let exe = match nov_asm::deserialize(&bytes) {
        Ok(exe) => exe,
        Err(err) => {
            eprintln!("novrt: corrupt 'nova' file: {err}");
            return ExitCode::from(ExecState::InvalidAssembly.exit_code() as u8);
        }
    };

    let program_path = cli
        .program
        .canonicalize()
        .unwrap_or(cli.program.clone())
        .display()
        .to_string();
    let iface = PlatformInterface::native(program_path, cli.env_args);
    let settings = Settings {
        sockets_enabled: !cli.no_sockets,
        intercept_interrupt: true,
    };

    let state = nov_runtime::run(exe, iface, settings);
    if state != ExecState::Success {
        eprintln!("runtime error: {state}");
    }
    ExitCode::from(state.exit_code() as u8)
}
