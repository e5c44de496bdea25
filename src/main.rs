//! Picocrypt NG entry point.
//!
//! # Exit codes
//! * 0 - success (or a user cancellation)
//! * 1 - any failure, message printed to stderr

use std::process;

use picocrypt_ng::cli::{self, Commands};

fn main() {
    let parsed = cli::parse();
    init_tracing(is_quiet(&parsed.command));

    let code = match cli::run_command(parsed) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            1
        }
    };
    process::exit(code);
}

fn is_quiet(command: &Commands) -> bool {
    match command {
        Commands::Encrypt { quiet, .. } | Commands::Decrypt { quiet, .. } => *quiet,
    }
}

/// Wires `tracing-subscriber` to `RUST_LOG`, defaulting to `info` when unset. `-q`
/// floors the level at `warn` so the progress bar isn't interleaved with info logs.
fn init_tracing(quiet: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if quiet { "warn" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))).with_target(false).init();
}
