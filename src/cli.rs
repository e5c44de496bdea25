//! CLI commands and argument parsing (§6 "CLI surface").
//!
//! Builds an [`Options`] from the parsed flags, starts an [`Operation`] against
//! [`crate::processor::run`], renders a progress bar while it runs, and maps the
//! terminal [`State`]/[`CoreError`] to the process exit code (§6 "Exit codes", §7).

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use crate::config::{MAX_COMMENTS_LEN, VOLUME_EXTENSION};
use crate::error::CoreError;
use crate::operation::{Operation, Options};
use crate::types::{ProcessorMode, SplitUnit};
use crate::ui;

/// Picocrypt NG - authenticated, error-corrected, optionally deniable file volumes.
#[derive(Parser)]
#[command(name = "picocrypt-ng")]
#[command(version)]
#[command(about = "Encrypt or decrypt files into authenticated, error-corrected .pcv volumes.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a .pcv volume from one or more plaintext inputs.
    Encrypt {
        #[arg(short, long = "input", required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long)]
        password: Option<String>,
        #[arg(short = 'P', long)]
        password_stdin: bool,
        #[arg(short, long = "keyfile")]
        keyfiles: Vec<PathBuf>,
        #[arg(long)]
        keyfile_ordered: bool,
        #[arg(long, default_value = "")]
        comments: String,
        #[arg(long)]
        paranoid: bool,
        #[arg(long)]
        reed_solomon: bool,
        #[arg(long)]
        deniability: bool,
        #[arg(long)]
        compress: bool,
        #[arg(long)]
        split: bool,
        #[arg(long, default_value_t = 0)]
        split_size: u64,
        #[arg(long, default_value = "mib")]
        split_unit: SplitUnit,
        #[arg(short, long)]
        quiet: bool,
        #[arg(short, long)]
        yes: bool,
    },

    /// Recover plaintext from a .pcv volume.
    Decrypt {
        #[arg(short, long = "input", required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long)]
        password: Option<String>,
        #[arg(short = 'P', long)]
        password_stdin: bool,
        #[arg(short, long = "keyfile")]
        keyfiles: Vec<PathBuf>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        verify_first: bool,
        #[arg(long)]
        auto_unzip: bool,
        #[arg(long)]
        same_level: bool,
        #[arg(long)]
        recombine: bool,
        #[arg(long)]
        deniability: bool,
        #[arg(short, long)]
        quiet: bool,
        #[arg(short, long)]
        yes: bool,
    },
}

/// Parses `std::env::args`.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}

/// Runs the parsed command to completion, returning the process exit code (§6).
pub fn run_command(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Encrypt {
            inputs,
            output,
            password,
            password_stdin,
            keyfiles,
            keyfile_ordered,
            comments,
            paranoid,
            reed_solomon,
            deniability,
            compress,
            split,
            split_size,
            split_unit,
            quiet,
            yes,
        } => {
            if comments.len() > MAX_COMMENTS_LEN {
                bail!("comments exceed the maximum length of {MAX_COMMENTS_LEN} bytes");
            }
            let password = resolve_password(password, password_stdin, yes, ProcessorMode::Encrypt)?;
            let output = output.unwrap_or_else(|| default_encrypt_output(&inputs, compress));

            let mut options = Options::new(ProcessorMode::Encrypt, inputs, output, password);
            options.keyfiles = keyfiles;
            options.keyfile_ordered = keyfile_ordered;
            options.comments = comments.into_bytes();
            options.paranoid = paranoid;
            options.reed_solomon = reed_solomon;
            options.deniability = deniability;
            options.compress = compress;
            options.split = split;
            options.split_size = split_size;
            options.split_unit = split_unit;

            run_operation(options, quiet)
        }

        Commands::Decrypt { inputs, output, password, password_stdin, keyfiles, force, verify_first, auto_unzip, same_level, recombine, deniability, quiet, yes } => {
            let password = resolve_password(password, password_stdin, yes, ProcessorMode::Decrypt)?;
            let recombine = recombine || is_split_chunk(&inputs[0]);
            let output = output.unwrap_or_else(|| default_decrypt_output(&inputs[0]));

            let mut options = Options::new(ProcessorMode::Decrypt, inputs, output, password);
            options.keyfiles = keyfiles;
            options.keep = force;
            options.verify_first = verify_first;
            options.auto_unzip = auto_unzip;
            options.same_level = same_level;
            options.recombine = recombine;
            options.deniability = deniability;

            run_operation(options, quiet)
        }
    }
}

/// Starts the operation and blocks on it, showing a progress bar unless `quiet`.
fn run_operation(options: Options, quiet: bool) -> Result<i32> {
    let mode = options.mode;
    let output = options.output.clone();
    let op = Operation::start(options, crate::processor::run);

    let bar = if quiet { None } else { Some(ui::progress::ProgressBar::new(0, mode.label())?) };
    let mut last_done = 0u64;
    loop {
        let status = op.status();
        if let Some(bar) = &bar {
            bar.set_total(status.progress.total_bytes);
            let delta = status.progress.bytes_done.saturating_sub(last_done);
            if delta > 0 {
                bar.add(delta);
                last_done = status.progress.bytes_done;
            }
        }
        if status.state.0.is_terminal() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    if let Some(bar) = bar {
        bar.finish();
    }

    match op.join() {
        Ok(()) => {
            ui::show_success(mode, &output);
            Ok(0)
        }
        Err(CoreError::Cancelled) => Ok(0),
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(1)
        }
    }
}

/// Resolves the effective password per §6: explicit `--password`, else one line from
/// stdin if `--password-stdin`, else an interactive masked prompt unless `--yes` makes an
/// interactive prompt unsuitable without also giving a password.
fn resolve_password(explicit: Option<String>, from_stdin: bool, yes: bool, mode: ProcessorMode) -> Result<String> {
    if let Some(p) = explicit {
        return Ok(p);
    }
    if from_stdin {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        return Ok(line.trim_end_matches(['\n', '\r']).to_owned());
    }
    if yes {
        bail!("password required in non-interactive mode");
    }
    match mode {
        ProcessorMode::Encrypt => ui::prompt::encryption_password(),
        ProcessorMode::Decrypt => ui::prompt::decryption_password(),
    }
}

/// Single input → `<in>.pcv`; multi-input or `--compress` → `encrypted-<epoch>.zip.pcv`
/// next to the first input (§6 "Filename conventions").
fn default_encrypt_output(inputs: &[PathBuf], compress: bool) -> PathBuf {
    if inputs.len() == 1 && !compress {
        let mut name = inputs[0].as_os_str().to_owned();
        name.push(".");
        name.push(VOLUME_EXTENSION);
        return PathBuf::from(name);
    }

    let dir = inputs[0].parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let epoch = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    dir.join(format!("encrypted-{epoch}.zip.{VOLUME_EXTENSION}"))
}

/// Strip trailing `.pcv`; `*.zip.pcv` → `*.zip` falls out naturally since `.zip` is the
/// remaining extension (§6 "Filename conventions").
fn default_decrypt_output(input: &Path) -> PathBuf {
    let s = input.to_string_lossy();
    let suffix = format!(".{VOLUME_EXTENSION}");
    if let Some(stripped) = s.strip_suffix(&suffix) {
        return PathBuf::from(stripped);
    }
    let mut out = input.to_path_buf();
    out.set_extension("");
    out
}

/// Whether `path`'s final extension is all digits, i.e. it looks like `<volume>.N` (a
/// split chunk), which auto-enables `--recombine` (§6).
fn is_split_chunk(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_input_encrypt_output_appends_extension() {
        let out = default_encrypt_output(&[PathBuf::from("/tmp/a.txt")], false);
        assert_eq!(out, PathBuf::from("/tmp/a.txt.pcv"));
    }

    #[test]
    fn multi_input_encrypt_output_is_a_zip_volume() {
        let out = default_encrypt_output(&[PathBuf::from("/tmp/a.txt"), PathBuf::from("/tmp/b.txt")], false);
        assert!(out.to_string_lossy().starts_with("/tmp/encrypted-"));
        assert!(out.to_string_lossy().ends_with(".zip.pcv"));
    }

    #[test]
    fn compressed_single_input_also_uses_zip_volume_naming() {
        let out = default_encrypt_output(&[PathBuf::from("/tmp/a.txt")], true);
        assert!(out.to_string_lossy().ends_with(".zip.pcv"));
    }

    #[test]
    fn decrypt_output_strips_pcv_extension() {
        assert_eq!(default_decrypt_output(Path::new("/tmp/a.txt.pcv")), PathBuf::from("/tmp/a.txt"));
        assert_eq!(default_decrypt_output(Path::new("/tmp/bundle.zip.pcv")), PathBuf::from("/tmp/bundle.zip"));
    }

    #[test]
    fn split_chunk_detection_matches_trailing_digit_extension() {
        assert!(is_split_chunk(Path::new("volume.pcv.0")));
        assert!(is_split_chunk(Path::new("volume.pcv.42")));
        assert!(!is_split_chunk(Path::new("volume.pcv")));
        assert!(!is_split_chunk(Path::new("volume.zip")));
    }
}
