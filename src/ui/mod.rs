//! Terminal presentation: a progress bar (`progress`) and password prompting
//! (`prompt`). The directory-scan file table and ASCII banner have no counterpart once
//! the CLI takes explicit `--input` paths (§6), so they are dropped.

use std::path::Path;

use crate::types::ProcessorMode;

pub mod progress;
pub mod prompt;

/// Prints a one-line success message after a completed encrypt/decrypt run.
pub fn show_success(mode: ProcessorMode, path: &Path) {
    let action = match mode {
        ProcessorMode::Encrypt => "encrypted",
        ProcessorMode::Decrypt => "decrypted",
    };
    let filename = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_else(|| path.display().to_string().into());
    println!("{} {}", console::style("✔").green().bright(), console::style(format!("File {action} successfully: {filename}")).white().bright());
}
