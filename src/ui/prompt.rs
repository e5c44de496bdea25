//! Interactive password prompting, used when `--password`/`--password-stdin` are both
//! absent on the CLI (§6).

use anyhow::{Result, anyhow, ensure};
use inquire::Password;

use crate::config::MAX_PASSWORD_LEN;

/// Prompts twice and requires both entries to match, since a typo here means permanent
/// data loss.
pub fn encryption_password() -> Result<String> {
    let password = prompt_password("Enter encryption password")?;
    let confirmation = prompt_password("Confirm password")?;
    ensure!(password == confirmation, "passwords do not match");
    Ok(password)
}

/// Prompts once; decryption either matches an existing password or it doesn't.
pub fn decryption_password() -> Result<String> {
    prompt_password("Enter decryption password")
}

fn prompt_password(message: &str) -> Result<String> {
    Password::new(message)
        .without_confirmation()
        .with_validator(move |input: &str| {
            if input.len() > MAX_PASSWORD_LEN {
                Ok(inquire::validator::Validation::Invalid(format!("password must be at most {MAX_PASSWORD_LEN} characters").into()))
            } else {
                Ok(inquire::validator::Validation::Valid)
            }
        })
        .prompt()
        .map_err(|e| anyhow!("password input failed: {e}"))
}
