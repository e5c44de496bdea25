//! Core error taxonomy.
//!
//! `CoreError` is the typed surface the pipeline stages return on; the CLI boundary
//! wraps it in `anyhow` for display. Whether a partial output is kept or deleted on
//! failure is decided inline, at the point each error is detected, by the `keep` flag
//! threaded through the header and payload codecs — not by inspecting the error after
//! the fact.
//!
//! `Fatal` conditions (a cryptographic primitive producing unusable output) are never
//! constructed as a `CoreError` — they `panic!` at the point of detection instead, since
//! they indicate a compromised platform and must not be caught or displayed as a normal
//! failure.

use std::io;

use thiserror::Error;

/// Which direction of I/O was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

impl std::fmt::Display for IoDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IoDirection::Read => "Read",
            IoDirection::Write => "Write",
        })
    }
}

/// Why authentication failed, distinguishing the user-visible causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    PasswordIncorrectOrTampered,
    DamagedPayload,
}

/// The error taxonomy described in the core's design: one variant per distinguishable
/// failure mode, carrying what the caller needs to render a message.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0} access denied by operating system")]
    AccessDenied(IoDirection),

    #[error("insufficient disk space")]
    InsufficientSpace,

    #[error("header corrupt: Reed-Solomon decoding of a header field failed")]
    HeaderCorrupt,

    #[error("authentication failed: {0}")]
    AuthFailure(AuthFailureReasonDisplay),

    #[error("incorrect keyfiles{}", if *ordered { "" } else { " or ordering" })]
    KeyfileMismatch {
        ordered: bool,
    },

    #[error("incorrect keyfiles: an even number of identical keyfiles cancelled out")]
    DuplicateKeyfiles,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Wrapper so `AuthFailureReason` gets a `Display` tailored to the user-visible string
/// from the design ("password incorrect or header tampered" / "damaged payload").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthFailureReasonDisplay(pub AuthFailureReason);

impl std::fmt::Display for AuthFailureReasonDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            AuthFailureReason::PasswordIncorrectOrTampered => write!(f, "password incorrect or header tampered"),
            AuthFailureReason::DamagedPayload => write!(f, "damaged payload"),
        }
    }
}

impl CoreError {
    /// Convenience constructor for the common auth-failure case.
    #[must_use]
    pub fn auth_failure(reason: AuthFailureReason) -> Self {
        CoreError::AuthFailure(AuthFailureReasonDisplay(reason))
    }
}

/// A cryptographic primitive produced unusable output (all-zero key/salt/nonce, CSPRNG
/// failure, cipher init failure). Per the design, this is fatal: the platform cannot be
/// trusted, so the process aborts rather than reporting a recoverable status.
#[track_caller]
pub fn fatal(what: &str) -> ! {
    panic!("fatal cryptographic failure: {what} — platform cannot be trusted, aborting");
}
