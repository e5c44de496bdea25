//! The `Operation` state machine (§4.10, §5): the single synchronous worker thread, its
//! live `Status`/`Progress` surface, and the cooperative cancellation flag. The frontend
//! (CLI) only ever starts an operation, polls its status, and optionally cancels it; the
//! pipeline itself lives in [`crate::processor`].
//!
//! Per §9's redesign note, this deliberately does not reproduce the reference design's
//! two process-wide `Options`/`Status` records. An `Operation` owns its state: an
//! `Arc<Mutex<Status>>` the worker writes and the frontend reads, and an
//! `Arc<AtomicBool>` cancel flag, both scoped to one run. No global state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::instrument;

use crate::error::CoreError;
use crate::types::{ProcessorMode, SplitUnit};

/// Every stage `Operation` passes through (§4.10). Transitions are one-way; `Cancelled`
/// is reachable from `Staging`/`Payload`/`Splitting` via cooperative polling, `Failed`
/// from any stage that returns an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Staging,
    HeaderIo,
    Kdf,
    Payload,
    Finalizing,
    Wrapping,
    Splitting,
    Done,
    Cancelled,
    Failed,
}

impl State {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Cancelled | State::Failed)
    }
}

/// Parameters for one encrypt or decrypt run (§3 "Operation"). Built by the CLI layer,
/// consumed by [`crate::processor::run`]. `paranoid`/`reed_solomon` are overwritten by
/// the processor on decrypt once the header's flags are known (§3 Lifecycle).
#[derive(Clone)]
pub struct Options {
    pub mode: ProcessorMode,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub password: String,
    pub keyfiles: Vec<PathBuf>,
    pub keyfile_ordered: bool,
    pub comments: Vec<u8>,
    pub paranoid: bool,
    pub reed_solomon: bool,
    pub deniability: bool,
    pub compress: bool,
    pub keep: bool,
    pub verify_first: bool,
    pub auto_unzip: bool,
    pub same_level: bool,
    pub recombine: bool,
    pub split: bool,
    pub split_size: u64,
    pub split_unit: SplitUnit,
}

impl Options {
    /// A minimal `Options` for programmatic construction; callers override fields they
    /// care about. Mirrors the "clean base" the core resets to on completion (§3).
    #[must_use]
    pub fn new(mode: ProcessorMode, inputs: Vec<PathBuf>, output: PathBuf, password: String) -> Self {
        Self {
            mode,
            inputs,
            output,
            password,
            keyfiles: Vec::new(),
            keyfile_ordered: false,
            comments: Vec::new(),
            paranoid: false,
            reed_solomon: false,
            deniability: false,
            compress: false,
            keep: false,
            verify_first: false,
            auto_unzip: false,
            same_level: false,
            recombine: false,
            split: false,
            split_size: 0,
            split_unit: SplitUnit::MiB,
        }
    }
}

/// Live progress counters (§5 "status fields"). `speed_bytes_per_sec`/`eta_secs` are
/// derived from `bytes_done`/elapsed time by [`StatusHandle::set_progress`], not tracked
/// independently, so they can never drift out of sync with `bytes_done`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Progress {
    pub bytes_done: u64,
    pub total_bytes: u64,
    pub speed_bytes_per_sec: f64,
    pub eta_secs: Option<f64>,
}

/// A consistent snapshot of everything the frontend may read. Every field is written
/// only by the worker thread and read only by the frontend, both only while holding the
/// same mutex (§5 "Ordering guarantees") — readers observe a consistent snapshot for the
/// fields they read together, but a snapshot taken a moment later may show a newer
/// combination (stale reads are cosmetic, per spec).
#[derive(Clone, Debug, Default)]
pub struct Status {
    pub state: StateOrIdle,
    pub progress: Progress,
    pub popup: Option<String>,
    pub main: String,
    pub kept: bool,
}

/// `State` with a `Default` impl (`Idle`), so `Status` can derive `Default`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateOrIdle(pub State);

impl Default for StateOrIdle {
    fn default() -> Self {
        Self(State::Idle)
    }
}

/// The worker's handle onto the shared status/cancel surface. Cheap to clone (both
/// fields are `Arc`); every pipeline stage function in [`crate::processor`] takes one by
/// reference to report transitions and check for cancellation without reaching into any
/// global.
#[derive(Clone)]
pub struct StatusHandle {
    status: Arc<Mutex<Status>>,
    cancelled: Arc<AtomicBool>,
    started_at: Instant,
}

impl StatusHandle {
    fn new() -> Self {
        Self { status: Arc::new(Mutex::new(Status::default())), cancelled: Arc::new(AtomicBool::new(false)), started_at: Instant::now() }
    }

    /// Moves to a new pipeline state. One-way per §4.10; callers are trusted not to move
    /// backwards.
    pub fn set_state(&self, state: State) {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).state = StateOrIdle(state);
    }

    /// Records `bytes_done` against `total_bytes` and derives speed/ETA from elapsed
    /// wall-clock time since the operation started.
    pub fn set_progress(&self, bytes_done: u64, total_bytes: u64) {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 { bytes_done as f64 / elapsed } else { 0.0 };
        let eta = if speed > 0.0 && total_bytes > bytes_done { Some((total_bytes - bytes_done) as f64 / speed) } else { None };
        let mut guard = self.status.lock().unwrap_or_else(|e| e.into_inner());
        guard.progress = Progress { bytes_done, total_bytes, speed_bytes_per_sec: speed, eta_secs: eta };
    }

    /// Adds `delta` bytes to the current `bytes_done`, keeping `total_bytes` as-is.
    /// Convenient for stages that stream through a read-passthrough (§4.1) without
    /// tracking an absolute byte position themselves.
    pub fn advance_progress(&self, delta: u64) {
        let (done, total) = {
            let guard = self.status.lock().unwrap_or_else(|e| e.into_inner());
            (guard.progress.bytes_done + delta, guard.progress.total_bytes)
        };
        self.set_progress(done, total);
    }

    /// Sets the main status line shown by the frontend (e.g. the error message on a
    /// terminal `Failed` state).
    pub fn set_main(&self, main: impl Into<String>) {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).main = main.into();
    }

    pub fn set_popup(&self, popup: Option<String>) {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).popup = popup;
    }

    pub fn set_kept(&self, kept: bool) {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).kept = kept;
    }

    /// A consistent snapshot for the frontend to read.
    #[must_use]
    pub fn snapshot(&self) -> Status {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The cooperative cancellation flag pipeline stages poll between blocks/entries/
    /// chunks (§5 "Suspension points").
    #[must_use]
    pub fn cancelled_flag(&self) -> &AtomicBool {
        &self.cancelled
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// An active encrypt or decrypt job (§3 "Operation"): owns the worker thread and the
/// `StatusHandle` it reports through. Exactly one `Operation` is meant to be active at a
/// time (§5), though nothing here enforces that globally — it's the CLI's job to not
/// start a second one concurrently.
pub struct Operation {
    handle: StatusHandle,
    join: Option<JoinHandle<Result<(), CoreError>>>,
}

impl Operation {
    /// Spawns the single worker thread and starts running `options` through `pipeline`
    /// immediately. `pipeline` is `crate::processor::run` in production; tests pass a
    /// stub to exercise the state machine without real I/O.
    #[instrument(skip(options, pipeline))]
    pub fn start<F>(options: Options, pipeline: F) -> Self
    where
        F: FnOnce(Options, &StatusHandle) -> Result<(), CoreError> + Send + 'static,
    {
        let handle = StatusHandle::new();
        let worker_handle = handle.clone();

        let join = thread::spawn(move || {
            let result = pipeline(options, &worker_handle);
            match &result {
                Ok(()) => worker_handle.set_state(State::Done),
                Err(CoreError::Cancelled) => worker_handle.set_state(State::Cancelled),
                Err(e) => {
                    worker_handle.set_main(e.to_string());
                    worker_handle.set_kept(worker_handle.snapshot().kept);
                    worker_handle.set_state(State::Failed);
                }
            }
            result
        });

        Self { handle, join: Some(join) }
    }

    /// Idempotent cancel (§8 property 2): setting it twice, or after completion, is a
    /// no-op — it's just an atomic store the worker may or may not still be polling.
    pub fn cancel(&self) {
        self.handle.cancelled_flag().store(true, Ordering::Relaxed);
    }

    /// A consistent snapshot of the current status, safe to call from any thread at any
    /// time (§5 "frontend runs on a separate thread and only reads progress/status").
    #[must_use]
    pub fn status(&self) -> Status {
        self.handle.snapshot()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Blocks until the worker thread completes, returning its result. Consumes the
    /// `Operation` since there is nothing left to join or cancel afterwards.
    pub fn join(mut self) -> Result<(), CoreError> {
        match self.join.take() {
            Some(join) => join.join().unwrap_or_else(|_| Err(CoreError::Io(std::io::Error::other("worker thread panicked")))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;

    fn options() -> Options {
        Options::new(ProcessorMode::Encrypt, vec![PathBuf::from("in.txt")], PathBuf::from("out.pcv"), "pw".to_string())
    }

    #[test]
    fn successful_run_reaches_done() {
        let op = Operation::start(options(), |_opts, handle| {
            handle.set_state(State::Staging);
            handle.set_progress(10, 10);
            handle.set_state(State::Done);
            Ok(())
        });
        op.join().unwrap();
    }

    #[test]
    fn failing_run_reaches_failed_with_message() {
        let op = Operation::start(options(), |_opts, _handle| Err(CoreError::HeaderCorrupt));
        let handle_for_status = op.handle.clone();
        let result = op.join();
        assert!(result.is_err());
        assert_eq!(handle_for_status.snapshot().state, StateOrIdle(State::Failed));
        assert!(handle_for_status.snapshot().main.contains("header corrupt"));
    }

    #[test]
    fn cancellation_is_observed_cooperatively_and_idempotent() {
        let op = Operation::start(options(), |_opts, handle| {
            loop {
                if handle.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                thread::sleep(Duration::from_millis(1));
            }
        });
        op.cancel();
        op.cancel(); // idempotent: no panic, no special-casing needed
        let result = op.join();
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[test]
    fn progress_snapshot_reflects_latest_write() {
        let handle = StatusHandle::new();
        handle.set_progress(50, 100);
        let snap = handle.snapshot();
        assert_eq!(snap.progress.bytes_done, 50);
        assert_eq!(snap.progress.total_bytes, 100);
    }

    #[test]
    fn advance_progress_accumulates_against_fixed_total() {
        let handle = StatusHandle::new();
        handle.set_progress(0, 100);
        handle.advance_progress(30);
        handle.advance_progress(20);
        assert_eq!(handle.snapshot().progress.bytes_done, 50);
        assert_eq!(handle.snapshot().progress.total_bytes, 100);
    }

    #[test]
    fn cancelled_flag_ordering_is_relaxed_but_visible_across_threads() {
        let handle = StatusHandle::new();
        let worker = handle.clone();
        let t = thread::spawn(move || {
            while !worker.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
        });
        handle.cancelled_flag().store(true, Ordering::Relaxed);
        t.join().unwrap();
    }
}
