//! A single observer interface for everything the engine wants to report
//! mid-run: log lines, phase transitions, bandwidth samples, capture
//! counters, and a cancellation check the engine polls between chunks of
//! work. One interface, three renderers: `PlainProgress` for non-tty
//! output and CI logs, `RichProgress` for an interactive terminal
//! (indicatif bars), and `NullProgress` for tests and library embedding.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};

/// Everything the engine reports during a run. Implementors must be cheap
/// to call on a hot path (checksum progress can fire hundreds of times).
pub trait ProgressObserver: Send + Sync {
    /// A one-line, human-readable status message.
    fn log(&self, message: &str);

    /// Entering or advancing within a named phase, with completion percent
    /// (0-100) when known, or `None` for indeterminate phases.
    fn phase(&self, name: &str, pct: Option<u8>);

    /// A bandwidth sample in bytes/sec, as observed from the mirror driver.
    fn bandwidth(&self, bytes_per_sec: u64);

    /// An API/XHR response was captured during dynamic rendering; `n` is
    /// the running total for the current page.
    fn api_capture(&self, n: u64);

    /// A client-side route was discovered via router interception; `n` is
    /// the running total of distinct routes found so far.
    fn router_count(&self, n: u64);

    /// Checksum computation progress, 0-100.
    fn checksum(&self, pct: u8);

    /// Whether the run has been asked to cancel. The engine polls this
    /// between units of work (files, pages, chunks) and unwinds cleanly
    /// when it flips true.
    fn is_canceled(&self) -> bool;
}

/// Cooperative cancellation flag shared between a signal handler (or CLI
/// wrapper) and the engine. Cheap to clone; `Arc<AtomicBool>` underneath.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Plain line-oriented output: one `eprintln!` per event, no cursor
/// control. Used for non-tty stdout (CI logs, piped output) and as the
/// fallback when `indicatif` can't detect a terminal.
pub struct PlainProgress {
    cancel: CancelToken,
}

impl PlainProgress {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

impl ProgressObserver for PlainProgress {
    fn log(&self, message: &str) {
        eprintln!("{message}");
    }

    fn phase(&self, name: &str, pct: Option<u8>) {
        match pct {
            Some(p) => eprintln!("[{name}] {p}%"),
            None => eprintln!("[{name}]"),
        }
    }

    fn bandwidth(&self, bytes_per_sec: u64) {
        eprintln!("[bandwidth] {} KiB/s", bytes_per_sec / 1024);
    }

    fn api_capture(&self, n: u64) {
        eprintln!("[api] {n} response(s) captured");
    }

    fn router_count(&self, n: u64) {
        eprintln!("[router] {n} route(s) discovered");
    }

    fn checksum(&self, pct: u8) {
        eprintln!("[checksum] {pct}%");
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }
}

/// Interactive terminal renderer backed by `indicatif`: a spinner for
/// indeterminate phases, a bar once a percent is known.
pub struct RichProgress {
    cancel: CancelToken,
    bar: ProgressBar,
}

impl RichProgress {
    pub fn new(cancel: CancelToken) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { cancel, bar }
    }
}

impl ProgressObserver for RichProgress {
    fn log(&self, message: &str) {
        self.bar.println(message);
    }

    fn phase(&self, name: &str, pct: Option<u8>) {
        self.bar.set_message(name.to_string());
        if let Some(p) = pct {
            self.bar.set_position(p as u64);
        }
    }

    fn bandwidth(&self, bytes_per_sec: u64) {
        self.bar
            .set_message(format!("{} KiB/s", bytes_per_sec / 1024));
    }

    fn api_capture(&self, n: u64) {
        self.bar.set_message(format!("api captures: {n}"));
    }

    fn router_count(&self, n: u64) {
        self.bar.set_message(format!("routes found: {n}"));
    }

    fn checksum(&self, pct: u8) {
        self.bar.set_message("checksums");
        self.bar.set_position(pct as u64);
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }
}

/// No-op observer for library embedding and tests that don't care about
/// progress output.
#[derive(Default)]
pub struct NullProgress {
    cancel: CancelToken,
}

impl NullProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

impl ProgressObserver for NullProgress {
    fn log(&self, _message: &str) {}
    fn phase(&self, _name: &str, _pct: Option<u8>) {}
    fn bandwidth(&self, _bytes_per_sec: u64) {}
    fn api_capture(&self, _n: u64) {}
    fn router_count(&self, _n: u64) {}
    fn checksum(&self, _pct: u8) {}

    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }
}

/// Pick a renderer based on whether stderr is attached to a terminal.
pub fn auto_progress(cancel: CancelToken) -> Box<dyn ProgressObserver> {
    if std::io::stderr().is_terminal() {
        Box::new(RichProgress::new(cancel))
    } else {
        Box::new(PlainProgress::new(cancel))
    }
}
