//! Environment-driven profiling session for instrumented binaries.
//!
//! The rewriter injects `let _takt_session = takt_runtime::session_from_env();`
//! at the top of `main`, right after the unit registrations. When the
//! `TAKT_PROFILE` variable is absent the session never starts and every
//! checkpoint reduces to a thread-local null check. On drop the session
//! finalizes the engine and prints the rendered report to stderr; escape
//! codes are stripped automatically when stderr is not a terminal.

use crate::engine::{registered_units, Stopwatch};
use crate::render::{render, RenderOptions};

/// Environment variable gating instrumentation for a run.
pub const PROFILE_VAR: &str = "TAKT_PROFILE";
/// Display format string (`<width><flags>[:<thresholds>]`).
pub const FORMAT_VAR: &str = "TAKT_FORMAT";
/// Minimum block total in seconds; quieter blocks are omitted.
pub const MIN_TOTAL_VAR: &str = "TAKT_MIN_TOTAL";

/// A running stopwatch over every registered unit, finalized and printed
/// when dropped.
pub struct Session {
    stopwatch: Stopwatch,
    options: RenderOptions,
}

impl Session {
    pub fn begin(options: RenderOptions) -> Self {
        Self {
            stopwatch: Stopwatch::start(registered_units()),
            options,
        }
    }

    /// Access the underlying engine, e.g. for an explicit mid-flight attach.
    pub fn stopwatch(&self) -> &Stopwatch {
        &self.stopwatch
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let report = self.stopwatch.finish();
        match render(report, &self.options) {
            Ok(text) if !text.is_empty() => anstream::eprintln!("{text}"),
            Ok(_) => {}
            Err(e) => eprintln!("takt: {e}"),
        }
    }
}

/// Start a session if `TAKT_PROFILE` is set, reading display configuration
/// from `TAKT_FORMAT` and `TAKT_MIN_TOTAL`. A malformed format string is
/// reported once and replaced by the defaults rather than aborting the
/// traced program.
pub fn session_from_env() -> Option<Session> {
    std::env::var_os(PROFILE_VAR)?;

    let fmt = std::env::var(FORMAT_VAR).unwrap_or_default();
    let mut options = match RenderOptions::parse(&fmt) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("takt: invalid {FORMAT_VAR} {fmt:?}: {e}; using defaults");
            RenderOptions::default()
        }
    };
    if let Ok(min) = std::env::var(MIN_TOTAL_VAR) {
        match min.parse::<f64>() {
            Ok(secs) => options.min_total = secs,
            Err(_) => eprintln!("takt: invalid {MIN_TOTAL_VAR} {min:?}; ignoring"),
        }
    }

    Some(Session::begin(options))
}
