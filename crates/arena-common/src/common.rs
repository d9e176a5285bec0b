// common.rs - process-wide services: logging bootstrap and timing

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static LOGGING_READY: AtomicBool = AtomicBool::new(false);

/// Installs the global tracing subscriber.
///
/// `level` is an `EnvFilter` directive ("info", "arena_game=debug", ...);
/// an invalid directive falls back to `info`. Calling this twice is a no-op.
pub fn init_logging(level: &str, json: bool) {
    if LOGGING_READY.swap(true, Ordering::SeqCst) {
        return;
    }

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    // another subscriber may already be installed by a test harness
    let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();

    tracing::info!(target: "common", log_level = level, json, "logging initialized");
}

static START: OnceLock<Instant> = OnceLock::new();

/// Milliseconds since the first call.
pub fn sys_milliseconds() -> u64 {
    START.get_or_init(Instant::now).elapsed().as_millis() as u64
}
