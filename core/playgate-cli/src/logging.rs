//! File logging for the front-end.
//!
//! stdout belongs to the user, so logs go to a daily rolling file under
//! `~/.playgate/logs`. The returned guard flushes the non-blocking writer on
//! drop and must live until the process exits.

use playgate_core::config::log_dir;
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "playgate.log";
const DEBUG_LOG_ENV: &str = "PLAYGATE_DEBUG_LOG";

pub fn init() -> Option<WorkerGuard> {
    let dir = log_dir().ok()?;
    if std::fs::create_dir_all(&dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(filter);

    // A subscriber may already be installed (tests); keep going without one.
    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        return None;
    }
    Some(guard)
}

fn debug_enabled() -> bool {
    env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}
