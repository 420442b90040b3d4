//! Tracing/logging bootstrap for the terminal app.

use std::{env, io};

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,chat_terminal=debug,chat_backend=debug";

/// Initialize global tracing subscriber with severity gating from environment.
///
/// Output goes to stderr so it never interleaves with rendered frames.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `CHAT_TERMINAL_LOG`
/// 3) `CHAT_LOG`
/// 4) internal default filter
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(io::stderr)
        .with_env_filter(filter_from_env())
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    for key in ["CHAT_TERMINAL_LOG", "CHAT_LOG"] {
        if let Some(value) = env::var(key).ok().filter(|v| !v.trim().is_empty())
            && let Ok(filter) = EnvFilter::try_new(value)
        {
            return filter;
        }
    }

    EnvFilter::new(DEFAULT_FILTER)
}
