//! Tracing subscriber initialization.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

/// Install the JSON subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init() {
    init_with_default(DEFAULT_FILTER);
}

/// Like [`init`], but with a caller-chosen fallback filter directive.
pub fn init_with_default(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(true)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        init_with_default("debug");
    }
}
