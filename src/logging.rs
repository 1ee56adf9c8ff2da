//! Tracing subscriber bootstrap.

use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `CARDCRAWL_LOG` first, then `RUST_LOG`, then `info`.
///
/// Per-card events carry a `card_id` field; per-set events carry `set`.
pub fn init_tracing() {
    // A second init (tests, embedding binaries) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Filter resolved from the environment.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("CARDCRAWL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
