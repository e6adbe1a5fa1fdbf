//! Logging utilities with larder segment prefixes.
//!
//! Library code only emits `tracing` events. Native hosts install a subscriber
//! with [`init`]; browser hosts bring their own.
#[cfg(feature = "subscriber")]
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing with larder defaults (`RUST_LOG`, falling back to `info`).
#[cfg(feature = "subscriber")]
pub fn init() {
    init_with_filter("info");
}

/// Initialize tracing with a custom default filter.
///
/// Panics if a global subscriber is already set; use [`try_init_with_filter`]
/// where that can happen (tests).
#[cfg(feature = "subscriber")]
pub fn init_with_filter(default_filter: &str) {
    registry(default_filter).init();
}

/// Like [`init_with_filter`], but returns `false` instead of panicking when a
/// subscriber is already installed.
#[cfg(feature = "subscriber")]
pub fn try_init_with_filter(default_filter: &str) -> bool {
    registry(default_filter).try_init().is_ok()
}

#[cfg(feature = "subscriber")]
fn registry(default_filter: &str) -> impl SubscriberInitExt {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
}

/// Segment prefixes for log lines.
pub mod prefix {
    /// Database operations
    pub const DB: &str = "⊔";
    /// Connection opened
    pub const OPEN: &str = "✿";
    /// Connection closed
    pub const CLOSE: &str = "❀";
}
