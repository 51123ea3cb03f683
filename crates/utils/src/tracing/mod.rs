use capbridge_core::CAPBRIDGE_LOG_VAR;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, instrument, span, trace, warn, Level, Span};

/// Initialize the tracing system
///
/// The filter comes from `CAPBRIDGE_LOG`, then `RUST_LOG`, then defaults to
/// `info`. Output is a compact, ANSI-free stderr formatter since the broker
/// normally runs without a terminal. Calling this twice returns an error.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = build_filter();

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .compact()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

fn build_filter() -> EnvFilter {
    std::env::var(CAPBRIDGE_LOG_VAR)
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Span covering one privileged call dispatch
pub fn dispatch_span(operation: &str, uid: i32) -> Span {
    span!(Level::DEBUG, "dispatch", operation = %operation, uid = uid)
}
