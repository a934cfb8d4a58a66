//! Logging integration for repokit.
//!
//! Provides [`setup_logging`] to install a [`tracing`] subscriber from
//! [`Settings`](crate::settings::Settings), and [`query_span`] for wrapping
//! the round trip a terminal query operation makes.

use crate::settings::Settings;

/// Installs the global tracing subscriber described by `settings`.
///
/// The filter comes from `settings.log_level` and falls back to `info` when
/// the directive does not parse. Debug mode uses a pretty, human-readable
/// format; otherwise events are written as JSON. Installing twice is a no-op.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a span for one terminal query operation.
///
/// # Examples
///
/// ```
/// use repokit_core::logging::query_span;
///
/// let span = query_span("section", "count");
/// let _guard = span.enter();
/// tracing::debug!("counting");
/// ```
pub fn query_span(entity: &str, operation: &str) -> tracing::Span {
    tracing::info_span!("query", entity = entity, operation = operation)
}
