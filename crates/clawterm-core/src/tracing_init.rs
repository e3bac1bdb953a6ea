//! Tracing/logging initialization for the `clawterm` binaries.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the default filter directive for a binary crate.
///
/// The crate itself logs at `level`; the HTTP stack is kept at `warn` so
/// per-request noise does not drown the bridge lifecycle events.
pub fn default_directive(crate_target: &str, level: &str) -> String {
    format!("{crate_target}={level},tower_http=warn,axum=warn")
}

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `directive` when set. With `log_json`
/// the output is one JSON object per line for log aggregation.
///
/// Returns `false` if a global subscriber was already installed (tests
/// that initialise more than once).
pub fn init_tracing(directive: &str, log_json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_quiets_http_stack() {
        let directive = default_directive("clawterm_daemon", "debug");
        assert!(directive.starts_with("clawterm_daemon=debug"));
        assert!(directive.contains("tower_http=warn"));
        assert!(EnvFilter::try_new(&directive).is_ok());
    }
}
