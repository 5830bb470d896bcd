//! Tracing/log setup

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Build the level filter from `RUST_LOG`, falling back to `info`.
pub(crate) fn build_loglevel_filter_layer(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global tracing subscriber: an env-filtered, human-readable
/// fmt layer. Resolvers and the registry log through `tracing`'s macros;
/// where this ends up is a collaborator's decision (stdout here, a
/// systemd journal sink or file appender in deployment) and out of scope.
pub fn init_logging(debug: bool) -> Result<(), String> {
    let default = if debug { "debug" } else { "info" };
    let subscriber = tracing_subscriber::registry()
        .with(build_loglevel_filter_layer(default))
        .with(tracing_subscriber::fmt::layer());
    subscriber
        .try_init()
        .map_err(|err| format!("failed to install tracing subscriber: {err}"))
}
