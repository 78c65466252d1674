//! Log setup: journald when running under systemd, stderr otherwise.

use std::io::{IsTerminal as _, Write as _};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _, util::TryInitError, EnvFilter,
};

/// Installs the global subscriber. Verbosity defaults to INFO and can be changed
/// through `RUST_LOG`.
pub fn try_init(syslog_identifier: &str) -> Result<(), TryInitError> {
    // Checking for a terminal helps detect if we are running under systemd.
    let journald_layer = if std::io::stderr().is_terminal() {
        None
    } else {
        tracing_journald::layer()
            .inspect_err(|err| {
                eprintln!("failed connecting to journald socket. will write to stderr: {err}");
            })
            .map(|layer| layer.with_syslog_identifier(syslog_identifier.to_owned()))
            .ok()
    };
    let stderr_layer = journald_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(journald_layer)
        .with(filter)
        .try_init()
}

/// Call this at the end of the program.
pub fn flush() {
    std::io::stderr().flush().ok();
    std::io::stdout().flush().ok();
}
