use tracing_subscriber::EnvFilter;

/// Install the global subscriber, writing to stderr.
///
/// Stdout is reserved for the Singer message stream. `RUST_LOG` wins over
/// `log_level` when set.
pub fn init(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
