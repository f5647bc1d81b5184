use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter(verbose: bool, configured_level: Option<&str>) -> EnvFilter {
    let fallback = match (verbose, configured_level) {
        (true, _) => "postex_sync=debug,info".to_string(),
        (false, Some(level)) => format!("postex_sync={}", level),
        (false, None) => "postex_sync=info".to_string(),
    };

    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Human readable output for one-shot commands.
pub fn init_cli_logger(verbose: bool, configured_level: Option<&str>) {
    tracing_subscriber::registry()
        .with(env_filter(verbose, configured_level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// JSON lines for the long-running `serve` mode; shipping and rotating them is
/// left to whatever collects stdout.
pub fn init_service_logger(verbose: bool, configured_level: Option<&str>) {
    tracing_subscriber::registry()
        .with(env_filter(verbose, configured_level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(),
        )
        .init();
}
