use std::sync::Once;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Installs the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` and falls back to `info`. Set
/// `DISABLE_COLOR` to get plain output, e.g. when logs go to a file.
pub fn init() -> anyhow::Result<()> {
    tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter_from_env("RUST_LOG"))
        .with_ansi(std::env::var_os("DISABLE_COLOR").is_none())
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

/// Enables logging in tests if the given variable is set.
///
/// The variable holds the filter directives, for example
/// `BOT_TEST_LOG=gitlab_telegram_bot=trace`.
pub fn maybe_enable_for_tests(var: &str) {
    static DO_INIT: Once = Once::new();
    if std::env::var_os(var).is_some() {
        DO_INIT.call_once(|| {
            let _ = tracing_subscriber::fmt::Subscriber::builder()
                .with_env_filter(filter_from_env(var))
                .with_ansi(std::env::var_os("DISABLE_COLOR").is_none())
                .with_test_writer()
                .try_init();
        });
    }
}

fn filter_from_env(var: &str) -> EnvFilter {
    EnvFilter::try_from_env(var).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
