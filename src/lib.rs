pub mod browser;
pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod search;
pub mod site;
pub mod wait;

/// Install the fmt subscriber used by the binaries.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,spectrumscraper=debug"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
}

#[cfg(test)]
pub(crate) fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,spectrumscraper=debug")),
        )
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
