use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LogLevel, LoggerConfig};

const MODULE_WHITELIST: &[&str] = &["fininsight", "hyper", "hyper_util"];

fn init_env_filter(override_filter: Option<&String>, level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            // An explicit override replaces the whitelist entirely.
            override_filter.map_or_else(
                || {
                    EnvFilter::try_new(
                        MODULE_WHITELIST
                            .iter()
                            .map(|m| format!("{m}={level}"))
                            .collect::<Vec<_>>()
                            .join(","),
                    )
                },
                EnvFilter::try_new,
            )
        })
        .unwrap_or_else(|e| {
            eprintln!("invalid log filter ({e}), falling back to `{level}`");
            EnvFilter::new(level.to_string())
        })
}

fn init_layer<W>(make_writer: W, format: LogFormat, ansi: bool) -> Box<dyn Layer<Registry> + Sync + Send>
where
    W: for<'writer> MakeWriter<'writer> + Sync + Send + 'static,
{
    match format {
        LogFormat::Compact => fmt::Layer::default()
            .with_ansi(ansi)
            .with_writer(make_writer)
            .compact()
            .boxed(),
        LogFormat::Pretty => fmt::Layer::default()
            .with_ansi(ansi)
            .with_writer(make_writer)
            .pretty()
            .boxed(),
        LogFormat::Json => fmt::Layer::default()
            .with_ansi(ansi)
            .with_writer(make_writer)
            .json()
            .with_current_span(true)
            .boxed(),
    }
}

/// Installs the global subscriber. `level` already accounts for the debug flag.
pub fn init_tracing(config: &LoggerConfig, level: LogLevel) {
    if !config.enable {
        return;
    }
    let stdout_layer = init_layer(std::io::stdout, config.format, true);
    let env_filter = init_env_filter(config.override_filter.as_ref(), level);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(env_filter)
        .init();
}
