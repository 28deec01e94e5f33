use clap::ValueEnum;
use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Structured JSON, one object per line
    #[default]
    Json,
    /// Human-readable multi-line output for development
    Pretty,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging in the given format; `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => Registry::default()
            .with(env_filter())
            .with(
                fmt_layer
                    .json()
                    .with_current_span(false)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(env_filter())
            .with(fmt_layer.pretty())
            .try_init(),
    }
    .wrap_err("Failed to install tracing subscriber")?;

    tracing::info!("Meshgate logging initialized ({:?})", format);
    Ok(())
}

/// Initialize logging with an explicit filter directive instead of `RUST_LOG`.
pub fn init_tracing_with_level(level: &str, format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_span_list(true))
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init(),
    }
    .wrap_err("Failed to install tracing subscriber")
}
