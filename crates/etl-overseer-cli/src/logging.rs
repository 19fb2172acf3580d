//! Subscriber setup. Library events arrive through `tracing`; `log`
//! records from dependencies are bridged with `tracing-log`.

use anyhow::Context;
use clap::ValueEnum;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Installs the global subscriber writing to stderr. `RUST_LOG` directives
/// are honored; `verbose` raises the default level.
pub fn init(verbose: u8, format: LogFormat) -> anyhow::Result<()> {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()
        .context("Failed to parse RUST_LOG")?;

    let layer = fmt::layer().with_writer(std::io::stderr).with_target(verbose > 0);

    match format {
        LogFormat::Text => {
            let subscriber = tracing_subscriber::registry().with(filter).with(layer);
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to install tracing subscriber")?;
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry().with(filter).with(layer.json());
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to install tracing subscriber")?;
        }
    }

    tracing_log::LogTracer::init().context("Failed to bridge log records")?;
    Ok(())
}
