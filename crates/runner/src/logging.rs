// Logging setup
//
// SLUICE_LOG_FORMAT=json selects JSON lines, anything else pretty output.
// SLUICE_LOG_DIR adds a daily rolling file next to the console output.

use anyhow::Result;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for the whole process.
pub fn init_logging() -> Result<Option<WorkerGuard>> {
    let log_format = std::env::var("SLUICE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("sluice=info"))?;

    let (file_writer, guard) = match std::env::var("SLUICE_LOG_DIR") {
        Ok(dir) => {
            let dir = shellexpand::tilde(&dir).into_owned();
            let appender = tracing_appender::rolling::daily(dir, "sluice.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        Err(_) => (None, None),
    };

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .with(file_layer(file_writer))
                .try_init()?;
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .with(file_layer(file_writer))
                .try_init()?;
        }
    }

    Ok(guard)
}

fn file_layer<S>(writer: Option<NonBlocking>) -> Option<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    writer.map(|writer| fmt::layer().with_writer(writer).with_ansi(false))
}
