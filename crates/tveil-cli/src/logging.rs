//! Logging initialization

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::args::{Args, LogFormat};
use tveil_core::config::LoggingConfig;

/// Initialize logging from CLI arguments and the config's logging section.
///
/// Returns the file-writer guard, which must stay alive for the life of the
/// process or buffered log lines are lost.
pub fn init(args: &Args, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    // Verbosity flags beat the configured default level
    let default_directive = if args.quiet {
        "error".to_string()
    } else {
        match args.verbose {
            0 => logging.level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(
            default_directive
                .parse()
                .with_context(|| format!("invalid log level '{default_directive}'"))?,
        )
        .from_env_lossy();

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    match args.log_format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(
                    fmt::layer()
                        .with_target(args.verbose >= 2)
                        .with_thread_names(args.verbose >= 3),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(fmt::layer().compact())
                .init();
        }
    }

    Ok(guard)
}
