use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE: &str = "hacienda.log";

fn env_filter() -> EnvFilter {
  EnvFilter::builder()
    .with_default_directive(tracing::Level::INFO.into())
    .from_env_lossy()
}

/// Daily-rolling log file in `log_dir`, plus stderr for one-shot commands.
///
/// The TUI must not pass `stderr`, it would draw over the screen. Keep the
/// returned guards alive until exit or buffered lines are lost.
pub fn init(log_dir: &Path, stderr: bool) -> Result<Vec<WorkerGuard>> {
  let mut guards = Vec::new();

  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);
  let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
  guards.push(file_guard);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(file_writer)
    .with_ansi(false)
    .with_target(true)
    .with_filter(env_filter());

  let stderr_layer = if stderr {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(guard);
    Some(
      tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(writer)
        .with_filter(env_filter()),
    )
  } else {
    None
  };

  tracing_subscriber::registry()
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guards)
}
