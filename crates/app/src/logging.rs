//! Tracing setup: stdout plus a daily-rolling file under `logs/`.

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Install the global subscriber. `RUST_LOG` controls the filter and
/// defaults to `info`.
pub fn init() -> anyhow::Result<()> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "soundwatch.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    // The worker guard must live for the whole process or buffered log
    // lines are lost at exit.
    std::mem::forget(guard);
    Ok(())
}
