use anyhow::Result;
use std::cmp::Reverse;
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log files kept in the log directory, the one about to be created included.
const KEEP_LOG_FILES: usize = 5;

/// Installs console and file logging. `RUST_LOG` wins over `log_level` when
/// set. The returned guard flushes the file writer on drop and must live
/// until the end of `main`.
pub fn setup_logging(log_dir: &Path, log_level: &str, json: bool) -> Result<WorkerGuard> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    // Make room for the file this run creates.
    cleanup_old_logs(log_dir, KEEP_LOG_FILES.saturating_sub(1))?;

    let log_file_name = format!(
        "server_backends_{}.log",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let appender = tracing_appender::rolling::never(log_dir, log_file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)?,
    };

    if json {
        let console = fmt::layer().with_target(true);
        let file = fmt::layer().with_ansi(false).with_writer(file_writer);
        tracing_subscriber::registry()
            .with(filter)
            .with(console.json().flatten_event(true))
            .with(file.json().flatten_event(true))
            .try_init()?;
    } else {
        let console = fmt::layer().with_target(true);
        let file = fmt::layer().with_ansi(false).with_writer(file_writer);
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(file)
            .try_init()?;
    }

    Ok(guard)
}

/// Deletes all but the `keep` most recently modified `.log` files in
/// `log_dir`. Returns how many were removed.
pub fn cleanup_old_logs(log_dir: &Path, keep: usize) -> Result<usize> {
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
        .map(|e| {
            let modified = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (e.path(), modified)
        })
        .collect();

    // Newest first
    entries.sort_by_key(|(_, modified)| Reverse(*modified));

    let mut removed = 0;
    for (path, _) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }

    Ok(removed)
}
