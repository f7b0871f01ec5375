use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use std::fs;
use std::path::{Path, PathBuf};

/// Maps a level name to a filter; unknown names fall back to `Info`.
pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

fn colored_level(level: log::Level) -> ColoredString {
    match level {
        log::Level::Error => "ERROR".red().bold(),
        log::Level::Warn => "WARN".yellow(),
        log::Level::Info => "INFO".green(),
        log::Level::Debug => "DEBUG".blue(),
        log::Level::Trace => "TRACE".dimmed(),
    }
}

/// # Logging Setup
///
/// Installs the global logger for `app_name`: colored lines on stdout and plain
/// lines in `<log_dir>/<app_name>_<timestamp>.log`. Older log files of the same
/// application are removed first, only the newest one is kept.
///
/// Returns the path of the file being written.
pub fn setup_logging(app_name: &str, log_dir: &Path, log_level: &str) -> Result<PathBuf> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    }

    cleanup_old_logs(log_dir, app_name)?;

    let log_file_name = format!(
        "{}_{}.log",
        app_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = log_dir.join(log_file_name);

    let console = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                colored_level(record.level()),
                message
            ))
        })
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S%.3f]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(fern::log_file(&log_path)?);

    fern::Dispatch::new()
        .level(parse_level(log_level))
        // Frame level noise from the websocket stack.
        .level_for("tungstenite", log::LevelFilter::Warn)
        .level_for("tokio_tungstenite", log::LevelFilter::Warn)
        .chain(console)
        .chain(file)
        .apply()?;

    Ok(log_path)
}

/// Deletes every `<app_name>_*.log` in `log_dir` except the most recently modified one.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str) -> Result<()> {
    let prefix = format!("{}_", app_name);

    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();

    // Newest first
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, path) in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Failed to delete old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}
