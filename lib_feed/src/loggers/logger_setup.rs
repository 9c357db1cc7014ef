//! # Logger Setup
//!
//! One call wires the `log` facade to two sinks: a colored console and a
//! timestamped file per process start. Older files of the same application are
//! rotated away first, so a log directory holds at most the previous run and
//! the current one.
//!
//! Files are named `<app>-<YYYY-mm-dd_HH-MM-SS>.log`; lexical order of the
//! names is chronological order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use glob::glob;
use log::{Level, LevelFilter};

/// Maps a textual level to a filter. Anything unrecognised is `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// File name for a log started now.
pub fn log_file_name(app_name: &str) -> String {
    format!("{}-{}.log", app_name, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"))
}

/// Deletes every log file of `app_name` in `log_dir` except the newest.
///
/// Returns the number of files removed. Files of other applications are left alone.
pub fn rotate_logs(app_name: &str, log_dir: &Path) -> Result<usize> {
    let pattern = format!("{}/{}-*.log", log_dir.display(), app_name);
    let mut log_files: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("invalid log rotation pattern {pattern}"))?
        .filter_map(|entry| entry.ok())
        .collect();

    // Newest first.
    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = 0;
    for old_file in log_files.iter().skip(1) {
        match fs::remove_file(old_file) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Error deleting old log file {}: {}", old_file.display(), e),
        }
    }
    Ok(removed)
}

fn colored_level(level: Level) -> colored::ColoredString {
    let label = level.to_string();
    match level {
        Level::Error => label.red().bold(),
        Level::Warn => label.yellow(),
        Level::Info => label.green(),
        Level::Debug => label.blue(),
        Level::Trace => label.dimmed(),
    }
}

/// Installs the global logger for `app_name`, writing into `log_dir`.
///
/// Returns the path of the file sink. Fails if the directory cannot be created
/// or a logger is already installed.
pub fn setup_logging(app_name: &str, log_dir: &Path, log_level: &str) -> Result<PathBuf> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;
    }

    // Clean up old log files, keeping only the most recent one
    rotate_logs(app_name, log_dir)?;

    let log_path = log_dir.join(log_file_name(app_name));
    let level = parse_level(log_level);

    let console = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {} [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f").to_string().dimmed(),
                colored_level(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(fern::log_file(&log_path)?);

    fern::Dispatch::new()
        .level(level)
        // Handshake chatter from the socket stack drowns the feed's own lines.
        .level_for("tungstenite", LevelFilter::Warn)
        .level_for("tokio_tungstenite", LevelFilter::Warn)
        .level_for("rustls", LevelFilter::Warn)
        .chain(console)
        .chain(file)
        .apply()
        .context("a global logger is already installed")?;

    Ok(log_path)
}
