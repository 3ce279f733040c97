//! Leveled, timestamped logging to stdout/stderr plus an optional append-only log file.

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{OnceLock, RwLock};

use chrono::Local;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Quiet = 4,
}

impl Level {
    fn from_u8(v: u8) -> Level {
        match v {
            0 => Level::Debug,
            1 => Level::Info,
            2 => Level::Warn,
            3 => Level::Error,
            _ => Level::Quiet,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARNING",
            Level::Error => "ERROR",
            Level::Quiet => "",
        }
    }

    /// Parse `PKGMIRROR_LOG` style values.
    pub fn parse(s: &str) -> Option<Level> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "verbose" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "quiet" | "off" => Some(Level::Quiet),
            _ => None,
        }
    }
}

static THRESHOLD: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FILE: OnceLock<RwLock<Option<PathBuf>>> = OnceLock::new();
static STDERR_ONLY: AtomicBool = AtomicBool::new(false);

/// Set the threshold. `PKGMIRROR_LOG` overrides the requested level when set.
pub fn init(level: Level, log_file: Option<PathBuf>) {
    let level = env::var("PKGMIRROR_LOG")
        .ok()
        .and_then(|v| Level::parse(&v))
        .unwrap_or(level);
    THRESHOLD.store(level as u8, Ordering::Relaxed);
    let slot = LOG_FILE.get_or_init(|| RwLock::new(None));
    if let Ok(mut guard) = slot.write() {
        *guard = log_file;
    }
}

/// Send every console line to stderr, keeping stdout for machine-readable output.
pub fn console_to_stderr(on: bool) {
    STDERR_ONLY.store(on, Ordering::Relaxed);
}

pub fn enabled(level: Level) -> bool {
    level >= Level::from_u8(THRESHOLD.load(Ordering::Relaxed)) && level != Level::Quiet
}

fn emit(level: Level, message: &str) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let line = format!("{} - {} - {}", timestamp, level.label(), message);

    if enabled(level) {
        if level >= Level::Warn || STDERR_ONLY.load(Ordering::Relaxed) {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }

    // The file gets everything from Info up, regardless of console threshold.
    if level < Level::Info && !enabled(level) {
        return;
    }
    let path = LOG_FILE
        .get()
        .and_then(|slot| slot.read().ok().and_then(|g| g.clone()));
    if let Some(path) = path {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
            let _ = writeln!(file, "{}", line);
        }
    }
}

pub fn debug(message: &str) {
    emit(Level::Debug, message);
}

pub fn info(message: &str) {
    emit(Level::Info, message);
}

pub fn warn(message: &str) {
    emit(Level::Warn, message);
}

pub fn error(message: &str) {
    emit(Level::Error, message);
}
