//! Run log for VkSharpen.
//!
//! One plain-text file per run, overwritten on every launch. It records the
//! chosen device, where the kernel was found, each image's progress and any
//! validation-layer output.
//!
//! File location (`<data>/VkSharpen/vksharpen.log`):
//!   Windows:  `%APPDATA%`
//!   Linux:    `$XDG_DATA_HOME` or `~/.local/share`
//!   macOS:    `~/Library/Application Support`
//!
//! `log_info!`, `log_warn!` and `log_err!` work as statements or as
//! expressions. Until [`init`] has opened the file they write nothing, so the
//! library and its tests never create a log. `--verbose` also copies each
//! line to stderr through [`set_echo`].

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static ECHO: AtomicBool = AtomicBool::new(false);

/// Mirror every log line to stderr as well (verbose CLI mode).
pub fn set_echo(enabled: bool) {
    ECHO.store(enabled, Ordering::Relaxed);
}

/// Append one raw line.  I/O errors are dropped.
pub fn write_line(line: &str) {
    if ECHO.load(Ordering::Relaxed) {
        eprintln!("{}", line);
    }
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// `[HH:MM:SS] [LEVEL] msg`; what the macros call.
pub fn write(level: &str, msg: &str) {
    let ts = timestamp();
    write_line(&format!("[{}] [{}] {}", ts, level, msg));
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write("INFO", &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write("WARN", &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write("ERROR", &format!($($arg)*))
    };
}

/// Open (truncating) the run log and hook panics into it.  Call once from
/// `main`, before the GPU context exists.
pub fn init() {
    let path = log_file_path();

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
    {
        Ok(f) => f,
        Err(e) => {
            // Not fatal: run without a log file
            eprintln!("warning: cannot open log {}: {}", path.display(), e);
            return;
        }
    };
    let _ = LOG_FILE.set(Mutex::new(file));

    write_line(&format!("--- VkSharpen run {} ---", human_timestamp()));
    write_line(&format!("log: {}", path.display()));

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    data_dir().join("VkSharpen").join("vksharpen.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

/// HH:MM:SS within the current UTC day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format_clock(d.as_secs()),
        Err(_) => "??:??:??".to_string(),
    }
}

fn format_clock(secs: u64) -> String {
    let h = (secs % 86400) / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

fn human_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_wraps_at_midnight() {
        assert_eq!(format_clock(0), "00:00:00");
        assert_eq!(format_clock(3 * 3600 + 25 * 60 + 7), "03:25:07");
        assert_eq!(format_clock(86400 + 61), "00:01:01");
    }

    #[test]
    fn macros_are_silent_before_init() {
        // No file is open in unit tests; this must not panic.
        crate::log_info!("image {}", 1);
        crate::log_warn!("slow device");
        crate::log_err!("lost device");
    }

    #[test]
    fn macros_work_as_match_arms() {
        let outcome: std::result::Result<u32, &str> = Ok(3);
        match outcome {
            Ok(n) => crate::log_info!("done {}", n),
            Err(e) => crate::log_err!("failed {}", e),
        }
        let flagged = true;
        if flagged { crate::log_warn!("as an expression") } else { crate::log_info!("unreachable") }
    }
}
