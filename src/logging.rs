//! Build logging: one sink for both pipeline progress and raw tool output.
//!
//! `BuildLogger` implements [`log::Log`] so every `log::info!` /
//! `log::error!` in the crate reaches stderr immediately. Once the build
//! output directory exists, the pipeline attaches the build log file and the
//! same records (plus the raw make output teed via [`BuildLogger::log_line`])
//! are persisted there. The file is what the packager later copies into the
//! releases directory.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Dual-writing logger: stderr always, build log file once attached.
#[derive(Clone)]
pub struct BuildLogger {
    file: Arc<Mutex<Option<File>>>,
}

impl BuildLogger {
    pub fn new() -> Self {
        BuildLogger {
            file: Arc::new(Mutex::new(None)),
        }
    }

    /// Register a clone of this logger as the global `log` backend.
    ///
    /// Must run before any other pipeline work so early failures are still
    /// reported through the same sink.
    pub fn install(&self) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(self.clone()))?;
        log::set_max_level(LevelFilter::Info);
        Ok(())
    }

    /// Attach (or replace) the on-disk build log. Truncates any previous
    /// file at that path: each run produces one fresh log.
    pub fn attach_file(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(file);
        Ok(())
    }

    /// Append a raw tool output line (make, mkdtimg, zip) to the build log
    /// file without leveled decoration. Stderr echo is left to the caller so
    /// compile output is not double-printed.
    pub fn log_line(&self, line: &str) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }

    fn write_record(&self, level: Level, args: &std::fmt::Arguments<'_>) {
        let stamp = Local::now().format("%H:%M:%S%.3f");
        eprintln!("[{}] [{}] {}", stamp, level, args);

        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "[{}] [{}] {}", stamp, level, args);
        }
    }
}

impl Default for BuildLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for BuildLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.write_record(record.level(), record.args());
        }
    }

    fn flush(&self) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = guard.as_mut() {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_line_before_attach_is_a_noop() {
        let logger = BuildLogger::new();
        // Nothing to write into yet; must not panic or create files.
        logger.log_line("CC  init/main.o");
    }

    #[test]
    fn test_attached_file_receives_raw_lines() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("out").join("build.log");

        let logger = BuildLogger::new();
        logger.attach_file(&path).expect("attach failed");
        logger.log_line("CC  init/main.o");
        logger.log_line("LD  vmlinux");
        logger.flush();

        let content = std::fs::read_to_string(&path).expect("read failed");
        assert!(content.contains("CC  init/main.o"));
        assert!(content.contains("LD  vmlinux"));
    }

    #[test]
    fn test_attach_truncates_previous_log() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("build.log");

        let logger = BuildLogger::new();
        logger.attach_file(&path).expect("attach failed");
        logger.log_line("stale line");
        logger.flush();

        logger.attach_file(&path).expect("re-attach failed");
        logger.log_line("fresh line");
        logger.flush();

        let content = std::fs::read_to_string(&path).expect("read failed");
        assert!(content.contains("fresh line"));
        assert!(!content.contains("stale line"));
    }

    #[test]
    fn test_clones_share_the_sink() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("build.log");

        let logger = BuildLogger::new();
        let clone = logger.clone();
        logger.attach_file(&path).expect("attach failed");
        clone.log_line("written via clone");
        clone.flush();

        let content = std::fs::read_to_string(&path).expect("read failed");
        assert!(content.contains("written via clone"));
    }
}
