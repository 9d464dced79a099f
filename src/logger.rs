use chrono::Utc;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Transition log for manager and supervisor events: `<UTC timestamp> <event>`
/// per line. Silent when no `log_path` is configured. The first I/O failure
/// is reported once and turns the log off; commands never fail because of it.
#[derive(Debug)]
pub(crate) struct Logger {
    path: Option<PathBuf>,
    disabled: AtomicBool,
}

impl Logger {
    pub(crate) fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            disabled: AtomicBool::new(false),
        }
    }

    pub(crate) fn disabled() -> Self {
        Self::new(None)
    }

    pub(crate) fn log_transition(&self, event: &str) {
        let Some(path) = &self.path else {
            return;
        };
        if self.disabled.load(Ordering::Relaxed) {
            return;
        }
        let line = format!(
            "{} {}\n",
            Utc::now().format(TIMESTAMP_FORMAT),
            sanitize_log_value(event)
        );
        if let Err(err) = append_line(path, &line) {
            self.turn_off(path, &err);
        }
    }

    fn turn_off(&self, path: &Path, err: &io::Error) {
        let first = self
            .disabled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            let _ = writeln!(
                io::stderr().lock(),
                "Warning: taskgate log disabled, cannot write {}: {}",
                path.display(),
                err
            );
        }
    }
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?
        .write_all(line.as_bytes())
}

/// Keeps one event on one line: newlines, tabs and other control characters
/// are escaped.
pub(crate) fn sanitize_log_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch.is_control() => out.push_str(&format!("\\u{{{:04x}}}", ch as u32)),
            ch => out.push(ch),
        }
    }
    out
}
