//! Tracing setup: a file layer that is always on, plus either stderr (CLI) or
//! an in-memory ring buffer the TUI renders.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

pub const LOG_BUFFER_CAPACITY: usize = 200;

/// In-memory log buffer for the TUI.
pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push_line(&self, line: String) {
        // A poisoned lock only means another writer panicked mid-push.
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.push_back(line);
        while lines.len() > self.capacity {
            lines.pop_front();
        }
    }

    /// The most recent lines, oldest first, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let start = lines.len().saturating_sub(limit);
        lines.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits formatted output into lines for a `LogBuffer`.
pub struct LogWriter {
    buffer: Arc<LogBuffer>,
    line: Vec<u8>,
}

impl LogWriter {
    fn flush_line(&mut self) {
        if !self.line.is_empty() {
            let line = String::from_utf8_lossy(&self.line).to_string();
            self.buffer.push_line(line);
            self.line.clear();
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            if b == b'\n' {
                self.flush_line();
            } else {
                self.line.push(b);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_line();
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.flush_line();
    }
}

pub struct LogMakeWriter {
    buffer: Arc<LogBuffer>,
}

impl LogMakeWriter {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

impl<'a> MakeWriter<'a> for LogMakeWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            buffer: self.buffer.clone(),
            line: Vec::new(),
        }
    }
}

/// Where console-side log output goes.
pub enum LogSink {
    Stderr,
    Buffer(Arc<LogBuffer>),
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
/// Fails, rather than panicking, when a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig, sink: LogSink) -> anyhow::Result<()> {
    if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.path)
        .with_context(|| format!("opening log file {}", config.path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    match sink {
        LogSink::Stderr => registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .try_init()?,
        LogSink::Buffer(buffer) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(LogMakeWriter::new(buffer)),
            )
            .try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_keeps_only_the_newest_lines() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push_line(format!("line {i}"));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.recent(10), vec!["line 2", "line 3", "line 4"]);
        assert_eq!(buffer.recent(1), vec!["line 4"]);
    }

    #[test]
    fn writer_splits_on_newlines_and_flushes_tail() {
        let buffer = Arc::new(LogBuffer::new(10));
        let maker = LogMakeWriter::new(buffer.clone());
        {
            let mut writer = maker.make_writer();
            writer.write_all(b"first\nsecond\npart").unwrap();
            assert_eq!(buffer.recent(10), vec!["first", "second"]);
        }
        assert_eq!(buffer.recent(10), vec!["first", "second", "part"]);
    }
}
