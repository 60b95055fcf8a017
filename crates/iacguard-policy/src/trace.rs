use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Receives evaluation trace lines when tracing goes to one shared destination.
pub trait TraceSink: Send + Sync + fmt::Debug {
    fn record(&self, lines: &[String]);
}

/// Writes trace lines to the `tracing` debug stream.
#[derive(Debug, Default)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn record(&self, lines: &[String]) {
        for line in lines {
            debug!(target: "iacguard::trace", "{line}");
        }
    }
}

/// Collects trace lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl TraceSink for MemorySink {
    fn record(&self, lines: &[String]) {
        if let Ok(mut all) = self.lines.lock() {
            all.extend_from_slice(lines);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub enum TraceMode {
    #[default]
    Off,
    /// Every (policy, input) trace goes to one sink.
    Global(Arc<dyn TraceSink>),
    /// Traces are attached to the findings they produced.
    PerResult,
}

impl TraceMode {
    pub fn enabled(&self) -> bool {
        !matches!(self, TraceMode::Off)
    }
}

/// Trace buffer for one (policy, input) evaluation.
#[derive(Debug, Default)]
pub struct Tracer {
    lines: Mutex<Vec<String>>,
}

impl Tracer {
    pub fn record(&self, line: impl Into<String>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.into());
        }
    }

    pub fn take(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|mut l| std::mem::take(&mut *l))
            .unwrap_or_default()
    }
}
