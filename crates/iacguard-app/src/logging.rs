//! Logging setup using tracing.

use std::str::FromStr;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable.
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown log format: {other:?} (expected pretty, compact or json)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// Emit span open/close events.
    pub with_spans: bool,
    pub with_file: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: String::from("warn"),
            format: LogFormat::Pretty,
            with_spans: false,
            with_file: false,
            with_target: true,
            with_thread_ids: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn json(self) -> Self {
        self.format(LogFormat::Json)
    }

    pub fn with_spans(mut self) -> Self {
        self.with_spans = true;
        self
    }

    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    /// Policy traces recorded through `LogSink` are emitted on this target at debug level.
    pub fn with_policy_traces(mut self) -> Self {
        self.level = format!("{},iacguard::trace=debug", self.level);
        self
    }
}

/// Installs the global subscriber. A subscriber that is already installed is left alone
/// and `false` is returned.
pub fn init_logging(config: &LogConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let span_events = if config.with_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events)
                    .with_file(config.with_file)
                    .with_line_number(config.with_file)
                    .with_target(config.with_target)
                    .with_thread_ids(config.with_thread_ids),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_span_events(span_events)
                    .with_file(config.with_file)
                    .with_line_number(config.with_file)
                    .with_target(config.with_target)
                    .with_thread_ids(config.with_thread_ids),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_span_events(span_events)
                    .with_file(config.with_file)
                    .with_line_number(config.with_file)
                    .with_target(config.with_target)
                    .with_thread_ids(config.with_thread_ids),
            )
            .try_init(),
    };
    result.is_ok()
}
