//! Structured logging for the gamedetect binary.
//!
//! Output format and levels come from the environment:
//! - `RUST_LOG`: full filter directive, wins over everything else
//! - `LOG_FORMAT`: `pretty`, `compact` or `json`
//! - `LOG_ANSI`: `false` disables colours
//! - `GAMEDETECT_ENV`: production tags default to json output
//!
//! ```rust,ignore
//! let config = LogConfig::from_env();
//! init_logging(&config)?;
//! ```

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable
    Pretty,
    /// Single line per event
    Compact,
    /// One JSON object per event, for log aggregation
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {:?}", other)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for everything not listed in `targets`
    pub level: Level,
    pub format: LogFormat,
    pub ansi_colors: bool,
    /// Emit a span-close event carrying the span's duration
    pub span_events: bool,
    /// Per-target levels appended to the filter
    pub targets: Vec<(&'static str, Level)>,
    /// Include source file and line
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            ansi_colors: true,
            span_events: false,
            targets: vec![("tower_http", Level::DEBUG), ("hyper", Level::WARN)],
            include_location: false,
        }
    }
}

impl LogConfig {
    /// Json output with request durations and source locations
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ansi_colors: false,
            span_events: true,
            targets: vec![
                ("gamedetect_service", Level::INFO),
                ("gamedetect_api", Level::INFO),
                ("gamedetect_classifier", Level::INFO),
                ("tower_http", Level::INFO),
                ("hyper", Level::WARN),
            ],
            include_location: true,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let production = var("GAMEDETECT_ENV")
            .map(|env| env.to_lowercase().contains("prod"))
            .unwrap_or(false);
        let mut config = if production {
            Self::production()
        } else {
            Self::default()
        };

        if let Some(format) = var("LOG_FORMAT") {
            match format.parse() {
                Ok(format) => config.format = format,
                Err(e) => eprintln!("Ignoring LOG_FORMAT: {}", e),
            }
        }
        if let Some(ansi) = var("LOG_ANSI") {
            config.ansi_colors = !ansi.eq_ignore_ascii_case("false");
        }
        if config.format == LogFormat::Json {
            config.ansi_colors = false;
        }

        config
    }

    /// Filter directive used when `RUST_LOG` is unset
    fn directive(&self) -> String {
        self.targets
            .iter()
            .fold(self.level.to_string().to_lowercase(), |mut directive, (target, level)| {
                directive.push_str(&format!(",{}={}", target, level.to_string().to_lowercase()));
                directive
            })
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directive()));

    let span_events = if config.span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = tracing_subscriber::fmt::layer()
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(span_events)
        .with_ansi(config.ansi_colors);

    let layer = match config.format {
        LogFormat::Json => base.json().boxed(),
        LogFormat::Compact => base.compact().boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))
}
