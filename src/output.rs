//! Output and logging for Drover
//!
//! Messages go through `tracing`. The severity set mirrors the classic
//! `abort`, `error`, `warn`, `info`, `debug` channels; the most verbose enabled
//! channel decides the subscriber filter.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt as fmt_layer, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// A single output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Abort,
    Error,
    Warn,
    Info,
    Debug,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Severity::Abort => "abort",
            Severity::Error => "error",
            Severity::Warn => "warn",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Severity::Abort),
            "error" => Ok(Severity::Error),
            "warn" | "warning" => Ok(Severity::Warn),
            "info" => Ok(Severity::Info),
            "debug" => Ok(Severity::Debug),
            other => Err(Error::InvalidConfig {
                key: "log_level".to_string(),
                message: format!("unknown severity '{}'", other),
            }),
        }
    }
}

/// The set of enabled output channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLevel(BTreeSet<Severity>);

impl Default for LogLevel {
    fn default() -> Self {
        Self::up_to(Severity::Info)
    }
}

impl LogLevel {
    /// Every channel from `abort` through `max`.
    pub fn up_to(max: Severity) -> Self {
        let all = [
            Severity::Abort,
            Severity::Error,
            Severity::Warn,
            Severity::Info,
            Severity::Debug,
        ];
        Self(all.into_iter().filter(|s| *s <= max).collect())
    }

    /// Whether a channel is enabled.
    pub fn enabled(&self, severity: Severity) -> bool {
        self.0.contains(&severity)
    }

    pub fn enable(&mut self, severity: Severity) {
        self.0.insert(severity);
    }

    pub fn disable(&mut self, severity: Severity) {
        self.0.remove(&severity);
    }

    /// The `tracing` filter directive matching the most verbose channel.
    pub fn filter_directive(&self) -> &'static str {
        match self.0.iter().next_back() {
            Some(Severity::Debug) => "debug",
            Some(Severity::Info) => "info",
            Some(Severity::Warn) => "warn",
            Some(Severity::Error | Severity::Abort) => "error",
            None => "off",
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    /// Parses either a single level (`"info"` enables everything up to info)
    /// or an explicit comma separated set (`"abort,error,debug"`).
    fn from_str(s: &str) -> Result<Self> {
        if s.contains(',') {
            let set = s
                .split(',')
                .filter(|part| !part.trim().is_empty())
                .map(Severity::from_str)
                .collect::<Result<BTreeSet<_>>>()?;
            Ok(Self(set))
        } else {
            Ok(Self::up_to(s.parse()?))
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|s| s.as_str()).collect();
        write!(f, "{}", names.join(","))
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is harmless;
/// the second call keeps the first subscriber.
pub fn init_logging(level: &LogLevel, show_target: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.filter_directive()));

    let _ = tracing_subscriber::registry()
        .with(fmt_layer::layer().with_target(show_target))
        .with(env_filter)
        .try_init();
}
