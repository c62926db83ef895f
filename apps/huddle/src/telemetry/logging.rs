//! Process-wide `tracing` setup for the huddle binary.
//!
//! `HUDDLE_LOG_FILTER` replaces the computed filter outright. At trace level
//! the media and websocket stacks are held at info unless
//! `HUDDLE_TRACE_DEPS=1`; ICE and DTLS are unreadable otherwise.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

/// Targets kept at info when tracing huddle itself.
const NOISY_DEPENDENCIES: &[&str] = &[
    "webrtc",
    "webrtc_ice",
    "webrtc_dtls",
    "webrtc_sctp",
    "webrtc_srtp",
    "webrtc_mdns",
    "tokio_tungstenite",
    "tungstenite",
    "hyper",
    "mio",
];

#[derive(Debug, PartialEq, Eq)]
struct FilterPlan {
    directives: String,
    throttled: bool,
}

fn plan_filter(level: LogLevel, custom: Option<String>, trace_deps: bool) -> FilterPlan {
    if let Some(directives) = custom {
        return FilterPlan {
            directives,
            throttled: false,
        };
    }
    let mut directives = match level {
        LogLevel::Trace => "info,huddle=trace,huddle_proto=trace".to_owned(),
        LogLevel::Debug => "info,huddle=debug,huddle_proto=debug".to_owned(),
        other => LevelFilter::from(other).to_string().to_lowercase(),
    };
    let throttled = level == LogLevel::Trace && !trace_deps;
    if throttled {
        for target in NOISY_DEPENDENCIES {
            directives.push_str(&format!(",{target}=info"));
        }
    }
    FilterPlan {
        directives,
        throttled,
    }
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let plan = plan_filter(
        config.level,
        std::env::var("HUDDLE_LOG_FILTER").ok(),
        matches!(std::env::var("HUDDLE_TRACE_DEPS").as_deref(), Ok("1" | "true")),
    );

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&plan.directives))
        .with_target(config.level >= LogLevel::Debug)
        .with_thread_ids(config.level >= LogLevel::Trace)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;
    let _ = GUARD.set(guard);

    if plan.throttled {
        tracing::debug!(
            target = "huddle::logging",
            "webrtc and websocket traces capped at info; set HUDDLE_TRACE_DEPS=1 to lift"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_levels_use_plain_directives() {
        assert_eq!(LogLevel::default(), LogLevel::Warn);
        assert_eq!(plan_filter(LogLevel::Warn, None, false).directives, "warn");
        assert_eq!(plan_filter(LogLevel::Info, None, false).directives, "info");
    }

    #[test]
    fn debug_scopes_to_huddle_crates() {
        let plan = plan_filter(LogLevel::Debug, None, false);
        assert!(!plan.throttled);
        assert!(plan.directives.contains("huddle=debug"));
        assert!(!plan.directives.contains("webrtc"));
    }

    #[test]
    fn trace_throttles_media_stack_unless_asked() {
        let plan = plan_filter(LogLevel::Trace, None, false);
        assert!(plan.throttled);
        assert!(plan.directives.starts_with("info,huddle=trace"));
        assert!(plan.directives.contains(",webrtc_ice=info"));
        assert!(plan.directives.contains(",tungstenite=info"));

        assert!(!plan_filter(LogLevel::Trace, None, true).throttled);
    }

    #[test]
    fn custom_filter_wins() {
        let plan = plan_filter(LogLevel::Trace, Some("huddle::signaling=trace".into()), false);
        assert_eq!(
            plan,
            FilterPlan {
                directives: "huddle::signaling=trace".into(),
                throttled: false,
            }
        );
    }
}
