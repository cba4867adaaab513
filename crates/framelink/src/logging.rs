use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// WebSocket internals log every frame at debug; they only join in at trace.
const WIRE_TARGETS: [&str; 2] = ["tungstenite", "tokio_tungstenite"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Per-target filter for `level`: framelink crates follow it, the WebSocket
/// stack is capped at warn below trace.
fn targets(level: LogLevel) -> Targets {
    let wire = if level == LogLevel::Trace {
        LevelFilter::TRACE
    } else {
        LevelFilter::WARN.min(level.as_filter())
    };
    WIRE_TARGETS
        .iter()
        .fold(Targets::new().with_default(level.as_filter()), |filter, target| {
            filter.with_target(*target, wire)
        })
}

/// Install the stderr subscriber. Stdout stays reserved for command output.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let show_targets = matches!(level, LogLevel::Debug | LogLevel::Trace);
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(show_targets);
    let registry = tracing_subscriber::registry().with(targets(level));

    let _ = match format {
        LogFormat::Text => registry.with(layer).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };
}
