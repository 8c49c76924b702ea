use {
    std::{borrow::Cow, fmt, str::FromStr},
    tracing::{event, Level},
};

/// Severity of a message logged by a filter through [`HttpRequest::log`].
///
/// [`HttpRequest::log`]: crate::request::HttpRequest::log
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        })
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            _ => Err(format!("unknown log level '{}'", s)),
        }
    }
}

/// Emit one filter log entry through the host's tracing subscriber.
///
/// A single trailing newline is stripped and interior newlines are escaped to the string
/// `r"\n"`, so each call produces exactly one line. Empty messages are dropped.
pub(crate) fn write_entry(plugin: &str, level: LogLevel, msg: &str) {
    let msg = msg.strip_suffix('\n').unwrap_or(msg);
    if msg.is_empty() {
        return;
    }
    let msg = escape_newlines(msg);
    match level {
        LogLevel::Trace => event!(Level::TRACE, plugin, "{}", msg),
        LogLevel::Debug => event!(Level::DEBUG, plugin, "{}", msg),
        LogLevel::Info => event!(Level::INFO, plugin, "{}", msg),
        LogLevel::Warn => event!(Level::WARN, plugin, "{}", msg),
        LogLevel::Error => event!(Level::ERROR, plugin, "{}", msg),
        LogLevel::Critical => event!(Level::ERROR, plugin, critical = true, "{}", msg),
    }
}

fn escape_newlines(msg: &str) -> Cow<'_, str> {
    if msg.contains('\n') {
        Cow::Owned(msg.replace('\n', r"\n"))
    } else {
        Cow::Borrowed(msg)
    }
}
