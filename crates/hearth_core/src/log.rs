//! Leveled log lines tagged with the emitting plugin.

use std::cell::Cell;
use std::fmt;
use tracing::{error, info, warn};

/// Severity of a plugin log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Info = 0,
    Warning = 1,
    Error = 2,
    /// Unrecoverable for the emitting plugin
    Fatal = 3,
    /// Output addressed to the user rather than the operator
    User = 4,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<LogLevel> {
        match value {
            0 => Some(LogLevel::Info),
            1 => Some(LogLevel::Warning),
            2 => Some(LogLevel::Error),
            3 => Some(LogLevel::Fatal),
            4 => Some(LogLevel::User),
            _ => None,
        }
    }

    /// Writes the line to the tracing subscriber.
    pub(crate) fn emit(self, plugin: &str, message: &str) {
        match self {
            LogLevel::Info | LogLevel::User => info!(plugin, level = %self, "{}", message),
            LogLevel::Warning => warn!(plugin, "{}", message),
            LogLevel::Error => error!(plugin, "{}", message),
            LogLevel::Fatal => error!(plugin, fatal = true, "{}", message),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::User => "user",
        })
    }
}

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Runs `f` unless this thread is already inside it. Log listeners that log
/// again would otherwise recurse forever.
pub(crate) fn dispatch_once(f: impl FnOnce()) {
    if DISPATCHING.with(|d| d.replace(true)) {
        return;
    }
    f();
    DISPATCHING.with(|d| d.set(false));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_codes() {
        for level in [
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Fatal,
            LogLevel::User,
        ] {
            assert_eq!(LogLevel::from_u8(level.as_u8()), Some(level));
        }
        assert_eq!(LogLevel::from_u8(9), None);
    }

    #[test]
    fn test_dispatch_once_blocks_recursion() {
        let mut depth = 0;
        dispatch_once(|| {
            depth += 1;
            dispatch_once(|| unreachable!());
        });
        assert_eq!(depth, 1);

        let mut ran = false;
        dispatch_once(|| ran = true);
        assert!(ran);
    }
}
