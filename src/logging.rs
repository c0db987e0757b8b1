//! Injected logging sink
//!
//! Components log through the `log` facade, but the logger is handed to them
//! at construction instead of being looked up in a global of our own. The
//! default sink forwards to whatever global logger the application installed,
//! which is a no-op when none was.

use log::{Level, Log, Record};
use std::fmt;
use std::sync::Arc;

/// Where a component sends its log records
#[derive(Clone, Default)]
pub enum LogSink {
    /// The process-wide `log` logger (no-op unless one is installed)
    #[default]
    Global,
    /// A logger owned by the component
    Custom(Arc<dyn Log>),
}

impl LogSink {
    /// Wrap a custom logger
    pub fn custom<L: Log + 'static>(logger: L) -> Self {
        LogSink::Custom(Arc::new(logger))
    }

    fn logger(&self) -> &dyn Log {
        match self {
            LogSink::Global => log::logger(),
            LogSink::Custom(logger) => logger.as_ref(),
        }
    }

    /// Emit one record
    pub fn emit(&self, level: Level, target: &str, args: fmt::Arguments<'_>) {
        let logger = self.logger();
        let record = Record::builder()
            .level(level)
            .target(target)
            .args(args)
            .build();
        if logger.enabled(record.metadata()) {
            logger.log(&record);
        }
    }

    /// Emit a debug record
    pub fn debug(&self, target: &str, args: fmt::Arguments<'_>) {
        self.emit(Level::Debug, target, args);
    }

    /// Emit a trace record
    pub fn trace(&self, target: &str, args: fmt::Arguments<'_>) {
        self.emit(Level::Trace, target, args);
    }

    /// Emit a warning record
    pub fn warn(&self, target: &str, args: fmt::Arguments<'_>) {
        self.emit(Level::Warn, target, args);
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSink::Global => f.write_str("LogSink::Global"),
            LogSink::Custom(_) => f.write_str("LogSink::Custom(..)"),
        }
    }
}
