use core::fmt;
use log::{Level, Log, Metadata, Record};

/// Routes messages of an allocator to its optionally injected logger.
///
/// Without a logger every call is a no-op.
#[derive(Copy, Clone)]
pub(crate) struct Diagnostics<'a> {
    target: &'static str,
    logger: Option<&'a dyn Log>,
}

impl<'a> Diagnostics<'a> {
    pub const fn new(target: &'static str, logger: Option<&'a dyn Log>) -> Self {
        Self { target, logger }
    }

    /// Whether messages of `level` would reach the logger.
    ///
    /// Useful to skip building expensive messages.
    pub fn enabled(&self, level: Level) -> bool {
        match self.logger {
            Some(logger) => logger.enabled(
                &Metadata::builder()
                    .level(level)
                    .target(self.target)
                    .build(),
            ),
            None => false,
        }
    }

    pub fn log(&self, level: Level, args: fmt::Arguments) {
        if let Some(logger) = self.logger {
            let record = Record::builder()
                .level(level)
                .target(self.target)
                .args(args)
                .build();
            if logger.enabled(record.metadata()) {
                logger.log(&record);
            }
        }
    }

    pub fn trace(&self, args: fmt::Arguments) {
        self.log(Level::Trace, args)
    }

    pub fn debug(&self, args: fmt::Arguments) {
        self.log(Level::Debug, args)
    }

    pub fn warn(&self, args: fmt::Arguments) {
        self.log(Level::Warn, args)
    }

    pub fn error(&self, args: fmt::Arguments) {
        self.log(Level::Error, args)
    }
}

impl fmt::Debug for Diagnostics<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("target", &self.target)
            .field("has_logger", &self.logger.is_some())
            .finish()
    }
}
