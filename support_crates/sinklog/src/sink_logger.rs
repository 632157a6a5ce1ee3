use core::fmt::Write;
use core::sync::atomic::{AtomicUsize, Ordering};

use ksync::{Guard, SpinLock};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// A logger that writes every enabled record as one line into a sink.
///
/// Lines have the form `<level emoji>  <target>: <message>`.
/// Errors reported by the sink are dropped so that a broken sink never disturbs the code that is logging.
pub struct SinkLogger<W> {
    sink: SpinLock<W>,
    max_level: AtomicUsize,
}

impl<W: Write + Send> SinkLogger<W> {
    pub const fn new(sink: W, max_level: LevelFilter) -> Self {
        Self {
            sink: SpinLock::new(sink),
            max_level: AtomicUsize::new(max_level as usize),
        }
    }

    /// Register this logger as the global `log` logger.
    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self).map(|_| log::set_max_level(self.max_level()))
    }

    /// Change which records are written from now on.
    ///
    /// This only updates the filter of this logger.
    /// If it is installed globally, the global `log` filter needs to be raised separately.
    pub fn update_log_level(&self, level: LevelFilter) {
        self.max_level.store(level as usize, Ordering::Relaxed);
    }

    pub fn max_level(&self) -> LevelFilter {
        match self.max_level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Lock the sink, e.g. to inspect what was written so far.
    pub fn sink(&self) -> Guard<'_, W> {
        self.sink.spin_lock()
    }

    pub fn into_sink(self) -> W {
        self.sink.into_inner()
    }
}

impl<W: Write + Send> Log for SinkLogger<W> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() as usize <= self.max_level.load(Ordering::Relaxed)
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let level_moji = match record.level() {
                Level::Error => "❌",
                Level::Warn => "⚠️",
                Level::Info => "ℹ️",
                Level::Debug => "🛠️",
                Level::Trace => "👣",
            };
            let _ = self.sink.spin_lock().write_fmt(format_args!(
                "{}  {}: {}\n",
                level_moji,
                record.target(),
                record.args(),
            ));
        }
    }

    fn flush(&self) {}
}
