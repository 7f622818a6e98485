use std::fs::File;
use std::io::Write;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record};

/// A simple logger behind the `log` facade.
/// Writes to stderr, and also into the log file, if present.
pub struct Logger {
    level: LevelFilter,
    log_file: Option<Mutex<File>>,
}

impl Logger {
    /// Installs the logger for the rest of the process.
    pub fn init(verbosity: u32, log_file: Option<File>)
    {
        let level = match verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let logger: &'static Logger = Box::leak(Box::new(Logger {
            level,
            log_file: log_file.map(Mutex::new),
        }));

        if log::set_logger(logger).is_ok() {
            log::set_max_level(level);
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool
    {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record)
    {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format!("{}: {}", record.level().to_string().to_lowercase(), record.args());
        eprintln!("{}", line);

        if let Some(file) = &self.log_file {
            if let Ok(mut file) = file.lock() {
                writeln!(file, "{}", line).unwrap_or_else(|_| {
                    eprintln!("error: couldn't write into the log file")
                });
            }
        }
    }

    fn flush(&self) {}
}
