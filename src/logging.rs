//! Custom log backend, spec §7 ambient requirement: "every error yields a
//! single TSV-formatted log line `timestamp\tLEVEL\t[module]\tmessage`".
//!
//! Library code only ever calls `log::warn!`/`log::error!`/... through
//! [`crate::diagnostics::Diagnostics`]; this module is the one place that
//! knows the wire format, installed once by the CLI at startup — the same
//! separation the teacher keeps between rule logic and its `output`
//! reporters.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Log, Metadata, Record};

struct TsvLogger {
    level: log::LevelFilter,
}

impl Log for TsvLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let millis = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
        let line = format!("{millis}\t{}\t[{}]\t{}", record.level(), record.target(), record.args());
        let _ = writeln!(std::io::stderr(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the TSV logger as the global `log` backend. Call once from the
/// CLI entry point; library code never calls this itself.
pub fn init(level: log::LevelFilter) {
    if log::set_boxed_logger(Box::new(TsvLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}

pub fn parse_level(text: &str) -> Option<log::LevelFilter> {
    match text.to_ascii_lowercase().as_str() {
        "off" => Some(log::LevelFilter::Off),
        "error" => Some(log::LevelFilter::Error),
        "warn" => Some(log::LevelFilter::Warn),
        "info" => Some(log::LevelFilter::Info),
        "debug" => Some(log::LevelFilter::Debug),
        "trace" => Some(log::LevelFilter::Trace),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(parse_level("WARN"), Some(log::LevelFilter::Warn));
        assert_eq!(parse_level("bogus"), None);
    }
}
