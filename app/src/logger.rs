//! `log` backend writing to USART1.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};

use crate::serial::uart1;

#[cfg(feature = "diagnostics")]
const MAX_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(feature = "diagnostics"))]
const MAX_LEVEL: LevelFilter = LevelFilter::Info;

struct UartLogger;

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let mut writer = uart1::writer();
            write!(writer, "{} {}: {}\r\n", record.level(), record.target(), record.args()).ok();
        }
    }

    fn flush(&self) {}
}

static LOGGER: UartLogger = UartLogger;

/// Install the logger. Must be called once, after `uart1::init()` and before anything logs.
pub fn init() {
    // There is no compare-and-swap on thumbv6m, so only the racy setters are available
    unsafe {
        log::set_logger_racy(&LOGGER).ok();
        log::set_max_level_racy(MAX_LEVEL);
    }
}
