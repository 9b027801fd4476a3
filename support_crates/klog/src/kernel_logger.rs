use crate::console::{Console, ConsoleWriter};
use core::fmt::Write;
use log::{Level, Log, Metadata, Record, SetLoggerError};

pub struct KernelLogger<C: Console + 'static> {
    pub initial_log_level: Level,
    console: C,
}

impl<C: Console + 'static> KernelLogger<C> {
    pub const fn new(max_log_level: Level, console: C) -> KernelLogger<C> {
        KernelLogger {
            initial_log_level: max_log_level,
            console,
        }
    }

    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self).map(|_| log::set_max_level(self.initial_log_level.to_level_filter()))
    }

    /// Only the global `log` filter is changed, the logger itself holds no mutable state.
    pub fn update_log_level(&'static self, level: Level) {
        log::set_max_level(level.to_level_filter());
    }

    fn level_marker(level: Level) -> &'static str {
        match level {
            Level::Error => "❌",
            Level::Warn => "⚠️",
            Level::Info => "ℹ️",
            Level::Debug => "🛠️",
            Level::Trace => "👣",
        }
    }
}

impl<C: Console + 'static> Log for KernelLogger<C> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // a console has no way to report failure so there is nothing to handle here
            let _ = ConsoleWriter::new(&self.console).write_fmt(format_args!(
                "{}  {}: {}\n",
                Self::level_marker(record.level()),
                record.target(),
                record.args(),
            ));
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use std::string::String;
    use std::sync::Mutex;

    struct BufferConsole(Mutex<String>);

    impl Console for BufferConsole {
        fn write_str(&self, s: &str) {
            self.0.lock().unwrap().push_str(s);
        }
    }

    #[test]
    fn test_log_line_contains_target_and_message() {
        log::set_max_level(log::LevelFilter::Trace);
        let logger = KernelLogger::new(Level::Trace, BufferConsole(Mutex::new(String::new())));
        logger.log(
            &Record::builder()
                .args(format_args!("vm {} created", 3))
                .level(Level::Debug)
                .target("hypervisor::vm")
                .build(),
        );
        let out = logger.console.0.lock().unwrap();
        assert!(out.contains("hypervisor::vm: vm 3 created"));
        assert!(out.ends_with('\n'));
    }
}
