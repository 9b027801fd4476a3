use klog::{Console, KernelLogger};
use log::{Level, SetLoggerError};

/// Install `logger` as the global logger of the hypervisor.
///
/// The logger has to be a static because log records may be emitted from anywhere at any time, e.g.:
///
/// ```ignore
/// static LOGGER: KernelLogger<Uart> = KernelLogger::new(Level::Info, Uart::new());
/// hypervisor::logging::init(&LOGGER, config.log_level)?;
/// ```
pub fn init<C: Console>(logger: &'static KernelLogger<C>, level: Level) -> Result<(), SetLoggerError> {
    logger.install()?;
    logger.update_log_level(level);
    log::info!("logging initialized at level {level}");
    Ok(())
}
