use core::fmt;

/// A character sink onto which log output is written, usually a UART.
pub trait Console: Send + Sync {
    fn write_str(&self, s: &str);
}

/// Dummy struct that makes converting [`fmt::Arguments`] easier to convert to strings
/// by offloading that to the [`Write`](fmt::Write) trait.
pub struct ConsoleWriter<'a, C: Console + ?Sized> {
    console: &'a C,
}

impl<'a, C: Console + ?Sized> ConsoleWriter<'a, C> {
    pub fn new(console: &'a C) -> Self {
        Self { console }
    }
}

impl<C: Console + ?Sized> fmt::Write for ConsoleWriter<'_, C> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.console.write_str(s);
        Ok(())
    }
}

/// A console that swallows everything
impl Console for () {
    fn write_str(&self, _s: &str) {}
}
