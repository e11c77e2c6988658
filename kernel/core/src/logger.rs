use crate::memory;
use core::fmt::Display;
use core::fmt::Write;
use log::{Level, LevelFilter, Log};
use owo_colors::OwoColorize;
use uart_16550::SerialPort;
use unicode_segmentation::UnicodeSegmentation;

struct Inner {
    serial_port: SerialPort,
}

impl Inner {
    fn write_with_color(&mut self, color: Color, value: impl Display) {
        let value: &dyn Display = match color {
            Color::Default => &value,
            Color::Gray => &value.dimmed(),
            Color::BrightRed => &value.bright_red(),
            Color::BrightYellow => &value.bright_yellow(),
            Color::BrightBlue => &value.bright_blue(),
            Color::BrightCyan => &value.bright_cyan(),
            Color::BrightMagenta => &value.bright_magenta(),
        };
        let mut writer = WriterWithCr::new(&mut self.serial_port);
        write!(writer, "{value}").unwrap();
    }
}

struct KernelLogger {
    inner: spin::Mutex<Inner>,
}

static LOGGER: KernelLogger = KernelLogger {
    inner: spin::Mutex::new(Inner {
        serial_port: unsafe { SerialPort::new(0x3f8) },
    }),
};

impl Log for KernelLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        // Interrupt handlers log too; the serial lock must never be held
        // by a task an interrupt handler on the same CPU is spinning on
        x86_64::instructions::interrupts::without_interrupts(|| self.log_locked(record));
    }

    fn flush(&self) {}
}

impl KernelLogger {
    fn log_locked(&self, record: &log::Record) {
        let mut inner = self.inner.lock();
        let level = record.level();
        inner.write_with_color(
            match level {
                Level::Error => Color::BrightRed,
                Level::Warn => Color::BrightYellow,
                Level::Info => Color::BrightBlue,
                Level::Debug => Color::BrightCyan,
                Level::Trace => Color::BrightMagenta,
            },
            format_args!("{level:5} "),
        );
        // Prefix each line with the uptime and originating CPU so scheduler
        // traces from different CPUs can be interleaved meaningfully.
        let ms = crate::time::try_ms_since_boot().unwrap_or(0);
        let cpu_id = memory::cpu_local_data::try_get_local().map_or(0, |data| data.kernel_id);
        inner.write_with_color(Color::Gray, format_args!("[{ms:6}ms C{cpu_id}] "));
        inner.write_with_color(Color::Default, record.args());
        inner.write_with_color(Color::Default, "\n");
    }
}

pub fn init() -> Result<(), log::SetLoggerError> {
    let mut inner = LOGGER.inner.try_lock().unwrap();
    inner.serial_port.init();
    log::set_max_level(LevelFilter::max());
    log::set_logger(&LOGGER)
}

/// Raw serial passthrough for the user-space `SerialWrite` syscall; bypasses
/// the level/prefix machinery on purpose.
pub fn write_raw(text: &str) {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut inner = LOGGER.inner.lock();
        let mut writer = WriterWithCr::new(&mut inner.serial_port);
        let _ = writer.write_str(text);
    });
}

struct WriterWithCr<T> {
    writer: T,
}

impl<T> WriterWithCr<T> {
    pub const fn new(writer: T) -> Self {
        Self { writer }
    }
}

impl<T: Write> Write for WriterWithCr<T> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.graphemes(true) {
            match c {
                "\n" => self.writer.write_str("\r\n")?,
                s => self.writer.write_str(s)?,
            }
        }
        Ok(())
    }
}

enum Color {
    Default,
    Gray,
    BrightRed,
    BrightYellow,
    BrightBlue,
    BrightCyan,
    BrightMagenta,
}
