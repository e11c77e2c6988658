#![no_std]
extern crate alloc;

pub mod amc;

use core::arch::asm;
use kernel_api_types::SysCallNumber;
use talc::{ErrOnOom, Talc, Talck};

/// Raw gate into the kernel: syscall number and up to four arguments, with
/// the result written back over the number slot.
pub fn syscall(inputs_and_outputs: &mut [u64; 5]) {
    unsafe {
        asm!(
            "int 0x80",
            inlateout("rax") inputs_and_outputs[0],
            inlateout("rdi") inputs_and_outputs[1],
            inlateout("rsi") inputs_and_outputs[2],
            inlateout("rdx") inputs_and_outputs[3],
            inlateout("r10") inputs_and_outputs[4],
        );
    }
}

fn syscall_args(number: SysCallNumber, args: [u64; 4]) -> u64 {
    let mut io = [number as u64, args[0], args[1], args[2], args[3]];
    syscall(&mut io);
    io[0]
}

pub fn sys_exit(code: u64) -> ! {
    syscall_args(SysCallNumber::Exit, [code, 0, 0, 0]);
    unreachable!("returned from exit")
}

pub fn sys_yield() {
    syscall_args(SysCallNumber::Yield, [0; 4]);
}

/// Hand back a fresh zeroed region of at least `size` bytes, or null.
pub fn sys_sbrk(size: u64) -> *mut u8 {
    syscall_args(SysCallNumber::Sbrk, [size, 0, 0, 0]) as *mut u8
}

pub fn sys_serial_write(text: &str) {
    syscall_args(
        SysCallNumber::SerialWrite,
        [text.as_ptr() as u64, text.len() as u64, 0, 0],
    );
}

pub fn ms_since_boot() -> u64 {
    syscall_args(SysCallNumber::MsSinceBoot, [0; 4])
}

// --- Heap ---
//
// The program (not this library) declares the global allocator, so that
// host-side unit tests of dependent crates keep std's allocator:
//
//     #[global_allocator]
//     static ALLOCATOR: ulib::UserAllocator = ulib::new_allocator();
//     ...
//     ulib::claim_heap(&ALLOCATOR, 16 * 0x400 * 0x400);

pub type UserAllocator = Talck<spin::Mutex<()>, ErrOnOom>;

pub const fn new_allocator() -> UserAllocator {
    Talck::new(Talc::new(ErrOnOom))
}

/// Ask the kernel for an arena and hand it to the allocator. Must run
/// before the first allocation.
pub fn claim_heap(allocator: &UserAllocator, size: u64) {
    let base = sys_sbrk(size);
    assert!(!base.is_null(), "kernel refused heap arena");
    let span = talc::Span::from_base_size(base, size as usize);
    unsafe {
        allocator.lock().claim(span).expect("failed to claim heap arena");
    }
}

// --- Logging over the serial syscall ---

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl log::Log for SerialLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        let mut line = alloc::string::String::new();
        let _ = core::fmt::write(
            &mut line,
            format_args!("{:5} [{}] {}\n", record.level(), record.target(), record.args()),
        );
        sys_serial_write(&line);
    }

    fn flush(&self) {}
}

pub fn init_logger() {
    log::set_max_level(log::LevelFilter::Info);
    let _ = log::set_logger(&LOGGER);
}

pub fn default_panic(info: &core::panic::PanicInfo) -> ! {
    // Format on the stack; the heap may be the thing that broke
    struct StackWriter {
        buf: [u8; 512],
        len: usize,
    }
    impl core::fmt::Write for StackWriter {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let n = s.len().min(self.buf.len() - self.len);
            self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
            self.len += n;
            Ok(())
        }
    }
    let mut writer = StackWriter {
        buf: [0; 512],
        len: 0,
    };
    let _ = core::fmt::write(&mut writer, format_args!("panic: {info}\n"));
    sys_serial_write(core::str::from_utf8(&writer.buf[..writer.len]).unwrap_or("panic\n"));
    sys_exit(u64::MAX)
}
