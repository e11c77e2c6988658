#![no_std]

#[cfg(test)]
extern crate std;

pub mod amc;
pub mod awm;
pub mod geometry;

/// Raw syscall surface. Everything user space can ask of the kernel funnels
/// through vector 128 with one of these in `rax`.
#[repr(u64)]
#[derive(Clone, Copy, Debug)]
pub enum SysCallNumber {
    Exit = 0,
    Yield = 1,
    Sbrk = 2,
    SerialWrite = 3,
    MsSinceBoot = 4,
    AmcRegisterService = 5,
    AmcMessageSend = 6,
    AmcMessageAwaitAny = 7,
    AmcMessageAwaitFrom = 8,
    AmcHasMessage = 9,
}

/// The interrupt vector the syscall handler is registered on.
pub const SYSCALL_VECTOR: u8 = 128;

// Syscall error codes
pub const SYS_OK: u64 = 0;
pub const SYS_ERR_INVALID_ARGS: u64 = 1;
pub const SYS_ERR_NO_SUCH_SERVICE: u64 = 2;
pub const SYS_ERR_ALREADY_REGISTERED: u64 = 3;
