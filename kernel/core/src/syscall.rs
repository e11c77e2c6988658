//! The int-0x80 syscall surface. Registered through the same dispatch table
//! as every other vector; arguments arrive in the saved register frame and
//! the result is written back into it.

use crate::amc;
use crate::interrupt::{HandlerResult, RegisterFrame, register_interrupt_handler};
use crate::task::scheduler::{current_task, task_die, task_switch};
use crate::time::ms_since_boot;
use alloc::string::String;
use kernel_api_types::amc::MAX_SERVICE_NAME_LEN;
use kernel_api_types::{
    SYS_ERR_ALREADY_REGISTERED, SYS_ERR_INVALID_ARGS, SYS_OK, SYSCALL_VECTOR, SysCallNumber,
};

/// Receive-buffer layout for the await syscalls: a fixed source-name field,
/// a length word, then the body.
pub const RECV_SOURCE_LEN: usize = MAX_SERVICE_NAME_LEN;
pub const RECV_HEADER_LEN: usize = RECV_SOURCE_LEN + size_of::<u32>();

pub fn init() {
    register_interrupt_handler(SYSCALL_VECTOR, syscall_handler);
}

fn user_slice(ptr: u64, len: u64) -> Option<&'static [u8]> {
    if ptr == 0 || len == 0 {
        return Some(&[]);
    }
    ptr.checked_add(len)
        .filter(|&end| end <= crate::consts::LOWER_HALF_END)?;
    Some(unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) })
}

fn user_slice_mut(ptr: u64, len: u64) -> Option<&'static mut [u8]> {
    if ptr == 0 || len == 0 {
        return None;
    }
    ptr.checked_add(len)
        .filter(|&end| end <= crate::consts::LOWER_HALF_END)?;
    Some(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len as usize) })
}

fn user_str(ptr: u64, len: u64) -> Option<String> {
    let bytes = user_slice(ptr, len)?;
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Copy a received message into the caller's buffer, truncating the body if
/// the buffer is short. Returns the total bytes the caller should consume.
fn write_received(out: &mut [u8], msg: &amc::AmcMessage) -> u64 {
    if out.len() < RECV_HEADER_LEN {
        return 0;
    }
    out[..RECV_SOURCE_LEN].fill(0);
    let source_len = msg.source.len().min(RECV_SOURCE_LEN);
    out[..source_len].copy_from_slice(&msg.source.as_bytes()[..source_len]);

    let capacity = out.len() - RECV_HEADER_LEN;
    let body_len = msg.body.len().min(capacity);
    out[RECV_SOURCE_LEN..RECV_HEADER_LEN].copy_from_slice(&(body_len as u32).to_le_bytes());
    out[RECV_HEADER_LEN..RECV_HEADER_LEN + body_len].copy_from_slice(&msg.body[..body_len]);
    (RECV_HEADER_LEN + body_len) as u64
}

fn syscall_handler(frame: &mut RegisterFrame) -> HandlerResult {
    let number = frame.rax;
    let (arg1, arg2, arg3, arg4) = (frame.rdi, frame.rsi, frame.rdx, frame.r10);

    frame.rax = match number {
        n if n == SysCallNumber::Exit as u64 => task_die(arg1),
        n if n == SysCallNumber::Yield as u64 => {
            task_switch();
            SYS_OK
        }
        n if n == SysCallNumber::Sbrk as u64 => {
            // Hands out fresh zeroed pages; the user allocator claims them
            // as arenas, so continuity with previous breaks is not required.
            match current_task().vas.alloc_range(arg1) {
                Some(addr) => addr.as_u64(),
                None => 0,
            }
        }
        n if n == SysCallNumber::SerialWrite as u64 => match user_str(arg1, arg2) {
            Some(text) => {
                crate::logger::write_raw(&text);
                SYS_OK
            }
            None => SYS_ERR_INVALID_ARGS,
        },
        n if n == SysCallNumber::MsSinceBoot as u64 => ms_since_boot(),
        n if n == SysCallNumber::AmcRegisterService as u64 => match user_str(arg1, arg2) {
            Some(name) => match amc::register_service(&name) {
                Ok(()) => SYS_OK,
                Err(amc::AmcError::AlreadyRegistered) => SYS_ERR_ALREADY_REGISTERED,
                Err(_) => SYS_ERR_INVALID_ARGS,
            },
            None => SYS_ERR_INVALID_ARGS,
        },
        n if n == SysCallNumber::AmcMessageSend as u64 => {
            match (user_str(arg1, arg2), user_slice(arg3, arg4)) {
                (Some(dest), Some(body)) => {
                    amc::message_send(&dest, body);
                    SYS_OK
                }
                _ => SYS_ERR_INVALID_ARGS,
            }
        }
        n if n == SysCallNumber::AmcMessageAwaitAny as u64 => match user_slice_mut(arg1, arg2) {
            Some(out) => {
                let msg = amc::message_await_any();
                write_received(out, &msg)
            }
            None => SYS_ERR_INVALID_ARGS,
        },
        n if n == SysCallNumber::AmcMessageAwaitFrom as u64 => {
            match (user_str(arg1, arg2), user_slice_mut(arg3, arg4)) {
                (Some(source), Some(out)) => {
                    let msg = amc::message_await_from(&source);
                    write_received(out, &msg)
                }
                _ => SYS_ERR_INVALID_ARGS,
            }
        }
        n if n == SysCallNumber::AmcHasMessage as u64 => amc::has_message() as u64,
        _ => {
            log::warn!("unknown syscall {number}");
            SYS_ERR_INVALID_ARGS
        }
    };
    HandlerResult::Handled
}
