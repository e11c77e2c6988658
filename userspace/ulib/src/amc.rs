//! User-space face of AMC: register a service, send raw or typed event
//! bodies, and block on receives.

use crate::syscall_args;
use alloc::string::String;
use kernel_api_types::SysCallNumber;
use alloc::vec;
use alloc::vec::Vec;
use kernel_api_types::SYS_OK;
use kernel_api_types::amc::MAX_SERVICE_NAME_LEN;

/// Must match the kernel's receive-buffer layout: source name, body length,
/// body.
const RECV_SOURCE_LEN: usize = MAX_SERVICE_NAME_LEN;
const RECV_HEADER_LEN: usize = RECV_SOURCE_LEN + size_of::<u32>();
const RECV_BUFFER_CAP: usize = RECV_HEADER_LEN + 16 * 0x400;

#[derive(Debug, Clone)]
pub struct AmcMessage {
    pub source: String,
    pub body: Vec<u8>,
}

impl AmcMessage {
    /// The leading u32 event tag every protocol layers on top of AMC uses.
    pub fn event(&self) -> Option<u32> {
        kernel_api_types::awm::event_tag(&self.body)
    }

    /// Reinterpret the body as a wire struct. Returns `None` when the body
    /// is too short.
    pub fn body_as<T: Copy>(&self) -> Option<T> {
        if self.body.len() < size_of::<T>() {
            return None;
        }
        Some(unsafe { core::ptr::read_unaligned(self.body.as_ptr() as *const T) })
    }
}

pub fn register_service(name: &str) {
    let result = syscall_args(
        SysCallNumber::AmcRegisterService,
        [name.as_ptr() as u64, name.len() as u64, 0, 0],
    );
    assert!(result == SYS_OK, "failed to register AMC service {name}");
}

pub fn message_send(dest: &str, body: &[u8]) {
    syscall_args(
        SysCallNumber::AmcMessageSend,
        [
            dest.as_ptr() as u64,
            dest.len() as u64,
            body.as_ptr() as u64,
            body.len() as u64,
        ],
    );
}

/// Send a message that is just one event tag.
pub fn send_event(dest: &str, event: u32) {
    message_send(dest, &event.to_le_bytes());
}

/// Send an event tag followed by two payload words; the common shape for
/// pointer-sized UI events.
pub fn send_event_u32_2(dest: &str, event: u32, a: u32, b: u32) {
    let mut body = [0u8; 12];
    body[0..4].copy_from_slice(&event.to_le_bytes());
    body[4..8].copy_from_slice(&a.to_le_bytes());
    body[8..12].copy_from_slice(&b.to_le_bytes());
    message_send(dest, &body);
}

/// Send any `repr(C)` wire struct.
pub fn send_struct<T>(dest: &str, value: &T) {
    let bytes =
        unsafe { core::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) };
    message_send(dest, bytes);
}

fn parse_received(buf: &[u8], total: usize) -> AmcMessage {
    let source_end = buf[..RECV_SOURCE_LEN]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(RECV_SOURCE_LEN);
    let source = String::from_utf8_lossy(&buf[..source_end]).into_owned();
    let body_len = u32::from_le_bytes(
        buf[RECV_SOURCE_LEN..RECV_HEADER_LEN].try_into().unwrap(),
    ) as usize;
    let body = Vec::from(&buf[RECV_HEADER_LEN..(RECV_HEADER_LEN + body_len).min(total)]);
    AmcMessage { source, body }
}

/// Block until any message arrives.
pub fn message_await_any() -> AmcMessage {
    let mut buf = vec![0u8; RECV_BUFFER_CAP];
    let total = syscall_args(
        SysCallNumber::AmcMessageAwaitAny,
        [buf.as_mut_ptr() as u64, buf.len() as u64, 0, 0],
    ) as usize;
    parse_received(&buf, total)
}

/// Block until a message from `source` arrives; other senders stay queued.
pub fn message_await_from(source: &str) -> AmcMessage {
    let mut buf = vec![0u8; RECV_BUFFER_CAP];
    let total = syscall_args(
        SysCallNumber::AmcMessageAwaitFrom,
        [
            source.as_ptr() as u64,
            source.len() as u64,
            buf.as_mut_ptr() as u64,
            buf.len() as u64,
        ],
    ) as usize;
    parse_received(&buf, total)
}

/// Block until a message from `source` carrying the given event tag
/// arrives. Messages from the same source with other tags are discarded, as
/// they would be stale protocol traffic.
pub fn message_await_event(source: &str, event: u32) -> AmcMessage {
    loop {
        let msg = message_await_from(source);
        if msg.event() == Some(event) {
            return msg;
        }
        log::warn!("discarding event {:?} from [{source}] while awaiting {event}", msg.event());
    }
}

pub fn has_message() -> bool {
    syscall_args(SysCallNumber::AmcHasMessage, [0; 4]) != 0
}

/// Ask the kernel to wake us after `delay_ms`, or as soon as a message
/// lands in our inbox, whichever is first.
pub fn sleep_until_timestamp_or_message(delay_ms: u32) {
    let msg = kernel_api_types::amc::AmcSleepUntilTimestampOrMessage {
        event: kernel_api_types::amc::AMC_SLEEP_UNTIL_TIMESTAMP_OR_MESSAGE,
        delay_ms,
    };
    send_struct(kernel_api_types::amc::CORE_SERVICE_NAME, &msg);
}
