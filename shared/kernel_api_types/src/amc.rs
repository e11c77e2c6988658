//! Wire-level types for AMC, the kernel's asynchronous message channel.
//!
//! Every message is `{source service name, body bytes}`; higher layers
//! interpret the first four bytes of the body as a little-endian event tag.

pub const MAX_SERVICE_NAME_LEN: usize = 64;

pub const CORE_SERVICE_NAME: &str = "com.axle.core";
pub const REAPER_SERVICE_NAME: &str = "com.axle.reaper";
pub const AWM_SERVICE_NAME: &str = "com.axle.awm";
pub const AWM_DOCK_SERVICE_NAME: &str = "com.axle.awm_dock";
pub const KB_DRIVER_SERVICE_NAME: &str = "com.axle.kb_driver";
pub const MOUSE_DRIVER_SERVICE_NAME: &str = "com.axle.mouse_driver";
pub const FILE_SERVER_SERVICE_NAME: &str = "com.axle.file_server";

/// A service name as carried on the wire: NUL-padded fixed-size buffer.
pub type ServiceNameBuf = [u8; MAX_SERVICE_NAME_LEN];

pub fn service_name_buf(name: &str) -> ServiceNameBuf {
    let mut buf = [0u8; MAX_SERVICE_NAME_LEN];
    let len = name.len().min(MAX_SERVICE_NAME_LEN);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf
}

pub fn service_name_from_buf(buf: &ServiceNameBuf) -> &str {
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    core::str::from_utf8(&buf[..len]).unwrap_or("")
}

// Commands understood by the `com.axle.core` service, and the notifications
// it publishes. These share the event-tag namespace with nothing else; AWM
// client events live at 800+.
pub const AMC_AWM_MAP_FRAMEBUFFER: u32 = 200;
pub const AMC_AWM_MAP_FRAMEBUFFER_RESPONSE: u32 = 201;
pub const AMC_SLEEP_UNTIL_TIMESTAMP_OR_MESSAGE: u32 = 202;
pub const AMC_SHARED_MEMORY_CREATE_REQUEST: u32 = 203;
pub const AMC_SHARED_MEMORY_CREATE_RESPONSE: u32 = 204;
pub const AMC_REGISTER_NOTIFICATION_SERVICE_DIED: u32 = 205;
pub const AMC_SERVICE_DIED_NOTIFICATION: u32 = 206;
pub const AMC_FLUSH_MESSAGES_TO_SERVICE: u32 = 207;

// Supervision events delivered to a managing parent service.
pub const AMC_SUPERVISED_PROCESS_CREATE: u32 = 210;
pub const AMC_SUPERVISED_PROCESS_EXIT: u32 = 211;

/// Sent by AWM when a desktop shortcut is launched.
pub const FILE_SERVER_LAUNCH_PROGRAM: u32 = 102;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AmcSupervisedProcessCreate {
    pub event: u32,
    pub pid: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AmcSupervisedProcessExit {
    pub event: u32,
    pub pid: u64,
    pub exit_code: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AmcFramebufferInfo {
    pub event: u32,
    pub address: u64,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub bits_per_pixel: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AmcSleepUntilTimestampOrMessage {
    pub event: u32,
    pub delay_ms: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AmcSharedMemoryCreateRequest {
    pub event: u32,
    pub remote_service: ServiceNameBuf,
    pub buffer_size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AmcSharedMemoryCreateResponse {
    pub event: u32,
    pub local_buffer_start: u64,
    pub remote_buffer_start: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AmcNotifyWhenServiceDies {
    pub event: u32,
    pub remote_service: ServiceNameBuf,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AmcServiceDiedNotification {
    pub event: u32,
    pub dead_service: ServiceNameBuf,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AmcFlushMessagesToService {
    pub event: u32,
    pub remote_service: ServiceNameBuf,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FileServerLaunchProgram {
    pub event: u32,
    pub path: [u8; 128],
}

// Raw input-driver message bodies. The drivers forward hardware packets
// unparsed; AWM owns interpretation.

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct MousePacket {
    pub status: u8,
    pub rel_x: i16,
    pub rel_y: i16,
    pub rel_z: i8,
}

pub const MOUSE_STATUS_LEFT: u8 = 1 << 0;
pub const MOUSE_STATUS_RIGHT: u8 = 1 << 1;
pub const MOUSE_STATUS_MIDDLE: u8 = 1 << 2;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyEventType {
    Pressed = 0,
    Released = 1,
}

/// Non-printable keys are reported above the Unicode range.
pub const KEY_IDENT_LEFT_SHIFT: u32 = 0x110;
pub const KEY_IDENT_RIGHT_SHIFT: u32 = 0x111;
pub const KEY_IDENT_LEFT_CONTROL: u32 = 0x112;
pub const KEY_IDENT_LEFT_COMMAND: u32 = 0x113;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct KeyEventMsg {
    pub event_type: KeyEventType,
    pub key: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_name_round_trip() {
        let buf = service_name_buf(AWM_SERVICE_NAME);
        assert_eq!(service_name_from_buf(&buf), AWM_SERVICE_NAME);
    }

    #[test]
    fn service_name_truncates_at_max_len() {
        let long: std::string::String = core::iter::repeat('x').take(100).collect();
        let buf = service_name_buf(&long);
        assert_eq!(service_name_from_buf(&buf).len(), MAX_SERVICE_NAME_LEN);
    }

    #[test]
    fn unterminated_buf_uses_full_length() {
        let buf = [b'a'; MAX_SERVICE_NAME_LEN];
        assert_eq!(service_name_from_buf(&buf).len(), MAX_SERVICE_NAME_LEN);
    }
}
