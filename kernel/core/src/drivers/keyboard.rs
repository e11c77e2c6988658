//! PS/2 keyboard driver. The IRQ handler decodes scancodes into
//! press/release events and pushes them onto a fixed ring; the forwarder
//! task relays them into AMC as `com.axle.kb_driver`. Interpretation
//! (focus, shortcuts) is AWM's job.

use crate::interrupt::{HandlerResult, InterruptVector, RegisterFrame, register_interrupt_handler};
use kernel_api_types::amc::{
    KEY_IDENT_LEFT_COMMAND, KEY_IDENT_LEFT_CONTROL, KEY_IDENT_LEFT_SHIFT, KEY_IDENT_RIGHT_SHIFT,
    KeyEventMsg, KeyEventType,
};
use spin::Mutex;

/// PS/2 Set 1 scancode-to-ASCII lookup table (unshifted)
static NORMAL: &[u8] = &[
    0, 27, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', b'\x08',
    b'\t', b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n',
    0, b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`',
    0, b'\\', b'z', b'x', b'c', b'v', b'b', b'n', b'm', b',', b'.', b'/', 0, b'*',
    0, b' ',
];

/// PS/2 Set 1 scancode-to-ASCII lookup table (shifted)
static SHIFTED: &[u8] = &[
    0, 27, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', b'\x08',
    b'\t', b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n',
    0, b'A', b'S', b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~',
    0, b'|', b'Z', b'X', b'C', b'V', b'B', b'N', b'M', b'<', b'>', b'?', 0, b'*',
    0, b' ',
];

const KEY_BUFFER_SIZE: usize = 64;

struct KeyBuffer {
    buffer: [KeyEventMsg; KEY_BUFFER_SIZE],
    head: usize,
    tail: usize,
    count: usize,
}

const EMPTY_EVENT: KeyEventMsg = KeyEventMsg {
    event_type: KeyEventType::Pressed,
    key: 0,
};

impl KeyBuffer {
    const fn new() -> Self {
        Self {
            buffer: [EMPTY_EVENT; KEY_BUFFER_SIZE],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, event: KeyEventMsg) {
        // Drop the newest events when full; the user will retype
        if self.count < KEY_BUFFER_SIZE {
            self.buffer[self.tail] = event;
            self.tail = (self.tail + 1) % KEY_BUFFER_SIZE;
            self.count += 1;
        }
    }

    fn pop(&mut self) -> Option<KeyEventMsg> {
        if self.count == 0 {
            return None;
        }
        let event = self.buffer[self.head];
        self.head = (self.head + 1) % KEY_BUFFER_SIZE;
        self.count -= 1;
        Some(event)
    }
}

static KEY_BUFFER: Mutex<KeyBuffer> = Mutex::new(KeyBuffer::new());

struct DecodeState {
    shift_held: bool,
    extended: bool,
}

static STATE: Mutex<DecodeState> = Mutex::new(DecodeState {
    shift_held: false,
    extended: false,
});

fn push_event(event: KeyEventMsg) {
    KEY_BUFFER.lock().push(event);
    super::wake_input_forwarder();
}

pub fn pop_event() -> Option<KeyEventMsg> {
    x86_64::instructions::interrupts::without_interrupts(|| KEY_BUFFER.lock().pop())
}

pub fn has_pending() -> bool {
    KEY_BUFFER.lock().count > 0
}

/// Decode one raw scancode. Public so tests can feed bytes without port IO.
pub fn handle_scancode(scancode: u8) {
    let mut state = STATE.lock();

    if scancode == 0xE0 {
        state.extended = true;
        return;
    }
    let is_extended = state.extended;
    state.extended = false;

    let released = scancode & 0x80 != 0;
    let code = scancode & 0x7F;
    let event_type = if released {
        KeyEventType::Released
    } else {
        KeyEventType::Pressed
    };

    // Modifiers are reported with their own identifiers so AWM can track
    // held-state; the extended left-meta scancode doubles as command.
    let modifier = match (is_extended, code) {
        (false, 0x2A) => Some(KEY_IDENT_LEFT_SHIFT),
        (false, 0x36) => Some(KEY_IDENT_RIGHT_SHIFT),
        (false, 0x1D) => Some(KEY_IDENT_LEFT_CONTROL),
        (true, 0x5B) => Some(KEY_IDENT_LEFT_COMMAND),
        _ => None,
    };
    if let Some(key) = modifier {
        if code == 0x2A || code == 0x36 {
            state.shift_held = !released;
        }
        drop(state);
        push_event(KeyEventMsg { event_type, key });
        return;
    }

    if is_extended {
        return;
    }

    let table = if state.shift_held { SHIFTED } else { NORMAL };
    let key = match table.get(code as usize) {
        Some(&c) if c != 0 => c as u32,
        _ => return,
    };
    drop(state);
    push_event(KeyEventMsg { event_type, key });
}

fn keyboard_interrupt_handler(_frame: &mut RegisterFrame) -> HandlerResult {
    let scancode: u8 = unsafe { x86::io::inb(0x60) };
    handle_scancode(scancode);
    HandlerResult::Handled
}

pub fn init() {
    register_interrupt_handler(
        u8::from(InterruptVector::Keyboard),
        keyboard_interrupt_handler,
    );
    log::info!("PS/2 keyboard driver online");
}
