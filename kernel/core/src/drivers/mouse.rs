//! PS/2 mouse driver. The IRQ handler accumulates 3-byte packets into a
//! fixed ring; the forwarder task relays them raw into AMC as
//! `com.axle.mouse_driver`. AWM owns interpretation and coalescing.

use crate::interrupt::{HandlerResult, InterruptVector, RegisterFrame, register_interrupt_handler};
use kernel_api_types::amc::MousePacket;
use spin::Mutex;

const MOUSE_BUFFER_SIZE: usize = 64;

struct MouseBuffer {
    buffer: [MousePacket; MOUSE_BUFFER_SIZE],
    head: usize,
    tail: usize,
    count: usize,
}

const EMPTY_PACKET: MousePacket = MousePacket {
    status: 0,
    rel_x: 0,
    rel_y: 0,
    rel_z: 0,
};

impl MouseBuffer {
    const fn new() -> Self {
        Self {
            buffer: [EMPTY_PACKET; MOUSE_BUFFER_SIZE],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, packet: MousePacket) {
        if self.count < MOUSE_BUFFER_SIZE {
            self.buffer[self.tail] = packet;
            self.tail = (self.tail + 1) % MOUSE_BUFFER_SIZE;
            self.count += 1;
        }
    }

    fn pop(&mut self) -> Option<MousePacket> {
        if self.count == 0 {
            return None;
        }
        let packet = self.buffer[self.head];
        self.head = (self.head + 1) % MOUSE_BUFFER_SIZE;
        self.count -= 1;
        Some(packet)
    }
}

static MOUSE_BUFFER: Mutex<MouseBuffer> = Mutex::new(MouseBuffer::new());

struct PacketAccumulator {
    bytes: [u8; 3],
    idx: usize,
}

static PACKET: Mutex<PacketAccumulator> = Mutex::new(PacketAccumulator {
    bytes: [0; 3],
    idx: 0,
});

pub fn pop_packet() -> Option<MousePacket> {
    x86_64::instructions::interrupts::without_interrupts(|| MOUSE_BUFFER.lock().pop())
}

pub fn has_pending() -> bool {
    MOUSE_BUFFER.lock().count > 0
}

/// Process one byte from the aux port; emits a packet on the third.
pub fn handle_byte(byte: u8) {
    let mut packet = PACKET.lock();
    let idx = packet.idx;
    packet.bytes[idx] = byte;
    packet.idx = idx + 1;
    if packet.idx < 3 {
        return;
    }
    packet.idx = 0;

    let status = packet.bytes[0];
    let raw_dx = packet.bytes[1];
    let raw_dy = packet.bytes[2];
    drop(packet);

    // Discard packet if overflow bits are set
    if status & 0xC0 != 0 {
        return;
    }

    let dx = (raw_dx as i16) | (if status & 0x10 != 0 { -256i16 } else { 0 });
    let dy = (raw_dy as i16) | (if status & 0x20 != 0 { -256i16 } else { 0 });
    // PS/2 Y is inverted; positive = down in screen coords
    let dy = -dy;

    MOUSE_BUFFER.lock().push(MousePacket {
        status: status & 0x07,
        rel_x: dx,
        rel_y: dy,
        rel_z: 0,
    });
    super::wake_input_forwarder();
}

fn mouse_interrupt_handler(_frame: &mut RegisterFrame) -> HandlerResult {
    let byte: u8 = unsafe { x86::io::inb(0x60) };
    handle_byte(byte);
    HandlerResult::Handled
}

fn ps2_wait_write() {
    loop {
        let status: u8 = unsafe { x86::io::inb(0x64) };
        if status & 0x02 == 0 {
            break;
        }
        core::hint::spin_loop();
    }
}

fn ps2_wait_read() {
    loop {
        let status: u8 = unsafe { x86::io::inb(0x64) };
        if status & 0x01 != 0 {
            break;
        }
        core::hint::spin_loop();
    }
}

/// Initialize the PS/2 mouse: enable aux port, enable IRQ12, set stream mode.
pub fn init() {
    unsafe {
        // Enable aux port
        ps2_wait_write();
        x86::io::outb(0x64, 0xA8);

        // Request controller config byte
        ps2_wait_write();
        x86::io::outb(0x64, 0x20);
        ps2_wait_read();
        let mut ccb: u8 = x86::io::inb(0x60);

        // Enable IRQ12 (bit 1), enable aux clock (clear bit 5)
        ccb |= 0x02;
        ccb &= !0x20;

        // Write config byte back
        ps2_wait_write();
        x86::io::outb(0x64, 0x60);
        ps2_wait_write();
        x86::io::outb(0x60, ccb);

        // Send 0xF4 (Enable streaming) to the mouse device
        ps2_wait_write();
        x86::io::outb(0x64, 0xD4);
        ps2_wait_write();
        x86::io::outb(0x60, 0xF4);
    }

    register_interrupt_handler(u8::from(InterruptVector::Mouse), mouse_interrupt_handler);
    log::info!("PS/2 mouse driver online");
}
