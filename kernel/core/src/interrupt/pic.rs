//! Legacy 8259 programmable interrupt controller.
//!
//! The PICs boot mapped over the CPU-exception vectors; remapping moves
//! IRQs 0-15 to vectors 32-47. Lines stay masked until a handler is
//! registered for them.

use x86_64::instructions::port::Port;

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;
const CMD_EOI: u8 = 0x20;

pub const PIC1_VECTOR_BASE: u8 = 32;
pub const PIC2_VECTOR_BASE: u8 = 40;
/// IRQ 7 fires spuriously when a line drops before the CPU acks; after the
/// remap it shows up here.
pub const SPURIOUS_IRQ7_VECTOR: u8 = PIC1_VECTOR_BASE + 7;

pub fn is_pic_vector(vector: u8) -> bool {
    (PIC1_VECTOR_BASE..PIC1_VECTOR_BASE + 16).contains(&vector)
}

/// Remap both PICs so IRQs 0-15 land on vectors 32-47, then mask every line.
pub fn remap_and_mask_all() {
    let mut pic1_cmd = Port::<u8>::new(PIC1_CMD);
    let mut pic1_data = Port::<u8>::new(PIC1_DATA);
    let mut pic2_cmd = Port::<u8>::new(PIC2_CMD);
    let mut pic2_data = Port::<u8>::new(PIC2_DATA);

    unsafe {
        // Begin initialization in cascade mode
        pic1_cmd.write(ICW1_INIT | ICW1_ICW4);
        pic2_cmd.write(ICW1_INIT | ICW1_ICW4);
        // Vector offsets
        pic1_data.write(PIC1_VECTOR_BASE);
        pic2_data.write(PIC2_VECTOR_BASE);
        // Wire the slave to IRQ 2 on the master
        pic1_data.write(0b0000_0100);
        pic2_data.write(2);
        // 8086 mode
        pic1_data.write(ICW4_8086);
        pic2_data.write(ICW4_8086);
        // All lines masked until a handler registers
        pic1_data.write(0xFF);
        pic2_data.write(0xFF);
    }

    log::info!("PIC remapped: IRQs 0-15 -> vectors 32-47");
}

pub fn unmask_line(irq: u8) {
    assert!(irq < 16);
    unsafe {
        if irq < 8 {
            let mut data = Port::<u8>::new(PIC1_DATA);
            let mask: u8 = data.read();
            data.write(mask & !(1 << irq));
        } else {
            let mut data = Port::<u8>::new(PIC2_DATA);
            let mask: u8 = data.read();
            data.write(mask & !(1 << (irq - 8)));
            // Slave lines arrive through the master's cascade input
            let mut master = Port::<u8>::new(PIC1_DATA);
            let mask: u8 = master.read();
            master.write(mask & !(1 << 2));
        }
    }
}

/// Acknowledge a PIC-delivered interrupt: master always, slave too for
/// vectors >= 40.
pub fn send_eoi(vector: u8) {
    unsafe {
        if vector >= PIC2_VECTOR_BASE {
            Port::<u8>::new(PIC2_CMD).write(CMD_EOI);
        }
        Port::<u8>::new(PIC1_CMD).write(CMD_EOI);
    }
}
