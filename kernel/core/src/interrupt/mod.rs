use num_enum::IntoPrimitive;
use spin::Mutex;

pub mod handlers;
pub mod idt;
pub mod pic;

#[derive(Debug, Clone, Copy, IntoPrimitive)]
#[repr(u8)]
pub enum InterruptVector {
    /// IRQ 0 after the PIC remap
    PitTimer = 32,
    /// IRQ 1 after the PIC remap
    Keyboard = 33,
    /// IRQ 12 after the PIC remap
    Mouse = 44,
    LocalApicTimer = 48,
    LocalApicError = 49,
    /// IPI nudging a halted CPU to re-run its scheduler
    Reschedule = 50,
    Syscall = 128,
    LocalApicSpurious = 0xFF,
}

/// The uniform register snapshot every dispatch stub pushes before entering
/// the common dispatcher. Field order mirrors the push sequence in
/// `idt.rs`; the iretq frame the CPU pushed sits at the end.
#[repr(C)]
#[derive(Debug)]
pub struct RegisterFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub vector: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// The dispatcher acknowledges the interrupt controller.
    Handled,
    /// The handler already signalled EOI (it may have context-switched away
    /// and only returns here much later).
    EoiSent,
}

pub type InterruptHandlerFn = fn(&mut RegisterFrame) -> HandlerResult;

static HANDLERS: Mutex<[Option<InterruptHandlerFn>; 256]> = Mutex::new([None; 256]);

/// Route `vector` to `handler`. Registering a vector twice is a kernel bug.
/// PIC-delivered vectors are implicitly unmasked.
pub fn register_interrupt_handler(vector: u8, handler: InterruptHandlerFn) {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut handlers = HANDLERS.lock();
        assert!(
            handlers[vector as usize].is_none(),
            "interrupt vector {vector} already has a registered handler"
        );
        handlers[vector as usize] = Some(handler);
    });

    if pic::is_pic_vector(vector) {
        pic::unmask_line(vector - pic::PIC1_VECTOR_BASE);
    }
}

/// Common dispatcher behind every stub for vectors 32..=255.
pub(crate) extern "C" fn dispatch_interrupt(frame: &mut RegisterFrame) {
    let vector = frame.vector as u8;
    let handler = HANDLERS.lock()[vector as usize];

    let result = match handler {
        Some(handler) => handler(frame),
        None => {
            if vector == pic::SPURIOUS_IRQ7_VECTOR {
                // A known-spurious PIC IRQ 7; no EOI either
                return;
            }
            if vector == u8::from(InterruptVector::LocalApicSpurious) {
                // APIC spurious interrupts are not in-service; no EOI
                return;
            }
            log::warn!("unhandled interrupt on vector {vector}");
            HandlerResult::Handled
        }
    };

    if result == HandlerResult::EoiSent {
        return;
    }

    if pic::is_pic_vector(vector) {
        pic::send_eoi(vector);
    } else {
        // APIC-delivered (timer, IPIs, spurious)
        let cpu = crate::memory::cpu_local_data::get_local();
        if let Some(local_apic) = cpu.local_apic.get() {
            unsafe { (*local_apic.get()).end_of_interrupt() };
        }
    }
}
