use crate::gdt::IstStackIndexes;
use crate::interrupt::handlers::{
    breakpoint_handler, divide_error_handler, double_fault_handler,
    general_protection_fault_handler, invalid_opcode_handler, nmi_handler, page_fault_handler,
};
use crate::memory::cpu_local_data::get_local;
use core::arch::global_asm;
use x86_64::VirtAddr;
use x86_64::structures::idt::InterruptDescriptorTable;

// Vectors 32..=255 share one calling convention: a tiny per-vector stub
// pushes the vector number and falls into the common stub, which snapshots
// every GPR into a `RegisterFrame` and calls the dispatcher. CPU exceptions
// (0..32) keep their typed handlers below.
global_asm!(
    r#"
    .altmacro
    .macro define_dispatch_stub vector
    dispatch_stub_\vector:
        push \vector
        jmp common_dispatch_stub
    .endm

    .section .text
    .set v, 32
    .rept 224
        define_dispatch_stub %v
        .set v, v+1
    .endr

    .macro dispatch_stub_addr vector
        .quad dispatch_stub_\vector
    .endm

    .section .rodata
    .balign 8
    .global DISPATCH_STUB_TABLE
    DISPATCH_STUB_TABLE:
    .set v, 32
    .rept 224
        dispatch_stub_addr %v
        .set v, v+1
    .endr
    .section .text

    common_dispatch_stub:
        push rax
        push rbx
        push rcx
        push rdx
        push rsi
        push rdi
        push rbp
        push r8
        push r9
        push r10
        push r11
        push r12
        push r13
        push r14
        push r15
        mov rdi, rsp
        sub rsp, 8
        cld
        call {dispatch}
        add rsp, 8
        pop r15
        pop r14
        pop r13
        pop r12
        pop r11
        pop r10
        pop r9
        pop r8
        pop rbp
        pop rdi
        pop rsi
        pop rdx
        pop rcx
        pop rbx
        pop rax
        add rsp, 8
        iretq
    "#,
    dispatch = sym super::dispatch_interrupt,
);

unsafe extern "C" {
    static DISPATCH_STUB_TABLE: [usize; 224];
}

pub fn init() {
    let idt = get_local().idt.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        unsafe {
            idt.page_fault
                .set_handler_fn(page_fault_handler)
                .set_stack_index(u8::from(IstStackIndexes::Exception).into())
        };
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(u8::from(IstStackIndexes::Exception).into())
        };

        let stub_table = unsafe { &DISPATCH_STUB_TABLE };
        for vector in 32..=255u8 {
            let stub = stub_table[vector as usize - 32];
            unsafe {
                idt[vector].set_handler_addr(VirtAddr::new(stub as u64));
            }
        }
        idt
    });
    idt.load();
}
