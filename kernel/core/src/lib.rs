#![no_std]
#![feature(abi_x86_interrupt)]
extern crate alloc;

pub mod acpi_tables;
pub mod amc;
pub mod apic;
pub mod consts;
pub mod drivers;
pub mod gdt;
pub mod interrupt;
pub mod limine_requests;
pub mod logger;
pub mod memory;
pub mod syscall;
pub mod task;
pub mod time;
pub mod user_task_from_elf;

pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

pub fn project_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
