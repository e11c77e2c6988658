//! ACPI table access. Only the MADT is consumed (APIC addressing); the
//! AML-interpreter hooks of the handler trait are never exercised by table
//! parsing and stay unimplemented.

use crate::memory::physical_memory::OffsetMappedPhysAddr;
use acpi::aml::AmlError;
use acpi::{AcpiTables, Handle, PciAddress, PhysicalMapping};
use core::marker::PhantomData;
use core::ptr::NonNull;
use limine::response::RsdpResponse;
use x86_64::PhysAddr;

#[derive(Debug, Clone)]
struct KernelAcpiHandler {
    phantom: PhantomData<NonNull<()>>,
}

fn phys_ptr<T>(address: usize) -> *mut T {
    PhysAddr::new(address as u64).offset_mapped().as_mut_ptr()
}

impl acpi::Handler for KernelAcpiHandler {
    unsafe fn map_physical_region<T>(
        &self,
        physical_address: usize,
        size: usize,
    ) -> PhysicalMapping<Self, T> {
        // All physical memory is reachable through the direct map; no
        // dedicated mapping is needed
        PhysicalMapping {
            physical_start: physical_address,
            virtual_start: NonNull::new(phys_ptr(physical_address)).unwrap(),
            region_length: size,
            mapped_length: size,
            handler: self.clone(),
        }
    }

    fn unmap_physical_region<T>(_region: &PhysicalMapping<Self, T>) {}

    fn read_u8(&self, address: usize) -> u8 {
        unsafe { core::ptr::read_volatile(phys_ptr(address)) }
    }

    fn read_u16(&self, address: usize) -> u16 {
        unsafe { core::ptr::read_volatile(phys_ptr(address)) }
    }

    fn read_u32(&self, address: usize) -> u32 {
        unsafe { core::ptr::read_volatile(phys_ptr(address)) }
    }

    fn read_u64(&self, address: usize) -> u64 {
        unsafe { core::ptr::read_volatile(phys_ptr(address)) }
    }

    fn write_u8(&self, address: usize, value: u8) {
        unsafe { core::ptr::write_volatile(phys_ptr(address), value) }
    }

    fn write_u16(&self, address: usize, value: u16) {
        unsafe { core::ptr::write_volatile(phys_ptr(address), value) }
    }

    fn write_u32(&self, address: usize, value: u32) {
        unsafe { core::ptr::write_volatile(phys_ptr(address), value) }
    }

    fn write_u64(&self, address: usize, value: u64) {
        unsafe { core::ptr::write_volatile(phys_ptr(address), value) }
    }

    fn read_io_u8(&self, port: u16) -> u8 {
        unsafe { x86::io::inb(port) }
    }

    fn read_io_u16(&self, port: u16) -> u16 {
        unsafe { x86::io::inw(port) }
    }

    fn read_io_u32(&self, port: u16) -> u32 {
        unsafe { x86::io::inl(port) }
    }

    fn write_io_u8(&self, port: u16, value: u8) {
        unsafe { x86::io::outb(port, value) }
    }

    fn write_io_u16(&self, port: u16, value: u16) {
        unsafe { x86::io::outw(port, value) }
    }

    fn write_io_u32(&self, port: u16, value: u32) {
        unsafe { x86::io::outl(port, value) }
    }

    fn read_pci_u8(&self, _address: PciAddress, _offset: u16) -> u8 {
        todo!()
    }

    fn read_pci_u16(&self, _address: PciAddress, _offset: u16) -> u16 {
        todo!()
    }

    fn read_pci_u32(&self, _address: PciAddress, _offset: u16) -> u32 {
        todo!()
    }

    fn write_pci_u8(&self, _address: PciAddress, _offset: u16, _value: u8) {
        todo!()
    }

    fn write_pci_u16(&self, _address: PciAddress, _offset: u16, _value: u16) {
        todo!()
    }

    fn write_pci_u32(&self, _address: PciAddress, _offset: u16, _value: u32) {
        todo!()
    }

    fn nanos_since_boot(&self) -> u64 {
        crate::time::try_ms_since_boot().unwrap_or(0) * 1_000_000
    }

    fn stall(&self, microseconds: u64) {
        let start = crate::time::tsc::value();
        let ticks = microseconds * crate::time::tsc::TSC_PER_MS.load(core::sync::atomic::Ordering::Relaxed) / 1000;
        while crate::time::tsc::value() - start < ticks {
            core::hint::spin_loop();
        }
    }

    fn sleep(&self, milliseconds: u64) {
        self.stall(milliseconds * 1000);
    }

    fn create_mutex(&self) -> Handle {
        todo!()
    }

    fn acquire(&self, _mutex: Handle, _timeout: u16) -> Result<(), AmlError> {
        todo!()
    }

    fn release(&self, _mutex: Handle) {
        todo!()
    }
}

pub fn parse(rsdp: &RsdpResponse) -> AcpiTables<impl acpi::Handler> {
    let address = rsdp.address();
    unsafe {
        AcpiTables::from_rsdp(
            KernelAcpiHandler {
                phantom: PhantomData,
            },
            address,
        )
    }
    .unwrap()
}
