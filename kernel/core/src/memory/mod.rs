use crate::consts::KERNEL_STACKS_BASE;
use crate::memory::hhdm_offset::hhdm_offset;
use crate::memory::physical_memory::{OffsetMappedPhysAddr, PhysicalMemory};
use limine::response::MemoryMapResponse;
use spin::Once;
use x86_64::VirtAddr;
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::page_table::PageTableFlags;
use x86_64::structures::paging::{OffsetPageTable, PageTable, PhysFrame, Size4KiB};

pub mod address_space;
pub mod cpu_local_data;
pub mod global_allocator;
pub mod guarded_stack;
pub mod hhdm_offset;
pub mod physical_memory;

#[non_exhaustive]
#[derive(Debug)]
pub struct Memory {
    pub physical_memory: spin::Mutex<PhysicalMemory>,
    /// The boot page tables. All cloned address spaces share this table's
    /// higher half, so kernel mappings made after boot stay visible
    /// everywhere.
    pub kernel_cr3: PhysFrame<Size4KiB>,
    pub kernel_cr3_flags: Cr3Flags,
}

pub static MEMORY: Once<Memory> = Once::new();

/// Initializes the global allocator and physical-memory tracking, and
/// pre-populates the kernel-stack arena's L4 slot so address spaces cloned
/// later share it.
///
/// # Safety
/// This function must be called exactly once, before any page tables are modified.
pub unsafe fn init_bsp(memory_map: &'static MemoryMapResponse) {
    let global_allocator_start = unsafe { global_allocator::init(memory_map) };
    let mut physical_memory = PhysicalMemory::new(memory_map, global_allocator_start);
    let (kernel_cr3, kernel_cr3_flags) = Cr3::read();

    // The stack arena's L4 entry must exist before the first vas_clone;
    // entries added to the shared L3 subtree afterwards appear in every
    // address space automatically.
    {
        let l4_virt = kernel_cr3.start_address().offset_mapped();
        let l4_table = unsafe { &mut *l4_virt.as_mut_ptr::<PageTable>() };
        let slot = usize::from(VirtAddr::new(KERNEL_STACKS_BASE).p4_index());
        if l4_table[slot].is_unused() {
            use x86_64::structures::paging::FrameAllocator;
            let mut frame_allocator = physical_memory.get_kernel_frame_allocator();
            let frame = frame_allocator.allocate_frame().unwrap();
            l4_table[slot].set_frame(
                frame,
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
            );
        }
    }

    MEMORY.call_once(|| Memory {
        physical_memory: spin::Mutex::new(physical_memory),
        kernel_cr3,
        kernel_cr3_flags,
    });
}

/// # Safety
/// `init_bsp` must have completed. APs boot on Limine's tables; switch them
/// to the shared kernel tables so stack mappings are visible.
pub unsafe fn init_ap() {
    let memory = MEMORY.get().unwrap();
    unsafe { Cr3::write(memory.kernel_cr3, memory.kernel_cr3_flags) };
}

/// A mapper over the shared kernel page tables.
///
/// # Safety
/// The caller must serialise table modifications (hold the physical-memory
/// lock across the mapping operation).
pub unsafe fn kernel_mapper() -> OffsetPageTable<'static> {
    let memory = MEMORY.get().unwrap();
    let l4_virt = memory.kernel_cr3.start_address().offset_mapped();
    let l4_table = unsafe { &mut *l4_virt.as_mut_ptr::<PageTable>() };
    unsafe { OffsetPageTable::new(l4_table, VirtAddr::new(u64::from(hhdm_offset()))) }
}
