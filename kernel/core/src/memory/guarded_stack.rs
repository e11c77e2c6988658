use crate::consts::KERNEL_STACKS_BASE;
use crate::memory::MEMORY;
use crate::memory::physical_memory::{FRAME_SIZE, KernelMemoryUsageType, MemoryType};
use alloc::collections::BTreeMap;
use core::arch::naked_asm;
use core::sync::atomic::{AtomicU64, Ordering};
use x86_64::VirtAddr;
use x86_64::structures::paging::page_table::PageTableFlags;
use x86_64::structures::paging::{Mapper, Page, Size4KiB};

pub const NORMAL_STACK_SIZE: u64 = 64 * 0x400;
pub const EXCEPTION_HANDLER_STACK_SIZE: u64 = 64 * 0x400;

/// Bump allocator over the kernel-stack virtual arena. Stacks are never
/// re-allocated at the same address, so a stale pointer into a reaped
/// task's stack faults instead of aliasing a new stack.
static NEXT_STACK_VADDR: AtomicU64 = AtomicU64::new(KERNEL_STACKS_BASE);

// Keep track of stack guard pages so the page-fault handler can report
// overflows by name
pub static STACK_GUARD_PAGES: spin::Mutex<BTreeMap<Page, StackInfo>> =
    spin::Mutex::new(BTreeMap::new());

#[derive(Debug, Clone, Copy)]
pub enum StackType {
    Normal,
    ExceptionHandler,
}

#[derive(Debug, Clone, Copy)]
pub struct StackId {
    pub _type: StackType,
    #[allow(unused)]
    pub cpu_id: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct StackInfo {
    #[allow(unused)]
    id: StackId,
    #[allow(unused)]
    size: u64,
}

#[derive(Debug)]
pub struct GuardedStack {
    first_mapped_page: Page<Size4KiB>,
    n_mapped_pages: u64,
    top: VirtAddr,
}

impl GuardedStack {
    pub fn new_kernel(size: u64, id: StackId) -> Self {
        let n_mapped_pages = size.div_ceil(FRAME_SIZE);
        // +1 for the guard page below the stack
        let n_virtual_pages = n_mapped_pages + 1;

        let base = NEXT_STACK_VADDR
            .fetch_add(n_virtual_pages * FRAME_SIZE, Ordering::Relaxed);

        let guard_page = Page::containing_address(VirtAddr::new(base));
        STACK_GUARD_PAGES
            .lock()
            .insert(guard_page, StackInfo { id, size });

        let first_mapped_page = guard_page + 1;

        let memory = MEMORY.get().unwrap();
        let mut physical_memory = memory.physical_memory.lock();
        let mut mapper = unsafe { crate::memory::kernel_mapper() };
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::NO_EXECUTE;
        for i in 0..n_mapped_pages {
            let page = first_mapped_page + i;
            let frame = physical_memory
                .allocate_frame_with_type(MemoryType::UsedByKernel(KernelMemoryUsageType::Stack))
                .unwrap();
            let mut frame_allocator = physical_memory.get_kernel_frame_allocator();
            unsafe {
                mapper
                    .map_to(page, frame, flags, &mut frame_allocator)
                    .unwrap()
                    .flush();
            }
        }

        Self {
            first_mapped_page,
            n_mapped_pages,
            top: first_mapped_page.start_address() + n_mapped_pages * FRAME_SIZE,
        }
    }

    pub fn top(&self) -> VirtAddr {
        self.top
    }

    pub fn switch(self, f: extern "sysv64" fn() -> !) {
        let new_rsp = self.top.as_u64();
        // The stack is leaked into the running context; it is reclaimed only
        // if the task it backs is reaped.
        core::mem::forget(self);
        unsafe { switch_to(new_rsp, f) }
    }
}

impl Drop for GuardedStack {
    /// Unmap and free the stack. Runs when a TCB is torn down by the reaper;
    /// must never run on the stack being freed.
    fn drop(&mut self) {
        let memory = MEMORY.get().unwrap();
        let mut physical_memory = memory.physical_memory.lock();
        let mut mapper = unsafe { crate::memory::kernel_mapper() };
        for i in 0..self.n_mapped_pages {
            let page = self.first_mapped_page + i;
            if let Ok((frame, flush)) = mapper.unmap(page) {
                flush.flush();
                let _ = physical_memory
                    .free_frame(frame, MemoryType::UsedByKernel(KernelMemoryUsageType::Stack));
            }
        }
        STACK_GUARD_PAGES.lock().remove(&(self.first_mapped_page - 1));
    }
}

#[unsafe(naked)]
unsafe extern "sysv64" fn switch_to(new_rsp: u64, f: extern "sysv64" fn() -> !) {
    naked_asm!(
        "
        mov rsp, rdi
        call rsi
        "
    );
}
