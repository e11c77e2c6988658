//! The virtual-address-space contract the multitasking core consumes:
//! load / clone / teardown / alloc_range / map_range_exact.
//!
//! Every address space shares the kernel's higher half by aliasing the boot
//! L4 table's upper entries; cloning therefore copies 256 table slots and
//! never any user mappings.

use crate::consts::USER_ALLOC_BASE;
use crate::memory::MEMORY;
use crate::memory::physical_memory::{FRAME_SIZE, KernelMemoryUsageType, MemoryType, OffsetMappedPhysAddr};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::page_table::PageTableFlags;
use x86_64::structures::paging::{
    FrameAllocator, Mapper, OffsetPageTable, Page, PageTable, PhysFrame, Size4KiB,
};
use x86_64::{PhysAddr, VirtAddr};

const USER_PAGE_FLAGS: PageTableFlags = PageTableFlags::PRESENT
    .union(PageTableFlags::WRITABLE)
    .union(PageTableFlags::USER_ACCESSIBLE);

#[derive(Debug)]
struct AddressSpaceInner {
    /// Bump pointer for `alloc_range` placements.
    next_user_vaddr: u64,
    /// Leaf frames this address space owns outright (heap, ELF segments,
    /// bss). Shared-buffer frames are owned by their `SharedRegion` and are
    /// deliberately absent here.
    owned_frames: Vec<PhysFrame<Size4KiB>>,
}

#[derive(Debug)]
pub struct AddressSpace {
    l4_frame: PhysFrame<Size4KiB>,
    /// The boot address space is never torn down and owns no user mappings.
    is_kernel_base: bool,
    inner: Mutex<AddressSpaceInner>,
}

impl AddressSpace {
    /// The address space wrapping the page tables that were live at boot.
    /// One instance machine-wide; every CPU's base points here.
    pub fn kernel_base() -> Arc<Self> {
        static KERNEL_BASE: spin::Once<Arc<AddressSpace>> = spin::Once::new();
        KERNEL_BASE
            .call_once(|| {
                let memory = MEMORY.get().unwrap();
                Arc::new(Self {
                    l4_frame: memory.kernel_cr3,
                    is_kernel_base: true,
                    inner: Mutex::new(AddressSpaceInner {
                        next_user_vaddr: USER_ALLOC_BASE,
                        owned_frames: Vec::new(),
                    }),
                })
            })
            .clone()
    }

    /// Produce a fresh address space sharing kernel mappings but no user
    /// mappings.
    pub fn clone_from(base: &AddressSpace) -> Arc<Self> {
        let memory = MEMORY.get().unwrap();
        let mut physical_memory = memory.physical_memory.lock();
        let l4_frame = {
            let mut frame_allocator = physical_memory.get_kernel_frame_allocator();
            frame_allocator.allocate_frame().unwrap()
        };
        let new_l4 =
            unsafe { &mut *l4_frame.start_address().offset_mapped().as_mut_ptr::<PageTable>() };
        let base_l4 =
            unsafe { &*base.l4_frame.start_address().offset_mapped().as_ptr::<PageTable>() };
        for i in 256..512 {
            new_l4[i] = base_l4[i].clone();
        }
        Arc::new(Self {
            l4_frame,
            is_kernel_base: false,
            inner: Mutex::new(AddressSpaceInner {
                next_user_vaddr: USER_ALLOC_BASE,
                owned_frames: Vec::new(),
            }),
        })
    }

    pub fn is_active(&self) -> bool {
        Cr3::read().0 == self.l4_frame
    }

    /// Install this address space. Idempotent against the active one.
    pub fn load(&self) {
        if self.is_active() {
            return;
        }
        let memory = MEMORY.get().unwrap();
        unsafe { Cr3::write(self.l4_frame, memory.kernel_cr3_flags) };
    }

    fn mapper(&self) -> OffsetPageTable<'static> {
        let l4_virt = self.l4_frame.start_address().offset_mapped();
        let l4_table = unsafe { &mut *l4_virt.as_mut_ptr::<PageTable>() };
        let hhdm = u64::from(crate::memory::hhdm_offset::hhdm_offset());
        unsafe { OffsetPageTable::new(l4_table, VirtAddr::new(hhdm)) }
    }

    fn flush_if_active(&self, page: Page<Size4KiB>) {
        if self.is_active() {
            x86_64::instructions::tlb::flush(page.start_address());
        }
    }

    /// Allocate and map `size` bytes (rounded up to whole pages) of fresh,
    /// zeroed memory. Returns the chosen base address.
    pub fn alloc_range(&self, size: u64) -> Option<VirtAddr> {
        let n_pages = size.div_ceil(FRAME_SIZE);
        let start = {
            let mut inner = self.inner.lock();
            let start = inner.next_user_vaddr;
            inner.next_user_vaddr += n_pages * FRAME_SIZE;
            start
        };
        self.map_zeroed_range_exact(VirtAddr::new(start), n_pages)?;
        Some(VirtAddr::new(start))
    }

    /// Map `n_pages` fresh, zeroed user frames at exactly `start`.
    pub fn map_zeroed_range_exact(&self, start: VirtAddr, n_pages: u64) -> Option<()> {
        let memory = MEMORY.get().unwrap();
        let mut physical_memory = memory.physical_memory.lock();
        let mut mapper = self.mapper();
        for i in 0..n_pages {
            let page = Page::containing_address(start + i * FRAME_SIZE);
            let frame = physical_memory.allocate_frame_with_type(MemoryType::UsedByUserMode)?;
            unsafe {
                core::ptr::write_bytes(
                    frame.start_address().offset_mapped().as_mut_ptr::<u8>(),
                    0,
                    FRAME_SIZE as usize,
                );
            }
            let mut frame_allocator = physical_memory.get_kernel_frame_allocator();
            unsafe {
                mapper
                    .map_to(page, frame, USER_PAGE_FLAGS, &mut frame_allocator)
                    .ok()?
                    .ignore();
            }
            self.flush_if_active(page);
            self.inner.lock().owned_frames.push(frame);
        }
        Some(())
    }

    /// Map the given physical frames at exactly `start`. The frames are not
    /// owned by this address space (shared buffers, MMIO, the framebuffer).
    pub fn map_range_exact(
        &self,
        start: VirtAddr,
        frames: &[PhysFrame<Size4KiB>],
        extra_flags: PageTableFlags,
    ) -> Option<()> {
        let memory = MEMORY.get().unwrap();
        let mut physical_memory = memory.physical_memory.lock();
        let mut mapper = self.mapper();
        for (i, &frame) in frames.iter().enumerate() {
            let page = Page::containing_address(start + i as u64 * FRAME_SIZE);
            let mut frame_allocator = physical_memory.get_kernel_frame_allocator();
            unsafe {
                mapper
                    .map_to(page, frame, USER_PAGE_FLAGS | extra_flags, &mut frame_allocator)
                    .ok()?
                    .ignore();
            }
            self.flush_if_active(page);
        }
        Some(())
    }

    /// Copy bytes into this address space through the direct map, page by
    /// page. The range must already be mapped. Works whether or not the
    /// space is active (the ELF loader writes segments before first run).
    pub fn write_bytes(&self, start: VirtAddr, data: &[u8]) -> Option<()> {
        use x86_64::structures::paging::Translate;
        let mapper = self.mapper();
        let mut written = 0usize;
        while written < data.len() {
            let vaddr = start + written as u64;
            let page_offset = vaddr.as_u64() % FRAME_SIZE;
            let chunk = ((FRAME_SIZE - page_offset) as usize).min(data.len() - written);
            let phys = mapper.translate_addr(vaddr)?;
            unsafe {
                core::ptr::copy_nonoverlapping(
                    data.as_ptr().add(written),
                    phys.offset_mapped().as_mut_ptr::<u8>(),
                    chunk,
                );
            }
            written += chunk;
        }
        Some(())
    }

    /// Pick a free range for `n_pages` without mapping anything; used to
    /// place a shared region in the remote service's space.
    pub fn reserve_range(&self, n_pages: u64) -> VirtAddr {
        let mut inner = self.inner.lock();
        let start = inner.next_user_vaddr;
        inner.next_user_vaddr += n_pages * FRAME_SIZE;
        VirtAddr::new(start)
    }

    /// Release everything the user half maps: owned leaf frames and the
    /// lower-half page-table frames themselves.
    pub fn teardown(&self) {
        assert!(!self.is_kernel_base, "attempted to tear down the kernel base address space");
        assert!(!self.is_active(), "attempted to tear down the active address space");

        let memory = MEMORY.get().unwrap();
        let mut physical_memory = memory.physical_memory.lock();

        let mut inner = self.inner.lock();
        for frame in inner.owned_frames.drain(..) {
            let _ = physical_memory.free_frame(frame, MemoryType::UsedByUserMode);
        }

        // Walk the lower half, freeing page-table frames bottom-up. Leaf
        // frames were either freed above or belong to a SharedRegion.
        let free_table = |physical_memory: &mut crate::memory::physical_memory::PhysicalMemory,
                          frame: PhysFrame<Size4KiB>| {
            let _ = physical_memory.free_frame(
                frame,
                MemoryType::UsedByKernel(KernelMemoryUsageType::PageTables),
            );
        };
        let l4 = unsafe { &mut *self.l4_frame.start_address().offset_mapped().as_mut_ptr::<PageTable>() };
        for l4_idx in 0..256 {
            let l4_entry = &mut l4[l4_idx];
            if l4_entry.is_unused() {
                continue;
            }
            let l3_frame = PhysFrame::containing_address(l4_entry.addr());
            let l3 = unsafe { &mut *l4_entry.addr().offset_mapped().as_mut_ptr::<PageTable>() };
            for l3_idx in 0..512 {
                let l3_entry = &mut l3[l3_idx];
                if l3_entry.is_unused() || l3_entry.flags().contains(PageTableFlags::HUGE_PAGE) {
                    continue;
                }
                let l2_frame = PhysFrame::containing_address(l3_entry.addr());
                let l2 = unsafe { &mut *l3_entry.addr().offset_mapped().as_mut_ptr::<PageTable>() };
                for l2_idx in 0..512 {
                    let l2_entry = &mut l2[l2_idx];
                    if l2_entry.is_unused() || l2_entry.flags().contains(PageTableFlags::HUGE_PAGE)
                    {
                        continue;
                    }
                    free_table(
                        &mut physical_memory,
                        PhysFrame::containing_address(l2_entry.addr()),
                    );
                }
                free_table(&mut physical_memory, l2_frame);
            }
            free_table(&mut physical_memory, l3_frame);
            l4_entry.set_unused();
        }
        free_table(&mut physical_memory, self.l4_frame);
    }
}

/// A physically-backed region shared between exactly two services. The
/// frames outlive the shorter-lived holder: each TCB keeps an `Arc` and the
/// last drop returns the frames to the allocator.
#[derive(Debug)]
pub struct SharedRegion {
    frames: Vec<PhysFrame<Size4KiB>>,
}

impl SharedRegion {
    /// Allocate `size` bytes rounded up to a page, zeroed.
    pub fn allocate(size: u64) -> Option<Arc<Self>> {
        let n_pages = size.div_ceil(FRAME_SIZE);
        let memory = MEMORY.get().unwrap();
        let mut physical_memory = memory.physical_memory.lock();
        let mut frames = Vec::with_capacity(n_pages as usize);
        for _ in 0..n_pages {
            let frame = physical_memory.allocate_frame_with_type(MemoryType::SharedBuffer)?;
            unsafe {
                core::ptr::write_bytes(
                    frame.start_address().offset_mapped().as_mut_ptr::<u8>(),
                    0,
                    FRAME_SIZE as usize,
                );
            }
            frames.push(frame);
        }
        Some(Arc::new(Self { frames }))
    }

    pub fn frames(&self) -> &[PhysFrame<Size4KiB>] {
        &self.frames
    }

    pub fn n_pages(&self) -> u64 {
        self.frames.len() as u64
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        let memory = MEMORY.get().unwrap();
        let mut physical_memory = memory.physical_memory.lock();
        for frame in self.frames.drain(..) {
            let _ = physical_memory.free_frame(frame, MemoryType::SharedBuffer);
        }
    }
}

/// Frames covering an arbitrary physical range (the framebuffer), for
/// `map_range_exact`.
pub fn frames_covering(start: PhysAddr, size: u64) -> Vec<PhysFrame<Size4KiB>> {
    let first = PhysFrame::containing_address(start);
    let n = (start.as_u64() + size).div_ceil(FRAME_SIZE) - first.start_address().as_u64() / FRAME_SIZE;
    (0..n).map(|i| first + i).collect()
}
