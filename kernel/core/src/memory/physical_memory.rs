use crate::memory::global_allocator;
use crate::memory::hhdm_offset::hhdm_offset;
use limine::memory_map::EntryType;
use limine::response::MemoryMapResponse;
use nodit::{Interval, NoditMap};
use x86_64::structures::paging::{FrameAllocator, PhysFrame, Size4KiB};
use x86_64::{PhysAddr, VirtAddr};

pub const FRAME_SIZE: u64 = 4096;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum KernelMemoryUsageType {
    PageTables,
    GlobalAllocatorHeap,
    Stack,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MemoryType {
    Usable,
    UsedByLimine,
    UsedByKernel(KernelMemoryUsageType),
    UsedByUserMode,
    /// Frames jointly owned by two AMC services; released when the last
    /// holder goes away.
    SharedBuffer,
}

#[derive(Debug)]
pub enum FreeError {
    /// The frame was not found in the memory map
    FrameNotAllocated,

    /// The frame exists but has a different MemoryType
    WrongMemoryType {
        expected: MemoryType,
        found: MemoryType,
    },
}

#[derive(Debug)]
pub struct PhysicalMemory {
    /// A map of physical memory and what it is currently used for
    map: NoditMap<u64, Interval<u64>, MemoryType>,
}

impl PhysicalMemory {
    pub(super) fn new(
        memory_map: &'static MemoryMapResponse,
        global_allocator_start: PhysAddr,
    ) -> Self {
        Self {
            map: {
                let mut map = NoditMap::default();
                // Start from the state when Limine booted
                for entry in memory_map.entries() {
                    let should_insert = match entry.entry_type {
                        EntryType::USABLE => Some(MemoryType::Usable),
                        EntryType::BOOTLOADER_RECLAIMABLE => Some(MemoryType::UsedByLimine),
                        // Other entry types might overlap, so don't add them
                        _ => None,
                    };
                    if let Some(memory_type) = should_insert {
                        map.insert_merge_touching_if_values_equal(
                            (entry.base..entry.base + entry.length).into(),
                            memory_type,
                        )
                        .unwrap();
                    }
                }
                // Track the memory claimed by the global allocator
                let interval = Interval::from(
                    global_allocator_start.as_u64()
                        ..global_allocator_start.as_u64()
                            + global_allocator::GLOBAL_ALLOCATOR_SIZE,
                );
                let _ = map.cut(&interval);
                map.insert_merge_touching_if_values_equal(
                    interval,
                    MemoryType::UsedByKernel(KernelMemoryUsageType::GlobalAllocatorHeap),
                )
                .unwrap();
                map
            },
        }
    }

    /// Allocate one 4 KiB frame and mark it with the given type.
    pub fn allocate_frame_with_type(
        &mut self,
        memory_type: MemoryType,
    ) -> Option<PhysFrame<Size4KiB>> {
        let aligned_start = self.map.iter().find_map(|(interval, found_type)| {
            if let MemoryType::Usable = found_type {
                let aligned_start = (*interval.start()).next_multiple_of(FRAME_SIZE);
                if aligned_start + FRAME_SIZE <= *interval.end() {
                    Some(aligned_start)
                } else {
                    None
                }
            } else {
                None
            }
        })?;
        let range = aligned_start..aligned_start + FRAME_SIZE;
        let _ = self.map.cut(&Interval::from(range.clone()));
        self.map
            .insert_merge_touching_if_values_equal(range.into(), memory_type)
            .unwrap();
        Some(PhysFrame::from_start_address(PhysAddr::new(aligned_start)).unwrap())
    }

    pub fn free_frame(
        &mut self,
        frame: PhysFrame<Size4KiB>,
        expected: MemoryType,
    ) -> Result<(), FreeError> {
        let start = frame.start_address().as_u64();
        let end = start + FRAME_SIZE;

        let (_, found_type) = self
            .map
            .iter()
            .find(|(i, _)| *i.start() <= start && *i.end() >= end - 1)
            .ok_or(FreeError::FrameNotAllocated)?;

        if *found_type != expected {
            return Err(FreeError::WrongMemoryType {
                expected,
                found: *found_type,
            });
        }

        let _ = self.map.cut(&Interval::from(start..end));
        self.map
            .insert_merge_touching_if_values_equal(
                Interval::from(start..end),
                MemoryType::Usable,
            )
            .unwrap();
        Ok(())
    }

    pub fn get_kernel_frame_allocator(&mut self) -> PhysicalMemoryFrameAllocator<'_> {
        PhysicalMemoryFrameAllocator {
            physical_memory: self,
            memory_type: MemoryType::UsedByKernel(KernelMemoryUsageType::PageTables),
        }
    }

    pub fn get_user_mode_frame_allocator(&mut self) -> PhysicalMemoryFrameAllocator<'_> {
        PhysicalMemoryFrameAllocator {
            physical_memory: self,
            memory_type: MemoryType::UsedByUserMode,
        }
    }
}

pub struct PhysicalMemoryFrameAllocator<'a> {
    physical_memory: &'a mut PhysicalMemory,
    memory_type: MemoryType,
}

unsafe impl FrameAllocator<Size4KiB> for PhysicalMemoryFrameAllocator<'_> {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        let frame = self
            .physical_memory
            .allocate_frame_with_type(self.memory_type)?;
        // Page-table frames must be zeroed before the CPU walks them
        unsafe {
            core::ptr::write_bytes(
                frame.start_address().offset_mapped().as_mut_ptr::<u8>(),
                0,
                FRAME_SIZE as usize,
            );
        }
        Some(frame)
    }
}

pub trait OffsetMappedPhysAddr {
    fn offset_mapped(self) -> VirtAddr;
}

impl OffsetMappedPhysAddr for PhysAddr {
    fn offset_mapped(self) -> VirtAddr {
        VirtAddr::new(self.as_u64() + u64::from(hhdm_offset()))
    }
}
