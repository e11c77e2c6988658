//! Load a Limine module as an ELF image into a fresh address space and
//! spawn a task at its entry point.

use crate::limine_requests::MODULE_REQUEST;
use crate::memory::address_space::AddressSpace;
use crate::memory::cpu_local_data::get_local;
use crate::memory::physical_memory::FRAME_SIZE;
use crate::task::scheduler;
use crate::task::task::{ElfMetadata, Task};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ffi::CStr;
use elf::ElfBytes;
use elf::abi::PT_LOAD;
use elf::endian::LittleEndian;
use x86_64::VirtAddr;

fn module_bytes(path: &CStr) -> Option<&'static [u8]> {
    let response = MODULE_REQUEST.get_response()?;
    response
        .modules()
        .iter()
        .find(|module| module.path().to_bytes() == path.to_bytes())
        .map(|module| unsafe { core::slice::from_raw_parts(module.addr(), module.size() as usize) })
}

/// Map and copy every PT_LOAD segment, zero the bss tail, record the
/// program break, and make the resulting task schedulable.
pub fn spawn_from_module(task_name: &str, path: &CStr) -> Arc<Task> {
    let data = module_bytes(path)
        .unwrap_or_else(|| panic!("boot module {path:?} missing"));
    let elf = ElfBytes::<LittleEndian>::minimal_parse(data)
        .unwrap_or_else(|err| panic!("boot module {path:?} is not a valid ELF: {err}"));

    let base = get_local().base_vas.get().unwrap();
    let vas = AddressSpace::clone_from(base);

    let mut bss_start = 0u64;
    let mut highest_mapped = 0u64;
    let segments = elf.segments().expect("ELF has no segment table");
    for ph in segments {
        if ph.p_type != PT_LOAD || ph.p_memsz == 0 {
            continue;
        }
        let seg_start = ph.p_vaddr & !(FRAME_SIZE - 1);
        let seg_end = (ph.p_vaddr + ph.p_memsz).next_multiple_of(FRAME_SIZE);
        let n_pages = (seg_end - seg_start) / FRAME_SIZE;
        vas.map_zeroed_range_exact(VirtAddr::new(seg_start), n_pages)
            .expect("failed to map ELF segment");

        let file_data = elf.segment_data(&ph).expect("segment data out of bounds");
        vas.write_bytes(VirtAddr::new(ph.p_vaddr), &file_data[..ph.p_filesz as usize])
            .expect("failed to copy ELF segment");

        if ph.p_memsz > ph.p_filesz && bss_start == 0 {
            bss_start = ph.p_vaddr + ph.p_filesz;
        }
        highest_mapped = highest_mapped.max(seg_end);
    }

    // Keep symbol/string table copies on the kernel heap for panic
    // symbolication; the module memory itself is bootloader-reclaimable.
    let symbol_table = elf
        .section_header_by_name(".symtab")
        .ok()
        .flatten()
        .and_then(|sh| elf.section_data(&sh).ok())
        .map(|(bytes, _)| Vec::from(bytes));
    let string_table = elf
        .section_header_by_name(".strtab")
        .ok()
        .flatten()
        .and_then(|sh| elf.section_data(&sh).ok())
        .map(|(bytes, _)| Vec::from(bytes));

    let metadata = ElfMetadata {
        bss_start,
        program_break: highest_mapped,
        symbol_table,
        string_table,
    };

    scheduler::task_spawn_from_vas(task_name, elf.ehdr.e_entry, vas, metadata)
}
