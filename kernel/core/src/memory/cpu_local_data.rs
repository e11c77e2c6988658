use crate::gdt::Gdt;
use crate::limine_requests::MP_REQUEST;
use crate::memory::address_space::AddressSpace;
use crate::task::task::Task;
use alloc::boxed::Box;
use alloc::sync::Arc;
use atomic_enum::atomic_enum;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};
use force_send_sync::SendSync;
use limine::mp::Cpu;
use limine::response::MpResponse;
use spin::{Lazy, Mutex, Once};
use x2apic::lapic::LocalApic;
use x86_64::VirtAddr;
use x86_64::registers::model_specific::{GsBase, KernelGsBase};
use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::structures::tss::TaskStateSegment;

#[atomic_enum]
#[derive(PartialEq)]
pub enum CpuState {
    /// Hardware init in progress (GDT/IDT/APIC not all done yet).
    Initializing,
    /// Fully initialized. Tasks may be dispatched to this CPU.
    Ready,
    /// This CPU has panicked and should be ignored by the scheduler.
    Crashed,
}

pub struct CpuLocalData {
    pub kernel_id: u32,
    pub local_apic_id: u32,

    pub tss: Once<UnsafeCell<TaskStateSegment>>,
    pub gdt: Once<Gdt>,
    pub idt: Once<InterruptDescriptorTable>,

    pub local_apic: Once<UnsafeCell<SendSync<LocalApic>>>,

    /// The task executing on this CPU right now. Exactly one task per CPU
    /// has `is_currently_executing` set, and it is this one.
    pub current_task: Mutex<Option<Arc<Task>>>,
    /// Fallback when the MLFQ has nothing runnable.
    pub idle_task: Once<Arc<Task>>,
    /// Cleared by `tasking_disable_scheduling`; while false, quantum expiry
    /// does not preempt.
    pub scheduler_enabled: AtomicBool,
    /// The address space new tasks are cloned from.
    pub base_vas: Once<Arc<AddressSpace>>,
    /// The task we most recently switched away from; its
    /// `is_currently_executing` claim is released by `finish_switch` once
    /// its saved state is complete.
    pub pending_release: Mutex<Option<Arc<Task>>>,

    /// Lifecycle state guarding task dispatch and crash handling.
    pub state: AtomicCpuState,
}

impl CpuLocalData {
    /// Update TSS.RSP0 so ring-3 interrupt entries land on the new task's
    /// kernel stack.
    ///
    /// # Safety
    /// Must only be called with interrupts disabled (from the scheduler).
    pub unsafe fn set_tss_rsp0(&self, rsp0: u64) {
        let tss = unsafe { &mut *self.tss.get().unwrap().get() };
        tss.privilege_stack_table[0] = VirtAddr::new(rsp0);
    }
}

// Safety:
// - Per-CPU data
// - Accessed only via GS base
// - No cross-CPU access to the non-Sync parts
unsafe impl Sync for CpuLocalData {}

fn mp_response() -> &'static MpResponse {
    MP_REQUEST.get_response().expect("expected MP response")
}

static CPU_LOCAL_DATA: Lazy<Box<[Once<CpuLocalData>]>> =
    Lazy::new(|| mp_response().cpus().iter().map(|_| Once::new()).collect());

fn write_gs_base(ptr: &'static CpuLocalData) {
    let vaddr = VirtAddr::from_ptr(ptr);
    unsafe {
        // GS.Base = kernel ptr — used immediately by get_local() in kernel mode.
        // KernelGsBase mirrors it so a stray swapgs still lands on valid data.
        GsBase::write(vaddr);
        KernelGsBase::write(vaddr);
    }
}

/// Initializes the item in `CPU_LOCAL_DATA` and GS.Base
fn init_cpu(kernel_id: u32, local_apic_id: u32) {
    write_gs_base(CPU_LOCAL_DATA[kernel_id as usize].call_once(|| CpuLocalData {
        kernel_id,
        local_apic_id,
        tss: Once::new(),
        gdt: Once::new(),
        idt: Once::new(),
        local_apic: Once::new(),
        current_task: Mutex::new(None),
        idle_task: Once::new(),
        scheduler_enabled: AtomicBool::new(true),
        base_vas: Once::new(),
        pending_release: Mutex::new(None),
        state: AtomicCpuState::new(CpuState::Initializing),
    }))
}

pub fn cpus_count() -> usize {
    mp_response().cpus().len()
}

pub fn local_apic_id_of(kernel_assigned_id: u32) -> u32 {
    CPU_LOCAL_DATA[kernel_assigned_id as usize]
        .get()
        .unwrap()
        .local_apic_id
}

pub fn try_get_local() -> Option<&'static CpuLocalData> {
    let ptr = NonNull::new(GsBase::read().as_mut_ptr::<CpuLocalData>())?;
    // Safety: we only wrote to GsBase using `write_gs_base`, which ensures
    // that the pointer is `&'static CpuLocalData`
    unsafe { Some(ptr.as_ref()) }
}

pub fn get_local() -> &'static CpuLocalData {
    try_get_local().unwrap()
}

pub fn get_cpu(id: u32) -> &'static CpuLocalData {
    CPU_LOCAL_DATA[id as usize].get().unwrap()
}

/// Mark the current CPU as fully initialized and ready to accept tasks.
pub fn mark_current_cpu_ready() {
    get_local().state.store(CpuState::Ready, Ordering::Release);
}

/// Mark the current CPU as crashed so the scheduler stops dispatching to it.
pub fn mark_current_cpu_crashed() {
    if let Some(cpu) = try_get_local() {
        cpu.state.store(CpuState::Crashed, Ordering::Release);
    }
}

/// Initialize CPU local data for the BSP
///
/// # Safety
/// Must be called once on the BSP before `get_local`.
pub unsafe fn init_bsp() {
    // Always assign 0 to BSP
    init_cpu(0, mp_response().bsp_lapic_id())
}

/// # Safety
/// Must be called once per AP before `get_local` on that AP.
pub unsafe fn init_ap(cpu: &Cpu) {
    let local_apic_id = cpu.lapic_id;
    init_cpu(
        // Get the position within the array (0 is BSP)
        mp_response()
            .cpus()
            .iter()
            .filter(|cpu| cpu.lapic_id != mp_response().bsp_lapic_id())
            .position(|cpu| cpu.lapic_id == local_apic_id)
            .expect("CPUs array should contain this AP") as u32
            + 1,
        local_apic_id,
    )
}
