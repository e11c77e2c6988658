use crate::memory::address_space::{AddressSpace, SharedRegion};
use crate::memory::cpu_local_data::get_local;
use crate::memory::guarded_stack::{GuardedStack, NORMAL_STACK_SIZE, StackId, StackType};
use crate::task::context::task_bootstrap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use atomic_enum::atomic_enum;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }
}

#[atomic_enum]
#[derive(PartialEq)]
pub enum TaskStatus {
    Runnable,
    /// Parked in `amc_message_await*` (possibly with a wake timestamp).
    AmcAwaitMessage,
    /// Parked until a device interrupt produces work (input forwarder).
    IrqWait,
    /// Finished executing; waiting for the reaper to free its resources.
    Zombie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnblockReason {
    None,
    AmcMessageDelivered,
    /// The wake timestamp passed before any message arrived.
    AmcAwaitTimestamp,
    /// A device interrupt queued work for the task.
    IrqReady,
}

#[derive(Debug)]
pub struct BlockedState {
    pub wake_at_ms: Option<u64>,
    pub unblock_reason: UnblockReason,
}

#[derive(Debug, Default)]
pub struct Timeslice {
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Extra state carried by tasks loaded from an ELF image.
#[derive(Debug)]
pub struct ElfMetadata {
    pub bss_start: u64,
    pub program_break: u64,
    /// Raw .symtab / .strtab copies kept for crash symbolication.
    pub symbol_table: Option<Vec<u8>>,
    pub string_table: Option<Vec<u8>>,
}

pub type TaskEntry = extern "sysv64" fn(u64, u64, u64) -> !;

pub struct Task {
    pub id: TaskId,
    pub name: Mutex<String>,
    pub status: AtomicTaskStatus,
    pub blocked: Mutex<BlockedState>,
    /// Set while a CPU is running (or has claimed) this task; exactly one
    /// task per CPU has it set.
    pub is_currently_executing: AtomicBool,
    pub timeslice: Mutex<Timeslice>,
    /// Threads share their spawner's address space and must not tear it
    /// down on death.
    pub is_thread: bool,
    pub vas: Arc<AddressSpace>,
    /// Saved kernel stack pointer while the task is switched out. The
    /// callee-saved registers live at the top of the pointed-to stack.
    pub machine_state: AtomicU64,
    kernel_stack: Mutex<Option<GuardedStack>>,
    pub kernel_stack_top: u64,
    /// Service name of the supervisor to inform on exit, if any.
    pub managed_by: Mutex<Option<String>>,
    pub elf: Mutex<Option<ElfMetadata>>,
    /// AMC service registered by this task, set by `amc::register_service`.
    pub amc_service: Mutex<Option<String>>,
    /// Keeps jointly-owned shared-memory regions alive while this task is.
    pub shared_regions: Mutex<Vec<Arc<SharedRegion>>>,
}

impl Task {
    /// Build a TCB with a fresh kernel stack staged so the first switch
    /// lands in the bootstrap trampoline, which jumps to
    /// `entry(arg1, arg2, arg3)`.
    ///
    /// Stack top-down at creation: arg3, arg2, arg1, entry, alignment slot,
    /// the trampoline's address, six zeroed callee-saved registers, and the
    /// initial RFLAGS.
    pub fn new(
        name: &str,
        entry: TaskEntry,
        args: (u64, u64, u64),
        vas: Arc<AddressSpace>,
        is_thread: bool,
    ) -> Arc<Self> {
        Self::with_raw_entry(name, entry as usize as u64, args, vas, is_thread)
    }

    /// Same as [`Task::new`] but for entry points that are not Rust
    /// functions (ELF images loaded into a fresh address space).
    pub fn with_raw_entry(
        name: &str,
        entry: u64,
        args: (u64, u64, u64),
        vas: Arc<AddressSpace>,
        is_thread: bool,
    ) -> Arc<Self> {
        let kernel_stack = GuardedStack::new_kernel(
            NORMAL_STACK_SIZE,
            StackId {
                _type: StackType::Normal,
                cpu_id: get_local().kernel_id,
            },
        );
        let top = kernel_stack.top().as_u64();

        // Interrupts stay off until the bootstrap trampoline has released
        // the outgoing task; the trampoline runs `sti` itself
        let initial_rflags: u64 = 0x2;
        let values = [
            initial_rflags,
            0, // r15
            0, // r14
            0, // r13
            0, // r12
            0, // rbx
            0, // rbp
            task_bootstrap as usize as u64,
            0, // alignment
            entry,
            args.0,
            args.1,
            args.2,
        ];
        let machine_state = top - (values.len() as u64 * 8);
        unsafe {
            let mut slot = machine_state as *mut u64;
            for value in values {
                slot.write(value);
                slot = slot.add(1);
            }
        }

        Arc::new(Self {
            id: TaskId::new(),
            name: Mutex::new(String::from(name)),
            status: AtomicTaskStatus::new(TaskStatus::Runnable),
            blocked: Mutex::new(BlockedState {
                wake_at_ms: None,
                unblock_reason: UnblockReason::None,
            }),
            is_currently_executing: AtomicBool::new(false),
            timeslice: Mutex::new(Timeslice::default()),
            is_thread,
            vas,
            machine_state: AtomicU64::new(machine_state),
            kernel_stack: Mutex::new(Some(kernel_stack)),
            kernel_stack_top: top,
            managed_by: Mutex::new(None),
            elf: Mutex::new(None),
            amc_service: Mutex::new(None),
            shared_regions: Mutex::new(Vec::new()),
        })
    }

    pub fn set_name(&self, new_name: &str) {
        *self.name.lock() = String::from(new_name);
    }

    /// Release the kernel stack. Reaper-only; must never run on the stack
    /// being freed.
    pub(crate) fn free_kernel_stack(&self) {
        *self.kernel_stack.lock() = None;
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &*self.name.lock())
            .field("status", &self.status.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
