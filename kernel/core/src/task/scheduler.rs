//! Task lifecycle and the per-CPU switch machinery around the MLFQ.

use crate::amc;
use crate::memory::address_space::AddressSpace;
use crate::memory::cpu_local_data::{CpuLocalData, get_local};
use crate::task::context::{context_switch, first_context_switch};
use crate::task::mlfq;
use crate::task::task::{ElfMetadata, Task, TaskEntry, TaskId, TaskStatus, UnblockReason};
use crate::time::{lapic_timer, ms_since_boot};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use kernel_api_types::amc::{AMC_SUPERVISED_PROCESS_EXIT, AmcSupervisedProcessExit};
use spin::Mutex;
use x86_64::instructions::interrupts;

/// Quantum handed to the idle task when nothing else is runnable.
const IDLE_QUANTUM_MS: u64 = 5;

pub static TASK_TABLE: Mutex<BTreeMap<TaskId, Arc<Task>>> = Mutex::new(BTreeMap::new());

/// Tasks blocked with a wake timestamp; drained by the timer tick.
static SLEEPERS: Mutex<Vec<Arc<Task>>> = Mutex::new(Vec::new());

fn track_task(task: &Arc<Task>) {
    let previous = TASK_TABLE.lock().insert(task.id, task.clone());
    assert!(previous.is_none(), "task with the same ID already exists");
}

fn make_schedulable(task: &Arc<Task>) {
    mlfq::add_task_to_queue(task.clone(), 0);
}

/// Spawn a task in a fresh address space cloned from this CPU's base.
pub fn task_spawn(name: &str, entry: TaskEntry) -> Arc<Task> {
    task_spawn_with_args(name, entry, (0, 0, 0))
}

pub fn task_spawn_with_args(name: &str, entry: TaskEntry, args: (u64, u64, u64)) -> Arc<Task> {
    let base = get_local().base_vas.get().unwrap();
    let vas = AddressSpace::clone_from(base);
    let task = Task::new(name, entry, args, vas, false);
    track_task(&task);
    make_schedulable(&task);
    log::info!("spawned task [{} {}]", task.id.to_u64(), name);
    task
}

/// Spawn a task whose exit is reported to the spawner's AMC service.
/// The supervisor learns the child's id before the child can run.
pub fn task_spawn_managed(name: &str, entry: TaskEntry, args: (u64, u64, u64)) -> Arc<Task> {
    let current = current_task();
    let parent_service = current
        .amc_service
        .lock()
        .clone()
        .expect("task_spawn_managed requires the spawner to have an AMC service");

    let base = get_local().base_vas.get().unwrap();
    let vas = AddressSpace::clone_from(base);
    let task = Task::new(name, entry, args, vas, false);
    *task.managed_by.lock() = Some(parent_service.clone());
    track_task(&task);
    amc::notify_supervisor_of_child(&parent_service, task.id.to_u64());
    make_schedulable(&task);
    task
}

/// Spawn a task sharing the current address space.
pub fn thread_spawn(entry: TaskEntry, arg1: u64, arg2: u64, arg3: u64) -> Arc<Task> {
    let vas = current_task().vas.clone();
    let task = Task::new("thread", entry, (arg1, arg2, arg3), vas, true);
    track_task(&task);
    make_schedulable(&task);
    task
}

/// Spawn a task at a raw entry address inside a prepared address space
/// (the ELF loader's path).
pub fn task_spawn_from_vas(
    name: &str,
    entry: u64,
    vas: Arc<AddressSpace>,
    elf: ElfMetadata,
) -> Arc<Task> {
    let task = Task::with_raw_entry(name, entry, (0, 0, 0), vas, false);
    *task.elf.lock() = Some(elf);
    track_task(&task);
    make_schedulable(&task);
    log::info!("spawned ELF task [{} {}] entry={entry:#x}", task.id.to_u64(), name);
    task
}

pub fn try_current_task() -> Option<Arc<Task>> {
    get_local().current_task.lock().clone()
}

pub fn current_task() -> Arc<Task> {
    try_current_task().expect("no current task on this CPU")
}

pub fn tasking_disable_scheduling() {
    get_local().scheduler_enabled.store(false, Ordering::Relaxed);
}

pub fn tasking_reenable_scheduling() {
    get_local().scheduler_enabled.store(true, Ordering::Relaxed);
}

/// Create this CPU's idle task and record the base address space new tasks
/// clone from. The idle task is deliberately kept out of the MLFQ.
pub fn init_cpu(base_vas: Arc<AddressSpace>) {
    let cpu = get_local();
    cpu.base_vas.call_once(|| base_vas.clone());
    cpu.idle_task.call_once(|| {
        let task = Task::new("idle", idle_task_entry, (0, 0, 0), base_vas.clone(), true);
        track_task(&task);
        task
    });
}

extern "sysv64" fn idle_task_entry(_: u64, _: u64, _: u64) -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Hand this CPU over to the scheduler; the boot stack is abandoned.
pub fn enter_scheduler() -> ! {
    interrupts::disable();
    let cpu = get_local();
    let (next, quantum) = mlfq::choose_task().unwrap_or_else(|| {
        let idle = cpu.idle_task.get().unwrap().clone();
        idle.is_currently_executing.store(true, Ordering::Release);
        (idle, IDLE_QUANTUM_MS)
    });

    let now = ms_since_boot();
    {
        let mut timeslice = next.timeslice.lock();
        timeslice.start_ms = now;
        timeslice.end_ms = now + quantum;
    }
    next.vas.load();
    unsafe { cpu.set_tss_rsp0(next.kernel_stack_top) };
    *cpu.current_task.lock() = Some(next.clone());
    lapic_timer::start(quantum);

    let next_sp = next.machine_state.load(Ordering::Acquire);
    drop(next);
    unsafe { first_context_switch(next_sp) }
}

/// Release the claim on the task this CPU most recently switched away
/// from. Runs as the first action of every freshly-resumed context; until
/// it does, other CPUs must not pick the outgoing task up (its saved state
/// is incomplete).
pub extern "C" fn finish_switch() {
    let cpu = get_local();
    if let Some(prev) = cpu.pending_release.lock().take() {
        prev.is_currently_executing.store(false, Ordering::Release);
    }
}

/// Preempt the current task and run the scheduler's pick (or idle).
pub fn task_switch() {
    interrupts::without_interrupts(task_switch_locked);
}

fn task_switch_locked() {
    let cpu = get_local();
    if !cpu.scheduler_enabled.load(Ordering::Relaxed) {
        log::trace!("skipping task switch: scheduler disabled");
        return;
    }

    lapic_timer::cancel();

    let prev = current_task();
    mlfq::prepare_for_switch_from_task(&prev);

    let (next, quantum) = mlfq::choose_task().unwrap_or_else(|| {
        let idle = cpu.idle_task.get().unwrap().clone();
        (idle, IDLE_QUANTUM_MS)
    });

    goto_task(cpu, prev, next, quantum);
}

/// Directly switch to a specific task for a specific quantum.
pub fn tasking_goto_task(task: Arc<Task>, quantum_ms: u64) {
    interrupts::without_interrupts(|| {
        let cpu = get_local();
        let prev = current_task();
        mlfq::prepare_for_switch_from_task(&prev);
        mlfq::stamp_schedule_start(&task);
        task.is_currently_executing.store(true, Ordering::Release);
        lapic_timer::cancel();
        goto_task(cpu, prev, task, quantum_ms);
    });
}

fn goto_task(cpu: &'static CpuLocalData, prev: Arc<Task>, next: Arc<Task>, quantum_ms: u64) {
    if Arc::ptr_eq(&prev, &next) {
        lapic_timer::start(quantum_ms);
        return;
    }

    let now = ms_since_boot();
    {
        let mut timeslice = next.timeslice.lock();
        timeslice.start_ms = now;
        timeslice.end_ms = now + quantum_ms;
    }

    if !next.vas.is_active() {
        next.vas.load();
    }
    unsafe { cpu.set_tss_rsp0(next.kernel_stack_top) };

    // The idle task is claimed here rather than by choose_task
    next.is_currently_executing.store(true, Ordering::Release);
    *cpu.pending_release.lock() = Some(prev.clone());
    *cpu.current_task.lock() = Some(next.clone());

    lapic_timer::start(quantum_ms);

    let prev_sp_ptr = prev.machine_state.as_ptr();
    let next_sp = next.machine_state.load(Ordering::Acquire);
    drop(next);
    unsafe { context_switch(prev_sp_ptr, next_sp) };
    // We are back on `prev`'s stack: some CPU rescheduled us. Release
    // whatever task that CPU switched away from.
    finish_switch();
}

/// The scheduler heartbeat, run from the APIC timer (and reschedule IPIs).
pub fn timer_tick() {
    wake_due_sleepers();
    mlfq::priority_boost_if_necessary();

    let cpu = get_local();
    if !cpu.scheduler_enabled.load(Ordering::Relaxed) {
        // No preemption while disabled, but keep the heartbeat alive so
        // re-enabling does not strand the CPU without a pending tick
        lapic_timer::start(IDLE_QUANTUM_MS);
        return;
    }
    let Some(current) = try_current_task() else {
        lapic_timer::start(IDLE_QUANTUM_MS);
        return;
    };
    if ms_since_boot() >= current.timeslice.lock().end_ms {
        task_switch();
    } else {
        // Spurious wake (IPI); re-arm for the remainder
        let remaining = current.timeslice.lock().end_ms.saturating_sub(ms_since_boot());
        lapic_timer::start(remaining.max(1));
    }
}

fn wake_due_sleepers() {
    let now = ms_since_boot();
    let mut sleepers = SLEEPERS.lock();
    sleepers.retain(|task| {
        if task.status.load(Ordering::Acquire) != TaskStatus::AmcAwaitMessage {
            // A message arrived first and unblocked the task
            return false;
        }
        let wake_at_ms = task.blocked.lock().wake_at_ms;
        match wake_at_ms {
            None => false,
            Some(wake_at) if wake_at <= now => {
                tasking_unblock_task_with_reason(task, UnblockReason::AmcAwaitTimestamp);
                false
            }
            Some(_) => true,
        }
    });
}

/// Record blocked state without switching; the caller decides when to
/// yield. Lets callers close check-then-block races by re-checking their
/// wake condition after the status is visible.
pub fn tasking_park_task(task: &Arc<Task>, status: TaskStatus, wake_at_ms: Option<u64>) {
    interrupts::without_interrupts(|| {
        {
            let mut blocked = task.blocked.lock();
            blocked.wake_at_ms = wake_at_ms;
            blocked.unblock_reason = UnblockReason::None;
        }
        task.status.store(status, Ordering::Release);
        if wake_at_ms.is_some() {
            SLEEPERS.lock().push(task.clone());
        }
    });
}

/// Park `task` in the given blocked status. Blocking the current task
/// switches away immediately; the call returns once the task is unblocked
/// and rescheduled.
pub fn tasking_block_task(task: &Arc<Task>, status: TaskStatus, wake_at_ms: Option<u64>) {
    tasking_park_task(task, status, wake_at_ms);
    if try_current_task().is_some_and(|current| current.id == task.id) {
        task_switch();
    }
}

pub fn tasking_unblock_task_with_reason(task: &Arc<Task>, reason: UnblockReason) {
    interrupts::without_interrupts(|| {
        {
            let mut blocked = task.blocked.lock();
            blocked.wake_at_ms = None;
            blocked.unblock_reason = reason;
        }
        task.status.store(TaskStatus::Runnable, Ordering::Release);
    });
}

/// Terminate the calling task: tell its supervisor, hand the TCB to the
/// reaper, and only then flip to `Zombie`. Even a preempt between the send
/// and the store still ends in cleanup.
pub fn task_die(exit_code: u64) -> ! {
    let current = current_task();
    log::info!(
        "[{} {}] self-terminated with exit {exit_code}; zombie",
        current.id.to_u64(),
        current.name.lock()
    );

    if let Some(supervisor) = current.managed_by.lock().clone() {
        let msg = AmcSupervisedProcessExit {
            event: AMC_SUPERVISED_PROCESS_EXIT,
            pid: current.id.to_u64(),
            exit_code,
        };
        amc::message_send_from_core(&supervisor, amc::struct_as_bytes(&msg));
    }

    let tcb_ptr = Arc::into_raw(current.clone()) as u64;
    amc::message_send_from_core(
        kernel_api_types::amc::REAPER_SERVICE_NAME,
        &tcb_ptr.to_le_bytes(),
    );
    current.status.store(TaskStatus::Zombie, Ordering::Release);
    task_switch();
    panic!("zombie task was scheduled again");
}

/// Tear a zombie's resources down. Reaper-only.
pub(crate) fn destroy_task(task: Arc<Task>) {
    // The dying task enqueues its TCB pointer before flipping to Zombie,
    // and its final timeslice ends a moment later still; wait out both
    // windows before touching its stack.
    while task.status.load(Ordering::Acquire) != TaskStatus::Zombie
        || task.is_currently_executing.load(Ordering::Acquire)
    {
        task_switch();
    }
    assert!(
        task.status.load(Ordering::Acquire) == TaskStatus::Zombie,
        "reaper was handed a non-zombie task"
    );

    mlfq::delete_task(&task);
    interrupts::without_interrupts(|| SLEEPERS.lock().retain(|t| t.id != task.id));
    amc::teardown_service_for_task(&task);
    task.free_kernel_stack();
    // Symbol/string table copies are dropped with the TCB below
    if !task.is_thread {
        task.vas.teardown();
    }
    task.shared_regions.lock().clear();
    TASK_TABLE.lock().remove(&task.id);

    log::info!(
        "reaper freed corpse [{} {}]",
        task.id.to_u64(),
        task.name.lock()
    );
}
