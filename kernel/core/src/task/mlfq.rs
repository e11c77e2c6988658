//! The multi-level feedback queue.
//!
//! Four round-robin queues with growing quanta. Tasks enter at the top,
//! are demoted as they exhaust their time-to-live, and are periodically
//! boosted back so starved CPU-bound tasks keep making progress.

use crate::task::task::{Task, TaskStatus};
use crate::time::ms_since_boot;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::{Lazy, Mutex};
use x86_64::instructions::interrupts;

pub const QUEUE_COUNT: usize = 4;
pub const QUEUE_QUANTUMS_MS: [u64; QUEUE_COUNT] = [10, 20, 30, 40];
const BOOST_INTERVAL_MS: u64 = 1000;

struct MlfqEntry {
    task: Arc<Task>,
    last_schedule_start: u64,
    ttl_remaining: i64,
}

struct MlfqQueue {
    quantum: u64,
    round_robin_tasks: Mutex<VecDeque<MlfqEntry>>,
}

static QUEUES: Lazy<[MlfqQueue; QUEUE_COUNT]> = Lazy::new(|| {
    QUEUE_QUANTUMS_MS.map(|quantum| {
        log::info!("MLFQ queue quantum = {quantum}ms");
        MlfqQueue {
            quantum,
            round_robin_tasks: Mutex::new(VecDeque::new()),
        }
    })
});

/// Serialises task selection across CPUs so two cores cannot claim the same
/// entry.
static CHOOSE_TASK_LOCK: Mutex<()> = Mutex::new(());

static LAST_BOOST_MS: AtomicU64 = AtomicU64::new(0);

/// Enqueue at the given priority with that queue's full quantum. Everything
/// except demotion enqueues at queue 0.
pub fn add_task_to_queue(task: Arc<Task>, queue_idx: usize) {
    assert!(queue_idx < QUEUE_COUNT, "invalid queue provided");
    // Queue locks are taken from the scheduler tick; interrupts must be
    // off while any of them is held
    interrupts::without_interrupts(|| {
        let queue = &QUEUES[queue_idx];
        queue.round_robin_tasks.lock().push_back(MlfqEntry {
            task,
            last_schedule_start: 0,
            ttl_remaining: queue.quantum as i64,
        });
    });
}

/// Scan from the highest-priority queue down for a runnable task that no
/// CPU is executing. The chosen entry is stamped with the current time and
/// claimed for the calling CPU. Returns the task and its remaining quantum,
/// or `None` when nothing is runnable (the caller falls back to idle).
pub fn choose_task() -> Option<(Arc<Task>, u64)> {
    interrupts::without_interrupts(choose_task_locked)
}

fn choose_task_locked() -> Option<(Arc<Task>, u64)> {
    let _guard = CHOOSE_TASK_LOCK.lock();
    for queue in QUEUES.iter() {
        let mut tasks = queue.round_robin_tasks.lock();
        for ent in tasks.iter_mut() {
            if ent.task.status.load(Ordering::Acquire) == TaskStatus::Runnable
                && !ent.task.is_currently_executing.load(Ordering::Acquire)
            {
                // Claim before any lock is released; another CPU scanning
                // right behind us must skip this entry.
                ent.task.is_currently_executing.store(true, Ordering::Release);
                ent.last_schedule_start = ms_since_boot();
                return Some((ent.task.clone(), ent.ttl_remaining.max(1) as u64));
            }
        }
    }
    None
}

/// Stamp a task's schedule-start without going through selection; the
/// direct-switch path uses this so the next TTL charge is fair.
pub fn stamp_schedule_start(task: &Arc<Task>) {
    interrupts::without_interrupts(|| {
        for queue in QUEUES.iter() {
            let mut tasks = queue.round_robin_tasks.lock();
            if let Some(ent) = tasks.iter_mut().find(|ent| ent.task.id == task.id) {
                ent.last_schedule_start = ms_since_boot();
                return;
            }
        }
    });
}

/// Charge the outgoing task for its runtime. On TTL exhaustion the task is
/// re-queued: at the tail of the lowest queue with a fresh quantum if it is
/// already there, otherwise demoted one queue down.
pub fn prepare_for_switch_from_task(task: &Arc<Task>) -> bool {
    interrupts::without_interrupts(|| prepare_for_switch_locked(task))
}

fn prepare_for_switch_locked(task: &Arc<Task>) -> bool {
    let Some((queue_idx, ent_idx)) = find_task(task) else {
        return false;
    };

    let queue = &QUEUES[queue_idx];
    let mut tasks = queue.round_robin_tasks.lock();
    // The entry may have moved while we looked it up (boost on another CPU)
    let Some(pos) = tasks.iter().position(|ent| ent.task.id == task.id) else {
        return false;
    };
    let _ = ent_idx;

    let runtime = ms_since_boot().saturating_sub(tasks[pos].last_schedule_start);
    let ttl_remaining = tasks[pos].ttl_remaining - runtime as i64;
    if ttl_remaining <= 0 {
        let mut ent = tasks.remove(pos).unwrap();
        if queue_idx == QUEUE_COUNT - 1 {
            // Already on the lowest queue; replenish and go to the back
            ent.ttl_remaining = queue.quantum as i64;
            tasks.push_back(ent);
        } else {
            drop(tasks);
            let lower = &QUEUES[queue_idx + 1];
            ent.ttl_remaining = lower.quantum as i64;
            lower.round_robin_tasks.lock().push_back(ent);
        }
    } else {
        tasks[pos].ttl_remaining = ttl_remaining;
    }
    true
}

/// Roughly once a second, move everything in Q1..Q3 back to Q0 with a full
/// quantum so starved low-priority tasks eventually run. Called on every
/// scheduler tick.
pub fn priority_boost_if_necessary() -> bool {
    let now = ms_since_boot();
    let last = LAST_BOOST_MS.load(Ordering::Relaxed);
    if now.saturating_sub(last) < BOOST_INTERVAL_MS {
        return false;
    }
    if LAST_BOOST_MS
        .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
        .is_err()
    {
        // Another CPU is boosting this period
        return false;
    }

    let high_prio = &QUEUES[0];
    let mut boosted = 0usize;
    interrupts::without_interrupts(|| {
        for queue in QUEUES[1..].iter() {
            let mut tasks = queue.round_robin_tasks.lock();
            while let Some(mut ent) = tasks.pop_front() {
                ent.ttl_remaining = high_prio.quantum as i64;
                high_prio.round_robin_tasks.lock().push_back(ent);
                boosted += 1;
            }
        }
    });
    if boosted > 0 {
        log::trace!("MLFQ priority boost moved {boosted} tasks to Q0");
    }
    true
}

/// Remove the task from whichever queue holds it (a linear scan; the TCB
/// does not record its queue).
pub fn delete_task(task: &Arc<Task>) {
    let found = interrupts::without_interrupts(|| {
        let Some((queue_idx, _)) = find_task(task) else {
            return false;
        };
        let mut tasks = QUEUES[queue_idx].round_robin_tasks.lock();
        if let Some(pos) = tasks.iter().position(|ent| ent.task.id == task.id) {
            tasks.remove(pos);
        }
        true
    });
    if !found {
        log::warn!(
            "mlfq delete_task: task [{} {}] not found in any queue",
            task.id.to_u64(),
            task.name.lock()
        );
    }
}

fn find_task(task: &Arc<Task>) -> Option<(usize, usize)> {
    for (queue_idx, queue) in QUEUES.iter().enumerate() {
        let tasks = queue.round_robin_tasks.lock();
        if let Some(ent_idx) = tasks.iter().position(|ent| ent.task.id == task.id) {
            return Some((queue_idx, ent_idx));
        }
    }
    None
}

/// Queue index currently holding the task, for introspection and tests.
pub fn queue_of_task(task: &Arc<Task>) -> Option<usize> {
    interrupts::without_interrupts(|| find_task(task).map(|(queue_idx, _)| queue_idx))
}

/// Remaining TTL of the task's current entry, for introspection and tests.
pub fn ttl_of_task(task: &Arc<Task>) -> Option<i64> {
    interrupts::without_interrupts(|| {
        let (queue_idx, _) = find_task(task)?;
        let tasks = QUEUES[queue_idx].round_robin_tasks.lock();
        tasks
            .iter()
            .find(|ent| ent.task.id == task.id)
            .map(|ent| ent.ttl_remaining)
    })
}

/// Dump queue contents at trace level.
pub fn log_queues() {
    interrupts::without_interrupts(|| {
        for (queue_idx, queue) in QUEUES.iter().enumerate() {
            let tasks = queue.round_robin_tasks.lock();
            if tasks.is_empty() {
                continue;
            }
            for ent in tasks.iter() {
                let status = match ent.task.status.load(Ordering::Relaxed) {
                    TaskStatus::Runnable => "run",
                    TaskStatus::AmcAwaitMessage => "amc",
                    TaskStatus::IrqWait => "irq",
                    TaskStatus::Zombie => "zombie",
                };
                log::trace!(
                    "  Q{queue_idx}: [{} {}] {status} ttl={}",
                    ent.task.id.to_u64(),
                    ent.task.name.lock(),
                    ent.ttl_remaining
                );
            }
        }
    });
}
