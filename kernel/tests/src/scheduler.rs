use crate::{TestResult, spin_for_ms, wait_for};
use alloc::format;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use kernel::task::mlfq;
use kernel::task::scheduler::{task_die, task_spawn};
use kernel::task::task::TaskStatus;

static COUNTER_A: AtomicU64 = AtomicU64::new(0);
static COUNTER_B: AtomicU64 = AtomicU64::new(0);

extern "sysv64" fn increment_a(_: u64, _: u64, _: u64) -> ! {
    COUNTER_A.fetch_add(1, Ordering::SeqCst);
    task_die(0)
}

extern "sysv64" fn increment_b(_: u64, _: u64, _: u64) -> ! {
    COUNTER_B.fetch_add(1, Ordering::SeqCst);
    task_die(0)
}

pub fn simple_task_creation() -> TestResult {
    // Hold preemption off so the new task cannot run (and be charged)
    // before the assertions read its queue state
    kernel::task::scheduler::tasking_disable_scheduling();
    let task = task_spawn("test-created", idle_forever);

    let status = task.status.load(Ordering::SeqCst);
    let queue = mlfq::queue_of_task(&task);
    let ttl = mlfq::ttl_of_task(&task);
    mlfq::delete_task(&task);
    kernel::task::scheduler::tasking_reenable_scheduling();

    if status != TaskStatus::Runnable {
        return TestResult::Failed(format!("new task should be Runnable, was {status:?}"));
    }
    // New tasks always enter the highest-priority queue with its quantum
    if queue != Some(0) {
        return TestResult::Failed(format!("new task should sit in Q0, was {queue:?}"));
    }
    if ttl != Some(mlfq::QUEUE_QUANTUMS_MS[0] as i64) {
        return TestResult::Failed(format!(
            "new task should carry Q0's quantum, had ttl {ttl:?}"
        ));
    }
    TestResult::Ok
}

pub fn task_spawn_and_run() -> TestResult {
    COUNTER_A.store(0, Ordering::SeqCst);
    COUNTER_B.store(0, Ordering::SeqCst);
    task_spawn("test-increment-a", increment_a);
    task_spawn("test-increment-b", increment_b);

    let both_ran = wait_for(500, || {
        COUNTER_A.load(Ordering::SeqCst) == 1 && COUNTER_B.load(Ordering::SeqCst) == 1
    });
    if !both_ran {
        return TestResult::Failed(format!(
            "spawned tasks did not all run: a={} b={}",
            COUNTER_A.load(Ordering::SeqCst),
            COUNTER_B.load(Ordering::SeqCst)
        ));
    }
    TestResult::Ok
}

static BUSY_SHOULD_EXIT: AtomicBool = AtomicBool::new(false);

extern "sysv64" fn busy_loop(_: u64, _: u64, _: u64) -> ! {
    while !BUSY_SHOULD_EXIT.load(Ordering::SeqCst) {
        core::hint::spin_loop();
    }
    task_die(0)
}

extern "sysv64" fn idle_forever(_: u64, _: u64, _: u64) -> ! {
    loop {
        kernel::task::scheduler::task_switch();
    }
}

/// A task that burns through its Q0 quantum is demoted, and the demoted
/// entry is re-armed with the destination queue's quantum. By the time the
/// test observes it the task may have burned further quanta, so the
/// assertion is: below Q0, with a TTL within the current queue's budget.
pub fn quantum_demotion() -> TestResult {
    BUSY_SHOULD_EXIT.store(false, Ordering::SeqCst);
    let task = task_spawn("test-busy-demote", busy_loop);

    let demoted = wait_for(500, || mlfq::queue_of_task(&task).is_some_and(|queue| queue >= 1));
    let queue = mlfq::queue_of_task(&task);
    let ttl = mlfq::ttl_of_task(&task);
    BUSY_SHOULD_EXIT.store(true, Ordering::SeqCst);
    wait_for(500, || mlfq::queue_of_task(&task).is_none());

    if !demoted {
        return TestResult::Failed(format!("busy task was never demoted; queue {queue:?}"));
    }
    let (Some(queue), Some(ttl)) = (queue, ttl) else {
        return TestResult::Failed("demoted task vanished from the queues".into());
    };
    let quantum = mlfq::QUEUE_QUANTUMS_MS[queue] as i64;
    if ttl <= 0 || ttl > quantum {
        return TestResult::Failed(format!(
            "ttl {ttl} out of range for Q{queue} (quantum {quantum})"
        ));
    }
    TestResult::Ok
}

/// Spec scenario: a task demoted to the lowest queue returns to Q0 on the
/// periodic priority boost.
pub fn priority_boost() -> TestResult {
    BUSY_SHOULD_EXIT.store(false, Ordering::SeqCst);
    let task = task_spawn("test-busy-boost", busy_loop);

    // Let it burn down to the lowest queue
    let bottomed = wait_for(2000, || {
        mlfq::queue_of_task(&task) == Some(mlfq::QUEUE_COUNT - 1)
    });
    if !bottomed {
        BUSY_SHOULD_EXIT.store(true, Ordering::SeqCst);
        return TestResult::Failed(format!(
            "busy task never reached Q{}; queue {:?}",
            mlfq::QUEUE_COUNT - 1,
            mlfq::queue_of_task(&task)
        ));
    }

    // Within ~a second the boost must lift it out of the bottom queue.
    // Only the boost moves entries upward, so observing the task anywhere
    // above Q3 proves it fired (it may already be burning back down by the
    // time this task polls).
    let boosted = wait_for(3000, || {
        mlfq::queue_of_task(&task).is_some_and(|queue| queue < mlfq::QUEUE_COUNT - 1)
    });
    BUSY_SHOULD_EXIT.store(true, Ordering::SeqCst);
    wait_for(500, || mlfq::queue_of_task(&task).is_none());

    if !boosted {
        return TestResult::Failed("priority boost never lifted the task out of Q3".into());
    }
    TestResult::Ok
}

extern "sysv64" fn block_forever(_: u64, _: u64, _: u64) -> ! {
    kernel::amc::register_service("com.axle.test.blocked").unwrap();
    // No one will ever message this service
    let _ = kernel::amc::message_await_any();
    task_die(0)
}

/// A task parked in `AmcAwaitMessage` must never be selected by the
/// scheduler (it stays blocked rather than spinning).
pub fn blocked_task_not_selected() -> TestResult {
    let task = task_spawn("test-blocked", block_forever);
    // Give it time to run up to its await
    let parked = wait_for(500, || {
        task.status.load(Ordering::SeqCst) == TaskStatus::AmcAwaitMessage
    });
    if !parked {
        return TestResult::Failed("task never reached its blocking await".into());
    }
    spin_for_ms(50);
    if task.status.load(Ordering::SeqCst) != TaskStatus::AmcAwaitMessage {
        return TestResult::Failed("blocked task was woken without a message".into());
    }
    if task.is_currently_executing.load(Ordering::SeqCst) {
        return TestResult::Failed("blocked task is marked as executing".into());
    }
    TestResult::Ok
}
