use crate::{TestResult, wait_for};
use alloc::format;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel::amc;
use kernel::task::scheduler::{task_die, task_spawn};
use kernel_api_types::amc::AMC_SERVICE_DIED_NOTIFICATION;
use kernel_api_types::awm::event_tag;

const TEST_SERVICE: &str = "com.axle.test.harness";
const SENDER_SERVICE: &str = "com.axle.test.sender";
const MORTAL_SERVICE: &str = "com.axle.test.mortal";

/// The test-runner task doubles as an AMC service; registration sticks for
/// the rest of the run.
fn ensure_test_service() {
    use kernel::amc::AmcError;
    match amc::register_service(TEST_SERVICE) {
        Ok(()) | Err(AmcError::AlreadyRegistered) => {}
        Err(err) => panic!("failed to register test service: {err:?}"),
    }
}

extern "sysv64" fn ordered_sender(_: u64, _: u64, _: u64) -> ! {
    amc::register_service(SENDER_SERVICE).unwrap();
    amc::message_send(TEST_SERVICE, b"first");
    amc::message_send(TEST_SERVICE, b"second");
    // Stay alive until torn down by later tests; dying would tear the
    // service down while messages are still being verified
    loop {
        kernel::task::scheduler::task_switch();
    }
}

/// Two messages from one sender arrive in send order.
pub fn fifo_within_sender() -> TestResult {
    ensure_test_service();
    task_spawn("test-ordered-sender", ordered_sender);

    let first = amc::message_await_from(SENDER_SERVICE);
    let second = amc::message_await_from(SENDER_SERVICE);
    if first.body != b"first" {
        return TestResult::Failed(format!("expected \"first\", got {:?}", first.body));
    }
    if second.body != b"second" {
        return TestResult::Failed(format!("expected \"second\", got {:?}", second.body));
    }
    TestResult::Ok
}

static INTERLEAVED_SENDER_STARTED: AtomicBool = AtomicBool::new(false);

extern "sysv64" fn interleaved_sender(_: u64, _: u64, _: u64) -> ! {
    INTERLEAVED_SENDER_STARTED.store(true, Ordering::SeqCst);
    // Reuse the long-lived sender service's name with a suffix
    amc::register_service("com.axle.test.other").unwrap();
    amc::message_send(TEST_SERVICE, b"from-other");
    loop {
        kernel::task::scheduler::task_switch();
    }
}

/// `message_await_from` skips queued messages from other senders and
/// leaves them readable afterwards.
pub fn await_from_filters_by_source() -> TestResult {
    ensure_test_service();
    task_spawn("test-interleaved-sender", interleaved_sender);
    if !wait_for(500, || INTERLEAVED_SENDER_STARTED.load(Ordering::SeqCst)) {
        return TestResult::Failed("interleaved sender never ran".into());
    }
    // The other task's message may be in our inbox; a message from the
    // first test's sender service must still be deliverable by name
    amc::message_send_from_core(TEST_SERVICE, b"from-core");

    let core_msg = amc::message_await_from("com.axle.core");
    if core_msg.body != b"from-core" {
        return TestResult::Failed(format!("expected core message, got {:?}", core_msg.body));
    }
    let other_msg = amc::message_await_from("com.axle.test.other");
    if other_msg.body != b"from-other" {
        return TestResult::Failed(format!("expected other's message, got {:?}", other_msg.body));
    }
    TestResult::Ok
}

/// Messages to unregistered names vanish without an error.
pub fn send_to_nonexistent_service_is_dropped() -> TestResult {
    ensure_test_service();
    amc::message_send("com.axle.test.nobody-home", b"anyone there?");
    // Nothing to assert beyond "we are still alive and our inbox is ours"
    TestResult::Ok
}

extern "sysv64" fn mortal_task(_: u64, _: u64, _: u64) -> ! {
    amc::register_service(MORTAL_SERVICE).unwrap();
    task_die(0)
}

/// Killing a service delivers `AMC_SERVICE_DIED_NOTIFICATION` to
/// subscribers, with the dead service's name in the body.
pub fn service_death_notifies_subscriber() -> TestResult {
    ensure_test_service();
    amc::notify_when_service_dies(TEST_SERVICE, MORTAL_SERVICE);
    task_spawn("test-mortal", mortal_task);

    let notification = amc::message_await_from("com.axle.core");
    if event_tag(&notification.body) != Some(AMC_SERVICE_DIED_NOTIFICATION) {
        return TestResult::Failed(format!(
            "expected a service-died notification, got event {:?}",
            event_tag(&notification.body)
        ));
    }
    let names_mortal = notification
        .body
        .windows(MORTAL_SERVICE.len())
        .any(|window| window == MORTAL_SERVICE.as_bytes());
    if !names_mortal {
        return TestResult::Failed("notification does not name the dead service".into());
    }
    TestResult::Ok
}
