//! AMC, the asynchronous message channel: the only user-visible IPC
//! primitive. Services are addressed by unique string name; each has a FIFO
//! inbox drained by blocking receives.

use crate::task::scheduler::{current_task, tasking_unblock_task_with_reason};
use crate::task::task::{Task, TaskStatus, UnblockReason};
use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_api_types::amc::{
    AMC_SERVICE_DIED_NOTIFICATION, AMC_SUPERVISED_PROCESS_CREATE, AmcServiceDiedNotification,
    AmcSupervisedProcessCreate, CORE_SERVICE_NAME, MAX_SERVICE_NAME_LEN, service_name_buf,
};
use spin::Mutex;

pub mod core_commands;

#[derive(Debug, Clone)]
pub struct AmcMessage {
    pub source: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmcError {
    NameTooLong,
    AlreadyRegistered,
    NoSuchService,
}

struct Service {
    task: Arc<Task>,
    inbox: VecDeque<AmcMessage>,
}

static SERVICES: Mutex<BTreeMap<String, Service>> = Mutex::new(BTreeMap::new());

/// watched service name -> services to notify when it dies
static DEATH_SUBSCRIPTIONS: Mutex<BTreeMap<String, Vec<String>>> = Mutex::new(BTreeMap::new());

/// View any `repr(C)` message struct as its wire bytes.
pub fn struct_as_bytes<T>(value: &T) -> &[u8] {
    unsafe { core::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }
}

/// Create the calling task's mailbox. Call once per task.
pub fn register_service(name: &str) -> Result<(), AmcError> {
    register_service_for_task(&current_task(), name)
}

pub fn register_service_for_task(task: &Arc<Task>, name: &str) -> Result<(), AmcError> {
    if name.len() > MAX_SERVICE_NAME_LEN {
        return Err(AmcError::NameTooLong);
    }
    let mut services = SERVICES.lock();
    if services.contains_key(name) {
        return Err(AmcError::AlreadyRegistered);
    }
    services.insert(
        String::from(name),
        Service {
            task: task.clone(),
            inbox: VecDeque::new(),
        },
    );
    drop(services);
    *task.amc_service.lock() = Some(String::from(name));
    log::info!("AMC service [{name}] registered by task {}", task.id.to_u64());
    Ok(())
}

/// Copy `body` into `dest`'s inbox. Non-blocking; a message to a
/// non-existent service is silently dropped. Sends addressed to
/// `com.axle.core` are handled inline in the sender's context.
pub fn message_send(dest: &str, body: &[u8]) {
    let sender = current_task();
    let source = sender
        .amc_service
        .lock()
        .clone()
        .unwrap_or_else(|| String::from("com.axle.anonymous"));
    if dest == CORE_SERVICE_NAME {
        core_commands::handle(&sender, &source, body);
        return;
    }
    deliver(&source, dest, body);
}

/// Send with the kernel core as the source (drivers, notifications, the
/// reaper feed).
pub fn message_send_from_core(dest: &str, body: &[u8]) {
    deliver(CORE_SERVICE_NAME, dest, body);
}

/// Send on behalf of a named pseudo-service (the input drivers).
pub fn message_send_from(source: &str, dest: &str, body: &[u8]) {
    deliver(source, dest, body);
}

fn deliver(source: &str, dest: &str, body: &[u8]) {
    let message = AmcMessage {
        source: String::from(source),
        body: body.to_vec(),
    };
    let recipient = x86_64::instructions::interrupts::without_interrupts(|| {
        let mut services = SERVICES.lock();
        let Some(service) = services.get_mut(dest) else {
            log::trace!("dropping message from [{source}] to nonexistent service [{dest}]");
            return None;
        };
        service.inbox.push_back(message);
        Some(service.task.clone())
    });

    // The blocked flag is set under the SERVICES lock in the await path, so
    // either we see it here or the receiver sees our message on its next
    // inbox check.
    if let Some(recipient) = recipient {
        if recipient.status.load(core::sync::atomic::Ordering::Acquire)
            == TaskStatus::AmcAwaitMessage
        {
            tasking_unblock_task_with_reason(&recipient, UnblockReason::AmcMessageDelivered);
        }
    }
}

fn service_name_of(task: &Arc<Task>) -> Option<String> {
    task.amc_service.lock().clone()
}

/// The task behind a registered service name.
pub fn task_of_service(name: &str) -> Option<Arc<Task>> {
    SERVICES.lock().get(name).map(|service| service.task.clone())
}

/// Block until any message is available, then dequeue the oldest.
pub fn message_await_any() -> AmcMessage {
    message_await_matching(|_| true)
}

/// Block until a message from `source` is available. Other senders' messages
/// stay queued in order.
pub fn message_await_from(source: &str) -> AmcMessage {
    message_await_matching(|msg| msg.source == source)
}

fn message_await_matching(matches: impl Fn(&AmcMessage) -> bool) -> AmcMessage {
    let current = current_task();
    let name = service_name_of(&current).expect("amc_message_await without a registered service");
    loop {
        let received = x86_64::instructions::interrupts::without_interrupts(|| {
            let mut services = SERVICES.lock();
            let service = services
                .get_mut(&name)
                .expect("service vanished while its task was alive");
            if let Some(pos) = service.inbox.iter().position(&matches) {
                return service.inbox.remove(pos);
            }
            // Park before releasing the lock so a concurrent deliver either
            // sees the blocked status or we see its message on the next
            // pass around the loop.
            current
                .status
                .store(TaskStatus::AmcAwaitMessage, core::sync::atomic::Ordering::Release);
            None
        });
        if let Some(message) = received {
            return message;
        }
        crate::task::scheduler::task_switch();
    }
}

/// Non-blocking poll for the calling service's inbox.
pub fn has_message() -> bool {
    let current = current_task();
    let Some(name) = service_name_of(&current) else {
        return false;
    };
    SERVICES
        .lock()
        .get(&name)
        .is_some_and(|service| !service.inbox.is_empty())
}

/// Block with a wake timestamp: returns when a message arrives or the
/// delay elapses, whichever is first.
pub fn sleep_until_timestamp_or_message(delay_ms: u64) {
    let current = current_task();
    let wake_at = crate::time::ms_since_boot() + delay_ms;
    crate::task::scheduler::tasking_park_task(
        &current,
        TaskStatus::AmcAwaitMessage,
        Some(wake_at),
    );
    if has_message() {
        // A message slipped in before the park became visible
        tasking_unblock_task_with_reason(&current, UnblockReason::AmcMessageDelivered);
        return;
    }
    crate::task::scheduler::task_switch();
}

/// Subscribe `subscriber` to a synthesized notification when `watched`
/// tears down.
pub fn notify_when_service_dies(subscriber: &str, watched: &str) {
    DEATH_SUBSCRIPTIONS
        .lock()
        .entry(String::from(watched))
        .or_default()
        .push(String::from(subscriber));
}

/// Discard messages previously sent by `sender` still queued at `dest`.
/// Used to avoid delivering stale frames to a window whose client died.
pub fn flush_messages_to_service(sender: &str, dest: &str) {
    let mut services = SERVICES.lock();
    if let Some(service) = services.get_mut(dest) {
        service.inbox.retain(|msg| msg.source != sender);
    }
}

/// Tell a supervisor service about its new child before the child runs.
pub fn notify_supervisor_of_child(supervisor: &str, child_pid: u64) {
    let msg = AmcSupervisedProcessCreate {
        event: AMC_SUPERVISED_PROCESS_CREATE,
        pid: child_pid,
    };
    message_send_from_core(supervisor, struct_as_bytes(&msg));
}

/// Drop the dying task's mailbox and fan out `SERVICE_DIED` notifications.
/// Messages already delivered FROM the dead service stay readable; messages
/// still queued TO it are discarded with the inbox.
pub fn teardown_service_for_task(task: &Arc<Task>) {
    let Some(name) = task.amc_service.lock().take() else {
        return;
    };
    SERVICES.lock().remove(&name);

    let subscribers = DEATH_SUBSCRIPTIONS.lock().remove(&name).unwrap_or_default();
    for subscriber in subscribers {
        let notification = AmcServiceDiedNotification {
            event: AMC_SERVICE_DIED_NOTIFICATION,
            dead_service: service_name_buf(&name),
        };
        message_send_from_core(&subscriber, struct_as_bytes(&notification));
    }

    // The dead service can no longer be notified about anyone else
    let mut subscriptions = DEATH_SUBSCRIPTIONS.lock();
    for subscribers in subscriptions.values_mut() {
        subscribers.retain(|subscriber| *subscriber != name);
    }

    log::info!("AMC service [{name}] torn down");
}
