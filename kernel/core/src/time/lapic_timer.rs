use crate::consts::APIC_TIMER_MODE_TSC_DEADLINE;
use crate::interrupt::InterruptVector;
use crate::time::tsc::{TSC_PER_MS, value};
use core::sync::atomic::Ordering;
use x86::msr::{IA32_TSC_DEADLINE, IA32_X2APIC_DIV_CONF, IA32_X2APIC_LVT_TIMER, wrmsr};

/// Put the local APIC timer into TSC-deadline mode, routed at the scheduler
/// tick vector. Must run on every CPU after its local APIC is enabled.
pub fn init() {
    unsafe {
        wrmsr(IA32_X2APIC_DIV_CONF, 0b1011); // divide-by-1; unused in deadline mode
        wrmsr(
            IA32_X2APIC_LVT_TIMER,
            u8::from(InterruptVector::LocalApicTimer) as u64 | APIC_TIMER_MODE_TSC_DEADLINE as u64,
        );
    }
}

/// Arm the timer to fire once the given quantum has elapsed.
pub fn start(quantum_ms: u64) {
    let ticks = quantum_ms * TSC_PER_MS.load(Ordering::Relaxed);
    unsafe {
        wrmsr(IA32_TSC_DEADLINE, value() + ticks);
    }
}

/// Disarm a pending deadline (writing zero cancels it).
pub fn cancel() {
    unsafe {
        wrmsr(IA32_TSC_DEADLINE, 0);
    }
}
