use core::sync::atomic::{AtomicU64, Ordering};

pub mod lapic_timer;
pub mod pit;
pub mod tsc;

/// TSC value captured right after calibration; all wall-clock arithmetic is
/// relative to this point.
static BOOT_TSC: AtomicU64 = AtomicU64::new(0);

/// The single monotonic clock every other subsystem keys off: scheduler
/// timeslices, MLFQ boost, AMC sleep timestamps, AWM animations.
pub fn ms_since_boot() -> u64 {
    let tsc_per_ms = tsc::TSC_PER_MS.load(Ordering::Relaxed);
    assert!(tsc_per_ms != 0, "ms_since_boot before TSC calibration");
    (tsc::value() - BOOT_TSC.load(Ordering::Relaxed)) / tsc_per_ms
}

/// Like [`ms_since_boot`] but usable before calibration (the logger runs
/// from the first line of boot).
pub fn try_ms_since_boot() -> Option<u64> {
    let tsc_per_ms = tsc::TSC_PER_MS.load(Ordering::Relaxed);
    if tsc_per_ms == 0 {
        return None;
    }
    Some((tsc::value() - BOOT_TSC.load(Ordering::Relaxed)) / tsc_per_ms)
}

/// Calibrate the TSC against the PIT and zero the boot reference.
/// Must run once on the BSP before the scheduler starts.
pub fn init() {
    tsc::calibrate();
    BOOT_TSC.store(tsc::value(), Ordering::Relaxed);
}
