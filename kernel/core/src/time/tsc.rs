use crate::time::pit;
use core::arch::x86_64::{__cpuid, __rdtscp, _mm_lfence, _rdtsc};
use core::sync::atomic::{AtomicU64, Ordering};

/// TSC ticks per millisecond, measured against the PIT at boot.
pub static TSC_PER_MS: AtomicU64 = AtomicU64::new(0);

pub fn value() -> u64 {
    if has_rdtscp() {
        let mut aux = 0;
        unsafe { __rdtscp(&mut aux) }
    } else {
        unsafe {
            _mm_lfence();
            _rdtsc()
        }
    }
}

fn has_rdtscp() -> bool {
    // First check if extended CPUID leaves are supported
    let max_ext = unsafe { __cpuid(0x8000_0000) }.eax;
    if max_ext < 0x8000_0001 {
        return false;
    }

    let res = unsafe { __cpuid(0x8000_0001) };
    (res.edx & (1 << 27)) != 0
}

/// Measure TSC frequency with a PIT busy-wait.
/// Must be called once during early boot, interrupts disabled.
pub fn calibrate() {
    const CALIBRATION_MS: u32 = 20;

    let start = value();
    pit::sleep_ms(CALIBRATION_MS);
    let end = value();

    let ticks_per_ms = end.checked_sub(start).unwrap() / CALIBRATION_MS as u64;
    log::info!("TSC calibrated: {ticks_per_ms} ticks/ms");
    TSC_PER_MS.store(ticks_per_ms, Ordering::SeqCst);
}
