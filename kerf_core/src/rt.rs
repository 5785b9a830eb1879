//! Scheduling hardening for the step-pulse loop (feature `rt`).
//!
//! The segment queue buffers about
//! `(SEGMENT_BUFFER_SIZE − 1) / ACCELERATION_TICKS_PER_SECOND` seconds
//! of motion ahead of the pulse engine. Any stall of the foreground
//! prep longer than that starves the pulse stream mid-move. On a stock
//! Linux kernel the two stalls that can blow the budget are page faults
//! and fair-share preemption; [`harden_step_loop`] removes both by
//! locking and prefaulting the pipeline's working set, pinning the
//! loop to one core, and raising it to `SCHED_FIFO`.
//!
//! Without the `rt` feature the call is a no-op and the simulator
//! relies on the queue depth alone.

use kerf_common::consts::{ACCELERATION_TICKS_PER_SECOND, SEGMENT_BUFFER_SIZE};

/// Motion buffered ahead of the pulse engine [ms]; the ceiling for any
/// tolerable scheduling stall of the prep.
pub const PREP_STALL_BUDGET_MS: u32 =
    (SEGMENT_BUFFER_SIZE as u32 - 1) * 1000 / ACCELERATION_TICKS_PER_SECOND;

/// `SCHED_FIFO` priority for the step loop: above kernel worker
/// threads, below threaded IRQ handlers.
pub const STEP_LOOP_PRIORITY: i32 = 80;

/// Step-loop hardening failure. The loop still runs without hardening;
/// callers decide whether degraded timing is acceptable.
#[derive(Debug, thiserror::Error)]
#[error("step-loop hardening failed: {0}")]
pub struct RtSetupError(String);

/// Lock, prefault, pin, and prioritize the calling thread for pulse
/// generation.
#[cfg(feature = "rt")]
pub fn harden_step_loop(cpu_core: usize) -> Result<(), RtSetupError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::sys::mman::{MlockallFlags, mlockall};
    use nix::unistd::Pid;

    // A single major page fault outlasts the prep stall budget, so
    // current and future pages both stay resident.
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| RtSetupError(format!("mlockall: {e}")))?;
    prefault_pipeline_state();

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu_core)
        .map_err(|e| RtSetupError(format!("cpu {cpu_core} out of range: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| RtSetupError(format!("sched_setaffinity: {e}")))?;

    let param = libc::sched_param {
        sched_priority: STEP_LOOP_PRIORITY,
    };
    if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
        return Err(RtSetupError(format!(
            "SCHED_FIFO({STEP_LOOP_PRIORITY}): {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
pub fn harden_step_loop(_cpu_core: usize) -> Result<(), RtSetupError> {
    Ok(())
}

/// Touch every page the motion pipeline can span while running, so the
/// loop never faults once pulses flow. Sized from the machine assembly
/// itself (planner ring, segment queue, parser state are all inline)
/// plus one page of stack slack per pipeline stage.
#[cfg(feature = "rt")]
fn prefault_pipeline_state() {
    const PAGE: usize = 4096;
    const STAGE_SLACK_PAGES: usize = 4; // parser, planner, prep, pulse
    let span = core::mem::size_of::<crate::system::Machine>() + STAGE_SLACK_PAGES * PAGE;
    let mut resident = vec![0u8; span.next_multiple_of(PAGE)];
    for page in resident.chunks_mut(PAGE) {
        unsafe { core::ptr::write_volatile(&mut page[0], 1) };
    }
    core::hint::black_box(&resident);
}

// ─── Tests ──────────────────────────────────────────────────────────
