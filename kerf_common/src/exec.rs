//! Realtime flag banks shared across the interrupt boundary.
//!
//! All banks are `bitflags` over `u8` and cross the ISR/main-loop
//! boundary through [`AtomicFlags`]: single-byte atomic set from the RX
//! handler, consume-under-snapshot from the main loop.

use core::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Asynchronous requests to the realtime executor.
    ///
    /// Set from the RX interrupt (single byte commands) or internal
    /// handlers; consumed atomically by `protocol` each poll.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExecState: u8 {
        /// Emit a status report on the next poll.
        const STATUS_REPORT = 0x01;
        /// Resume from Idle/Hold, or start queued motion.
        const CYCLE_START   = 0x02;
        /// Stepper signalled end of motion (hold complete, queue drained).
        const CYCLE_STOP    = 0x04;
        /// Graceful ramp to zero velocity, queue preserved.
        const FEED_HOLD     = 0x08;
        /// Hard abort. Steppers stop dead, planner drops, parser re-inits.
        const RESET         = 0x10;
        /// Hold, then flush the queue and resync the parser (jog cancel,
        /// probe completion).
        const MOTION_CANCEL = 0x40;
        /// Ramp down and park in `Sleep`.
        const SLEEP         = 0x80;
    }
}

bitflags! {
    /// Override delta requests, one bit per realtime command byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExecOverride: u8 {
        /// Feed override back to 100%.
        const FEED_RESET         = 0x01;
        /// Feed override +10%.
        const FEED_COARSE_PLUS   = 0x02;
        /// Feed override −10%.
        const FEED_COARSE_MINUS  = 0x04;
        /// Feed override +1%.
        const FEED_FINE_PLUS     = 0x08;
        /// Feed override −1%.
        const FEED_FINE_MINUS    = 0x10;
        /// Rapid override back to 100%.
        const RAPID_RESET        = 0x20;
        /// Rapid override to 50%.
        const RAPID_MEDIUM       = 0x40;
        /// Rapid override to 25%.
        const RAPID_LOW          = 0x80;
    }
}

bitflags! {
    /// Hold/cancel sub-phase tracking while `SysState` is Hold or Jog.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Suspend: u8 {
        /// Deceleration ramp reached zero; machine is parked.
        const HOLD_COMPLETE = 0x01;
        /// Active hold is a motion cancel: flush on completion.
        const MOTION_CANCEL = 0x40;
        /// Canceled motion was a jog: flush and resync, no Hold state.
        const JOG_CANCEL    = 0x80;
    }
}

bitflags! {
    /// Stepper prep directives, owned by the realtime executor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StepControl: u8 {
        /// Terminate segment generation at the current point.
        const END_MOTION   = 0x01;
        /// Prep must ramp to zero speed instead of following the profile.
        const EXECUTE_HOLD = 0x02;
    }
}

impl Default for Suspend {
    fn default() -> Self {
        Self::empty()
    }
}

impl Default for StepControl {
    fn default() -> Self {
        Self::empty()
    }
}

// ─── Atomic carrier ─────────────────────────────────────────────────

/// One-byte atomic flag cell for ISR↔main signalling.
///
/// The RX handler only ORs bits in; the main loop reads, then clears the
/// bits it consumed. `take()` is the read-and-clear-all used by the
/// realtime executor for edge-triggered requests.
#[derive(Debug, Default)]
pub struct AtomicFlags {
    bits: AtomicU8,
}

impl AtomicFlags {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU8::new(0),
        }
    }

    /// OR the given bits in. Callable from the RX handler.
    #[inline]
    pub fn set(&self, bits: u8) {
        self.bits.fetch_or(bits, Ordering::AcqRel);
    }

    /// Clear the given bits.
    #[inline]
    pub fn clear(&self, bits: u8) {
        self.bits.fetch_and(!bits, Ordering::AcqRel);
    }

    /// Read without consuming.
    #[inline]
    pub fn snapshot(&self) -> u8 {
        self.bits.load(Ordering::Acquire)
    }

    /// Read and clear everything in one atomic exchange.
    #[inline]
    pub fn take(&self) -> u8 {
        self.bits.swap(0, Ordering::AcqRel)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_state_bits_round_trip() {
        for flag in [
            ExecState::STATUS_REPORT,
            ExecState::CYCLE_START,
            ExecState::CYCLE_STOP,
            ExecState::FEED_HOLD,
            ExecState::RESET,
            ExecState::MOTION_CANCEL,
            ExecState::SLEEP,
        ] {
            let bits = flag.bits();
            assert_eq!(ExecState::from_bits(bits), Some(flag));
        }
    }

    #[test]
    fn atomic_flags_set_and_take() {
        let flags = AtomicFlags::new();
        flags.set(ExecState::FEED_HOLD.bits());
        flags.set(ExecState::STATUS_REPORT.bits());
        let taken = ExecState::from_bits_truncate(flags.take());
        assert!(taken.contains(ExecState::FEED_HOLD));
        assert!(taken.contains(ExecState::STATUS_REPORT));
        assert_eq!(flags.snapshot(), 0);
    }

    #[test]
    fn atomic_flags_clear_is_selective() {
        let flags = AtomicFlags::new();
        flags.set(0b1010_0001);
        flags.clear(0b0010_0000);
        assert_eq!(flags.snapshot(), 0b1000_0001);
    }

    #[test]
    fn suspend_default_empty() {
        assert!(Suspend::default().is_empty());
        assert!(StepControl::default().is_empty());
    }
}
