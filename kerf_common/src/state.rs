//! Top-level system state enum.
//!
//! `#[repr(u8)]` for compact storage in the atomic state cell. Only one
//! state is active at a time; sub-phases of Hold and Jog-cancel live in
//! the suspend flag bank, not here.

use serde::{Deserialize, Serialize};

/// Global machine lifecycle state.
///
/// `Alarm` latches until an explicit unlock or reset; all g-code is
/// rejected while latched. `CheckCode` parses and validates without
/// queueing motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SysState {
    /// Ready, queue empty or paused between lines.
    Idle = 0,
    /// Executing buffered motion.
    Cycle = 1,
    /// Feed hold in progress or complete, queue preserved.
    Hold = 2,
    /// Executing a jog block; cancelable without alarm.
    Jog = 3,
    /// Latched fault. Motion locked out.
    Alarm = 4,
    /// Dry-run validation mode. No motion, no persistence writes.
    CheckCode = 5,
    /// Parked. Any realtime reset re-initializes.
    Sleep = 6,
}

impl SysState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Cycle),
            2 => Some(Self::Hold),
            3 => Some(Self::Jog),
            4 => Some(Self::Alarm),
            5 => Some(Self::CheckCode),
            6 => Some(Self::Sleep),
            _ => None,
        }
    }

    /// Whether steppers may currently be producing pulses.
    #[inline]
    pub const fn is_motion_state(&self) -> bool {
        matches!(self, Self::Cycle | Self::Hold | Self::Jog)
    }

    /// Status-report state word.
    pub const fn report_name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Cycle => "Run",
            Self::Hold => "Hold",
            Self::Jog => "Jog",
            Self::Alarm => "Alarm",
            Self::CheckCode => "Check",
            Self::Sleep => "Sleep",
        }
    }
}

impl Default for SysState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Parser position update policy after a motion command commits.
///
/// `Target` is the normal case. `System` re-reads the live machine
/// position (probe completion, cancel paths). `None` leaves the parser
/// position untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosUpdate {
    /// Parser position becomes the block target.
    Target,
    /// Parser position resyncs from `sys_position`.
    System,
    /// No position update.
    None,
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_u8_round_trip() {
        for state in [
            SysState::Idle,
            SysState::Cycle,
            SysState::Hold,
            SysState::Jog,
            SysState::Alarm,
            SysState::CheckCode,
            SysState::Sleep,
        ] {
            assert_eq!(SysState::from_u8(state as u8), Some(state));
        }
        assert_eq!(SysState::from_u8(7), None);
        assert_eq!(SysState::from_u8(255), None);
    }

    #[test]
    fn motion_states() {
        assert!(SysState::Cycle.is_motion_state());
        assert!(SysState::Hold.is_motion_state());
        assert!(SysState::Jog.is_motion_state());
        assert!(!SysState::Idle.is_motion_state());
        assert!(!SysState::Alarm.is_motion_state());
        assert!(!SysState::Sleep.is_motion_state());
    }

    #[test]
    fn default_is_idle() {
        assert_eq!(SysState::default(), SysState::Idle);
    }

    #[test]
    fn report_names() {
        assert_eq!(SysState::Cycle.report_name(), "Run");
        assert_eq!(SysState::CheckCode.report_name(), "Check");
    }
}
