//! G-code parser/interpreter.
//!
//! A modal state machine: [`GcState`] holds the currently active modes,
//! offsets, and the end-of-queue parser position; [`block`] holds the
//! per-line scratch; [`execute`] runs the four-phase interpretation of
//! one cleaned block. The parser either fully commits a block or rejects
//! it with a single status code, leaving `GcState` untouched.

pub mod block;
pub mod execute;
pub mod number;

use kerf_common::axis::MmVector;
use kerf_common::consts::N_AXIS;

/// Motion modal group (NIST group 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionMode {
    /// G0 rapid positioning.
    #[default]
    Seek,
    /// G1 linear feed.
    Linear,
    /// G2 clockwise arc.
    CwArc,
    /// G3 counter-clockwise arc.
    CcwArc,
    /// G38.2 probe toward workpiece, error on miss.
    ProbeToward,
    /// G38.3 probe toward workpiece, no error.
    ProbeTowardNoError,
    /// G38.4 probe away from workpiece, error on miss.
    ProbeAway,
    /// G38.5 probe away from workpiece, no error.
    ProbeAwayNoError,
    /// G80 motion canceled; axis words are an error.
    None,
}

impl MotionMode {
    /// Probe modes share validation and dispatch.
    #[inline]
    pub const fn is_probe(&self) -> bool {
        matches!(
            self,
            Self::ProbeToward | Self::ProbeTowardNoError | Self::ProbeAway | Self::ProbeAwayNoError
        )
    }
}

/// Feed rate modal group (NIST group 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedRateMode {
    /// G94: F is mm/min and sticky across blocks.
    #[default]
    UnitsPerMin,
    /// G93: F is 1/min for the whole move, required per block.
    InverseTime,
}

/// Units modal group (NIST group 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitsMode {
    /// G21 millimeters.
    #[default]
    Mm,
    /// G20 inches, converted on input.
    Inches,
}

/// Distance modal group (NIST group 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMode {
    /// G90 absolute coordinates.
    #[default]
    Absolute,
    /// G91 incremental from the parser position.
    Incremental,
}

/// Program flow modal group (M commands).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgramFlow {
    #[default]
    Running,
    /// M0: pause via feed hold until cycle start.
    Paused,
    /// M2: program end.
    CompletedM2,
    /// M30: program end and rewind.
    CompletedM30,
}

/// Non-modal commands (NIST group 0), one per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonModal {
    #[default]
    NoAction,
    /// G4 Pxx dwell.
    Dwell,
    /// G10 L2/L20 coordinate data write.
    SetCoordinateData,
    /// G28 move to predefined position 0.
    GoHome0,
    /// G28.1 store current position as predefined position 0.
    SetHome0,
    /// G30 move to predefined position 1.
    GoHome1,
    /// G30.1 store current position as predefined position 1.
    SetHome1,
    /// G53 machine-coordinate override for this block.
    AbsoluteOverride,
    /// G92 set coordinate offset.
    SetCoordinateOffset,
    /// G92.1 clear coordinate offset.
    ResetCoordinateOffset,
}

/// Complete modal mode set; one scratch copy exists per block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModalState {
    pub motion: MotionMode,
    pub feed_rate: FeedRateMode,
    pub units: UnitsMode,
    pub distance: DistanceMode,
    /// Active work coordinate system, 0 = G54.
    pub coord_select: u8,
    pub program_flow: ProgramFlow,
}

/// Parser state: modes, offsets, and the end-of-queue position.
///
/// `position` always reflects the target of the last committed block,
/// not the live machine position; an abort or cancel resyncs it from
/// `sys_position`.
#[derive(Debug, Clone, Default)]
pub struct GcState {
    pub modal: ModalState,
    /// Active feed rate [mm/min]. Zero means undefined.
    pub feed_rate: f32,
    /// Last N word seen.
    pub line_number: u32,
    /// Parser position, mm, machine frame.
    pub position: MmVector,
    /// Active work coordinate system offsets, mm.
    pub coord_system: MmVector,
    /// G92 offset vector, mm.
    pub coord_offset: MmVector,
}

impl GcState {
    /// Work coordinate offset: active system plus G92.
    pub fn wco(&self) -> MmVector {
        let mut wco = [0.0; N_AXIS];
        for idx in 0..N_AXIS {
            wco[idx] = self.coord_system[idx] + self.coord_offset[idx];
        }
        wco
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_modal_state_matches_power_on() {
        let modal = ModalState::default();
        assert_eq!(modal.motion, MotionMode::Seek);
        assert_eq!(modal.feed_rate, FeedRateMode::UnitsPerMin);
        assert_eq!(modal.units, UnitsMode::Mm);
        assert_eq!(modal.distance, DistanceMode::Absolute);
        assert_eq!(modal.coord_select, 0);
        assert_eq!(modal.program_flow, ProgramFlow::Running);
    }

    #[test]
    fn probe_classification() {
        assert!(MotionMode::ProbeToward.is_probe());
        assert!(MotionMode::ProbeAwayNoError.is_probe());
        assert!(!MotionMode::Linear.is_probe());
        assert!(!MotionMode::None.is_probe());
    }

    #[test]
    fn wco_sums_system_and_g92() {
        let mut state = GcState::default();
        state.coord_system = [10.0, 0.0, -5.0];
        state.coord_offset = [1.0, 2.0, 3.0];
        assert_eq!(state.wco(), [11.0, 2.0, -2.0]);
    }
}
