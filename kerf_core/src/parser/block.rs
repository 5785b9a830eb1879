//! Per-line parser scratch: word values, presence bitsets, and the
//! block-local modal copy.
//!
//! One [`GcBlock`] is built per input line. Nothing in it touches the
//! live parser state until the commit phase; a failed block is simply
//! dropped.

use bitflags::bitflags;

use kerf_common::axis::MmVector;

use super::{ModalState, NonModal};

bitflags! {
    /// Value-word presence, one bit per letter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ValueWords: u16 {
        const F = 1 << 0;
        const I = 1 << 1;
        const J = 1 << 2;
        const K = 1 << 3;
        const L = 1 << 4;
        const N = 1 << 5;
        const P = 1 << 6;
        const R = 1 << 7;
        const X = 1 << 8;
        const Y = 1 << 9;
        const Z = 1 << 10;
    }
}

bitflags! {
    /// Command presence, one bit per modal group. Two commands from the
    /// same group in one block is a modal group violation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandGroups: u16 {
        /// Group 0: non-modal (G4, G10, G28, G30, G53, G92).
        const NON_MODAL    = 1 << 0;
        /// Group 1: motion (G0, G1, G2, G3, G38.x, G80).
        const MOTION       = 1 << 1;
        /// Group 2: plane select (G17, implicit only).
        const PLANE        = 1 << 2;
        /// Group 3: distance (G90, G91).
        const DISTANCE     = 1 << 3;
        /// Group 4: arc IJK distance (G91.1, no-op).
        const ARC_DISTANCE = 1 << 4;
        /// Group 5: feed rate mode (G93, G94).
        const FEED_RATE    = 1 << 5;
        /// Group 6: units (G20, G21).
        const UNITS        = 1 << 6;
        /// Group 7: cutter compensation (G40, no-op).
        const CUTTER_COMP  = 1 << 7;
        /// Group 12: coordinate system select (G54..G59).
        const COORD_SYS    = 1 << 8;
        /// Group 13: path control (G61, no-op).
        const CONTROL_MODE = 1 << 9;
        /// M group 4: program flow (M0, M1, M2, M30).
        const PROGRAM_FLOW = 1 << 10;
    }
}

/// Which kind of axis-word consumer the block selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisCommand {
    /// No axis words in use.
    #[default]
    None,
    /// Axis words feed a non-modal command (G10/G28/G30/G92).
    NonModal,
    /// Axis words are a motion target.
    Motion,
}

/// Raw word values captured during ingestion.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockValues {
    /// Feed rate F, input units.
    pub f: f32,
    /// Arc offsets I/J/K; also reused as coordinate-data and
    /// predefined-position scratch, which never coexist with arcs.
    pub ijk: MmVector,
    /// G10 L variant.
    pub l: u8,
    /// Line number N.
    pub n: u32,
    /// Dwell seconds or G10 coordinate index.
    pub p: f32,
    /// Arc radius R.
    pub r: f32,
    /// Axis words X/Y/Z; converted to the mm machine-frame target
    /// during validation.
    pub xyz: MmVector,
}

/// The full scratch block for one line.
#[derive(Debug, Clone, Default)]
pub struct GcBlock {
    /// Block-local modal copy; commits to `GcState` on success.
    pub modal: ModalState,
    pub non_modal: NonModal,
    pub values: BlockValues,
    /// Value words seen, for repeat and leftover checks.
    pub value_words: ValueWords,
    /// Modal groups seen, for violation checks.
    pub command_words: CommandGroups,
    /// Axis letters seen, bit per axis index.
    pub axis_words: u8,
    /// Offset letters seen, bit per axis index.
    pub ijk_words: u8,
    pub axis_command: AxisCommand,
}

impl GcBlock {
    /// Fresh scratch seeded with the current modal state.
    pub fn from_modal(modal: ModalState) -> Self {
        Self {
            modal,
            ..Self::default()
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::MotionMode;

    #[test]
    fn scratch_copies_modal_state() {
        let mut modal = ModalState::default();
        modal.motion = MotionMode::Linear;
        modal.coord_select = 3;
        let block = GcBlock::from_modal(modal);
        assert_eq!(block.modal.motion, MotionMode::Linear);
        assert_eq!(block.modal.coord_select, 3);
        assert_eq!(block.axis_command, AxisCommand::None);
        assert!(block.value_words.is_empty());
    }

    #[test]
    fn word_bits_are_distinct() {
        let all = ValueWords::all();
        assert_eq!(all.bits().count_ones(), 11);
        let groups = CommandGroups::all();
        assert_eq!(groups.bits().count_ones(), 11);
    }
}
