//! Four-phase block interpretation: ingest words, cross-validate,
//! compute targets, commit and dispatch.
//!
//! The phases are strict: a failure anywhere returns one status code
//! and leaves `GcState` untouched. Only the commit phase mutates state
//! or queues motion. Jog blocks run the same phases with G1/G94 forced
//! and a restricted command set, then divert to the jog executor.

use kerf_common::axis::{MmVector, X_AXIS, Y_AXIS, Z_AXIS, hypot2};
use kerf_common::consts::{JOG_LINE_NUMBER, MAX_LINE_NUMBER, MM_PER_INCH, N_AXIS};
use kerf_common::exec::ExecState;
use kerf_common::state::{PosUpdate, SysState};
use kerf_common::status::Status;

use crate::planner::{PlanCondition, PlanLineData};
use crate::settings::{COORD_INDEX_G28, COORD_INDEX_G30};
use crate::system::Machine;

use super::block::{AxisCommand, CommandGroups, GcBlock, ValueWords};
use super::number::read_float;
use super::{
    DistanceMode, FeedRateMode, MotionMode, NonModal, ProgramFlow, UnitsMode,
};

/// Target-equality epsilon is exact: a start==end arc in radius mode has
/// no defined center, however close the floats are.
fn is_equal_position(a: &MmVector, b: &MmVector) -> bool {
    a == b
}

impl Machine {
    /// Execute one cleaned g-code block (uppercase, no whitespace, no
    /// comments). For jog blocks pass the text after the `$J=` prefix
    /// with `is_jog` set.
    pub fn gc_execute_line(&mut self, line: &str, is_jog: bool) -> Result<(), Status> {
        // ── Phase 1: block init ─────────────────────────────────────
        let mut block = GcBlock::from_modal(self.gc.modal);
        let mut axis_command = AxisCommand::None;
        // Active plane is always G17.
        let (axis_0, axis_1, axis_linear) = (X_AXIS, Y_AXIS, Z_AXIS);
        // G10 P selection resolved during validation, used at commit.
        let mut coord_select: usize = 0;

        if is_jog {
            block.modal.motion = MotionMode::Linear;
            block.modal.feed_rate = FeedRateMode::UnitsPerMin;
            block.values.n = JOG_LINE_NUMBER;
        }

        // ── Phase 2: word ingestion ─────────────────────────────────
        let bytes = line.as_bytes();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let letter = bytes[pos];
            if !letter.is_ascii_uppercase() {
                return Err(Status::ExpectedCommandLetter);
            }
            pos += 1;
            let value = read_float(bytes, &mut pos).ok_or(Status::BadNumberFormat)?;

            // Split into integer part and two-digit mantissa to
            // recognize Gxx.x commands; rounding catches float error.
            let int_value = value.trunc() as i32;
            let mut mantissa = (100.0 * (value - int_value as f32)).round() as i32;

            match letter {
                b'G' => {
                    let word_bit: CommandGroups;
                    match int_value {
                        10 | 28 | 30 | 92 => {
                            // Axis-word-using non-modals conflict with
                            // motion modes in the same block.
                            if mantissa == 0 {
                                if axis_command != AxisCommand::None {
                                    return Err(Status::AxisCommandConflict);
                                }
                                axis_command = AxisCommand::NonModal;
                            }
                            word_bit = CommandGroups::NON_MODAL;
                            block.non_modal = match (int_value, mantissa) {
                                (10, 0) => NonModal::SetCoordinateData,
                                (28, 0) => NonModal::GoHome0,
                                (28, 10) => NonModal::SetHome0,
                                (30, 0) => NonModal::GoHome1,
                                (30, 10) => NonModal::SetHome1,
                                (92, 0) => NonModal::SetCoordinateOffset,
                                (92, 10) => NonModal::ResetCoordinateOffset,
                                (10, _) => NonModal::SetCoordinateData, // mantissa check below
                                _ => return Err(Status::UnsupportedCommand),
                            };
                            if int_value != 10 {
                                mantissa = 0; // Valid non-integer command consumed.
                            }
                        }
                        4 | 53 => {
                            word_bit = CommandGroups::NON_MODAL;
                            block.non_modal = if int_value == 4 {
                                NonModal::Dwell
                            } else {
                                NonModal::AbsoluteOverride
                            };
                        }
                        0..=3 | 38 => {
                            if axis_command != AxisCommand::None {
                                return Err(Status::AxisCommandConflict);
                            }
                            axis_command = AxisCommand::Motion;
                            word_bit = CommandGroups::MOTION;
                            block.modal.motion = match int_value {
                                0 => MotionMode::Seek,
                                1 => MotionMode::Linear,
                                2 => MotionMode::CwArc,
                                3 => MotionMode::CcwArc,
                                _ => {
                                    let probe = match mantissa {
                                        20 => MotionMode::ProbeToward,
                                        30 => MotionMode::ProbeTowardNoError,
                                        40 => MotionMode::ProbeAway,
                                        50 => MotionMode::ProbeAwayNoError,
                                        _ => return Err(Status::UnsupportedCommand),
                                    };
                                    mantissa = 0;
                                    probe
                                }
                            };
                        }
                        80 => {
                            word_bit = CommandGroups::MOTION;
                            block.modal.motion = MotionMode::None;
                        }
                        90 | 91 => {
                            if mantissa == 0 {
                                word_bit = CommandGroups::DISTANCE;
                                block.modal.distance = if int_value == 90 {
                                    DistanceMode::Absolute
                                } else {
                                    DistanceMode::Incremental
                                };
                            } else {
                                word_bit = CommandGroups::ARC_DISTANCE;
                                if mantissa != 10 || int_value == 90 {
                                    // G90.1 absolute arc mode unsupported;
                                    // G91.1 is the default and a no-op.
                                    return Err(Status::UnsupportedCommand);
                                }
                                mantissa = 0;
                            }
                        }
                        93 | 94 => {
                            word_bit = CommandGroups::FEED_RATE;
                            block.modal.feed_rate = if int_value == 93 {
                                FeedRateMode::InverseTime
                            } else {
                                FeedRateMode::UnitsPerMin
                            };
                        }
                        20 | 21 => {
                            word_bit = CommandGroups::UNITS;
                            block.modal.units = if int_value == 20 {
                                UnitsMode::Inches
                            } else {
                                UnitsMode::Mm
                            };
                        }
                        17 => {
                            // XY plane is the only one supported; accept
                            // the word programs emit in their headers.
                            word_bit = CommandGroups::PLANE;
                        }
                        40 => {
                            // Cutter compensation is always off; accept
                            // the header G40 as a no-op.
                            word_bit = CommandGroups::CUTTER_COMP;
                        }
                        54..=59 => {
                            // G59.1+ carry a mantissa and fail the
                            // integer-command check below.
                            word_bit = CommandGroups::COORD_SYS;
                            block.modal.coord_select = (int_value - 54) as u8;
                        }
                        61 => {
                            word_bit = CommandGroups::CONTROL_MODE;
                            if mantissa != 0 {
                                return Err(Status::UnsupportedCommand);
                            }
                        }
                        _ => return Err(Status::UnsupportedCommand),
                    }
                    if mantissa > 0 {
                        return Err(Status::CommandValueNotInteger);
                    }
                    if block.command_words.contains(word_bit) {
                        return Err(Status::ModalGroupViolation);
                    }
                    block.command_words.insert(word_bit);
                }

                b'M' => {
                    if mantissa > 0 {
                        return Err(Status::CommandValueNotInteger);
                    }
                    let word_bit = match int_value {
                        0 => {
                            block.modal.program_flow = ProgramFlow::Paused;
                            CommandGroups::PROGRAM_FLOW
                        }
                        1 => {
                            // Optional stop not supported. Ignore.
                            CommandGroups::PROGRAM_FLOW
                        }
                        2 => {
                            block.modal.program_flow = ProgramFlow::CompletedM2;
                            CommandGroups::PROGRAM_FLOW
                        }
                        30 => {
                            block.modal.program_flow = ProgramFlow::CompletedM30;
                            CommandGroups::PROGRAM_FLOW
                        }
                        _ => return Err(Status::UnsupportedCommand),
                    };
                    if block.command_words.contains(word_bit) {
                        return Err(Status::ModalGroupViolation);
                    }
                    block.command_words.insert(word_bit);
                }

                _ => {
                    // Value words: record, checking repeats and signs.
                    let word_bit = match letter {
                        b'F' => {
                            block.values.f = value;
                            ValueWords::F
                        }
                        b'I' => {
                            block.values.ijk[X_AXIS] = value;
                            block.ijk_words |= 1 << X_AXIS;
                            ValueWords::I
                        }
                        b'J' => {
                            block.values.ijk[Y_AXIS] = value;
                            block.ijk_words |= 1 << Y_AXIS;
                            ValueWords::J
                        }
                        b'K' => {
                            block.values.ijk[Z_AXIS] = value;
                            block.ijk_words |= 1 << Z_AXIS;
                            ValueWords::K
                        }
                        b'L' => {
                            block.values.l = int_value.clamp(0, u8::MAX as i32) as u8;
                            ValueWords::L
                        }
                        b'N' => {
                            block.values.n = value.trunc().max(0.0) as u32;
                            ValueWords::N
                        }
                        b'P' => {
                            block.values.p = value;
                            ValueWords::P
                        }
                        b'R' => {
                            block.values.r = value;
                            ValueWords::R
                        }
                        b'X' => {
                            block.values.xyz[X_AXIS] = value;
                            block.axis_words |= 1 << X_AXIS;
                            ValueWords::X
                        }
                        b'Y' => {
                            block.values.xyz[Y_AXIS] = value;
                            block.axis_words |= 1 << Y_AXIS;
                            ValueWords::Y
                        }
                        b'Z' => {
                            block.values.xyz[Z_AXIS] = value;
                            block.axis_words |= 1 << Z_AXIS;
                            ValueWords::Z
                        }
                        _ => return Err(Status::UnsupportedCommand),
                    };
                    if block.value_words.contains(word_bit) {
                        return Err(Status::WordRepeated);
                    }
                    if word_bit
                        .intersects(ValueWords::F | ValueWords::N | ValueWords::P)
                        && value < 0.0
                    {
                        return Err(Status::NegativeValue);
                    }
                    block.value_words.insert(word_bit);
                }
            }
        }

        // ── Phase 3: cross-word validation and target computation ───

        // Axis words without an explicit axis command run the modal
        // motion mode.
        if block.axis_words != 0 && axis_command == AxisCommand::None {
            axis_command = AxisCommand::Motion;
        }

        if block.value_words.contains(ValueWords::N) && block.values.n > MAX_LINE_NUMBER {
            return Err(Status::InvalidLineNumber);
        }

        // Feed rate rules. Jogs always require F; G93 requires F per
        // feed motion block; G94 keeps the last state value.
        if is_jog {
            if !block.value_words.contains(ValueWords::F) {
                return Err(Status::UndefinedFeedRate);
            }
            if block.modal.units == UnitsMode::Inches {
                block.values.f *= MM_PER_INCH;
            }
        } else if block.modal.feed_rate == FeedRateMode::InverseTime {
            if axis_command == AxisCommand::Motion
                && !matches!(block.modal.motion, MotionMode::None | MotionMode::Seek)
                && !block.value_words.contains(ValueWords::F)
            {
                return Err(Status::UndefinedFeedRate);
            }
        } else if self.gc.modal.feed_rate == FeedRateMode::UnitsPerMin {
            if block.value_words.contains(ValueWords::F) {
                if block.modal.units == UnitsMode::Inches {
                    block.values.f *= MM_PER_INCH;
                }
            } else {
                block.values.f = self.gc.feed_rate;
            }
        }
        // Else switching G93→G94: feed is undefined unless F was passed.

        // Dwell requires P.
        if block.non_modal == NonModal::Dwell {
            if !block.value_words.contains(ValueWords::P) {
                return Err(Status::ValueWordMissing);
            }
            block.value_words.remove(ValueWords::P);
        }

        // Coordinate system selection: load the block's system if it
        // differs from the active one.
        let mut block_coord_system = self.gc.coord_system;
        if block.command_words.contains(CommandGroups::COORD_SYS) {
            if usize::from(block.modal.coord_select) >= kerf_common::consts::N_COORDINATE_SYSTEM {
                return Err(Status::UnsupportedCoordSys);
            }
            if self.gc.modal.coord_select != block.modal.coord_select {
                block_coord_system = self
                    .settings
                    .read_coord_data(usize::from(block.modal.coord_select))?;
            }
        }

        // Inch inputs become millimeters before any target math.
        if block.modal.units == UnitsMode::Inches {
            for idx in 0..N_AXIS {
                if block.axis_words & (1 << idx) != 0 {
                    block.values.xyz[idx] *= MM_PER_INCH;
                }
            }
        }

        // Non-modal commands treat axis words in their own ways; the
        // rest compute the usual offset-adjusted target.
        match block.non_modal {
            NonModal::SetCoordinateData => {
                // G10 L2/L20: coordinate record write.
                if block.axis_words == 0 {
                    return Err(Status::NoAxisWords);
                }
                if !block
                    .value_words
                    .contains(ValueWords::P | ValueWords::L)
                {
                    return Err(Status::ValueWordMissing);
                }
                let p_index = block.values.p.trunc() as i32;
                if p_index < 0 || p_index as usize > kerf_common::consts::N_COORDINATE_SYSTEM {
                    return Err(Status::UnsupportedCoordSys);
                }
                if block.values.l != 20 && block.values.l != 2 {
                    return Err(Status::UnsupportedCommand);
                }
                if block.values.l == 2 && block.value_words.contains(ValueWords::R) {
                    return Err(Status::UnsupportedCommand);
                }
                block.value_words.remove(ValueWords::L | ValueWords::P);

                // P0 addresses the active system; P1..P6 are explicit.
                coord_select = if p_index > 0 {
                    (p_index - 1) as usize
                } else {
                    usize::from(block.modal.coord_select)
                };

                // Start from the stored record, then overwrite the axes
                // present in the block. IJK doubles as scratch here.
                block.values.ijk = self.settings.read_coord_data(coord_select)?;
                for idx in 0..N_AXIS {
                    if block.axis_words & (1 << idx) != 0 {
                        if block.values.l == 20 {
                            // L20: make the current position read as the
                            // programmed value. WCS = MPos − G92 − WPos.
                            block.values.ijk[idx] = self.gc.position[idx]
                                - self.gc.coord_offset[idx]
                                - block.values.xyz[idx];
                        } else {
                            // L2: store the programmed value directly.
                            block.values.ijk[idx] = block.values.xyz[idx];
                        }
                    }
                }
            }
            NonModal::SetCoordinateOffset => {
                // G92: make the current position read as the programmed
                // value in the active system.
                if block.axis_words == 0 {
                    return Err(Status::NoAxisWords);
                }
                for idx in 0..N_AXIS {
                    if block.axis_words & (1 << idx) != 0 {
                        block.values.xyz[idx] = self.gc.position[idx]
                            - block_coord_system[idx]
                            - block.values.xyz[idx];
                    } else {
                        block.values.xyz[idx] = self.gc.coord_offset[idx];
                    }
                }
            }
            NonModal::GoHome0 | NonModal::GoHome1 => {
                // Load the predefined machine position; axis words name
                // an intermediate target obeying the usual offsets.
                let record = if block.non_modal == NonModal::GoHome0 {
                    COORD_INDEX_G28
                } else {
                    COORD_INDEX_G30
                };
                block.values.ijk = self.settings.read_coord_data(record)?;
                if block.axis_words != 0 {
                    for idx in 0..N_AXIS {
                        if block.axis_words & (1 << idx) == 0 {
                            block.values.ijk[idx] = self.gc.position[idx];
                        }
                    }
                } else {
                    axis_command = AxisCommand::None; // No intermediate move.
                }
                compute_target(&mut block, &self.gc.position, &block_coord_system,
                    &self.gc.coord_offset, false);
            }
            _ => {
                let is_absolute_override = block.non_modal == NonModal::AbsoluteOverride;
                compute_target(
                    &mut block,
                    &self.gc.position,
                    &block_coord_system,
                    &self.gc.coord_offset,
                    is_absolute_override,
                );
                if block.non_modal == NonModal::AbsoluteOverride
                    && !matches!(block.modal.motion, MotionMode::Seek | MotionMode::Linear)
                {
                    return Err(Status::G53InvalidMotionMode);
                }
            }
        }

        // Motion mode validation and arc geometry.
        if block.modal.motion == MotionMode::None {
            // G80 active: axis words are a strict error, even ones a
            // non-modal command would consume.
            if block.axis_words != 0 {
                return Err(Status::AxisWordsExist);
            }
        } else if axis_command == AxisCommand::Motion {
            match block.modal.motion {
                MotionMode::Seek => {
                    if block.axis_words == 0 {
                        axis_command = AxisCommand::None;
                    }
                }
                motion => {
                    // Every feed motion requires a defined, nonzero rate.
                    if block.values.f == 0.0 {
                        return Err(Status::UndefinedFeedRate);
                    }
                    match motion {
                        MotionMode::Linear => {
                            if block.axis_words == 0 {
                                axis_command = AxisCommand::None;
                            }
                        }
                        MotionMode::CwArc | MotionMode::CcwArc => {
                            self.validate_arc(
                                &mut block, axis_0, axis_1,
                            )?;
                        }
                        probe if probe.is_probe() => {
                            if block.axis_words == 0 {
                                return Err(Status::NoAxisWords);
                            }
                            if is_equal_position(&self.gc.position, &block.values.xyz) {
                                return Err(Status::InvalidTarget);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        // Leftover value words are an error: everything present must
        // have been consumed by some command in this block.
        block.value_words.remove(ValueWords::N | ValueWords::F);
        if axis_command != AxisCommand::None {
            block
                .value_words
                .remove(ValueWords::X | ValueWords::Y | ValueWords::Z);
        }
        if !block.value_words.is_empty() {
            return Err(Status::UnusedWords);
        }

        // ── Phase 4: commit and dispatch ────────────────────────────

        let mut pl_data = PlanLineData::default();

        if is_jog {
            // Jogs may only carry distance, units, and G53; modal state
            // stays untouched except the parser position.
            if block
                .command_words
                .intersects(!(CommandGroups::DISTANCE | CommandGroups::UNITS | CommandGroups::NON_MODAL))
            {
                return Err(Status::InvalidJogCommand);
            }
            if !matches!(
                block.non_modal,
                NonModal::AbsoluteOverride | NonModal::NoAction
            ) {
                return Err(Status::InvalidJogCommand);
            }
            self.jog_execute(&block)?;
            self.gc.position = block.values.xyz;
            return Ok(());
        }

        self.gc.line_number = block.values.n;
        pl_data.line_number = block.values.n;

        self.gc.modal.feed_rate = block.modal.feed_rate;
        if self.gc.modal.feed_rate == FeedRateMode::InverseTime {
            pl_data.condition |= PlanCondition::INVERSE_TIME;
        }
        self.gc.feed_rate = block.values.f;
        pl_data.feed_rate = self.gc.feed_rate;

        if block.non_modal == NonModal::Dwell {
            self.mc_dwell(block.values.p);
        }

        self.gc.modal.units = block.modal.units;

        if self.gc.modal.coord_select != block.modal.coord_select {
            self.gc.modal.coord_select = block.modal.coord_select;
            self.gc.coord_system = block_coord_system;
            self.sys.report_wco_counter = 0;
        }

        self.gc.modal.distance = block.modal.distance;

        match block.non_modal {
            NonModal::SetCoordinateData => {
                if self.sys.state != SysState::CheckCode {
                    // A parameter write can stall segment prep; drain
                    // the pipeline first.
                    self.protocol_buffer_synchronize();
                    self.settings
                        .write_coord_data(coord_select, &block.values.ijk)?;
                }
                if usize::from(self.gc.modal.coord_select) == coord_select {
                    self.gc.coord_system = block.values.ijk;
                    self.sys.report_wco_counter = 0;
                }
            }
            NonModal::SetHome0 | NonModal::SetHome1 => {
                let record = if block.non_modal == NonModal::SetHome0 {
                    COORD_INDEX_G28
                } else {
                    COORD_INDEX_G30
                };
                if self.sys.state != SysState::CheckCode {
                    self.protocol_buffer_synchronize();
                    let position = self.gc.position;
                    self.settings.write_coord_data(record, &position)?;
                }
            }
            NonModal::SetCoordinateOffset => {
                self.gc.coord_offset = block.values.xyz;
                self.sys.report_wco_counter = 0;
            }
            NonModal::ResetCoordinateOffset => {
                self.gc.coord_offset = [0.0; N_AXIS];
                self.sys.report_wco_counter = 0;
            }
            NonModal::GoHome0 | NonModal::GoHome1 => {
                // Rapid through the optional intermediate point, then to
                // the predefined position in machine coordinates.
                let mut home_data = pl_data;
                home_data.condition |= PlanCondition::RAPID_MOTION;
                if axis_command != AxisCommand::None {
                    let intermediate = block.values.xyz;
                    self.mc_line(&intermediate, &home_data);
                }
                let home = block.values.ijk;
                self.mc_line(&home, &home_data);
                self.gc.position = home;
            }
            _ => {}
        }

        // Motion, only when axis words targeted the motion mode.
        self.gc.modal.motion = block.modal.motion;
        if self.gc.modal.motion != MotionMode::None && axis_command == AxisCommand::Motion {
            let target = block.values.xyz;
            let mut update_pos = PosUpdate::Target;
            match self.gc.modal.motion {
                MotionMode::Linear => self.mc_line(&target, &pl_data),
                MotionMode::Seek => {
                    pl_data.condition |= PlanCondition::RAPID_MOTION;
                    self.mc_line(&target, &pl_data);
                }
                MotionMode::CwArc | MotionMode::CcwArc => {
                    let position = self.gc.position;
                    let offset = block.values.ijk;
                    let is_clockwise = self.gc.modal.motion == MotionMode::CwArc;
                    self.mc_arc(
                        &target,
                        &pl_data,
                        &position,
                        &offset,
                        block.values.r,
                        axis_0,
                        axis_1,
                        axis_linear,
                        is_clockwise,
                    );
                }
                _ => {
                    // Probe cycles ignore feed overrides.
                    pl_data.condition |= PlanCondition::NO_FEED_OVERRIDE;
                    update_pos = self.mc_probe_cycle(&target, &pl_data);
                }
            }

            match update_pos {
                PosUpdate::Target => self.gc.position = target,
                PosUpdate::System => self.gc_sync_position(),
                PosUpdate::None => {}
            }
        }

        // Program flow runs last, after all buffered motion.
        self.gc.modal.program_flow = block.modal.program_flow;
        match self.gc.modal.program_flow {
            ProgramFlow::Running => {}
            ProgramFlow::Paused => {
                self.protocol_buffer_synchronize();
                if self.sys.state != SysState::CheckCode {
                    self.sys.signals.set_exec(ExecState::FEED_HOLD);
                    self.protocol_execute_realtime();
                }
                self.gc.modal.program_flow = ProgramFlow::Running;
            }
            ProgramFlow::CompletedM2 | ProgramFlow::CompletedM30 => {
                self.protocol_buffer_synchronize();
                // Program end resets a fixed subset of modal groups.
                self.gc.modal.motion = MotionMode::Linear;
                self.gc.modal.distance = DistanceMode::Absolute;
                self.gc.modal.feed_rate = FeedRateMode::UnitsPerMin;
                self.gc.modal.coord_select = 0;
                if self.settings.machine.restore_overrides {
                    self.sys.f_override = kerf_common::consts::DEFAULT_FEED_OVERRIDE;
                    self.sys.r_override = kerf_common::consts::DEFAULT_RAPID_OVERRIDE;
                    self.sys.report_ovr_pending = true;
                }
                if self.sys.state != SysState::CheckCode {
                    self.gc.coord_system = self.settings.read_coord_data(0)?;
                    self.sys.report_wco_counter = 0;
                }
                self.out.message("Pgm End");
                self.gc.modal.program_flow = ProgramFlow::Running;
            }
        }

        Ok(())
    }

    /// Arc geometry validation: resolve radius mode into a center, or
    /// verify an offset-mode center against both radii.
    fn validate_arc(
        &self,
        block: &mut GcBlock,
        axis_0: usize,
        axis_1: usize,
    ) -> Result<(), Status> {
        if block.axis_words == 0 {
            return Err(Status::NoAxisWords);
        }
        if block.axis_words & ((1 << axis_0) | (1 << axis_1)) == 0 {
            return Err(Status::NoAxisWordsInPlane);
        }

        // Deltas from current position to target in the plane.
        let x = block.values.xyz[axis_0] - self.gc.position[axis_0];
        let y = block.values.xyz[axis_1] - self.gc.position[axis_1];

        if block.value_words.contains(ValueWords::R) {
            // Radius mode: place the center perpendicular to the chord.
            block.value_words.remove(ValueWords::R);
            if is_equal_position(&self.gc.position, &block.values.xyz) {
                return Err(Status::InvalidTarget);
            }
            if block.modal.units == UnitsMode::Inches {
                block.values.r *= MM_PER_INCH;
            }

            // h_x2_div_d = 4r² − d²; negative means the chord is longer
            // than the diameter and no circle exists.
            let mut h_x2_div_d = 4.0 * block.values.r * block.values.r - x * x - y * y;
            if h_x2_div_d < 0.0 {
                return Err(Status::ArcRadiusError);
            }
            h_x2_div_d = -h_x2_div_d.sqrt() / hypot2(x, y);
            if block.modal.motion == MotionMode::CcwArc {
                h_x2_div_d = -h_x2_div_d;
            }

            // Negative R selects the > 180° arc on the far side.
            if block.values.r < 0.0 {
                h_x2_div_d = -h_x2_div_d;
                block.values.r = -block.values.r;
            }
            block.values.ijk[axis_0] = 0.5 * (x - y * h_x2_div_d);
            block.values.ijk[axis_1] = 0.5 * (y + x * h_x2_div_d);
        } else {
            // Offset mode: center from I/J/K, cross-checked against the
            // target radius.
            if block.ijk_words & ((1 << axis_0) | (1 << axis_1)) == 0 {
                return Err(Status::NoOffsetsInPlane);
            }
            block
                .value_words
                .remove(ValueWords::I | ValueWords::J | ValueWords::K);
            if block.modal.units == UnitsMode::Inches {
                for idx in 0..N_AXIS {
                    if block.ijk_words & (1 << idx) != 0 {
                        block.values.ijk[idx] *= MM_PER_INCH;
                    }
                }
            }

            let target_r = hypot2(
                x - block.values.ijk[axis_0],
                y - block.values.ijk[axis_1],
            );
            block.values.r = hypot2(block.values.ijk[axis_0], block.values.ijk[axis_1]);

            let delta_r = (target_r - block.values.r).abs();
            if delta_r > 0.005 {
                if delta_r > 0.5 {
                    return Err(Status::InvalidTarget);
                }
                if delta_r > 0.001 * block.values.r {
                    return Err(Status::InvalidTarget);
                }
            }
        }
        Ok(())
    }
}

/// Assemble the mm machine-frame target from axis words: absolute words
/// get coordinate offsets applied, incremental words add to the parser
/// position, and G53 bypasses offsets entirely.
fn compute_target(
    block: &mut GcBlock,
    position: &MmVector,
    coord_system: &MmVector,
    coord_offset: &MmVector,
    absolute_override: bool,
) {
    if block.axis_words == 0 {
        return;
    }
    for idx in 0..N_AXIS {
        if block.axis_words & (1 << idx) == 0 {
            block.values.xyz[idx] = position[idx];
        } else if !absolute_override {
            if block.modal.distance == DistanceMode::Absolute {
                block.values.xyz[idx] += coord_system[idx] + coord_offset[idx];
            } else {
                block.values.xyz[idx] += position[idx];
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
