//! Jog executor: validated `$J=` motions that bypass the modal state.
//!
//! A jog behaves like a G1 move but never touches the parser's modal
//! state, ignores feed overrides, and is cancelable at any time without
//! raising an alarm. Targets are clamped against the soft travel
//! envelope before planning; machine coordinates run from 0 at home
//! into negative travel, so the legal span per axis is
//! `[-max_travel, 0]`.

use tracing::debug;

use kerf_common::consts::N_AXIS;
use kerf_common::state::SysState;
use kerf_common::status::Status;

use crate::parser::block::GcBlock;
use crate::planner::{PlanCondition, PlanLineData};
use crate::system::Machine;

impl Machine {
    /// Validate and start one jog motion from a parsed jog block.
    ///
    /// The parser has already enforced the jog-legal command set and the
    /// feed word; this checks the travel envelope, queues the move, and
    /// starts the cycle immediately when idle.
    pub fn jog_execute(&mut self, gc_block: &GcBlock) -> Result<(), Status> {
        if gc_block.axis_words == 0 {
            return Err(Status::InvalidJogCommand);
        }

        let pl_data = PlanLineData {
            feed_rate: gc_block.values.f,
            condition: PlanCondition::NO_FEED_OVERRIDE,
            line_number: gc_block.values.n,
        };
        if self.check_travel_limits(&gc_block.values.xyz) {
            return Err(Status::TravelExceeded);
        }

        self.mc_line(&gc_block.values.xyz, &pl_data);
        if self.sys.state == SysState::Idle && !self.planner.is_empty() {
            self.sys.state = SysState::Jog;
            self.stepper.prep_buffer(&mut self.planner, &mut self.sys);
            self.stepper.wake_up();
            debug!(target = ?gc_block.values.xyz, feed = pl_data.feed_rate, "jog started");
        }
        Ok(())
    }

    /// True when any target coordinate leaves the soft travel envelope.
    fn check_travel_limits(&self, target: &[f32; N_AXIS]) -> bool {
        for idx in 0..N_AXIS {
            let max_travel = self.settings.machine.axes[idx].max_travel;
            if target[idx] > 0.0 || target[idx] < -max_travel {
                return true;
            }
        }
        false
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsStore;
    use kerf_common::config::MachineSettings;

    fn machine() -> Machine {
        Machine::new(SettingsStore::new(MachineSettings::default()))
    }

    #[test]
    fn jog_inside_envelope_accepted() {
        let mut machine = machine();
        let mut block = GcBlock::default();
        block.axis_words = 1;
        block.values.f = 200.0;
        block.values.xyz = [-10.0, 0.0, 0.0];
        assert!(machine.jog_execute(&block).is_ok());
        assert_eq!(machine.sys.state, SysState::Jog);
        assert!(!machine.planner.is_empty());
    }

    #[test]
    fn jog_beyond_travel_rejected() {
        let mut machine = machine();
        let mut block = GcBlock::default();
        block.axis_words = 1;
        block.values.f = 200.0;
        // Default max_travel is 200 mm.
        block.values.xyz = [-500.0, 0.0, 0.0];
        assert_eq!(machine.jog_execute(&block), Err(Status::TravelExceeded));
        assert!(machine.planner.is_empty());

        block.values.xyz = [5.0, 0.0, 0.0];
        assert_eq!(machine.jog_execute(&block), Err(Status::TravelExceeded));
    }

    #[test]
    fn jog_without_axis_words_rejected() {
        let mut machine = machine();
        let mut block = GcBlock::default();
        block.values.f = 200.0;
        assert_eq!(machine.jog_execute(&block), Err(Status::InvalidJogCommand));
    }
}
