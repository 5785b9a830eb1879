//! Motion control: the seam between validated g-code commands and the
//! planner queue.
//!
//! Lines go straight to the planner once the ring has room, yielding to
//! the realtime executor while full. Arcs decompose into chord segments
//! sized by the arc tolerance, advanced with a small-angle rotation
//! matrix and periodically re-anchored with exact trig. Dwell drains
//! the queue and sleeps in small slices so realtime commands stay
//! responsive throughout.

use std::f32::consts::PI;

use tracing::debug;

use kerf_common::axis::MmVector;
use kerf_common::consts::{DWELL_TIME_STEP_MS, N_ARC_CORRECTION};
use kerf_common::state::{PosUpdate, SysState};

use crate::planner::{PlanCondition, PlanLineData};
use crate::system::Machine;

/// Arc travel below this angle [rad] counts as zero for direction fixup.
const ARC_ANGULAR_TRAVEL_EPSILON: f32 = 5e-7;

impl Machine {
    /// Queue one linear move, blocking on queue room.
    ///
    /// While the ring is full the machine keeps executing: realtime
    /// commands run, an auto cycle-start kicks the stepper, and the
    /// pulse engine is pumped. Check mode queues nothing.
    pub fn mc_line(&mut self, target: &MmVector, pl_data: &PlanLineData) {
        if self.sys.state == SysState::CheckCode {
            return;
        }

        while self.planner.is_full() {
            self.protocol_auto_cycle_start();
            if self.protocol_execute_realtime() {
                return; // Aborted mid-wait.
            }
            self.pump_steps(64);
        }
        if self.sys.abort {
            return;
        }

        self.planner.buffer_line(
            target,
            pl_data,
            &self.settings.machine,
            self.sys.f_override,
            self.sys.r_override,
            &mut self.stepper.prep,
        );
    }

    /// Decompose an arc into planner chords.
    ///
    /// `position` is the current parser position, `offset` the center
    /// offset from it, and `radius` the start radius. The chord count
    /// keeps the sagitta within the arc tolerance; the rotation uses a
    /// third-order small-angle approximation, re-anchored with exact
    /// sin/cos every `N_ARC_CORRECTION` chords to cancel drift.
    #[allow(clippy::too_many_arguments)]
    pub fn mc_arc(
        &mut self,
        target: &MmVector,
        pl_data: &PlanLineData,
        position: &MmVector,
        offset: &MmVector,
        radius: f32,
        axis_0: usize,
        axis_1: usize,
        axis_linear: usize,
        is_clockwise: bool,
    ) {
        let mut pl_data = *pl_data;
        let mut position = *position;

        let center_0 = position[axis_0] + offset[axis_0];
        let center_1 = position[axis_1] + offset[axis_1];
        // Radius vector from center to current location.
        let mut r_0 = -offset[axis_0];
        let mut r_1 = -offset[axis_1];
        let rt_0 = target[axis_0] - center_0;
        let rt_1 = target[axis_1] - center_1;

        // CCW angle between position and target from the circle center.
        let mut angular_travel = (r_0 * rt_1 - r_1 * rt_0).atan2(r_0 * rt_0 + r_1 * rt_1);
        if is_clockwise {
            if angular_travel >= -ARC_ANGULAR_TRAVEL_EPSILON {
                angular_travel -= 2.0 * PI;
            }
        } else if angular_travel <= ARC_ANGULAR_TRAVEL_EPSILON {
            angular_travel += 2.0 * PI;
        }

        // Chord count from the sagitta bound. Segment endpoints sit on
        // the arc, so the radius may shrink by up to the tolerance.
        let arc_tolerance = self.settings.machine.arc_tolerance;
        let segments = ((0.5 * angular_travel * radius).abs()
            / (arc_tolerance * (2.0 * radius - arc_tolerance)).sqrt())
        .floor() as u32;

        debug!(segments, angular_travel, radius, "arc decomposition");

        if segments > 0 {
            // An inverse-time arc applies its rate to the whole motion;
            // distribute it across the chords and continue as G94.
            if pl_data.condition.contains(PlanCondition::INVERSE_TIME) {
                pl_data.feed_rate *= segments as f32;
                pl_data.condition.remove(PlanCondition::INVERSE_TIME);
            }

            let theta_per_segment = angular_travel / segments as f32;
            let linear_per_segment = (target[axis_linear] - position[axis_linear]) / segments as f32;

            // Third-order small-angle approximation of cos/sin.
            let mut cos_t = 2.0 - theta_per_segment * theta_per_segment;
            let sin_t = theta_per_segment * 0.166_666_67 * (cos_t + 4.0);
            cos_t *= 0.5;

            let mut count: u32 = 0;
            for i in 1..segments {
                if count < N_ARC_CORRECTION {
                    // Rotate the radius vector by the per-chord angle.
                    let r_i = r_0 * sin_t + r_1 * cos_t;
                    r_0 = r_0 * cos_t - r_1 * sin_t;
                    r_1 = r_i;
                    count += 1;
                } else {
                    // Exact correction to cancel accumulated drift.
                    let cos_ti = (i as f32 * theta_per_segment).cos();
                    let sin_ti = (i as f32 * theta_per_segment).sin();
                    r_0 = -offset[axis_0] * cos_ti + offset[axis_1] * sin_ti;
                    r_1 = -offset[axis_0] * sin_ti - offset[axis_1] * cos_ti;
                    count = 0;
                }

                position[axis_0] = center_0 + r_0;
                position[axis_1] = center_1 + r_1;
                position[axis_linear] += linear_per_segment;
                self.mc_line(&position, &pl_data);
                if self.sys.abort || self.sys.state == SysState::Alarm {
                    return;
                }
            }
        }
        // Land exactly on the programmed target.
        self.mc_line(target, &pl_data);
    }

    /// G4 dwell: drain the queue, then wait with realtime polling.
    pub fn mc_dwell(&mut self, seconds: f32) {
        if self.sys.state == SysState::CheckCode {
            return;
        }
        self.protocol_buffer_synchronize();

        let mut remaining_ms = (seconds * 1000.0).max(0.0) as u64;
        while remaining_ms > 0 {
            if self.sys.abort || self.protocol_execute_realtime() {
                return;
            }
            let slice = remaining_ms.min(DWELL_TIME_STEP_MS);
            std::thread::sleep(std::time::Duration::from_millis(slice));
            remaining_ms -= slice;
        }
    }

    /// Probe dispatch shell: run the probing move to completion, then
    /// report the position update policy for the parser.
    ///
    /// The probe input itself lives outside the core; this shell
    /// executes the motion and hands back `PosUpdate::System` so the
    /// parser re-reads the machine position the cycle actually reached.
    pub fn mc_probe_cycle(&mut self, target: &MmVector, pl_data: &PlanLineData) -> PosUpdate {
        if self.sys.state == SysState::CheckCode || self.sys.abort {
            return PosUpdate::None;
        }
        // Finish all queued motion before probing starts.
        self.protocol_buffer_synchronize();

        self.mc_line(target, pl_data);
        self.sys.signals.set_exec(kerf_common::exec::ExecState::CYCLE_START);
        self.protocol_buffer_synchronize();

        PosUpdate::System
    }
}
