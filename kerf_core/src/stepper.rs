//! Step segment generator and pulse engine.
//!
//! Two halves around a single-producer/single-consumer segment queue.
//! The foreground half (`prep_buffer`) walks the executing plan block's
//! trapezoidal velocity profile and emits constant-velocity segments of
//! roughly `1 / ACCELERATION_TICKS_PER_SECOND` wall-clock seconds each.
//! The interrupt half (`step_tick`) consumes segments and runs a
//! Bresenham accumulator across all axes at the segment step rate,
//! pulsing the drivers and advancing `sys_position` step by step.
//!
//! At low step rates the prep applies adaptive multi-axis step smoothing
//! (AMASS): the Bresenham counters run at 2/4/8x the step rate with
//! proportionally scaled increments, dithering multi-axis timing without
//! changing the executed distance.
//!
//! A feed hold replaces the remainder of the profile with a deceleration
//! ramp to zero; the prep flags end-of-motion when the ramp lands, and
//! the pulse engine reports a cycle stop once the queue drains.

use std::sync::Arc;

use heapless::spsc::Queue;
use static_assertions::const_assert;
use tracing::trace;

use kerf_common::consts::{
    AMASS_LEVEL1_HZ, AMASS_LEVEL2_HZ, AMASS_LEVEL3_HZ, AMASS_MAX_LEVEL, DT_SEGMENT, N_AXIS,
    SEGMENT_BUFFER_SIZE, STEP_TIMER_HZ,
};
use kerf_common::exec::{ExecState, StepControl};

use crate::planner::{PlanBlock, Planner, compute_profile_nominal_speed};
use crate::system::{RtSignals, System};

// AMASS cutoffs expressed in timer cycles per step.
const AMASS_LEVEL1_CYCLES: u64 = (STEP_TIMER_HZ / AMASS_LEVEL1_HZ) as u64;
const AMASS_LEVEL2_CYCLES: u64 = (STEP_TIMER_HZ / AMASS_LEVEL2_HZ) as u64;
const AMASS_LEVEL3_CYCLES: u64 = (STEP_TIMER_HZ / AMASS_LEVEL3_HZ) as u64;

/// Segment must always hold at least one step; scales the minimum
/// distance a segment may leave behind.
const REQ_MM_INCREMENT_SCALAR: f32 = 1.25;

const_assert!(SEGMENT_BUFFER_SIZE >= 3);

// ─── Step driver seam ───────────────────────────────────────────────

/// Hardware seam for direction and step lines.
///
/// `begin_pulse` is the rising edge; `end_pulse` models the pulse-reset
/// interrupt that fires a configured pulse width later and returns the
/// step lines low. Direction lines are set once per block, before the
/// first pulse of the new direction.
pub trait StepDriver {
    fn set_directions(&mut self, dir_bits: u8);
    fn begin_pulse(&mut self, step_bits: u8);
    fn end_pulse(&mut self);
    /// Downcast hook for recording drivers.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Recording driver for the simulator and tests.
#[derive(Debug, Default)]
pub struct SimDriver {
    /// Configured step pulse high time [µs]. A hardware driver arms its
    /// pulse-reset timer with this; the recording driver only carries it.
    pub pulse_width_us: u8,
    /// Pulses issued per axis.
    pub step_counts: [u64; N_AXIS],
    /// Last commanded direction bits.
    pub dir_bits: u8,
    /// Total step events (any axis).
    pub pulses: u64,
    pulse_high: bool,
}

impl SimDriver {
    pub fn new(pulse_width_us: u8) -> Self {
        Self {
            pulse_width_us,
            ..Self::default()
        }
    }
}

impl StepDriver for SimDriver {
    fn set_directions(&mut self, dir_bits: u8) {
        self.dir_bits = dir_bits;
    }

    fn begin_pulse(&mut self, step_bits: u8) {
        // A second rising edge before reset would merge pulses on real
        // hardware; the recording driver treats it as a logic error.
        debug_assert!(!self.pulse_high, "overlapping step pulses");
        self.pulse_high = true;
        if step_bits != 0 {
            self.pulses += 1;
        }
        for idx in 0..N_AXIS {
            if step_bits & (1 << idx) != 0 {
                self.step_counts[idx] += 1;
            }
        }
    }

    fn end_pulse(&mut self) {
        self.pulse_high = false;
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ─── Data ───────────────────────────────────────────────────────────

/// Bresenham data for one plan block, pre-scaled by the maximum AMASS
/// level. Referenced by segments via index; immutable once written.
#[derive(Debug, Clone, Copy, Default)]
struct StBlock {
    steps: [u32; N_AXIS],
    step_event_count: u32,
    direction_bits: u8,
}

/// One constant-velocity slice of a plan block. Immutable once prepped.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Step events in this segment, AMASS-scaled.
    pub n_step: u16,
    /// Timer cycles between step events, AMASS-scaled.
    pub cycles_per_tick: u32,
    /// Which `StBlock` this segment steps through.
    st_block_index: u8,
    /// Oversampling shift applied to this segment.
    pub amass_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum RampType {
    #[default]
    Accel,
    Cruise,
    Decel,
    /// Entry speed above the overridden nominal; decelerate to it first.
    DecelOverride,
}

/// Foreground prep state: where the trapezoid walk currently is within
/// the executing block.
#[derive(Debug, Default)]
pub struct StPrep {
    /// A plan block is loaded and being tracked.
    block_loaded: bool,
    /// Reload only the velocity profile, not the Bresenham data.
    recalculate: bool,
    /// Next block must enter at the previous exit speed (mid-override
    /// deceleration spanning a block boundary).
    decel_override: bool,

    st_block_index: usize,
    steps_remaining: f32,
    step_per_mm: f32,
    req_mm_increment: f32,
    dt_remainder: f32,

    ramp_type: RampType,
    /// Distance before block end where forced deceleration lands [mm].
    mm_complete: f32,
    current_speed: f32,
    maximum_speed: f32,
    exit_speed: f32,
    /// Distance-from-end where the acceleration ramp stops [mm].
    accelerate_until: f32,
    /// Distance-from-end where the deceleration ramp starts [mm].
    decelerate_after: f32,
}

impl StPrep {
    /// Push the stepper's committed speed back into a plan block that
    /// the planner (or a hold) is about to re-plan, and force the next
    /// prep call to recompute the velocity profile.
    pub(crate) fn fold_into_block(&mut self, block: &mut PlanBlock) {
        if self.block_loaded {
            block.entry_speed_sqr = self.current_speed * self.current_speed;
            self.block_loaded = false;
            self.recalculate = true;
        }
    }

    /// Speed the profile walk is currently at [mm/min]. Feeds the `FS:`
    /// status report field.
    #[inline]
    pub fn current_speed(&self) -> f32 {
        self.current_speed
    }
}

/// Interrupt-side execution state.
#[derive(Debug, Default)]
struct StExec {
    counter: [u32; N_AXIS],
    steps: [u32; N_AXIS],
    step_event_count: u32,
    dir_bits: u8,
    segment: Option<Segment>,
    step_count: u16,
    loaded_block: Option<u8>,
}

// ─── Stepper ────────────────────────────────────────────────────────

/// The stepper executor: segment queue, prep and exec halves, and the
/// driver seam.
pub struct Stepper {
    blocks: [StBlock; SEGMENT_BUFFER_SIZE],
    segments: Queue<Segment, SEGMENT_BUFFER_SIZE>,
    pub prep: StPrep,
    exec: StExec,
    awake: bool,
    signals: Arc<RtSignals>,
    driver: Box<dyn StepDriver + Send>,
}

impl Stepper {
    pub fn new(signals: Arc<RtSignals>, driver: Box<dyn StepDriver + Send>) -> Self {
        Self {
            blocks: [StBlock::default(); SEGMENT_BUFFER_SIZE],
            segments: Queue::new(),
            prep: StPrep::default(),
            exec: StExec::default(),
            awake: false,
            signals,
            driver,
        }
    }

    /// Kill the pulse stream and clear all segment state. Position is
    /// whatever `sys_position` already recorded.
    pub fn reset(&mut self) {
        self.go_idle();
        self.prep = StPrep::default();
        self.exec = StExec::default();
        while self.segments.dequeue().is_some() {}
    }

    pub fn wake_up(&mut self) {
        self.awake = true;
    }

    pub fn go_idle(&mut self) {
        self.awake = false;
    }

    #[inline]
    pub fn is_awake(&self) -> bool {
        self.awake
    }

    /// Whether any prepped segments remain unexecuted.
    pub fn has_segments(&self) -> bool {
        !self.segments.is_empty() || self.exec.segment.is_some()
    }

    /// The recording driver, when one is installed.
    pub fn sim_driver(&self) -> Option<&SimDriver> {
        self.driver.as_any().downcast_ref::<SimDriver>()
    }

    /// The installed driver, for host and test inspection.
    pub fn driver_any(&self) -> &dyn std::any::Any {
        self.driver.as_any()
    }

    /// Fold the committed speed into the executing block. Called before
    /// hold initiation and override re-planning.
    pub fn update_plan_block_parameters(&mut self, planner: &mut Planner) {
        if let Some(block) = planner.current_block_mut() {
            self.prep.fold_into_block(block);
        }
    }

    // ── Prep half ───────────────────────────────────────────────────

    /// Fill the segment queue from the executing plan block.
    ///
    /// Runs in the main loop between I/O. Generates nothing once an
    /// end-of-motion has been flagged (hold landed); the realtime
    /// executor resets that flag when motion resumes.
    pub fn prep_buffer(&mut self, planner: &mut Planner, sys: &mut System) {
        if sys.step_control.contains(StepControl::END_MOTION) {
            return;
        }

        while !self.segments.is_full() {
            // ── Acquire and profile the executing block ──
            if !self.prep.block_loaded {
                if planner.current_block_mut().is_none() {
                    return;
                }

                if self.prep.recalculate {
                    self.prep.recalculate = false;
                } else {
                    // Load the Bresenham data, pre-scaled for AMASS.
                    let block = planner.current_block_mut().unwrap();
                    self.prep.st_block_index =
                        (self.prep.st_block_index + 1) % SEGMENT_BUFFER_SIZE;
                    let st_block = &mut self.blocks[self.prep.st_block_index];
                    st_block.direction_bits = block.direction_bits;
                    for idx in 0..N_AXIS {
                        st_block.steps[idx] = block.steps[idx] << AMASS_MAX_LEVEL;
                    }
                    st_block.step_event_count = block.step_event_count << AMASS_MAX_LEVEL;

                    self.prep.steps_remaining = block.step_event_count as f32;
                    self.prep.step_per_mm = self.prep.steps_remaining / block.millimeters;
                    self.prep.req_mm_increment = REQ_MM_INCREMENT_SCALAR / self.prep.step_per_mm;
                    self.prep.dt_remainder = 0.0;

                    if sys.step_control.contains(StepControl::EXECUTE_HOLD)
                        || self.prep.decel_override
                    {
                        // New block loaded mid-hold: enter at the prior
                        // exit speed and keep decelerating.
                        self.prep.current_speed = self.prep.exit_speed;
                        block.entry_speed_sqr = self.prep.exit_speed * self.prep.exit_speed;
                        self.prep.decel_override = false;
                    } else {
                        self.prep.current_speed = block.entry_speed_sqr.sqrt();
                    }
                }
                self.prep.block_loaded = true;

                // ── Velocity profile for the (re)loaded block ──
                let exit_speed_sqr_next = planner.exec_block_exit_speed_sqr();
                let f_override = sys.f_override;
                let r_override = sys.r_override;
                let block = planner.current_block_mut().unwrap();

                self.prep.mm_complete = 0.0;
                let inv_2_accel = 0.5 / block.acceleration;
                if sys.step_control.contains(StepControl::EXECUTE_HOLD) {
                    // Forced deceleration to zero within this block if it
                    // fits, else ramp down as far as the block allows.
                    self.prep.ramp_type = RampType::Decel;
                    let decel_dist = block.millimeters - inv_2_accel * block.entry_speed_sqr;
                    if decel_dist < 0.0 {
                        self.prep.exit_speed = (block.entry_speed_sqr
                            - 2.0 * block.acceleration * block.millimeters)
                            .max(0.0)
                            .sqrt();
                    } else {
                        self.prep.mm_complete = decel_dist;
                        self.prep.exit_speed = 0.0;
                    }
                } else {
                    self.prep.ramp_type = RampType::Accel;
                    self.prep.accelerate_until = block.millimeters;

                    let exit_speed_sqr = exit_speed_sqr_next;
                    self.prep.exit_speed = exit_speed_sqr.sqrt();

                    let nominal_speed =
                        compute_profile_nominal_speed(block, f_override, r_override);
                    let nominal_speed_sqr = nominal_speed * nominal_speed;
                    let intersect_distance = 0.5
                        * (block.millimeters
                            + inv_2_accel * (block.entry_speed_sqr - exit_speed_sqr));

                    if block.entry_speed_sqr > nominal_speed_sqr {
                        // Override was lowered mid-queue: shed speed first.
                        self.prep.accelerate_until = block.millimeters
                            - inv_2_accel * (block.entry_speed_sqr - nominal_speed_sqr);
                        if self.prep.accelerate_until <= 0.0 {
                            // Deceleration-only; the next block continues it.
                            self.prep.ramp_type = RampType::Decel;
                            self.prep.exit_speed = (block.entry_speed_sqr
                                - 2.0 * block.acceleration * block.millimeters)
                                .max(0.0)
                                .sqrt();
                            self.prep.decel_override = true;
                        } else {
                            self.prep.decelerate_after =
                                inv_2_accel * (nominal_speed_sqr - exit_speed_sqr);
                            self.prep.maximum_speed = nominal_speed;
                            self.prep.ramp_type = RampType::DecelOverride;
                        }
                    } else if intersect_distance > 0.0 {
                        if intersect_distance < block.millimeters {
                            // Trapezoid or triangle.
                            self.prep.decelerate_after =
                                inv_2_accel * (nominal_speed_sqr - exit_speed_sqr);
                            if self.prep.decelerate_after < intersect_distance {
                                // Trapezoid.
                                self.prep.maximum_speed = nominal_speed;
                                if block.entry_speed_sqr == nominal_speed_sqr {
                                    self.prep.ramp_type = RampType::Cruise;
                                } else {
                                    self.prep.accelerate_until -=
                                        inv_2_accel * (nominal_speed_sqr - block.entry_speed_sqr);
                                }
                            } else {
                                // Triangle.
                                self.prep.accelerate_until = intersect_distance;
                                self.prep.decelerate_after = intersect_distance;
                                self.prep.maximum_speed = (2.0
                                    * block.acceleration
                                    * intersect_distance
                                    + exit_speed_sqr)
                                    .sqrt();
                            }
                        } else {
                            // Deceleration-only.
                            self.prep.ramp_type = RampType::Decel;
                        }
                    } else {
                        // Acceleration-only.
                        self.prep.accelerate_until = 0.0;
                        self.prep.maximum_speed = self.prep.exit_speed;
                    }
                }
            }

            // ── Generate one segment by integrating the profile ──
            let block = planner.current_block_mut().unwrap();

            let mut dt_max = DT_SEGMENT;
            let mut dt = 0.0f32;
            let mut time_var = dt_max;
            let mut mm_remaining = block.millimeters;
            let minimum_mm = (mm_remaining - self.prep.req_mm_increment).max(0.0);

            loop {
                match self.prep.ramp_type {
                    RampType::DecelOverride => {
                        let speed_var = block.acceleration * time_var;
                        if self.prep.current_speed - self.prep.maximum_speed <= speed_var {
                            // Reached the overridden nominal: cruise.
                            mm_remaining = self.prep.accelerate_until;
                            time_var = 2.0 * (block.millimeters - mm_remaining)
                                / (self.prep.current_speed + self.prep.maximum_speed);
                            self.prep.ramp_type = RampType::Cruise;
                            self.prep.current_speed = self.prep.maximum_speed;
                        } else {
                            mm_remaining -=
                                time_var * (self.prep.current_speed - 0.5 * speed_var);
                            self.prep.current_speed -= speed_var;
                        }
                    }
                    RampType::Accel => {
                        let speed_var = block.acceleration * time_var;
                        mm_remaining -= time_var * (self.prep.current_speed + 0.5 * speed_var);
                        if mm_remaining < self.prep.accelerate_until {
                            // Ramp junction or end of block.
                            mm_remaining = self.prep.accelerate_until;
                            time_var = 2.0 * (block.millimeters - mm_remaining)
                                / (self.prep.current_speed + self.prep.maximum_speed);
                            if mm_remaining == self.prep.decelerate_after {
                                self.prep.ramp_type = RampType::Decel;
                            } else {
                                self.prep.ramp_type = RampType::Cruise;
                            }
                            self.prep.current_speed = self.prep.maximum_speed;
                        } else {
                            self.prep.current_speed += speed_var;
                        }
                    }
                    RampType::Cruise => {
                        let mm_var = mm_remaining - self.prep.maximum_speed * time_var;
                        if mm_var < self.prep.decelerate_after {
                            // Cruise-deceleration junction or end of block.
                            time_var = (mm_remaining - self.prep.decelerate_after)
                                / self.prep.maximum_speed;
                            mm_remaining = self.prep.decelerate_after;
                            self.prep.ramp_type = RampType::Decel;
                        } else {
                            mm_remaining = mm_var;
                        }
                    }
                    RampType::Decel => {
                        let speed_var = block.acceleration * time_var;
                        let mut ramp_done = true;
                        if self.prep.current_speed > speed_var {
                            let mm_var = mm_remaining
                                - time_var * (self.prep.current_speed - 0.5 * speed_var);
                            if mm_var > self.prep.mm_complete {
                                mm_remaining = mm_var;
                                self.prep.current_speed -= speed_var;
                                ramp_done = false;
                            }
                        }
                        if ramp_done {
                            // End of block or end of forced deceleration.
                            let denom = self.prep.current_speed + self.prep.exit_speed;
                            time_var = if denom > 0.0 {
                                2.0 * (mm_remaining - self.prep.mm_complete) / denom
                            } else {
                                // Held at standstill before the first step.
                                0.0
                            };
                            mm_remaining = self.prep.mm_complete;
                            self.prep.current_speed = self.prep.exit_speed;
                        }
                    }
                }

                dt += time_var;
                if dt < dt_max {
                    time_var = dt_max - dt;
                } else if mm_remaining > minimum_mm {
                    // Very slow motion: stretch the segment until it
                    // holds at least one step.
                    dt_max += DT_SEGMENT;
                    time_var = dt_max - dt;
                } else {
                    break;
                }
                if mm_remaining <= self.prep.mm_complete {
                    break;
                }
            }

            // ── Convert the slice to steps and a timer period ──
            let step_dist_remaining = self.prep.step_per_mm * mm_remaining;
            let n_steps_remaining = step_dist_remaining.ceil();
            let last_n_steps_remaining = self.prep.steps_remaining.ceil();
            let mut n_step = (last_n_steps_remaining - n_steps_remaining) as u32;

            if n_step == 0 && sys.step_control.contains(StepControl::EXECUTE_HOLD) {
                // Less than one step left to decelerate: close enough.
                sys.step_control.insert(StepControl::END_MOTION);
                return;
            }

            dt += self.prep.dt_remainder;
            let inv_rate = dt / (last_n_steps_remaining - step_dist_remaining);

            let mut cycles = ((STEP_TIMER_HZ as f32 * 60.0) * inv_rate).ceil() as u64;
            let amass_level: u8 = if cycles < AMASS_LEVEL1_CYCLES {
                0
            } else if cycles < AMASS_LEVEL2_CYCLES {
                1
            } else if cycles < AMASS_LEVEL3_CYCLES {
                2
            } else {
                AMASS_MAX_LEVEL
            };
            if amass_level > 0 {
                cycles >>= amass_level;
                n_step <<= amass_level;
            }
            let segment = Segment {
                n_step: n_step.min(u16::MAX as u32) as u16,
                cycles_per_tick: cycles.min(0xFFFF) as u32,
                st_block_index: self.prep.st_block_index as u8,
                amass_level,
            };
            // Queue capacity was checked at loop entry.
            let _ = self.segments.enqueue(segment);
            trace!(
                n_step = segment.n_step,
                cycles = segment.cycles_per_tick,
                amass = segment.amass_level,
                "segment prepped"
            );

            block.millimeters = mm_remaining;
            self.prep.steps_remaining = n_steps_remaining;
            self.prep.dt_remainder = (n_steps_remaining - step_dist_remaining) * inv_rate;

            if mm_remaining == self.prep.mm_complete {
                if mm_remaining > 0.0 {
                    // Forced deceleration landed mid-block. Hold position
                    // here; resume re-preps from the leftover distance.
                    sys.step_control.insert(StepControl::END_MOTION);
                    return;
                }
                // Block fully segmented.
                self.prep.block_loaded = false;
                planner.discard_current_block();
            }
        }
    }

    // ── Pulse half ──────────────────────────────────────────────────

    /// One step-timer interrupt: advance the Bresenham accumulators,
    /// pulse the drivers, and count `sys_position`.
    ///
    /// Returns the timer cycles until the next call, or `None` when the
    /// queue is drained and the pulse engine went idle.
    pub fn step_tick(&mut self) -> Option<u32> {
        if !self.awake {
            return None;
        }

        if self.exec.segment.is_none() {
            match self.segments.dequeue() {
                Some(segment) => {
                    // New block boundary: reset the accumulators and set
                    // the direction lines before the first pulse.
                    if self.exec.loaded_block != Some(segment.st_block_index) {
                        let st_block = &self.blocks[segment.st_block_index as usize];
                        self.exec.dir_bits = st_block.direction_bits;
                        self.driver.set_directions(st_block.direction_bits);
                        self.exec.step_event_count = st_block.step_event_count;
                        let half = st_block.step_event_count >> 1;
                        self.exec.counter = [half; N_AXIS];
                        self.exec.loaded_block = Some(segment.st_block_index);
                    }
                    let st_block = &self.blocks[segment.st_block_index as usize];
                    for idx in 0..N_AXIS {
                        self.exec.steps[idx] = st_block.steps[idx] >> segment.amass_level;
                    }
                    self.exec.step_count = segment.n_step;
                    self.exec.segment = Some(segment);
                }
                None => {
                    // Queue empty: motion complete or hold landed.
                    self.go_idle();
                    self.signals.set_exec(ExecState::CYCLE_STOP);
                    return None;
                }
            }
        }

        let segment = self.exec.segment.unwrap();

        let mut step_bits: u8 = 0;
        for idx in 0..N_AXIS {
            self.exec.counter[idx] = self.exec.counter[idx].wrapping_add(self.exec.steps[idx]);
            if self.exec.counter[idx] > self.exec.step_event_count {
                step_bits |= 1 << idx;
                self.exec.counter[idx] -= self.exec.step_event_count;
                if self.exec.dir_bits & (1 << idx) != 0 {
                    self.signals.step(idx, -1);
                } else {
                    self.signals.step(idx, 1);
                }
            }
        }

        self.driver.begin_pulse(step_bits);
        self.driver.end_pulse();

        self.exec.step_count -= 1;
        if self.exec.step_count == 0 {
            self.exec.segment = None;
        }

        Some(segment.cycles_per_tick)
    }

    /// Current profile speed, for status reports [mm/min].
    pub fn realtime_rate(&self) -> f32 {
        if self.awake { self.prep.current_speed() } else { 0.0 }
    }
}

impl std::fmt::Debug for Stepper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stepper")
            .field("awake", &self.awake)
            .field("prep", &self.prep)
            .field("exec", &self.exec)
            .field("queued_segments", &self.segments.len())
            .finish()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlanLineData;
    use kerf_common::config::MachineSettings;

    fn setup() -> (Stepper, Planner, System, Arc<RtSignals>) {
        let signals = Arc::new(RtSignals::new());
        let sys = System::new(Arc::clone(&signals));
        let stepper = Stepper::new(Arc::clone(&signals), Box::new(SimDriver::default()));
        (stepper, Planner::new(), sys, signals)
    }

    fn queue_move(
        planner: &mut Planner,
        prep: &mut StPrep,
        target: [f32; N_AXIS],
        feed: f32,
    ) {
        let pl_data = PlanLineData {
            feed_rate: feed,
            ..PlanLineData::default()
        };
        assert!(planner.buffer_line(
            &target,
            &pl_data,
            &MachineSettings::default(),
            100,
            100,
            prep,
        ));
    }

    /// Run prep and pulse ticks until the queue drains. Returns ticks.
    fn drain(stepper: &mut Stepper, planner: &mut Planner, sys: &mut System) -> u64 {
        stepper.wake_up();
        let mut ticks = 0u64;
        loop {
            stepper.prep_buffer(planner, sys);
            if stepper.step_tick().is_none() {
                break;
            }
            ticks += 1;
            assert!(ticks < 50_000_000, "runaway pulse stream");
        }
        ticks
    }

    #[test]
    fn block_executes_exact_step_count() {
        let (mut stepper, mut planner, mut sys, signals) = setup();
        queue_move(&mut planner, &mut stepper.prep, [1.0, 0.5, 0.0], 400.0);

        drain(&mut stepper, &mut planner, &mut sys);

        // 250 steps/mm defaults: 250 X steps, 125 Y steps.
        assert_eq!(signals.position_snapshot(), [250, 125, 0]);
        let driver = stepper.sim_driver().unwrap();
        assert_eq!(driver.step_counts, [250, 125, 0]);
        assert!(planner.is_empty());
        assert!(!stepper.has_segments());
    }

    #[test]
    fn negative_moves_count_down() {
        let (mut stepper, mut planner, mut sys, signals) = setup();
        queue_move(&mut planner, &mut stepper.prep, [-2.0, 0.0, 0.0], 400.0);
        drain(&mut stepper, &mut planner, &mut sys);
        assert_eq!(signals.position_snapshot(), [-500, 0, 0]);
    }

    #[test]
    fn queue_drain_requests_cycle_stop() {
        let (mut stepper, mut planner, mut sys, signals) = setup();
        queue_move(&mut planner, &mut stepper.prep, [0.2, 0.0, 0.0], 400.0);
        drain(&mut stepper, &mut planner, &mut sys);
        assert!(!stepper.is_awake());
        let taken = signals.take_exec();
        assert!(taken.contains(ExecState::CYCLE_STOP));
    }

    #[test]
    fn amass_oversamples_slow_motion() {
        let (mut stepper, mut planner, mut sys, signals) = setup();
        // 20 mm/min is ~83 steps/s, far below the 2 kHz band: every
        // step event is dithered across 8 ticks.
        queue_move(&mut planner, &mut stepper.prep, [0.1, 0.0, 0.0], 20.0);
        let ticks = drain(&mut stepper, &mut planner, &mut sys);

        assert_eq!(signals.position_snapshot()[0], 25);
        let driver = stepper.sim_driver().unwrap();
        assert_eq!(driver.step_counts[0], 25);
        // Oversampling means many more timer ticks than steps.
        assert!(ticks >= 8 * 25, "only {ticks} ticks for 25 steps");
    }

    #[test]
    fn idle_stepper_ticks_none() {
        let (mut stepper, mut planner, mut sys, _signals) = setup();
        assert!(stepper.step_tick().is_none());
        queue_move(&mut planner, &mut stepper.prep, [1.0, 0.0, 0.0], 400.0);
        stepper.prep_buffer(&mut planner, &mut sys);
        // Still asleep: prepped segments wait for wake_up.
        assert!(stepper.step_tick().is_none());
        assert!(stepper.has_segments());
    }

    #[test]
    fn hold_ramps_down_and_flags_end_motion() {
        let (mut stepper, mut planner, mut sys, signals) = setup();
        queue_move(&mut planner, &mut stepper.prep, [100.0, 0.0, 0.0], 300.0);

        // Execute part of the move.
        stepper.wake_up();
        for _ in 0..4000 {
            stepper.prep_buffer(&mut planner, &mut sys);
            stepper.step_tick();
        }
        let before_hold = signals.position_snapshot()[0];
        assert!(before_hold > 0);

        // Initiate the hold the way the realtime executor does.
        stepper.update_plan_block_parameters(&mut planner);
        sys.step_control = StepControl::EXECUTE_HOLD;

        drain(&mut stepper, &mut planner, &mut sys);
        assert!(sys.step_control.contains(StepControl::END_MOTION));

        // Stopped after a short ramp, well before the 25000-step target.
        let parked = signals.position_snapshot()[0];
        assert!(parked >= before_hold);
        assert!(parked < 25_000);
        // The plan block survives the hold for the resume.
        assert!(!planner.is_empty());
    }

    #[test]
    fn realtime_rate_tracks_wake_state() {
        let (mut stepper, mut planner, mut sys, _signals) = setup();
        assert_eq!(stepper.realtime_rate(), 0.0);
        queue_move(&mut planner, &mut stepper.prep, [10.0, 0.0, 0.0], 300.0);
        stepper.wake_up();
        for _ in 0..2000 {
            stepper.prep_buffer(&mut planner, &mut sys);
            stepper.step_tick();
        }
        assert!(stepper.realtime_rate() > 0.0);
    }
}
