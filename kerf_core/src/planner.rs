//! Look-ahead planner: ring-buffered reverse/forward optimizer.
//!
//! Each queued linear move becomes a [`PlanBlock`] with a junction speed
//! derived from the corner angle and the junction-deviation setting.
//! Every insertion (and every override change) re-runs the two-pass
//! optimization, bounded by the `planned` index: blocks behind it are
//! already at an optimal profile and are excluded from future passes.
//!
//! The tail block is the one under execution. The stepper reads it and
//! tracks its remaining distance; when the optimizer needs to re-plan
//! the tail, it first folds the stepper's committed speed back into the
//! block entry so the executing profile stays continuous.

use tracing::debug;

use kerf_common::axis::{
    MmVector, StepVector, limit_by_axis_maximum, mm_to_steps, to_unit_vector,
};
use kerf_common::consts::{
    BLOCK_BUFFER_SIZE, MINIMUM_FEED_RATE, MINIMUM_JUNCTION_SPEED, N_AXIS,
};
use kerf_common::config::MachineSettings;

use bitflags::bitflags;
use static_assertions::const_assert;

use crate::stepper::StPrep;

// Ring indices assume at least one free slot to distinguish full/empty.
const_assert!(BLOCK_BUFFER_SIZE >= 3);

/// Stand-in for an unbounded speed ceiling [mm/min], squared-safe in f32.
const SOME_LARGE_VALUE: f32 = 1.0e18;

bitflags! {
    /// Per-block condition flags, set at insertion and immutable after.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PlanCondition: u8 {
        /// G0-class move: rate is the rapid ceiling, rapid override applies.
        const RAPID_MOTION     = 0x01;
        /// G93 block: programmed rate arrived as 1/min and was converted.
        const INVERSE_TIME     = 0x02;
        /// Feed override is ignored (jogs, probes).
        const NO_FEED_OVERRIDE = 0x04;
    }
}

/// Per-move planner input from the parser or jog executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanLineData {
    /// Programmed feed [mm/min], or 1/min in inverse-time blocks.
    pub feed_rate: f32,
    pub condition: PlanCondition,
    pub line_number: u32,
}

/// One linear move in step space with its velocity plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanBlock {
    /// Unsigned step counts per axis.
    pub steps: [u32; N_AXIS],
    /// Steps of the dominant axis; Bresenham event count.
    pub step_event_count: u32,
    /// Bit per axis moving in the negative direction.
    pub direction_bits: u8,
    pub condition: PlanCondition,
    pub line_number: u32,

    /// Current planned entry speed² [mm²/min²].
    pub entry_speed_sqr: f32,
    /// Junction- and nominal-speed ceiling on entry speed² [mm²/min²].
    pub max_entry_speed_sqr: f32,
    /// Acceleration along the move [mm/min²].
    pub acceleration: f32,
    /// Remaining travel [mm]. Mutated by segment prep as it executes.
    pub millimeters: f32,

    /// Junction speed ceiling with the previous block [mm²/min²].
    pub max_junction_speed_sqr: f32,
    /// Axis-limited rapid ceiling along this direction [mm/min].
    pub rapid_rate: f32,
    /// Programmed rate before overrides [mm/min].
    pub programmed_rate: f32,
    /// Unit vector along the move, machine frame.
    pub unit_vec: MmVector,
}

/// Override-scaled nominal speed for a block [mm/min].
pub fn compute_profile_nominal_speed(block: &PlanBlock, f_override: u8, r_override: u8) -> f32 {
    let mut nominal = block.programmed_rate;
    if block.condition.contains(PlanCondition::RAPID_MOTION) {
        nominal *= 0.01 * r_override as f32;
    } else {
        if !block.condition.contains(PlanCondition::NO_FEED_OVERRIDE) {
            nominal *= 0.01 * f_override as f32;
        }
        if nominal > block.rapid_rate {
            nominal = block.rapid_rate;
        }
    }
    nominal.max(MINIMUM_FEED_RATE)
}

/// Cap a block's entry ceiling by its junction speed and by the slower
/// of its own and the previous block's nominal speed.
fn compute_profile_parameters(block: &mut PlanBlock, nominal_speed: f32, prev_nominal_speed: f32) {
    let slower = nominal_speed.min(prev_nominal_speed);
    block.max_entry_speed_sqr = (slower * slower).min(block.max_junction_speed_sqr);
}

/// The look-ahead planner ring.
#[derive(Debug)]
pub struct Planner {
    buffer: [PlanBlock; BLOCK_BUFFER_SIZE],
    /// Index of the next insertion slot.
    head: usize,
    /// Index of the executing block.
    tail: usize,
    /// Optimization boundary: blocks from `tail` up to `planned` are
    /// final and skipped by both passes.
    planned: usize,

    /// Planner's shadow of the end-of-queue position, steps.
    position_steps: StepVector,
    previous_unit_vec: MmVector,
    previous_nominal_speed: f32,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub fn new() -> Self {
        Self {
            buffer: [PlanBlock::default(); BLOCK_BUFFER_SIZE],
            head: 0,
            tail: 0,
            planned: 0,
            position_steps: [0; N_AXIS],
            previous_unit_vec: [0.0; N_AXIS],
            previous_nominal_speed: 0.0,
        }
    }

    /// Drop all queued blocks and optimizer history. Callers resync the
    /// position afterwards.
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.planned = 0;
        self.previous_unit_vec = [0.0; N_AXIS];
        self.previous_nominal_speed = 0.0;
    }

    /// Point the shadow position at the live machine position.
    pub fn sync_position(&mut self, sys_steps: &StepVector) {
        self.position_steps = *sys_steps;
    }

    #[inline]
    fn next_index(index: usize) -> usize {
        (index + 1) % BLOCK_BUFFER_SIZE
    }

    #[inline]
    fn prev_index(index: usize) -> usize {
        (index + BLOCK_BUFFER_SIZE - 1) % BLOCK_BUFFER_SIZE
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        Self::next_index(self.head) == self.tail
    }

    /// Queued block count.
    pub fn block_count(&self) -> usize {
        (self.head + BLOCK_BUFFER_SIZE - self.tail) % BLOCK_BUFFER_SIZE
    }

    /// The block under execution, mutable for the segment prep's
    /// remaining-distance tracking.
    pub fn current_block_mut(&mut self) -> Option<&mut PlanBlock> {
        if self.is_empty() {
            None
        } else {
            Some(&mut self.buffer[self.tail])
        }
    }

    /// Executing block's exit speed²: the entry of the block behind it,
    /// or zero when it is the last one queued.
    pub fn exec_block_exit_speed_sqr(&self) -> f32 {
        let next = Self::next_index(self.tail);
        if next == self.head {
            0.0
        } else {
            self.buffer[next].entry_speed_sqr
        }
    }

    /// Release the executing block after its last segment is prepped.
    pub fn discard_current_block(&mut self) {
        if !self.is_empty() {
            if self.tail == self.planned {
                self.planned = Self::next_index(self.tail);
            }
            self.tail = Self::next_index(self.tail);
        }
    }

    /// Tail-to-head view of the queue, newest last. Test and report use.
    pub fn blocks(&self) -> impl Iterator<Item = &PlanBlock> {
        let mut index = self.tail;
        let head = self.head;
        std::iter::from_fn(move || {
            if index == head {
                None
            } else {
                let block = &self.buffer[index];
                index = Self::next_index(index);
                Some(block)
            }
        })
    }

    /// Append one linear move to the queue and re-optimize.
    ///
    /// Returns `false` for a zero-step move (nothing queued). The caller
    /// guarantees the queue is not full.
    pub fn buffer_line(
        &mut self,
        target: &MmVector,
        pl_data: &PlanLineData,
        settings: &MachineSettings,
        f_override: u8,
        r_override: u8,
        prep: &mut StPrep,
    ) -> bool {
        let steps_per_mm = settings.steps_per_mm();
        let accel_limits = settings.accelerations_per_min2();
        let rate_limits = settings.max_rates();

        let mut block = PlanBlock {
            condition: pl_data.condition,
            line_number: pl_data.line_number,
            ..PlanBlock::default()
        };

        // Step deltas from the planner's shadow position; the unit vector
        // comes from the step-quantized deltas so planner and stepper
        // agree on the geometry.
        let mut target_steps = [0i32; N_AXIS];
        let mut unit_vec = [0.0f32; N_AXIS];
        for idx in 0..N_AXIS {
            target_steps[idx] = mm_to_steps(target[idx], steps_per_mm[idx]);
            let delta_steps = target_steps[idx] - self.position_steps[idx];
            block.steps[idx] = delta_steps.unsigned_abs();
            block.step_event_count = block.step_event_count.max(block.steps[idx]);
            let delta_mm = delta_steps as f32 / steps_per_mm[idx];
            unit_vec[idx] = delta_mm;
            if delta_mm < 0.0 {
                block.direction_bits |= 1 << idx;
            }
        }

        if block.step_event_count == 0 {
            return false;
        }

        block.millimeters = to_unit_vector(&mut unit_vec);
        block.unit_vec = unit_vec;
        block.acceleration = limit_by_axis_maximum(&accel_limits, &unit_vec);
        block.rapid_rate = limit_by_axis_maximum(&rate_limits, &unit_vec);

        if block.condition.contains(PlanCondition::RAPID_MOTION) {
            block.programmed_rate = block.rapid_rate;
        } else {
            block.programmed_rate = pl_data.feed_rate;
            if block.condition.contains(PlanCondition::INVERSE_TIME) {
                block.programmed_rate *= block.millimeters;
            }
        }

        if self.is_empty() {
            // First block, or first after a synchronous stop: the machine
            // is at rest, so the junction speed is zero.
            block.entry_speed_sqr = 0.0;
            block.max_junction_speed_sqr = 0.0;
        } else {
            // cos(θ) from the negated dot product of the bounding unit
            // vectors, so 180° of travel (straight line) maps to -1.
            let mut junction_cos_theta = 0.0;
            let mut junction_unit_vec = [0.0f32; N_AXIS];
            for idx in 0..N_AXIS {
                junction_cos_theta -= self.previous_unit_vec[idx] * unit_vec[idx];
                junction_unit_vec[idx] = unit_vec[idx] - self.previous_unit_vec[idx];
            }

            if junction_cos_theta > 0.999999 {
                // Full reversal. Crawl through the corner.
                block.max_junction_speed_sqr = MINIMUM_JUNCTION_SPEED * MINIMUM_JUNCTION_SPEED;
            } else if junction_cos_theta < -0.999999 {
                // Straight-through junction.
                block.max_junction_speed_sqr = SOME_LARGE_VALUE;
            } else {
                to_unit_vector(&mut junction_unit_vec);
                let junction_acceleration =
                    limit_by_axis_maximum(&accel_limits, &junction_unit_vec);
                // Half-angle identity, always positive.
                let sin_theta_d2 = (0.5 * (1.0 - junction_cos_theta)).sqrt();
                block.max_junction_speed_sqr = (MINIMUM_JUNCTION_SPEED
                    * MINIMUM_JUNCTION_SPEED)
                    .max(
                        junction_acceleration * settings.junction_deviation * sin_theta_d2
                            / (1.0 - sin_theta_d2),
                    );
            }
        }

        let nominal_speed = compute_profile_nominal_speed(&block, f_override, r_override);
        compute_profile_parameters(&mut block, nominal_speed, self.previous_nominal_speed);
        self.previous_nominal_speed = nominal_speed;
        self.previous_unit_vec = unit_vec;
        self.position_steps = target_steps;

        self.buffer[self.head] = block;
        self.head = Self::next_index(self.head);

        self.recalculate(prep);
        true
    }

    /// The two-pass optimization over the unplanned portion of the ring.
    ///
    /// Reverse pass pulls entry speeds down to what each block can shed
    /// into its successor; forward pass caps them to what each block can
    /// gain from its predecessor. Blocks that come out at their ceiling
    /// advance the `planned` boundary and drop out of future passes.
    fn recalculate(&mut self, prep: &mut StPrep) {
        if self.is_empty() {
            return;
        }
        let mut block_index = Self::prev_index(self.head);
        if block_index == self.planned {
            return;
        }

        // Newest block always plans to a stop at the queue end.
        {
            let block = &mut self.buffer[block_index];
            block.entry_speed_sqr = block
                .max_entry_speed_sqr
                .min(2.0 * block.acceleration * block.millimeters);
        }

        block_index = Self::prev_index(block_index);
        if block_index == self.planned {
            // Only two plannable blocks. If the first is executing, fold
            // the stepper's committed speed back in before it re-preps.
            if block_index == self.tail {
                prep.fold_into_block(&mut self.buffer[self.tail]);
            }
        } else {
            // Reverse pass: tail-ward until the planned boundary.
            let mut next_index = Self::prev_index(self.head);
            while block_index != self.planned {
                if block_index == self.tail {
                    prep.fold_into_block(&mut self.buffer[self.tail]);
                }
                let next_entry = self.buffer[next_index].entry_speed_sqr;
                let block = &mut self.buffer[block_index];
                if block.entry_speed_sqr != block.max_entry_speed_sqr {
                    block.entry_speed_sqr = block
                        .max_entry_speed_sqr
                        .min(next_entry + 2.0 * block.acceleration * block.millimeters);
                }
                next_index = block_index;
                block_index = Self::prev_index(block_index);
            }
        }

        // Forward pass: head-ward from the planned boundary.
        let mut current_index = self.planned;
        block_index = Self::next_index(self.planned);
        while block_index != self.head {
            let current = self.buffer[current_index];
            let next = &mut self.buffer[block_index];
            if current.entry_speed_sqr < next.entry_speed_sqr {
                let reachable =
                    current.entry_speed_sqr + 2.0 * current.acceleration * current.millimeters;
                if reachable < next.entry_speed_sqr {
                    next.entry_speed_sqr = reachable;
                    // This block is acceleration-limited from a planned
                    // predecessor; it cannot improve further.
                    self.planned = block_index;
                }
            }
            if next.entry_speed_sqr == next.max_entry_speed_sqr {
                self.planned = block_index;
            }
            current_index = block_index;
            block_index = Self::next_index(block_index);
        }
    }

    /// Re-derive every block's nominal-speed ceiling after an override
    /// change, then let the next `cycle_reinitialize` re-optimize.
    pub fn update_velocity_profile_parameters(&mut self, f_override: u8, r_override: u8) {
        let mut block_index = self.tail;
        let mut prev_nominal_speed = SOME_LARGE_VALUE;
        while block_index != self.head {
            let block = &mut self.buffer[block_index];
            let nominal_speed = compute_profile_nominal_speed(block, f_override, r_override);
            compute_profile_parameters(block, nominal_speed, prev_nominal_speed);
            prev_nominal_speed = nominal_speed;
            block_index = Self::next_index(block_index);
        }
        self.previous_nominal_speed = prev_nominal_speed;
        debug!(f_override, r_override, "velocity profile parameters rescaled");
    }

    /// Restart the optimizer over the whole queue. Used when resuming
    /// from a hold and after override rescaling.
    pub fn cycle_reinitialize(&mut self, prep: &mut StPrep) {
        self.planned = self.tail;
        self.recalculate(prep);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
