//! System state singleton, the atomic signal bank, and the machine
//! assembly that owns every pipeline stage.
//!
//! Ownership follows the pipeline: the parser writes `GcState`, the
//! planner writes its ring, the stepper writes `sys_position` and the
//! segment queue. [`RtSignals`] is the only state crossing the
//! interrupt boundary; everything else is owned by the main loop
//! through [`Machine`].

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use tracing::info;

use kerf_common::axis::{MmVector, StepVector, steps_to_mpos};
use kerf_common::consts::{DEFAULT_FEED_OVERRIDE, DEFAULT_RAPID_OVERRIDE, N_AXIS};
use kerf_common::exec::{AtomicFlags, ExecOverride, ExecState, StepControl, Suspend};
use kerf_common::state::SysState;
use kerf_common::status::Alarm;

use crate::parser::GcState;
use crate::planner::Planner;
use crate::protocol::LineAssembler;
use crate::report::OutputBuffer;
use crate::settings::SettingsStore;
use crate::stepper::{SimDriver, StepDriver, Stepper};

// ─── Interrupt-boundary signals ─────────────────────────────────────

/// Atomic flag banks and position cells shared with interrupt context.
///
/// The RX handler sets exec/override bits; the pulse engine is the
/// single writer of `position`. The main loop consumes flags with an
/// atomic read-and-clear and takes position snapshots between pulse
/// ticks, which stands in for the brief interrupt-disable window the
/// hardware build uses.
#[derive(Debug, Default)]
pub struct RtSignals {
    exec: AtomicFlags,
    ovr: AtomicFlags,
    position: [AtomicI32; N_AXIS],
}

impl RtSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request asynchronous work from the realtime executor.
    #[inline]
    pub fn set_exec(&self, flags: ExecState) {
        self.exec.set(flags.bits());
    }

    /// Consume all pending executor requests.
    #[inline]
    pub fn take_exec(&self) -> ExecState {
        ExecState::from_bits_truncate(self.exec.take())
    }

    /// Request an override change.
    #[inline]
    pub fn set_override(&self, flags: ExecOverride) {
        self.ovr.set(flags.bits());
    }

    /// Consume all pending override requests.
    #[inline]
    pub fn take_override(&self) -> ExecOverride {
        ExecOverride::from_bits_truncate(self.ovr.take())
    }

    /// One issued step on one axis. Pulse-engine use only.
    #[inline]
    pub fn step(&self, axis: usize, direction: i32) {
        self.position[axis].fetch_add(direction, Ordering::AcqRel);
    }

    /// Atomic N-axis snapshot of the machine position in steps.
    pub fn position_snapshot(&self) -> StepVector {
        let mut steps = [0i32; N_AXIS];
        for idx in 0..N_AXIS {
            steps[idx] = self.position[idx].load(Ordering::Acquire);
        }
        steps
    }

    /// Overwrite the machine position. Reset/homing use only.
    pub fn store_position(&self, steps: &StepVector) {
        for idx in 0..N_AXIS {
            self.position[idx].store(steps[idx], Ordering::Release);
        }
    }
}

// ─── System state ───────────────────────────────────────────────────

/// Main-loop-owned system state: the top-level state machine plus the
/// hold sub-phases, override values, and latched alarm.
#[derive(Debug)]
pub struct System {
    pub state: SysState,
    pub suspend: Suspend,
    pub step_control: StepControl,
    /// Feed override [%], 10..=200.
    pub f_override: u8,
    /// Rapid override [%], one of 100/50/25.
    pub r_override: u8,
    /// Latched fault, cleared only by unlock/reset.
    pub alarm: Option<Alarm>,
    /// Reset consumed mid-operation; full re-init runs once the current
    /// line unwinds.
    pub abort: bool,
    /// Next status report must include `Ov:` (an override changed).
    pub report_ovr_pending: bool,
    /// Countdown until the next `WCO:` field refresh.
    pub report_wco_counter: u8,
    pub signals: Arc<RtSignals>,
}

impl System {
    pub fn new(signals: Arc<RtSignals>) -> Self {
        Self {
            state: SysState::Idle,
            suspend: Suspend::empty(),
            step_control: StepControl::empty(),
            f_override: DEFAULT_FEED_OVERRIDE,
            r_override: DEFAULT_RAPID_OVERRIDE,
            alarm: None,
            abort: false,
            report_ovr_pending: false,
            report_wco_counter: 0,
            signals,
        }
    }
}

// ─── Machine assembly ───────────────────────────────────────────────

/// The whole firmware core: settings, system state, parser state,
/// planner, and stepper, initialized in dependency order.
pub struct Machine {
    pub settings: SettingsStore,
    pub sys: System,
    pub gc: GcState,
    pub planner: Planner,
    pub stepper: Stepper,
    /// Host-bound lines: acks, reports, alarms, messages.
    pub out: OutputBuffer,
    pub(crate) assembler: LineAssembler,
}

impl Machine {
    /// Assemble with the recording driver. Simulator and test entry.
    pub fn new(settings: SettingsStore) -> Self {
        let driver = SimDriver::new(settings.machine.step_pulse_us);
        Self::with_driver(settings, Box::new(driver))
    }

    /// Assemble with a caller-provided step driver.
    pub fn with_driver(settings: SettingsStore, driver: Box<dyn StepDriver + Send>) -> Self {
        let signals = Arc::new(RtSignals::new());
        let sys = System::new(Arc::clone(&signals));
        let stepper = Stepper::new(Arc::clone(&signals), driver);

        let mut machine = Self {
            settings,
            sys,
            gc: GcState::default(),
            planner: Planner::new(),
            stepper,
            out: OutputBuffer::default(),
            assembler: LineAssembler::default(),
        };
        machine.gc_init();
        machine.plan_sync_position();
        machine
    }

    /// Handle for interrupt-context producers (RX thread, tests).
    pub fn signals(&self) -> Arc<RtSignals> {
        Arc::clone(&self.sys.signals)
    }

    /// Re-initialize the parser: default modes, G54 offsets, position
    /// from the live machine position.
    pub fn gc_init(&mut self) {
        self.gc = GcState::default();
        match self.settings.read_coord_data(0) {
            Ok(coords) => self.gc.coord_system = coords,
            Err(status) => {
                // Boot continues on zero offsets; the host sees the error.
                tracing::warn!(code = status.code(), "coordinate data read failed");
            }
        }
        self.gc_sync_position();
    }

    /// Parser position from the live machine position.
    pub fn gc_sync_position(&mut self) {
        let steps = self.sys.signals.position_snapshot();
        self.gc.position = steps_to_mpos(&steps, &self.settings.machine.steps_per_mm());
    }

    /// Planner shadow position from the live machine position.
    pub fn plan_sync_position(&mut self) {
        let steps = self.sys.signals.position_snapshot();
        self.planner.sync_position(&steps);
    }

    /// Machine position in mm, for reports.
    pub fn machine_position(&self) -> MmVector {
        let steps = self.sys.signals.position_snapshot();
        steps_to_mpos(&steps, &self.settings.machine.steps_per_mm())
    }

    /// Hard abort: stop pulses dead, drop the queue, re-init the parser
    /// from wherever the machine actually is.
    ///
    /// An alarm latched before or during the abort (reset mid-motion,
    /// limit trip) keeps the machine in `Alarm`; otherwise it returns
    /// to `Idle`.
    pub fn system_reset(&mut self) {
        self.stepper.reset();
        self.planner.reset();
        self.sys.suspend = Suspend::empty();
        self.sys.step_control = StepControl::empty();
        self.assembler = LineAssembler::default();
        // Drain any stale requests from before the reset.
        let _ = self.sys.signals.take_exec();
        let _ = self.sys.signals.take_override();

        self.gc_init();
        self.plan_sync_position();

        self.sys.state = if self.sys.alarm.is_some() {
            SysState::Alarm
        } else {
            SysState::Idle
        };
        info!(state = ?self.sys.state, "system reset");
    }

    /// Complete a staged abort once the interrupted operation has
    /// unwound: full re-init plus the alarm announcement.
    pub fn finish_reset(&mut self) {
        self.sys.abort = false;
        self.system_reset();
        if let Some(alarm) = self.sys.alarm {
            self.out.alarm(alarm);
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kerf_common::config::MachineSettings;

    fn machine() -> Machine {
        Machine::new(SettingsStore::new(MachineSettings::default()))
    }

    #[test]
    fn signals_position_snapshot_round_trip() {
        let signals = RtSignals::new();
        signals.store_position(&[100, -50, 7]);
        assert_eq!(signals.position_snapshot(), [100, -50, 7]);
        signals.step(0, 1);
        signals.step(1, -1);
        assert_eq!(signals.position_snapshot(), [101, -51, 7]);
    }

    #[test]
    fn exec_flags_are_edge_triggered() {
        let signals = RtSignals::new();
        signals.set_exec(ExecState::FEED_HOLD);
        assert_eq!(signals.take_exec(), ExecState::FEED_HOLD);
        assert!(signals.take_exec().is_empty());
    }

    #[test]
    fn machine_boots_idle_with_default_overrides() {
        let machine = machine();
        assert_eq!(machine.sys.state, SysState::Idle);
        assert_eq!(machine.sys.f_override, DEFAULT_FEED_OVERRIDE);
        assert_eq!(machine.sys.r_override, DEFAULT_RAPID_OVERRIDE);
        assert_eq!(machine.machine_position(), [0.0; N_AXIS]);
    }

    #[test]
    fn reset_at_rest_returns_to_idle() {
        let mut machine = machine();
        machine.system_reset();
        assert_eq!(machine.sys.state, SysState::Idle);
        assert!(machine.sys.alarm.is_none());
    }

    #[test]
    fn gc_sync_follows_sys_position() {
        let mut machine = machine();
        machine.sys.signals.store_position(&[250, 500, 0]);
        machine.gc_sync_position();
        // 250 steps/mm defaults.
        assert_eq!(machine.gc.position, [1.0, 2.0, 0.0]);
    }
}
