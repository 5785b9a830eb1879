//! End-to-end pipeline tests: serial lines in, acks out, simulated
//! pulse engine driving `sys_position`.
//!
//! Covers the full parser → planner → stepper path, including feed
//! hold/resume, jog cancel, realtime overrides, and reset/alarm
//! behavior.

use kerf_common::config::MachineSettings;
use kerf_common::consts::N_AXIS;
use kerf_common::exec::{ExecState, Suspend};
use kerf_common::state::SysState;
use kerf_core::settings::SettingsStore;
use kerf_core::stepper::StepDriver;
use kerf_core::system::Machine;

// ── Helpers ─────────────────────────────────────────────────────────

fn machine() -> Machine {
    Machine::new(SettingsStore::new(MachineSettings::default()))
}

/// Send a line and run all queued motion to completion.
fn send_and_run(machine: &mut Machine, line: &str) {
    machine.send_line(line);
    machine.run_to_idle();
}

fn acks(machine: &mut Machine) -> Vec<String> {
    machine.out.take_all()
}

/// Step driver that tracks the per-axis position envelope, for
/// asserting on the executed trajectory rather than just the endpoint.
#[derive(Debug, Default)]
struct TrackingDriver {
    position: [i64; N_AXIS],
    min: [i64; N_AXIS],
    max: [i64; N_AXIS],
    dir_bits: u8,
}

impl StepDriver for TrackingDriver {
    fn set_directions(&mut self, dir_bits: u8) {
        self.dir_bits = dir_bits;
    }

    fn begin_pulse(&mut self, step_bits: u8) {
        for idx in 0..N_AXIS {
            if step_bits & (1 << idx) != 0 {
                if self.dir_bits & (1 << idx) != 0 {
                    self.position[idx] -= 1;
                } else {
                    self.position[idx] += 1;
                }
                self.min[idx] = self.min[idx].min(self.position[idx]);
                self.max[idx] = self.max[idx].max(self.position[idx]);
            }
        }
    }

    fn end_pulse(&mut self) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ── Literal end-to-end scenarios ────────────────────────────────────

#[test]
fn scenario_1_absolute_line_move() {
    let mut m = machine();
    send_and_run(&mut m, "G21G90G1X10Y10F300");
    assert_eq!(acks(&mut m), vec!["ok"]);
    // 250 steps/mm defaults.
    assert_eq!(m.sys.signals.position_snapshot(), [2500, 2500, 0]);
    assert_eq!(m.sys.state, SysState::Idle);
}

#[test]
fn scenario_2_incremental_moves_accumulate() {
    let mut m = machine();
    send_and_run(&mut m, "G91G0X5");
    send_and_run(&mut m, "G0X5");
    assert_eq!(acks(&mut m), vec!["ok", "ok"]);
    assert_eq!(m.sys.signals.position_snapshot()[0], 2500);
}

#[test]
fn scenario_3_clockwise_semicircle_passes_through_bottom() {
    let settings = SettingsStore::new(MachineSettings::default());
    let mut m = Machine::with_driver(settings, Box::new(TrackingDriver::default()));
    send_and_run(&mut m, "G2X10Y0I5J0F100");
    assert_eq!(acks(&mut m), vec!["ok"]);
    assert_eq!(m.sys.signals.position_snapshot(), [2500, 0, 0]);

    let driver = m
        .stepper
        .driver_any()
        .downcast_ref::<TrackingDriver>()
        .unwrap();
    // A clockwise semicircle from (0,0) to (10,0) about (5,0) dips to
    // (5,−5); chord endpoints sit on the arc, so the extreme Y is
    // within the arc tolerance plus step rounding of −5 mm.
    let min_y_mm = driver.min[1] as f32 / 250.0;
    assert!(
        (min_y_mm + 5.0).abs() < 0.02,
        "semicircle bottom was {min_y_mm} mm"
    );
    // X at most the full chord, never beyond.
    assert!(driver.max[0] <= 2500);
}

#[test]
fn scenario_4_arc_radius_mismatch_rejected() {
    let mut m = machine();
    // Center offset I4.9 puts the start radius at 4.9 mm but the
    // target radius at 5.1 mm: beyond 0.005 mm and 0.1%.
    send_and_run(&mut m, "G2X10Y0I4.9J0F100");
    assert_eq!(acks(&mut m), vec!["error:33"]);
    assert_eq!(m.sys.signals.position_snapshot(), [0; N_AXIS]);
}

#[test]
fn scenario_5_undefined_feed_rate_on_second_line() {
    let mut m = machine();
    send_and_run(&mut m, "G0X1Y1");
    send_and_run(&mut m, "G1X2");
    assert_eq!(acks(&mut m), vec!["ok", "error:22"]);
}

#[test]
fn scenario_6_feed_hold_then_resume_preserves_steps() {
    let mut m = machine();
    m.send_line("G1X1000F100");
    assert_eq!(acks(&mut m), vec!["ok"]);

    // Let some motion execute, then hold.
    m.pump_steps(5000);
    let before_hold = m.sys.signals.position_snapshot()[0];
    assert!(before_hold > 0);

    m.process_input(&[b'!']);
    m.run_to_idle();
    assert_eq!(m.sys.state, SysState::Hold);
    assert!(m.sys.suspend.contains(Suspend::HOLD_COMPLETE));
    assert!(!m.stepper.is_awake());

    // Decelerated to a stop a short ramp past the hold request:
    // v²/(2a) at 100 mm/min and 10 mm/s² is under 0.2 mm.
    let at_hold = m.sys.signals.position_snapshot()[0];
    assert!(at_hold >= before_hold);
    assert!(at_hold - before_hold < 250, "ramp was {} steps", at_hold - before_hold);

    // Resume and finish. No step lost or doubled.
    m.process_input(&[b'~']);
    m.run_to_idle();
    assert_eq!(m.sys.state, SysState::Idle);
    assert_eq!(m.sys.signals.position_snapshot()[0], 250_000);
    let driver = m.stepper.sim_driver().unwrap();
    assert_eq!(driver.step_counts[0], 250_000);
}

#[test]
fn streaming_does_not_resume_a_parked_hold() {
    let mut m = machine();
    m.send_line("G1X50F200");
    m.pump_steps(3000);
    m.process_input(&[b'!']);
    m.run_to_idle();
    assert_eq!(m.sys.state, SysState::Hold);
    let parked = m.sys.signals.position_snapshot()[0];

    // Lines keep streaming into the queue but motion stays parked;
    // only an explicit cycle start resumes.
    m.send_line("G1X60");
    m.run_to_idle();
    assert_eq!(m.sys.state, SysState::Hold);
    assert_eq!(m.sys.signals.position_snapshot()[0], parked);

    m.process_input(&[b'~']);
    m.run_to_idle();
    assert_eq!(m.sys.state, SysState::Idle);
    assert_eq!(m.sys.signals.position_snapshot()[0], 15_000);
}

// ── Position bookkeeping ────────────────────────────────────────────

#[test]
fn position_is_sum_of_block_deltas() {
    let mut m = machine();
    send_and_run(&mut m, "G1X10Y4F400");
    send_and_run(&mut m, "G1X3Y-2.5");
    send_and_run(&mut m, "G0X0Y0Z1.2");
    assert_eq!(acks(&mut m), vec!["ok", "ok", "ok"]);
    assert_eq!(m.sys.signals.position_snapshot(), [0, 0, 300]);

    // Total issued pulses equal the per-block step deltas.
    let driver = m.stepper.sim_driver().unwrap();
    assert_eq!(driver.step_counts[0], 2500 + 1750 + 750);
    assert_eq!(driver.step_counts[1], 1000 + 1625 + 625);
    assert_eq!(driver.step_counts[2], 300);
}

#[test]
fn parser_position_tracks_machine_after_queue_drain() {
    let mut m = machine();
    send_and_run(&mut m, "G1X7.3Y-0.8F500");
    let mpos = m.machine_position();
    for idx in 0..N_AXIS {
        assert!(
            (m.gc.position[idx] - mpos[idx]).abs() <= 1.0 / 250.0,
            "axis {idx}: parser {} vs machine {}",
            m.gc.position[idx],
            mpos[idx]
        );
    }
}

// ── Protocol behavior ───────────────────────────────────────────────

#[test]
fn empty_comment_and_block_delete_lines_ack_ok() {
    let mut m = machine();
    m.send_line("");
    m.send_line("(just a comment)");
    m.send_line("/G1X5F100");
    assert_eq!(acks(&mut m), vec!["ok", "ok", "ok"]);
    assert!(m.planner.is_empty());
}

#[test]
fn dollar_commands_rejected_as_out_of_core() {
    let mut m = machine();
    m.send_line("$$");
    assert_eq!(acks(&mut m), vec!["error:3"]);
}

#[test]
fn overlong_line_reports_overflow() {
    let mut m = machine();
    let line = format!("G1X{}F100", "9".repeat(200));
    m.send_line(&line);
    assert_eq!(acks(&mut m), vec!["error:11"]);
}

#[test]
fn status_report_mid_motion_shows_run() {
    let mut m = machine();
    m.send_line("G1X100F100");
    m.pump_steps(2000);
    m.process_input(&[b'?']);
    let lines = acks(&mut m);
    let report = lines.iter().find(|l| l.starts_with('<')).unwrap();
    assert!(report.starts_with("<Run|MPos:"), "report was {report}");
}

#[test]
fn m0_pauses_until_cycle_start() {
    let mut m = machine();
    m.send_line("G1X2F400");
    m.send_line("M0");
    m.run_to_idle();
    assert_eq!(m.sys.state, SysState::Hold);
    assert!(m.sys.suspend.contains(Suspend::HOLD_COMPLETE));
    // Motion had already drained before the pause.
    assert_eq!(m.sys.signals.position_snapshot()[0], 500);

    m.process_input(&[b'~']);
    m.run_to_idle();
    assert_eq!(m.sys.state, SysState::Idle);
}

// ── Jogging ─────────────────────────────────────────────────────────

#[test]
fn jog_executes_and_restores_idle() {
    let mut m = machine();
    send_and_run(&mut m, "$J=X-10F600");
    assert_eq!(acks(&mut m), vec!["ok"]);
    assert_eq!(m.sys.state, SysState::Idle);
    assert_eq!(m.sys.signals.position_snapshot()[0], -2500);
}

#[test]
fn jog_cancel_flushes_and_resyncs() {
    let mut m = machine();
    m.send_line("$J=X-100F400");
    assert_eq!(acks(&mut m), vec!["ok"]);
    assert_eq!(m.sys.state, SysState::Jog);
    m.pump_steps(3000);

    // Jog cancel: ramp down, flush, resync parser from live position.
    m.process_input(&[0x85]);
    m.run_to_idle();
    assert_eq!(m.sys.state, SysState::Idle);
    assert!(m.planner.is_empty());

    let steps = m.sys.signals.position_snapshot()[0];
    assert!(steps < 0 && steps > -25_000, "stopped at {steps}");
    let mpos = m.machine_position();
    assert_eq!(m.gc.position, mpos);
}

#[test]
fn feed_hold_during_jog_cancels_it() {
    let mut m = machine();
    m.send_line("$J=X-100F400");
    m.pump_steps(3000);
    m.process_input(&[b'!']);
    m.run_to_idle();
    assert_eq!(m.sys.state, SysState::Idle);
    assert!(m.planner.is_empty());
}

#[test]
fn jog_rejected_outside_soft_travel() {
    let mut m = machine();
    m.send_line("$J=X-500F400");
    assert_eq!(acks(&mut m), vec!["error:15"]);
}

// ── Overrides ───────────────────────────────────────────────────────

#[test]
fn feed_override_steps_and_clamps() {
    let mut m = machine();
    m.process_input(&[0x91]); // +10
    m.process_input(&[0x93]); // +1
    assert_eq!(m.sys.f_override, 111);

    for _ in 0..30 {
        m.process_input(&[0x92]); // −10 each
    }
    assert_eq!(m.sys.f_override, 10);

    m.process_input(&[0x90]); // reset
    assert_eq!(m.sys.f_override, 100);
}

#[test]
fn rapid_override_presets() {
    let mut m = machine();
    m.process_input(&[0x96]);
    assert_eq!(m.sys.r_override, 50);
    m.process_input(&[0x97]);
    assert_eq!(m.sys.r_override, 25);
    m.process_input(&[0x95]);
    assert_eq!(m.sys.r_override, 100);
}

#[test]
fn override_change_mid_motion_keeps_step_total() {
    let mut m = machine();
    m.send_line("G1X40F500");
    m.pump_steps(2000);
    // Halve the feed mid-move; the planner re-plans, the distance is
    // untouched.
    for _ in 0..5 {
        m.process_input(&[0x92]);
    }
    assert_eq!(m.sys.f_override, 50);
    m.run_to_idle();
    assert_eq!(m.sys.signals.position_snapshot()[0], 10_000);
    let driver = m.stepper.sim_driver().unwrap();
    assert_eq!(driver.step_counts[0], 10_000);
}

#[test]
fn override_change_flags_ov_report() {
    let mut m = machine();
    m.process_input(&[b'?']); // consume the boot WCO slot
    acks(&mut m);
    m.process_input(&[0x91]);
    m.process_input(&[b'?']);
    let lines = acks(&mut m);
    let report = lines.iter().find(|l| l.starts_with('<')).unwrap();
    assert!(report.contains("|Ov:110,100,100"), "report was {report}");
}

// ── Reset, alarm, sleep ─────────────────────────────────────────────

#[test]
fn reset_mid_motion_latches_alarm_and_locks_gcode() {
    let mut m = machine();
    m.send_line("G1X100F200");
    m.pump_steps(2000);
    m.process_input(&[0x18]);
    assert_eq!(m.sys.state, SysState::Alarm);
    let lines = acks(&mut m);
    assert!(lines.iter().any(|l| l == "ALARM:3"), "lines were {lines:?}");

    m.send_line("G0X1");
    assert_eq!(acks(&mut m), vec!["error:9"]);
}

#[test]
fn reset_at_idle_is_clean() {
    let mut m = machine();
    send_and_run(&mut m, "G0X1");
    acks(&mut m);
    m.process_input(&[0x18]);
    assert_eq!(m.sys.state, SysState::Idle);
    // Parser resynced to the live position, not zero.
    assert_eq!(m.gc.position, m.machine_position());
    m.send_line("G0X2");
    assert_eq!(acks(&mut m), vec!["ok"]);
}

#[test]
fn sleep_parks_and_locks_gcode() {
    let mut m = machine();
    m.sys.signals.set_exec(ExecState::SLEEP);
    m.run_to_idle();
    assert_eq!(m.sys.state, SysState::Sleep);
    m.send_line("G0X1");
    assert_eq!(acks(&mut m), vec!["error:9"]);
}

// ── Check mode, dwell ───────────────────────────────────────────────

#[test]
fn check_mode_validates_without_motion() {
    let mut m = machine();
    m.sys.state = SysState::CheckCode;
    send_and_run(&mut m, "G1X10F300");
    send_and_run(&mut m, "G1X10X20F300");
    assert_eq!(acks(&mut m), vec!["ok", "error:25"]);
    // Parser state advanced; the machine never moved.
    assert_eq!(m.gc.position[0], 10.0);
    assert_eq!(m.sys.signals.position_snapshot(), [0; N_AXIS]);
    assert!(m.planner.is_empty());
}

#[test]
fn dwell_completes_and_acks() {
    let mut m = machine();
    let started = std::time::Instant::now();
    send_and_run(&mut m, "G1X0.5F500");
    send_and_run(&mut m, "G4P0.05");
    assert_eq!(acks(&mut m), vec!["ok", "ok"]);
    assert!(started.elapsed() >= std::time::Duration::from_millis(50));
    assert_eq!(m.sys.signals.position_snapshot()[0], 125);
}

// ── Startup lines ───────────────────────────────────────────────────

#[test]
fn startup_lines_run_and_echo() {
    let mut m = machine();
    m.settings.set_startup_line(0, "G21G90").unwrap();
    m.run_startup_lines();
    let lines = acks(&mut m);
    assert_eq!(lines, vec![">G21G90", "ok"]);
}

// ── Planner invariants under pipeline load ──────────────────────────

#[test]
fn queued_blocks_respect_speed_invariants() {
    let mut m = machine();
    // Queue a zig-zag without executing it.
    m.stepper.go_idle();
    for i in 0..10 {
        let x = (i + 1) as f32;
        let y = if i % 2 == 0 { 1.0 } else { -1.0 };
        let line = format!("G1X{x}Y{y}F500");
        assert!(m.gc_execute_line(&line, false).is_ok());
    }

    let blocks: Vec<_> = m.planner.blocks().copied().collect();
    assert_eq!(blocks.len(), 10);
    for pair in blocks.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);
        assert!(next.entry_speed_sqr <= next.max_entry_speed_sqr + 1e-2);
        assert!(
            next.entry_speed_sqr
                <= current.entry_speed_sqr
                    + 2.0 * current.acceleration * current.millimeters
                    + 1e-2
        );
    }
}
