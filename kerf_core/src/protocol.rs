//! Serial line protocol and the realtime executor.
//!
//! The RX path splits in two at the byte level: realtime command bytes
//! are intercepted immediately and become flag-bank bits, never reaching
//! the line buffer; everything else feeds the [`LineAssembler`], which
//! uppercases, strips whitespace and comments, and drops block-delete
//! lines. Every completed line is executed to completion and acked with
//! exactly one `ok` or `error:N`.
//!
//! The realtime executor consumes the flag bank at every suspension
//! point: between lines, inside dwell, inside full-queue waits, and
//! inside sync. It owns all state transitions for hold, cancel, resume,
//! sleep, and reset.

use heapless::String as HString;
use tracing::{debug, info};

use kerf_common::consts::{
    DEFAULT_FEED_OVERRIDE, DEFAULT_RAPID_OVERRIDE, FEED_OVERRIDE_COARSE_INCREMENT,
    FEED_OVERRIDE_FINE_INCREMENT, LINE_BUFFER_SIZE, MAX_FEED_RATE_OVERRIDE,
    MIN_FEED_RATE_OVERRIDE, N_STARTUP_LINE, RAPID_OVERRIDE_LOW, RAPID_OVERRIDE_MEDIUM,
};
use kerf_common::exec::{ExecOverride, ExecState, StepControl, Suspend};
use kerf_common::state::SysState;
use kerf_common::status::{Alarm, Status};

use crate::system::{Machine, RtSignals};

// ─── Realtime byte interception ─────────────────────────────────────

/// Intercept a realtime command byte, setting flag-bank bits instead of
/// delivering it to the line buffer. Returns `true` when consumed.
///
/// Callable from the RX thread with only the signal handle; reserved
/// extended bytes are consumed silently.
pub fn intercept_realtime_byte(byte: u8, signals: &RtSignals) -> bool {
    match byte {
        0x18 => signals.set_exec(ExecState::RESET),
        b'?' => signals.set_exec(ExecState::STATUS_REPORT),
        b'~' => signals.set_exec(ExecState::CYCLE_START),
        b'!' => signals.set_exec(ExecState::FEED_HOLD),
        0x85 => signals.set_exec(ExecState::MOTION_CANCEL),
        0x90 => signals.set_override(ExecOverride::FEED_RESET),
        0x91 => signals.set_override(ExecOverride::FEED_COARSE_PLUS),
        0x92 => signals.set_override(ExecOverride::FEED_COARSE_MINUS),
        0x93 => signals.set_override(ExecOverride::FEED_FINE_PLUS),
        0x94 => signals.set_override(ExecOverride::FEED_FINE_MINUS),
        0x95 => signals.set_override(ExecOverride::RAPID_RESET),
        0x96 => signals.set_override(ExecOverride::RAPID_MEDIUM),
        0x97 => signals.set_override(ExecOverride::RAPID_LOW),
        0x80..=0xFF => {} // Reserved. No response.
        _ => return false,
    }
    true
}

// ─── Line assembler ─────────────────────────────────────────────────

/// Pre-cleaning RX line buffer.
///
/// Drops whitespace, uppercases, strips `(...)` and `;` comments, and
/// drops block-delete lines starting with `/`. A line that outgrows the
/// buffer is consumed to its terminator and reported as one overflow.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: HString<LINE_BUFFER_SIZE>,
    paren_comment: bool,
    line_comment: bool,
    overflow: bool,
}

impl LineAssembler {
    /// Feed one byte. Returns the finished line (or its overflow error)
    /// at each terminator.
    pub fn push(&mut self, byte: u8) -> Option<Result<HString<LINE_BUFFER_SIZE>, Status>> {
        match byte {
            b'\n' | b'\r' => {
                let result = if self.overflow {
                    Err(Status::Overflow)
                } else {
                    Ok(core::mem::take(&mut self.buf))
                };
                self.buf.clear();
                self.paren_comment = false;
                self.line_comment = false;
                self.overflow = false;
                Some(result)
            }
            b' ' | b'\t' => None,
            b'(' => {
                self.paren_comment = true;
                None
            }
            b')' => {
                self.paren_comment = false;
                None
            }
            b';' => {
                self.line_comment = true;
                None
            }
            b'/' if self.buf.is_empty() && !self.paren_comment && !self.line_comment => {
                // Block delete: discard the whole line.
                self.line_comment = true;
                None
            }
            _ => {
                if !(self.paren_comment || self.line_comment) {
                    let ch = byte.to_ascii_uppercase() as char;
                    if self.buf.push(ch).is_err() {
                        self.overflow = true;
                    }
                }
                None
            }
        }
    }
}

// ─── Protocol driver ────────────────────────────────────────────────

impl Machine {
    /// Feed raw RX bytes: realtime bytes act immediately, completed
    /// lines execute and ack, and the machine is serviced after each.
    pub fn process_input(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if intercept_realtime_byte(byte, &self.sys.signals) {
                if self.protocol_execute_realtime() {
                    self.finish_reset();
                    return;
                }
                continue;
            }
            if let Some(finished) = self.assembler.push(byte) {
                match finished {
                    Ok(line) => self.execute_cleaned_line(&line),
                    Err(status) => self.out.ack(Err(status)),
                }
                if self.sys.abort || self.protocol_execute_realtime() {
                    self.finish_reset();
                    return;
                }
                self.protocol_auto_cycle_start();
                self.pump_steps(32);
            }
        }
    }

    /// Submit one full line, terminator included. Test convenience.
    pub fn send_line(&mut self, line: &str) {
        self.process_input(line.as_bytes());
        self.process_input(b"\n");
    }

    /// Execute one cleaned, uppercased, comment-free line and ack it.
    fn execute_cleaned_line(&mut self, line: &str) {
        if line.is_empty() {
            // Empty or comment-only line; ack for host syncing.
            self.out.ack(Ok(()));
            return;
        }

        let result = if let Some(jog_body) = line.strip_prefix("$J=") {
            if matches!(self.sys.state, SysState::Idle | SysState::Jog) {
                self.gc_execute_line(jog_body, true)
            } else {
                Err(Status::IdleError)
            }
        } else if line.starts_with('$') {
            // System commands live outside the core.
            Err(Status::InvalidStatement)
        } else if matches!(self.sys.state, SysState::Alarm | SysState::Sleep) {
            Err(Status::SystemGcLock)
        } else {
            self.gc_execute_line(line, false)
        };

        // A line interrupted by a reset gets no acknowledgement; the
        // host sees the reset unwind instead.
        if !self.sys.abort {
            self.out.ack(result);
        }
    }

    /// Run stored startup lines, acking each like normal input.
    pub fn run_startup_lines(&mut self) {
        for index in 0..N_STARTUP_LINE {
            let Some(stored) = self.settings.startup_line(index) else {
                continue;
            };
            // Stored lines are raw; run them through the same cleaner.
            let raw: String = stored.to_string();
            let mut cleaned = LineAssembler::default();
            let mut finished = None;
            for &byte in raw.as_bytes() {
                if let Some(result) = cleaned.push(byte) {
                    finished = Some(result);
                }
            }
            if finished.is_none() {
                finished = cleaned.push(b'\n');
            }
            match finished {
                Some(Ok(line)) => {
                    self.out.push(format!(">{raw}"));
                    self.execute_cleaned_line(&line);
                }
                Some(Err(status)) => self.out.ack(Err(status)),
                None => {}
            }
            if self.sys.abort {
                self.finish_reset();
                return;
            }
        }
    }

    /// Kick the stepper whenever queued motion exists.
    ///
    /// Suppressed while any suspend phase is latched: resuming a parked
    /// hold takes an explicit cycle-start command, never streaming.
    pub fn protocol_auto_cycle_start(&mut self) {
        if !self.planner.is_empty() && self.sys.suspend.is_empty() && !self.sys.abort {
            self.sys.signals.set_exec(ExecState::CYCLE_START);
        }
    }

    /// Simulated interrupt pump: keep the segment queue fed and execute
    /// up to `max_events` step-timer ticks.
    pub fn pump_steps(&mut self, max_events: usize) {
        for _ in 0..max_events {
            self.stepper.prep_buffer(&mut self.planner, &mut self.sys);
            if self.stepper.step_tick().is_none() {
                break;
            }
        }
        self.stepper.prep_buffer(&mut self.planner, &mut self.sys);
    }

    /// Whether the pipeline still holds unexecuted motion.
    pub fn motion_pending(&self) -> bool {
        !self.planner.is_empty() || self.stepper.has_segments() || self.sys.state == SysState::Cycle
    }

    /// Drive the machine until it parks: Idle, completed Hold, Alarm,
    /// or Sleep. Simulator and test harness entry.
    pub fn run_to_idle(&mut self) {
        loop {
            self.protocol_auto_cycle_start();
            if self.protocol_execute_realtime() {
                self.finish_reset();
                return;
            }
            self.pump_steps(4096);

            match self.sys.state {
                SysState::Alarm | SysState::Sleep | SysState::CheckCode => return,
                SysState::Hold if self.sys.suspend.contains(Suspend::HOLD_COMPLETE) => return,
                SysState::Idle if !self.motion_pending() => return,
                _ => {}
            }
        }
    }

    /// Block until every queued motion has executed. The realtime
    /// executor stays live throughout, so hold/resume/reset work
    /// mid-sync.
    pub fn protocol_buffer_synchronize(&mut self) {
        loop {
            if self.sys.abort {
                return;
            }
            self.protocol_auto_cycle_start();
            if self.protocol_execute_realtime() {
                return;
            }
            self.pump_steps(4096);

            if !self.motion_pending() {
                return;
            }
            if self.sys.state == SysState::Hold && self.sys.suspend.contains(Suspend::HOLD_COMPLETE)
            {
                // Parked mid-sync; wait for a resume without spinning.
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            if matches!(self.sys.state, SysState::Alarm | SysState::Sleep) {
                return;
            }
        }
    }

    /// Re-plan the queue from the executing block, folding the
    /// stepper's committed state back in first.
    pub fn plan_cycle_reinitialize(&mut self) {
        self.stepper.update_plan_block_parameters(&mut self.planner);
        self.planner.cycle_reinitialize(&mut self.stepper.prep);
    }

    /// Consume the realtime flag bank and apply all requested state
    /// transitions. Returns `true` when a reset was executed; callers
    /// unwound by a reset must not touch motion state afterwards.
    pub fn protocol_execute_realtime(&mut self) -> bool {
        let rt_exec = self.sys.signals.take_exec();

        if !rt_exec.is_empty() {
            if rt_exec.contains(ExecState::RESET) {
                // Kill the pulse stream immediately; everything else
                // waits until the interrupted operation unwinds, then
                // `finish_reset` re-initializes from the live position.
                let was_moving = self.sys.state.is_motion_state() && self.stepper.has_segments();
                self.stepper.reset();
                if was_moving && self.sys.alarm.is_none() {
                    // Steps died mid-block: the queue target is lost.
                    self.sys.alarm = Some(Alarm::AbortCycle);
                }
                self.sys.abort = true;
                return true;
            }

            if rt_exec.contains(ExecState::STATUS_REPORT) {
                self.report_realtime_status();
            }

            // ── Hold-class requests: feed hold, jog/motion cancel, sleep ──
            if rt_exec
                .intersects(ExecState::FEED_HOLD | ExecState::MOTION_CANCEL | ExecState::SLEEP)
                && !matches!(self.sys.state, SysState::Alarm | SysState::CheckCode)
            {
                if matches!(self.sys.state, SysState::Cycle | SysState::Jog)
                    && !self
                        .sys
                        .suspend
                        .intersects(Suspend::MOTION_CANCEL | Suspend::JOG_CANCEL)
                {
                    // Fold committed speed into the executing block and
                    // let prep regenerate a deceleration ramp.
                    self.stepper.update_plan_block_parameters(&mut self.planner);
                    self.sys.step_control = StepControl::EXECUTE_HOLD;
                    debug!("hold initiated");
                    // Any hold-class event cancels a jog outright, except
                    // sleep which parks wherever the ramp lands.
                    if self.sys.state == SysState::Jog && !rt_exec.contains(ExecState::SLEEP) {
                        self.sys.suspend |= Suspend::JOG_CANCEL;
                    }
                }
                if self.sys.state == SysState::Idle {
                    // Not in motion: the hold is complete by definition.
                    self.sys.suspend = Suspend::HOLD_COMPLETE;
                }
                if rt_exec.contains(ExecState::MOTION_CANCEL)
                    && self.sys.state != SysState::Jog
                {
                    self.sys.suspend |= Suspend::MOTION_CANCEL;
                }
                if rt_exec.contains(ExecState::FEED_HOLD)
                    && !matches!(self.sys.state, SysState::Jog | SysState::Sleep)
                {
                    self.sys.state = SysState::Hold;
                }
                if rt_exec.contains(ExecState::SLEEP) {
                    info!("sleep requested");
                    self.sys.state = SysState::Sleep;
                }
            }

            // ── Cycle start: begin queued motion or resume from hold ──
            if rt_exec.contains(ExecState::CYCLE_START)
                && !rt_exec.intersects(ExecState::FEED_HOLD | ExecState::MOTION_CANCEL)
            {
                let resumable = self.sys.state == SysState::Idle
                    || (self.sys.state == SysState::Hold
                        && self.sys.suspend.contains(Suspend::HOLD_COMPLETE));
                if resumable {
                    self.sys.step_control = StepControl::empty();
                    if !self.planner.is_empty()
                        && !self.sys.suspend.contains(Suspend::MOTION_CANCEL)
                    {
                        self.sys.suspend = Suspend::empty();
                        self.sys.state = SysState::Cycle;
                        self.stepper.prep_buffer(&mut self.planner, &mut self.sys);
                        self.stepper.wake_up();
                    } else {
                        self.sys.suspend = Suspend::empty();
                        self.sys.state = SysState::Idle;
                    }
                }
            }

            // ── Cycle stop: queue drained, normally or into a hold ──
            if rt_exec.contains(ExecState::CYCLE_STOP) {
                if matches!(self.sys.state, SysState::Hold | SysState::Sleep)
                    && !self.sys.suspend.contains(Suspend::JOG_CANCEL)
                {
                    // Hold ramp landed. Re-plan for a resume and park.
                    self.plan_cycle_reinitialize();
                    if self.sys.step_control.contains(StepControl::EXECUTE_HOLD) {
                        self.sys.suspend |= Suspend::HOLD_COMPLETE;
                        debug!("hold complete");
                    }
                    self.sys.step_control.remove(StepControl::EXECUTE_HOLD);
                } else {
                    if self.sys.suspend.contains(Suspend::JOG_CANCEL) {
                        // Canceled jog: flush everything and resync both
                        // position consumers from the live position.
                        self.sys.step_control = StepControl::empty();
                        self.planner.reset();
                        self.stepper.reset();
                        self.gc_sync_position();
                        self.plan_sync_position();
                        debug!("jog cancel flushed");
                    }
                    self.sys.suspend = Suspend::empty();
                    if !matches!(self.sys.state, SysState::Sleep | SysState::Alarm) {
                        self.sys.state = SysState::Idle;
                    }
                    self.stepper.go_idle();
                }
            }
        }

        // ── Override deltas ──
        let rt_override = self.sys.signals.take_override();
        if !rt_override.is_empty() {
            let mut new_f = self.sys.f_override;
            if rt_override.contains(ExecOverride::FEED_RESET) {
                new_f = DEFAULT_FEED_OVERRIDE;
            }
            if rt_override.contains(ExecOverride::FEED_COARSE_PLUS) {
                new_f = new_f.saturating_add(FEED_OVERRIDE_COARSE_INCREMENT);
            }
            if rt_override.contains(ExecOverride::FEED_COARSE_MINUS) {
                new_f = new_f.saturating_sub(FEED_OVERRIDE_COARSE_INCREMENT);
            }
            if rt_override.contains(ExecOverride::FEED_FINE_PLUS) {
                new_f = new_f.saturating_add(FEED_OVERRIDE_FINE_INCREMENT);
            }
            if rt_override.contains(ExecOverride::FEED_FINE_MINUS) {
                new_f = new_f.saturating_sub(FEED_OVERRIDE_FINE_INCREMENT);
            }
            new_f = new_f.clamp(MIN_FEED_RATE_OVERRIDE, MAX_FEED_RATE_OVERRIDE);

            let mut new_r = self.sys.r_override;
            if rt_override.contains(ExecOverride::RAPID_RESET) {
                new_r = DEFAULT_RAPID_OVERRIDE;
            }
            if rt_override.contains(ExecOverride::RAPID_MEDIUM) {
                new_r = RAPID_OVERRIDE_MEDIUM;
            }
            if rt_override.contains(ExecOverride::RAPID_LOW) {
                new_r = RAPID_OVERRIDE_LOW;
            }

            if new_f != self.sys.f_override || new_r != self.sys.r_override {
                self.sys.f_override = new_f;
                self.sys.r_override = new_r;
                self.sys.report_ovr_pending = true;
                // Junction ceilings rescale with nominal speeds.
                self.planner
                    .update_velocity_profile_parameters(new_f, new_r);
                self.plan_cycle_reinitialize();
                debug!(feed = new_f, rapid = new_r, "overrides updated");
            }
        }

        false
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_strips_whitespace_and_uppercases() {
        let mut assembler = LineAssembler::default();
        let mut result = None;
        for &byte in b"g1 x10.5 y-2\n" {
            if let Some(finished) = assembler.push(byte) {
                result = Some(finished);
            }
        }
        assert_eq!(result.unwrap().unwrap().as_str(), "G1X10.5Y-2");
    }

    #[test]
    fn assembler_strips_comments() {
        let mut assembler = LineAssembler::default();
        let mut result = None;
        for &byte in b"G1 (move) X5 ; trailing\n" {
            if let Some(finished) = assembler.push(byte) {
                result = Some(finished);
            }
        }
        assert_eq!(result.unwrap().unwrap().as_str(), "G1X5");
    }

    #[test]
    fn assembler_drops_block_delete_lines() {
        let mut assembler = LineAssembler::default();
        let mut result = None;
        for &byte in b"/G1X5\n" {
            if let Some(finished) = assembler.push(byte) {
                result = Some(finished);
            }
        }
        assert_eq!(result.unwrap().unwrap().as_str(), "");
    }

    #[test]
    fn assembler_reports_overflow_once() {
        let mut assembler = LineAssembler::default();
        let long_line = vec![b'X'; 2 * LINE_BUFFER_SIZE];
        let mut results = Vec::new();
        for byte in long_line {
            if let Some(finished) = assembler.push(byte) {
                results.push(finished);
            }
        }
        assert!(results.is_empty());
        let finished = assembler.push(b'\n').unwrap();
        assert_eq!(finished, Err(Status::Overflow));
        // Buffer is usable again afterwards.
        assert_eq!(assembler.push(b'\n').unwrap().unwrap().as_str(), "");
    }

    #[test]
    fn realtime_bytes_set_flags() {
        let signals = RtSignals::new();
        assert!(intercept_realtime_byte(b'?', &signals));
        assert!(intercept_realtime_byte(b'!', &signals));
        let taken = signals.take_exec();
        assert!(taken.contains(ExecState::STATUS_REPORT));
        assert!(taken.contains(ExecState::FEED_HOLD));

        assert!(intercept_realtime_byte(0x91, &signals));
        assert_eq!(signals.take_override(), ExecOverride::FEED_COARSE_PLUS);
    }

    #[test]
    fn reserved_extended_bytes_consumed_silently() {
        let signals = RtSignals::new();
        assert!(intercept_realtime_byte(0xA3, &signals));
        assert!(signals.take_exec().is_empty());
        assert!(signals.take_override().is_empty());
    }

    #[test]
    fn normal_bytes_not_intercepted() {
        let signals = RtSignals::new();
        assert!(!intercept_realtime_byte(b'G', &signals));
        assert!(!intercept_realtime_byte(b'1', &signals));
        assert!(!intercept_realtime_byte(b'\n', &signals));
    }
}
