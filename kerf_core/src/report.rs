//! Host-bound line formatting: acks, realtime status reports, alarms,
//! and feedback messages.
//!
//! Wire format, one line each:
//! - `ok` / `error:N` per submitted line,
//! - `<State|MPos:x,y,z|FS:f,s|...>` on status request,
//! - `ALARM:N` on latched faults,
//! - `[MSG:...]` for feedback.

use std::collections::VecDeque;
use std::fmt::Write as _;

use kerf_common::consts::{
    REPORT_WCO_REFRESH_BUSY_COUNT, REPORT_WCO_REFRESH_IDLE_COUNT,
};
use kerf_common::exec::Suspend;
use kerf_common::state::SysState;
use kerf_common::status::{Alarm, Status};

use crate::system::Machine;

/// TX-side line queue: the core pushes, the host loop drains.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
}

impl OutputBuffer {
    pub fn push(&mut self, line: String) {
        self.lines.push_back(line);
    }

    /// Remove and return all pending lines, oldest first.
    pub fn take_all(&mut self) -> Vec<String> {
        self.lines.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Per-line acknowledgement.
    pub fn ack(&mut self, result: Result<(), Status>) {
        match result {
            Ok(()) => self.push("ok".to_string()),
            Err(status) => self.push(format!("error:{}", status.code())),
        }
    }

    /// Latched fault announcement.
    pub fn alarm(&mut self, alarm: Alarm) {
        self.push(format!("ALARM:{}", alarm.code()));
    }

    /// Feedback message.
    pub fn message(&mut self, text: &str) {
        self.push(format!("[MSG:{text}]"));
    }
}

/// Format an axis vector as the report's comma-separated triple.
fn write_axis_values(out: &mut String, values: &[f32]) {
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        let _ = write!(out, "{value:.3}");
    }
}

impl Machine {
    /// Emit one realtime status report line.
    ///
    /// `MPos` and `FS` are always present. `WCO` refreshes on a
    /// countdown so hosts track offset changes without paying for the
    /// field every report; `Ov` appears on the report after an override
    /// change, suppressed while `WCO` occupies the slot.
    pub fn report_realtime_status(&mut self) {
        let mpos = self.machine_position();
        let rate = self.stepper.realtime_rate();

        let mut line = String::with_capacity(64);
        line.push('<');
        match self.sys.state {
            SysState::Hold => {
                let sub = if self.sys.suspend.contains(Suspend::HOLD_COMPLETE) {
                    '0'
                } else {
                    '1'
                };
                let _ = write!(line, "Hold:{sub}");
            }
            state => line.push_str(state.report_name()),
        }

        line.push_str("|MPos:");
        write_axis_values(&mut line, &mpos);

        // Feed and (always-zero) spindle field.
        let _ = write!(line, "|FS:{:.0},0", rate);

        if self.sys.report_wco_counter == 0 {
            line.push_str("|WCO:");
            write_axis_values(&mut line, &self.gc.wco());
            self.sys.report_wco_counter = if self.sys.state.is_motion_state() {
                REPORT_WCO_REFRESH_BUSY_COUNT
            } else {
                REPORT_WCO_REFRESH_IDLE_COUNT
            };
        } else {
            self.sys.report_wco_counter -= 1;
            if self.sys.report_ovr_pending {
                let _ = write!(
                    line,
                    "|Ov:{},{},100",
                    self.sys.f_override, self.sys.r_override
                );
                self.sys.report_ovr_pending = false;
            }
        }

        line.push('>');
        self.out.push(line);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
