//! Machine settings types, loaded from TOML at boot.
//!
//! All types use `serde::Deserialize` with `#[serde(default = ...)]`
//! functions so a partial file falls back to safe defaults. Numeric
//! parameters have named const bounds checked by `validate()`.

use serde::{Deserialize, Serialize};

use crate::consts::N_AXIS;

/// Smallest accepted steps/mm.
pub const STEPS_PER_MM_MIN: f32 = 0.001;
/// Largest accepted steps/mm.
pub const STEPS_PER_MM_MAX: f32 = 50_000.0;
/// Junction deviation bounds [mm].
pub const JUNCTION_DEVIATION_MIN: f32 = 0.001;
pub const JUNCTION_DEVIATION_MAX: f32 = 5.0;
/// Arc tolerance bounds [mm].
pub const ARC_TOLERANCE_MIN: f32 = 0.0001;
pub const ARC_TOLERANCE_MAX: f32 = 1.0;
/// Step pulse width bounds [µs].
pub const STEP_PULSE_US_MIN: u8 = 2;
pub const STEP_PULSE_US_MAX: u8 = 100;

/// Per-axis machine parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AxisSettings {
    /// Steps issued per millimeter of travel.
    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: f32,
    /// Maximum rate [mm/min].
    #[serde(default = "default_max_rate")]
    pub max_rate: f32,
    /// Acceleration [mm/sec²]. Converted to mm/min² at the planner seam.
    #[serde(default = "default_acceleration")]
    pub acceleration: f32,
    /// Usable travel from home [mm]. Soft-limit span for jogs.
    #[serde(default = "default_max_travel")]
    pub max_travel: f32,
}

fn default_steps_per_mm() -> f32 {
    250.0
}
fn default_max_rate() -> f32 {
    500.0
}
fn default_acceleration() -> f32 {
    10.0
}
fn default_max_travel() -> f32 {
    200.0
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self {
            steps_per_mm: default_steps_per_mm(),
            max_rate: default_max_rate(),
            acceleration: default_acceleration(),
            max_travel: default_max_travel(),
        }
    }
}

/// Complete machine parameter set.
///
/// Immutable after boot; a settings write from the host forces a planner
/// sync first (enforced by the settings store caller).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSettings {
    /// Per-axis parameters, X/Y/Z order.
    #[serde(default)]
    pub axes: [AxisSettings; N_AXIS],
    /// Corner speed budget: tolerated chord-to-corner deviation [mm].
    #[serde(default = "default_junction_deviation")]
    pub junction_deviation: f32,
    /// Maximum chord-to-arc sagitta when decomposing arcs [mm].
    #[serde(default = "default_arc_tolerance")]
    pub arc_tolerance: f32,
    /// Step pulse high time [µs].
    #[serde(default = "default_step_pulse_us")]
    pub step_pulse_us: u8,
    /// Restore feed/rapid overrides to 100% at program end (M2/M30).
    #[serde(default = "default_restore_overrides")]
    pub restore_overrides: bool,
}

fn default_junction_deviation() -> f32 {
    0.01
}
fn default_arc_tolerance() -> f32 {
    0.002
}
fn default_step_pulse_us() -> u8 {
    10
}
fn default_restore_overrides() -> bool {
    true
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            axes: [AxisSettings::default(); N_AXIS],
            junction_deviation: default_junction_deviation(),
            arc_tolerance: default_arc_tolerance(),
            step_pulse_us: default_step_pulse_us(),
            restore_overrides: default_restore_overrides(),
        }
    }
}

impl MachineSettings {
    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), String> {
        for (idx, axis) in self.axes.iter().enumerate() {
            if !(STEPS_PER_MM_MIN..=STEPS_PER_MM_MAX).contains(&axis.steps_per_mm) {
                return Err(format!(
                    "axis {idx}: steps_per_mm {} out of range [{STEPS_PER_MM_MIN}, {STEPS_PER_MM_MAX}]",
                    axis.steps_per_mm
                ));
            }
            if axis.max_rate <= 0.0 {
                return Err(format!("axis {idx}: max_rate must be positive"));
            }
            if axis.acceleration <= 0.0 {
                return Err(format!("axis {idx}: acceleration must be positive"));
            }
            if axis.max_travel <= 0.0 {
                return Err(format!("axis {idx}: max_travel must be positive"));
            }
        }
        if !(JUNCTION_DEVIATION_MIN..=JUNCTION_DEVIATION_MAX).contains(&self.junction_deviation) {
            return Err(format!(
                "junction_deviation {} out of range [{JUNCTION_DEVIATION_MIN}, {JUNCTION_DEVIATION_MAX}]",
                self.junction_deviation
            ));
        }
        if !(ARC_TOLERANCE_MIN..=ARC_TOLERANCE_MAX).contains(&self.arc_tolerance) {
            return Err(format!(
                "arc_tolerance {} out of range [{ARC_TOLERANCE_MIN}, {ARC_TOLERANCE_MAX}]",
                self.arc_tolerance
            ));
        }
        if !(STEP_PULSE_US_MIN..=STEP_PULSE_US_MAX).contains(&self.step_pulse_us) {
            return Err(format!(
                "step_pulse_us {} out of range [{STEP_PULSE_US_MIN}, {STEP_PULSE_US_MAX}]",
                self.step_pulse_us
            ));
        }
        Ok(())
    }

    /// Per-axis steps/mm as one array, the shape the conversion helpers take.
    pub fn steps_per_mm(&self) -> [f32; N_AXIS] {
        let mut out = [0.0; N_AXIS];
        for idx in 0..N_AXIS {
            out[idx] = self.axes[idx].steps_per_mm;
        }
        out
    }

    /// Per-axis max rates [mm/min].
    pub fn max_rates(&self) -> [f32; N_AXIS] {
        let mut out = [0.0; N_AXIS];
        for idx in 0..N_AXIS {
            out[idx] = self.axes[idx].max_rate;
        }
        out
    }

    /// Per-axis accelerations converted to mm/min², the planner's unit.
    pub fn accelerations_per_min2(&self) -> [f32; N_AXIS] {
        let mut out = [0.0; N_AXIS];
        for idx in 0..N_AXIS {
            out[idx] = self.axes[idx].acceleration * 3600.0;
        }
        out
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(MachineSettings::default().validate().is_ok());
    }

    #[test]
    fn zero_steps_per_mm_rejected() {
        let mut settings = MachineSettings::default();
        settings.axes[1].steps_per_mm = 0.0;
        let err = settings.validate().unwrap_err();
        assert!(err.contains("axis 1"));
    }

    #[test]
    fn junction_deviation_bounds() {
        let mut settings = MachineSettings::default();
        settings.junction_deviation = 0.0;
        assert!(settings.validate().is_err());
        settings.junction_deviation = 0.02;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn acceleration_unit_conversion() {
        let settings = MachineSettings::default();
        let per_min2 = settings.accelerations_per_min2();
        // 10 mm/sec² = 36000 mm/min².
        assert!((per_min2[0] - 36_000.0).abs() < 1e-3);
    }
}
