//! Axis primitives: fixed N-axis vectors and step/mm conversions.
//!
//! All positions flow through two representations: `MmVector` (machine
//! millimeters, float) owned by the parser and planner, and `StepVector`
//! (signed step counts from the home reference) owned by the stepper.

use crate::consts::N_AXIS;

/// X axis index.
pub const X_AXIS: usize = 0;
/// Y axis index.
pub const Y_AXIS: usize = 1;
/// Z axis index.
pub const Z_AXIS: usize = 2;

/// Position or offset in millimeters, machine frame.
pub type MmVector = [f32; N_AXIS];

/// Position in whole steps from the home reference.
pub type StepVector = [i32; N_AXIS];

/// Convert a step count on one axis to millimeters.
#[inline]
pub fn steps_to_mm(steps: i32, steps_per_mm: f32) -> f32 {
    steps as f32 / steps_per_mm
}

/// Convert a full step vector to machine millimeters.
pub fn steps_to_mpos(steps: &StepVector, steps_per_mm: &[f32; N_AXIS]) -> MmVector {
    let mut mpos = [0.0; N_AXIS];
    for idx in 0..N_AXIS {
        mpos[idx] = steps_to_mm(steps[idx], steps_per_mm[idx]);
    }
    mpos
}

/// Round a millimeter target on one axis to its step count.
#[inline]
pub fn mm_to_steps(mm: f32, steps_per_mm: f32) -> i32 {
    (mm * steps_per_mm).round() as i32
}

/// Euclidean norm of a delta vector.
pub fn magnitude(delta: &MmVector) -> f32 {
    delta.iter().map(|d| d * d).sum::<f32>().sqrt()
}

/// Normalize a delta vector in place and return its magnitude.
///
/// A zero-length vector is left untouched and reports 0.0; callers treat
/// that as an empty move.
pub fn to_unit_vector(delta: &mut MmVector) -> f32 {
    let mag = magnitude(delta);
    if mag > 0.0 {
        let inv = 1.0 / mag;
        for d in delta.iter_mut() {
            *d *= inv;
        }
    }
    mag
}

/// Fold per-axis limits through a unit vector: the tightest value of
/// `limit[i] / |unit[i]|` over the axes the move actually uses.
///
/// Used for both the acceleration and rapid-rate ceilings of a planner
/// block, so a diagonal move never exceeds any single axis limit.
pub fn limit_by_axis_maximum(max_values: &[f32; N_AXIS], unit_vec: &MmVector) -> f32 {
    let mut limit = f32::MAX;
    for idx in 0..N_AXIS {
        if unit_vec[idx] != 0.0 {
            limit = limit.min((max_values[idx] / unit_vec[idx]).abs());
        }
    }
    limit
}

/// Hypotenuse of two components. Small wrapper to keep arc math readable.
#[inline]
pub fn hypot2(x: f32, y: f32) -> f32 {
    (x * x + y * y).sqrt()
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_mm_round_trip() {
        let steps_per_mm = 250.0;
        for mm in [0.0, 1.0, 10.5, -3.2, 999.996] {
            let steps = mm_to_steps(mm, steps_per_mm);
            let back = steps_to_mm(steps, steps_per_mm);
            assert!(
                (back - mm).abs() <= 1.0 / steps_per_mm,
                "round trip {mm} -> {steps} -> {back}"
            );
        }
    }

    #[test]
    fn unit_vector_normalizes() {
        let mut v = [3.0, 4.0, 0.0];
        let mag = to_unit_vector(&mut v);
        assert!((mag - 5.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(v[2], 0.0);
    }

    #[test]
    fn unit_vector_zero_length() {
        let mut v = [0.0; 3];
        assert_eq!(to_unit_vector(&mut v), 0.0);
        assert_eq!(v, [0.0; 3]);
    }

    #[test]
    fn axis_limit_folding_takes_tightest() {
        // Pure X move is limited by X alone.
        let unit = [1.0, 0.0, 0.0];
        assert_eq!(limit_by_axis_maximum(&[500.0, 200.0, 100.0], &unit), 500.0);

        // Diagonal move: each axis sees |unit| of the limit.
        let mut diag = [1.0, 1.0, 0.0];
        to_unit_vector(&mut diag);
        let limited = limit_by_axis_maximum(&[500.0, 200.0, 100.0], &diag);
        assert!((limited - 200.0 * 2.0f32.sqrt()).abs() < 1e-3);
    }

    #[test]
    fn steps_to_mpos_converts_all_axes() {
        let mpos = steps_to_mpos(&[250, -500, 0], &[250.0, 250.0, 250.0]);
        assert_eq!(mpos, [1.0, -2.0, 0.0]);
    }
}
