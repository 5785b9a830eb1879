//! Planner micro-benchmark.
//!
//! Measures the cost of the insertion path: block construction,
//! junction speed, and the reverse/forward optimization passes under a
//! full look-ahead window of direction changes.

use criterion::{Criterion, criterion_group, criterion_main};

use kerf_common::config::MachineSettings;
use kerf_common::consts::DEFAULT_FEED_OVERRIDE;
use kerf_core::planner::{PlanLineData, Planner};
use kerf_core::stepper::StPrep;

fn zigzag_target(index: usize) -> [f32; 3] {
    let x = (index + 1) as f32;
    let y = if index % 2 == 0 { 1.0 } else { -1.0 };
    [x, y, 0.0]
}

fn bench_buffer_line_storm(c: &mut Criterion) {
    let settings = MachineSettings::default();
    let pl_data = PlanLineData {
        feed_rate: 500.0,
        ..PlanLineData::default()
    };

    c.bench_function("planner_zigzag_fill_and_drain", |b| {
        b.iter(|| {
            let mut planner = Planner::new();
            let mut prep = StPrep::default();
            for index in 0..64 {
                if planner.is_full() {
                    planner.discard_current_block();
                }
                planner.buffer_line(
                    &zigzag_target(index),
                    &pl_data,
                    &settings,
                    DEFAULT_FEED_OVERRIDE,
                    100,
                    &mut prep,
                );
            }
            planner.block_count()
        })
    });
}

fn bench_override_recompute(c: &mut Criterion) {
    let settings = MachineSettings::default();
    let pl_data = PlanLineData {
        feed_rate: 500.0,
        ..PlanLineData::default()
    };
    let mut planner = Planner::new();
    let mut prep = StPrep::default();
    for index in 0..12 {
        planner.buffer_line(
            &zigzag_target(index),
            &pl_data,
            &settings,
            DEFAULT_FEED_OVERRIDE,
            100,
            &mut prep,
        );
    }

    c.bench_function("planner_override_recompute", |b| {
        let mut toggle = false;
        b.iter(|| {
            toggle = !toggle;
            let f_override = if toggle { 50 } else { 150 };
            planner.update_velocity_profile_parameters(f_override, 100);
            planner.cycle_reinitialize(&mut prep);
        })
    });
}

criterion_group!(benches, bench_buffer_line_storm, bench_override_recompute);
criterion_main!(benches);
