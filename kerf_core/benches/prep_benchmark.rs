//! Segment prep throughput benchmark.
//!
//! Runs the full pipeline on a long feed move and measures step events
//! per second the foreground prep plus pulse engine can sustain.

use criterion::{Criterion, criterion_group, criterion_main};

use kerf_common::config::MachineSettings;
use kerf_core::settings::SettingsStore;
use kerf_core::system::Machine;

fn bench_long_move_throughput(c: &mut Criterion) {
    c.bench_function("prep_and_pulse_25k_steps", |b| {
        b.iter(|| {
            let mut machine = Machine::new(SettingsStore::new(MachineSettings::default()));
            machine.send_line("G1X100F500");
            machine.run_to_idle();
            machine.sys.signals.position_snapshot()[0]
        })
    });
}

fn bench_arc_decomposition(c: &mut Criterion) {
    c.bench_function("arc_full_circle_pipeline", |b| {
        b.iter(|| {
            let mut machine = Machine::new(SettingsStore::new(MachineSettings::default()));
            machine.send_line("G2X10Y0I5J0F500");
            machine.run_to_idle();
            machine.sys.signals.position_snapshot()
        })
    });
}

criterion_group!(benches, bench_long_move_throughput, bench_arc_decomposition);
criterion_main!(benches);
