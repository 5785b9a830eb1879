//! # Kerf Simulator
//!
//! Runs the motion firmware core over stdin/stdout: g-code lines in,
//! `ok`/`error:N` acks and status reports out, with a recording step
//! driver standing in for the pulse hardware. Realtime command bytes
//! (`?`, `!`, `~`, 0x18, and the 0x80+ override set) act immediately,
//! even mid-line.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kerf_core::settings::SettingsStore;
use kerf_core::system::Machine;

#[derive(Parser, Debug)]
#[command(name = "kerf", about = "CNC motion core simulator")]
struct Args {
    /// Machine settings TOML; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pin to this CPU and raise to SCHED_FIFO (requires the `rt`
    /// feature and privileges).
    #[arg(long)]
    rt_cpu: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => SettingsStore::load(path)?,
        None => SettingsStore::new(Default::default()),
    };

    if let Some(cpu) = args.rt_cpu {
        kerf_core::rt::harden_step_loop(cpu)?;
    }

    let mut machine = Machine::new(settings);
    info!("kerf core ready");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let build_info = machine.settings.build_info();
    if build_info.is_empty() {
        writeln!(out, "Kerf 0.1.0 ['?' status, '!' hold, '~' resume]")?;
    } else {
        writeln!(out, "Kerf 0.1.0 [{build_info}]")?;
    }

    machine.run_startup_lines();
    flush_output(&mut machine, &mut out)?;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        machine.process_input(line.as_bytes());
        machine.process_input(b"\n");
        // Execute everything this line queued before the next read,
        // serial back-pressure standing in for flow control.
        machine.run_to_idle();
        flush_output(&mut machine, &mut out)?;
    }

    Ok(())
}

fn flush_output(machine: &mut Machine, out: &mut impl Write) -> std::io::Result<()> {
    for line in machine.out.take_all() {
        writeln!(out, "{line}")?;
    }
    out.flush()
}
