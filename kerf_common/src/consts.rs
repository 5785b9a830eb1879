//! System-wide constants for the kerf workspace.
//!
//! Single source of truth for all numeric limits and timing bases.
//! Imported by all crates — no duplication permitted.

/// Number of controlled axes (X, Y, Z).
pub const N_AXIS: usize = 3;

/// Number of work coordinate systems (G54 through G59).
pub const N_COORDINATE_SYSTEM: usize = 6;

/// Number of stored startup lines executed at reset.
pub const N_STARTUP_LINE: usize = 2;

/// Serial line buffer capacity in bytes, terminator included.
pub const LINE_BUFFER_SIZE: usize = 80;

/// Planner ring capacity in blocks.
pub const BLOCK_BUFFER_SIZE: usize = 16;

/// Step segment queue capacity.
pub const SEGMENT_BUFFER_SIZE: usize = 6;

/// Segment generation rate. Each prepped segment spans
/// `1 / ACCELERATION_TICKS_PER_SECOND` seconds of wall-clock motion.
pub const ACCELERATION_TICKS_PER_SECOND: u32 = 100;

/// Segment duration in minutes (planner rates are per-minute).
pub const DT_SEGMENT: f32 = 1.0 / (ACCELERATION_TICKS_PER_SECOND as f32 * 60.0);

/// Arc chords generated between exact sin/cos corrections.
pub const N_ARC_CORRECTION: u32 = 12;

/// Dwell poll granularity [ms]. Realtime flags are checked every step.
pub const DWELL_TIME_STEP_MS: u64 = 50;

/// Floor for computed junction speeds [mm/min].
pub const MINIMUM_JUNCTION_SPEED: f32 = 0.0;

/// Floor for programmed feed rates [mm/min].
pub const MINIMUM_FEED_RATE: f32 = 1.0;

/// Planner block exit-speed floor [mm/min]. Guarantees every block can
/// always decelerate to a stop within itself.
pub const MINIMUM_PLANNER_SPEED: f32 = 0.05;

/// Largest accepted N line number.
pub const MAX_LINE_NUMBER: u32 = 10_000_000;

/// Line number reported while executing a jog block.
pub const JOG_LINE_NUMBER: u32 = 0;

/// Step timer base frequency [Hz]. All segment periods are expressed in
/// ticks of this clock.
pub const STEP_TIMER_HZ: u32 = 16_000_000;

/// AMASS level 1 engages below this step rate [Hz] (doubles the tick rate).
pub const AMASS_LEVEL1_HZ: u32 = 8_000;
/// AMASS level 2 engages below this step rate [Hz].
pub const AMASS_LEVEL2_HZ: u32 = 4_000;
/// AMASS level 3 engages below this step rate [Hz].
pub const AMASS_LEVEL3_HZ: u32 = 2_000;
/// Highest AMASS oversampling shift (factor 8).
pub const AMASS_MAX_LEVEL: u8 = 3;

/// Millimeters per inch, for G20 input scaling.
pub const MM_PER_INCH: f32 = 25.4;

/// Default feed override [%].
pub const DEFAULT_FEED_OVERRIDE: u8 = 100;
/// Feed override ceiling [%].
pub const MAX_FEED_RATE_OVERRIDE: u8 = 200;
/// Feed override floor [%].
pub const MIN_FEED_RATE_OVERRIDE: u8 = 10;
/// Coarse feed override increment [%].
pub const FEED_OVERRIDE_COARSE_INCREMENT: u8 = 10;
/// Fine feed override increment [%].
pub const FEED_OVERRIDE_FINE_INCREMENT: u8 = 1;

/// Default rapid override [%].
pub const DEFAULT_RAPID_OVERRIDE: u8 = 100;
/// Medium rapid override preset [%].
pub const RAPID_OVERRIDE_MEDIUM: u8 = 50;
/// Low rapid override preset [%].
pub const RAPID_OVERRIDE_LOW: u8 = 25;

/// Status reports emitted before the work coordinate offset is refreshed.
pub const REPORT_WCO_REFRESH_IDLE_COUNT: u8 = 10;
/// WCO refresh interval while in motion (slower, the loop is busier).
pub const REPORT_WCO_REFRESH_BUSY_COUNT: u8 = 30;
