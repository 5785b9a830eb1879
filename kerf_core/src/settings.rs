//! Settings store: boot-time machine parameters plus persisted
//! coordinate data.
//!
//! Two layers with different lifetimes. `MachineSettings` loads once
//! from TOML and is immutable afterwards. The persisted parameter file
//! (work coordinate systems, G28/G30 predefined positions, startup
//! lines, build info) is read at boot and rewritten on every coordinate
//! write; records carry a byte checksum so a torn write reads back as
//! `SettingReadFail` instead of silently wrong offsets. Callers that
//! write while a cycle may be active must synchronize the planner first.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use kerf_common::axis::MmVector;
use kerf_common::config::MachineSettings;
use kerf_common::consts::{N_AXIS, N_COORDINATE_SYSTEM, N_STARTUP_LINE};
use kerf_common::status::Status;

// ─── Error Type ─────────────────────────────────────────────────────

/// Settings loading/persistence error.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// File I/O error.
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error for the machine settings file.
    #[error("settings parse error: {0}")]
    Parse(String),
    /// Parameter bounds violation.
    #[error("settings validation: {0}")]
    Validation(String),
    /// Persisted parameter file failed its checksum.
    #[error("persisted parameters corrupt (checksum mismatch)")]
    Checksum,
}

// ─── Persisted Parameters ───────────────────────────────────────────

/// Coordinate slots beyond G54..G59: G28 and G30 predefined positions.
pub const COORD_INDEX_G28: usize = N_COORDINATE_SYSTEM;
pub const COORD_INDEX_G30: usize = N_COORDINATE_SYSTEM + 1;
const N_COORD_RECORDS: usize = N_COORDINATE_SYSTEM + 2;

/// On-disk record for all non-TOML persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedParams {
    /// G54..G59 offsets plus G28/G30 predefined positions, mm.
    coords: Vec<MmVector>,
    /// Stored startup lines, executed in order at reset.
    startup_lines: Vec<String>,
    /// Free-form build/version string reported to hosts.
    build_info: String,
    /// Additive byte checksum over the payload fields.
    checksum: u8,
}

impl Default for PersistedParams {
    fn default() -> Self {
        let mut params = Self {
            coords: vec![[0.0; N_AXIS]; N_COORD_RECORDS],
            startup_lines: vec![String::new(); N_STARTUP_LINE],
            build_info: String::new(),
            checksum: 0,
        };
        params.checksum = params.compute_checksum();
        params
    }
}

impl PersistedParams {
    /// Additive byte checksum over every payload byte.
    fn compute_checksum(&self) -> u8 {
        let mut sum: u8 = 0;
        for coord in &self.coords {
            for value in coord {
                for byte in value.to_le_bytes() {
                    sum = sum.wrapping_add(byte);
                }
            }
        }
        for line in &self.startup_lines {
            for byte in line.as_bytes() {
                sum = sum.wrapping_add(*byte);
            }
        }
        for byte in self.build_info.as_bytes() {
            sum = sum.wrapping_add(*byte);
        }
        sum
    }

    fn verify(&self) -> bool {
        self.coords.len() == N_COORD_RECORDS
            && self.startup_lines.len() == N_STARTUP_LINE
            && self.checksum == self.compute_checksum()
    }
}

// ─── Store ──────────────────────────────────────────────────────────

/// Boot-loaded machine parameters plus the persisted coordinate records.
#[derive(Debug)]
pub struct SettingsStore {
    /// Validated machine parameters.
    pub machine: MachineSettings,
    params: PersistedParams,
    /// Where persisted parameters are written; `None` keeps them in
    /// memory only (tests, check-mode hosts).
    params_path: Option<PathBuf>,
}

impl SettingsStore {
    /// In-memory store with default parameters.
    pub fn new(machine: MachineSettings) -> Self {
        Self {
            machine,
            params: PersistedParams::default(),
            params_path: None,
        }
    }

    /// Load machine settings from a TOML file and, when present, the
    /// persisted parameter file next to it (`<stem>.params.json`).
    pub fn load(settings_path: &Path) -> Result<Self, SettingsError> {
        let toml_src = std::fs::read_to_string(settings_path)?;
        let machine: MachineSettings =
            toml::from_str(&toml_src).map_err(|e| SettingsError::Parse(e.to_string()))?;
        machine.validate().map_err(SettingsError::Validation)?;

        let params_path = settings_path.with_extension("params.json");
        let params = match std::fs::read(&params_path) {
            Ok(bytes) => {
                let params: PersistedParams = serde_json::from_slice(&bytes)
                    .map_err(|e| SettingsError::Parse(e.to_string()))?;
                if !params.verify() {
                    return Err(SettingsError::Checksum);
                }
                params
            }
            Err(_) => {
                info!(path = %params_path.display(), "no persisted parameters, using zeros");
                PersistedParams::default()
            }
        };

        Ok(Self {
            machine,
            params,
            params_path: Some(params_path),
        })
    }

    /// Read one coordinate record (G54..G59, G28, G30).
    ///
    /// Fails with the g-code status the parser reports for a bad
    /// parameter read, so callers can surface it on the wire directly.
    pub fn read_coord_data(&self, index: usize) -> Result<MmVector, Status> {
        self.params
            .coords
            .get(index)
            .copied()
            .ok_or(Status::SettingReadFail)
    }

    /// Write one coordinate record and persist.
    ///
    /// Callers must have synchronized the planner: the write can stall
    /// the loop long enough to starve segment prep.
    pub fn write_coord_data(&mut self, index: usize, data: &MmVector) -> Result<(), Status> {
        let slot = self
            .params
            .coords
            .get_mut(index)
            .ok_or(Status::SettingReadFail)?;
        *slot = *data;
        self.persist();
        Ok(())
    }

    /// Stored startup line, if any.
    pub fn startup_line(&self, index: usize) -> Option<&str> {
        let line = self.params.startup_lines.get(index)?;
        if line.is_empty() { None } else { Some(line) }
    }

    /// Replace a startup line and persist.
    pub fn set_startup_line(&mut self, index: usize, line: &str) -> Result<(), Status> {
        let slot = self
            .params
            .startup_lines
            .get_mut(index)
            .ok_or(Status::SettingReadFail)?;
        *slot = line.to_string();
        self.persist();
        Ok(())
    }

    /// Host-visible build info string.
    pub fn build_info(&self) -> &str {
        &self.params.build_info
    }

    fn persist(&mut self) {
        self.params.checksum = self.params.compute_checksum();
        let Some(path) = &self.params_path else {
            return;
        };
        match serde_json::to_vec_pretty(&self.params) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    warn!(path = %path.display(), error = %e, "persist failed");
                }
            }
            Err(e) => warn!(error = %e, "persist serialization failed"),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
