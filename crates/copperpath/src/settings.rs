use crate::error::SettingsError;
use crate::geometry::RESOLUTION;
use crate::optimizer::DEFAULT_MAX_ITERATIONS;
use crate::postprocessor::MachineParameters;
use crate::tiling::{TilingConfig, RETRY_DELAY, WINDOW_OVERLAP, WINDOW_SIZE};
use crate::time_estimator::MotionParameters;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

/// Everything a trace-milling or rub-out job can be tuned with.
///
/// Lengths of generated geometry (`tool_diameter`, offsets) are in internal
/// units; machine heights are in mm and feeds in mm/min.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MillingSettings {
    pub tool_diameter: i32,
    pub feed_xy: f64,
    pub feed_z: f64,
    /// Arc feed as a percentage of `feed_xy`.
    pub feed_arcs_percent: i32,
    pub clearance: f64,
    pub safety_height: f64,
    pub working_height: f64,
    pub spindle_speed: u32,
    /// Seconds to wait for the spindle to reach speed.
    pub spindle_pause: f64,
    pub additional_passes: i32,
    /// Overlap between neighbouring passes, in percent of the tool diameter.
    pub additional_passes_overlap: i32,
    pub additional_passes_pads_only: bool,
    pub rub_out_initial_offset: i32,
    pub rub_out_overlap: i32,
    pub threads: usize,
    pub window_size: usize,
    /// Raster pixels per internal unit.
    pub scale: f64,
    pub optimizer_iterations: usize,
}

impl Default for MillingSettings {
    fn default() -> Self {
        Self {
            tool_diameter: 300,
            feed_xy: 300.0,
            feed_z: 200.0,
            feed_arcs_percent: 50,
            clearance: 5.0,
            safety_height: 2.0,
            working_height: -0.045,
            spindle_speed: 12_000,
            spindle_pause: 2.0,
            additional_passes: 0,
            additional_passes_overlap: 20,
            additional_passes_pads_only: false,
            rub_out_initial_offset: 0,
            rub_out_overlap: 20,
            threads: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            window_size: WINDOW_SIZE,
            scale: 1.0,
            optimizer_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl MillingSettings {
    /// Reject values the generators cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in [
            ("tool_diameter", self.tool_diameter as f64),
            ("feed_xy", self.feed_xy),
            ("feed_z", self.feed_z),
            ("scale", self.scale),
            ("threads", self.threads as f64),
            ("window_size", self.window_size as f64),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(SettingsError::NotPositive { name, value });
            }
        }
        for (name, value, min, max) in [
            ("feed_arcs_percent", self.feed_arcs_percent, 1, 100),
            ("additional_passes", self.additional_passes, 0, 100),
            ("additional_passes_overlap", self.additional_passes_overlap, 0, 99),
            ("rub_out_overlap", self.rub_out_overlap, 0, 99),
            ("rub_out_initial_offset", self.rub_out_initial_offset, 0, i32::MAX),
        ] {
            if !(min..=max).contains(&value) {
                return Err(SettingsError::OutOfRange {
                    name,
                    value: value as i64,
                    min: min as i64,
                    max: max as i64,
                });
            }
        }
        Ok(())
    }

    /// Tolerance used to merge segments and link chains, in units.
    pub fn merge_tolerance(&self) -> i32 {
        self.tool_diameter / 4
    }

    /// Motion model for the optimizer: feeds in mm/s.
    pub fn to_motion_parameters(&self) -> MotionParameters {
        let feed_xy = self.feed_xy / 60.0;
        MotionParameters {
            feed_xy,
            feed_z: self.feed_z / 60.0,
            feed_arcs: feed_xy * self.feed_arcs_percent as f64 / 100.0,
            clearance: self.clearance,
            safety_height: self.safety_height,
            tolerance: self.merge_tolerance() as f64 / RESOLUTION as f64,
        }
    }

    pub fn to_machine_parameters(&self) -> MachineParameters {
        MachineParameters {
            feed_xy: self.feed_xy,
            feed_z: self.feed_z,
            feed_arcs: self.feed_xy * self.feed_arcs_percent as f64 / 100.0,
            clearance: self.clearance,
            safety_height: self.safety_height,
            working_height: self.working_height,
            spindle_speed: self.spindle_speed,
            spindle_pause: self.spindle_pause,
            tolerance: self.merge_tolerance() as f64 / RESOLUTION as f64,
        }
    }

    pub fn tiling_config(&self) -> TilingConfig {
        TilingConfig {
            window_size: self.window_size,
            overlap: WINDOW_OVERLAP,
            threads: self.threads,
            scale: self.scale,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Load settings from the provided path. Missing files yield the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data =
            fs::read(path).with_context(|| format!("read milling settings {}", path.display()))?;
        let settings: MillingSettings =
            serde_json::from_slice(&data).context("deserialize milling settings")?;
        settings
            .validate()
            .with_context(|| format!("invalid milling settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Persist the settings to the provided path, ensuring the directory exists.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create settings directory {}", parent.display()))?;
        }

        let data =
            serde_json::to_vec_pretty(self).context("serialize milling settings to JSON bytes")?;
        fs::write(path, data).with_context(|| format!("write milling settings {}", path.display()))
    }

    /// Resolve the default settings path (`~/.copperpath/settings.json`).
    pub fn default_settings_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
        Ok(home.join(".copperpath").join("settings.json"))
    }
}
