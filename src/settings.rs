use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

const DEBUG_ENV_VAR: &str = "AOITRACK_DEBUG_AOI";

/// Timer cadences, buffer limits and export naming for one tracking session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerSettings {
    pub poll_interval_ms: u64,
    pub overlay_refresh_ms: u64,
    pub save_debounce_ms: u64,
    pub forced_save_interval_ms: u64,
    /// Gaze samples kept before a trim is triggered.
    pub gaze_capacity: usize,
    /// Gaze samples kept after a trim (the most recent ones).
    pub gaze_retain: usize,
    pub export_prefix: String,
    pub debug_overlay: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            overlay_refresh_ms: 500,
            save_debounce_ms: 1_000,
            forced_save_interval_ms: 30_000,
            gaze_capacity: 10_000,
            gaze_retain: 5_000,
            export_prefix: "reading_assessment".into(),
            debug_overlay: false,
        }
    }
}

impl TrackerSettings {
    /// Loads settings from a JSON file. A missing file yields defaults, and so
    /// does a file that no longer parses.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log::warn!(
                        "Ignoring unparsable settings at {}: {err}",
                        path.display()
                    );
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        settings.apply_env_overrides();
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) {
        let debug_mode = std::env::var(DEBUG_ENV_VAR)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.debug_overlay = true;
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn overlay_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.overlay_refresh_ms.max(1))
    }

    pub fn forced_save_interval(&self) -> Duration {
        Duration::from_millis(self.forced_save_interval_ms.max(1))
    }
}
