//! Run configuration: defaults, optional `.strata.toml` overrides, CLI on
//! top.
//!
//! The precedence is defaults ← config file ← command line; the CLI crate
//! applies the last layer. Invalid burndown numbers are repaired (not
//! rejected) with a warning, matching the analysis' initialize contract.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// File name probed in the repository root for configuration overrides.
pub const CONFIG_FILE: &str = ".strata.toml";

/// All user-facing engine options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Band width in ticks.
    pub granularity: u32,
    /// Snapshot distance in ticks; at most `granularity`.
    pub sampling: u32,
    /// Track per-file burndown matrices.
    pub burndown_files: bool,
    /// Track per-author matrices and the interaction matrix.
    pub burndown_people: bool,
    /// Validate every tree after every update (slow).
    pub burndown_debug: bool,
    /// Tick size in seconds (default one day).
    pub tick_size_secs: i64,
    /// Arena node count from which an idle branch hibernates; 0 disables.
    pub hibernation_threshold: usize,
    /// Spill hibernation images to disk instead of keeping them in memory.
    pub hibernation_to_disk: bool,
    /// Directory for on-disk hibernation images.
    pub hibernation_dir: PathBuf,
    /// Count commits whose tree diff is empty.
    pub empty_commits: bool,
    /// Identity dictionary file (pipe-separated aliases, one author per
    /// line); omitted means the dictionary is generated from the commits.
    pub people_dict: Option<PathBuf>,
    /// Revision to replay from; `None` means `HEAD`.
    pub head: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            granularity: 30,
            sampling: 30,
            burndown_files: false,
            burndown_people: false,
            burndown_debug: false,
            tick_size_secs: 24 * 3600,
            hibernation_threshold: 0,
            hibernation_to_disk: false,
            hibernation_dir: std::env::temp_dir(),
            empty_commits: false,
            people_dict: None,
            head: None,
        }
    }
}

impl Config {
    /// Load overrides from `dir/.strata.toml` if it exists; defaults
    /// otherwise.
    ///
    /// # Errors
    ///
    /// [`StrataError::Configuration`] when the file exists but does not
    /// parse; [`StrataError::Io`] when it cannot be read.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|e| StrataError::Io {
            path: path.clone(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| {
            StrataError::config(format!("{}: {e}", path.display()))
        })
    }

    /// Repair invalid burndown numbers with defaults, warning about each.
    #[must_use]
    pub fn repaired(mut self) -> Self {
        if self.granularity == 0 {
            tracing::warn!("granularity must be positive, falling back to 30");
            self.granularity = 30;
        }
        if self.sampling == 0 {
            tracing::warn!("sampling must be positive, falling back to granularity");
            self.sampling = self.granularity;
        }
        if self.sampling > self.granularity {
            tracing::warn!(
                sampling = self.sampling,
                granularity = self.granularity,
                "sampling cannot exceed granularity, clamping"
            );
            self.sampling = self.granularity;
        }
        if self.tick_size_secs <= 0 {
            tracing::warn!("tick size must be positive, falling back to 24h");
            self.tick_size_secs = 24 * 3600;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.granularity, 30);
        assert_eq!(config.sampling, 30);
        assert_eq!(config.tick_size_secs, 86400);
        assert!(!config.burndown_files);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "granularity = 7\nsampling = 7\nburndown_files = true\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.granularity, 7);
        assert!(config.burndown_files);
        // Untouched fields keep their defaults.
        assert_eq!(config.tick_size_secs, 86400);
    }

    #[test]
    fn unknown_field_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "granualrity = 7\n").unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(err, StrataError::Configuration { .. }));
    }

    #[test]
    fn repair_clamps_invalid_numbers() {
        let mut config = Config::default();
        config.granularity = 0;
        config.sampling = 90;
        config.tick_size_secs = -5;
        let repaired = config.repaired();
        assert_eq!(repaired.granularity, 30);
        assert_eq!(repaired.sampling, 30);
        assert_eq!(repaired.tick_size_secs, 86400);
    }

    #[test]
    fn repair_keeps_valid_numbers() {
        let mut config = Config::default();
        config.granularity = 14;
        config.sampling = 7;
        let repaired = config.repaired();
        assert_eq!(repaired.granularity, 14);
        assert_eq!(repaired.sampling, 7);
    }
}
