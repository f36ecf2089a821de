//! Configuration types and loading
//!
//! The configuration is loaded once at startup, validated, and then shared
//! read-only (behind an `Arc`) by every process in the pool.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::GpsTime;
use crate::pool::PoolConfig;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process pool and collective behaviour
    pub pool: PoolConfig,

    /// Analysis span, windowing and detectors
    pub analysis: AnalysisConfig,

    /// Noise-spectrum distance bounds
    pub sensitivity: SensitivityConfig,

    /// Template bank
    pub templates: TemplateConfig,

    /// Background estimation and alert gating
    pub background: BackgroundConfig,

    /// Artifact output
    pub output: OutputConfig,

    /// Synthetic collaborators used by `lt run`
    pub simulation: SimulationConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.pool.size < 2 {
            return Err(eyre::eyre!(
                "Pool size must be at least 2 (one coordinator plus one worker), got {}",
                self.pool.size
            ));
        }
        if self.analysis.window_length == 0 {
            return Err(eyre::eyre!("Window length must be greater than zero"));
        }
        if self.analysis.end_time <= self.analysis.start_time {
            return Err(eyre::eyre!(
                "End time {} must be after start time {}",
                self.analysis.end_time,
                self.analysis.start_time
            ));
        }
        if self.analysis.detectors.is_empty() {
            return Err(eyre::eyre!("At least one detector must be configured"));
        }
        let mut names = BTreeSet::new();
        for detector in &self.analysis.detectors {
            if !names.insert(detector.name.as_str()) {
                return Err(eyre::eyre!("Detector {} is configured more than once", detector.name));
            }
        }
        if self.sensitivity.min_distance > self.sensitivity.max_distance {
            return Err(eyre::eyre!(
                "Sensitivity min-distance {} exceeds max-distance {}",
                self.sensitivity.min_distance,
                self.sensitivity.max_distance
            ));
        }
        if self.background.ifar_upload_threshold <= 0.0 {
            return Err(eyre::eyre!(
                "IFAR upload threshold must be positive, got {}",
                self.background.ifar_upload_threshold
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .livetrig.yml
        let local_config = PathBuf::from(".livetrig.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/livetrig/livetrig.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("livetrig").join("livetrig.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed; the full load reports them once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".livetrig.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("livetrig").join("livetrig.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .find(|path| path.exists())
            .and_then(|path| Self::load_from_file(path).ok())
            .and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Sorted detector names
    pub fn detector_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.analysis.detectors.iter().map(|d| d.name.clone()).collect();
        names.sort();
        names
    }
}

/// A single detector and the channels read for it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorConfig {
    /// Detector identifier, e.g. "H1"
    pub name: String,

    /// Strain channel
    pub channel: String,

    /// Data-quality state channel
    #[serde(rename = "state-channel", default, skip_serializing_if = "Option::is_none")]
    pub state_channel: Option<String>,
}

/// Analysis span and windowing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// GPS start of the first window
    #[serde(rename = "start-time")]
    pub start_time: GpsTime,

    /// GPS stop time; no window starts at or after it
    #[serde(rename = "end-time")]
    pub end_time: GpsTime,

    /// Seconds of valid data analyzed per cycle
    #[serde(rename = "window-length")]
    pub window_length: u64,

    /// Bound on waiting for a detector's next window, in milliseconds
    #[serde(rename = "frame-read-timeout-ms")]
    pub frame_read_timeout_ms: u64,

    /// Low-frequency cutoff passed along with uploads, in Hz
    #[serde(rename = "low-frequency-cutoff")]
    pub low_frequency_cutoff: f64,

    pub detectors: Vec<DetectorConfig>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            start_time: 1_400_000_000,
            end_time: 1_400_000_080,
            window_length: 8,
            frame_read_timeout_ms: 10_000,
            low_frequency_cutoff: 20.0,
            detectors: vec![
                DetectorConfig {
                    name: "H1".to_string(),
                    channel: "H1:GDS-CALIB_STRAIN_CLEAN".to_string(),
                    state_channel: Some("H1:GDS-CALIB_STATE_VECTOR".to_string()),
                },
                DetectorConfig {
                    name: "L1".to_string(),
                    channel: "L1:GDS-CALIB_STRAIN_CLEAN".to_string(),
                    state_channel: Some("L1:GDS-CALIB_STATE_VECTOR".to_string()),
                },
            ],
        }
    }
}

impl AnalysisConfig {
    pub fn frame_read_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_read_timeout_ms)
    }
}

/// Inclusive bounds on the noise-spectrum distance estimate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityConfig {
    #[serde(rename = "min-distance")]
    pub min_distance: f64,

    #[serde(rename = "max-distance")]
    pub max_distance: f64,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            min_distance: 10.0,
            max_distance: 1000.0,
        }
    }
}

impl SensitivityConfig {
    pub fn contains(&self, distance: f64) -> bool {
        distance >= self.min_distance && distance <= self.max_distance
    }
}

/// Template bank configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Number of templates in the bank
    #[serde(rename = "bank-size")]
    pub bank_size: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self { bank_size: 64 }
    }
}

/// Background estimation and alert gating
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Hand merged results to the background estimator
    pub enabled: bool,

    /// Foreground IFAR must exceed this (in years) to be uploaded
    #[serde(rename = "ifar-upload-threshold")]
    pub ifar_upload_threshold: f64,

    /// Allow uploads at all; otherwise every candidate is archived only
    #[serde(rename = "enable-upload")]
    pub enable_upload: bool,

    /// Mark uploads as tests
    pub testing: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ifar_upload_threshold: 1.0,
            enable_upload: false,
            testing: true,
        }
    }
}

/// Artifact output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root directory for artifacts
    pub directory: PathBuf,

    /// Label embedded in every artifact name
    pub label: String,

    /// Group artifacts into per-day subdirectories
    #[serde(rename = "date-bucketing")]
    pub date_bucketing: bool,

    /// Record the union of the K loudest triggers by two statistics
    #[serde(rename = "store-loudest", skip_serializing_if = "Option::is_none")]
    pub store_loudest: Option<usize>,

    /// Store each detector's noise spectrum in the artifact
    #[serde(rename = "store-psd")]
    pub store_psd: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        let directory = dirs::data_dir()
            .map(|d| d.join("livetrig").join("triggers"))
            .unwrap_or_else(|| PathBuf::from("triggers"));

        Self {
            directory,
            label: "Live".to_string(),
            date_bucketing: false,
            store_loudest: None,
            store_psd: false,
        }
    }
}

/// Synthetic collaborator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,

    /// Nominal PSD distance estimate
    #[serde(rename = "base-distance")]
    pub base_distance: f64,

    /// Maximum deviation from the nominal distance per recalculation
    #[serde(rename = "distance-jitter")]
    pub distance_jitter: f64,

    /// Chance that a detector has no data for a window
    #[serde(rename = "dropout-probability")]
    pub dropout_probability: f64,

    /// Request a PSD recalculation every this many windows
    #[serde(rename = "psd-refresh-windows")]
    pub psd_refresh_windows: u64,

    /// Triggers emitted per template per window
    #[serde(rename = "triggers-per-template")]
    pub triggers_per_template: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            base_distance: 150.0,
            distance_jitter: 20.0,
            dropout_probability: 0.05,
            psd_refresh_windows: 4,
            triggers_per_template: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.pool.size, 3);
        assert!(config.pool.sync_status);
        assert_eq!(config.analysis.window_length, 8);
        assert_eq!(config.detector_names(), vec!["H1", "L1"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
pool:
  size: 5
  sync-status: false
  barrier: true

analysis:
  start-time: 1000
  end-time: 1100
  window-length: 10
  frame-read-timeout-ms: 500
  detectors:
    - name: V1
      channel: V1:Hrec_hoft_16384Hz
    - name: H1
      channel: H1:GDS-CALIB_STRAIN
      state-channel: H1:GDS-CALIB_STATE_VECTOR

sensitivity:
  min-distance: 5.0
  max-distance: 50.0

background:
  ifar-upload-threshold: 0.5
  enable-upload: true

output:
  label: Test
  date-bucketing: true
  store-loudest: 100

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.pool.size, 5);
        assert!(!config.pool.sync_status);
        assert!(config.pool.barrier);
        assert_eq!(config.analysis.frame_read_timeout(), Duration::from_millis(500));
        assert_eq!(config.detector_names(), vec!["H1", "V1"]);
        assert_eq!(config.analysis.detectors[0].state_channel, None);
        assert_eq!(config.sensitivity.max_distance, 50.0);
        assert!(config.background.enable_upload);
        assert_eq!(config.output.store_loudest, Some(100));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
pool:
  size: 8
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.pool.size, 8);
        assert_eq!(config.pool.channel_buffer, 256);
        assert_eq!(config.analysis.detectors.len(), 2);
        assert_eq!(config.output.label, "Live");
    }

    #[test]
    fn test_validate_rejects_single_process_pool() {
        let mut config = Config::default();
        config.pool.size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_bounds_and_span() {
        let mut config = Config::default();
        config.sensitivity.min_distance = 500.0;
        config.sensitivity.max_distance = 100.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.analysis.end_time = config.analysis.start_time;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.analysis.window_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_detectors() {
        let mut config = Config::default();
        let first = config.analysis.detectors[0].clone();
        config.analysis.detectors.push(first);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_sensitivity_bounds_are_inclusive() {
        let bounds = SensitivityConfig {
            min_distance: 10.0,
            max_distance: 20.0,
        };
        assert!(bounds.contains(10.0));
        assert!(bounds.contains(20.0));
        assert!(!bounds.contains(9.99));
        assert!(!bounds.contains(20.01));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("livetrig.yml");
        fs::write(&path, "log-level: warn\npool:\n  size: 4\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.pool.size, 4);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }
}
