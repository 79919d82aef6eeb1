//! Pipeline configuration. Every field has a default; a JSON file only needs
//! the fields it overrides.

use crate::error::ComputeError;
use crate::label::{DEFAULT_COURSE_THRESHOLD, DEFAULT_TARGET_ACTION};
use crate::schema::Action;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Step-score columns kept in the final design matrix
pub const DEFAULT_STEP_SCORE_COLUMNS: [&str; 15] = [
    "score_31971",
    "score_31972",
    "score_31976",
    "score_31977",
    "score_31978",
    "score_32031",
    "score_32173",
    "score_32174",
    "score_32175",
    "score_32177",
    "score_32219",
    "score_32812",
    "score_32815",
    "score_32929",
    "score_32950",
];

/// Time-series columns kept in the final design matrix
pub const DEFAULT_TS_FEATURE_COLUMNS: [&str; 15] = [
    "viewed__length",
    "viewed__mean",
    "viewed__variance",
    "viewed__autocorrelation__lag_1",
    "started_attempt__mean",
    "started_attempt__maximum",
    "started_attempt__c3__lag_1",
    "wrong__mean",
    "wrong__skewness",
    "wrong__kurtosis",
    "passed__length",
    "passed__mean",
    "passed__variance",
    "passed__c3__lag_1",
    "correct__mean",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw exports (events, submissions, course structure)
    pub data_dir: PathBuf,
    /// Generated datasets and caches
    pub processed_data_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub bin_models_dir: PathBuf,
    /// Days of history per user visible to feature computation
    pub data_period_days: u32,
    /// Distinct target-action steps above which a user completed the course
    pub course_threshold: u32,
    pub target_action: Action,
    pub step_score_columns: Vec<String>,
    pub ts_feature_columns: Vec<String>,
    pub synthesis: SynthesisConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Relationship depth for deep feature synthesis (1..=3)
    pub max_depth: u8,
    /// Restrict synthesis to a random subset of users
    pub n_users_sample: Option<usize>,
    pub sample_seed: u64,
    /// Prefer the precomputed `ts_features_*.zip` over native extraction
    pub use_ts_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("../data");
        Self {
            processed_data_dir: data_dir.join("processed"),
            data_dir,
            reports_dir: PathBuf::from("../reports"),
            bin_models_dir: PathBuf::from("../bin_models"),
            data_period_days: 2,
            course_threshold: DEFAULT_COURSE_THRESHOLD,
            target_action: DEFAULT_TARGET_ACTION,
            step_score_columns: DEFAULT_STEP_SCORE_COLUMNS.iter().map(|s| s.to_string()).collect(),
            ts_feature_columns: DEFAULT_TS_FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
            synthesis: SynthesisConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            n_users_sample: None,
            sample_seed: 42,
            use_ts_cache: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ComputeError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ComputeError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        if !(1..=3).contains(&self.synthesis.max_depth) {
            return Err(ComputeError::ConfigError(format!(
                "synthesis.max_depth must be within 1..=3, got {}",
                self.synthesis.max_depth
            )));
        }
        if self.synthesis.n_users_sample == Some(0) {
            return Err(ComputeError::ConfigError(
                "synthesis.n_users_sample must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.data_period_days, 2);
        assert_eq!(config.course_threshold, 40);
        assert_eq!(config.target_action, Action::Passed);
        assert_eq!(config.processed_data_dir, PathBuf::from("../data/processed"));
        assert_eq!(config.step_score_columns.len(), 15);
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = PipelineConfig::from_json(
            r#"{"course_threshold": 10, "target_action": "correct", "synthesis": {"max_depth": 1}}"#,
        )
        .unwrap();
        assert_eq!(config.course_threshold, 10);
        assert_eq!(config.target_action, Action::Correct);
        assert_eq!(config.synthesis.max_depth, 1);
        assert_eq!(config.synthesis.sample_seed, 42);
        assert_eq!(config.data_period_days, 2);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let result = PipelineConfig::from_json(r#"{"target_action": "finished"}"#);
        assert!(matches!(result, Err(ComputeError::ConfigError(_))));
    }

    #[test]
    fn test_invalid_depth_rejected() {
        let result = PipelineConfig::from_json(r#"{"synthesis": {"max_depth": 4}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("course-flux.json");
        assert_eq!(PipelineConfig::load(&path).unwrap(), PipelineConfig::default());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(PipelineConfig::load(&path).is_err());

        let config = PipelineConfig::default();
        std::fs::write(&path, config.to_json().unwrap()).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }
}
