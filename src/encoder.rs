//! Design matrix encoding
//!
//! Writes X and y as CSV next to a JSON manifest describing how they were
//! produced. Undefined feature cells are written as empty CSV fields.

use crate::assembler::DesignMatrix;
use crate::config::PipelineConfig;
use crate::error::ComputeError;
use crate::synthesis::FeatureDefinition;
use crate::{PRODUCER_NAME, VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Current manifest schema version
pub const MANIFEST_VERSION: &str = "1.0.0";

pub const X_FILE: &str = "X.csv";
pub const Y_FILE: &str = "y.csv";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Which pipeline produced the matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixKind {
    Baseline,
    Final,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_version: String,
    pub producer: ManifestProducer,
    pub generated_at_utc: String,
    pub kind: MatrixKind,
    pub config: PipelineConfig,
    pub n_rows: usize,
    pub n_cols: usize,
    pub positives: usize,
    pub columns: Vec<String>,
    pub feature_definitions: Vec<FeatureDefinition>,
}

/// Files written by [`DesignMatrixEncoder::write`]
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub x: PathBuf,
    pub y: PathBuf,
    pub manifest: PathBuf,
}

pub struct DesignMatrixEncoder {
    instance_id: String,
}

impl Default for DesignMatrixEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DesignMatrixEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn manifest(
        &self,
        matrix: &DesignMatrix,
        kind: MatrixKind,
        config: &PipelineConfig,
    ) -> Manifest {
        Manifest {
            manifest_version: MANIFEST_VERSION.to_string(),
            producer: ManifestProducer {
                name: PRODUCER_NAME.to_string(),
                version: VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            generated_at_utc: Utc::now().to_rfc3339(),
            kind,
            config: config.clone(),
            n_rows: matrix.x.n_rows(),
            n_cols: matrix.x.n_cols(),
            positives: matrix.y.positives(),
            columns: matrix.x.column_names().map(str::to_string).collect(),
            feature_definitions: matrix.definitions.clone(),
        }
    }

    pub fn encode_manifest_to_json(
        &self,
        matrix: &DesignMatrix,
        kind: MatrixKind,
        config: &PipelineConfig,
    ) -> Result<String, ComputeError> {
        let manifest = self.manifest(matrix, kind, config);
        serde_json::to_string_pretty(&manifest).map_err(ComputeError::JsonError)
    }

    /// Write `X.csv`, `y.csv` and `manifest.json` into `dir`
    pub fn write(
        &self,
        matrix: &DesignMatrix,
        kind: MatrixKind,
        config: &PipelineConfig,
        dir: &Path,
    ) -> Result<OutputPaths, ComputeError> {
        fs::create_dir_all(dir)?;
        let paths = OutputPaths {
            x: dir.join(X_FILE),
            y: dir.join(Y_FILE),
            manifest: dir.join(MANIFEST_FILE),
        };

        matrix.x.write_csv(BufWriter::new(File::create(&paths.x)?))?;
        matrix.y.write_csv(BufWriter::new(File::create(&paths.y)?))?;
        fs::write(
            &paths.manifest,
            self.encode_manifest_to_json(matrix, kind, config)?,
        )?;

        info!(
            dir = %dir.display(),
            rows = matrix.x.n_rows(),
            columns = matrix.x.n_cols(),
            "wrote design matrix"
        );
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::build_labels;
    use crate::schema::{Action, Interaction};
    use crate::table::FeatureTable;
    use tempfile::TempDir;

    fn matrix() -> DesignMatrix {
        let log: Vec<Interaction> = [(1, 1), (1, 2), (2, 1)]
            .into_iter()
            .map(|(user, step)| Interaction {
                user_id: user,
                step_id: step,
                timestamp: 0,
                action: Action::Passed,
            })
            .collect();
        let y = build_labels(&log, 1, Action::Passed).unwrap();
        let mut x = FeatureTable::new([1, 2]);
        x.push_column("passed", vec![Some(2.0), None]).unwrap();
        DesignMatrix::new(x, y, Vec::new()).unwrap()
    }

    #[test]
    fn test_manifest_contents() {
        let encoder = DesignMatrixEncoder::with_instance_id("test-instance".to_string());
        let manifest = encoder.manifest(&matrix(), MatrixKind::Baseline, &PipelineConfig::default());
        assert_eq!(manifest.producer.name, PRODUCER_NAME);
        assert_eq!(manifest.producer.instance_id, "test-instance");
        assert_eq!(manifest.n_rows, 2);
        assert_eq!(manifest.positives, 1);
        assert_eq!(manifest.columns, vec!["passed".to_string()]);
    }

    #[test]
    fn test_write_outputs() {
        let dir = TempDir::new().unwrap();
        let encoder = DesignMatrixEncoder::new();
        let paths = encoder
            .write(&matrix(), MatrixKind::Final, &PipelineConfig::default(), dir.path())
            .unwrap();

        assert_eq!(fs::read_to_string(&paths.x).unwrap(), "user_id,passed\n1,2\n2,\n");
        assert_eq!(
            fs::read_to_string(&paths.y).unwrap(),
            "user_id,is_gone\n1,True\n2,False\n"
        );
        let manifest: Manifest =
            serde_json::from_str(&fs::read_to_string(&paths.manifest).unwrap()).unwrap();
        assert_eq!(manifest.kind, MatrixKind::Final);
        assert_eq!(manifest.n_cols, 1);
    }
}
