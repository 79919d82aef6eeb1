//! Design matrix assembly
//!
//! X starts from the synthesized features and is left-joined, on user_id, with
//! the ratio features, the curated step scores and the curated time-series
//! features. The result must line up row for row with the labels.

use crate::config::PipelineConfig;
use crate::error::ComputeError;
use crate::label::Labels;
use crate::ratio::UNDEFINED_RATIO;
use crate::synthesis::{FeatureDefinition, FeatureSet};
use crate::table::FeatureTable;
use serde::Serialize;
use tracing::info;

/// Features and labels over the same users, in user_id order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesignMatrix {
    pub x: FeatureTable,
    pub y: Labels,
    pub definitions: Vec<FeatureDefinition>,
}

impl DesignMatrix {
    pub fn new(
        x: FeatureTable,
        y: Labels,
        definitions: Vec<FeatureDefinition>,
    ) -> Result<Self, ComputeError> {
        verify_alignment(&x, &y)?;
        Ok(Self { x, y, definitions })
    }
}

/// Rows of X must equal len(y) over identical users
pub fn verify_alignment(x: &FeatureTable, y: &Labels) -> Result<(), ComputeError> {
    if x.n_rows() != y.len() {
        return Err(ComputeError::RowCountMismatch {
            features: x.n_rows(),
            labels: y.len(),
        });
    }
    if let Some((user, _)) = x.index().iter().zip(y.users()).find(|(a, b)| **a != *b) {
        return Err(ComputeError::IndexMismatch(format!(
            "user {} of the features has no matching label row",
            user
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FeatureAssembler {
    step_score_columns: Vec<String>,
    ts_feature_columns: Vec<String>,
}

impl FeatureAssembler {
    pub fn new(step_score_columns: Vec<String>, ts_feature_columns: Vec<String>) -> Self {
        Self {
            step_score_columns,
            ts_feature_columns,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.step_score_columns.clone(),
            config.ts_feature_columns.clone(),
        )
    }

    pub fn assemble(
        &self,
        auto: FeatureSet,
        ratios: &FeatureTable,
        step_scores: &FeatureTable,
        ts_features: &FeatureTable,
        labels: &Labels,
    ) -> Result<DesignMatrix, ComputeError> {
        let FeatureSet {
            table: mut x,
            definitions,
        } = auto;

        x = x.left_join(ratios)?;
        for name in ratios.column_names() {
            x.fill_column(name, UNDEFINED_RATIO);
        }

        let scores = step_scores.select_columns(&self.step_score_columns)?;
        x = x.left_join(&scores)?;
        for name in &self.step_score_columns {
            x.fill_column(name, 0.0);
        }

        let ts = ts_features.select_columns(&self.ts_feature_columns)?;
        x = x.left_join(&ts)?;
        for name in &self.ts_feature_columns {
            if let Some(mean) = ts.column_mean(name) {
                x.fill_column(name, mean);
            }
        }

        info!(
            rows = x.n_rows(),
            columns = x.n_cols(),
            synthesized = definitions.len(),
            "assembled design matrix"
        );
        DesignMatrix::new(x, labels.clone(), definitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::build_labels;
    use crate::schema::{Action, Interaction};

    fn table(users: &[u64], columns: &[(&str, Vec<Option<f64>>)]) -> FeatureTable {
        let mut t = FeatureTable::new(users.iter().copied());
        for (name, values) in columns {
            t.push_column(*name, values.clone()).unwrap();
        }
        t
    }

    fn labels(users: &[u64]) -> Labels {
        let log: Vec<Interaction> = users
            .iter()
            .map(|&u| Interaction {
                user_id: u,
                step_id: u,
                timestamp: 0,
                action: Action::Passed,
            })
            .collect();
        build_labels(&log, 0, Action::Passed).unwrap()
    }

    fn assembler() -> FeatureAssembler {
        FeatureAssembler::new(vec!["score_1".to_string()], vec!["viewed__mean".to_string()])
    }

    #[test]
    fn test_assembly_aligns_with_labels() {
        let auto = FeatureSet {
            table: table(&[1, 2, 3], &[("COUNT(events)", vec![Some(3.0), Some(1.0), Some(2.0)])]),
            definitions: Vec::new(),
        };
        let ratios = table(&[1, 2, 3], &[("viewed_rat_discovered", vec![Some(1.0), None, Some(0.5)])]);
        let scores = table(
            &[1, 3],
            &[("score_1", vec![Some(2.0), Some(0.0)]), ("score_2", vec![Some(1.0), None])],
        );
        let ts = table(&[1, 2], &[("viewed__mean", vec![Some(1.0), Some(3.0)])]);

        let m = assembler()
            .assemble(auto, &ratios, &scores, &ts, &labels(&[1, 2, 3]))
            .unwrap();
        assert_eq!(m.x.n_rows(), m.y.len());
        assert_eq!(
            m.x.column_names().collect::<Vec<_>>(),
            vec!["COUNT(events)", "viewed_rat_discovered", "score_1", "viewed__mean"]
        );
        assert_eq!(m.x.get(2, "viewed_rat_discovered"), Some(UNDEFINED_RATIO));
        assert_eq!(m.x.get(2, "score_1"), Some(0.0));
        assert_eq!(m.x.get(3, "viewed__mean"), Some(2.0));
    }

    #[test]
    fn test_missing_curated_column_is_an_error() {
        let auto = FeatureSet {
            table: table(&[1], &[]),
            definitions: Vec::new(),
        };
        let empty = table(&[1], &[]);
        let ts = table(&[1], &[("viewed__mean", vec![Some(1.0)])]);
        let result = assembler().assemble(auto, &empty, &empty, &ts, &labels(&[1]));
        assert!(matches!(result, Err(ComputeError::MissingColumn(c)) if c == "score_1"));
    }

    #[test]
    fn test_misaligned_labels_fail_loudly() {
        let x = table(&[1, 2], &[]);
        assert!(matches!(
            verify_alignment(&x, &labels(&[1])),
            Err(ComputeError::RowCountMismatch { features: 2, labels: 1 })
        ));
        assert!(matches!(
            verify_alignment(&x, &labels(&[1, 5])),
            Err(ComputeError::IndexMismatch(_))
        ));
    }
}
