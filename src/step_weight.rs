//! Step difficulty weights and per-user step scores
//!
//! A step's weight is the share of its discoverers who went on to pass it,
//! computed once over the full interaction history and persisted next to the
//! processed datasets. Scores reward passing hard steps: a pass of a step with
//! weight 0.5 is worth 2.

use crate::error::{CacheError, ComputeError};
use crate::schema::{Action, Interaction, StepId, UserId};
use crate::table::FeatureTable;
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Cache archive name inside the processed-data directory
pub const STEP_WEIGHT_FILE: &str = "hb_steps_weight.csv.zip";

/// Bumped whenever the weight definition or archive layout changes
pub const CACHE_KEY_VERSION: &str = "step-weight-v1";

const WEIGHTS_ENTRY: &str = "hb_steps_weight.csv";
const KEY_ENTRY: &str = "cache_key";
const WEIGHT_HEADER: [&str; 2] = ["step_id", "step_weight"];

/// Prefix of the per-step score columns
pub const SCORE_PREFIX: &str = "score_";

pub fn score_column(step: StepId) -> String {
    format!("{}{}", SCORE_PREFIX, step)
}

/// Global step difficulty weights
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepWeights {
    weights: BTreeMap<StepId, f64>,
}

impl StepWeights {
    /// Distinct passers / distinct discoverers per step.
    ///
    /// Steps nobody discovered get no weight at all.
    pub fn compute(interactions: &[Interaction]) -> Self {
        let mut discovered: HashMap<StepId, BTreeSet<UserId>> = HashMap::new();
        let mut passed: HashMap<StepId, BTreeSet<UserId>> = HashMap::new();
        for i in interactions {
            match i.action {
                Action::Discovered => {
                    discovered.entry(i.step_id).or_default().insert(i.user_id);
                }
                Action::Passed => {
                    passed.entry(i.step_id).or_default().insert(i.user_id);
                }
                _ => {}
            }
        }

        let weights = discovered
            .iter()
            .map(|(step, users)| {
                let passers = passed.get(step).map_or(0, BTreeSet::len);
                (*step, passers as f64 / users.len() as f64)
            })
            .collect();
        Self { weights }
    }

    pub fn from_map(weights: BTreeMap<StepId, f64>) -> Self {
        Self { weights }
    }

    pub fn get(&self, step: StepId) -> Option<f64> {
        self.weights.get(&step).copied()
    }

    /// Weight usable as a score divisor
    pub fn scorable_weight(&self, step: StepId) -> Option<f64> {
        self.get(step).filter(|w| *w > 0.0)
    }

    pub fn steps(&self) -> impl Iterator<Item = StepId> + '_ {
        self.weights.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StepId, f64)> + '_ {
        self.weights.iter().map(|(s, w)| (*s, *w))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Two-column CSV `step_id,step_weight`
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ComputeError> {
        let mut wtr = Writer::from_writer(writer);
        wtr.write_record(WEIGHT_HEADER)?;
        for (step, weight) in &self.weights {
            wtr.write_record([step.to_string(), weight.to_string()])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn read_csv<R: Read>(reader: R) -> Result<Self, CacheError> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;
        if headers.iter().ne(WEIGHT_HEADER) {
            return Err(CacheError::SchemaDrift(format!(
                "expected columns {:?}, found {:?}",
                WEIGHT_HEADER,
                headers.iter().collect::<Vec<_>>()
            )));
        }

        let mut weights = BTreeMap::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| CacheError::Corrupt(e.to_string()))?;
            let parsed = match (record.get(0), record.get(1)) {
                (Some(step), Some(weight)) => step.parse::<StepId>().ok().zip(weight.parse::<f64>().ok()),
                _ => None,
            };
            let (step, weight) = parsed.ok_or_else(|| {
                CacheError::SchemaDrift(format!("line {}: malformed weight row", line + 2))
            })?;
            weights.insert(step, weight);
        }
        Ok(Self { weights })
    }
}

/// Versioned digest of an interaction log
pub fn cache_key(interactions: &[Interaction]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(CACHE_KEY_VERSION.as_bytes());
    hasher.update(b"\n");
    for i in interactions {
        hasher.update(
            format!("{},{},{},{}\n", i.user_id, i.step_id, i.timestamp, i.action).as_bytes(),
        );
    }
    hex::encode(hasher.finalize())
}

/// On-disk step-weight cache.
///
/// The archive holds the weight CSV plus the key it was computed under. Any
/// problem reading it is recoverable: the weights are recomputed and the
/// archive rewritten.
#[derive(Debug, Clone)]
pub struct StepWeightCache {
    path: PathBuf,
}

impl StepWeightCache {
    /// Cache at `<processed_dir>/hb_steps_weight.csv.zip`
    pub fn new(processed_dir: impl AsRef<Path>) -> Self {
        Self::at(processed_dir.as_ref().join(STEP_WEIGHT_FILE))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load weights stored under `key`
    pub fn load(&self, key: &str) -> Result<StepWeights, CacheError> {
        if !self.path.exists() {
            return Err(CacheError::Missing(self.path.display().to_string()));
        }
        let file = File::open(&self.path).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        let mut archive = ZipArchive::new(file)?;

        let mut found = String::new();
        archive
            .by_name(KEY_ENTRY)?
            .read_to_string(&mut found)
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;
        let found = found.trim().to_string();
        if found != key {
            return Err(CacheError::Stale {
                expected: key.to_string(),
                found,
            });
        }

        let entry = archive.by_name(WEIGHTS_ENTRY)?;
        StepWeights::read_csv(entry)
    }

    /// Write weights and their key, replacing any existing archive
    pub fn store(&self, key: &str, weights: &StepWeights) -> Result<(), ComputeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(File::create(&self.path)?);

        zip.start_file(WEIGHTS_ENTRY, options).map_err(CacheError::from)?;
        weights.write_csv(&mut zip)?;
        zip.start_file(KEY_ENTRY, options).map_err(CacheError::from)?;
        zip.write_all(key.as_bytes())?;
        zip.finish().map_err(CacheError::from)?;
        Ok(())
    }

    /// Cached weights for `key`, or weights computed from the full log and stored
    pub fn load_or_compute(
        &self,
        key: &str,
        interactions: &[Interaction],
    ) -> Result<StepWeights, ComputeError> {
        match self.load(key) {
            Ok(weights) => {
                info!(path = %self.path.display(), steps = weights.len(), "step weight cache hit");
                return Ok(weights);
            }
            Err(CacheError::Missing(_)) => {
                info!(path = %self.path.display(), "step weight cache miss");
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "step weight cache unusable, recomputing");
            }
        }
        self.refresh(key, interactions)
    }

    /// Recompute unconditionally and overwrite the archive
    pub fn refresh(
        &self,
        key: &str,
        interactions: &[Interaction],
    ) -> Result<StepWeights, ComputeError> {
        let weights = StepWeights::compute(interactions);
        self.store(key, &weights)?;
        debug!(steps = weights.len(), "stored step weights");
        Ok(weights)
    }
}

/// `score_<step_id>` = passes of the step within the window / step weight.
///
/// Rows are the users of `truncated`; columns the union of weighted steps and
/// steps seen in the window. Unscorable or untouched cells are 0.
pub fn user_step_scores(
    truncated: &[Interaction],
    weights: &StepWeights,
) -> Result<FeatureTable, ComputeError> {
    let mut passes: HashMap<(UserId, StepId), u32> = HashMap::new();
    let mut steps: BTreeSet<StepId> = weights.steps().collect();
    for i in truncated {
        steps.insert(i.step_id);
        if i.action == Action::Passed {
            *passes.entry((i.user_id, i.step_id)).or_insert(0) += 1;
        }
    }

    let mut table = FeatureTable::new(truncated.iter().map(|i| i.user_id));
    for step in steps {
        let weight = weights.scorable_weight(step);
        table.push_column_with(score_column(step), |user| {
            let count = passes.get(&(user, step)).copied().unwrap_or(0);
            Some(weight.map_or(0.0, |w| f64::from(count) / w))
        })?;
    }
    Ok(table)
}
