//! Time-series features
//!
//! Each user's visible history is turned into a series indexed by event time,
//! one column per action holding the action's rank at timestamps where it
//! occurred and 0 elsewhere. Every column is then reduced to a fixed set of
//! statistics named `<action>__<stat>`.

use super::stats;
use super::{CutoffTimes, EntityGraph, FeatureDefinition, FeatureGenerator, FeatureSet};
use crate::error::{CacheError, ComputeError};
use crate::schema::{Action, Interaction};
use crate::table::FeatureTable;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Reductions applied to every action column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesStat {
    Length,
    Mean,
    Median,
    Minimum,
    Maximum,
    Variance,
    Skewness,
    Kurtosis,
    Autocorrelation,
    C3,
}

impl SeriesStat {
    pub const ALL: [SeriesStat; 10] = [
        SeriesStat::Length,
        SeriesStat::Mean,
        SeriesStat::Median,
        SeriesStat::Minimum,
        SeriesStat::Maximum,
        SeriesStat::Variance,
        SeriesStat::Skewness,
        SeriesStat::Kurtosis,
        SeriesStat::Autocorrelation,
        SeriesStat::C3,
    ];

    /// Column suffix; the lagged statistics carry their lag
    pub fn suffix(self) -> &'static str {
        match self {
            SeriesStat::Length => "length",
            SeriesStat::Mean => "mean",
            SeriesStat::Median => "median",
            SeriesStat::Minimum => "minimum",
            SeriesStat::Maximum => "maximum",
            SeriesStat::Variance => "variance",
            SeriesStat::Skewness => "skewness",
            SeriesStat::Kurtosis => "kurtosis",
            SeriesStat::Autocorrelation => "autocorrelation__lag_1",
            SeriesStat::C3 => "c3__lag_1",
        }
    }

    fn primitive(self) -> &'static str {
        self.suffix().split("__").next().unwrap_or_default()
    }

    pub fn apply(self, series: &[f64]) -> Option<f64> {
        match self {
            SeriesStat::Length => Some(series.len() as f64),
            SeriesStat::Mean => stats::mean(series),
            SeriesStat::Median => stats::median(series),
            SeriesStat::Minimum => stats::min(series),
            SeriesStat::Maximum => stats::max(series),
            SeriesStat::Variance => stats::variance(series),
            SeriesStat::Skewness => stats::skew(series),
            SeriesStat::Kurtosis => stats::kurtosis(series),
            SeriesStat::Autocorrelation => stats::autocorrelation(series, 1),
            SeriesStat::C3 => Some(stats::c3(series, 1)),
        }
    }
}

pub fn series_column(action: Action, stat: SeriesStat) -> String {
    format!("{}__{}", action.as_str(), stat.suffix())
}

/// One column per action over the distinct timestamps of `events`
pub fn action_series(events: &[Interaction]) -> BTreeMap<Action, Vec<f64>> {
    let mut by_time: BTreeMap<i64, Vec<Action>> = BTreeMap::new();
    for e in events {
        by_time.entry(e.timestamp).or_default().push(e.action);
    }
    Action::ALL
        .into_iter()
        .map(|action| {
            let series = by_time
                .values()
                .map(|actions| {
                    if actions.contains(&action) {
                        f64::from(action.rank())
                    } else {
                        0.0
                    }
                })
                .collect();
            (action, series)
        })
        .collect()
}

/// Native time-series statistics extractor
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesExtractor;

impl FeatureGenerator for TimeSeriesExtractor {
    fn name(&self) -> &'static str {
        "time_series"
    }

    fn generate(
        &self,
        graph: &EntityGraph,
        cutoffs: &CutoffTimes,
    ) -> Result<FeatureSet, ComputeError> {
        let series: Vec<BTreeMap<Action, Vec<f64>>> = cutoffs
            .iter()
            .map(|(user, cutoff)| {
                let events = graph.events_of(*user);
                let visible = events.partition_point(|e| e.timestamp <= *cutoff);
                action_series(&events[..visible])
            })
            .collect();

        let mut table = FeatureTable::new(cutoffs.keys().copied());
        let mut definitions = Vec::new();
        for action in Action::ALL {
            for stat in SeriesStat::ALL {
                let name = series_column(action, stat);
                let values = series
                    .iter()
                    .map(|s| s.get(&action).and_then(|v| stat.apply(v)))
                    .collect();
                table.push_column(name.clone(), values)?;
                definitions.push(FeatureDefinition {
                    name,
                    primitive: stat.primitive().to_string(),
                    base: format!("series.{}", action.as_str()),
                    depth: 1,
                    where_clause: None,
                });
            }
        }
        info!(users = table.n_rows(), features = table.n_cols(), "extracted time-series features");
        Ok(FeatureSet { table, definitions })
    }
}

/// Which half of the cached time-series features
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePart {
    Train,
    Submit,
}

impl CachePart {
    pub const ALL: [CachePart; 2] = [CachePart::Train, CachePart::Submit];

    pub fn file_name(self) -> &'static str {
        match self {
            CachePart::Train => "ts_features_train.zip",
            CachePart::Submit => "ts_features_submit.zip",
        }
    }

    fn entry_name(self) -> &'static str {
        match self {
            CachePart::Train => "ts_features_train.csv",
            CachePart::Submit => "ts_features_submit.csv",
        }
    }
}

/// Precomputed time-series features in `<processed_dir>/ts_features_{train,submit}.zip`
#[derive(Debug, Clone)]
pub struct TimeSeriesCache {
    dir: PathBuf,
}

impl TimeSeriesCache {
    pub fn new(processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: processed_dir.into(),
        }
    }

    pub fn path(&self, part: CachePart) -> PathBuf {
        self.dir.join(part.file_name())
    }

    fn load_part(&self, part: CachePart) -> Result<FeatureTable, CacheError> {
        let path = self.path(part);
        if !path.exists() {
            return Err(CacheError::Missing(path.display().to_string()));
        }
        let file = File::open(&path).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        let mut archive = ZipArchive::new(file)?;
        let mut raw = Vec::new();
        archive
            .by_index(0)?
            .read_to_end(&mut raw)
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;
        FeatureTable::read_csv(raw.as_slice()).map_err(|e| CacheError::SchemaDrift(e.to_string()))
    }

    /// Both parts stacked, missing cells filled with column means
    pub fn load(&self) -> Result<FeatureTable, CacheError> {
        let train = self.load_part(CachePart::Train)?;
        let submit = self.load_part(CachePart::Submit)?;
        let mut all = train
            .append_rows(submit)
            .map_err(|e| CacheError::SchemaDrift(e.to_string()))?;
        all.fill_missing_with_means();
        debug!(users = all.n_rows(), features = all.n_cols(), "loaded time-series cache");
        Ok(all)
    }

    pub fn store(&self, part: CachePart, table: &FeatureTable) -> Result<(), ComputeError> {
        fs::create_dir_all(&self.dir)?;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(File::create(self.path(part))?);
        zip.start_file(part.entry_name(), options)
            .map_err(CacheError::from)?;
        table.write_csv(&mut zip)?;
        zip.flush()?;
        zip.finish().map_err(CacheError::from)?;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        CachePart::ALL.iter().all(|p| self.path(*p).exists())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
