//! Pipeline orchestration
//!
//! Public entry points that turn raw course logs into a design matrix. Feature
//! stages only ever see each user's first `data_period_days` of history; the
//! label and the step weights use the full log.

use crate::aggregate::UserAggregates;
use crate::assembler::{DesignMatrix, FeatureAssembler};
use crate::config::PipelineConfig;
use crate::error::{CacheError, ComputeError};
use crate::interaction::{merge_interactions, truncate_by_days};
use crate::label::{build_labels, Labels};
use crate::ratio::RatioFeatureDeriver;
use crate::schema::{Action, EventRecord, Interaction, StepMetadata, SubmissionRecord};
use crate::step_weight::{cache_key, user_step_scores, StepWeightCache, StepWeights};
use crate::synthesis::{
    CutoffTimes, DeepFeatureSynthesizer, EntityGraph, FeatureGenerator, TimeSeriesCache,
    TimeSeriesExtractor,
};
use crate::table::FeatureTable;
use tracing::{info, warn};

/// Hand-crafted design matrix: per-user aggregate counts over the window.
///
/// # Arguments
/// * `events` - Full step-interaction log
/// * `submissions` - Full submission log
/// * `days` - Observation window per user
/// * `threshold` - Distinct target-action steps needed to count as completed
/// * `target` - Action whose distinct steps are counted
///
/// # Example
/// ```ignore
/// let matrix = baseline_x_y(&events, &submissions, 2, 40, Action::Passed)?;
/// assert_eq!(matrix.x.n_rows(), matrix.y.len());
/// ```
pub fn baseline_x_y(
    events: &[EventRecord],
    submissions: &[SubmissionRecord],
    days: u32,
    threshold: u32,
    target: Action,
) -> Result<DesignMatrix, ComputeError> {
    // Stage 1: Truncate each stream to the observation window
    let events_window = truncate_by_days(events, days)?;
    let submissions_window = truncate_by_days(submissions, days)?;

    // Stage 2: Aggregate counts, without the last-seen timestamp
    let x = UserAggregates::build(&events_window, &submissions_window).to_table(false)?;

    // Stage 3: Label from the full history
    let y = build_labels(&merge_interactions(events, submissions), threshold, target)?;

    info!(users = x.n_rows(), features = x.n_cols(), "built baseline design matrix");
    DesignMatrix::new(x, y, Vec::new())
}

/// Processor for the full design matrix.
///
/// Holds the configuration, the synthesis engine and the on-disk caches.
pub struct CourseFluxProcessor {
    config: PipelineConfig,
    generator: Box<dyn FeatureGenerator>,
    weight_cache: StepWeightCache,
    ts_cache: TimeSeriesCache,
    assembler: FeatureAssembler,
}

impl Default for CourseFluxProcessor {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl CourseFluxProcessor {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            generator: Box::new(DeepFeatureSynthesizer::new(config.synthesis.max_depth)),
            weight_cache: StepWeightCache::new(&config.processed_data_dir),
            ts_cache: TimeSeriesCache::new(&config.processed_data_dir),
            assembler: FeatureAssembler::from_config(&config),
            config,
        }
    }

    /// Replace the synthesis engine
    pub fn with_generator(mut self, generator: Box<dyn FeatureGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn weight_cache(&self) -> &StepWeightCache {
        &self.weight_cache
    }

    pub fn ts_cache(&self) -> &TimeSeriesCache {
        &self.ts_cache
    }

    /// Iteration-1 matrix with this processor's settings
    pub fn baseline(
        &self,
        events: &[EventRecord],
        submissions: &[SubmissionRecord],
    ) -> Result<DesignMatrix, ComputeError> {
        baseline_x_y(
            events,
            submissions,
            self.config.data_period_days,
            self.config.course_threshold,
            self.config.target_action,
        )
    }

    pub fn labels(
        &self,
        events: &[EventRecord],
        submissions: &[SubmissionRecord],
    ) -> Result<Labels, ComputeError> {
        build_labels(
            &merge_interactions(events, submissions),
            self.config.course_threshold,
            self.config.target_action,
        )
    }

    /// Global step weights over the full log, through the cache
    pub fn step_weights(
        &self,
        interactions: &[Interaction],
        refresh: bool,
    ) -> Result<StepWeights, ComputeError> {
        let key = cache_key(interactions);
        if refresh {
            self.weight_cache.refresh(&key, interactions)
        } else {
            self.weight_cache.load_or_compute(&key, interactions)
        }
    }

    /// Final design matrix: synthesized, ratio, step-score and time-series features
    pub fn build_design_matrix(
        &self,
        events: &[EventRecord],
        submissions: &[SubmissionRecord],
        step_metadata: &StepMetadata,
    ) -> Result<DesignMatrix, ComputeError> {
        let days = self.config.data_period_days;

        // Stage 1: Merge the full log and label it
        let interactions = merge_interactions(events, submissions);
        let labels = build_labels(
            &interactions,
            self.config.course_threshold,
            self.config.target_action,
        )?;

        // Stage 2: Entity graph, optional subsample, per-user cutoffs
        let mut graph = EntityGraph::build(&interactions, step_metadata);
        if let Some(n) = self.config.synthesis.n_users_sample {
            graph = graph.subsample(n, self.config.synthesis.sample_seed);
        }
        let cutoffs = graph.cutoff_times(days);

        // Stage 3: Synthesize features up to each cutoff
        let auto = self.generator.generate(&graph, &cutoffs)?;
        info!(generator = self.generator.name(), features = auto.table.n_cols(), "synthesis done");

        // Stage 4: Ratio features over the windowed aggregates
        let events_window = truncate_by_days(events, days)?;
        let submissions_window = truncate_by_days(submissions, days)?;
        let aggregates = UserAggregates::build(&events_window, &submissions_window);
        let ratios = RatioFeatureDeriver::derive(&aggregates)?;

        // Stage 5: Step scores, weights from the full log
        let weights = self.step_weights(&interactions, false)?;
        let interactions_window = truncate_by_days(&interactions, days)?;
        let scores = user_step_scores(&interactions_window, &weights)?;

        // Stage 6: Time-series features
        let ts = self.time_series_features(&graph, &cutoffs)?;

        // Stage 7: Assemble against the labels of the synthesized users
        let labels = labels.select_users(auto.table.index().iter().copied())?;
        self.assembler.assemble(auto, &ratios, &scores, &ts, &labels)
    }

    fn time_series_features(
        &self,
        graph: &EntityGraph,
        cutoffs: &CutoffTimes,
    ) -> Result<FeatureTable, ComputeError> {
        if self.config.synthesis.use_ts_cache {
            match self.ts_cache.load() {
                Ok(table) => return Ok(table),
                Err(CacheError::Missing(path)) => {
                    info!(path = %path, "time-series cache miss, extracting");
                }
                Err(e) => {
                    warn!(error = %e, "time-series cache unusable, extracting");
                }
            }
        }
        let mut table = TimeSeriesExtractor.generate(graph, cutoffs)?.table;
        table.fill_missing_with_means();
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EventAction, LogAdapter, SubmissionStatus, SECONDS_PER_DAY};
    use crate::step_weight::STEP_WEIGHT_FILE;
    use tempfile::TempDir;

    const T0: i64 = 1_434_340_000;

    fn event(user: u64, step: u64, ts: i64, action: EventAction) -> EventRecord {
        EventRecord {
            user_id: user,
            step_id: step,
            timestamp: ts,
            action,
        }
    }

    fn submission(user: u64, step: u64, ts: i64, status: SubmissionStatus) -> SubmissionRecord {
        SubmissionRecord {
            user_id: user,
            step_id: step,
            timestamp: ts,
            submission_status: status,
        }
    }

    /// User 1 passes 3 steps (one after the window), user 2 passes 1, user 3 only submits
    fn logs() -> (Vec<EventRecord>, Vec<SubmissionRecord>) {
        let mut events = Vec::new();
        for step in 1..=3u64 {
            let ts = if step == 3 { T0 + 5 * SECONDS_PER_DAY } else { T0 + step as i64 * 60 };
            events.push(event(1, step, ts - 30, EventAction::Discovered));
            events.push(event(1, step, ts, EventAction::Passed));
        }
        events.push(event(2, 1, T0, EventAction::Discovered));
        events.push(event(2, 1, T0 + 10, EventAction::Passed));
        events.push(event(2, 2, T0 + 20, EventAction::Viewed));
        let submissions = vec![
            submission(1, 2, T0 + 100, SubmissionStatus::Correct),
            submission(3, 2, T0, SubmissionStatus::Wrong),
        ];
        (events, submissions)
    }

    fn metadata() -> StepMetadata {
        let csv = "step_id,lesson_id,step_viewed_by,lesson_viewed_by,section_id\n\
                   1,10,100,1000,7\n\
                   2,10,300,1000,7\n\
                   3,11,500,50,8\n";
        LogAdapter::read_step_metadata(csv.as_bytes()).unwrap()
    }

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            processed_data_dir: dir.path().to_path_buf(),
            course_threshold: 2,
            step_score_columns: vec!["score_1".to_string(), "score_3".to_string()],
            ts_feature_columns: vec!["passed__mean".to_string(), "viewed__length".to_string()],
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_baseline_x_y() {
        let (events, submissions) = logs();
        let m = baseline_x_y(&events, &submissions, 2, 2, Action::Passed).unwrap();
        assert_eq!(m.x.index(), &[1, 2, 3]);
        assert_eq!(m.x.n_rows(), m.y.len());
        assert!(!m.x.has_column("last_timestamp"));
        // the late pass is outside the window but still counts for the label
        assert_eq!(m.x.get(1, "passed"), Some(2.0));
        assert_eq!(m.y.get(1), Some(true));
        assert_eq!(m.y.get(2), Some(false));
        assert_eq!(m.y.get(3), Some(false));
    }

    #[test]
    fn test_build_design_matrix() {
        let dir = TempDir::new().unwrap();
        let (events, submissions) = logs();
        let processor = CourseFluxProcessor::new(config(&dir));

        let m = processor
            .build_design_matrix(&events, &submissions, &metadata())
            .unwrap();
        assert_eq!(m.x.n_rows(), m.y.len());
        assert_eq!(m.x.index(), &[1, 2, 3]);
        assert!(m.x.has_column("COUNT(events)"));
        assert!(m.x.has_column("correct_rat_attempts"));
        assert!(m.x.has_column("score_3"));
        assert!(m.x.has_column("passed__mean"));
        // step 3 passed outside the window: no score
        assert_eq!(m.x.get(1, "score_3"), Some(0.0));
        assert_eq!(m.x.get(2, "score_1"), Some(1.0));
        assert!(dir.path().join(STEP_WEIGHT_FILE).exists());
        assert_eq!(m.definitions.len(), m.x.n_cols() - 18 - 4);
    }

    #[test]
    fn test_subsampled_labels_follow_features() {
        let dir = TempDir::new().unwrap();
        let (events, submissions) = logs();
        let mut config = config(&dir);
        config.synthesis.n_users_sample = Some(2);
        config.synthesis.max_depth = 1;

        let m = CourseFluxProcessor::new(config)
            .build_design_matrix(&events, &submissions, &metadata())
            .unwrap();
        assert_eq!(m.x.n_rows(), 2);
        assert_eq!(m.y.len(), 2);
    }
}
