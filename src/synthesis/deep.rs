//! Native deep feature synthesis
//!
//! Stacks aggregation primitives along the entity graph's relationships:
//! depth 1 aggregates the user's events, depth 2 reaches step attributes
//! through events.steps, depth 3 reaches lesson attributes through
//! events.steps.lessons.

use super::stats;
use super::{CutoffTimes, EntityGraph, FeatureDefinition, FeatureGenerator, FeatureSet};
use crate::error::ComputeError;
use crate::schema::{Action, AttrValue, AttributeKind, Interaction, SECONDS_PER_DAY};
use crate::table::FeatureTable;
use chrono::{DateTime, Datelike, Weekday};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Deepest supported relationship path
pub const MAX_DEPTH: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumericAgg {
    Mean,
    Min,
    Max,
    Std,
    Sum,
    Median,
    Skew,
}

impl NumericAgg {
    const ALL: [NumericAgg; 7] = [
        NumericAgg::Mean,
        NumericAgg::Min,
        NumericAgg::Max,
        NumericAgg::Std,
        NumericAgg::Sum,
        NumericAgg::Median,
        NumericAgg::Skew,
    ];

    fn name(self) -> &'static str {
        match self {
            NumericAgg::Mean => "MEAN",
            NumericAgg::Min => "MIN",
            NumericAgg::Max => "MAX",
            NumericAgg::Std => "STD",
            NumericAgg::Sum => "SUM",
            NumericAgg::Median => "MEDIAN",
            NumericAgg::Skew => "SKEW",
        }
    }

    fn apply(self, values: &[f64]) -> Option<f64> {
        match self {
            NumericAgg::Mean => stats::mean(values),
            NumericAgg::Min => stats::min(values),
            NumericAgg::Max => stats::max(values),
            NumericAgg::Std => stats::std(values),
            NumericAgg::Sum => Some(values.iter().sum()),
            NumericAgg::Median => stats::median(values),
            NumericAgg::Skew => stats::skew(values),
        }
    }
}

/// Event-time aggregations that also exist in a "where" form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeAgg {
    Count,
    PercentWeekend,
    AvgTimeBetween,
    TimeSinceFirst,
    TimeSinceLast,
}

impl TimeAgg {
    const ALL: [TimeAgg; 5] = [
        TimeAgg::Count,
        TimeAgg::PercentWeekend,
        TimeAgg::AvgTimeBetween,
        TimeAgg::TimeSinceFirst,
        TimeAgg::TimeSinceLast,
    ];

    fn primitive(self) -> &'static str {
        match self {
            TimeAgg::Count => "COUNT",
            TimeAgg::PercentWeekend => "PERCENT_TRUE",
            TimeAgg::AvgTimeBetween => "AVG_TIME_BETWEEN",
            TimeAgg::TimeSinceFirst => "TIME_SINCE_FIRST",
            TimeAgg::TimeSinceLast => "TIME_SINCE_LAST",
        }
    }

    fn argument(self) -> &'static str {
        match self {
            TimeAgg::Count => "events",
            TimeAgg::PercentWeekend => "events.IS_WEEKEND(date)",
            _ => "events.date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Via {
    Steps,
    Lessons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primitive {
    Time { agg: TimeAgg, filter: Option<Action> },
    NumUniqueSteps,
    NumUniqueActions,
    ActionTrend,
    LastAction,
    ModeAction,
    MeanDay,
    ModeWeekday,
    ModeMonth,
    MeanTimeSincePrevious,
    Numeric { via: Via, attr: usize, agg: NumericAgg },
    PercentTrue { attr: usize },
    Mode { attr: usize },
    NumUnique { attr: usize },
    NumUniqueSections,
}

struct Feature {
    primitive: Primitive,
    definition: FeatureDefinition,
}

fn definition(name: String, primitive: &str, base: &str, depth: u8) -> FeatureDefinition {
    FeatureDefinition {
        name,
        primitive: primitive.to_string(),
        base: base.to_string(),
        depth,
        where_clause: None,
    }
}

/// One user's events up to the cutoff
struct Window<'g> {
    cutoff: i64,
    events: &'g [Interaction],
}

impl<'g> Window<'g> {
    fn filtered(&self, filter: Option<Action>) -> impl Iterator<Item = &'g Interaction> + '_ {
        self.events
            .iter()
            .filter(move |e| filter.map_or(true, |a| e.action == a))
    }

    fn times(&self, filter: Option<Action>) -> Vec<i64> {
        self.filtered(filter).map(|e| e.timestamp).collect()
    }
}

fn is_weekend(timestamp: i64) -> Option<bool> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| matches!(dt.weekday(), Weekday::Sat | Weekday::Sun))
}

/// Native deep feature synthesizer
#[derive(Debug, Clone)]
pub struct DeepFeatureSynthesizer {
    max_depth: u8,
    interesting_actions: Vec<Action>,
}

impl Default for DeepFeatureSynthesizer {
    fn default() -> Self {
        Self::new(MAX_DEPTH)
    }
}

impl DeepFeatureSynthesizer {
    /// `max_depth` is clamped to 1..=3
    pub fn new(max_depth: u8) -> Self {
        Self {
            max_depth: max_depth.clamp(1, MAX_DEPTH),
            interesting_actions: Action::ALL.to_vec(),
        }
    }

    /// Action values that get conditional aggregations
    pub fn with_interesting_actions(mut self, actions: Vec<Action>) -> Self {
        self.interesting_actions = actions;
        self
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    fn plan(&self, graph: &EntityGraph) -> Vec<Feature> {
        let mut features = Vec::new();
        let mut push = |primitive: Primitive, definition: FeatureDefinition| {
            features.push(Feature {
                primitive,
                definition,
            })
        };

        for agg in TimeAgg::ALL {
            push(
                Primitive::Time { agg, filter: None },
                definition(
                    format!("{}({})", agg.primitive(), agg.argument()),
                    agg.primitive(),
                    "events",
                    1,
                ),
            );
        }
        let simple = [
            (Primitive::NumUniqueSteps, "NUM_UNIQUE", "NUM_UNIQUE(events.step_id)"),
            (Primitive::NumUniqueActions, "NUM_UNIQUE", "NUM_UNIQUE(events.action)"),
            (Primitive::ActionTrend, "TREND", "TREND(events.action_rank, date)"),
            (Primitive::LastAction, "LAST", "LAST(events.action)"),
            (Primitive::ModeAction, "MODE", "MODE(events.action)"),
            (Primitive::MeanDay, "MEAN", "MEAN(events.DAY(date))"),
            (Primitive::ModeWeekday, "MODE", "MODE(events.WEEKDAY(date))"),
            (Primitive::ModeMonth, "MODE", "MODE(events.MONTH(date))"),
            (
                Primitive::MeanTimeSincePrevious,
                "MEAN",
                "MEAN(events.TIME_SINCE_PREVIOUS(date))",
            ),
        ];
        for (primitive, name, full) in simple {
            push(primitive, definition(full.to_string(), name, "events", 1));
        }

        for action in &self.interesting_actions {
            for agg in TimeAgg::ALL {
                let clause = format!("action = {}", action);
                let mut def = definition(
                    format!("{}({} WHERE {})", agg.primitive(), agg.argument(), clause),
                    agg.primitive(),
                    "events",
                    1,
                );
                def.where_clause = Some(clause);
                push(
                    Primitive::Time {
                        agg,
                        filter: Some(*action),
                    },
                    def,
                );
            }
        }

        if self.max_depth >= 2 {
            for (attr, a) in graph.steps().attributes().iter().enumerate() {
                let base = "events.steps";
                match a.kind {
                    AttributeKind::Numeric | AttributeKind::Ordinal => {
                        for agg in NumericAgg::ALL {
                            push(
                                Primitive::Numeric {
                                    via: Via::Steps,
                                    attr,
                                    agg,
                                },
                                definition(
                                    format!("{}({}.{})", agg.name(), base, a.name),
                                    agg.name(),
                                    base,
                                    2,
                                ),
                            );
                        }
                    }
                    AttributeKind::Boolean => push(
                        Primitive::PercentTrue { attr },
                        definition(
                            format!("PERCENT_TRUE({}.{})", base, a.name),
                            "PERCENT_TRUE",
                            base,
                            2,
                        ),
                    ),
                    AttributeKind::Categorical | AttributeKind::Id => {
                        push(
                            Primitive::Mode { attr },
                            definition(format!("MODE({}.{})", base, a.name), "MODE", base, 2),
                        );
                        push(
                            Primitive::NumUnique { attr },
                            definition(
                                format!("NUM_UNIQUE({}.{})", base, a.name),
                                "NUM_UNIQUE",
                                base,
                                2,
                            ),
                        );
                    }
                }
            }
        }

        if self.max_depth >= 3 {
            let base = "events.steps.lessons";
            for (attr, a) in graph.lessons().attributes().iter().enumerate() {
                if a.kind.is_numeric() {
                    for agg in NumericAgg::ALL {
                        push(
                            Primitive::Numeric {
                                via: Via::Lessons,
                                attr,
                                agg,
                            },
                            definition(
                                format!("{}({}.{})", agg.name(), base, a.name),
                                agg.name(),
                                base,
                                3,
                            ),
                        );
                    }
                }
            }
            if graph.lessons().attribute_index("section_id").is_some() {
                push(
                    Primitive::NumUniqueSections,
                    definition(
                        format!("NUM_UNIQUE({}.section_id)", base),
                        "NUM_UNIQUE",
                        base,
                        3,
                    ),
                );
            }
        }

        features
    }

    fn step_value<'g>(graph: &'g EntityGraph, e: &Interaction, attr: usize) -> Option<&'g AttrValue> {
        graph.steps().value(e.step_id, attr)
    }

    fn lesson_value<'g>(graph: &'g EntityGraph, e: &Interaction, attr: usize) -> Option<&'g AttrValue> {
        graph
            .lesson_of(e.step_id)
            .and_then(|lesson| graph.lessons().value(lesson, attr))
    }

    fn evaluate(
        primitive: Primitive,
        window: &Window<'_>,
        graph: &EntityGraph,
        codes: &BTreeMap<usize, BTreeMap<String, f64>>,
    ) -> Option<f64> {
        match primitive {
            Primitive::Time { agg, filter } => {
                let times = window.times(filter);
                match agg {
                    TimeAgg::Count => Some(times.len() as f64),
                    TimeAgg::PercentWeekend => {
                        let flags: Vec<bool> = times.iter().filter_map(|t| is_weekend(*t)).collect();
                        stats::percent_true(&flags)
                    }
                    TimeAgg::AvgTimeBetween => match (times.first(), times.last()) {
                        (Some(first), Some(last)) if times.len() > 1 => {
                            Some((last - first) as f64 / (times.len() - 1) as f64)
                        }
                        _ => None,
                    },
                    TimeAgg::TimeSinceFirst => times.first().map(|t| (window.cutoff - t) as f64),
                    TimeAgg::TimeSinceLast => times.last().map(|t| (window.cutoff - t) as f64),
                }
            }
            Primitive::NumUniqueSteps => {
                let steps: BTreeSet<_> = window.events.iter().map(|e| e.step_id).collect();
                Some(steps.len() as f64)
            }
            Primitive::NumUniqueActions => {
                let actions: BTreeSet<_> = window.events.iter().map(|e| e.action).collect();
                Some(actions.len() as f64)
            }
            Primitive::ActionTrend => {
                let first = window.events.first()?.timestamp;
                let x: Vec<f64> = window
                    .events
                    .iter()
                    .map(|e| (e.timestamp - first) as f64 / SECONDS_PER_DAY as f64)
                    .collect();
                let y: Vec<f64> = window.events.iter().map(|e| f64::from(e.action.rank())).collect();
                stats::trend(&x, &y)
            }
            Primitive::LastAction => window.events.last().map(|e| f64::from(e.action.rank())),
            Primitive::ModeAction => {
                let ranks: Vec<f64> = window.events.iter().map(|e| f64::from(e.action.rank())).collect();
                stats::mode(&ranks)
            }
            Primitive::MeanDay | Primitive::ModeWeekday | Primitive::ModeMonth => {
                let values: Vec<f64> = window
                    .events
                    .iter()
                    .filter_map(|e| DateTime::from_timestamp(e.timestamp, 0))
                    .map(|dt| match primitive {
                        Primitive::MeanDay => f64::from(dt.day()),
                        Primitive::ModeWeekday => f64::from(dt.weekday().num_days_from_monday()),
                        _ => f64::from(dt.month()),
                    })
                    .collect();
                if primitive == Primitive::MeanDay {
                    stats::mean(&values)
                } else {
                    stats::mode(&values)
                }
            }
            Primitive::MeanTimeSincePrevious => {
                let gaps: Vec<f64> = window
                    .events
                    .windows(2)
                    .map(|w| (w[1].timestamp - w[0].timestamp) as f64)
                    .collect();
                stats::mean(&gaps)
            }
            Primitive::Numeric { via, attr, agg } => {
                let values: Vec<f64> = window
                    .events
                    .iter()
                    .filter_map(|e| match via {
                        Via::Steps => Self::step_value(graph, e, attr),
                        Via::Lessons => Self::lesson_value(graph, e, attr),
                    })
                    .filter_map(AttrValue::as_f64)
                    .collect();
                agg.apply(&values)
            }
            Primitive::PercentTrue { attr } => {
                let flags: Vec<bool> = window
                    .events
                    .iter()
                    .filter_map(|e| Self::step_value(graph, e, attr))
                    .filter_map(AttrValue::as_bool)
                    .collect();
                stats::percent_true(&flags)
            }
            Primitive::Mode { attr } => {
                let attr_codes = codes.get(&attr)?;
                let values: Vec<f64> = window
                    .events
                    .iter()
                    .filter_map(|e| Self::step_value(graph, e, attr))
                    .filter_map(AttrValue::key)
                    .filter_map(|k| attr_codes.get(&k).copied())
                    .collect();
                stats::mode(&values)
            }
            Primitive::NumUnique { attr } => {
                let keys: BTreeSet<String> = window
                    .events
                    .iter()
                    .filter_map(|e| Self::step_value(graph, e, attr))
                    .filter_map(AttrValue::key)
                    .collect();
                Some(keys.len() as f64)
            }
            Primitive::NumUniqueSections => {
                let sections: BTreeSet<u64> = window
                    .events
                    .iter()
                    .filter_map(|e| graph.lesson_of(e.step_id))
                    .filter_map(|lesson| graph.section_of(lesson))
                    .collect();
                Some(sections.len() as f64)
            }
        }
    }

    /// MODE output for id and categorical step attributes.
    ///
    /// Ids keep their numeric value; categories map to their position among
    /// the attribute's sorted distinct values.
    fn category_codes(graph: &EntityGraph) -> BTreeMap<usize, BTreeMap<String, f64>> {
        let steps = graph.steps();
        let mut codes = BTreeMap::new();
        for (attr, a) in steps.attributes().iter().enumerate() {
            if !matches!(a.kind, AttributeKind::Categorical | AttributeKind::Id) {
                continue;
            }
            let mut keys: BTreeMap<String, Option<f64>> = BTreeMap::new();
            for id in steps.ids() {
                if let Some(v) = steps.value(id, attr) {
                    if let Some(key) = v.key() {
                        let numeric = if a.kind == AttributeKind::Id { v.as_f64() } else { None };
                        keys.insert(key, numeric);
                    }
                }
            }
            let attr_codes = keys
                .into_iter()
                .enumerate()
                .map(|(pos, (key, numeric))| (key, numeric.unwrap_or(pos as f64)))
                .collect();
            codes.insert(attr, attr_codes);
        }
        codes
    }
}

impl FeatureGenerator for DeepFeatureSynthesizer {
    fn name(&self) -> &'static str {
        "deep_feature_synthesis"
    }

    fn generate(
        &self,
        graph: &EntityGraph,
        cutoffs: &CutoffTimes,
    ) -> Result<FeatureSet, ComputeError> {
        let features = self.plan(graph);
        let codes = Self::category_codes(graph);

        let windows: Vec<Window<'_>> = cutoffs
            .iter()
            .map(|(user, cutoff)| {
                let events = graph.events_of(*user);
                let visible = events.partition_point(|e| e.timestamp <= *cutoff);
                Window {
                    cutoff: *cutoff,
                    events: &events[..visible],
                }
            })
            .collect();

        let mut table = FeatureTable::new(cutoffs.keys().copied());
        let mut definitions = Vec::with_capacity(features.len());
        for feature in features {
            let values = windows
                .iter()
                .map(|w| Self::evaluate(feature.primitive, w, graph, &codes))
                .collect();
            table.push_column(feature.definition.name.clone(), values)?;
            definitions.push(feature.definition);
        }

        info!(
            users = table.n_rows(),
            features = table.n_cols(),
            max_depth = self.max_depth,
            "synthesized features"
        );
        Ok(FeatureSet { table, definitions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LogAdapter;

    // Monday 2015-06-15 03:46:40 UTC
    const T0: i64 = 1_434_340_000;

    fn graph() -> EntityGraph {
        let meta = "step_id,lesson_id,step_viewed_by,step_worth,step_block.name,lesson_viewed_by,section_id\n\
                    1,10,100,True,text,1000,7\n\
                    2,10,300,False,code,1000,7\n\
                    3,11,500,False,code,50,8\n";
        let meta = LogAdapter::read_step_metadata(meta.as_bytes()).unwrap();
        let e = |user, step, ts, action| Interaction {
            user_id: user,
            step_id: step,
            timestamp: ts,
            action,
        };
        let log = vec![
            e(1, 1, T0, Action::Discovered),
            e(1, 1, T0 + 100, Action::Viewed),
            e(1, 2, T0 + 300, Action::Passed),
            // after the 2-day cutoff
            e(1, 3, T0 + 3 * SECONDS_PER_DAY, Action::Passed),
            e(2, 3, T0 + 50, Action::Viewed),
        ];
        EntityGraph::build(&log, &meta)
    }

    #[test]
    fn test_depth_one_features() {
        let graph = graph();
        let cutoffs = graph.cutoff_times(2);
        let set = DeepFeatureSynthesizer::new(1).generate(&graph, &cutoffs).unwrap();
        let t = &set.table;

        assert_eq!(t.index(), &[1, 2]);
        assert_eq!(t.get(1, "COUNT(events)"), Some(3.0));
        assert_eq!(t.get(1, "NUM_UNIQUE(events.step_id)"), Some(2.0));
        assert_eq!(t.get(1, "AVG_TIME_BETWEEN(events.date)"), Some(150.0));
        assert_eq!(
            t.get(1, "TIME_SINCE_LAST(events.date)"),
            Some((2 * SECONDS_PER_DAY - 300) as f64)
        );
        assert_eq!(t.get(1, "COUNT(events WHERE action = passed)"), Some(1.0));
        assert_eq!(t.get(1, "LAST(events.action)"), Some(f64::from(Action::Passed.rank())));
        assert_eq!(t.get(1, "MODE(events.WEEKDAY(date))"), Some(0.0));
        assert_eq!(t.get(1, "PERCENT_TRUE(events.IS_WEEKEND(date))"), Some(0.0));
        assert_eq!(t.get(2, "AVG_TIME_BETWEEN(events.date)"), None);
        assert!(set.definitions.iter().all(|d| d.depth == 1));
        assert_eq!(set.definitions.len(), t.n_cols());
    }

    #[test]
    fn test_cutoff_hides_later_events() {
        let graph = graph();
        let cutoffs = graph.cutoff_times(2);
        let set = DeepFeatureSynthesizer::new(3).generate(&graph, &cutoffs).unwrap();
        // step 3 (lesson 11, section 8) was only passed after the cutoff
        assert_eq!(set.table.get(1, "NUM_UNIQUE(events.steps.lessons.section_id)"), Some(1.0));
        assert_eq!(set.table.get(1, "MAX(events.steps.step_viewed_by)"), Some(300.0));
    }

    #[test]
    fn test_deeper_features() {
        let graph = graph();
        let cutoffs = graph.cutoff_times(2);
        let set = DeepFeatureSynthesizer::new(3).generate(&graph, &cutoffs).unwrap();
        let t = &set.table;

        assert_eq!(t.get(1, "MEAN(events.steps.step_viewed_by)"), Some(500.0 / 3.0));
        assert_eq!(t.get(1, "PERCENT_TRUE(events.steps.step_worth)"), Some(2.0 / 3.0));
        assert_eq!(t.get(1, "NUM_UNIQUE(events.steps.step_block.name)"), Some(2.0));
        // "code" < "text"
        assert_eq!(t.get(1, "MODE(events.steps.step_block.name)"), Some(1.0));
        assert_eq!(t.get(1, "MODE(events.steps.lesson_id)"), Some(10.0));
        assert_eq!(t.get(2, "MEAN(events.steps.lessons.lesson_viewed_by)"), Some(50.0));
        assert!(set.definitions.iter().any(|d| d.depth == 3));
    }

    #[test]
    fn test_depth_is_clamped() {
        assert_eq!(DeepFeatureSynthesizer::new(0).max_depth(), 1);
        assert_eq!(DeepFeatureSynthesizer::new(9).max_depth(), 3);
    }
}
