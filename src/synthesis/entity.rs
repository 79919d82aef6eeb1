//! Entity graph for feature synthesis
//!
//! events -> users, events -> steps -> lessons -> sections. Steps come from the
//! course metadata; lessons and sections are normalized out of it, each taking
//! the columns that belong to it.

use crate::schema::{
    AttrValue, Interaction, StepAttribute, StepId, StepMetadata, UserId, SECONDS_PER_DAY,
};
use crate::synthesis::CutoffTimes;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use tracing::debug;

/// Columns moved from steps into the lessons entity
const LESSON_COLUMNS: [&str; 3] = ["section_id", "section_position", "section_title"];

/// Columns moved from lessons into the sections entity
const SECTION_COLUMNS: [&str; 2] = ["section_position", "section_title"];

fn is_lesson_column(name: &str) -> bool {
    (name.starts_with("lesson_") && name != "lesson_id") || LESSON_COLUMNS.contains(&name)
}

fn is_section_column(name: &str) -> bool {
    SECTION_COLUMNS.contains(&name)
}

/// A parent entity: rows keyed by an integer id, typed attribute columns
#[derive(Debug, Clone, Default)]
pub struct Entity {
    name: String,
    attributes: Vec<StepAttribute>,
    rows: BTreeMap<u64, Vec<AttrValue>>,
}

impl Entity {
    fn from_metadata(name: &str, meta: &StepMetadata) -> Self {
        let rows = meta
            .step_ids()
            .filter_map(|id| meta.row(id).map(|r| (id, r.to_vec())))
            .collect();
        Self {
            name: name.to_string(),
            attributes: meta.attributes().to_vec(),
            rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[StepAttribute] {
        &self.attributes
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn value(&self, id: u64, attr: usize) -> Option<&AttrValue> {
        self.rows.get(&id).and_then(|r| r.get(attr))
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.rows.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Split a new parent entity keyed by `key` off this one.
    ///
    /// Columns selected by `moves` leave this entity; the key column stays as
    /// the link. The first row seen for a key provides the parent's values.
    /// Rows with a missing key are not linked.
    fn normalize(
        &mut self,
        name: &str,
        key: &str,
        moves: impl Fn(&str) -> bool,
    ) -> (Entity, BTreeMap<u64, u64>) {
        let mut parent = Entity {
            name: name.to_string(),
            ..Default::default()
        };
        let mut links = BTreeMap::new();
        let Some(key_idx) = self.attribute_index(key) else {
            return (parent, links);
        };

        let moved: Vec<usize> = self
            .attributes
            .iter()
            .enumerate()
            .filter(|(idx, a)| *idx != key_idx && moves(&a.name))
            .map(|(idx, _)| idx)
            .collect();
        parent.attributes = moved.iter().map(|&i| self.attributes[i].clone()).collect();

        for (id, row) in &self.rows {
            let Some(parent_id) = row[key_idx].as_f64().map(|v| v as u64) else {
                continue;
            };
            links.insert(*id, parent_id);
            parent
                .rows
                .entry(parent_id)
                .or_insert_with(|| moved.iter().map(|&i| row[i].clone()).collect());
        }

        let keep = |idx: usize| !moved.contains(&idx);
        self.attributes = self
            .attributes
            .iter()
            .enumerate()
            .filter(|(idx, _)| keep(*idx))
            .map(|(_, a)| a.clone())
            .collect();
        for row in self.rows.values_mut() {
            *row = row
                .iter()
                .enumerate()
                .filter(|(idx, _)| keep(*idx))
                .map(|(_, v)| v.clone())
                .collect();
        }
        (parent, links)
    }
}

/// Events plus their parent entities
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    events: Vec<Interaction>,
    user_spans: BTreeMap<UserId, Range<usize>>,
    steps: Entity,
    lessons: Entity,
    sections: Entity,
    step_lesson: BTreeMap<StepId, u64>,
    lesson_section: BTreeMap<u64, u64>,
}

impl EntityGraph {
    pub fn build(interactions: &[Interaction], meta: &StepMetadata) -> Self {
        let mut steps = Entity::from_metadata("steps", meta);
        let (mut lessons, step_lesson) = steps.normalize("lessons", "lesson_id", is_lesson_column);
        let (sections, lesson_section) =
            lessons.normalize("sections", "section_id", is_section_column);

        let graph = Self {
            events: Vec::new(),
            user_spans: BTreeMap::new(),
            steps,
            lessons,
            sections,
            step_lesson,
            lesson_section,
        }
        .with_events(interactions.to_vec());

        debug!(
            events = graph.events.len(),
            users = graph.user_spans.len(),
            steps = graph.steps.len(),
            lessons = graph.lessons.len(),
            sections = graph.sections.len(),
            "built entity graph"
        );
        graph
    }

    fn with_events(mut self, mut events: Vec<Interaction>) -> Self {
        events.sort_by_key(|i| (i.user_id, i.timestamp, i.action));
        let mut spans: BTreeMap<UserId, Range<usize>> = BTreeMap::new();
        for (pos, e) in events.iter().enumerate() {
            spans
                .entry(e.user_id)
                .and_modify(|r| r.end = pos + 1)
                .or_insert(pos..pos + 1);
        }
        self.events = events;
        self.user_spans = spans;
        self
    }

    pub fn events(&self) -> &[Interaction] {
        &self.events
    }

    /// Events of one user in time order
    pub fn events_of(&self, user: UserId) -> &[Interaction] {
        match self.user_spans.get(&user) {
            Some(span) => &self.events[span.clone()],
            None => &[],
        }
    }

    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.user_spans.keys().copied()
    }

    pub fn n_users(&self) -> usize {
        self.user_spans.len()
    }

    pub fn steps(&self) -> &Entity {
        &self.steps
    }

    pub fn lessons(&self) -> &Entity {
        &self.lessons
    }

    pub fn sections(&self) -> &Entity {
        &self.sections
    }

    pub fn lesson_of(&self, step: StepId) -> Option<u64> {
        self.step_lesson.get(&step).copied()
    }

    pub fn section_of(&self, lesson: u64) -> Option<u64> {
        self.lesson_section.get(&lesson).copied()
    }

    /// Graph restricted to `n` users drawn with a seeded RNG
    pub fn subsample(&self, n: usize, seed: u64) -> Self {
        if n >= self.n_users() {
            return self.clone();
        }
        let users: Vec<UserId> = self.users().collect();
        let mut rng = StdRng::seed_from_u64(seed);
        let chosen: BTreeSet<UserId> = users.choose_multiple(&mut rng, n).copied().collect();

        let events = self
            .events
            .iter()
            .filter(|e| chosen.contains(&e.user_id))
            .cloned()
            .collect();
        debug!(sampled = chosen.len(), of = users.len(), seed, "subsampled users");
        Self {
            events: Vec::new(),
            user_spans: BTreeMap::new(),
            ..self.clone()
        }
        .with_events(events)
    }

    /// Per-user cutoff: first event plus the observation window
    pub fn cutoff_times(&self, days: u32) -> CutoffTimes {
        let window = i64::from(days) * SECONDS_PER_DAY;
        self.user_spans
            .iter()
            .map(|(user, span)| (*user, self.events[span.start].timestamp + window))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Action, AttributeKind, LogAdapter};

    const T0: i64 = 1_434_340_000;

    fn meta() -> StepMetadata {
        let csv = "step_id,lesson_id,step_viewed_by,lesson_viewed_by,section_id,section_position\n\
                   1,10,100,1000,7,1\n\
                   2,10,200,1000,7,1\n\
                   3,11,300,500,8,2\n";
        LogAdapter::read_step_metadata(csv.as_bytes()).unwrap()
    }

    fn log() -> Vec<Interaction> {
        let mut log = Vec::new();
        for user in 1..=6u64 {
            for k in 0..3i64 {
                log.push(Interaction {
                    user_id: user,
                    step_id: (k as u64 % 3) + 1,
                    timestamp: T0 + user as i64 * 1000 + k * SECONDS_PER_DAY,
                    action: Action::Viewed,
                });
            }
        }
        log.reverse();
        log
    }

    #[test]
    fn test_normalization() {
        let graph = EntityGraph::build(&log(), &meta());
        let step_cols: Vec<&str> = graph.steps().attributes().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(step_cols, vec!["lesson_id", "step_viewed_by"]);

        let lesson_cols: Vec<&str> = graph.lessons().attributes().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(lesson_cols, vec!["lesson_viewed_by", "section_id"]);
        assert_eq!(graph.lessons().len(), 2);

        assert_eq!(graph.sections().attributes()[0].kind, AttributeKind::Ordinal);
        assert_eq!(graph.lesson_of(3), Some(11));
        assert_eq!(graph.section_of(11), Some(8));
    }

    #[test]
    fn test_events_sorted_per_user() {
        let graph = EntityGraph::build(&log(), &meta());
        let events = graph.events_of(2);
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(graph.events_of(99).is_empty());
    }

    #[test]
    fn test_cutoffs_anchor_on_first_event() {
        let graph = EntityGraph::build(&log(), &meta());
        let cutoffs = graph.cutoff_times(2);
        assert_eq!(cutoffs.len(), 6);
        assert_eq!(cutoffs[&1], T0 + 1000 + 2 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_subsample_is_deterministic() {
        let graph = EntityGraph::build(&log(), &meta());
        let a = graph.subsample(3, 7);
        let b = graph.subsample(3, 7);
        assert_eq!(a.n_users(), 3);
        assert_eq!(a.users().collect::<Vec<_>>(), b.users().collect::<Vec<_>>());
        assert_eq!(a.events().len(), 9);
        assert_eq!(graph.subsample(100, 7).n_users(), 6);
    }
}
