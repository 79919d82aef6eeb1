//! Automatic feature synthesis
//!
//! Generators turn an entity graph plus per-user cutoff times into a user
//! feature table. Only events at or before a user's cutoff may contribute to
//! that user's row.

mod deep;
mod entity;
pub mod stats;
pub mod timeseries;

pub use deep::DeepFeatureSynthesizer;
pub use entity::{Entity, EntityGraph};
pub use timeseries::{TimeSeriesCache, TimeSeriesExtractor};

use crate::error::ComputeError;
use crate::schema::UserId;
use crate::table::FeatureTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last usable timestamp per user
pub type CutoffTimes = BTreeMap<UserId, i64>;

/// How one synthesized column was derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDefinition {
    pub name: String,
    pub primitive: String,
    /// Relationship path the primitive was applied through, e.g. `events.steps`
    pub base: String,
    pub depth: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
}

/// Generator output: the table and one definition per column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    pub table: FeatureTable,
    pub definitions: Vec<FeatureDefinition>,
}

/// A pluggable feature synthesis engine
pub trait FeatureGenerator {
    fn name(&self) -> &'static str;

    /// Features for every user in `cutoffs`. All-or-nothing.
    fn generate(
        &self,
        graph: &EntityGraph,
        cutoffs: &CutoffTimes,
    ) -> Result<FeatureSet, ComputeError>;
}
