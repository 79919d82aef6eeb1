//! Static per-step course metadata
//!
//! A wide table keyed by step_id. Every column is typed so the synthesis stage
//! knows which aggregations apply to it.

use crate::schema::records::StepId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic type of a metadata column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// Foreign key into another entity (lesson_id, section_id, ...)
    Id,
    Numeric,
    /// Numeric with a meaningful order only (positions)
    Ordinal,
    Boolean,
    Categorical,
}

impl AttributeKind {
    /// Whether numeric aggregations (mean, std, ...) apply
    pub fn is_numeric(self) -> bool {
        matches!(self, AttributeKind::Numeric | AttributeKind::Ordinal)
    }
}

/// A single metadata cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Missing,
    Number(f64),
    Bool(bool),
    Text(String),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(v) => Some(*v),
            AttrValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::Number(v) => Some(*v != 0.0),
            _ => None,
        }
    }

    /// Stable textual key, used for mode / num_unique over any kind
    pub fn key(&self) -> Option<String> {
        match self {
            AttrValue::Missing => None,
            AttrValue::Number(v) => Some(v.to_string()),
            AttrValue::Bool(b) => Some(b.to_string()),
            AttrValue::Text(s) => Some(s.clone()),
        }
    }

    /// Parse a raw cell according to its declared kind
    pub fn parse(raw: &str, kind: AttributeKind) -> AttrValue {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
            return AttrValue::Missing;
        }
        match kind {
            AttributeKind::Numeric | AttributeKind::Ordinal | AttributeKind::Id => raw
                .parse::<f64>()
                .map(AttrValue::Number)
                .unwrap_or_else(|_| AttrValue::Text(raw.to_string())),
            AttributeKind::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "1.0" => AttrValue::Bool(true),
                "false" | "0" | "0.0" => AttrValue::Bool(false),
                _ => AttrValue::Missing,
            },
            AttributeKind::Categorical => AttrValue::Text(raw.to_string()),
        }
    }
}

/// Column descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAttribute {
    pub name: String,
    pub kind: AttributeKind,
}

/// Declared kinds of the known course export columns
pub fn known_attribute_kind(name: &str) -> Option<AttributeKind> {
    use AttributeKind::*;
    let kind = match name {
        "lesson_id" | "assignment_id" | "unit_id" | "section_id" => Id,
        "step_position" | "unit_position" | "section_position" => Ordinal,
        "step_has_submissions_restrictions"
        | "step_is_solutions_unlocked"
        | "step_worth"
        | "step_actions.submit_#" => Boolean,
        "step_block.name"
        | "step_block.options.is_multiple_choice"
        | "step_block.options.is_run_user_code_allowed"
        | "section_title"
        | "lesson_title" => Categorical,
        "step_correct_ratio"
        | "step_discussions_count"
        | "step_max_submissions_count"
        | "step_passed_by"
        | "step_solutions_unlocked_attempts"
        | "step_variation"
        | "step_variations_count"
        | "step_viewed_by"
        | "step_block.options.code_templates_header_lines_count.r"
        | "step_block.options.execution_memory_limit"
        | "step_block.options.execution_time_limit"
        | "step_block.options.limits.r.memory"
        | "step_block.options.limits.r.time"
        | "step_block.video.duration"
        | "lesson_abuse_count"
        | "lesson_discussions_count"
        | "lesson_epic_count"
        | "lesson_passed_by"
        | "lesson_time_to_complete"
        | "lesson_viewed_by"
        | "lesson_vote_delta" => Numeric,
        _ => return None,
    };
    Some(kind)
}

/// Infer the kind of an undeclared column from its raw values
pub fn infer_attribute_kind<'a>(values: impl Iterator<Item = &'a str>) -> AttributeKind {
    let mut all_bool = true;
    let mut all_numeric = true;
    let mut seen = false;
    for raw in values.map(str::trim).filter(|v| !v.is_empty()) {
        seen = true;
        let lower = raw.to_ascii_lowercase();
        if lower != "true" && lower != "false" {
            all_bool = false;
        }
        if raw.parse::<f64>().is_err() {
            all_numeric = false;
        }
    }
    if !seen || all_numeric {
        AttributeKind::Numeric
    } else if all_bool {
        AttributeKind::Boolean
    } else {
        AttributeKind::Categorical
    }
}

/// Step metadata table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMetadata {
    attributes: Vec<StepAttribute>,
    rows: BTreeMap<StepId, Vec<AttrValue>>,
}

impl StepMetadata {
    pub fn new(attributes: Vec<StepAttribute>) -> Self {
        Self {
            attributes,
            rows: BTreeMap::new(),
        }
    }

    /// Insert or replace one step's row; short rows are padded with `Missing`
    pub fn insert(&mut self, step_id: StepId, mut values: Vec<AttrValue>) {
        values.resize(self.attributes.len(), AttrValue::Missing);
        self.rows.insert(step_id, values);
    }

    pub fn attributes(&self) -> &[StepAttribute] {
        &self.attributes
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn row(&self, step_id: StepId) -> Option<&[AttrValue]> {
        self.rows.get(&step_id).map(Vec::as_slice)
    }

    pub fn value(&self, step_id: StepId, attribute: &str) -> Option<&AttrValue> {
        let idx = self.attribute_index(attribute)?;
        self.rows.get(&step_id).and_then(|r| r.get(idx))
    }

    pub fn step_ids(&self) -> impl Iterator<Item = StepId> + '_ {
        self.rows.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_kinds() {
        assert_eq!(known_attribute_kind("lesson_id"), Some(AttributeKind::Id));
        assert_eq!(known_attribute_kind("step_worth"), Some(AttributeKind::Boolean));
        assert_eq!(
            known_attribute_kind("step_block.video.duration"),
            Some(AttributeKind::Numeric)
        );
        assert_eq!(known_attribute_kind("whatever"), None);
    }

    #[test]
    fn test_infer_kind() {
        assert_eq!(
            infer_attribute_kind(["1", "2.5", ""].into_iter()),
            AttributeKind::Numeric
        );
        assert_eq!(
            infer_attribute_kind(["True", "false"].into_iter()),
            AttributeKind::Boolean
        );
        assert_eq!(
            infer_attribute_kind(["text", "video"].into_iter()),
            AttributeKind::Categorical
        );
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(AttrValue::parse("3", AttributeKind::Numeric), AttrValue::Number(3.0));
        assert_eq!(AttrValue::parse("", AttributeKind::Numeric), AttrValue::Missing);
        assert_eq!(AttrValue::parse("True", AttributeKind::Boolean), AttrValue::Bool(true));
        assert_eq!(
            AttrValue::parse("code", AttributeKind::Categorical),
            AttrValue::Text("code".to_string())
        );
    }

    #[test]
    fn test_short_rows_are_padded() {
        let mut meta = StepMetadata::new(vec![
            StepAttribute {
                name: "lesson_id".to_string(),
                kind: AttributeKind::Id,
            },
            StepAttribute {
                name: "step_viewed_by".to_string(),
                kind: AttributeKind::Numeric,
            },
        ]);
        meta.insert(7, vec![AttrValue::Number(1.0)]);
        assert_eq!(meta.value(7, "step_viewed_by"), Some(&AttrValue::Missing));
        assert_eq!(meta.len(), 1);
    }
}
