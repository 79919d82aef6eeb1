//! CSV adapter for the platform log exports
//!
//! Columns are located by header name, so column order in the export does not
//! matter. Unknown action labels and unparsable cells are reported with the
//! offending line number.

use crate::error::ComputeError;
use crate::schema::records::*;
use crate::schema::step_meta::{
    infer_attribute_kind, known_attribute_kind, AttrValue, StepAttribute, StepMetadata,
};
use csv::{ReaderBuilder, StringRecord, Trim, Writer};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

const EVENT_COLUMNS: [&str; 4] = ["user_id", "step_id", "timestamp", "action"];
const SUBMISSION_COLUMNS: [&str; 4] = ["user_id", "step_id", "timestamp", "submission_status"];

/// Adapter between CSV exports and typed records
pub struct LogAdapter;

impl LogAdapter {
    /// Parse the step-interaction export
    pub fn read_events<R: Read>(reader: R) -> Result<Vec<EventRecord>, ComputeError> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let cols = column_positions(rdr.headers()?, &EVENT_COLUMNS)?;

        let mut events = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let line = line + 2;
            events.push(EventRecord {
                user_id: parse_field(&record, cols[0], "user_id", line)?,
                step_id: parse_field(&record, cols[1], "step_id", line)?,
                timestamp: parse_timestamp(&record, cols[2], line)?,
                action: field(&record, cols[3], "action", line)?.parse()?,
            });
        }
        Ok(events)
    }

    /// Parse the practice-submission export
    pub fn read_submissions<R: Read>(reader: R) -> Result<Vec<SubmissionRecord>, ComputeError> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let cols = column_positions(rdr.headers()?, &SUBMISSION_COLUMNS)?;

        let mut submissions = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let line = line + 2;
            submissions.push(SubmissionRecord {
                user_id: parse_field(&record, cols[0], "user_id", line)?,
                step_id: parse_field(&record, cols[1], "step_id", line)?,
                timestamp: parse_timestamp(&record, cols[2], line)?,
                submission_status: field(&record, cols[3], "submission_status", line)?.parse()?,
            });
        }
        Ok(submissions)
    }

    /// Parse the wide step metadata table.
    ///
    /// Known course export columns get their declared kind; any other column
    /// is typed by inspecting its values.
    pub fn read_step_metadata<R: Read>(reader: R) -> Result<StepMetadata, ComputeError> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let step_col = headers
            .iter()
            .position(|h| h == "step_id")
            .ok_or_else(|| ComputeError::MissingColumn("step_id".to_string()))?;

        let records = rdr.records().collect::<Result<Vec<_>, _>>()?;

        let attributes: Vec<(usize, StepAttribute)> = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != step_col)
            .map(|(idx, name)| {
                let kind = known_attribute_kind(name).unwrap_or_else(|| {
                    infer_attribute_kind(records.iter().map(|r| r.get(idx).unwrap_or("")))
                });
                (
                    idx,
                    StepAttribute {
                        name: name.to_string(),
                        kind,
                    },
                )
            })
            .collect();

        let mut meta =
            StepMetadata::new(attributes.iter().map(|(_, attr)| attr.clone()).collect());
        for (line, record) in records.iter().enumerate() {
            let step_id: StepId = parse_field(record, step_col, "step_id", line + 2)?;
            let values = attributes
                .iter()
                .map(|(idx, attr)| AttrValue::parse(record.get(*idx).unwrap_or(""), attr.kind))
                .collect();
            meta.insert(step_id, values);
        }
        Ok(meta)
    }

    pub fn read_events_path(path: &Path) -> Result<Vec<EventRecord>, ComputeError> {
        Self::read_events(File::open(path)?)
    }

    pub fn read_submissions_path(path: &Path) -> Result<Vec<SubmissionRecord>, ComputeError> {
        Self::read_submissions(File::open(path)?)
    }

    pub fn read_step_metadata_path(path: &Path) -> Result<StepMetadata, ComputeError> {
        Self::read_step_metadata(File::open(path)?)
    }

    /// Write events back in export layout
    pub fn write_events<W: Write>(events: &[EventRecord], writer: W) -> Result<(), ComputeError> {
        let mut wtr = Writer::from_writer(writer);
        wtr.write_record(EVENT_COLUMNS)?;
        for e in events {
            wtr.write_record([
                e.user_id.to_string(),
                e.step_id.to_string(),
                e.timestamp.to_string(),
                e.action.as_str().to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Write submissions back in export layout
    pub fn write_submissions<W: Write>(
        submissions: &[SubmissionRecord],
        writer: W,
    ) -> Result<(), ComputeError> {
        let mut wtr = Writer::from_writer(writer);
        wtr.write_record(SUBMISSION_COLUMNS)?;
        for s in submissions {
            wtr.write_record([
                s.user_id.to_string(),
                s.step_id.to_string(),
                s.timestamp.to_string(),
                s.submission_status.as_str().to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

fn column_positions(headers: &StringRecord, names: &[&str]) -> Result<Vec<usize>, ComputeError> {
    names
        .iter()
        .map(|name| {
            headers
                .iter()
                .position(|h| h == *name)
                .ok_or_else(|| ComputeError::MissingColumn(name.to_string()))
        })
        .collect()
}

fn field<'r>(
    record: &'r StringRecord,
    idx: usize,
    column: &str,
    line: usize,
) -> Result<&'r str, ComputeError> {
    record.get(idx).ok_or_else(|| {
        ComputeError::ParseError(format!("line {}: missing value for '{}'", line, column))
    })
}

fn parse_field<T: FromStr>(
    record: &StringRecord,
    idx: usize,
    column: &str,
    line: usize,
) -> Result<T, ComputeError> {
    let raw = field(record, idx, column, line)?;
    raw.parse::<T>().map_err(|_| {
        ComputeError::ParseError(format!("line {}: invalid {} '{}'", line, column, raw))
    })
}

/// Exports occasionally carry float-formatted timestamps ("1434340848.0")
fn parse_timestamp(record: &StringRecord, idx: usize, line: usize) -> Result<i64, ComputeError> {
    let raw = field(record, idx, "timestamp", line)?;
    raw.parse::<i64>()
        .or_else(|_| raw.parse::<f64>().map(|v| v as i64))
        .map_err(|_| {
            ComputeError::ParseError(format!("line {}: invalid timestamp '{}'", line, raw))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::step_meta::AttributeKind;

    #[test]
    fn test_read_events_any_column_order() {
        let csv = "step_id,timestamp,action,user_id\n\
                   32815,1434340848,viewed,17632\n\
                   32815,1434340848.0,passed,17632\n";
        let events = LogAdapter::read_events(csv.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].user_id, 17632);
        assert_eq!(events[0].step_id, 32815);
        assert_eq!(events[1].timestamp, 1_434_340_848);
        assert_eq!(events[1].action, EventAction::Passed);
    }

    #[test]
    fn test_read_submissions() {
        let csv = "step_id,timestamp,submission_status,user_id\n\
                   31971,1434349275,correct,15853\n";
        let subs = LogAdapter::read_submissions(csv.as_bytes()).unwrap();
        assert_eq!(subs[0].submission_status, SubmissionStatus::Correct);
    }

    #[test]
    fn test_missing_column() {
        let csv = "step_id,timestamp,user_id\n1,2,3\n";
        let result = LogAdapter::read_events(csv.as_bytes());
        assert!(matches!(result, Err(ComputeError::MissingColumn(c)) if c == "action"));
    }

    #[test]
    fn test_unknown_action() {
        let csv = "user_id,step_id,timestamp,action\n1,2,3,skipped\n";
        let result = LogAdapter::read_events(csv.as_bytes());
        assert!(matches!(result, Err(ComputeError::UnknownAction(a)) if a == "skipped"));
    }

    #[test]
    fn test_bad_number_reports_line() {
        let csv = "user_id,step_id,timestamp,action\n1,2,3,viewed\nx,2,3,viewed\n";
        let err = LogAdapter::read_events(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_events_write_read_back() {
        let events = vec![EventRecord {
            user_id: 1,
            step_id: 42,
            timestamp: 100,
            action: EventAction::StartedAttempt,
        }];
        let mut buf = Vec::new();
        LogAdapter::write_events(&events, &mut buf).unwrap();
        let parsed = LogAdapter::read_events(buf.as_slice()).unwrap();
        assert_eq!(parsed, events);
    }

    #[test]
    fn test_read_step_metadata() {
        let csv = "step_id,lesson_id,step_viewed_by,step_worth,step_block.name,custom_flag\n\
                   31971,8,1200,True,text,true\n\
                   31972,8,,False,code,false\n";
        let meta = LogAdapter::read_step_metadata(csv.as_bytes()).unwrap();
        assert_eq!(meta.len(), 2);
        let kinds: Vec<_> = meta.attributes().iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AttributeKind::Id,
                AttributeKind::Numeric,
                AttributeKind::Boolean,
                AttributeKind::Categorical,
                AttributeKind::Boolean,
            ]
        );
        assert_eq!(meta.value(31972, "step_viewed_by"), Some(&AttrValue::Missing));
        assert_eq!(meta.value(31971, "step_worth"), Some(&AttrValue::Bool(true)));
    }
}
