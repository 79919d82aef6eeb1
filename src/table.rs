//! User-indexed feature table
//!
//! Columnar table keyed by a sorted, unique user index. Cells are `Option<f64>`:
//! `None` means "undefined", which is kept distinct from a measured zero until a
//! caller explicitly fills it.

use crate::error::ComputeError;
use crate::schema::UserId;
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Read, Write};

/// Name of the index column in CSV form
pub const INDEX_COLUMN: &str = "user_id";

/// A named feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Feature table indexed by user_id
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureTable {
    index: Vec<UserId>,
    columns: Vec<Column>,
}

impl FeatureTable {
    /// Create an empty table over the given users (sorted and deduplicated)
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        let mut index: Vec<UserId> = users.into_iter().collect();
        index.sort_unstable();
        index.dedup();
        Self {
            index,
            columns: Vec::new(),
        }
    }

    pub fn index(&self) -> &[UserId] {
        &self.index
    }

    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn row_position(&self, user: UserId) -> Option<usize> {
        self.index.binary_search(&user).ok()
    }

    /// Cell value; `None` for an unknown user, unknown column, or undefined cell
    pub fn get(&self, user: UserId, column: &str) -> Option<f64> {
        let row = self.row_position(user)?;
        self.column(column).and_then(|values| values[row])
    }

    /// Append a column aligned to the index
    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), ComputeError> {
        let name = name.into();
        if values.len() != self.index.len() {
            return Err(ComputeError::IndexMismatch(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.index.len()
            )));
        }
        if self.has_column(&name) {
            return Err(ComputeError::DuplicateColumn(name));
        }
        self.columns.push(Column { name, values });
        Ok(())
    }

    /// Append a column computed per user
    pub fn push_column_with(
        &mut self,
        name: impl Into<String>,
        mut f: impl FnMut(UserId) -> Option<f64>,
    ) -> Result<(), ComputeError> {
        let values = self.index.iter().map(|&u| f(u)).collect();
        self.push_column(name, values)
    }

    /// Horizontal concatenation of tables over the identical index
    pub fn concat(mut self, other: FeatureTable) -> Result<Self, ComputeError> {
        if self.index != other.index {
            return Err(ComputeError::IndexMismatch(format!(
                "cannot concatenate tables over different users ({} vs {} rows)",
                self.index.len(),
                other.index.len()
            )));
        }
        for column in other.columns {
            self.push_column(column.name, column.values)?;
        }
        Ok(self)
    }

    /// Left join on user_id. Both indexes are unique, so the join is 1:1;
    /// users of `self` missing from `other` get `None`.
    pub fn left_join(mut self, other: &FeatureTable) -> Result<Self, ComputeError> {
        let positions: Vec<Option<usize>> =
            self.index.iter().map(|&u| other.row_position(u)).collect();
        for column in &other.columns {
            let values = positions
                .iter()
                .map(|pos| pos.and_then(|p| column.values[p]))
                .collect();
            self.push_column(column.name.clone(), values)?;
        }
        Ok(self)
    }

    /// Keep only the named columns, in the given order
    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, ComputeError> {
        let mut selected = FeatureTable {
            index: self.index.clone(),
            columns: Vec::with_capacity(names.len()),
        };
        for name in names {
            let name = name.as_ref();
            let values = self
                .column(name)
                .ok_or_else(|| ComputeError::MissingColumn(name.to_string()))?;
            selected.push_column(name, values.to_vec())?;
        }
        Ok(selected)
    }

    /// Drop the named columns; names not present are ignored
    pub fn drop_columns<S: AsRef<str>>(&mut self, names: &[S]) {
        let drop: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
        self.columns.retain(|c| !drop.contains(c.name.as_str()));
    }

    /// Rows for exactly the given users. Every requested user must be present.
    pub fn select_users(
        &self,
        users: impl IntoIterator<Item = UserId>,
    ) -> Result<Self, ComputeError> {
        let wanted = FeatureTable::new(users);
        let positions = wanted
            .index
            .iter()
            .map(|&u| {
                self.row_position(u).ok_or_else(|| {
                    ComputeError::IndexMismatch(format!("user {} has no feature row", u))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                values: positions.iter().map(|&p| c.values[p]).collect(),
            })
            .collect();
        Ok(FeatureTable {
            index: wanted.index,
            columns,
        })
    }

    /// Replace every undefined cell with `value`
    pub fn fill_missing(&mut self, value: f64) {
        for column in &mut self.columns {
            for cell in column.values.iter_mut().filter(|c| c.is_none()) {
                *cell = Some(value);
            }
        }
    }

    /// Replace undefined cells with the mean of the column's defined cells.
    /// Columns with no defined cell stay undefined.
    pub fn fill_missing_with_means(&mut self) {
        let means: Vec<(String, f64)> = self
            .columns
            .iter()
            .filter_map(|c| self.column_mean(&c.name).map(|m| (c.name.clone(), m)))
            .collect();
        for (name, mean) in means {
            self.fill_column(&name, mean);
        }
    }

    /// Mean of a column's defined cells
    pub fn column_mean(&self, name: &str) -> Option<f64> {
        let defined: Vec<f64> = self.column(name)?.iter().flatten().copied().collect();
        if defined.is_empty() {
            None
        } else {
            Some(defined.iter().sum::<f64>() / defined.len() as f64)
        }
    }

    /// Replace undefined cells of one column; unknown names are ignored
    pub fn fill_column(&mut self, name: &str, value: f64) {
        if let Some(column) = self.columns.iter_mut().find(|c| c.name == name) {
            for cell in column.values.iter_mut().filter(|c| c.is_none()) {
                *cell = Some(value);
            }
        }
    }

    /// Stack rows of two tables with the same columns. A user present in both
    /// is a duplicate key and rejected.
    pub fn append_rows(self, other: FeatureTable) -> Result<Self, ComputeError> {
        let names: Vec<&str> = self.column_names().collect();
        let other_names: Vec<&str> = other.column_names().collect();
        if names != other_names {
            return Err(ComputeError::IndexMismatch(
                "cannot stack tables with different columns".to_string(),
            ));
        }
        if let Some(dup) = other.index.iter().find(|u| self.row_position(**u).is_some()) {
            return Err(ComputeError::IndexMismatch(format!(
                "user {} appears in both tables",
                dup
            )));
        }

        let mut stacked = FeatureTable::new(self.index.iter().chain(other.index.iter()).copied());
        for (left, right) in self.columns.iter().zip(other.columns.iter()) {
            let values = stacked
                .index
                .iter()
                .map(|&u| match self.row_position(u) {
                    Some(p) => left.values[p],
                    None => other.row_position(u).and_then(|p| right.values[p]),
                })
                .collect();
            stacked.push_column(left.name.clone(), values)?;
        }
        Ok(stacked)
    }

    /// Write as CSV: `user_id` followed by every column; undefined cells are empty
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ComputeError> {
        let mut wtr = Writer::from_writer(writer);
        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push(INDEX_COLUMN.to_string());
        header.extend(self.columns.iter().map(|c| c.name.clone()));
        wtr.write_record(&header)?;

        for (row, user) in self.index.iter().enumerate() {
            let mut record = Vec::with_capacity(header.len());
            record.push(user.to_string());
            record.extend(
                self.columns
                    .iter()
                    .map(|c| c.values[row].map(|v| v.to_string()).unwrap_or_default()),
            );
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Read a CSV written by [`FeatureTable::write_csv`] or any export with a
    /// `user_id` column and numeric feature columns
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, ComputeError> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let index_col = headers
            .iter()
            .position(|h| h == INDEX_COLUMN)
            .ok_or_else(|| ComputeError::MissingColumn(INDEX_COLUMN.to_string()))?;

        let mut rows: Vec<(UserId, Vec<Option<f64>>)> = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let raw_user = record.get(index_col).unwrap_or("");
            let user = raw_user
                .parse::<UserId>()
                .or_else(|_| raw_user.parse::<f64>().map(|v| v as UserId))
                .map_err(|_| {
                    ComputeError::ParseError(format!(
                        "line {}: invalid user_id '{}'",
                        line + 2,
                        raw_user
                    ))
                })?;
            let values = record
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != index_col)
                .map(|(_, raw)| parse_cell(raw))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|raw| {
                    ComputeError::ParseError(format!("line {}: invalid value '{}'", line + 2, raw))
                })?;
            rows.push((user, values));
        }

        let table = FeatureTable::new(rows.iter().map(|(u, _)| *u));
        if table.n_rows() != rows.len() {
            return Err(ComputeError::IndexMismatch(
                "duplicate user_id rows in CSV".to_string(),
            ));
        }
        rows.sort_by_key(|(u, _)| *u);

        let mut table = table;
        let names: Vec<&str> = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != index_col)
            .map(|(_, h)| h)
            .collect();
        for (col, name) in names.iter().enumerate() {
            let values = rows
                .iter()
                .map(|(_, r)| r.get(col).copied().flatten())
                .collect();
            table.push_column(*name, values)?;
        }
        Ok(table)
    }
}

fn parse_cell(raw: &str) -> Result<Option<f64>, String> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    match raw {
        "True" | "true" => Ok(Some(1.0)),
        "False" | "false" => Ok(Some(0.0)),
        _ => raw.parse::<f64>().map(Some).map_err(|_| raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> FeatureTable {
        let mut t = FeatureTable::new([3, 1, 2, 1]);
        t.push_column("a", vec![Some(1.0), None, Some(3.0)]).unwrap();
        t
    }

    #[test]
    fn test_index_sorted_unique() {
        let t = sample();
        assert_eq!(t.index(), &[1, 2, 3]);
        assert_eq!(t.get(2, "a"), None);
        assert_eq!(t.get(3, "a"), Some(3.0));
    }

    #[test]
    fn test_push_column_length_checked() {
        let mut t = sample();
        assert!(t.push_column("b", vec![Some(1.0)]).is_err());
        assert!(matches!(
            t.push_column("a", vec![None, None, None]),
            Err(ComputeError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn test_left_join_keeps_left_rows() {
        let left = sample();
        let mut right = FeatureTable::new([1, 3, 9]);
        right.push_column("b", vec![Some(10.0), Some(30.0), Some(90.0)]).unwrap();

        let joined = left.left_join(&right).unwrap();
        assert_eq!(joined.n_rows(), 3);
        assert_eq!(joined.column("b").unwrap(), &[Some(10.0), None, Some(30.0)]);
    }

    #[test]
    fn test_concat_requires_same_index() {
        let left = sample();
        let mut other = FeatureTable::new([1, 2]);
        other.push_column("b", vec![None, None]).unwrap();
        assert!(matches!(
            left.concat(other),
            Err(ComputeError::IndexMismatch(_))
        ));
    }

    #[test]
    fn test_select_and_drop_columns() {
        let mut t = sample();
        t.push_column("b", vec![None, None, None]).unwrap();
        let selected = t.select_columns(&["b"]).unwrap();
        assert_eq!(selected.column_names().collect::<Vec<_>>(), vec!["b"]);
        assert!(t.select_columns(&["nope"]).is_err());

        t.drop_columns(&["a", "not_there"]);
        assert_eq!(t.column_names().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_select_users_requires_presence() {
        let t = sample();
        let sub = t.select_users([3, 1]).unwrap();
        assert_eq!(sub.index(), &[1, 3]);
        assert_eq!(sub.column("a").unwrap(), &[Some(1.0), Some(3.0)]);
        assert!(t.select_users([4]).is_err());
    }

    #[test]
    fn test_fill_missing_with_means() {
        let mut t = sample();
        t.fill_missing_with_means();
        assert_eq!(t.get(2, "a"), Some(2.0));
    }

    #[test]
    fn test_append_rows_rejects_overlap() {
        let t = sample();
        let mut other = FeatureTable::new([4]);
        other.push_column("a", vec![Some(4.0)]).unwrap();
        let stacked = t.clone().append_rows(other).unwrap();
        assert_eq!(stacked.index(), &[1, 2, 3, 4]);
        assert_eq!(stacked.get(4, "a"), Some(4.0));

        let mut overlap = FeatureTable::new([1]);
        overlap.push_column("a", vec![Some(0.0)]).unwrap();
        assert!(t.append_rows(overlap).is_err());
    }

    #[test]
    fn test_csv_round_trip() {
        let mut t = sample();
        t.push_column("ratio", vec![Some(0.1), Some(-1.0), Some(1.0 / 3.0)])
            .unwrap();
        let mut buf = Vec::new();
        t.write_csv(&mut buf).unwrap();

        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("user_id,a,ratio\n1,1,0.1\n2,,-1\n"));

        let parsed = FeatureTable::read_csv(buf.as_slice()).unwrap();
        assert_eq!(parsed, t);
    }
}
