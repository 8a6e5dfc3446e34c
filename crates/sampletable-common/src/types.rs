//! Request and response types exchanged with a table service

use crate::error::{Error, Result};
use crate::value::{Cell, LocationKey, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Policy version partition filter.
///
/// A negative raw version matches every row; anything else matches exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionFilter {
    Any,
    Exact(i64),
}

impl VersionFilter {
    #[must_use]
    pub const fn from_raw(policy_version: i64) -> Self {
        if policy_version < 0 { Self::Any } else { Self::Exact(policy_version) }
    }

    #[must_use]
    pub const fn matches(&self, policy_version: i64) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => *v == policy_version,
        }
    }
}

/// Normalize an optional condition: blank strings mean "no condition"
#[must_use]
pub fn normalize_condition(condition: Option<String>) -> Option<String> {
    condition.filter(|c| !c.trim().is_empty())
}

/// Batch insert of rows, already expanded for rollouts.
///
/// `rows[i][j]` is the cell for `column_names[j]` of row `i`. A `None` cell
/// marks a value whose client-side blob write already failed: the row is
/// still inserted with that column unwritten.
///
/// When `rollout_n > 1` and `sample_ids` is `None`, `rows` holds `rollout_n`
/// consecutive copies of every logical sample; each group receives one
/// minted input id and trajectory ids `0..rollout_n`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsertRequest {
    pub policy_version: i64,
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Option<Cell>>>,
    pub sample_ids: Option<Vec<String>>,
    pub rollout_n: u32,
}

impl InsertRequest {
    /// Build a request from literal values, replicating each logical row
    /// `rollout_n` times when ids are to be minted.
    pub fn from_values(
        policy_version: i64,
        column_names: Vec<String>,
        sample_value: Vec<Vec<Value>>,
        sample_ids: Option<Vec<String>>,
        rollout_n: u32,
    ) -> Self {
        let copies = if sample_ids.is_none() { rollout_n.max(1) } else { 1 };
        let rows = sample_value
            .into_iter()
            .flat_map(|row| {
                let cells: Vec<Option<Cell>> = row.into_iter().map(|v| Some(Cell::Value(v))).collect();
                std::iter::repeat_n(cells, copies as usize)
            })
            .collect();
        Self {
            policy_version,
            column_names,
            rows,
            sample_ids,
            rollout_n,
        }
    }

    /// Structural checks that need no schema
    pub fn validate_shape(&self) -> Result<()> {
        if self.rollout_n == 0 {
            return Err(Error::invalid_argument("rollout_n must be at least 1"));
        }
        if self.column_names.is_empty() {
            return Err(Error::invalid_argument("no columns given"));
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.column_names.len() {
                return Err(Error::shape(format!(
                    "row {i} has {} values for {} columns",
                    row.len(),
                    self.column_names.len()
                )));
            }
        }
        match &self.sample_ids {
            Some(_) if self.rollout_n > 1 => Err(Error::invalid_argument(
                "rollout_n > 1 requires generated sample ids",
            )),
            Some(ids) if ids.len() != self.rows.len() => Err(Error::shape(format!(
                "{} sample ids for {} rows",
                ids.len(),
                self.rows.len()
            ))),
            None if self.rows.len() % self.rollout_n as usize != 0 => Err(Error::shape(format!(
                "{} rows is not a multiple of rollout_n {}",
                self.rows.len(),
                self.rollout_n
            ))),
            _ => Ok(()),
        }
    }
}

/// Filtered read of a column subset
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub policy_version: i64,
    pub column_names: Vec<String>,
    /// Maximum number of rows; `<= 0` returns every match
    pub batch_size: i64,
    pub condition: Option<String>,
}

impl RetrieveRequest {
    pub fn new(policy_version: i64, column_names: Vec<String>) -> Self {
        Self {
            policy_version,
            column_names,
            batch_size: -1,
            condition: None,
        }
    }

    #[must_use]
    pub const fn batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = normalize_condition(Some(condition.into()));
        self
    }

    #[must_use]
    pub const fn version_filter(&self) -> VersionFilter {
        VersionFilter::from_raw(self.policy_version)
    }

    /// Row limit, `None` when unbounded
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        usize::try_from(self.batch_size).ok().filter(|n| *n > 0)
    }
}

/// Column overwrite on existing rows.
///
/// `values[column][i]` belongs to `sample_ids[i]`; `None` marks a cell whose
/// client-side blob write failed and is left untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub sample_ids: Vec<String>,
    pub column_names: Vec<String>,
    pub values: HashMap<String, Vec<Option<Cell>>>,
}

impl WriteRequest {
    pub fn from_values(
        sample_ids: Vec<String>,
        column_names: Vec<String>,
        values: HashMap<String, Vec<Value>>,
    ) -> Self {
        let values = values
            .into_iter()
            .map(|(column, vals)| {
                let cells = vals.into_iter().map(|v| Some(Cell::Value(v))).collect();
                (column, cells)
            })
            .collect();
        Self {
            sample_ids,
            column_names,
            values,
        }
    }

    pub fn validate_shape(&self) -> Result<()> {
        if self.column_names.is_empty() {
            return Err(Error::invalid_argument("no columns given"));
        }
        for column in &self.column_names {
            let Some(cells) = self.values.get(column) else {
                return Err(Error::shape(format!("no values supplied for column {column}")));
            };
            if cells.len() != self.sample_ids.len() {
                return Err(Error::shape(format!(
                    "column {column} has {} values for {} samples",
                    cells.len(),
                    self.sample_ids.len()
                )));
            }
        }
        Ok(())
    }
}

/// Row selection for deletion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub policy_version: i64,
    pub condition: Option<String>,
}

impl DeleteRequest {
    pub fn new(policy_version: i64, condition: Option<String>) -> Self {
        Self {
            policy_version,
            condition: normalize_condition(condition),
        }
    }

    /// Reject the unfiltered form, which would wipe the whole table
    pub fn validate(&self) -> Result<()> {
        if self.policy_version <= 0 && self.condition.is_none() {
            return Err(Error::UnfilteredDelete);
        }
        Ok(())
    }

    /// Only a positive version narrows a delete; zero and below match every
    /// version, leaving the condition as the filter
    #[must_use]
    pub const fn version_filter(&self) -> VersionFilter {
        if self.policy_version > 0 {
            VersionFilter::Exact(self.policy_version)
        } else {
            VersionFilter::Any
        }
    }
}

/// Rows returned by a retrieve, column arrays aligned with `sample_ids`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch<T> {
    pub sample_ids: Vec<String>,
    pub columns: HashMap<String, Vec<T>>,
}

impl<T> SampleBatch<T> {
    #[must_use]
    pub fn empty(column_names: &[String]) -> Self {
        Self {
            sample_ids: Vec::new(),
            columns: column_names.iter().map(|c| (c.clone(), Vec::new())).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[T]> {
        self.columns.get(name).map(Vec::as_slice)
    }
}

/// Rows removed from metadata whose blob objects the caller must delete
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedSamples {
    pub sample_ids: Vec<String>,
    pub keys: Vec<LocationKey>,
    /// Candidate rows left in place because their condition values could
    /// not be read
    pub unreadable: u64,
}

/// Table statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub table_name: String,
    pub row_count: u64,
    pub rows_by_version: BTreeMap<i64, u64>,
    pub inserts: u64,
    pub retrieves: u64,
    pub writes: u64,
    pub deletes: u64,
    pub failed_cells: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_version_filter() {
        assert!(VersionFilter::from_raw(-1).matches(7));
        assert!(VersionFilter::from_raw(3).matches(3));
        assert!(!VersionFilter::from_raw(3).matches(4));
        assert_eq!(VersionFilter::from_raw(0), VersionFilter::Exact(0));
    }

    #[test]
    fn test_insert_from_values_replicates_rollouts() {
        let req = InsertRequest::from_values(
            1,
            cols(&["a"]),
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
            None,
            3,
        );
        assert_eq!(req.rows.len(), 6);
        assert_eq!(req.rows[2], vec![Some(Cell::Value(Value::Int(1)))]);
        assert_eq!(req.rows[3], vec![Some(Cell::Value(Value::Int(2)))]);
        req.validate_shape().unwrap();
    }

    #[test]
    fn test_insert_shape_checks() {
        let ragged = InsertRequest::from_values(1, cols(&["a", "b"]), vec![vec![Value::Int(1)]], None, 1);
        assert!(matches!(ragged.validate_shape(), Err(Error::ShapeMismatch(_))));

        let explicit_rollout = InsertRequest::from_values(
            1,
            cols(&["a"]),
            vec![vec![Value::Int(1)]],
            Some(vec!["x_0_0".into()]),
            2,
        );
        assert!(matches!(explicit_rollout.validate_shape(), Err(Error::InvalidArgument(_))));

        let short_ids = InsertRequest::from_values(
            1,
            cols(&["a"]),
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
            Some(vec!["x_0_0".into()]),
            1,
        );
        assert!(matches!(short_ids.validate_shape(), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_delete_requires_filter() {
        assert!(matches!(
            DeleteRequest::new(-1, Some("  ".into())).validate(),
            Err(Error::UnfilteredDelete)
        ));
        assert!(matches!(DeleteRequest::new(0, None).validate(), Err(Error::UnfilteredDelete)));
        assert!(DeleteRequest::new(2, None).validate().is_ok());
        assert!(DeleteRequest::new(-1, Some("reward > 0".into())).validate().is_ok());
    }

    #[test]
    fn test_delete_version_filter() {
        let by_condition = DeleteRequest::new(0, Some("reward == 0".into()));
        assert_eq!(by_condition.version_filter(), VersionFilter::Any);
        assert!(by_condition.version_filter().matches(1));
        assert!(by_condition.version_filter().matches(2));
        assert_eq!(DeleteRequest::new(-3, Some("reward == 0".into())).version_filter(), VersionFilter::Any);
        assert_eq!(DeleteRequest::new(4, None).version_filter(), VersionFilter::Exact(4));
    }

    #[test]
    fn test_retrieve_limit() {
        let req = RetrieveRequest::new(1, cols(&["a"]));
        assert_eq!(req.limit(), None);
        assert_eq!(req.clone().batch_size(0).limit(), None);
        assert_eq!(req.batch_size(5).limit(), Some(5));
    }

    #[test]
    fn test_write_shape_checks() {
        let mut values = HashMap::new();
        values.insert("a".to_string(), vec![Value::Int(1)]);
        let req = WriteRequest::from_values(vec!["x_0_0".into(), "y_0_0".into()], cols(&["a"]), values);
        assert!(matches!(req.validate_shape(), Err(Error::ShapeMismatch(_))));
    }
}
