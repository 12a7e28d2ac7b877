//! Measurement rows and point-in-time snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// The mapping an experiment yields from `steps`: column name to scalar
/// value. Columns not supplied in a given emission are recorded as empty,
/// never inferred.
pub type RowValues = HashMap<String, Value>;

/// One recorded measurement: the emitted values augmented with the three
/// derived columns. Immutable once appended.
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    /// Elapsed seconds since run start (monotonic clock).
    pub t: f64,
    /// Absolute wall-clock timestamp of the emission.
    pub time: DateTime<Utc>,
    /// Elapsed seconds since the last sync mark, or since run start when no
    /// mark has been set.
    pub sync_t: f64,
    /// The emitted column values.
    pub values: RowValues,
}

impl Row {
    /// Look up an emitted cell by column name. Derived columns are accessed
    /// through their own fields.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Numeric view of an emitted cell.
    pub fn number(&self, column: &str) -> Option<f64> {
        self.values.get(column).and_then(Value::as_f64)
    }
}

/// An immutable, point-in-time ordered view of all rows recorded so far.
///
/// Snapshots share row storage structurally: cloning a snapshot, or taking a
/// new one, copies `Arc` pointers rather than row data, so readers on the
/// presentation side never contend with the recording side for more than the
/// time it takes to publish one row.
#[derive(Debug, Clone, Default)]
pub struct DataSnapshot {
    rows: Arc<Vec<Arc<Row>>>,
}

impl DataSnapshot {
    pub(crate) fn new(rows: Vec<Arc<Row>>) -> Self {
        Self {
            rows: Arc::new(rows),
        }
    }

    /// Number of rows in this snapshot.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows have been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over the rows in emission order.
    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().map(AsRef::as_ref)
    }

    /// The most recent row, if any.
    pub fn latest(&self) -> Option<&Row> {
        self.rows.last().map(AsRef::as_ref)
    }

    /// Extract `(t, value)` pairs for one numeric column, skipping rows where
    /// the column is missing or non-numeric. Convenient for plotting.
    pub fn series(&self, column: &str) -> Vec<(f64, f64)> {
        self.iter()
            .filter_map(|row| row.number(column).map(|v| (row.t, v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(t: f64, v: f64) -> Arc<Row> {
        let mut values = RowValues::new();
        values.insert("v".to_string(), json!(v));
        Arc::new(Row {
            t,
            time: Utc::now(),
            sync_t: t,
            values,
        })
    }

    #[test]
    fn series_skips_missing_cells() {
        let mut gap = RowValues::new();
        gap.insert("other".to_string(), json!("text"));
        let rows = vec![
            row(0.0, 1.0),
            Arc::new(Row {
                t: 1.0,
                time: Utc::now(),
                sync_t: 1.0,
                values: gap,
            }),
            row(2.0, 3.0),
        ];
        let snapshot = DataSnapshot::new(rows);

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.series("v"), vec![(0.0, 1.0), (2.0, 3.0)]);
    }

    #[test]
    fn snapshot_clone_is_shallow() {
        let snapshot = DataSnapshot::new(vec![row(0.0, 1.0)]);
        let copy = snapshot.clone();
        assert_eq!(copy.len(), 1);
        assert!(Arc::ptr_eq(&snapshot.rows, &copy.rows));
    }
}
