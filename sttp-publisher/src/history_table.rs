//! Read-only historical dataset driving the temporal subscriber: rows of
//! `(SignalID, Timestamp, Value)` sorted by timestamp and shared across
//! every temporal subscription. Loaded once at process start, never
//! mutated afterward — no lock required once built.

use serde::{Deserialize, Serialize};
use sttp_types::{SignalId, Ticks};
use tracing::info;

use crate::error::PublisherError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRow {
    pub signal_id: SignalId,
    pub timestamp: i64,
    pub value: f64,
}

#[derive(Debug)]
pub struct HistoryTable {
    rows: Vec<HistoryRow>,
}

impl HistoryTable {
    /// Builds a table from unsorted rows, sorting by timestamp ascending.
    /// Fails with [`PublisherError::NoHistoryAvailable`] if `rows` is empty.
    pub fn from_rows(mut rows: Vec<HistoryRow>) -> Result<Self, PublisherError> {
        if rows.is_empty() {
            return Err(PublisherError::NoHistoryAvailable);
        }
        rows.sort_by_key(|r| r.timestamp);
        Ok(HistoryTable { rows })
    }

    /// Loads a table from a JSON array of rows. The wire format is open per
    /// spec (XML, CSV, or binary are all valid); JSON is used here because
    /// it is the serialization this workspace already carries for its
    /// persisted state.
    pub fn load_json(path: &std::path::Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let rows: Vec<HistoryRow> = serde_json::from_str(&data)?;
        info!(rows = rows.len(), path = %path.display(), "loaded historical replay table");
        Ok(Self::from_rows(rows)?)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.rows.len() - 1
    }

    pub fn row(&self, index: usize) -> &HistoryRow {
        &self.rows[index]
    }

    pub fn timestamp_at(&self, index: usize) -> Ticks {
        Ticks::new(self.rows[index].timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn empty_rows_fail_with_no_history_available() {
        assert!(matches!(
            HistoryTable::from_rows(Vec::new()),
            Err(PublisherError::NoHistoryAvailable)
        ));
    }

    #[test]
    fn rows_are_sorted_by_timestamp() {
        let id = Uuid::new_v4();
        let table = HistoryTable::from_rows(vec![
            HistoryRow { signal_id: id, timestamp: 300, value: 3.0 },
            HistoryRow { signal_id: id, timestamp: 100, value: 1.0 },
            HistoryRow { signal_id: id, timestamp: 200, value: 2.0 },
        ])
        .unwrap();

        assert_eq!(table.row(0).timestamp, 100);
        assert_eq!(table.row(1).timestamp, 200);
        assert_eq!(table.row(2).timestamp, 300);
        assert_eq!(table.last_index(), 2);
    }
}
