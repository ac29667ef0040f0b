use std::collections::HashSet;

use crate::db::{is_system_column, Row, Value};

/// Values of the primary-key columns of one row, in key order.
pub type KeyTuple = Vec<Value>;

pub fn key_of(row: &Row, primary_keys: &[String]) -> KeyTuple {
    primary_keys
        .iter()
        .map(|pk| row.get(pk).cloned().unwrap_or(Value::Null))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRow {
    pub row: Row,
    pub is_delete: bool,
}

/// Upserts followed by deletes. Delete rows carry only key values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub rows: Vec<ChangeRow>,
}

impl ChangeSet {
    pub fn upserts(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().filter(|c| !c.is_delete).map(|c| &c.row)
    }

    pub fn deletes(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().filter(|c| c.is_delete).map(|c| &c.row)
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts().count()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rejects upserts the merge could not apply: a null key column, or two
    /// rows claiming the same key.
    pub fn validate_keys(&self, primary_keys: &[String]) -> Result<(), String> {
        let mut seen = HashSet::new();
        for row in self.upserts() {
            let key = key_of(row, primary_keys);
            if key.iter().any(Value::is_null) {
                return Err(format!(
                    "primary key ({}) must not be empty",
                    primary_keys.join(", ")
                ));
            }
            if !seen.insert(key) {
                return Err(format!(
                    "duplicate primary key ({}) in edited rows",
                    primary_keys.join(", ")
                ));
            }
        }
        Ok(())
    }
}

/// Diffs the edited rows against the snapshot on primary key.
///
/// Every edited row becomes an upsert; the store decides insert vs update
/// by whether the key matches. Snapshot rows whose key vanished from the
/// edited set become deletes. `primary_keys` must not be empty.
pub fn reconcile(snapshot: &[Row], edited: &[Row], primary_keys: &[String]) -> ChangeSet {
    debug_assert!(!primary_keys.is_empty(), "reconcile needs a primary key");

    let edited_keys: HashSet<KeyTuple> = edited.iter().map(|r| key_of(r, primary_keys)).collect();

    let mut deleted_keys: HashSet<KeyTuple> = HashSet::new();
    let deletes: Vec<ChangeRow> = snapshot
        .iter()
        .filter_map(|row| {
            let key = key_of(row, primary_keys);
            if edited_keys.contains(&key) || !deleted_keys.insert(key) {
                return None;
            }
            let mut row = row.clone();
            for (column, value) in row.iter_mut() {
                if !primary_keys.contains(column) {
                    *value = Value::Null;
                }
            }
            Some(ChangeRow {
                row,
                is_delete: true,
            })
        })
        .collect();

    let mut rows: Vec<ChangeRow> = edited
        .iter()
        .map(|row| ChangeRow {
            row: row.clone(),
            is_delete: false,
        })
        .collect();
    rows.extend(deletes);

    ChangeSet { rows }
}

/// True when the edited rows differ from the snapshot, ignoring the
/// store-managed timestamp columns.
pub fn has_changes(snapshot: &[Row], edited: &[Row]) -> bool {
    if snapshot.len() != edited.len() {
        return true;
    }
    snapshot.iter().zip(edited).any(|(before, after)| {
        let visible = |row: &Row| -> Vec<(String, Value)> {
            row.iter()
                .filter(|(column, _)| !is_system_column(column))
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect()
        };
        visible(before) != visible(after)
    })
}
