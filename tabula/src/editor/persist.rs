use chrono::Utc;
use serde::Serialize;

use crate::db::{
    format_literal, quote_ident, DbPool, TableDescriptor, Value, CREATED_AT, UPDATED_AT,
};
use crate::editor::reconcile::ChangeSet;
use crate::errors::{EditorError, EditorResult};

/// Name of the source column that carries the upsert/delete tag.
pub const DELETE_FLAG: &str = "is_delete";

const MAX_IDENT_LEN: usize = 63;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PersistOutcome {
    pub upserts: usize,
    pub deletes: usize,
    pub affected: u64,
}

/// The three statements of one save, in execution order.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub view_name: String,
    pub create_view: String,
    pub merge: String,
    pub drop_view: String,
}

fn view_name(table: &str, stamp: i64) -> String {
    let prefix = format!("edit_{}_", stamp);
    let budget = MAX_IDENT_LEN.saturating_sub(prefix.len());
    let suffix: String = table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .take(budget)
        .collect();
    prefix + &suffix
}

impl MergePlan {
    /// `stamp` tells concurrent saves apart; callers pass the current time
    /// in microseconds.
    pub fn build(table: &TableDescriptor, changes: &ChangeSet, stamp: i64) -> Self {
        debug_assert!(table.is_editable(), "merge needs a primary key");

        let view_name = view_name(&table.name.table, stamp);
        let view = quote_ident(&view_name);
        let flag = quote_ident(DELETE_FLAG);
        let source: Vec<_> = table.source_columns().collect();

        let values = changes
            .rows
            .iter()
            .map(|change| {
                let mut cells: Vec<String> = source
                    .iter()
                    .map(|column| {
                        let value = change.row.get(&column.name).unwrap_or(&Value::Null);
                        format!("CAST({} AS {})", format_literal(value), column.sql_type)
                    })
                    .collect();
                cells.push(format_literal(&Value::Bool(change.is_delete)));
                format!("({})", cells.join(", "))
            })
            .collect::<Vec<_>>()
            .join(",\n  ");

        let mut view_columns: Vec<String> = source.iter().map(|c| quote_ident(&c.name)).collect();
        view_columns.push(flag.clone());

        let create_view = format!(
            "CREATE TEMPORARY VIEW {view} AS\nSELECT * FROM (VALUES\n  {values}\n) AS s ({columns})",
            columns = view_columns.join(", "),
        );

        let on_clause = table
            .primary_keys
            .iter()
            .map(|pk| {
                let pk = quote_ident(pk);
                format!("t.{pk} = s.{pk}")
            })
            .collect::<Vec<_>>()
            .join(" AND ");

        let mut update_set: Vec<String> = source
            .iter()
            .filter(|c| !table.is_primary_key(&c.name))
            .map(|c| {
                let col = quote_ident(&c.name);
                format!("{col} = s.{col}")
            })
            .collect();
        if table.has_column(UPDATED_AT) {
            update_set.push(format!("{} = CURRENT_TIMESTAMP", quote_ident(UPDATED_AT)));
        }
        let update_action = if update_set.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("UPDATE SET {}", update_set.join(", "))
        };

        let insert_columns: Vec<String> = table.column_names().map(quote_ident).collect();
        let insert_values: Vec<String> = table
            .column_names()
            .map(|name| {
                if name == CREATED_AT || name == UPDATED_AT {
                    "CURRENT_TIMESTAMP".to_string()
                } else {
                    format!("s.{}", quote_ident(name))
                }
            })
            .collect();

        let merge = format!(
            "MERGE INTO {target} AS t\n\
             USING {view} AS s\n\
             ON {on_clause}\n\
             WHEN MATCHED AND s.{flag} = TRUE THEN DELETE\n\
             WHEN MATCHED AND s.{flag} = FALSE THEN {update_action}\n\
             WHEN NOT MATCHED AND s.{flag} = FALSE THEN INSERT ({insert_columns}) VALUES ({insert_values})",
            target = table.name.quoted(),
            insert_columns = insert_columns.join(", "),
            insert_values = insert_values.join(", "),
        );

        let drop_view = format!("DROP VIEW {view}");

        Self {
            view_name,
            create_view,
            merge,
            drop_view,
        }
    }
}

/// Applies `changes` to `table` as one transaction: temporary view, merge,
/// drop. Any failure rolls the whole save back.
pub async fn persist(
    db: DbPool<'_>,
    table: &TableDescriptor,
    changes: &ChangeSet,
) -> EditorResult<PersistOutcome> {
    if !table.is_editable() {
        return Err(EditorError::Metadata(table.name.table.clone()));
    }

    let mut outcome = PersistOutcome {
        upserts: changes.upsert_count(),
        deletes: changes.delete_count(),
        affected: 0,
    };
    if changes.is_empty() {
        return Ok(outcome);
    }

    let plan = MergePlan::build(table, changes, Utc::now().timestamp_micros());
    tracing::debug!(
        table = %table.name,
        view = %plan.view_name,
        rows = changes.rows.len(),
        sql_bytes = plan.create_view.len() + plan.merge.len(),
        "executing merge"
    );

    let fail = |e| EditorError::persistence(&table.name, e);

    // Dropping the transaction without commit rolls it back.
    let mut tx = db.begin().await.map_err(fail)?;
    tx.execute(&plan.create_view).await.map_err(fail)?;
    outcome.affected = tx.execute(&plan.merge).await.map_err(fail)?;
    tx.execute(&plan.drop_view).await.map_err(fail)?;
    tx.commit().await.map_err(fail)?;

    tracing::info!(
        table = %table.name,
        upserts = outcome.upserts,
        deletes = outcome.deletes,
        affected = outcome.affected,
        "changes saved"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog::tests::{column, users_table};
    use crate::db::{ColumnKind, Row};
    use crate::editor::reconcile::reconcile;

    fn row(id: i64, name: &str) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), Value::Int(id));
        row.insert("name".into(), Value::Text(name.into()));
        row
    }

    fn users_plan() -> MergePlan {
        let snapshot = vec![row(1, "A"), row(2, "B")];
        let edited = vec![row(1, "A2"), row(3, "O'Brien")];
        let changes = reconcile(&snapshot, &edited, &["id".to_string()]);
        MergePlan::build(&users_table(), &changes, 1_700_000_000_000_000)
    }

    #[test]
    fn view_holds_tagged_rows_without_system_columns() {
        let plan = users_plan();
        assert_eq!(plan.view_name, "edit_1700000000000000_users");
        assert!(plan
            .create_view
            .starts_with("CREATE TEMPORARY VIEW \"edit_1700000000000000_users\" AS"));
        assert!(plan.create_view.contains(
            "(CAST(1 AS \"pg_catalog\".\"int4\"), CAST('A2' AS \"pg_catalog\".\"text\"), FALSE)"
        ));
        assert!(plan.create_view.contains("CAST('O''Brien' AS \"pg_catalog\".\"text\"), FALSE)"));
        assert!(plan.create_view.contains(
            "(CAST(2 AS \"pg_catalog\".\"int4\"), CAST(NULL AS \"pg_catalog\".\"text\"), TRUE)"
        ));
        assert!(plan.create_view.ends_with("AS s (\"id\", \"name\", \"is_delete\")"));
        assert!(!plan.create_view.contains("CreatedAt"));
    }

    #[test]
    fn merge_matches_on_key_and_stamps_times() {
        let plan = users_plan();
        assert!(plan.merge.starts_with(
            "MERGE INTO \"main\".\"configurations\".\"users\" AS t\nUSING \"edit_1700000000000000_users\" AS s"
        ));
        assert!(plan.merge.contains("ON t.\"id\" = s.\"id\"\n"));
        assert!(plan
            .merge
            .contains("WHEN MATCHED AND s.\"is_delete\" = TRUE THEN DELETE"));
        assert!(plan.merge.contains(
            "THEN UPDATE SET \"name\" = s.\"name\", \"UpdatedAt\" = CURRENT_TIMESTAMP"
        ));
        assert!(plan.merge.contains(
            "INSERT (\"id\", \"name\", \"CreatedAt\", \"UpdatedAt\") VALUES (s.\"id\", s.\"name\", CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)"
        ));
        assert!(!plan.merge.contains("WHEN NOT MATCHED AND s.\"is_delete\" = TRUE"));
        assert_eq!(plan.drop_view, "DROP VIEW \"edit_1700000000000000_users\"");
    }

    #[test]
    fn composite_keys_join_with_and() {
        let mut table = users_table();
        table.columns.insert(0, column("region", ColumnKind::Text, "text"));
        table.primary_keys = vec!["region".into(), "id".into()];
        let plan = MergePlan::build(&table, &ChangeSet::default(), 1);
        assert!(plan
            .merge
            .contains("ON t.\"region\" = s.\"region\" AND t.\"id\" = s.\"id\"\n"));
        assert!(!plan.merge.contains("\"region\" = s.\"region\","));
    }

    #[test]
    fn key_only_table_without_timestamps_does_nothing_on_match() {
        let mut table = users_table();
        table.columns.retain(|c| c.name == "id");
        let changes = reconcile(&[], &[row(1, "x")], &["id".to_string()]);
        let plan = MergePlan::build(&table, &changes, 1);
        assert!(plan.merge.contains("= FALSE THEN DO NOTHING"));
        assert!(plan.merge.contains("INSERT (\"id\") VALUES (s.\"id\")"));
    }

    #[test]
    fn text_and_timestamp_keys_with_exact_numerics() {
        use crate::db::{row_from_json, TableName};

        let table = TableDescriptor {
            name: TableName::new("main", "configurations", "prices"),
            columns: vec![
                column("code", ColumnKind::Text, "text"),
                column("effective_at", ColumnKind::Timestamp, "timestamptz"),
                column("amount", ColumnKind::Decimal, "numeric"),
            ],
            primary_keys: vec!["code".into(), "effective_at".into()],
        };
        let parse = |json: &str| {
            let object: serde_json::Value = serde_json::from_str(json).unwrap();
            row_from_json(&table, &object).unwrap()
        };
        let snapshot = vec![
            parse(r#"{"code": "A'1", "effective_at": "2024-01-01T00:00:00+00:00", "amount": 10.50}"#),
            parse(r#"{"code": "B", "effective_at": "2024-01-01T00:00:00+00:00", "amount": 1}"#),
        ];
        let edited = vec![parse(
            r#"{"code": "A'1", "effective_at": 1704067200000, "amount": 12345678901234567.89}"#,
        )];

        let changes = reconcile(&snapshot, &edited, &table.primary_keys);
        assert_eq!((changes.upsert_count(), changes.delete_count()), (1, 1));

        let plan = MergePlan::build(&table, &changes, 1);
        assert!(plan.create_view.contains(
            "(CAST('A''1' AS \"pg_catalog\".\"text\"), \
             CAST('2024-01-01T00:00:00.000000Z' AS \"pg_catalog\".\"timestamptz\"), \
             CAST(12345678901234567.89 AS \"pg_catalog\".\"numeric\"), FALSE)"
        ));
        assert!(plan.create_view.contains(
            "(CAST('B' AS \"pg_catalog\".\"text\"), \
             CAST('2024-01-01T00:00:00.000000Z' AS \"pg_catalog\".\"timestamptz\"), \
             CAST(NULL AS \"pg_catalog\".\"numeric\"), TRUE)"
        ));
        assert!(plan.merge.contains(
            "ON t.\"code\" = s.\"code\" AND t.\"effective_at\" = s.\"effective_at\"\n"
        ));
        assert!(plan.merge.contains("UPDATE SET \"amount\" = s.\"amount\"\n"));
    }

    #[test]
    fn long_table_names_fit_identifier_limit() {
        let name = view_name(&"x".repeat(200), 1_700_000_000_000_000);
        assert_eq!(name.len(), MAX_IDENT_LEN);
        assert!(name.starts_with("edit_1700000000000000_x"));
        assert_eq!(view_name("Feature Flags", 7), "edit_7_feature_flags");
    }
}
