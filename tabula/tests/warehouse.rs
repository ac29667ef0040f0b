// End-to-end edit cycles against a live Postgres (15+, for MERGE).
// Skipped unless TABULA_TEST_DATABASE_URL points at a scratch database.

use sqlx::PgPool;
use tabula::db::{self, DbPool, Row, TableName, Value, CREATED_AT, UPDATED_AT};
use tabula::editor::TableSession;
use tabula::EditorError;

const DATABASE_URL: &str = "TABULA_TEST_DATABASE_URL";

struct Scratch {
    pool: PgPool,
    catalog: String,
    schema: String,
}

impl Scratch {
    async fn open() -> Option<Self> {
        let url = std::env::var(DATABASE_URL).ok()?;
        let pool = PgPool::connect(&url).await.expect("Failed to connect");
        let catalog: String = sqlx::query_scalar("SELECT current_database()::text")
            .fetch_one(&pool)
            .await
            .unwrap();
        let schema = format!("tabula_{}", uuid::Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA \"{}\"", schema))
            .execute(&pool)
            .await
            .unwrap();
        Some(Self {
            pool,
            catalog,
            schema,
        })
    }

    async fn run(&self, sql: &str) {
        let sql = sql.replace("{schema}", &format!("\"{}\"", self.schema));
        sqlx::raw_sql(&sql).execute(&self.pool).await.unwrap();
    }

    fn name(&self, table: &str) -> TableName {
        TableName::new(&self.catalog, &self.schema, table)
    }

    async fn close(self) {
        self.run("DROP SCHEMA {schema} CASCADE").await;
    }
}

fn sorted_by_id(rows: &[Row]) -> Vec<Row> {
    let mut rows = rows.to_vec();
    rows.sort_by_key(|r| match r["id"] {
        Value::Int(id) => id,
        _ => i64::MAX,
    });
    rows
}

#[tokio::test]
async fn test_users_edit_cycle() {
    let Some(scratch) = Scratch::open().await else {
        return;
    };
    scratch
        .run(
            r#"CREATE TABLE {schema}.users (
                id integer PRIMARY KEY,
                name text,
                "CreatedAt" timestamptz,
                "UpdatedAt" timestamptz
            );
            INSERT INTO {schema}.users (id, name, "CreatedAt", "UpdatedAt")
            VALUES (1, 'A', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z'),
                   (2, 'B', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');"#,
        )
        .await;

    let db = DbPool::new(&scratch.pool);
    let names = db::list_tables(db, &scratch.catalog, &scratch.schema)
        .await
        .unwrap();
    assert_eq!(names, vec![scratch.name("users")]);

    let descriptor = db::describe_table(db, &scratch.name("users")).await.unwrap();
    assert_eq!(descriptor.primary_keys, vec!["id".to_string()]);

    let mut table = TableSession::new(descriptor);
    let snapshot = table.reload(db).await.unwrap();
    let before = sorted_by_id(&snapshot.rows);
    assert_eq!(before.len(), 2);

    let mut edited_one = before[0].clone();
    edited_one.insert("name".into(), Value::Text("O'Brien".into()));
    let mut added = Row::new();
    added.insert("id".into(), Value::Int(3));
    added.insert("name".into(), Value::Text("C".into()));
    added.insert(CREATED_AT.into(), Value::Null);
    added.insert(UPDATED_AT.into(), Value::Null);

    assert!(table.set_edits(vec![edited_one, added]).unwrap());
    let outcome = table.save(db).await.unwrap();
    assert_eq!((outcome.upserts, outcome.deletes), (2, 1));
    assert_eq!(outcome.affected, 3);

    let after = sorted_by_id(&table.snapshot().unwrap().rows);
    assert!(!table.is_dirty());
    assert_eq!(after.len(), 2);
    assert_eq!(after[0]["name"], Value::Text("O'Brien".into()));
    assert_eq!(after[0][CREATED_AT], before[0][CREATED_AT]);
    assert_ne!(after[0][UPDATED_AT], before[0][UPDATED_AT]);
    assert_eq!(after[1]["id"], Value::Int(3));
    assert!(!after[1][CREATED_AT].is_null());
    assert!(!after[1][UPDATED_AT].is_null());

    scratch.close().await;
}

#[tokio::test]
async fn test_table_without_key_is_read_only() {
    let Some(scratch) = Scratch::open().await else {
        return;
    };
    scratch
        .run("CREATE TABLE {schema}.audit (entry text); INSERT INTO {schema}.audit VALUES ('x');")
        .await;

    let db = DbPool::new(&scratch.pool);
    let descriptor = db::describe_table(db, &scratch.name("audit")).await.unwrap();
    assert!(!descriptor.is_editable());

    let mut table = TableSession::new(descriptor);
    assert_eq!(table.reload(db).await.unwrap().len(), 1);
    table.set_edits(vec![]).unwrap();
    let err = table.save(db).await.unwrap_err();
    assert!(matches!(err, EditorError::Metadata(_)));

    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT count(*) FROM \"{}\".audit",
        scratch.schema
    ))
    .fetch_one(&scratch.pool)
    .await
    .unwrap();
    assert_eq!(count, 1);

    scratch.close().await;
}

#[tokio::test]
async fn test_failed_merge_keeps_pending_edits() {
    let Some(scratch) = Scratch::open().await else {
        return;
    };
    scratch
        .run(
            r#"CREATE TABLE {schema}.flags (
                id integer PRIMARY KEY,
                name text NOT NULL
            );
            INSERT INTO {schema}.flags VALUES (1, 'on');"#,
        )
        .await;

    let db = DbPool::new(&scratch.pool);
    let descriptor = db::describe_table(db, &scratch.name("flags")).await.unwrap();
    let mut table = TableSession::new(descriptor);
    table.reload(db).await.unwrap();

    let mut row = Row::new();
    row.insert("id".into(), Value::Int(1));
    row.insert("name".into(), Value::Null);
    table.set_edits(vec![row]).unwrap();

    let err = table.save(db).await.unwrap_err();
    assert!(matches!(err, EditorError::Persistence { .. }));
    assert!(
        err.to_string()
            .starts_with("Error saving changes: not-null violation")
    );
    assert!(table.is_dirty());
    assert_eq!(table.pending_edits().map(<[Row]>::len), Some(1));

    let name: String = sqlx::query_scalar(&format!(
        "SELECT name FROM \"{}\".flags WHERE id = 1",
        scratch.schema
    ))
    .fetch_one(&scratch.pool)
    .await
    .unwrap();
    assert_eq!(name, "on");

    scratch.close().await;
}

#[tokio::test]
async fn test_delete_of_row_removed_elsewhere_is_a_no_op() {
    let Some(scratch) = Scratch::open().await else {
        return;
    };
    scratch
        .run(
            r#"CREATE TABLE {schema}.users (id integer PRIMARY KEY, name text);
            INSERT INTO {schema}.users VALUES (1, 'A'), (2, 'B');"#,
        )
        .await;

    let db = DbPool::new(&scratch.pool);
    let descriptor = db::describe_table(db, &scratch.name("users")).await.unwrap();
    let mut table = TableSession::new(descriptor);
    let snapshot = table.reload(db).await.unwrap();
    let keep: Vec<Row> = sorted_by_id(&snapshot.rows).into_iter().take(1).collect();

    // Another editor removes row 2 before this session saves.
    scratch.run("DELETE FROM {schema}.users WHERE id = 2").await;

    assert!(table.set_edits(keep).unwrap());
    let outcome = table.save(db).await.unwrap();
    assert_eq!((outcome.upserts, outcome.deletes), (1, 1));
    assert_eq!(outcome.affected, 1);

    let after = sorted_by_id(&table.snapshot().unwrap().rows);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0]["name"], Value::Text("A".into()));

    scratch.close().await;
}

#[tokio::test]
async fn test_empty_edits_delete_every_row() {
    let Some(scratch) = Scratch::open().await else {
        return;
    };
    scratch
        .run(
            r#"CREATE TABLE {schema}.users (id integer PRIMARY KEY, name text);
            INSERT INTO {schema}.users VALUES (1, 'A'), (2, 'B'), (3, 'C');"#,
        )
        .await;

    let db = DbPool::new(&scratch.pool);
    let descriptor = db::describe_table(db, &scratch.name("users")).await.unwrap();
    let mut table = TableSession::new(descriptor);
    table.reload(db).await.unwrap();

    assert!(table.set_edits(vec![]).unwrap());
    let outcome = table.save(db).await.unwrap();
    assert_eq!((outcome.upserts, outcome.deletes, outcome.affected), (0, 3, 3));
    assert!(table.snapshot().unwrap().is_empty());

    scratch.close().await;
}

#[tokio::test]
async fn test_exact_numerics_survive_an_unrelated_save() {
    let Some(scratch) = Scratch::open().await else {
        return;
    };
    scratch
        .run(
            r#"CREATE TABLE {schema}.prices (
                code text,
                effective_at timestamptz,
                amount numeric(20, 2),
                note text,
                PRIMARY KEY (code, effective_at)
            );
            INSERT INTO {schema}.prices VALUES
                ('A', '2024-01-01T00:00:00Z', 12345678901234567.89, 'x'),
                ('B', '2024-01-01T00:00:00Z', 0.10, 'y');"#,
        )
        .await;

    let db = DbPool::new(&scratch.pool);
    let descriptor = db::describe_table(db, &scratch.name("prices")).await.unwrap();
    let mut table = TableSession::new(descriptor);
    let mut edited = table.reload(db).await.unwrap().rows.clone();
    for row in edited.iter_mut() {
        if row["code"] == Value::Text("B".into()) {
            row.insert("note".into(), Value::Text("changed".into()));
        }
    }

    assert!(table.set_edits(edited).unwrap());
    let outcome = table.save(db).await.unwrap();
    assert_eq!((outcome.upserts, outcome.deletes), (2, 0));

    let amounts: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT amount::text FROM \"{}\".prices ORDER BY code",
        scratch.schema
    ))
    .fetch_all(&scratch.pool)
    .await
    .unwrap();
    assert_eq!(amounts, vec!["12345678901234567.89", "0.10"]);

    scratch.close().await;
}
