use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

pub use axum::response::{Html, IntoResponse, Json, Response};

use crate::db::{self, is_system_column, ColumnKind, DbError, DbPool, Row, TableName, SYSTEM_COLUMNS};
use crate::editor::{EditorSession, TableSession};
use crate::errors::{EditorError, EditorResult};
use crate::Site;

pub const SESSION_COOKIE: &str = "editor_session";

type SharedSession = Arc<tokio::sync::Mutex<EditorSession>>;

pub const SAVED_MESSAGE: &str = "Changes saved successfully!";

const INSTRUCTIONS: &str = "Expand a table to edit its data. Add, edit, or delete rows, then click \
'Save Changes' to upsert or delete data using the table's primary key(s). Timestamps (CreatedAt \
and UpdatedAt) are automatically set to the current time on save and are not editable.";

pub fn router() -> axum::Router<Site> {
    axum::Router::new()
        .route("/", get(index))
        .route("/api/tables", get(list_tables))
        .route("/api/tables/{table}", get(load_table))
        .route("/api/tables/{table}/edits", put(update_edits))
        .route("/api/tables/{table}/save", post(save_table))
        .route("/api/tables/{table}/reload", post(reload_table))
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TableSummary {
    pub name: String,
    pub qualified_name: String,
    pub editable: bool,
    pub primary_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ColumnView<'a> {
    pub name: &'a str,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub readonly: bool,
}

#[derive(Debug, Serialize)]
pub struct TablePayload<'a> {
    pub name: &'a str,
    pub qualified_name: String,
    pub editable: bool,
    pub primary_keys: &'a [String],
    pub columns: Vec<ColumnView<'a>>,
    pub rows: &'a [Row],
    pub loaded_at: Option<DateTime<Utc>>,
    pub dirty: bool,
}

impl<'a> TablePayload<'a> {
    fn new(table: &'a TableSession) -> Self {
        let descriptor = table.descriptor();
        let editable = descriptor.is_editable();
        let columns = descriptor
            .columns
            .iter()
            .map(|c| ColumnView {
                name: &c.name,
                kind: c.kind,
                nullable: c.nullable,
                readonly: !editable || is_system_column(&c.name),
            })
            .collect();
        let snapshot = table.snapshot();
        Self {
            name: &descriptor.name.table,
            qualified_name: descriptor.name.to_string(),
            editable,
            primary_keys: &descriptor.primary_keys,
            columns,
            rows: snapshot.map(|s| s.rows.as_slice()).unwrap_or(&[]),
            loaded_at: snapshot.map(|s| s.loaded_at),
            dirty: table.is_dirty(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EditsRequest {
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EditsResponse {
    pub dirty: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SaveResponse {
    pub message: String,
    pub upserts: usize,
    pub deletes: usize,
    pub affected: u64,
}

/// Finds or starts the caller's editor session, issuing the cookie if
/// the browser does not have one yet.
fn editor_session(site: &Site, jar: CookieJar) -> (CookieJar, SharedSession) {
    let known = jar
        .get(SESSION_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value()).ok());
    let (jar, id) = match known {
        Some(id) => (jar, id),
        None => {
            let id = Uuid::new_v4();
            let cookie = Cookie::build((SESSION_COOKIE, id.to_string()))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .build();
            (jar.add(cookie), id)
        }
    };
    (jar, site.sessions().get_or_create(id))
}

fn table_name(site: &Site, table: &str) -> TableName {
    let conf = site.conf();
    TableName::new(&conf.catalog, &conf.schema, table)
}

async fn describe(db: DbPool<'_>, name: &TableName) -> EditorResult<crate::db::TableDescriptor> {
    db::describe_table(db, name).await.map_err(|e| match e {
        DbError::DoesNotExist => EditorError::NotFound(name.table.clone()),
        other => EditorError::load(&name.table, other),
    })
}

/// The page shell with the table list rendered in. A failure to list is
/// shown on the page instead of failing the request.
async fn index(State(site): State<Site>, headers: HeaderMap) -> Response {
    let conf = site.conf();
    let (tables, error) = match table_summaries(&site, &headers).await {
        Ok(tables) => (tables, None),
        Err(err) => {
            tracing::warn!("{}", err);
            (Vec::new(), Some(err.to_string()))
        }
    };
    let context = json!({
        "title": conf.title,
        "catalog": conf.catalog,
        "schema": conf.schema,
        "instructions": INSTRUCTIONS,
        "system_columns": SYSTEM_COLUMNS,
        "tables": tables,
        "error": error,
        "api": { "tables": "/api/tables" },
    });
    match site.render_template("index.html", &context) {
        Ok(body) => Html(body).into_response(),
        Err(e) => {
            tracing::error!("Failed to render index: {}", e);
            EditorError::Config(e.to_string()).into_response()
        }
    }
}

async fn list_tables(
    State(site): State<Site>,
    headers: HeaderMap,
) -> EditorResult<Json<Vec<TableSummary>>> {
    table_summaries(&site, &headers).await.map(Json)
}

/// Every table of the schema with its editability. A table whose key
/// lookup fails is listed with the error; the others are unaffected.
async fn table_summaries(site: &Site, headers: &HeaderMap) -> EditorResult<Vec<TableSummary>> {
    let credential = site.connector().resolve(headers)?;
    let pool = site.connector().pool(&credential);
    let db = DbPool::new(&pool);
    let conf = site.conf();

    let names = db::list_tables(db, &conf.catalog, &conf.schema)
        .await
        .map_err(|e| EditorError::load(format!("{}.{}", conf.catalog, conf.schema), e))?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let keys = db::primary_key_columns(db, &name.catalog, &name.schema, &name.table).await;
        let summary = match keys {
            Ok(primary_keys) if primary_keys.is_empty() => {
                let err = EditorError::Metadata(name.table.clone());
                tracing::warn!(table = %name, "{}", err);
                TableSummary {
                    qualified_name: name.to_string(),
                    name: name.table,
                    editable: false,
                    primary_keys,
                    error: Some(err.to_string()),
                }
            }
            Ok(primary_keys) => TableSummary {
                qualified_name: name.to_string(),
                name: name.table,
                editable: true,
                primary_keys,
                error: None,
            },
            Err(e) => {
                let err = EditorError::load(&name.table, e);
                tracing::warn!(table = %name, "{}", err);
                TableSummary {
                    qualified_name: name.to_string(),
                    name: name.table,
                    editable: false,
                    primary_keys: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        };
        tables.push(summary);
    }

    Ok(tables)
}

/// Loads the table fresh from the store and starts a new edit cycle.
async fn load_table(
    State(site): State<Site>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(table): Path<String>,
) -> (CookieJar, EditorResult<Response>) {
    let (jar, session) = editor_session(&site, jar);
    (jar, load_into(&site, &headers, &session, &table).await)
}

async fn load_into(
    site: &Site,
    headers: &HeaderMap,
    session: &SharedSession,
    table: &str,
) -> EditorResult<Response> {
    let credential = site.connector().resolve(headers)?;
    let pool = site.connector().pool(&credential);
    let db = DbPool::new(&pool);

    let descriptor = describe(db, &table_name(site, table)).await?;

    let mut session = session.lock().await;
    let table = session.open(descriptor);
    table.reload(db).await?;

    Ok(Json(TablePayload::new(table)).into_response())
}

async fn update_edits(
    State(site): State<Site>,
    jar: CookieJar,
    Path(table): Path<String>,
    Json(request): Json<EditsRequest>,
) -> (CookieJar, EditorResult<Json<EditsResponse>>) {
    let (jar, session) = editor_session(&site, jar);
    let mut session = session.lock().await;
    let result = match session.table_mut(&table) {
        Some(table_session) => table_session
            .rows_from_json(&request.rows)
            .and_then(|rows| table_session.set_edits(rows))
            .map(|dirty| Json(EditsResponse { dirty })),
        None => Err(EditorError::Rejected(format!(
            "table {} must be loaded before it can be edited",
            table
        ))),
    };
    (jar, result)
}

async fn save_table(
    State(site): State<Site>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(table): Path<String>,
) -> (CookieJar, EditorResult<Json<SaveResponse>>) {
    let (jar, session) = editor_session(&site, jar);
    (jar, save_from(&site, &headers, &session, &table).await)
}

async fn save_from(
    site: &Site,
    headers: &HeaderMap,
    session: &SharedSession,
    table: &str,
) -> EditorResult<Json<SaveResponse>> {
    let credential = site.connector().resolve(headers)?;
    let pool = site.connector().pool(&credential);
    let db = DbPool::new(&pool);

    let mut session = session.lock().await;
    let table_session = session
        .table_mut(table)
        .ok_or_else(|| EditorError::NoChanges(table.to_string()))?;

    let outcome = table_session.save(db).await?;
    Ok(Json(SaveResponse {
        message: SAVED_MESSAGE.to_string(),
        upserts: outcome.upserts,
        deletes: outcome.deletes,
        affected: outcome.affected,
    }))
}

/// Drops pending edits and reloads from the store.
async fn reload_table(
    State(site): State<Site>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(table): Path<String>,
) -> (CookieJar, EditorResult<Response>) {
    load_table(State(site), jar, headers, Path(table)).await
}
