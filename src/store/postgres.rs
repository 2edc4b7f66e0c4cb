//! # PostgreSQL Document Store
//!
//! JSONB-backed store using sqlx. Each row carries a `(seq_no, primary_term)`
//! pair; guarded writes compare it in the `WHERE` clause so a lost race shows
//! up as zero affected rows, which is reported as a conflict.
//!
//! Bulk submissions are split into chunks and run with bounded concurrency
//! (`futures::stream::buffer_unordered`); outcomes are gathered per
//! (location, id) in completion order.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info, warn};

use super::{
    BulkAction, BulkItemOutcome, BulkItemStatus, BulkOperation, DocumentStore, SearchQuery,
    SortOrder, StoreError, StoreResult, StoredDocument, VersionToken,
};
use crate::config::StoreConfig;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    location     TEXT   NOT NULL,
    id           TEXT   NOT NULL,
    body         JSONB  NOT NULL,
    seq_no       BIGINT NOT NULL DEFAULT 0,
    primary_term BIGINT NOT NULL DEFAULT 1,
    PRIMARY KEY (location, id)
)"#;

const SELECT_COLUMNS: &str = "SELECT location, id, body, seq_no, primary_term FROM documents";

/// sqlx-backed document store
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    bulk_chunk_size: usize,
    bulk_concurrency: usize,
    request_timeout: Duration,
}

impl PgDocumentStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool, config: &StoreConfig) -> Self {
        Self {
            pool,
            bulk_chunk_size: config.bulk_chunk_size.max(1),
            bulk_concurrency: config.bulk_concurrency.max(1),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    /// Connect using the configured URL and pool size
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::connection("store.database_url is not configured"))?;

        info!(max_connections = config.max_connections, "Connecting document store");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.request_timeout_ms))
            .connect(url)
            .await?;

        Ok(Self::new(pool, config))
    }

    /// Create the documents table if it does not exist
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn with_timeout<T, F>(&self, operation: &str, future: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        tokio::time::timeout(self.request_timeout, future)
            .await
            .map_err(|_| StoreError::timeout(operation, self.request_timeout.as_millis() as u64))?
    }

    async fn apply_chunk(&self, chunk: Vec<BulkAction>) -> StoreResult<Vec<BulkItemOutcome>> {
        let mut conn = self.pool.acquire().await?;
        let mut outcomes = Vec::with_capacity(chunk.len());

        for action in chunk {
            match apply_action(&mut conn, &action).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    let err = StoreError::from(err);
                    if err.is_transient() {
                        return Err(err);
                    }
                    warn!(
                        location = %action.location,
                        id = %action.id,
                        operation = %action.operation,
                        error = %err,
                        "Bulk item failed"
                    );
                    outcomes.push(BulkItemOutcome::new(
                        &action,
                        BulkItemStatus::Error(err.to_string()),
                        None,
                    ));
                }
            }
        }

        Ok(outcomes)
    }
}

async fn apply_action(
    conn: &mut sqlx::PgConnection,
    action: &BulkAction,
) -> Result<BulkItemOutcome, sqlx::Error> {
    let body = Json(action.body.clone().unwrap_or_default());

    match (action.operation, action.version) {
        (BulkOperation::Create, _) => {
            let result = sqlx::query(
                "INSERT INTO documents (location, id, body, seq_no, primary_term) \
                 VALUES ($1, $2, $3, 0, 1) ON CONFLICT (location, id) DO NOTHING",
            )
            .bind(&action.location)
            .bind(&action.id)
            .bind(body)
            .execute(&mut *conn)
            .await?;
            Ok(if result.rows_affected() == 0 {
                BulkItemOutcome::new(action, BulkItemStatus::Conflict, None)
            } else {
                BulkItemOutcome::new(action, BulkItemStatus::Created, Some(VersionToken::initial()))
            })
        }
        (BulkOperation::Index, None) => {
            let row = sqlx::query(
                "INSERT INTO documents (location, id, body, seq_no, primary_term) \
                 VALUES ($1, $2, $3, 0, 1) \
                 ON CONFLICT (location, id) DO UPDATE \
                 SET body = EXCLUDED.body, seq_no = documents.seq_no + 1 \
                 RETURNING seq_no, primary_term, (xmax = 0) AS inserted",
            )
            .bind(&action.location)
            .bind(&action.id)
            .bind(body)
            .fetch_one(&mut *conn)
            .await?;
            let version = VersionToken::new(row.try_get("seq_no")?, row.try_get("primary_term")?);
            let status = if row.try_get::<bool, _>("inserted")? {
                BulkItemStatus::Created
            } else {
                BulkItemStatus::Updated
            };
            Ok(BulkItemOutcome::new(action, status, Some(version)))
        }
        (BulkOperation::Index, Some(expected)) | (BulkOperation::Update, Some(expected)) => {
            let set_body = if action.operation == BulkOperation::Index {
                "body = $3"
            } else {
                "body = documents.body || $3"
            };
            let sql = format!(
                "UPDATE documents SET {set_body}, seq_no = seq_no + 1 \
                 WHERE location = $1 AND id = $2 AND seq_no = $4 AND primary_term = $5 \
                 RETURNING seq_no, primary_term"
            );
            let row = sqlx::query(&sql)
                .bind(&action.location)
                .bind(&action.id)
                .bind(body)
                .bind(expected.seq_no)
                .bind(expected.primary_term)
                .fetch_optional(&mut *conn)
                .await?;
            Ok(match row {
                Some(row) => {
                    let version =
                        VersionToken::new(row.try_get("seq_no")?, row.try_get("primary_term")?);
                    BulkItemOutcome::new(action, BulkItemStatus::Updated, Some(version))
                }
                None => BulkItemOutcome::new(action, BulkItemStatus::Conflict, None),
            })
        }
        (BulkOperation::Update, None) => {
            let row = sqlx::query(
                "UPDATE documents SET body = documents.body || $3, seq_no = seq_no + 1 \
                 WHERE location = $1 AND id = $2 RETURNING seq_no, primary_term",
            )
            .bind(&action.location)
            .bind(&action.id)
            .bind(body)
            .fetch_optional(&mut *conn)
            .await?;
            Ok(match row {
                Some(row) => {
                    let version =
                        VersionToken::new(row.try_get("seq_no")?, row.try_get("primary_term")?);
                    BulkItemOutcome::new(action, BulkItemStatus::Updated, Some(version))
                }
                None => BulkItemOutcome::new(
                    action,
                    BulkItemStatus::Error("document_missing_exception".to_string()),
                    None,
                ),
            })
        }
        (BulkOperation::Delete, version) => {
            let result = match version {
                Some(expected) => {
                    sqlx::query(
                        "DELETE FROM documents \
                         WHERE location = $1 AND id = $2 AND seq_no = $3 AND primary_term = $4",
                    )
                    .bind(&action.location)
                    .bind(&action.id)
                    .bind(expected.seq_no)
                    .bind(expected.primary_term)
                    .execute(&mut *conn)
                    .await?
                }
                None => {
                    sqlx::query("DELETE FROM documents WHERE location = $1 AND id = $2")
                        .bind(&action.location)
                        .bind(&action.id)
                        .execute(&mut *conn)
                        .await?
                }
            };
            Ok(match (result.rows_affected(), version) {
                (0, Some(_)) => BulkItemOutcome::new(action, BulkItemStatus::Conflict, None),
                (0, None) => {
                    BulkItemOutcome::new(action, BulkItemStatus::Error("not_found".to_string()), None)
                }
                _ => BulkItemOutcome::new(action, BulkItemStatus::Deleted, None),
            })
        }
    }
}

/// Translate a `prefix-*` pattern into an escaped LIKE pattern
fn like_pattern(pattern: &str) -> String {
    pattern
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
        .replace('*', "%")
}

fn term_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn row_to_document(row: PgRow) -> StoreResult<StoredDocument> {
    let body: Json<Map<String, Value>> = row.try_get("body")?;
    Ok(StoredDocument {
        location: row.try_get("location")?,
        id: row.try_get("id")?,
        version: VersionToken::new(row.try_get("seq_no")?, row.try_get("primary_term")?),
        body: body.0,
    })
}

fn build_search(query: &SearchQuery) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
    builder.push(" WHERE (");
    for (i, location) in query.locations.iter().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        builder.push("location LIKE ").push_bind(like_pattern(location));
    }
    builder.push(")");

    for (field, value) in &query.terms {
        builder
            .push(" AND body->>")
            .push_bind(field.as_str())
            .push(" = ")
            .push_bind(term_text(value));
    }

    for range in &query.ranges {
        if let Some(gte) = range.gte {
            builder
                .push(" AND (body->>")
                .push_bind(range.field.as_str())
                .push(")::timestamptz >= ")
                .push_bind(gte);
        }
        if let Some(lte) = range.lte {
            builder
                .push(" AND (body->>")
                .push_bind(range.field.as_str())
                .push(")::timestamptz <= ")
                .push_bind(lte);
        }
    }

    if let Some((field, order)) = &query.sort {
        builder.push(" ORDER BY body->>").push_bind(field.as_str());
        builder.push(match order {
            SortOrder::Asc => " ASC",
            SortOrder::Desc => " DESC",
        });
    }

    builder.push(" LIMIT ").push_bind(query.limit as i64);
    builder
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get_many(&self, location: &str, ids: &[String]) -> StoreResult<Vec<StoredDocument>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("{SELECT_COLUMNS} WHERE location LIKE $1 AND id = ANY($2)");
        let rows = self
            .with_timeout("get_many", async {
                Ok(sqlx::query(&sql)
                    .bind(like_pattern(location))
                    .bind(ids)
                    .fetch_all(&self.pool)
                    .await?)
            })
            .await?;
        rows.into_iter().map(row_to_document).collect()
    }

    async fn search(&self, query: &SearchQuery) -> StoreResult<Vec<StoredDocument>> {
        let rows = self
            .with_timeout("search", async {
                let mut builder = build_search(query);
                Ok(builder.build().fetch_all(&self.pool).await?)
            })
            .await?;
        rows.into_iter().map(row_to_document).collect()
    }

    async fn multi_search(&self, queries: &[SearchQuery]) -> StoreResult<Vec<Vec<StoredDocument>>> {
        // One connection for the whole batch
        let mut conn = self.pool.acquire().await?;
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            let rows = self
                .with_timeout("multi_search", async {
                    let mut builder = build_search(query);
                    Ok(builder.build().fetch_all(&mut *conn).await?)
                })
                .await?;
            results.push(rows.into_iter().map(row_to_document).collect::<StoreResult<Vec<_>>>()?);
        }
        Ok(results)
    }

    async fn bulk(&self, actions: Vec<BulkAction>) -> StoreResult<Vec<BulkItemOutcome>> {
        let total = actions.len();
        let mut chunks: Vec<Vec<BulkAction>> = Vec::new();
        let mut actions = actions.into_iter().peekable();
        while actions.peek().is_some() {
            chunks.push(actions.by_ref().take(self.bulk_chunk_size).collect());
        }

        let results: Vec<StoreResult<Vec<BulkItemOutcome>>> = stream::iter(chunks)
            .map(|chunk| self.with_timeout("bulk", self.apply_chunk(chunk)))
            .buffer_unordered(self.bulk_concurrency)
            .collect()
            .await;

        let mut outcomes = Vec::with_capacity(total);
        for result in results {
            outcomes.extend(result?);
        }
        debug!(actions = total, outcomes = outcomes.len(), "Bulk submission finished");
        Ok(outcomes)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
