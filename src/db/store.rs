//! Document store collaborator and its SQLite implementation.
//!
//! Every mutation runs in its own transaction, opens with a write so SQLite takes the write
//! lock up front, bumps the store revision, and is published on the change feed only after
//! commit.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use crate::errors::AppError;
use crate::models::{Document, Fields, Snapshot, StoreEvent};

/// A shared, multi-client JSON document store grouped into named collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read every document of a collection.
    async fn fetch_all(&self, collection: &str) -> Result<Snapshot, AppError>;

    /// Read a single document.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, AppError>;

    /// Insert a new document and return the identifier assigned to it.
    async fn insert(&self, collection: &str, fields: Fields) -> Result<String, AppError>;

    /// Merge the given top-level fields into an existing document.
    async fn update_fields(&self, collection: &str, id: &str, fields: Fields)
        -> Result<(), AppError>;

    /// Delete a document.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError>;

    /// Change feed over all collections.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    /// Current store revision.
    async fn revision_id(&self) -> Result<i64, AppError>;

    /// Check that the store can be reached.
    async fn health_check(&self) -> Result<(), AppError>;
}

/// Shared handle to a document store.
pub type SharedStore = Arc<dyn DocumentStore>;

/// SQLite-backed document store.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    events: broadcast::Sender<StoreEvent>,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self { pool, events }
    }

    /// Close the underlying pool. Later calls fail with `BackendUnavailable`.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn publish(&self, event: StoreEvent) {
        // Sending only fails when nobody is listening.
        let _ = self.events.send(event);
    }
}

/// Increment the revision inside the caller's transaction.
async fn bump_revision(conn: &mut sqlx::SqliteConnection) -> Result<i64, AppError> {
    let now = Utc::now().to_rfc3339();
    let row = sqlx::query(
        "UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1 RETURNING revision_id",
    )
    .bind(&now)
    .fetch_one(conn)
    .await?;
    Ok(row.get("revision_id"))
}

fn parse_body(id: &str, body: &str) -> Result<Fields, AppError> {
    match serde_json::from_str(body)? {
        serde_json::Value::Object(fields) => Ok(fields),
        _ => Err(AppError::Internal(format!(
            "Document {} is not a JSON object",
            id
        ))),
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn fetch_all(&self, collection: &str) -> Result<Snapshot, AppError> {
        let mut tx = self.pool.begin().await?;

        let meta = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;
        let rows = sqlx::query("SELECT id, body FROM documents WHERE collection = ? ORDER BY id")
            .bind(collection)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let documents = rows
            .iter()
            .filter_map(|row| {
                let id: String = row.get("id");
                let body: String = row.get("body");
                match parse_body(&id, &body) {
                    Ok(fields) => Some(Document { id, fields }),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable document {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();

        Ok(Snapshot {
            revision_id: meta.get("revision_id"),
            taken_at: Utc::now().to_rfc3339(),
            documents,
        })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, AppError> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(Document {
                    id: id.to_string(),
                    fields: parse_body(id, &body)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, collection: &str, fields: Fields) -> Result<String, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let body = serde_json::to_string(&fields)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO documents (collection, id, body, updated_at) VALUES (?, ?, ?, ?)")
            .bind(collection)
            .bind(&id)
            .bind(&body)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::debug!(collection, %id, revision, "Document inserted");
        self.publish(StoreEvent::Added {
            collection: collection.to_string(),
            id: id.clone(),
            fields,
        });
        Ok(id)
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        let patch = serde_json::to_string(&fields)?;

        let mut tx = self.pool.begin().await?;
        // Bumping first takes the write lock before the current body is read.
        let revision = bump_revision(&mut tx).await?;

        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(AppError::NotFound(format!(
                "Document {} not found in {}",
                id, collection
            )));
        };
        let body: String = row.get("body");
        let previous = parse_body(id, &body)?;

        // json_patch merges top-level keys in one statement, so the record never shows a
        // partial update.
        let row = sqlx::query(
            "UPDATE documents SET body = json_patch(body, ?), updated_at = ? WHERE collection = ? AND id = ? RETURNING body",
        )
        .bind(&patch)
        .bind(&now)
        .bind(collection)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        let body: String = row.get("body");
        let merged = parse_body(id, &body)?;

        tx.commit().await?;

        tracing::debug!(collection, id, revision, "Document updated");
        self.publish(StoreEvent::Changed {
            collection: collection.to_string(),
            id: id.to_string(),
            fields: merged,
            previous,
        });
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ? RETURNING body")
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Err(AppError::NotFound(format!(
                "Document {} not found in {}",
                id, collection
            )));
        };
        let body: String = row.get("body");
        let previous = parse_body(id, &body)?;

        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::debug!(collection, id, revision, "Document deleted");
        self.publish(StoreEvent::Removed {
            collection: collection.to_string(),
            id: id.to_string(),
            fields: previous,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    async fn revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
