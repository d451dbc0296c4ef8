//! SQLite record store.
//!
//! Every logical table lives in one `records` table keyed by
//! `(table_name, id)`, with fields stored as a JSON object. Timestamps are
//! RFC 3339 text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draftsmith_core::error::StoreError;
use draftsmith_core::record::{Fields, Record, RecordStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Open (creating if missing) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Each in-memory connection would be its own database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite record store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                table_name  TEXT NOT NULL,
                id          TEXT NOT NULL,
                fields      TEXT NOT NULL DEFAULT '{}',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (table_name, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("records table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_updated_at ON records(table_name, updated_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("updated_at index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<Record, StoreError> {
        let column = |name: &str| -> Result<String, StoreError> {
            row.try_get(name)
                .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
        };

        let fields_json = column("fields")?;
        let fields: Fields = serde_json::from_str(&fields_json)
            .map_err(|e| StoreError::QueryFailed(format!("fields column: {e}")))?;

        Ok(Record {
            id: column("id")?,
            table: column("table_name")?,
            fields,
            created_at: parse_timestamp(&column("created_at")?),
            updated_at: parse_timestamp(&column("updated_at")?),
        })
    }

    async fn fetch(&self, table: &str, id: &str) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query("SELECT * FROM records WHERE table_name = ?1 AND id = ?2")
            .bind(table)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT failed: {e}")))?;
        row.as_ref().map(Self::row_to_record).transpose()
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn encode_fields(fields: &Fields) -> Result<String, StoreError> {
    serde_json::to_string(fields).map_err(|e| StoreError::Storage(format!("Fields serialization: {e}")))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_record(&self, table: &str, fields: Fields) -> Result<Record, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.put_record(table, &id, fields).await
    }

    async fn put_record(&self, table: &str, id: &str, fields: Fields) -> Result<Record, StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO records (table_name, id, fields, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(table_name, id) DO UPDATE SET
                fields = excluded.fields,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(table)
        .bind(id)
        .bind(encode_fields(&fields)?)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT failed: {e}")))?;

        debug!(table, id, "Stored record");
        self.fetch(table, id).await?.ok_or_else(|| StoreError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        })
    }

    async fn get_record(&self, table: &str, id: &str) -> Result<Option<Record>, StoreError> {
        self.fetch(table, id).await
    }

    async fn update_record(&self, table: &str, id: &str, fields: Fields) -> Result<Record, StoreError> {
        let mut record = self.fetch(table, id).await?.ok_or_else(|| StoreError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        })?;
        record.fields.extend(fields);
        record.updated_at = Utc::now();

        sqlx::query("UPDATE records SET fields = ?1, updated_at = ?2 WHERE table_name = ?3 AND id = ?4")
            .bind(encode_fields(&record.fields)?)
            .bind(record.updated_at.to_rfc3339())
            .bind(table)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("UPDATE failed: {e}")))?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_store() -> SqliteRecordStore {
        SqliteRecordStore::new("sqlite::memory:").await.unwrap()
    }

    fn fields(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = test_store().await;
        let r = store
            .create_record("messages", fields(json!({"answer": "Hi there", "caller_id": "acme"})))
            .await
            .unwrap();
        let fetched = store.get_record("messages", &r.id).await.unwrap().unwrap();
        assert_eq!(fetched.str_field("answer"), Some("Hi there"));
        assert_eq!(fetched.table, "messages");
    }

    #[tokio::test]
    async fn tables_are_partitioned() {
        let store = test_store().await;
        store.put_record("artifacts", "x", Fields::new()).await.unwrap();
        assert!(store.get_record("messages", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_is_an_upsert() {
        let store = test_store().await;
        store
            .put_record("conversations", "c1", fields(json!({"turns": []})))
            .await
            .unwrap();
        let second = store
            .put_record("conversations", "c1", fields(json!({"turns": [1]})))
            .await
            .unwrap();
        assert_eq!(second.field::<Vec<u32>>("turns"), Some(vec![1]));
    }

    #[tokio::test]
    async fn update_merges_and_missing_is_not_found() {
        let store = test_store().await;
        let r = store
            .create_record("artifacts", fields(json!({"body": "", "status": "streaming"})))
            .await
            .unwrap();
        store
            .update_record("artifacts", &r.id, fields(json!({"status": "complete"})))
            .await
            .unwrap();
        let fetched = store.get_record("artifacts", &r.id).await.unwrap().unwrap();
        assert_eq!(fetched.str_field("status"), Some("complete"));
        assert_eq!(fetched.str_field("body"), Some(""));

        let err = store
            .update_record("artifacts", "missing", Fields::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn file_database_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = format!("sqlite://{}", dir.path().join("draftsmith.db").display());
        {
            let store = SqliteRecordStore::new(&path).await.unwrap();
            store.put_record("messages", "m1", fields(json!({"answer": "kept"}))).await.unwrap();
        }
        let store = SqliteRecordStore::new(&path).await.unwrap();
        let r = store.get_record("messages", "m1").await.unwrap().unwrap();
        assert_eq!(r.str_field("answer"), Some("kept"));
    }
}
