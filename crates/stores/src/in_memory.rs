//! In-memory record store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use draftsmith_core::error::StoreError;
use draftsmith_core::record::{Fields, Record, RecordStore};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Records keyed by table, then id.
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<HashMap<String, HashMap<String, Record>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `table`.
    pub async fn count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_record(&self, table: &str, fields: Fields) -> Result<Record, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.put_record(table, &id, fields).await
    }

    async fn put_record(&self, table: &str, id: &str, fields: Fields) -> Result<Record, StoreError> {
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        let created_at = rows.get(id).map(|r| r.created_at).unwrap_or(now);
        let record = Record {
            id: id.to_string(),
            table: table.to_string(),
            fields,
            created_at,
            updated_at: now,
        };
        rows.insert(id.to_string(), record.clone());
        Ok(record)
    }

    async fn get_record(&self, table: &str, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned())
    }

    async fn update_record(&self, table: &str, id: &str, fields: Fields) -> Result<Record, StoreError> {
        let mut tables = self.tables.write().await;
        let record = tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
        record.fields.extend(fields);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = InMemoryRecordStore::new();
        let created = store
            .create_record("artifacts", fields(&[("title", json!("Welcome"))]))
            .await
            .unwrap();
        let fetched = store.get_record("artifacts", &created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(store.count("artifacts").await, 1);
        assert!(store.get_record("messages", &created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = InMemoryRecordStore::new();
        let r = store
            .create_record("artifacts", fields(&[("title", json!("Draft")), ("body", json!(""))]))
            .await
            .unwrap();
        let updated = store
            .update_record("artifacts", &r.id, fields(&[("body", json!("Hello"))]))
            .await
            .unwrap();
        assert_eq!(updated.str_field("title"), Some("Draft"));
        assert_eq!(updated.str_field("body"), Some("Hello"));
        assert!(updated.updated_at >= r.updated_at);
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = InMemoryRecordStore::new();
        let err = store
            .update_record("artifacts", "nope", Fields::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn put_keeps_created_at() {
        let store = InMemoryRecordStore::new();
        let first = store.put_record("conversations", "c1", Fields::new()).await.unwrap();
        let second = store
            .put_record("conversations", "c1", fields(&[("turns", json!([]))]))
            .await
            .unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(store.count("conversations").await, 1);
    }
}
