//! Record store trait: keyed persistence for conversations, messages,
//! and artifacts.
//!
//! The core only needs create/read/update by table and id. Backends decide
//! how fields are laid out on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Field map of a record.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Well-known tables.
pub mod tables {
    pub const CONVERSATIONS: &str = "conversations";
    pub const MESSAGES: &str = "messages";
    pub const ARTIFACTS: &str = "artifacts";
    pub const COMPLIANCE_PROFILES: &str = "compliance_profiles";
}

/// A persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,

    pub table: String,

    #[serde(default)]
    pub fields: Fields,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Typed read of one field.
    pub fn field<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.fields
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}

/// The core RecordStore trait.
///
/// Implementations: in-memory (default, tests), SQLite (feature `sqlite`).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "sqlite").
    fn name(&self) -> &str;

    /// Create a record with a fresh id.
    async fn create_record(&self, table: &str, fields: Fields) -> Result<Record, StoreError>;

    /// Create or overwrite a record under a caller-chosen id.
    async fn put_record(&self, table: &str, id: &str, fields: Fields) -> Result<Record, StoreError>;

    async fn get_record(&self, table: &str, id: &str) -> Result<Option<Record>, StoreError>;

    /// Merge `fields` into an existing record. Missing records are `NotFound`.
    async fn update_record(&self, table: &str, id: &str, fields: Fields) -> Result<Record, StoreError>;
}
