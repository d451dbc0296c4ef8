//! Record stores and the similarity index for Draftsmith.

pub mod in_memory;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryRecordStore;
pub use vector::{IndexedDocument, InMemorySimilarityIndex, cosine_similarity};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRecordStore;
