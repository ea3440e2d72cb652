use serde_json::Value;

use crate::error::StoreResult;
use crate::model::{ExistingIndex, IndexSpec};

/// Document operations keyed by `_id`.
///
/// Stored documents carry their own `_id` field; `id` arguments must match it.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_document(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;
    /// Insert a new document; fails with `DuplicateKey` on any unique index violation
    async fn insert_document(&self, collection: &str, id: &str, document: &Value) -> StoreResult<()>;
    /// Replace the document stored under `id`
    async fn replace_document(&self, collection: &str, id: &str, document: &Value) -> StoreResult<()>;
    async fn list_documents(&self, collection: &str) -> StoreResult<Vec<Value>>;
    async fn count_documents(&self, collection: &str) -> StoreResult<u64>;
}

#[async_trait::async_trait]
pub trait IndexStore: Send + Sync {
    /// Look up an index on exactly the keys of `spec`, ignoring its uniqueness
    async fn find_index(&self, spec: &IndexSpec) -> StoreResult<Option<ExistingIndex>>;
    async fn create_index(&self, spec: &IndexSpec) -> StoreResult<()>;
}

pub trait Store: DocumentStore + IndexStore + Send + Sync {
    /// Backend name for log lines
    fn backend_name(&self) -> &'static str;
}
