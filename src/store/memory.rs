use itertools::Itertools;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::{StoreError, StoreResult};
use crate::model::{ExistingIndex, Id, IndexSpec};
use crate::store::traits::{DocumentStore, IndexStore, Store};

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: HashMap<Id, Value>,
    indexes: Vec<IndexSpec>,
}

impl MemoryCollection {
    /// Reject `document` if any unique index already holds one of its keys under another id
    fn check_unique(&self, collection: &str, id: &str, document: &Value) -> StoreResult<()> {
        for spec in self.indexes.iter().filter(|spec| spec.unique) {
            let keys = index_keys(document, spec);
            let clash = self
                .documents
                .iter()
                .filter(|(other_id, _)| other_id.as_str() != id)
                .find_map(|(_, other)| {
                    let other_keys = index_keys(other, spec);
                    keys.iter().find(|key| other_keys.contains(key)).cloned()
                });
            if let Some(key) = clash {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    detail: format!("index {} dup key {}", spec.name(), Value::Array(key)),
                });
            }
        }
        Ok(())
    }
}

/// Process-local document store.
///
/// Unique indexes behave like MongoDB's: a missing field indexes as `null`
/// and paths through arrays collect every element's value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every collection keyed by document id
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<Id, Value>> {
        self.collections
            .read()
            .iter()
            .map(|(name, collection)| {
                let documents = collection
                    .documents
                    .iter()
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect();
                (name.clone(), documents)
            })
            .collect()
    }

    pub fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }
}

/// Every key `document` contributes to `spec`; array paths give one key per element
fn index_keys(document: &Value, spec: &IndexSpec) -> Vec<Vec<Value>> {
    let mut keys: Vec<Vec<Value>> = Vec::new();
    let combinations = spec
        .keys
        .iter()
        .map(|key| extract_values(document, &key.segments()))
        .multi_cartesian_product();
    for key in combinations {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn extract_values(value: &Value, segments: &[&str]) -> Vec<Value> {
    match (value, segments.split_first()) {
        (Value::Array(items), _) if !items.is_empty() => items
            .iter()
            .flat_map(|item| extract_values(item, segments))
            .collect(),
        (Value::Array(_), _) => vec![Value::Null],
        (_, None) => vec![value.clone()],
        (Value::Object(fields), Some((first, rest))) => match fields.get(*first) {
            Some(inner) => extract_values(inner, rest),
            None => vec![Value::Null],
        },
        _ => vec![Value::Null],
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn find_document(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.documents.get(id).cloned()))
    }

    async fn insert_document(&self, collection: &str, id: &str, document: &Value) -> StoreResult<()> {
        let mut collections = self.collections.write();
        let entry = collections.entry(collection.to_string()).or_default();

        if entry.documents.contains_key(id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                detail: format!("_id '{}' already exists", id),
            });
        }
        entry.check_unique(collection, id, document)?;
        entry.documents.insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn replace_document(&self, collection: &str, id: &str, document: &Value) -> StoreResult<()> {
        let mut collections = self.collections.write();
        let entry = collections
            .get_mut(collection)
            .filter(|c| c.documents.contains_key(id))
            .ok_or_else(|| StoreError::Backend(format!("no document {}/{} to replace", collection, id)))?;

        entry.check_unique(collection, id, document)?;
        entry.documents.insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> StoreResult<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn count_documents(&self, collection: &str) -> StoreResult<u64> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.documents.len() as u64)
            .unwrap_or(0))
    }
}

#[async_trait::async_trait]
impl IndexStore for MemoryStore {
    async fn find_index(&self, spec: &IndexSpec) -> StoreResult<Option<ExistingIndex>> {
        Ok(self
            .collections
            .read()
            .get(spec.collection.as_str())
            .and_then(|c| c.indexes.iter().find(|existing| existing.same_keys(spec)))
            .map(|existing| ExistingIndex {
                name: existing.name(),
                unique: existing.unique,
            }))
    }

    async fn create_index(&self, spec: &IndexSpec) -> StoreResult<()> {
        let mut collections = self.collections.write();
        let entry = collections.entry(spec.collection.to_string()).or_default();

        if let Some(existing) = entry.indexes.iter().find(|existing| existing.same_keys(spec)) {
            if existing.unique == spec.unique {
                return Ok(());
            }
            return Err(StoreError::Backend(format!(
                "index {} already exists with different options",
                spec.name()
            )));
        }

        if spec.unique {
            let mut seen: Vec<Vec<Value>> = Vec::with_capacity(entry.documents.len());
            for document in entry.documents.values() {
                let keys = index_keys(document, spec);
                if let Some(key) = keys.iter().find(|key| seen.contains(key)) {
                    return Err(StoreError::DuplicateKey {
                        collection: spec.collection.to_string(),
                        detail: format!(
                            "cannot build unique index {}: dup key {}",
                            spec.name(),
                            Value::Array(key.clone())
                        ),
                    });
                }
                seen.extend(keys);
            }
        }

        entry.indexes.push(spec.clone());
        Ok(())
    }
}

impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
