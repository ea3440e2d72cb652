use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{CollectionName, Id, IndexSpec, Release, User};

/// Fixture file format understood by this loader
pub const FIXTURE_FORMAT: u32 = 1;

/// One typed document, tagged by the collection it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FixtureDocument {
    User(User),
    Release(Release),
}

/// A foreign identifier held by a fixture document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Field path inside the owning document, e.g. `tasks[3012].developerId`
    pub field: String,
    pub target_collection: CollectionName,
    pub target_id: Id,
}

impl FixtureDocument {
    /// Canonical stored form of the document, `_id` included.
    pub fn to_body(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn references(&self) -> Vec<Reference> {
        match self {
            FixtureDocument::User(_) => Vec::new(),
            FixtureDocument::Release(release) => release
                .ordered_tasks()
                .into_iter()
                .map(|task| Reference {
                    field: format!("tasks[{}].developerId", task.id),
                    target_collection: CollectionName::Users,
                    target_id: task.developer_id.clone(),
                })
                .collect(),
        }
    }
}

/// Validated documents of one collection keyed by id.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionFixture {
    pub name: CollectionName,
    pub documents: BTreeMap<Id, FixtureDocument>,
}

impl CollectionFixture {
    pub fn new(name: CollectionName) -> Self {
        Self {
            name,
            documents: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Everything a fixture file declares, after load-time validation.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureSet {
    /// Where the fixture came from, for log lines
    pub source: String,
    pub version: String,
    /// Hex SHA-256 of the canonical fixture content
    pub fingerprint: String,
    /// Collections in apply order
    pub collections: Vec<CollectionFixture>,
    pub indexes: Vec<IndexSpec>,
}

impl FixtureSet {
    pub fn collection(&self, name: CollectionName) -> Option<&CollectionFixture> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn document_count(&self) -> usize {
        self.collections.iter().map(CollectionFixture::len).sum()
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.collections.iter().flat_map(|c| {
            c.documents.values().filter_map(|doc| match doc {
                FixtureDocument::User(user) => Some(user),
                _ => None,
            })
        })
    }

    pub fn releases(&self) -> impl Iterator<Item = &Release> {
        self.collections.iter().flat_map(|c| {
            c.documents.values().filter_map(|doc| match doc {
                FixtureDocument::Release(release) => Some(release),
                _ => None,
            })
        })
    }
}
