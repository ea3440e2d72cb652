use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::CollectionName;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// MongoDB key-document value for this direction
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexKey {
    /// Dotted field path, e.g. `tasks.developerId`
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl IndexKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn segments(&self) -> Vec<&str> {
        self.field.split('.').collect()
    }

    pub fn is_nested(&self) -> bool {
        self.field.contains('.')
    }
}

/// A declared secondary index: (collection, key spec, uniqueness).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSpec {
    pub collection: CollectionName,
    pub keys: Vec<IndexKey>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(collection: CollectionName, keys: Vec<IndexKey>, unique: bool) -> Self {
        Self {
            collection,
            keys,
            unique,
        }
    }

    /// Index name in MongoDB's default style: `email_1`, `a_1_b_-1`.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|key| format!("{}_{}", key.field, key.direction.as_i32()))
            .join("_")
    }

    pub fn same_keys(&self, other: &IndexSpec) -> bool {
        self.collection == other.collection && self.keys == other.keys
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.collection, self.name())?;
        if self.unique {
            write!(f, " (unique)")?;
        }
        Ok(())
    }
}

/// What a store reports about an index that already exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingIndex {
    pub name: String,
    pub unique: bool,
}
