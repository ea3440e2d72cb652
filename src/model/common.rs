use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type Id = String;

/// Name of the collection that records applied fixture fingerprints
pub const SEED_HISTORY_COLLECTION: &str = "seed_history";

/// Collections a fixture file may declare.
///
/// Declaration order is also apply order: users must exist before the
/// releases whose tasks reference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionName {
    Users,
    Releases,
}

impl CollectionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionName::Users => "users",
            CollectionName::Releases => "releases",
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(CollectionName::Users),
            "releases" => Ok(CollectionName::Releases),
            other => Err(format!("unknown collection '{}'", other)),
        }
    }
}

pub fn generate_run_id() -> Id {
    Uuid::new_v4().to_string()
}
