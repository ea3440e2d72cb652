use std::collections::{BTreeSet, HashMap};

use crate::error::SeedError;
use crate::model::{CollectionName, FixtureSet, Id};

/// Known document ids per collection
#[derive(Debug, Default, Clone)]
pub struct IdentityRegistry {
    ids: HashMap<CollectionName, BTreeSet<Id>>,
}

impl IdentityRegistry {
    pub fn from_fixtures(fixtures: &FixtureSet) -> Self {
        let mut ids: HashMap<CollectionName, BTreeSet<Id>> = HashMap::new();
        for collection in &fixtures.collections {
            ids.entry(collection.name)
                .or_default()
                .extend(collection.documents.keys().cloned());
        }
        Self { ids }
    }

    pub fn contains(&self, collection: CollectionName, id: &str) -> bool {
        self.ids
            .get(&collection)
            .map(|ids| ids.contains(id))
            .unwrap_or(false)
    }

    pub fn len(&self, collection: CollectionName) -> usize {
        self.ids.get(&collection).map(BTreeSet::len).unwrap_or(0)
    }
}

/// Fixtures whose cross-collection references all resolve.
#[derive(Debug, Clone)]
pub struct ResolvedFixtures {
    pub fixtures: FixtureSet,
    pub reference_count: usize,
}

pub struct IdentityResolver;

impl IdentityResolver {
    /// Verify every reference in `fixtures` before anything is written.
    ///
    /// All dangling references are logged; the first in collection, document
    /// and task order is returned.
    pub fn resolve(fixtures: FixtureSet) -> Result<ResolvedFixtures, SeedError> {
        let registry = IdentityRegistry::from_fixtures(&fixtures);
        let mut reference_count = 0;
        let mut first_dangling: Option<SeedError> = None;

        for collection in &fixtures.collections {
            for (document_id, document) in &collection.documents {
                for reference in document.references() {
                    reference_count += 1;
                    if registry.contains(reference.target_collection, &reference.target_id) {
                        continue;
                    }

                    log::error!(
                        "{}/{} field {} references missing {}/{}",
                        collection.name,
                        document_id,
                        reference.field,
                        reference.target_collection,
                        reference.target_id
                    );
                    if first_dangling.is_none() {
                        first_dangling = Some(SeedError::DanglingReference {
                            collection: collection.name,
                            document_id: document_id.clone(),
                            field: reference.field,
                            target_collection: reference.target_collection,
                            target_id: reference.target_id,
                        });
                    }
                }
            }
        }

        if let Some(err) = first_dangling {
            return Err(err);
        }

        log::debug!(
            "Resolved {} references across {} users",
            reference_count,
            registry.len(CollectionName::Users)
        );

        Ok(ResolvedFixtures {
            fixtures,
            reference_count,
        })
    }
}
