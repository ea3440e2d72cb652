use chrono::{SecondsFormat, SubsecRound, Utc};
use serde_json::{json, Value};

use crate::error::SeedError;
use crate::logic::report::{DocumentOutcome, HistoryOutcome, IndexOutcome, RunReport};
use crate::logic::resolver::ResolvedFixtures;
use crate::model::{CollectionName, FixtureSet, IndexSpec, SEED_HISTORY_COLLECTION};
use crate::store::traits::Store;

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Read the store and report, but write nothing
    pub dry_run: bool,
}

/// Writes resolved fixtures to a store: indexes first, then documents,
/// then the seed history entry.
pub struct Applier<'a, S: Store + ?Sized> {
    store: &'a S,
    options: ApplyOptions,
}

impl<'a, S: Store + ?Sized> Applier<'a, S> {
    pub fn new(store: &'a S, options: ApplyOptions) -> Self {
        Self { store, options }
    }

    pub async fn apply(&self, resolved: &ResolvedFixtures) -> Result<RunReport, SeedError> {
        let fixtures = &resolved.fixtures;
        let mut report = RunReport::new(fixtures, self.options.dry_run);

        log::info!(
            "Applying fixture {} version {} to {} store{}",
            fixtures.source,
            fixtures.version,
            self.store.backend_name(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        // Unique indexes must exist before documents so the store rejects duplicates
        for spec in &fixtures.indexes {
            self.ensure_index(spec, &mut report).await?;
        }

        for collection in &fixtures.collections {
            if collection.is_empty() {
                log::debug!("No {} documents declared", collection.name);
                continue;
            }
            log::info!("Seeding {} collection ({} documents)", collection.name, collection.len());
            for (id, document) in &collection.documents {
                let body = document.to_body().map_err(|e| {
                    SeedError::malformed(format!("{}/{}", collection.name, id), e.to_string())
                })?;
                let outcome = self.upsert(collection.name, id, &body).await?;
                report.record_document(collection.name, id, outcome);
            }
        }

        // A fingerprint is only recorded once it applied without conflicts
        report.history = if report.has_conflicts() {
            log::warn!(
                "Not recording fixture {} in {}: index conflicts",
                fixtures.fingerprint,
                SEED_HISTORY_COLLECTION
            );
            HistoryOutcome::NotRecorded
        } else {
            self.record_history(fixtures).await?
        };

        self.count_documents(&mut report).await?;
        report.finish();
        Ok(report)
    }

    async fn count_documents(&self, report: &mut RunReport) -> Result<(), SeedError> {
        let collections: Vec<CollectionName> = report.collections.keys().copied().collect();
        for collection in collections {
            let count = self
                .store
                .count_documents(collection.as_str())
                .await
                .map_err(|e| SeedError::store(format!("count {}", collection), e))?;
            report.record_store_count(collection, count);
        }
        Ok(())
    }

    async fn ensure_index(&self, spec: &IndexSpec, report: &mut RunReport) -> Result<(), SeedError> {
        let existing = self
            .store
            .find_index(spec)
            .await
            .map_err(|e| SeedError::store(format!("index {}", spec), e))?;

        match existing {
            Some(existing) if existing.unique == spec.unique => {
                log::debug!("Index {} already present as {}", spec, existing.name);
                report.record_index(spec, IndexOutcome::Skipped);
            }
            Some(existing) => {
                let conflict = SeedError::IndexConflict {
                    collection: spec.collection,
                    index: existing.name.clone(),
                    existing_unique: existing.unique,
                    declared_unique: spec.unique,
                };
                log::error!("{}; continuing with remaining indexes", conflict);
                report.record_conflict(spec, existing.unique);
            }
            None => {
                if !self.options.dry_run {
                    self.store
                        .create_index(spec)
                        .await
                        .map_err(|e| SeedError::store(format!("index {}", spec), e))?;
                }
                log::info!("Created index {}", spec);
                report.record_index(spec, IndexOutcome::Created);
            }
        }

        Ok(())
    }

    async fn upsert(
        &self,
        collection: CollectionName,
        id: &str,
        body: &Value,
    ) -> Result<DocumentOutcome, SeedError> {
        let target = format!("{}/{}", collection, id);
        let existing = self
            .store
            .find_document(collection.as_str(), id)
            .await
            .map_err(|e| SeedError::store(&target, e))?;

        let outcome = match existing {
            None => DocumentOutcome::Inserted,
            Some(current) if &current == body => DocumentOutcome::Unchanged,
            Some(_) => DocumentOutcome::Updated,
        };

        if self.options.dry_run {
            return Ok(outcome);
        }

        match outcome {
            DocumentOutcome::Inserted => self
                .store
                .insert_document(collection.as_str(), id, body)
                .await
                .map_err(|e| SeedError::store(&target, e))?,
            DocumentOutcome::Updated => self
                .store
                .replace_document(collection.as_str(), id, body)
                .await
                .map_err(|e| SeedError::store(&target, e))?,
            DocumentOutcome::Unchanged => {}
        }

        Ok(outcome)
    }

    /// Insert the history entry for this fingerprint once; never rewrite it
    async fn record_history(&self, fixtures: &FixtureSet) -> Result<HistoryOutcome, SeedError> {
        let target = format!("{}/{}", SEED_HISTORY_COLLECTION, fixtures.fingerprint);
        let existing = self
            .store
            .find_document(SEED_HISTORY_COLLECTION, &fixtures.fingerprint)
            .await
            .map_err(|e| SeedError::store(&target, e))?;

        if existing.is_some() {
            return Ok(HistoryOutcome::AlreadyRecorded);
        }
        if self.options.dry_run {
            return Ok(HistoryOutcome::NotRecorded);
        }

        let entry = history_entry(fixtures);
        self.store
            .insert_document(SEED_HISTORY_COLLECTION, &fixtures.fingerprint, &entry)
            .await
            .map_err(|e| SeedError::store(&target, e))?;
        Ok(HistoryOutcome::Recorded)
    }
}

fn history_entry(fixtures: &FixtureSet) -> Value {
    let collections: Vec<&str> = fixtures.collections.iter().map(|c| c.name.as_str()).collect();
    json!({
        "_id": fixtures.fingerprint,
        "version": fixtures.version,
        "fingerprint": fixtures.fingerprint,
        "source": fixtures.source,
        "collections": collections,
        "appliedAt": Utc::now().trunc_subsecs(3).to_rfc3339_opts(SecondsFormat::AutoSi, true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::{FixtureLoader, IdentityResolver};
    use crate::model::IndexKey;
    use crate::store::{DocumentStore, IndexStore, MemoryStore};

    fn resolved(email: &str) -> ResolvedFixtures {
        let fixtures = FixtureLoader::load_value(
            "test",
            json!({
                "format": 1,
                "version": "test",
                "collections": {
                    "users": [{
                        "_id": "u1",
                        "email": email,
                        "username": "a",
                        "fullName": "A",
                        "password": "hash"
                    }],
                    "releases": [{
                        "_id": "r1",
                        "title": "R",
                        "isCompleted": false,
                        "tasks": [{
                            "_id": "t1",
                            "title": "T",
                            "description": "D",
                            "status": "TODO",
                            "developerId": "u1",
                            "orderIndex": 1
                        }]
                    }]
                },
                "indexes": [
                    { "collection": "users", "keys": [{ "field": "email" }], "unique": true },
                    { "collection": "releases", "keys": [{ "field": "title" }] }
                ]
            }),
        )
        .unwrap();
        IdentityResolver::resolve(fixtures).unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_unchanged_then_updated() {
        let store = MemoryStore::new();
        let applier = Applier::new(&store, ApplyOptions::default());

        let first = applier.apply(&resolved("a@x.io")).await.unwrap();
        assert_eq!(first.counts(CollectionName::Users).inserted, 1);
        assert_eq!(first.counts(CollectionName::Releases).inserted, 1);
        assert_eq!(first.totals().indexes_created, 2);
        assert_eq!(first.history, HistoryOutcome::Recorded);
        assert_eq!(first.store_counts[&CollectionName::Users], 1);
        assert_eq!(first.store_counts[&CollectionName::Releases], 1);

        let second = applier.apply(&resolved("a@x.io")).await.unwrap();
        assert_eq!(second.totals().unchanged, 2);
        assert_eq!(second.totals().indexes_skipped, 2);
        assert!(second.totals().is_noop());
        assert_eq!(second.history, HistoryOutcome::AlreadyRecorded);

        let third = applier.apply(&resolved("changed@x.io")).await.unwrap();
        assert_eq!(third.counts(CollectionName::Users).updated, 1);
        assert_eq!(third.counts(CollectionName::Releases).unchanged, 1);
        assert_eq!(third.history, HistoryOutcome::Recorded);

        let stored = store.find_document("users", "u1").await.unwrap().unwrap();
        assert_eq!(stored["email"], json!("changed@x.io"));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = MemoryStore::new();
        let applier = Applier::new(&store, ApplyOptions { dry_run: true });

        let report = applier.apply(&resolved("a@x.io")).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.totals().inserted, 2);
        assert_eq!(report.totals().indexes_created, 2);
        assert_eq!(report.history, HistoryOutcome::NotRecorded);
        assert_eq!(report.store_counts[&CollectionName::Users], 0);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_index_conflict_does_not_stop_the_run() {
        let store = MemoryStore::new();
        let plain_email = IndexSpec::new(CollectionName::Users, vec![IndexKey::asc("email")], false);
        store.create_index(&plain_email).await.unwrap();

        let report = Applier::new(&store, ApplyOptions::default())
            .apply(&resolved("a@x.io"))
            .await
            .unwrap();

        assert!(report.has_conflicts());
        assert_eq!(report.counts(CollectionName::Users).index_conflicts, 1);
        assert_eq!(report.counts(CollectionName::Releases).indexes_created, 1);
        assert_eq!(report.totals().inserted, 2);
        assert!(matches!(
            report.first_conflict(),
            Some(SeedError::IndexConflict { existing_unique: false, declared_unique: true, .. })
        ));
        // The existing index is left alone
        assert!(!store.indexes("users")[0].unique);

        // The fingerprint stays unrecorded until a run applies cleanly
        assert_eq!(report.history, HistoryOutcome::NotRecorded);
        assert_eq!(store.count_documents(SEED_HISTORY_COLLECTION).await.unwrap(), 0);

        let rerun = Applier::new(&store, ApplyOptions::default())
            .apply(&resolved("a@x.io"))
            .await
            .unwrap();
        assert!(rerun.has_conflicts());
        assert_eq!(rerun.history, HistoryOutcome::NotRecorded);
    }
}
