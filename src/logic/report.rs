use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::SeedError;
use crate::model::{generate_run_id, CollectionName, FixtureSet, Id, IndexSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    Created,
    Skipped,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Recorded,
    AlreadyRecorded,
    NotRecorded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub indexes_created: usize,
    pub indexes_skipped: usize,
    pub index_conflicts: usize,
}

impl CollectionCounts {
    pub fn documents(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    /// True when the run left this collection exactly as it found it
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.indexes_created == 0
    }

    fn add(&mut self, other: &CollectionCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.indexes_created += other.indexes_created;
        self.indexes_skipped += other.indexes_skipped;
        self.index_conflicts += other.index_conflicts;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConflictRecord {
    pub collection: CollectionName,
    pub index: String,
    pub existing_unique: bool,
    pub declared_unique: bool,
}

/// Counters and outcome of a single seed run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Id,
    pub source: String,
    pub fixture_version: String,
    pub fingerprint: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub collections: BTreeMap<CollectionName, CollectionCounts>,
    /// Documents in each collection once the run finished
    pub store_counts: BTreeMap<CollectionName, u64>,
    pub index_conflicts: Vec<IndexConflictRecord>,
    pub history: HistoryOutcome,
}

impl RunReport {
    pub fn new(fixtures: &FixtureSet, dry_run: bool) -> Self {
        let mut collections = BTreeMap::new();
        for collection in &fixtures.collections {
            collections.insert(collection.name, CollectionCounts::default());
        }
        for index in &fixtures.indexes {
            collections.entry(index.collection).or_default();
        }

        Self {
            run_id: generate_run_id(),
            source: fixtures.source.clone(),
            fixture_version: fixtures.version.clone(),
            fingerprint: fixtures.fingerprint.clone(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            collections,
            store_counts: BTreeMap::new(),
            index_conflicts: Vec::new(),
            history: HistoryOutcome::NotRecorded,
        }
    }

    pub fn record_document(&mut self, collection: CollectionName, id: &str, outcome: DocumentOutcome) {
        let counts = self.collections.entry(collection).or_default();
        match outcome {
            DocumentOutcome::Inserted => counts.inserted += 1,
            DocumentOutcome::Updated => counts.updated += 1,
            DocumentOutcome::Unchanged => counts.unchanged += 1,
        }
        log::debug!("{}/{}: {:?}", collection, id, outcome);
    }

    pub fn record_index(&mut self, spec: &IndexSpec, outcome: IndexOutcome) {
        let counts = self.collections.entry(spec.collection).or_default();
        match outcome {
            IndexOutcome::Created => counts.indexes_created += 1,
            IndexOutcome::Skipped => counts.indexes_skipped += 1,
            IndexOutcome::Conflict => counts.index_conflicts += 1,
        }
    }

    pub fn record_conflict(&mut self, spec: &IndexSpec, existing_unique: bool) {
        self.record_index(spec, IndexOutcome::Conflict);
        self.index_conflicts.push(IndexConflictRecord {
            collection: spec.collection,
            index: spec.name(),
            existing_unique,
            declared_unique: spec.unique,
        });
    }

    pub fn record_store_count(&mut self, collection: CollectionName, count: u64) {
        self.store_counts.insert(collection, count);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn counts(&self, collection: CollectionName) -> CollectionCounts {
        self.collections.get(&collection).copied().unwrap_or_default()
    }

    pub fn totals(&self) -> CollectionCounts {
        let mut totals = CollectionCounts::default();
        for counts in self.collections.values() {
            totals.add(counts);
        }
        totals
    }

    pub fn has_conflicts(&self) -> bool {
        !self.index_conflicts.is_empty()
    }

    /// The first index conflict as an error, for callers that must fail the run
    pub fn first_conflict(&self) -> Option<SeedError> {
        self.index_conflicts.first().map(|conflict| SeedError::IndexConflict {
            collection: conflict.collection,
            index: conflict.index.clone(),
            existing_unique: conflict.existing_unique,
            declared_unique: conflict.declared_unique,
        })
    }

    /// Emit the summary as log lines, one per collection
    pub fn log_summary(&self) {
        log::info!(
            "Seed run {} finished{}: fixture {} version {} ({})",
            self.run_id,
            if self.dry_run { " (dry run)" } else { "" },
            self.source,
            self.fixture_version,
            short_fingerprint(&self.fingerprint)
        );
        for (collection, counts) in &self.collections {
            match self.store_counts.get(collection) {
                Some(total) => log::info!("{}: {}; {} in store", collection, counts, total),
                None => log::info!("{}: {}", collection, counts),
            }
        }
        for conflict in &self.index_conflicts {
            log::error!(
                "Index conflict {}.{}: existing unique={}, declared unique={}",
                conflict.collection,
                conflict.index,
                conflict.existing_unique,
                conflict.declared_unique
            );
        }
    }
}

impl fmt::Display for CollectionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} unchanged; indexes {} created, {} skipped",
            self.inserted, self.updated, self.unchanged, self.indexes_created, self.indexes_skipped
        )?;
        if self.index_conflicts > 0 {
            write!(f, ", {} conflicting", self.index_conflicts)?;
        }
        Ok(())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Seed summary{} for fixture version {} ({})",
            if self.dry_run { " (dry run)" } else { "" },
            self.fixture_version,
            short_fingerprint(&self.fingerprint)
        )?;
        for (collection, counts) in &self.collections {
            write!(f, "   - {}: {}", collection, counts)?;
            if let Some(total) = self.store_counts.get(collection) {
                write!(f, "; {} in store", total)?;
            }
            writeln!(f)?;
        }
        write!(f, "   Total: {}", self.totals())
    }
}

fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
