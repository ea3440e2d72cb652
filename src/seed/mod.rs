use std::path::PathBuf;

use crate::error::SeedError;
use crate::logic::{Applier, ApplyOptions, FixtureLoader, IdentityResolver, RunReport};
use crate::model::FixtureSet;
use crate::store::traits::Store;

/// Where a seed run reads its fixtures from
#[derive(Debug, Clone)]
pub enum FixtureSource {
    Path(PathBuf),
    Inline { name: String, contents: String },
}

impl FixtureSource {
    pub fn load(&self) -> Result<FixtureSet, SeedError> {
        match self {
            FixtureSource::Path(path) => FixtureLoader::load_path(path),
            FixtureSource::Inline { name, contents } => FixtureLoader::load_str(name, contents),
        }
    }
}

/// Run the whole seed: load, resolve references, apply, report.
///
/// Loading and resolution finish before the store is touched, so a bad
/// fixture never causes a partial write.
pub async fn run_seed<S: Store + ?Sized>(
    store: &S,
    source: &FixtureSource,
    options: ApplyOptions,
) -> Result<RunReport, SeedError> {
    let fixtures = source.load()?;
    seed_fixtures(store, fixtures, options).await
}

/// Same as [`run_seed`] for fixtures that are already loaded
pub async fn seed_fixtures<S: Store + ?Sized>(
    store: &S,
    fixtures: FixtureSet,
    options: ApplyOptions,
) -> Result<RunReport, SeedError> {
    log::info!(
        "Loaded fixture {} version {}: {} documents, {} indexes",
        fixtures.source,
        fixtures.version,
        fixtures.document_count(),
        fixtures.indexes.len()
    );

    let resolved = IdentityResolver::resolve(fixtures)?;
    log::info!("All {} references resolved", resolved.reference_count);

    let report = Applier::new(store, options).apply(&resolved).await?;
    report.log_summary();

    Ok(report)
}
