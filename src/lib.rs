pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export error types
pub use error::{SeedError, StoreError, StoreResult};

// Export pipeline components
pub use logic::{
    Applier, ApplyOptions, CollectionCounts, DocumentOutcome, FixtureLoader, HistoryOutcome,
    IdentityResolver, IndexOutcome, ResolvedFixtures, RunReport,
};

// Export all model types
pub use model::*;

// Export seed entry points
pub use seed::{run_seed, seed_fixtures, FixtureSource};

// Export store types
pub use store::{MemoryStore, MongoStore, PostgresStore, Store};
