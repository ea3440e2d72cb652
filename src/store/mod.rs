pub mod memory;
pub mod mongo;
pub mod postgres;
pub mod traits;

pub use memory::*;
pub use mongo::*;
pub use postgres::*;
pub use traits::*;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreResult;

/// Open the backend selected by `config`
pub async fn connect(config: &StoreConfig) -> StoreResult<Box<dyn Store>> {
    let store: Box<dyn Store> = match config.backend {
        StoreBackend::Mongodb => {
            let uri = config.connection_url();
            log::info!("Connecting to MongoDB database {}", config.database);
            Box::new(MongoStore::connect(&uri, &config.database).await?)
        }
        StoreBackend::Postgres => {
            let url = config.connection_url();
            log::info!("Connecting to PostgreSQL database {}", config.database);
            Box::new(PostgresStore::new(&url, config.max_connections.unwrap_or(5)).await?)
        }
        StoreBackend::Memory => {
            log::info!("Using in-memory store; nothing will be persisted");
            Box::new(MemoryStore::new())
        }
    };
    Ok(store)
}
