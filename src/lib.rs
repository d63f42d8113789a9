//! Active-record style collections over an embedded document store.
//!
//! Each [`Collection`] owns a FIFO task queue ([`flow::Flow`]); every operation on it is
//! queued and runs only after the previous one has settled. Queries may carry `$$sort`,
//! `$$skip`, `$$limit` and `$$projection` controls, which route them through a store
//! cursor, and results come back as [`Record`]s.

pub mod collection;
pub mod config;
pub mod errors;
pub mod flow;
pub mod logger;
pub mod materialize;
pub mod query;
pub mod record;
pub mod store;
pub mod types;

pub use crate::collection::Collection;
pub use crate::config::StoreConfig;
pub use crate::errors::DbError;
pub use crate::flow::{Flow, Ticket};
pub use crate::query::Query;
pub use crate::record::Record;
pub use crate::store::{
    Datastore, DocumentStore, IndexOptions, RemoveOptions, UpdateOptions, UpdateResult,
};

/// Factory for collections sharing one [`StoreConfig`].
#[derive(Debug, Clone, Default)]
pub struct Database {
    config: StoreConfig,
}

impl Database {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Defaults overridden by `RECORDFLOW_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(StoreConfig::default().with_env_overrides())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open the collection `name`, stored at `{location}/{name}.{format}`.
    ///
    /// # Errors
    /// [`DbError::Configuration`] for a blank name, [`DbError::NoRuntime`] outside a tokio
    /// runtime.
    pub fn collection(&self, name: &str) -> Result<Collection, DbError> {
        let collection = Collection::open(name, &self.config)?;
        let name = collection.name();
        log::info!("opened collection {name} ({})", self.describe(name));
        Ok(collection)
    }

    fn describe(&self, name: &str) -> String {
        if self.config.in_memory_only {
            "in memory".to_string()
        } else {
            self.config.filename_for(name).display().to_string()
        }
    }
}

/// Initializes logging from `log4rs.yaml` in the working directory.
///
/// # Errors
/// Returns an error if the logger config cannot be read or applied.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    logger::init()?;
    Ok(())
}
