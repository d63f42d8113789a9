use crate::config::StoreConfig;
use crate::errors::DbError;
use crate::flow::Flow;
use crate::store::{Datastore, DocumentStore};
use std::sync::Arc;

/// Handle to one named collection.
///
/// Every operation goes through the collection's own queue, so operations run one at a
/// time in the order they were called. Clones share the queue.
pub struct Collection<S: DocumentStore = Datastore> {
    name: Arc<str>,
    pub(crate) flow: Flow<S>,
}

impl<S: DocumentStore> Clone for Collection<S> {
    fn clone(&self) -> Self {
        Self { name: Arc::clone(&self.name), flow: self.flow.clone() }
    }
}

impl<S: DocumentStore> std::fmt::Debug for Collection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).field("flow", &self.flow).finish()
    }
}

fn checked_name(name: &str) -> Result<&str, DbError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DbError::Configuration("collection name is required".into()));
    }
    Ok(trimmed)
}

impl Collection<Datastore> {
    /// Open `name` on the bundled [`Datastore`], persisted per `config`.
    ///
    /// # Errors
    /// [`DbError::Configuration`] for a blank name, [`DbError::NoRuntime`] outside a tokio
    /// runtime.
    pub fn open(name: &str, config: &StoreConfig) -> Result<Self, DbError> {
        let name = checked_name(name)?;
        Self::with_store(name, Datastore::new(name, config), config.autoload)
    }
}

impl<S: DocumentStore> Collection<S> {
    /// Wrap an arbitrary store. With `autoload` the store's `load` is queued as the very
    /// first task; otherwise loading is left to the store.
    ///
    /// # Errors
    /// [`DbError::Configuration`] for a blank name, [`DbError::NoRuntime`] outside a tokio
    /// runtime.
    pub fn with_store(name: &str, store: S, autoload: bool) -> Result<Self, DbError> {
        let name = checked_name(name)?;
        let flow = Flow::with_store(store)?;
        if autoload {
            // a failed load poisons the queue, so the first caller sees it
            let _ = flow.submit(|store: Arc<S>| async move { store.load().await });
            log::debug!("collection {name}: load queued");
        }
        Ok(Self { name: Arc::from(name), flow })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The collection's queue, for caller-defined work that must be ordered with the
    /// collection's own operations.
    pub fn flow(&self) -> &Flow<S> {
        &self.flow
    }
}
