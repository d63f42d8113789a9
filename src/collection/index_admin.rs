use super::core::Collection;
use crate::flow::Ticket;
use crate::store::{DocumentStore, IndexOptions};
use std::sync::Arc;

impl<S: DocumentStore> Collection<S> {
    pub fn ensure_index(&self, options: IndexOptions) -> Ticket<()> {
        log::debug!("collection {}: ensure index on {}", self.name(), options.field_name);
        self.flow.submit(move |store: Arc<S>| async move { store.ensure_index(options).await })
    }

    pub fn remove_index(&self, field_name: impl Into<String>) -> Ticket<()> {
        let field_name = field_name.into();
        self.flow.submit(move |store: Arc<S>| async move { store.remove_index(field_name).await })
    }

    /// Reload the store's persisted state, in order with everything queued before it.
    pub fn load(&self) -> Ticket<()> {
        self.flow.submit(|store: Arc<S>| async move { store.load().await })
    }
}
