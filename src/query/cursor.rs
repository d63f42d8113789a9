use crate::errors::DbError;
use crate::flow::{Flow, Ticket};
use crate::materialize::{QueryOutput, wrap_output};
use crate::store::{Cursor, CursorMethod, DocumentStore};
use crate::types::Document;
use std::sync::Arc;

use super::types::{CompiledQuery, Directive};

/// Chainable cursor over a collection's store.
///
/// Refinements only shape the cursor. [`CursorBuilder::execute`] hands it to the queue,
/// so the store sees it after every previously submitted task has settled.
pub struct CursorBuilder<S> {
    flow: Flow<S>,
    cursor: Cursor,
}

impl<S: DocumentStore> CursorBuilder<S> {
    #[must_use]
    pub fn new(flow: &Flow<S>, method: CursorMethod, filter: Document) -> Self {
        Self { flow: flow.clone(), cursor: Cursor::new(method, filter) }
    }

    /// Builder for a compiled query with its whole plan applied.
    #[must_use]
    pub fn from_compiled(flow: &Flow<S>, method: CursorMethod, compiled: CompiledQuery) -> Self {
        compiled
            .plan
            .into_iter()
            .fold(Self::new(flow, method, compiled.filter), Self::apply)
    }

    #[must_use]
    pub fn apply(self, directive: Directive) -> Self {
        match directive {
            Directive::Sort(spec) => self.sort(spec),
            Directive::Skip(n) => self.skip(n),
            Directive::Limit(n) => self.limit(n),
            Directive::Projection(spec) => self.projection(spec),
        }
    }

    #[must_use]
    pub fn sort(mut self, spec: Document) -> Self {
        self.cursor = self.cursor.sort(spec);
        self
    }

    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.cursor = self.cursor.skip(n);
        self
    }

    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.cursor = self.cursor.limit(n);
        self
    }

    #[must_use]
    pub fn projection(mut self, spec: Document) -> Self {
        self.cursor = self.cursor.projection(spec);
        self
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Queue the cursor for execution and materialize what it returns.
    pub fn execute(self) -> Ticket<QueryOutput> {
        self.execute_with(Ok)
    }

    /// Like [`CursorBuilder::execute`], with `finish` shaping the materialized output inside
    /// the queued task.
    pub fn execute_with<T: Send + 'static>(
        self,
        finish: fn(QueryOutput) -> Result<T, DbError>,
    ) -> Ticket<T> {
        let cursor = self.cursor;
        log::debug!("queueing {:?} cursor", cursor.method());
        self.flow.submit(move |store: Arc<S>| async move {
            let output = store.exec_cursor(cursor).await?;
            finish(wrap_output(output))
        })
    }
}

impl<S> std::fmt::Debug for CursorBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorBuilder").field("cursor", &self.cursor).finish()
    }
}
