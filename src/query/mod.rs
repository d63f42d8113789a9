//! Query documents, cursor plans and their execution through a collection's queue.

mod compile;
mod cursor;
mod types;

pub use compile::{IntoQuery, compile};
pub use cursor::CursorBuilder;
pub use types::{
    CompiledQuery, CursorPlan, Directive, LIMIT_KEY, PROJECTION_KEY, Query, SKIP_KEY, SORT_KEY,
};

use crate::errors::DbError;
use crate::flow::{Flow, Ticket};
use crate::materialize::{QueryOutput, wrap, wrap_many};
use crate::store::{CursorMethod, DocumentStore};
use std::sync::Arc;

/// Queue a compiled query.
///
/// A non-empty plan goes through a store cursor; otherwise the plain store call runs.
/// Either way the output is materialized into records and passed to `finish` inside the
/// queued task.
pub fn run<S, T>(
    flow: &Flow<S>,
    method: CursorMethod,
    compiled: CompiledQuery,
    finish: fn(QueryOutput) -> Result<T, DbError>,
) -> Ticket<T>
where
    S: DocumentStore,
    T: Send + 'static,
{
    if compiled.needs_cursor() {
        return CursorBuilder::from_compiled(flow, method, compiled).execute_with(finish);
    }
    let filter = compiled.filter;
    flow.submit(move |store: Arc<S>| async move {
        let output = match method {
            CursorMethod::Find => QueryOutput::Records(wrap_many(store.find(filter).await?)),
            CursorMethod::FindOne => QueryOutput::Record(wrap(store.find_one(filter).await?)),
            CursorMethod::Count => QueryOutput::Count(store.count(filter).await?),
        };
        finish(output)
    })
}
