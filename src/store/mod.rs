//! Document store interface and the bundled embedded implementation.

mod cursor;
mod datastore;
mod eval;
mod filter;
mod persistence;
mod update;

pub use cursor::{Cursor, CursorMethod, CursorOutput};
pub use datastore::Datastore;
pub use eval::{
    Order, Projection, SortKey, compare_bson, compare_docs, eval_filter, parse_sort, values_equal,
};
pub use filter::{CmpOp, Filter};
pub use update::{apply_modifiers, is_modifier_update, replace_document, upsert_seed};

use crate::errors::DbError;
use crate::types::{Document, DocumentId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Insert a new document when nothing matches.
    pub upsert: bool,
    /// Update every match instead of the first.
    pub multi: bool,
    /// Return the updated document(s) alongside the count.
    pub return_updated_docs: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOptions {
    pub multi: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOptions {
    pub field_name: String,
    pub unique: bool,
    /// Documents missing the field are not indexed (and not checked for uniqueness).
    pub sparse: bool,
}

impl IndexOptions {
    #[must_use]
    pub fn new(field_name: impl Into<String>) -> Self {
        Self { field_name: field_name.into(), ..Self::default() }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }
}

/// Outcome of an update. Depending on options the store reports the count alone or the
/// count together with the affected document(s).
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateResult<D> {
    Count(u64),
    Affected(u64, Option<D>),
    AffectedMany(u64, Vec<D>),
}

impl<D> UpdateResult<D> {
    pub fn count(&self) -> u64 {
        match self {
            Self::Count(n) | Self::Affected(n, _) | Self::AffectedMany(n, _) => *n,
        }
    }

    /// The single affected document, when the result carries one.
    pub fn document(&self) -> Option<&D> {
        match self {
            Self::Affected(_, d) => d.as_ref(),
            _ => None,
        }
    }

    pub fn map<E>(self, mut f: impl FnMut(D) -> E) -> UpdateResult<E> {
        match self {
            Self::Count(n) => UpdateResult::Count(n),
            Self::Affected(n, d) => UpdateResult::Affected(n, d.map(f)),
            Self::AffectedMany(n, ds) => {
                UpdateResult::AffectedMany(n, ds.into_iter().map(&mut f).collect())
            }
        }
    }
}

/// The storage collaborator driven by a collection's task queue.
///
/// Implementations need not be safe for overlapping mutating calls; the queue never issues
/// them concurrently.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// (Re)load persisted state.
    async fn load(&self) -> Result<(), DbError>;

    async fn find(&self, filter: Document) -> Result<Vec<Document>, DbError>;

    async fn find_one(&self, filter: Document) -> Result<Option<Document>, DbError>;

    async fn count(&self, filter: Document) -> Result<u64, DbError>;

    /// Unrefined cursor over `filter`. Refine it with the chainable methods on [`Cursor`].
    fn cursor(&self, method: CursorMethod, filter: Document) -> Cursor {
        Cursor::new(method, filter)
    }

    async fn exec_cursor(&self, cursor: Cursor) -> Result<CursorOutput, DbError>;

    async fn insert(&self, doc: Document) -> Result<Document, DbError>;

    async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Document>, DbError>;

    async fn update(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult<Document>, DbError>;

    async fn remove(&self, filter: Document, options: RemoveOptions) -> Result<u64, DbError>;

    async fn ensure_index(&self, options: IndexOptions) -> Result<(), DbError>;

    async fn remove_index(&self, field_name: String) -> Result<(), DbError>;

    /// Fresh document identifier.
    fn new_id() -> DocumentId
    where
        Self: Sized,
    {
        uuid::Uuid::new_v4().simple().to_string()
    }
}
