use super::core::Collection;
use crate::errors::DbError;
use crate::flow::Ticket;
use crate::materialize::{QueryOutput, wrap_many, wrap_update_result};
use crate::query::{self, IntoQuery, compile};
use crate::record::Record;
use crate::store::{
    CursorMethod, DocumentStore, Projection, RemoveOptions, UpdateOptions, UpdateResult,
};
use crate::types::{Document, ID_FIELD};
use bson::doc;
use std::future::Future;
use std::sync::Arc;

impl<S: DocumentStore> Collection<S> {
    /// A record holding `fields`, with an `_id` assigned right away unless one is given.
    /// Nothing is stored until it is saved.
    #[must_use]
    pub fn new_record(&self, fields: Document) -> Record {
        let mut record = Record::from_document(fields);
        if record.id().is_none() {
            record.set_id(S::new_id());
        }
        record
    }

    /// Upsert `record` by its `_id`, assigning one first if it has none.
    ///
    /// The task is queued immediately. When it succeeds the stored document's fields are
    /// merged back into `record`; on failure `record` keeps only the assigned `_id`.
    pub fn save<'r>(
        &self,
        record: &'r mut Record,
    ) -> impl Future<Output = Result<UpdateResult<Record>, DbError>> + Send + use<'r, S> {
        let id = match record.id() {
            Some(id) => id.to_string(),
            None => {
                let id = S::new_id();
                record.set_id(id.clone());
                id
            }
        };
        let options = UpdateOptions { upsert: true, multi: false, return_updated_docs: true };
        let ticket = self.update(doc! { ID_FIELD: id }, record.as_document().clone(), options);
        async move {
            let result = ticket.await?;
            if let Some(saved) = result.document() {
                record.merge(saved.as_document());
            }
            Ok(result)
        }
    }

    /// Remove the stored document behind `record`. A record that was never given an `_id`
    /// removes nothing.
    pub fn remove_record(&self, record: &Record) -> Ticket<u64> {
        match record.id() {
            Some(id) => self.remove(doc! { ID_FIELD: id }, RemoveOptions::default()),
            None => self.flow.execute(|| async { Ok(0) }),
        }
    }

    fn run_query<Q: IntoQuery, T: Send + 'static>(
        &self,
        method: CursorMethod,
        query: Q,
        projection: Option<Document>,
        finish: fn(QueryOutput) -> Result<T, DbError>,
    ) -> Ticket<T> {
        let checked = query.into_query().and_then(|q| {
            if let Some(spec) = &projection {
                Projection::parse(spec)?;
            }
            Ok(q)
        });
        match checked {
            Ok(q) => query::run(&self.flow, method, compile(q, projection), finish),
            Err(e) => {
                log::warn!("collection {}: rejected query: {e}", self.name());
                Ticket::rejected(e)
            }
        }
    }

    /// Records matching `query`, which may carry `$$sort`, `$$skip`, `$$limit` and
    /// `$$projection` controls.
    pub fn find<Q: IntoQuery>(&self, query: Q) -> Ticket<Vec<Record>> {
        self.run_query(CursorMethod::Find, query, None, QueryOutput::into_records)
    }

    /// [`Collection::find`] with a projection that overrides any `$$projection` in `query`.
    pub fn find_projected<Q: IntoQuery>(
        &self,
        query: Q,
        projection: Document,
    ) -> Ticket<Vec<Record>> {
        self.run_query(CursorMethod::Find, query, Some(projection), QueryOutput::into_records)
    }

    pub fn find_one<Q: IntoQuery>(&self, query: Q) -> Ticket<Option<Record>> {
        self.run_query(CursorMethod::FindOne, query, None, QueryOutput::into_record)
    }

    pub fn find_one_projected<Q: IntoQuery>(
        &self,
        query: Q,
        projection: Document,
    ) -> Ticket<Option<Record>> {
        self.run_query(CursorMethod::FindOne, query, Some(projection), QueryOutput::into_record)
    }

    pub fn count<Q: IntoQuery>(&self, query: Q) -> Ticket<u64> {
        self.run_query(CursorMethod::Count, query, None, QueryOutput::into_count)
    }

    pub fn insert<D: Into<Document>>(&self, doc: D) -> Ticket<Record> {
        let doc = doc.into();
        self.flow.submit(move |store: Arc<S>| async move {
            store.insert(doc).await.map(Record::from_document)
        })
    }

    /// Insert several documents in one task; either all are stored or none.
    pub fn insert_many<I, D>(&self, docs: I) -> Ticket<Vec<Record>>
    where
        I: IntoIterator<Item = D>,
        D: Into<Document>,
    {
        let docs: Vec<Document> = docs.into_iter().map(Into::into).collect();
        self.flow.submit(move |store: Arc<S>| async move {
            store.insert_many(docs).await.map(wrap_many)
        })
    }

    pub fn update(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Ticket<UpdateResult<Record>> {
        self.flow.submit(move |store: Arc<S>| async move {
            store.update(filter, update, options).await.map(wrap_update_result)
        })
    }

    /// Number of documents removed.
    pub fn remove(&self, filter: Document, options: RemoveOptions) -> Ticket<u64> {
        self.flow.submit(move |store: Arc<S>| async move { store.remove(filter, options).await })
    }
}
