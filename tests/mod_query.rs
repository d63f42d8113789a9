use async_trait::async_trait;
use bson::doc;
use parking_lot::Mutex;
use recordflow::errors::DbError;
use recordflow::materialize::QueryOutput;
use recordflow::query::{self, CursorBuilder, Directive, Query, compile};
use recordflow::store::{
    Cursor, CursorMethod, CursorOutput, Datastore, DocumentStore, IndexOptions, RemoveOptions,
    UpdateOptions, UpdateResult,
};
use recordflow::types::Document;
use recordflow::{Collection, Flow};
use std::sync::Arc;

/// Datastore wrapper recording which primitive each query reached.
struct Recording {
    inner: Datastore,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recording {
    fn note(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl DocumentStore for Recording {
    async fn load(&self) -> Result<(), DbError> {
        self.note("load");
        self.inner.load().await
    }

    async fn find(&self, filter: Document) -> Result<Vec<Document>, DbError> {
        self.note("find");
        self.inner.find(filter).await
    }

    async fn find_one(&self, filter: Document) -> Result<Option<Document>, DbError> {
        self.note("find_one");
        self.inner.find_one(filter).await
    }

    async fn count(&self, filter: Document) -> Result<u64, DbError> {
        self.note("count");
        self.inner.count(filter).await
    }

    async fn exec_cursor(&self, cursor: Cursor) -> Result<CursorOutput, DbError> {
        self.note(format!("exec_cursor:{:?}", cursor.method()));
        self.inner.exec_cursor(cursor).await
    }

    async fn insert(&self, doc: Document) -> Result<Document, DbError> {
        self.inner.insert(doc).await
    }

    async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Document>, DbError> {
        self.inner.insert_many(docs).await
    }

    async fn update(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult<Document>, DbError> {
        self.inner.update(filter, update, options).await
    }

    async fn remove(&self, filter: Document, options: RemoveOptions) -> Result<u64, DbError> {
        self.inner.remove(filter, options).await
    }

    async fn ensure_index(&self, options: IndexOptions) -> Result<(), DbError> {
        self.inner.ensure_index(options).await
    }

    async fn remove_index(&self, field_name: String) -> Result<(), DbError> {
        self.inner.remove_index(field_name).await
    }
}

fn recording(autoload: bool) -> (Collection<Recording>, Arc<Mutex<Vec<String>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let store = Recording { inner: Datastore::in_memory("planets"), calls: Arc::clone(&calls) };
    (Collection::with_store("planets", store, autoload).unwrap(), calls)
}

#[tokio::test]
async fn directives_route_through_the_cursor() {
    let (planets, calls) = recording(false);
    planets.insert_many([doc! {"planet": "Mars"}, doc! {"planet": "Earth"}]).await.unwrap();

    planets.find(doc! {"planet": "Mars"}).await.unwrap();
    planets.find(doc! {"$$sort": {"planet": 1}}).await.unwrap();
    planets.find_projected(doc! {}, doc! {"planet": 1}).await.unwrap();
    planets.find_one(doc! {}).await.unwrap();
    planets.find_one(doc! {"$$skip": 1}).await.unwrap();
    planets.count(doc! {}).await.unwrap();
    planets.count(doc! {"$$limit": 1}).await.unwrap();

    assert_eq!(
        *calls.lock(),
        vec![
            "find",
            "exec_cursor:Find",
            "exec_cursor:Find",
            "find_one",
            "exec_cursor:FindOne",
            "count",
            "exec_cursor:Count",
        ]
    );
}

#[tokio::test]
async fn autoload_is_the_first_task() {
    let (planets, calls) = recording(true);
    assert_eq!(planets.count(doc! {}).await.unwrap(), 0);
    assert_eq!(*calls.lock(), vec!["load", "count"]);
}

#[tokio::test]
async fn builder_chains_refinements_and_executes_in_queue_order() {
    let flow = Flow::with_store(Datastore::in_memory("nums")).unwrap();
    for n in [5, 3, 9, 1, 7] {
        let _ = flow.submit(move |s: Arc<Datastore>| async move { s.insert(doc! {"n": n}).await });
    }
    let out = CursorBuilder::new(&flow, CursorMethod::Find, doc! {"n": {"$gt": 1}})
        .sort(doc! {"n": -1})
        .skip(1)
        .limit(2)
        .projection(doc! {"_id": 0})
        .execute()
        .await
        .unwrap();
    let QueryOutput::Records(records) = out else { panic!("expected records") };
    let ns: Vec<i32> =
        records.iter().filter_map(|r| r.get("n").and_then(bson::Bson::as_i32)).collect();
    assert_eq!(ns, vec![7, 5]);
    assert!(records.iter().all(|r| r.id().is_none()));
}

#[tokio::test]
async fn compiled_plan_matches_manual_chain() {
    let flow = Flow::with_store(Datastore::in_memory("nums")).unwrap();
    let docs: Vec<Document> = (0..10).map(|n| doc! {"n": n}).collect();
    flow.submit(|s: Arc<Datastore>| async move { s.insert_many(docs).await }).await.unwrap();

    let src = doc! {"$$limit": 3, "n": {"$lt": 8}, "$$skip": 2, "$$sort": {"n": -1}};
    let q = Query::from_document(src).unwrap();
    let compiled = compile(q, None);
    let manual = CursorBuilder::new(&flow, CursorMethod::Find, compiled.filter.clone())
        .sort(doc! {"n": -1})
        .skip(2)
        .limit(3);
    assert_eq!(
        CursorBuilder::from_compiled(&flow, CursorMethod::Find, compiled.clone()).cursor(),
        manual.cursor()
    );

    let out =
        query::run(&flow, CursorMethod::Find, compiled, QueryOutput::into_records).await.unwrap();
    let ns: Vec<i32> = out.iter().filter_map(|r| r.get("n").and_then(bson::Bson::as_i32)).collect();
    assert_eq!(ns, vec![5, 4, 3]);
}

#[test]
fn query_document_extracts_in_fixed_order() {
    let q = Query::from_document(doc! {"$$limit": 2, "name": "x", "$$sort": {"age": 1}}).unwrap();
    let compiled = compile(q, None);
    assert_eq!(compiled.filter, doc! {"name": "x"});
    assert_eq!(
        compiled.plan.into_iter().collect::<Vec<_>>(),
        vec![Directive::Sort(doc! {"age": 1}), Directive::Limit(2)]
    );
}
