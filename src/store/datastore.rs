use crate::config::StoreConfig;
use crate::errors::DbError;
use crate::types::{CREATED_AT_FIELD, Document, DocumentId, ID_FIELD, UPDATED_AT_FIELD, document_id};
use async_trait::async_trait;
use bson::Bson;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::eval::{Projection, compare_docs, eval_filter, get_path, parse_sort};
use super::filter::Filter;
use super::persistence::{self, Entry};
use super::update::{
    apply_modifiers, check_field_names, is_modifier_update, replace_document, upsert_seed,
};
use super::{
    Cursor, CursorMethod, CursorOutput, DocumentStore, IndexOptions, RemoveOptions, UpdateOptions,
    UpdateResult,
};

/// Embedded single-collection document store.
///
/// Documents live in memory in insertion order. Unless the config is in-memory only, every
/// mutation is appended to `{location}/{name}.{format}` before it is applied, and the file is
/// replayed on load. File-backed operations run on tokio's blocking pool; clones share one
/// store.
#[derive(Clone)]
pub struct Datastore {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    filename: Option<PathBuf>,
    timestamp_data: bool,
    compact_on_load: bool,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    loaded: bool,
    next_seq: u64,
    docs: BTreeMap<u64, Document>,
    by_id: HashMap<DocumentId, u64>,
    indexes: BTreeMap<String, IndexOptions>,
}

impl State {
    fn put(&mut self, id: &str, doc: Document) {
        if let Some(seq) = self.by_id.get(id) {
            self.docs.insert(*seq, doc);
        } else {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.by_id.insert(id.to_string(), seq);
            self.docs.insert(seq, doc);
        }
    }

    fn delete(&mut self, id: &str) -> Option<Document> {
        let seq = self.by_id.remove(id)?;
        self.docs.remove(&seq)
    }

    fn matching(&self, filter: &Filter) -> impl Iterator<Item = (u64, &Document)> {
        self.docs.iter().filter(move |(_, d)| eval_filter(d, filter)).map(|(s, d)| (*s, d))
    }

    fn apply(&mut self, entry: Entry) {
        match entry {
            Entry::Upsert(doc) => {
                if let Some(id) = document_id(&doc).map(str::to_string) {
                    self.put(&id, doc);
                }
            }
            Entry::Delete(id) => {
                self.delete(&id);
            }
            Entry::IndexCreated(opts) => {
                self.indexes.insert(opts.field_name.clone(), opts);
            }
            Entry::IndexRemoved(field) => {
                self.indexes.remove(&field);
            }
        }
    }
}

fn now() -> Bson {
    Bson::DateTime(bson::DateTime::from_millis(Utc::now().timestamp_millis()))
}

fn index_key(v: &Bson) -> String {
    match v {
        Bson::Int32(i) => format!("n:{}", f64::from(*i)),
        #[allow(clippy::cast_precision_loss)]
        Bson::Int64(i) => format!("n:{}", *i as f64),
        Bson::Double(d) => format!("n:{d}"),
        other => other.clone().into_relaxed_extjson().to_string(),
    }
}

impl Datastore {
    /// Store for collection `name`, persisted according to `config`.
    #[must_use]
    pub fn new(name: &str, config: &StoreConfig) -> Self {
        let filename = (!config.in_memory_only).then(|| config.filename_for(name));
        let shared = Shared {
            name: name.to_string(),
            filename,
            timestamp_data: config.timestamp_data,
            compact_on_load: config.compact_on_load,
            state: Mutex::new(State::default()),
        };
        Self { shared: Arc::new(shared) }
    }

    #[must_use]
    pub fn in_memory(name: &str) -> Self {
        Self::new(name, &StoreConfig::in_memory())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn filename(&self) -> Option<&Path> {
        self.shared.filename.as_deref()
    }

    /// Run `op` against the store. With a datafile behind it `op` may touch the disk, so it
    /// moves to the blocking pool; in-memory stores run it inline.
    async fn run<T, F>(&self, op: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&Shared) -> Result<T, DbError> + Send + 'static,
    {
        if self.shared.filename.is_none() {
            return op(&self.shared);
        }
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || op(&shared)).await.map_err(|e| {
            DbError::TaskAborted(format!("{}: blocking store task failed: {e}", self.name()))
        })?
    }
}

impl Shared {
    fn persist(&self, lines: &[String]) -> Result<(), DbError> {
        match &self.filename {
            Some(path) => persistence::append_lines(path, lines).inspect_err(|e| {
                log::error!("datafile append failed for {}: {e}", self.name);
            }),
            None => Ok(()),
        }
    }

    fn snapshot_lines(state: &State) -> Vec<String> {
        let mut lines: Vec<String> =
            state.docs.values().map(persistence::encode_document).collect();
        lines.extend(state.indexes.values().map(persistence::index_created));
        lines
    }

    fn load_into(&self, state: &mut State) -> Result<(), DbError> {
        let mut fresh = State::default();
        if let Some(path) = &self.filename {
            let entries = persistence::read_entries(path)?;
            let replayed = entries.len();
            for entry in entries {
                fresh.apply(entry);
            }
            Self::check_unique(&fresh, &HashMap::new(), &[])?;
            if self.compact_on_load && replayed > 0 {
                persistence::rewrite(path, &Self::snapshot_lines(&fresh))?;
            }
            log::info!(
                "loaded {} documents ({replayed} lines) for {} from {}",
                fresh.docs.len(),
                self.name,
                path.display()
            );
        }
        fresh.loaded = true;
        *state = fresh;
        Ok(())
    }

    fn ensure_loaded(&self, state: &mut State) -> Result<(), DbError> {
        if state.loaded { Ok(()) } else { self.load_into(state) }
    }

    /// Verify every unique index over the state as it would look after applying `changed`
    /// (seq -> replacement document) and inserting `added`.
    fn check_unique(
        state: &State,
        changed: &HashMap<u64, Document>,
        added: &[Document],
    ) -> Result<(), DbError> {
        for opts in state.indexes.values().filter(|o| o.unique) {
            let mut seen = HashSet::new();
            let docs = state
                .docs
                .iter()
                .map(|(seq, d)| changed.get(seq).unwrap_or(d))
                .chain(added.iter());
            for doc in docs {
                let key = match get_path(doc, &opts.field_name) {
                    Some(v) => index_key(v),
                    None if opts.sparse => continue,
                    None => "undefined".to_string(),
                };
                if !seen.insert(key) {
                    return Err(DbError::ConstraintViolation(format!(
                        "unique index on '{}' violated",
                        opts.field_name
                    )));
                }
            }
        }
        Ok(())
    }

    fn prepare_insert(&self, mut doc: Document) -> Result<(String, Document), DbError> {
        check_field_names(&doc)?;
        let id = match doc.get(ID_FIELD) {
            None => {
                let id = Datastore::new_id();
                doc.insert(ID_FIELD, id.clone());
                id
            }
            Some(Bson::String(s)) => s.clone(),
            Some(other) => return Err(DbError::Store(format!("_id must be a string, got {other}"))),
        };
        if self.timestamp_data {
            let ts = now();
            if !doc.contains_key(CREATED_AT_FIELD) {
                doc.insert(CREATED_AT_FIELD, ts.clone());
            }
            if !doc.contains_key(UPDATED_AT_FIELD) {
                doc.insert(UPDATED_AT_FIELD, ts);
            }
        }
        Ok((id, doc))
    }

    fn insert_locked(
        &self,
        state: &mut State,
        docs: Vec<Document>,
    ) -> Result<Vec<Document>, DbError> {
        let prepared = docs
            .into_iter()
            .map(|d| self.prepare_insert(d))
            .collect::<Result<Vec<_>, _>>()?;
        let mut batch_ids = HashSet::new();
        for (id, _) in &prepared {
            if state.by_id.contains_key(id) || !batch_ids.insert(id.as_str()) {
                return Err(DbError::ConstraintViolation(format!("duplicate _id {id}")));
            }
        }
        let added: Vec<Document> = prepared.iter().map(|(_, d)| d.clone()).collect();
        Self::check_unique(state, &HashMap::new(), &added)?;
        let lines: Vec<String> = added.iter().map(persistence::encode_document).collect();
        self.persist(&lines)?;
        for (id, doc) in prepared {
            state.put(&id, doc);
        }
        log::debug!("{}: inserted {} document(s)", self.name, added.len());
        Ok(added)
    }

    fn insert_sync(&self, docs: Vec<Document>) -> Result<Vec<Document>, DbError> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        self.insert_locked(&mut state, docs)
    }

    fn find_sync(&self, filter: &Document, first_only: bool) -> Result<Vec<Document>, DbError> {
        let filter = Filter::parse(filter)?;
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        let it = state.matching(&filter).map(|(_, d)| d.clone());
        Ok(if first_only { it.take(1).collect() } else { it.collect() })
    }

    fn count_sync(&self, filter: &Document) -> Result<u64, DbError> {
        let filter = Filter::parse(filter)?;
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        Ok(state.matching(&filter).count() as u64)
    }

    fn exec_cursor_sync(&self, cursor: &Cursor) -> Result<CursorOutput, DbError> {
        let filter = Filter::parse(cursor.filter())?;
        let sort = cursor.sort_spec().map(parse_sort).transpose()?;
        let projection = match cursor.projection_spec() {
            Some(spec) if cursor.method() != CursorMethod::Count => Projection::parse(spec)?,
            _ => None,
        };
        let mut docs: Vec<Document> = {
            let mut state = self.state.lock();
            self.ensure_loaded(&mut state)?;
            state.matching(&filter).map(|(_, d)| d.clone()).collect()
        };
        if let Some(keys) = &sort {
            docs.sort_by(|a, b| compare_docs(a, b, keys));
        }
        let skip = cursor.skip_count().unwrap_or(0);
        let limit = cursor.limit_count().unwrap_or(usize::MAX);
        let mut docs: Vec<Document> = docs.into_iter().skip(skip).take(limit).collect();
        if let Some(p) = &projection {
            docs = docs.iter().map(|d| p.apply(d)).collect();
        }
        Ok(match cursor.method() {
            CursorMethod::Find => CursorOutput::Many(docs),
            CursorMethod::FindOne => CursorOutput::One(docs.into_iter().next()),
            CursorMethod::Count => CursorOutput::Count(docs.len() as u64),
        })
    }

    fn update_sync(
        &self,
        filter_doc: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult<Document>, DbError> {
        let filter = Filter::parse(filter_doc)?;
        let modifier = is_modifier_update(update)?;
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;

        let targets: Vec<(u64, Document)> = {
            let it = state.matching(&filter).map(|(s, d)| (s, d.clone()));
            if options.multi { it.collect() } else { it.take(1).collect() }
        };

        if targets.is_empty() && options.upsert {
            let seed = if modifier {
                apply_modifiers(&upsert_seed(filter_doc), update)?
            } else {
                update.clone()
            };
            let inserted = self.insert_locked(&mut state, vec![seed])?;
            return Ok(UpdateResult::Affected(1, inserted.into_iter().next()));
        }

        let mut changed: HashMap<u64, Document> = HashMap::with_capacity(targets.len());
        let mut order = Vec::with_capacity(targets.len());
        for (seq, old) in &targets {
            let mut new_doc = if modifier {
                apply_modifiers(old, update)?
            } else {
                replace_document(old, update)?
            };
            check_field_names(&new_doc)?;
            if self.timestamp_data {
                match old.get(CREATED_AT_FIELD) {
                    Some(created) => {
                        new_doc.insert(CREATED_AT_FIELD, created.clone());
                    }
                    None => {
                        new_doc.remove(CREATED_AT_FIELD);
                    }
                }
                new_doc.insert(UPDATED_AT_FIELD, now());
            }
            order.push(*seq);
            changed.insert(*seq, new_doc);
        }
        Self::check_unique(&state, &changed, &[])?;
        let lines: Vec<String> = order
            .iter()
            .filter_map(|s| changed.get(s))
            .map(persistence::encode_document)
            .collect();
        self.persist(&lines)?;

        let mut updated = Vec::with_capacity(order.len());
        for seq in order {
            if let Some(doc) = changed.remove(&seq) {
                state.docs.insert(seq, doc.clone());
                updated.push(doc);
            }
        }
        let n = updated.len() as u64;
        log::debug!("{}: updated {n} document(s)", self.name);
        Ok(match (options.return_updated_docs, options.multi) {
            (false, _) => UpdateResult::Count(n),
            (true, false) => UpdateResult::Affected(n, updated.into_iter().next()),
            (true, true) => UpdateResult::AffectedMany(n, updated),
        })
    }

    fn remove_sync(&self, filter: &Document, options: RemoveOptions) -> Result<u64, DbError> {
        let filter = Filter::parse(filter)?;
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        let ids: Vec<String> = {
            let it =
                state.matching(&filter).filter_map(|(_, d)| document_id(d).map(str::to_string));
            if options.multi { it.collect() } else { it.take(1).collect() }
        };
        let lines: Vec<String> = ids.iter().map(|id| persistence::tombstone(id)).collect();
        self.persist(&lines)?;
        for id in &ids {
            state.delete(id);
        }
        log::debug!("{}: removed {} document(s)", self.name, ids.len());
        Ok(ids.len() as u64)
    }

    fn ensure_index_sync(&self, options: IndexOptions) -> Result<(), DbError> {
        if options.field_name.trim().is_empty() {
            return Err(DbError::Store("cannot create an index without a fieldName".into()));
        }
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        if state.indexes.get(&options.field_name) == Some(&options) {
            return Ok(());
        }
        let previous = state.indexes.insert(options.field_name.clone(), options.clone());
        if let Err(e) = Self::check_unique(&state, &HashMap::new(), &[])
            .and_then(|()| self.persist(&[persistence::index_created(&options)]))
        {
            match previous {
                Some(p) => state.indexes.insert(options.field_name.clone(), p),
                None => state.indexes.remove(&options.field_name),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_index_sync(&self, field_name: &str) -> Result<(), DbError> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        self.persist(&[persistence::index_removed(field_name)])?;
        state.indexes.remove(field_name);
        Ok(())
    }

    fn load_sync(&self) -> Result<(), DbError> {
        let mut state = self.state.lock();
        self.load_into(&mut state)
    }
}

#[async_trait]
impl DocumentStore for Datastore {
    async fn load(&self) -> Result<(), DbError> {
        self.run(Shared::load_sync).await
    }

    async fn find(&self, filter: Document) -> Result<Vec<Document>, DbError> {
        self.run(move |s| s.find_sync(&filter, false)).await
    }

    async fn find_one(&self, filter: Document) -> Result<Option<Document>, DbError> {
        let found = self.run(move |s| s.find_sync(&filter, true)).await?;
        Ok(found.into_iter().next())
    }

    async fn count(&self, filter: Document) -> Result<u64, DbError> {
        self.run(move |s| s.count_sync(&filter)).await
    }

    async fn exec_cursor(&self, cursor: Cursor) -> Result<CursorOutput, DbError> {
        self.run(move |s| s.exec_cursor_sync(&cursor)).await
    }

    async fn insert(&self, doc: Document) -> Result<Document, DbError> {
        self.run(move |s| s.insert_sync(vec![doc]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Store("insert returned no document".into()))
    }

    async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Document>, DbError> {
        self.run(move |s| s.insert_sync(docs)).await
    }

    async fn update(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult<Document>, DbError> {
        self.run(move |s| s.update_sync(&filter, &update, options)).await
    }

    async fn remove(&self, filter: Document, options: RemoveOptions) -> Result<u64, DbError> {
        self.run(move |s| s.remove_sync(&filter, options)).await
    }

    async fn ensure_index(&self, options: IndexOptions) -> Result<(), DbError> {
        self.run(move |s| s.ensure_index_sync(options)).await
    }

    async fn remove_index(&self, field_name: String) -> Result<(), DbError> {
        self.run(move |s| s.remove_index_sync(&field_name)).await
    }
}
