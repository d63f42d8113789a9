use crate::types::{Document, ID_FIELD, document_id};
use bson::Bson;

/// Caller-side view of one stored document.
///
/// Fields set on a record are written on the next save; `_id` is assigned on first save
/// when absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    doc: Document,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_document(doc: Document) -> Self {
        Self { doc }
    }

    pub fn id(&self) -> Option<&str> {
        document_id(&self.doc)
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.doc.insert(ID_FIELD, id);
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.doc.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.doc.get_str(key).ok()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> &mut Self {
        self.doc.insert(key.into(), value.into());
        self
    }

    pub fn remove_field(&mut self, key: &str) -> Option<Bson> {
        self.doc.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.doc.contains_key(key)
    }

    pub fn as_document(&self) -> &Document {
        &self.doc
    }

    #[must_use]
    pub fn into_document(self) -> Document {
        self.doc
    }

    /// Copy every field of `other` into this record. Fields of `other` win; fields only
    /// present here are kept.
    pub fn merge(&mut self, other: &Document) {
        for (k, v) in other {
            self.doc.insert(k.clone(), v.clone());
        }
    }
}

impl From<Document> for Record {
    fn from(doc: Document) -> Self {
        Self::from_document(doc)
    }
}

impl From<Record> for Document {
    fn from(r: Record) -> Self {
        r.doc
    }
}
