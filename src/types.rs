use bson::Bson;

pub type DocumentId = String;

/// Stored documents are plain BSON documents keyed by a string `_id`.
pub type Document = bson::Document;

/// Name of the identifier field every stored document carries.
pub const ID_FIELD: &str = "_id";

pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Returns the document's `_id` when it is a string.
#[must_use]
pub fn document_id(doc: &Document) -> Option<&str> {
    match doc.get(ID_FIELD) {
        Some(Bson::String(s)) => Some(s.as_str()),
        _ => None,
    }
}
