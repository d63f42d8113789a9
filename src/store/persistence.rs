//! Append-only datafile: one relaxed extended-JSON document per line.
//!
//! Special lines:
//! - `{"$$deleted": true, "_id": ...}` removes a document
//! - `{"$$indexCreated": {"fieldName": ..., "unique": ..., "sparse": ...}}`
//! - `{"$$indexRemoved": "<field>"}`

use crate::errors::DbError;
use crate::types::{Document, ID_FIELD};
use bson::{Bson, doc};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use super::IndexOptions;

pub(crate) const DELETED_KEY: &str = "$$deleted";
pub(crate) const INDEX_CREATED_KEY: &str = "$$indexCreated";
pub(crate) const INDEX_REMOVED_KEY: &str = "$$indexRemoved";

/// One decoded datafile line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Entry {
    Upsert(Document),
    Delete(String),
    IndexCreated(IndexOptions),
    IndexRemoved(String),
}

pub(crate) fn encode_document(doc: &Document) -> String {
    Bson::Document(doc.clone()).into_relaxed_extjson().to_string()
}

pub(crate) fn tombstone(id: &str) -> String {
    encode_document(&doc! { DELETED_KEY: true, ID_FIELD: id })
}

pub(crate) fn index_created(opts: &IndexOptions) -> String {
    encode_document(&doc! {
        INDEX_CREATED_KEY: {
            "fieldName": opts.field_name.as_str(),
            "unique": opts.unique,
            "sparse": opts.sparse,
        }
    })
}

pub(crate) fn index_removed(field: &str) -> String {
    encode_document(&doc! { INDEX_REMOVED_KEY: field })
}

pub(crate) fn decode_line(line: &str) -> Result<Entry, DbError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| DbError::Corruption(e.to_string()))?;
    let doc = match Bson::try_from(value).map_err(|e| DbError::Corruption(e.to_string()))? {
        Bson::Document(d) => d,
        other => return Err(DbError::Corruption(format!("expected a document, got {other}"))),
    };
    if doc.get_bool(DELETED_KEY).unwrap_or(false) {
        let id = doc
            .get_str(ID_FIELD)
            .map_err(|_| DbError::Corruption("tombstone without _id".into()))?;
        return Ok(Entry::Delete(id.to_string()));
    }
    if let Ok(spec) = doc.get_document(INDEX_CREATED_KEY) {
        let field_name = spec
            .get_str("fieldName")
            .map_err(|_| DbError::Corruption("index entry without fieldName".into()))?;
        return Ok(Entry::IndexCreated(IndexOptions {
            field_name: field_name.to_string(),
            unique: spec.get_bool("unique").unwrap_or(false),
            sparse: spec.get_bool("sparse").unwrap_or(false),
        }));
    }
    if let Ok(field) = doc.get_str(INDEX_REMOVED_KEY) {
        return Ok(Entry::IndexRemoved(field.to_string()));
    }
    if doc.get_str(ID_FIELD).is_err() {
        return Err(DbError::Corruption("document without string _id".into()));
    }
    Ok(Entry::Upsert(doc))
}

/// Read all non-blank lines; a missing file reads as empty.
pub(crate) fn read_entries(path: &Path) -> Result<Vec<Entry>, DbError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let mut out = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = decode_line(&line).map_err(|e| match e {
            DbError::Corruption(msg) => {
                DbError::Corruption(format!("{}:{}: {msg}", path.display(), n + 1))
            }
            other => other,
        })?;
        out.push(entry);
    }
    Ok(out)
}

pub(crate) fn append_lines(path: &Path, lines: &[String]) -> Result<(), DbError> {
    if lines.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut buf = String::new();
    for l in lines {
        buf.push_str(l);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Replace the datafile atomically via a temp file and rename.
pub(crate) fn rewrite(path: &Path, lines: &[String]) -> Result<(), DbError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("compact.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        for l in lines {
            file.write_all(l.as_bytes())?;
            file.write_all(b"\n")?;
        }
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
