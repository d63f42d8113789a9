use crate::errors::DbError;
use crate::types::{Document, ID_FIELD};
use bson::Bson;

use super::eval::get_path;

fn ensure_subdoc<'a>(root: &'a mut Document, key: &str) -> &'a mut Document {
    if !matches!(root.get(key), Some(Bson::Document(_))) {
        root.insert(key.to_string(), Bson::Document(Document::new()));
    }
    match root.get_mut(key) {
        Some(Bson::Document(d)) => d,
        _ => unreachable!("subdocument inserted above"),
    }
}

fn traverse_to_parent<'a>(root: &'a mut Document, path: &str) -> (&'a mut Document, String) {
    let mut cur = root;
    let mut iter = path.split('.').peekable();
    let mut last = String::new();
    while let Some(seg) = iter.next() {
        if iter.peek().is_none() {
            last = seg.to_string();
            break;
        }
        cur = ensure_subdoc(cur, seg);
    }
    (cur, last)
}

/// Set a dotted path, creating intermediate documents. Returns whether the value changed.
pub(crate) fn set_path(root: &mut Document, path: &str, value: Bson) -> bool {
    let (parent, last) = traverse_to_parent(root, path);
    let old = parent.insert(last, value.clone());
    old.as_ref() != Some(&value)
}

pub(crate) fn unset_path(root: &mut Document, path: &str) -> bool {
    let mut cur = root;
    let mut iter = path.split('.').peekable();
    while let Some(seg) = iter.next() {
        if iter.peek().is_none() {
            return cur.remove(seg).is_some();
        }
        match cur.get_mut(seg) {
            Some(Bson::Document(d)) => cur = d,
            _ => return false,
        }
    }
    false
}

/// Whether an update document is made of `$` modifiers rather than a replacement.
///
/// # Errors
/// Returns [`DbError::Query`] when modifiers and plain fields are mixed.
pub fn is_modifier_update(update: &Document) -> Result<bool, DbError> {
    let mods = update.keys().filter(|k| k.starts_with('$')).count();
    if mods > 0 && mods != update.len() {
        return Err(DbError::Query("cannot mix modifiers and normal fields".into()));
    }
    Ok(mods > 0)
}

fn inc_value(cur: Option<&Bson>, by: &Bson, path: &str) -> Result<Bson, DbError> {
    #[allow(clippy::cast_precision_loss)]
    let as_f64 = |b: &Bson| match b {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    };
    let as_i64 = |b: &Bson| match b {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        _ => None,
    };
    let cur = cur.cloned().unwrap_or(Bson::Int32(0));
    if as_f64(by).is_none() {
        return Err(DbError::Query(format!("$inc on {path} requires a number")));
    }
    let Some(base) = as_f64(&cur) else {
        return Err(DbError::Query(format!("cannot $inc non-numeric field {path}")));
    };
    Ok(match (&cur, by, as_i64(&cur), as_i64(by)) {
        (Bson::Int32(a), Bson::Int32(b), _, _) if a.checked_add(*b).is_some() => Bson::Int32(a + b),
        (_, _, Some(a), Some(b)) if a.checked_add(b).is_some() => Bson::Int64(a + b),
        _ => Bson::Double(base + as_f64(by).unwrap_or(0.0)),
    })
}

/// Apply `$set`, `$unset` and `$inc` modifiers to a copy of `doc`.
///
/// # Errors
/// Returns [`DbError::Query`] for unknown modifiers, malformed arguments, or attempts to
/// change `_id`.
pub fn apply_modifiers(doc: &Document, update: &Document) -> Result<Document, DbError> {
    let mut out = doc.clone();
    for (modifier, arg) in update {
        let Bson::Document(fields) = arg else {
            return Err(DbError::Query(format!("modifier {modifier} requires a document")));
        };
        for (path, value) in fields {
            if path == ID_FIELD {
                return Err(DbError::Query("cannot modify _id".into()));
            }
            match modifier.as_str() {
                "$set" => {
                    set_path(&mut out, path, value.clone());
                }
                "$unset" => {
                    unset_path(&mut out, path);
                }
                "$inc" => {
                    let next = inc_value(get_path(&out, path), value, path)?;
                    set_path(&mut out, path, next);
                }
                other => return Err(DbError::Query(format!("unknown modifier {other}"))),
            }
        }
    }
    Ok(out)
}

/// Replacement keeps the existing `_id`; a different `_id` in the replacement is an error.
///
/// # Errors
/// Returns [`DbError::Query`] when the replacement carries another `_id`.
pub fn replace_document(old: &Document, replacement: &Document) -> Result<Document, DbError> {
    let id = old.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
    if let Some(new_id) = replacement.get(ID_FIELD) {
        if *new_id != id {
            return Err(DbError::Query("cannot modify _id".into()));
        }
    }
    let mut out = Document::new();
    out.insert(ID_FIELD, id);
    for (k, v) in replacement {
        if k != ID_FIELD {
            out.insert(k.clone(), v.clone());
        }
    }
    Ok(out)
}

/// Seed for a modifier upsert: the plain equality fields of the filter.
#[must_use]
pub fn upsert_seed(filter: &Document) -> Document {
    let mut seed = Document::new();
    for (k, v) in filter {
        if k.starts_with('$') {
            continue;
        }
        if let Bson::Document(d) = v {
            if d.keys().any(|dk| dk.starts_with('$')) {
                continue;
            }
        }
        set_path(&mut seed, k, v.clone());
    }
    seed
}

/// Stored field names may not start with `$` or contain `.`.
///
/// # Errors
/// Returns [`DbError::Store`] naming the offending field.
pub fn check_field_names(doc: &Document) -> Result<(), DbError> {
    fn walk(v: &Bson) -> Result<(), DbError> {
        match v {
            Bson::Document(d) => check_field_names(d),
            Bson::Array(items) => items.iter().try_for_each(walk),
            _ => Ok(()),
        }
    }
    for (k, v) in doc {
        if k.starts_with('$') {
            return Err(DbError::Store(format!(
                "field names cannot begin with the $ character: {k}"
            )));
        }
        if k.contains('.') {
            return Err(DbError::Store(format!("field names cannot contain a '.': {k}")));
        }
        walk(v)?;
    }
    Ok(())
}
