use crate::errors::DbError;
use crate::types::{Document, ID_FIELD};
use bson::Bson;
use std::cmp::Ordering;

use super::filter::{CmpOp, Filter, MAX_PATH_DEPTH};
use super::update::{set_path, unset_path};

pub(crate) const MAX_SORT_FIELDS: usize = 8;
pub(crate) const MAX_PROJECTION_FIELDS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub order: Order,
}

pub fn eval_filter(doc: &Document, filter: &Filter) -> bool {
    match filter {
        Filter::True => true,
        Filter::And(fs) => fs.iter().all(|f| eval_filter(doc, f)),
        Filter::Or(fs) => fs.iter().any(|f| eval_filter(doc, f)),
        Filter::Not(f) => !eval_filter(doc, f),
        Filter::Exists { path, exists } => get_path(doc, path).is_some() == *exists,
        Filter::In { path, values } => get_path(doc, path).is_some_and(|v| is_in_set(v, values)),
        Filter::Nin { path, values } => !get_path(doc, path).is_some_and(|v| is_in_set(v, values)),
        Filter::Cmp { path, op, value } => {
            let found = get_path(doc, path);
            match op {
                CmpOp::Eq => found.is_some_and(|v| matches_eq(v, value)),
                CmpOp::Ne => !found.is_some_and(|v| matches_eq(v, value)),
                CmpOp::Gt => {
                    found.is_some_and(|v| any_ordered(v, value, |o| o == Ordering::Greater))
                }
                CmpOp::Gte => found.is_some_and(|v| any_ordered(v, value, |o| o != Ordering::Less)),
                CmpOp::Lt => found.is_some_and(|v| any_ordered(v, value, |o| o == Ordering::Less)),
                CmpOp::Lte => {
                    found.is_some_and(|v| any_ordered(v, value, |o| o != Ordering::Greater))
                }
            }
        }
        #[cfg(feature = "regex")]
        Filter::Regex { path, regex } => match get_path(doc, path) {
            Some(Bson::String(s)) => regex.is_match(s),
            Some(Bson::Array(items)) => {
                items.iter().any(|i| matches!(i, Bson::String(s) if regex.is_match(s)))
            }
            _ => false,
        },
    }
}

/// Equality with array-contains semantics: a scalar matches an array field holding it.
fn matches_eq(field: &Bson, value: &Bson) -> bool {
    if values_equal(field, value) {
        return true;
    }
    match (field, value) {
        (Bson::Array(items), v) if !matches!(v, Bson::Array(_)) => {
            items.iter().any(|i| values_equal(i, v))
        }
        _ => false,
    }
}

fn any_ordered(field: &Bson, value: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |x: &Bson| comparable(x, value) && accept(compare_bson(x, value));
    match field {
        Bson::Array(items) => items.iter().any(check),
        other => check(other),
    }
}

/// Range operators only apply between numbers, strings, or dates.
fn comparable(a: &Bson, b: &Bson) -> bool {
    let r = type_rank(a);
    r == type_rank(b) && matches!(r, 2 | 3 | 5)
}

fn is_in_set(v: &Bson, set: &[Bson]) -> bool {
    set.iter().any(|x| matches_eq(v, x))
}

/// Numeric values compare by value regardless of their BSON width.
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    if is_num(a) && is_num(b) {
        return as_f64_num(a) == as_f64_num(b);
    }
    a == b
}

pub(crate) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if path.is_empty() || path.len() > 1024 {
        return None;
    }
    let mut cur = doc;
    let mut parts = path.split('.').enumerate().peekable();
    while let Some((depth, part)) = parts.next() {
        if depth >= MAX_PATH_DEPTH {
            return None;
        }
        let v = cur.get(part)?;
        if parts.peek().is_none() {
            return Some(v);
        }
        match v {
            Bson::Document(d) => cur = d,
            _ => return None,
        }
    }
    None
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

#[allow(clippy::cast_precision_loss)]
fn as_f64_num(x: &Bson) -> f64 {
    match x {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        _ => f64::NAN,
    }
}

fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 2,
        Bson::String(_) => 3,
        Bson::Boolean(_) => 4,
        Bson::DateTime(_) => 5,
        Bson::Array(_) => 6,
        Bson::Document(_) => 7,
        _ => 8,
    }
}

/// Total order across BSON values: null < numbers < strings < booleans < dates < arrays
/// < documents < everything else.
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        _ if ra == 2 => as_f64_num(a).total_cmp(&as_f64_num(b)),
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (Bson::Array(x), Bson::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let o = compare_bson(ex, ey);
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Document(x), Bson::Document(y)) => {
            for ((kx, vx), (ky, vy)) in x.iter().zip(y.iter()) {
                let o = kx.cmp(ky).then_with(|| compare_bson(vx, vy));
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

/// Parse a `{field: 1 | -1}` sort specification.
///
/// # Errors
/// Returns [`DbError::Query`] when a direction is not 1 or -1, or when the spec names more
/// than `MAX_SORT_FIELDS` keys.
pub fn parse_sort(spec: &Document) -> Result<Vec<SortKey>, DbError> {
    if spec.len() > MAX_SORT_FIELDS {
        return Err(DbError::Query(format!(
            "sort on {} fields exceeds the limit of {MAX_SORT_FIELDS}",
            spec.len()
        )));
    }
    spec.iter()
        .map(|(field, dir)| {
            let order = match dir {
                Bson::Int32(1) | Bson::Int64(1) => Order::Asc,
                Bson::Int32(-1) | Bson::Int64(-1) => Order::Desc,
                Bson::Double(d) if *d == 1.0 => Order::Asc,
                Bson::Double(d) if *d == -1.0 => Order::Desc,
                other => {
                    return Err(DbError::Query(format!(
                        "invalid sort direction {other} for {field}"
                    )));
                }
            };
            Ok(SortKey { field: field.clone(), order })
        })
        .collect()
}

pub fn compare_docs(a: &Document, b: &Document, sort: &[SortKey]) -> Ordering {
    for s in sort {
        let ord = match (get_path(a, &s.field), get_path(b, &s.field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return if s.order == Order::Asc { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Keep only these paths; `_id` is kept unless `keep_id` is false.
    Include { fields: Vec<String>, keep_id: bool },
    Exclude { fields: Vec<String> },
}

impl Projection {
    /// Parse `{a: 1, b: 1}` (inclusion) or `{a: 0}` (exclusion). `_id: 0` may be combined
    /// with an inclusion. An empty spec yields `None`.
    ///
    /// # Errors
    /// Returns [`DbError::Query`] when inclusion and exclusion are mixed, or when the spec
    /// names more than `MAX_PROJECTION_FIELDS` fields.
    pub fn parse(spec: &Document) -> Result<Option<Self>, DbError> {
        if spec.len() > MAX_PROJECTION_FIELDS {
            return Err(DbError::Query(format!(
                "projection of {} fields exceeds the limit of {MAX_PROJECTION_FIELDS}",
                spec.len()
            )));
        }
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        let mut keep_id = true;
        for (field, v) in spec {
            let on = match v {
                Bson::Boolean(b) => *b,
                Bson::Int32(i) => *i != 0,
                Bson::Int64(i) => *i != 0,
                Bson::Double(d) => *d != 0.0,
                other => {
                    return Err(DbError::Query(format!(
                        "invalid projection value {other} for {field}"
                    )));
                }
            };
            if field == ID_FIELD {
                keep_id = on;
            } else if on {
                include.push(field.clone());
            } else {
                exclude.push(field.clone());
            }
        }
        if !include.is_empty() && !exclude.is_empty() {
            return Err(DbError::Query("cannot both keep and omit fields in a projection".into()));
        }
        Ok(if !include.is_empty() {
            Some(Self::Include { fields: include, keep_id })
        } else if !exclude.is_empty() || !keep_id {
            if !keep_id {
                exclude.push(ID_FIELD.to_string());
            }
            Some(Self::Exclude { fields: exclude })
        } else {
            None
        })
    }

    #[must_use]
    pub fn apply(&self, doc: &Document) -> Document {
        match self {
            Self::Include { fields, keep_id } => {
                let mut out = Document::new();
                if *keep_id && let Some(id) = doc.get(ID_FIELD) {
                    out.insert(ID_FIELD, id.clone());
                }
                for f in fields {
                    if let Some(v) = get_path(doc, f) {
                        set_path(&mut out, f, v.clone());
                    }
                }
                out
            }
            Self::Exclude { fields } => {
                let mut out = doc.clone();
                for f in fields {
                    unset_path(&mut out, f);
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn check(d: &Document, f: Document) -> bool {
        eval_filter(d, &Filter::parse(&f).unwrap())
    }

    #[test]
    fn equality_and_ranges() {
        let d = doc! {"planet": "Mars", "moons": 2, "tags": ["red", "dusty"], "info": {"g": 3.7}};
        assert!(check(&d, doc! {"planet": "Mars"}));
        assert!(check(&d, doc! {"moons": 2.0}));
        assert!(check(&d, doc! {"tags": "red"}));
        assert!(check(&d, doc! {"info.g": {"$gt": 3}}));
        assert!(!check(&d, doc! {"moons": {"$gt": "1"}}));
        assert!(check(&d, doc! {"planet": {"$ne": "Earth"}}));
        assert!(check(&d, doc! {"missing": {"$ne": 1}}));
        assert!(check(&d, doc! {"$or": [{"planet": "Earth"}, {"moons": {"$lte": 2}}]}));
        assert!(check(&d, doc! {"$not": {"planet": "Earth"}}));
        assert!(check(&d, doc! {"moons": {"$in": [1, 2]}, "planet": {"$nin": ["Earth"]}}));
        assert!(check(&d, doc! {"info": {"$exists": true}, "rings": {"$exists": false}}));
    }

    #[test]
    fn sort_orders_missing_first_and_mixes_types_by_rank() {
        let a = doc! {"n": 1};
        let b = doc! {"n": "x"};
        let c = doc! {};
        let keys = parse_sort(&doc! {"n": 1}).unwrap();
        assert_eq!(compare_docs(&a, &b, &keys), Ordering::Less);
        assert_eq!(compare_docs(&c, &a, &keys), Ordering::Less);
        let desc = parse_sort(&doc! {"n": -1}).unwrap();
        assert_eq!(compare_docs(&a, &b, &desc), Ordering::Greater);
        assert!(parse_sort(&doc! {"n": 2}).is_err());
    }

    #[test]
    fn projections() {
        let d = doc! {"_id": "1", "planet": "Mars", "system": "solar", "meta": {"a": 1, "b": 2}};
        let inc = Projection::parse(&doc! {"planet": 1, "meta.a": 1}).unwrap().unwrap();
        assert_eq!(inc.apply(&d), doc! {"_id": "1", "planet": "Mars", "meta": {"a": 1}});
        let no_id = Projection::parse(&doc! {"planet": 1, "_id": 0}).unwrap().unwrap();
        assert_eq!(no_id.apply(&d), doc! {"planet": "Mars"});
        let exc = Projection::parse(&doc! {"system": 0, "meta": 0}).unwrap().unwrap();
        assert_eq!(exc.apply(&d), doc! {"_id": "1", "planet": "Mars"});
        assert!(Projection::parse(&doc! {"planet": 1, "system": 0}).is_err());
        assert!(Projection::parse(&doc! {}).unwrap().is_none());
    }

    #[test]
    fn in_and_nin_consider_every_listed_value() {
        let d = doc! {"n": 1200};
        let values: Vec<i32> = (0..1500).collect();
        assert!(check(&d, doc! {"n": {"$in": values.clone()}}));
        assert!(!check(&d, doc! {"n": {"$nin": values}}));
    }

    #[test]
    fn oversized_sort_and_projection_specs_are_errors() {
        let mut sort = Document::new();
        for field in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            sort.insert(field, 1);
        }
        assert_eq!(parse_sort(&sort).unwrap().len(), MAX_SORT_FIELDS);
        sort.insert("i", 1);
        assert!(matches!(parse_sort(&sort), Err(DbError::Query(_))));

        let mut projection = Document::new();
        for i in 0..MAX_PROJECTION_FIELDS {
            projection.insert(format!("f{i}"), 1);
        }
        assert!(Projection::parse(&projection).unwrap().is_some());
        projection.insert("extra", 1);
        assert!(matches!(Projection::parse(&projection), Err(DbError::Query(_))));
    }
}
