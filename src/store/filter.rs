use crate::errors::DbError;
use crate::types::Document;
use bson::Bson;

// Safety limits to prevent resource abuse
pub(crate) const MAX_PATH_DEPTH: usize = 32;
pub(crate) const MAX_FILTER_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A query document compiled into a predicate tree.
#[derive(Debug, Clone)]
pub enum Filter {
    True,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Exists { path: String, exists: bool },
    In { path: String, values: Vec<Bson> },
    Nin { path: String, values: Vec<Bson> },
    Cmp { path: String, op: CmpOp, value: Bson },
    #[cfg(feature = "regex")]
    Regex { path: String, regex: regex::Regex },
}

impl Filter {
    /// Compile a Mongo-style query document.
    ///
    /// # Errors
    /// Returns [`DbError::Query`] for unknown operators, operator documents mixed with
    /// plain fields, or malformed operator arguments.
    pub fn parse(doc: &Document) -> Result<Self, DbError> {
        parse_doc(doc, 0)
    }
}

fn parse_doc(doc: &Document, depth: usize) -> Result<Filter, DbError> {
    if depth > MAX_FILTER_DEPTH {
        return Err(DbError::Query("filter nested too deeply".into()));
    }
    let mut clauses = Vec::with_capacity(doc.len());
    for (key, value) in doc {
        match key.as_str() {
            "$and" => clauses.push(Filter::And(parse_list(key, value, depth)?)),
            "$or" => clauses.push(Filter::Or(parse_list(key, value, depth)?)),
            "$not" => match value {
                Bson::Document(d) => clauses.push(Filter::Not(Box::new(parse_doc(d, depth + 1)?))),
                _ => return Err(DbError::Query("$not requires a document".into())),
            },
            k if k.starts_with('$') => {
                return Err(DbError::Query(format!("unknown logical operator {k}")));
            }
            path => parse_field(path, value, &mut clauses)?,
        }
    }
    Ok(match clauses.len() {
        0 => Filter::True,
        1 => clauses.remove(0),
        _ => Filter::And(clauses),
    })
}

fn parse_list(op: &str, value: &Bson, depth: usize) -> Result<Vec<Filter>, DbError> {
    let Bson::Array(items) = value else {
        return Err(DbError::Query(format!("{op} requires an array")));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => parse_doc(d, depth + 1),
            _ => Err(DbError::Query(format!("{op} entries must be documents"))),
        })
        .collect()
}

fn is_operator_doc(d: &Document) -> Result<bool, DbError> {
    let ops = d.keys().filter(|k| k.starts_with('$')).count();
    if ops > 0 && ops != d.len() {
        return Err(DbError::Query("cannot mix operators and normal fields".into()));
    }
    Ok(ops > 0)
}

fn parse_field(path: &str, value: &Bson, out: &mut Vec<Filter>) -> Result<(), DbError> {
    let Bson::Document(d) = value else {
        out.push(Filter::Cmp { path: path.to_string(), op: CmpOp::Eq, value: value.clone() });
        return Ok(());
    };
    if !is_operator_doc(d)? {
        out.push(Filter::Cmp { path: path.to_string(), op: CmpOp::Eq, value: value.clone() });
        return Ok(());
    }
    for (op, arg) in d {
        let path = path.to_string();
        let clause = match op.as_str() {
            "$eq" => Filter::Cmp { path, op: CmpOp::Eq, value: arg.clone() },
            "$ne" => Filter::Cmp { path, op: CmpOp::Ne, value: arg.clone() },
            "$gt" => Filter::Cmp { path, op: CmpOp::Gt, value: arg.clone() },
            "$gte" => Filter::Cmp { path, op: CmpOp::Gte, value: arg.clone() },
            "$lt" => Filter::Cmp { path, op: CmpOp::Lt, value: arg.clone() },
            "$lte" => Filter::Cmp { path, op: CmpOp::Lte, value: arg.clone() },
            "$in" | "$nin" => {
                let Bson::Array(values) = arg else {
                    return Err(DbError::Query(format!("{op} requires an array")));
                };
                let values = values.clone();
                if op == "$in" { Filter::In { path, values } } else { Filter::Nin { path, values } }
            }
            "$exists" => Filter::Exists { path, exists: truthy(arg) },
            #[cfg(feature = "regex")]
            "$regex" => {
                let Bson::String(pattern) = arg else {
                    return Err(DbError::Query("$regex requires a string".into()));
                };
                let regex =
                    regex::Regex::new(pattern).map_err(|e| DbError::Query(e.to_string()))?;
                Filter::Regex { path, regex }
            }
            other => return Err(DbError::Query(format!("unknown comparison operator {other}"))),
        };
        out.push(clause);
    }
    Ok(())
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        Bson::Null | Bson::Undefined => false,
        Bson::String(s) => !s.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn empty_document_matches_everything() {
        assert!(matches!(Filter::parse(&doc! {}).unwrap(), Filter::True));
    }

    #[test]
    fn operator_documents_expand_to_clauses() {
        let f = Filter::parse(&doc! {"age": {"$gte": 18, "$lt": 65}, "name": "x"}).unwrap();
        let Filter::And(clauses) = f else { panic!("expected And") };
        assert_eq!(clauses.len(), 3);
    }

    #[test]
    fn plain_subdocument_is_equality() {
        let f = Filter::parse(&doc! {"address": {"city": "Kyiv"}}).unwrap();
        assert!(matches!(f, Filter::Cmp { op: CmpOp::Eq, .. }));
    }

    #[test]
    fn malformed_filters_are_rejected() {
        assert!(Filter::parse(&doc! {"$where": "1"}).is_err());
        assert!(Filter::parse(&doc! {"a": {"$gt": 1, "b": 2}}).is_err());
        assert!(Filter::parse(&doc! {"a": {"$in": 3}}).is_err());
        assert!(Filter::parse(&doc! {"$or": {"a": 1}}).is_err());
        assert!(Filter::parse(&doc! {"a": {"$near": 1}}).is_err());
    }

    #[test]
    fn long_in_lists_are_kept_whole() {
        let values: Vec<i32> = (0..1500).collect();
        let parsed = Filter::parse(&doc! {"n": {"$in": values}}).unwrap();
        let Filter::In { values: kept, .. } = parsed else { panic!("expected In") };
        assert_eq!(kept.len(), 1500);
    }
}
