use crate::errors::DbError;
use crate::store::{Projection, parse_sort};
use crate::types::Document;
use bson::Bson;

use super::types::{
    CompiledQuery, CursorPlan, Directive, LIMIT_KEY, PROJECTION_KEY, Query, SKIP_KEY, SORT_KEY,
};

fn count_arg(key: &str, value: Bson) -> Result<usize, DbError> {
    let n = match value {
        Bson::Int32(i) => i64::from(i),
        Bson::Int64(i) => i,
        #[allow(clippy::cast_possible_truncation)]
        Bson::Double(d) if d.fract() == 0.0 && d.is_finite() => d as i64,
        other => return Err(DbError::Query(format!("{key} must be an integer, got {other}"))),
    };
    usize::try_from(n).map_err(|_| DbError::Query(format!("{key} must not be negative, got {n}")))
}

fn doc_arg(key: &str, value: Bson) -> Result<Document, DbError> {
    match value {
        Bson::Document(d) => Ok(d),
        other => Err(DbError::Query(format!("{key} must be a document, got {other}"))),
    }
}

impl Query {
    /// Split a query document into its filter and its `$$` cursor controls.
    ///
    /// Key order in the source document is irrelevant. The residual filter holds every other
    /// key unchanged and is `None` when nothing is left.
    ///
    /// # Errors
    /// Returns [`DbError::Query`] for a non-integer or negative `$$skip`/`$$limit`, a
    /// non-document `$$sort`/`$$projection`, or a sort direction other than 1 / -1.
    pub fn from_document(mut doc: Document) -> Result<Self, DbError> {
        let sort = doc.remove(SORT_KEY).map(|v| doc_arg(SORT_KEY, v)).transpose()?;
        let skip = doc.remove(SKIP_KEY).map(|v| count_arg(SKIP_KEY, v)).transpose()?;
        let limit = doc.remove(LIMIT_KEY).map(|v| count_arg(LIMIT_KEY, v)).transpose()?;
        let projection =
            doc.remove(PROJECTION_KEY).map(|v| doc_arg(PROJECTION_KEY, v)).transpose()?;
        let filter = (!doc.is_empty()).then_some(doc);
        let query = Self { filter, sort, skip, limit, projection };
        query.validate()?;
        Ok(query)
    }

    /// Check the sort and projection specs the store will be handed.
    ///
    /// # Errors
    /// Returns [`DbError::Query`] for a sort direction other than 1 / -1, a projection mixing
    /// inclusion and exclusion, or a spec over the store's field limits.
    pub fn validate(&self) -> Result<(), DbError> {
        if let Some(spec) = &self.sort {
            parse_sort(spec)?;
        }
        if let Some(spec) = &self.projection {
            Projection::parse(spec)?;
        }
        Ok(())
    }

    /// Parse a JSON query document, then extract its cursor controls.
    ///
    /// # Errors
    /// Returns [`DbError::Json`] for malformed JSON, [`DbError::Query`] when the JSON is not
    /// an object or its controls are invalid.
    pub fn parse_json(s: &str) -> Result<Self, DbError> {
        let value: serde_json::Value = serde_json::from_str(s)?;
        match Bson::try_from(value).map_err(|e| DbError::Json(e.to_string()))? {
            Bson::Document(doc) => Self::from_document(doc),
            other => Err(DbError::Query(format!("query must be a JSON object, got {other}"))),
        }
    }

    /// Inverse of [`Query::from_document`]: the filter with the controls re-added as `$$` keys.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = self.filter.clone().unwrap_or_default();
        if let Some(s) = &self.sort {
            doc.insert(SORT_KEY, s.clone());
        }
        if let Some(n) = self.skip {
            doc.insert(SKIP_KEY, i64::try_from(n).unwrap_or(i64::MAX));
        }
        if let Some(n) = self.limit {
            doc.insert(LIMIT_KEY, i64::try_from(n).unwrap_or(i64::MAX));
        }
        if let Some(p) = &self.projection {
            doc.insert(PROJECTION_KEY, p.clone());
        }
        doc
    }
}

/// Turn a query into its residual filter and ordered cursor plan.
///
/// A `projection` argument replaces any projection carried by the query.
#[must_use]
pub fn compile(query: Query, projection: Option<Document>) -> CompiledQuery {
    let Query { filter, sort, skip, limit, projection: own_projection } = query;
    let mut plan = Vec::with_capacity(4);
    if let Some(s) = sort {
        plan.push(Directive::Sort(s));
    }
    if let Some(n) = skip {
        plan.push(Directive::Skip(n));
    }
    if let Some(n) = limit {
        plan.push(Directive::Limit(n));
    }
    if let Some(p) = projection.or(own_projection) {
        plan.push(Directive::Projection(p));
    }
    CompiledQuery { filter: filter.unwrap_or_default(), plan: CursorPlan(plan) }
}

/// Anything a collection query accepts: a [`Query`] or a raw query document.
pub trait IntoQuery {
    /// # Errors
    /// Returns [`DbError::Query`] when the cursor controls are invalid.
    fn into_query(self) -> Result<Query, DbError>;
}

impl IntoQuery for Query {
    fn into_query(self) -> Result<Query, DbError> {
        self.validate()?;
        Ok(self)
    }
}

impl IntoQuery for Document {
    fn into_query(self) -> Result<Query, DbError> {
        Query::from_document(self)
    }
}

impl IntoQuery for &str {
    fn into_query(self) -> Result<Query, DbError> {
        Query::parse_json(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn directives_are_removed_from_the_filter() {
        let q = Query::from_document(doc! {
            "$$limit": 2, "$not": {"planet": "Earth"}, "$$sort": {"planet": 1}, "$$skip": 1,
        })
        .unwrap();
        assert_eq!(q.filter, Some(doc! {"$not": {"planet": "Earth"}}));
        assert_eq!(q.sort, Some(doc! {"planet": 1}));
        assert_eq!((q.skip, q.limit), (Some(1), Some(2)));
        assert!(q.projection.is_none());
    }

    #[test]
    fn plan_order_is_fixed() {
        let src = doc! {"$$projection": {"a": 1}, "$$limit": 3, "$$sort": {"a": -1}};
        let q = Query::from_document(src).unwrap();
        let plan: Vec<Directive> = compile(q, None).plan.into_iter().collect();
        assert_eq!(
            plan,
            vec![
                Directive::Sort(doc! {"a": -1}),
                Directive::Limit(3),
                Directive::Projection(doc! {"a": 1}),
            ]
        );
    }

    #[test]
    fn projection_argument_wins() {
        let q = Query::filter(doc! {"x": 1}).projection(doc! {"a": 1});
        let compiled = compile(q, Some(doc! {"b": 1}));
        assert_eq!(compiled.filter, doc! {"x": 1});
        let plan: Vec<&Directive> = compiled.plan.iter().collect();
        assert_eq!(plan, vec![&Directive::Projection(doc! {"b": 1})]);
    }

    #[test]
    fn plain_query_takes_direct_path() {
        let compiled = compile(Query::filter(doc! {"name": "Ford"}), None);
        assert!(!compiled.needs_cursor());
        assert!(compile(Query::new(), Some(doc! {"name": 1})).needs_cursor());
        assert_eq!(compile(Query::new(), None).filter, Document::new());
    }

    #[test]
    fn invalid_controls_are_rejected() {
        assert!(matches!(Query::from_document(doc! {"$$skip": -1}), Err(DbError::Query(_))));
        assert!(matches!(Query::from_document(doc! {"$$limit": "ten"}), Err(DbError::Query(_))));
        assert!(matches!(Query::from_document(doc! {"$$sort": 1}), Err(DbError::Query(_))));
        assert!(matches!(Query::from_document(doc! {"$$sort": {"a": 2}}), Err(DbError::Query(_))));
        let mixed = doc! {"$$projection": {"a": 1, "b": 0}};
        assert!(matches!(Query::from_document(mixed), Err(DbError::Query(_))));
    }

    #[test]
    fn typed_queries_are_checked_like_documents() {
        assert!(matches!(Query::new().sort(doc! {"a": 2}).into_query(), Err(DbError::Query(_))));
        let mixed = Query::filter(doc! {"a": 1}).projection(doc! {"a": 1, "b": 0});
        assert!(matches!(mixed.into_query(), Err(DbError::Query(_))));
        assert!(Query::new().sort(doc! {"a": -1}).limit(2).into_query().is_ok());
    }

    #[test]
    fn json_queries_parse() {
        let json = r#"{"system": "solar", "$$limit": 2, "$$sort": {"planet": -1}}"#;
        let q = Query::parse_json(json).unwrap();
        assert_eq!(q.filter, Some(doc! {"system": "solar"}));
        assert_eq!(q.limit, Some(2));
        assert!(matches!(Query::parse_json("[1]"), Err(DbError::Query(_))));
        assert!(matches!(Query::parse_json("{oops"), Err(DbError::Json(_))));
    }

    #[test]
    fn to_document_round_trips() {
        let src =
            doc! {"a": {"$gt": 1}, "$$sort": {"a": 1}, "$$skip": 2_i64, "$$projection": {"a": 1}};
        let q = Query::from_document(src).unwrap();
        assert_eq!(Query::from_document(q.to_document()).unwrap(), q);
    }
}
