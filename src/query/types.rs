use crate::types::Document;

pub const SORT_KEY: &str = "$$sort";
pub const SKIP_KEY: &str = "$$skip";
pub const LIMIT_KEY: &str = "$$limit";
pub const PROJECTION_KEY: &str = "$$projection";

/// A filter together with optional cursor controls.
///
/// Built directly, or extracted from a query document whose `$$sort`, `$$skip`, `$$limit`
/// and `$$projection` keys carry the cursor controls (see [`Query::from_document`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub projection: Option<Document>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Query with a filter and no cursor controls.
    #[must_use]
    pub fn filter(filter: Document) -> Self {
        Self { filter: Some(filter), ..Self::default() }
    }

    #[must_use]
    pub fn sort(mut self, spec: Document) -> Self {
        self.sort = Some(spec);
        self
    }

    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    #[must_use]
    pub fn projection(mut self, spec: Document) -> Self {
        self.projection = Some(spec);
        self
    }

    /// Whether any cursor control is set.
    pub fn has_directives(&self) -> bool {
        self.sort.is_some()
            || self.skip.is_some()
            || self.limit.is_some()
            || self.projection.is_some()
    }
}

/// One cursor refinement.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Sort(Document),
    Skip(usize),
    Limit(usize),
    Projection(Document),
}

/// Refinements in application order: sort, skip, limit, projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorPlan(pub(crate) Vec<Directive>);

impl CursorPlan {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Directive> {
        self.0.iter()
    }
}

impl IntoIterator for CursorPlan {
    type Item = Directive;
    type IntoIter = std::vec::IntoIter<Directive>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledQuery {
    /// Residual filter; empty when the query had none.
    pub filter: Document,
    pub plan: CursorPlan,
}

impl CompiledQuery {
    /// A non-empty plan has to go through a store cursor.
    pub fn needs_cursor(&self) -> bool {
        !self.plan.is_empty()
    }
}
