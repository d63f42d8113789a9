use crate::types::Document;

/// Which store call a cursor stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMethod {
    Find,
    FindOne,
    Count,
}

/// Lazy store cursor. Refinements only record what to do; nothing touches the data until
/// the cursor is handed to [`DocumentStore::exec_cursor`](super::DocumentStore::exec_cursor).
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    method: CursorMethod,
    filter: Document,
    sort: Option<Document>,
    skip: Option<usize>,
    limit: Option<usize>,
    projection: Option<Document>,
}

impl Cursor {
    #[must_use]
    pub fn new(method: CursorMethod, filter: Document) -> Self {
        Self { method, filter, sort: None, skip: None, limit: None, projection: None }
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

    pub fn method(&self) -> CursorMethod {
        self.method
    }

    pub fn filter(&self) -> &Document {
        &self.filter
    }

    pub fn sort_spec(&self) -> Option<&Document> {
        self.sort.as_ref()
    }

    pub fn skip_count(&self) -> Option<usize> {
        self.skip
    }

    pub fn limit_count(&self) -> Option<usize> {
        self.limit
    }

    pub fn projection_spec(&self) -> Option<&Document> {
        self.projection.as_ref()
    }
}

/// Raw result of executing a cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorOutput {
    Many(Vec<Document>),
    One(Option<Document>),
    Count(u64),
}
