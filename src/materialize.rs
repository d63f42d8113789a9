//! Raw store results to [`Record`]s.
//!
//! Wrapping never fails: an absent document stays absent and counts pass through.

use crate::errors::DbError;
use crate::record::Record;
use crate::store::{CursorOutput, UpdateResult};
use crate::types::Document;

/// Materialized result of a query, whichever path executed it.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Records(Vec<Record>),
    Record(Option<Record>),
    Count(u64),
}

impl QueryOutput {
    /// # Errors
    /// Returns [`DbError::Query`] if the output is not a list.
    pub fn into_records(self) -> Result<Vec<Record>, DbError> {
        match self {
            Self::Records(r) => Ok(r),
            other => Err(unexpected("a list of records", &other)),
        }
    }

    /// # Errors
    /// Returns [`DbError::Query`] if the output is not a single optional record.
    pub fn into_record(self) -> Result<Option<Record>, DbError> {
        match self {
            Self::Record(r) => Ok(r),
            other => Err(unexpected("a single record", &other)),
        }
    }

    /// # Errors
    /// Returns [`DbError::Query`] if the output is not a count.
    pub fn into_count(self) -> Result<u64, DbError> {
        match self {
            Self::Count(n) => Ok(n),
            other => Err(unexpected("a count", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &QueryOutput) -> DbError {
    let kind = match got {
        QueryOutput::Records(_) => "records",
        QueryOutput::Record(_) => "record",
        QueryOutput::Count(_) => "count",
    };
    DbError::Query(format!("expected {wanted}, store returned {kind}"))
}

#[must_use]
pub fn wrap(doc: Option<Document>) -> Option<Record> {
    doc.map(Record::from_document)
}

#[must_use]
pub fn wrap_many(docs: Vec<Document>) -> Vec<Record> {
    docs.into_iter().map(Record::from_document).collect()
}

#[must_use]
pub fn wrap_update_result(result: UpdateResult<Document>) -> UpdateResult<Record> {
    result.map(Record::from_document)
}

#[must_use]
pub fn wrap_output(output: CursorOutput) -> QueryOutput {
    match output {
        CursorOutput::Many(docs) => QueryOutput::Records(wrap_many(docs)),
        CursorOutput::One(doc) => QueryOutput::Record(wrap(doc)),
        CursorOutput::Count(n) => QueryOutput::Count(n),
    }
}
