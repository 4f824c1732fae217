use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

/// Failures surfaced by the loader and the query layer.
///
/// Nothing here is recovered internally: every variant reaches the caller
/// unchanged so a missing date never turns into a zero count.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("no column for date {0}")]
    UnknownDate(String),

    #[error("no row for region '{0}'")]
    UnknownRegion(String),

    #[error("region '{region}' matches {rows} rows")]
    AmbiguousRegion { region: String, rows: usize },

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("malformed source: {0}")]
    MalformedSource(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl From<arrow::error::ArrowError> for QueryError {
    fn from(err: arrow::error::ArrowError) -> Self {
        QueryError::MalformedSource(err.to_string())
    }
}

impl From<csv::Error> for QueryError {
    fn from(err: csv::Error) -> Self {
        QueryError::MalformedSource(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = QueryError::AmbiguousRegion {
            region: "China".to_string(),
            rows: 33,
        };
        assert_eq!(err.to_string(), "region 'China' matches 33 rows");
        assert_eq!(
            QueryError::UnknownDate("1/21/20".to_string()).to_string(),
            "no column for date 1/21/20"
        );
    }

    #[test]
    fn test_arrow_errors_are_malformed_source() {
        let err: QueryError = arrow::error::ArrowError::CsvError("bad row".to_string()).into();
        assert!(matches!(err, QueryError::MalformedSource(_)));
    }
}
