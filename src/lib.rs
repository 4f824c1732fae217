pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod parser;
pub mod storage;

// Re-export commonly used items
pub use engine::{QueryEngine, QueryOutput};
pub use error::QueryError;
pub use parser::{parse_query, DateKey, Query};
pub use storage::{CaseTable, TableSource};
