//! Request pipelines behind the warehouse tools.
//!
//! * [`guard`] decides whether a SQL string is read-only and single-statement.
//! * [`executor`] bounds, runs and reports a guarded query.
//! * [`retriever`] ranks table descriptions against a natural-language request.

pub mod definitions;
pub mod executor;
pub mod guard;
pub mod retriever;
pub mod toolbox;

pub use definitions::{SqlQueryRequest, all_tools};
pub use executor::{QueryExecutor, QueryResult};
pub use guard::{QueryGuard, ValidationResult};
pub use retriever::{SchemaRetriever, SchemaSearchRequest, SchemaSearchResponse};
pub use toolbox::{ToolError, Toolbox};
