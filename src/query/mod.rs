pub mod builder;
pub mod catalog;
pub mod chain;
pub mod dialect;
mod families;

pub use builder::{assemble_query, QueryAssembler};
pub use catalog::SourceCatalog;
pub use chain::{Cte, GeneratedQuery, QueryChain, SqlValue, QUERY_ARTIFACT};
pub use dialect::{validate_identifier, Dialect};
