pub mod cache;
pub mod postgres;

pub use cache::Cache;
pub use postgres::{apply_schema, init_pool};
