pub mod config;
pub mod error;
pub mod types;

pub use config::CoreConfig;
pub use error::PipelineError;
pub use types::{Language, SearchRequest, SearchResult, SearchSource};
