//! Retrieval: the three-tier cascade and its supporting pieces

mod cascade;
mod query;
mod vector;

pub use cascade::{FragmentSearch, RecallQuery};
pub use query::{prepare_query_text, MAX_QUERY_CHARS};
pub use vector::{VectorIndex, VectorIndexError, CONNECTIVITY, EXPANSION_ADD, EXPANSION_SEARCH};
