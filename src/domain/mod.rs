//! Domain layer types and invariants.

pub mod cache_key;
pub mod error;
pub mod media;
pub mod options;
pub mod paths;
