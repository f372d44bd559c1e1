//! Application services layer.

pub mod auth;
pub mod engine;
pub mod error;
pub mod library;
pub mod render;
