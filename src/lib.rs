//! Shutterbox: a self-hosted image store that renders resized and re-encoded
//! variants on demand and keeps them on disk.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
