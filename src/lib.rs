//! Mediabatch - batch media jobs streamed back as zip archives
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod pipeline;
pub mod server;
