//! # seep-core
//!
//! Core types for the Seep taint-analysis engine: the syntax-tree
//! contract consumed from the host parser, the error taxonomy, the
//! analysis configuration, and shared collections.

pub mod ast;
pub mod config;
pub mod errors;
pub mod tracing_setup;
pub mod types;
