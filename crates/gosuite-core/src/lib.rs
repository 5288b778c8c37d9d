//! Core of gosuite: discovery of Go suite-style tests.
//!
//! This crate is synchronous and free of process or async concerns:
//! - Declaration parser for package, import and test-method facts
//! - Library adapters (gocheck, quicktest) and their command tables
//! - The live test catalog and its incremental mutation rules
//! - Candidate-file rules and workspace listing
//! - Configuration loading
//! - Error types and exit codes

pub mod catalog;
pub mod config;
pub mod error;
pub mod library;
pub mod parser;
pub mod scan;
