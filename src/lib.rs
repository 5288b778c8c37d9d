//! gosuite: discovery and execution of Go suite-style tests
//!
//! Finds gocheck and quicktest suite methods in `*_test.go` files, keeps a
//! live catalog of them as the workspace changes, and runs or debugs any
//! selection of packages, files, suites or single methods through the Go
//! toolchain.

// Core - re-exported from gosuite-core
pub use gosuite_core::catalog;
pub use gosuite_core::config;
pub use gosuite_core::error;
pub use gosuite_core::library;
pub use gosuite_core::parser;
pub use gosuite_core::scan;

// Collaborators: toolchain, processes, debugger, filesystem
pub mod debug;
pub mod process;
pub mod toolchain;
pub mod watch;

// Execution and wiring
pub mod explorer;
pub mod orchestrator;

// Front door
pub mod cli;
