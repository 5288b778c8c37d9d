//! Compile-only test to verify public API surface.
//!
//! The imports below are the public contract of the gosuite crate. If this
//! file fails to compile, a public re-export has regressed.

#![allow(unused_imports)]

// ============================================================================
// Core (re-exported from gosuite-core)
// ============================================================================

use gosuite::catalog::{
    CatalogNode, NodeData, NodeId, NodeKind, RescanSummary, TestCatalog, TestOutcome, TreeEntry,
    WatchEvent,
};
use gosuite::config::{Config, ExplorerConfig, CONFIG_DIR};
use gosuite::error::{ErrorCode, SuiteError, SuiteResult};
use gosuite::library::{
    DebugCommand, LibraryAdapter, LibraryProfile, RunCommand, TestLibrary, TestTarget,
};
use gosuite::parser::{
    parse_imports, parse_package_name, parse_source, parse_test_functions, Declaration, Import,
    ImportRef, PackageInfo, ParsedFile, Position, SourceRange,
};
use gosuite::scan::{is_candidate_file, list_candidate_files, Listing, TEST_FILE_SUFFIX};

// ============================================================================
// Collaborators
// ============================================================================

use gosuite::debug::{
    classify_debug_transcript, correlation_token, DebugCorrelator, DebugEvent, DebugHost,
    DebugSessionId, DebugTranscript, LaunchConfig, OutputCategory, PendingSession,
};
use gosuite::process::{run_process, OutputLog, ProcessExit, ProcessSpec};
use gosuite::toolchain::{GoToolchain, Toolchain, ToolchainResolver, GO_BINARY};
use gosuite::watch::WatchBridge;

// ============================================================================
// Execution and Front Door
// ============================================================================

use gosuite::cli::{Cli, Command, GlobalArgs, LogLevel};
use gosuite::explorer::{new_shared_catalog, SharedCatalog, TestExplorer};
use gosuite::orchestrator::{
    build_queue, EntryState, Orchestrator, QueueEntry, RunMode, RunReport, RunRequest, Transition,
};

#[test]
fn api_surface_compiles() {
    let _ = std::any::type_name::<TestCatalog>();
    let _ = std::any::type_name::<Orchestrator>();
    let _ = std::any::type_name::<DebugCorrelator>();
    let _ = std::any::type_name::<TestExplorer>();
    let _ = std::any::type_name::<SuiteError>();
}

#[test]
fn error_codes_are_stable() {
    assert_eq!(ErrorCode::InvalidArguments.code(), 2);
    assert_eq!(ErrorCode::ResolutionError.code(), 3);
    assert_eq!(ErrorCode::ExecutionError.code(), 4);
    assert_eq!(ErrorCode::InternalError.code(), 10);
}
