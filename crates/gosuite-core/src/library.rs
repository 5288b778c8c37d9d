//! Test library adapters.
//!
//! Each supported suite library is a [`TestLibrary`] variant with one row in
//! the static profile table. The row carries everything that differs between
//! libraries: the module path the parser resolves aliases against, the default
//! package short name, and how a single test or a whole suite is selected on
//! the command line. [`LibraryAdapter`] is the capability the catalog and the
//! orchestrator program against; adding a library means adding a variant and
//! a table row.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::parser::{self, Declaration};

// ============================================================================
// Libraries
// ============================================================================

/// Supported suite-style test libraries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestLibrary {
    /// `gopkg.in/check.v1`: methods selected with `-check.f`.
    Gocheck,
    /// `github.com/frankban/quicktest` suites: methods run as named subtests.
    Quicktest,
}

/// Per-library command-line conventions.
#[derive(Debug)]
pub struct LibraryProfile {
    pub library: TestLibrary,
    pub name: &'static str,
    /// Module path that identifies the library in an import table.
    pub module_path: &'static str,
    /// Package name used when the module is imported without an alias.
    pub default_name: &'static str,
    /// Flags added to every `go test` invocation.
    pub run_flags: &'static [&'static str],
    /// Flag carrying the selection pattern for `go test`.
    pub run_selector: &'static str,
    /// Verbose flag for the compiled test binary under a debugger.
    pub debug_verbose: &'static str,
    /// Flag carrying the selection pattern for the compiled test binary.
    pub debug_selector: &'static str,
    /// Program to debug; `None` debugs the package directory.
    pub debug_program: Option<&'static str>,
    /// Pattern for `Receiver.Function`; `{suite}` and `{test}` are substituted.
    pub method_pattern: &'static str,
    /// Pattern for a function declared without a receiver.
    pub function_pattern: &'static str,
    /// Pattern selecting every method of a suite.
    pub suite_pattern: &'static str,
}

const PROFILES: &[LibraryProfile] = &[
    LibraryProfile {
        library: TestLibrary::Gocheck,
        name: "gocheck",
        module_path: "gopkg.in/check.v1",
        default_name: "check",
        run_flags: &["-check.v"],
        run_selector: "-check.f",
        debug_verbose: "-check.v",
        debug_selector: "-check.f",
        debug_program: None,
        method_pattern: r"^{suite}\.{test}$",
        function_pattern: "^{test}$",
        suite_pattern: r"^{suite}\.",
    },
    LibraryProfile {
        library: TestLibrary::Quicktest,
        name: "quicktest",
        module_path: "github.com/frankban/quicktest",
        default_name: "qt",
        run_flags: &[],
        run_selector: "-run",
        debug_verbose: "-test.v",
        debug_selector: "-test.run",
        debug_program: None,
        method_pattern: "/^{test}$",
        function_pattern: "^{test}$",
        suite_pattern: "^{suite}$",
    },
];

impl TestLibrary {
    /// Every supported library, in table order.
    pub const ALL: [TestLibrary; 2] = [TestLibrary::Gocheck, TestLibrary::Quicktest];

    /// The profile row for this library.
    pub fn profile(self) -> &'static LibraryProfile {
        // The table has exactly one row per variant.
        PROFILES
            .iter()
            .find(|p| p.library == self)
            .unwrap_or(&PROFILES[0])
    }

    /// Library identified by an imported module path.
    pub fn from_module(module: &str) -> Option<Self> {
        PROFILES
            .iter()
            .find(|p| p.module_path == module)
            .map(|p| p.library)
    }

    /// Library whose default package name is `name`.
    pub fn from_default_name(name: &str) -> Option<Self> {
        PROFILES
            .iter()
            .find(|p| p.default_name == name)
            .map(|p| p.library)
    }

    /// Library by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        PROFILES.iter().find(|p| p.name == name).map(|p| p.library)
    }
}

impl fmt::Display for TestLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.profile().name)
    }
}

// ============================================================================
// Targets and Commands
// ============================================================================

/// What a command should select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestTarget {
    /// Every method of a suite.
    Suite { receiver: String },
    /// A single test, optionally scoped to a receiver.
    Function {
        receiver: Option<String>,
        name: String,
    },
}

impl TestTarget {
    /// Target the single test a declaration describes.
    pub fn function(declaration: &Declaration) -> Self {
        TestTarget::Function {
            receiver: declaration.receiver_type.clone(),
            name: declaration.function_name.clone(),
        }
    }

    /// Target the suite a declaration belongs to. Falls back to the function
    /// itself when the declaration has no receiver.
    pub fn suite(declaration: &Declaration) -> Self {
        match &declaration.receiver_type {
            Some(receiver) => TestTarget::Suite {
                receiver: receiver.clone(),
            },
            None => TestTarget::function(declaration),
        }
    }
}

/// Arguments for `go test`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCommand {
    pub args: Vec<String>,
}

/// Program and arguments for a debug launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugCommand {
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
}

// ============================================================================
// Adapter Capability
// ============================================================================

/// Capability every supported test library provides.
pub trait LibraryAdapter {
    /// The library this adapter speaks for.
    fn library(&self) -> TestLibrary;

    /// Declarations of this library's kind found in `content`.
    fn discover_test_functions(&self, content: &str) -> Vec<Declaration>;

    /// `go test` arguments selecting `target`. `extra_flags` go before the selector.
    fn run_command(&self, target: &TestTarget, extra_flags: &[String]) -> RunCommand;

    /// Debug program and test-binary arguments selecting `target`.
    fn debug_command(&self, target: &TestTarget) -> DebugCommand;
}

impl LibraryProfile {
    /// Expand the selection pattern for a target.
    pub fn pattern(&self, target: &TestTarget) -> String {
        match target {
            TestTarget::Suite { receiver } => self.suite_pattern.replace("{suite}", receiver),
            TestTarget::Function {
                receiver: Some(receiver),
                name,
            } => self
                .method_pattern
                .replace("{suite}", receiver)
                .replace("{test}", name),
            TestTarget::Function {
                receiver: None,
                name,
            } => self.function_pattern.replace("{test}", name),
        }
    }
}

impl LibraryAdapter for TestLibrary {
    fn library(&self) -> TestLibrary {
        *self
    }

    fn discover_test_functions(&self, content: &str) -> Vec<Declaration> {
        match parser::parse_source(content) {
            Some(parsed) => parsed
                .test_functions
                .into_iter()
                .filter(|decl| decl.library == *self)
                .collect(),
            None => Vec::new(),
        }
    }

    fn run_command(&self, target: &TestTarget, extra_flags: &[String]) -> RunCommand {
        let profile = self.profile();
        let mut args: Vec<String> = vec!["test".into(), "-count=1".into(), "-v".into()];
        args.extend(profile.run_flags.iter().map(|f| f.to_string()));
        args.extend(extra_flags.iter().cloned());
        args.push(profile.run_selector.to_string());
        args.push(profile.pattern(target));
        RunCommand { args }
    }

    fn debug_command(&self, target: &TestTarget) -> DebugCommand {
        let profile = self.profile();
        DebugCommand {
            program: profile.debug_program.map(PathBuf::from),
            args: vec![
                profile.debug_verbose.to_string(),
                profile.debug_selector.to_string(),
                profile.pattern(target),
            ],
        }
    }
}
