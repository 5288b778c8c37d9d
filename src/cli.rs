//! Command-line surface.
//!
//! `list` prints the catalog, `run` executes a selection, `watch` keeps the
//! catalog live and reports every revision until interrupted. Node ids are
//! the ids printed by `list`.

use std::fmt::Write as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use gosuite_core::catalog::{NodeId, TreeEntry};

use crate::orchestrator::{RunMode, RunReport, RunRequest};

/// Discover and run Go suite-style tests.
#[derive(Parser, Debug)]
#[command(name = "gosuite", version, about = "Discover and run Go suite-style tests")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
pub struct GlobalArgs {
    /// Workspace root; repeat for multi-root workspaces (default: current directory).
    #[arg(long, global = true)]
    pub workspace: Vec<PathBuf>,

    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the test catalog.
    List {
        /// Emit the tree as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run tests. Without ids every package is run.
    Run {
        /// Node ids to run.
        ids: Vec<String>,

        /// Node ids to leave out, including everything beneath them.
        #[arg(long)]
        exclude: Vec<String>,

        /// Emit the run report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Keep the catalog live and print each update.
    Watch,
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl Cli {
    /// Parse CLI arguments from the environment
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// Build a run request from positional ids and exclusions.
pub fn run_request(ids: &[String], exclude: &[String]) -> RunRequest {
    RunRequest {
        include: ids.iter().map(|s| NodeId::from(s.as_str())).collect(),
        exclude: exclude.iter().map(|s| NodeId::from(s.as_str())).collect(),
        mode: RunMode::Run,
    }
}

/// Indented text rendering of the catalog tree.
pub fn render_tree(entries: &[TreeEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        render_entry(entry, 0, &mut out);
    }
    out
}

fn render_entry(entry: &TreeEntry, depth: usize, out: &mut String) {
    let _ = write!(out, "{:indent$}{} {}", "", entry.kind, entry.label, indent = depth * 2);
    if let Some(outcome) = entry.outcome {
        let _ = write!(out, " [{}]", outcome);
    }
    let _ = writeln!(out, "  ({})", entry.id);
    for child in &entry.children {
        render_entry(child, depth + 1, out);
    }
}

/// One line per entry with its final state.
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    for (node, state) in report.final_states() {
        let _ = writeln!(out, "{:<8} {}", state, node);
    }
    if report.cancelled {
        out.push_str("run cancelled\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{EntryState, Transition};
    use gosuite_core::catalog::{NodeKind, TestOutcome};

    #[test]
    fn test_default_values() {
        let cli = Cli::try_parse_from(["gosuite", "list"]).unwrap();
        assert!(cli.global.workspace.is_empty());
        assert_eq!(cli.global.log_level, LogLevel::Warn);
        assert!(matches!(cli.command, Command::List { json: false }));
    }

    #[test]
    fn test_repeated_workspace() {
        let cli = Cli::try_parse_from([
            "gosuite",
            "--workspace",
            "/a",
            "watch",
            "--workspace",
            "/b",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.global.workspace, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(cli.global.log_level, LogLevel::Debug);
        assert!(matches!(cli.command, Command::Watch));
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "gosuite", "run", "/ws/p:p", "/ws/q:q", "--exclude", "/ws/p:p/a_test", "--json",
        ])
        .unwrap();
        match cli.command {
            Command::Run { ids, exclude, json } => {
                assert_eq!(ids, vec!["/ws/p:p", "/ws/q:q"]);
                assert!(json);
                let request = run_request(&ids, &exclude);
                assert_eq!(request.include.len(), 2);
                assert_eq!(request.exclude, vec![NodeId::from("/ws/p:p/a_test")]);
                assert_eq!(request.mode, RunMode::Run);
            }
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_subcommand() {
        assert!(Cli::try_parse_from(["gosuite"]).is_err());
    }

    #[test]
    fn test_render_tree() {
        let tree = vec![TreeEntry {
            id: NodeId::from("/ws/p:p"),
            kind: NodeKind::Package,
            label: "p".to_string(),
            outcome: None,
            children: vec![TreeEntry {
                id: NodeId::from("/ws/p:p/a_test"),
                kind: NodeKind::File,
                label: "a_test.go".to_string(),
                outcome: Some(TestOutcome::Failed),
                children: vec![],
            }],
        }];
        assert_eq!(
            render_tree(&tree),
            "package p  (/ws/p:p)\n  file a_test.go [failed]  (/ws/p:p/a_test)\n"
        );
    }

    #[test]
    fn test_render_summary() {
        let report = RunReport {
            transitions: vec![Transition {
                node: NodeId::from("x"),
                state: EntryState::Passed,
                message: None,
            }],
            output: String::new(),
            cancelled: true,
        };
        assert_eq!(render_summary(&report), "passed   x\nrun cancelled\n");
    }
}
