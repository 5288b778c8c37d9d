//! Binary entry point for the gosuite CLI.
//!
//! ## Usage
//!
//! ```bash
//! # Print the catalog for the current directory
//! gosuite list
//!
//! # Run one suite, leaving out a single method
//! gosuite run '/src/store:store/store_test/StoreSuite' \
//!     --exclude '/src/store:store/store_test/StoreSuite/StoreSuite.TestSlow'
//!
//! # Keep the catalog live across two workspace roots
//! gosuite --workspace ./api --workspace ./worker watch
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gosuite::cli::{self, Cli, Command, GlobalArgs, LogLevel};
use gosuite::config::Config;
use gosuite::error::{SuiteError, SuiteResult};
use gosuite::explorer::TestExplorer;
use gosuite::toolchain::GoToolchain;

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.global.log_level);

    match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {}", err);
            ExitCode::from(err.code().code())
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Workspace roots from the command line, made absolute.
fn workspace_roots(global: &GlobalArgs) -> SuiteResult<Vec<PathBuf>> {
    let cwd = std::env::current_dir().map_err(|e| SuiteError::io(".", e))?;
    if global.workspace.is_empty() {
        return Ok(vec![cwd]);
    }
    Ok(global
        .workspace
        .iter()
        .map(|root| if root.is_absolute() { root.clone() } else { cwd.join(root) })
        .collect())
}

/// Cancellation token fired by Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            trigger.cancel();
        }
    });
    cancel
}

fn stdout_error(e: io::Error) -> SuiteError {
    SuiteError::io("<stdout>", e)
}

/// Execute the CLI command.
async fn execute(cli: Cli) -> SuiteResult<ExitCode> {
    let roots = workspace_roots(&cli.global)?;
    let config = Config::load_from_project(&roots[0])?;
    info!(roots = ?roots, libraries = ?config.explorer.libraries, "gosuite starting");

    let explorer = TestExplorer::new(roots, config.explorer);
    let cancel = interrupt_token();
    let mut stdout = io::stdout();

    match cli.command {
        Command::List { json } => {
            explorer.scan_once(&cancel);
            let tree = explorer
                .catalog()
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .tree();
            if json {
                serde_json::to_writer_pretty(&mut stdout, &tree)
                    .map_err(|e| stdout_error(e.into()))?;
                writeln!(stdout).map_err(stdout_error)?;
            } else {
                write!(stdout, "{}", cli::render_tree(&tree)).map_err(stdout_error)?;
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Run { ids, exclude, json } => {
            explorer.scan_once(&cancel);
            let toolchain = Arc::new(GoToolchain::from_config(explorer.config()));
            let orchestrator = explorer.orchestrator(toolchain);
            let report = orchestrator
                .execute(&cli::run_request(&ids, &exclude), &cancel)
                .await?;

            if json {
                serde_json::to_writer_pretty(&mut stdout, &report)
                    .map_err(|e| stdout_error(e.into()))?;
                writeln!(stdout).map_err(stdout_error)?;
            } else {
                write!(stdout, "{}", report.output).map_err(stdout_error)?;
                write!(stdout, "{}", cli::render_summary(&report)).map_err(stdout_error)?;
            }
            Ok(if report.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Watch => {
            let mut revisions = explorer.subscribe();
            let summary = explorer.full_rescan(&cancel).await?;
            info!(files = summary.files_listed, "initial scan complete");
            revisions.borrow_and_update();
            print_catalog(&explorer, &mut stdout)?;

            loop {
                tokio::select! {
                    changed = revisions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        print_catalog(&explorer, &mut stdout)?;
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            explorer.shutdown();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_catalog(explorer: &TestExplorer, stdout: &mut io::Stdout) -> SuiteResult<()> {
    let (revision, tree) = {
        let catalog = explorer.catalog();
        let catalog = catalog.lock().unwrap_or_else(|e| e.into_inner());
        (catalog.revision(), catalog.tree())
    };
    writeln!(stdout, "-- catalog revision {} --", revision).map_err(stdout_error)?;
    write!(stdout, "{}", cli::render_tree(&tree)).map_err(stdout_error)?;
    stdout.flush().map_err(stdout_error)
}
