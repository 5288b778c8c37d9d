//! Go toolchain resolution.
//!
//! The orchestrator never looks for `go` itself; it asks a [`ToolchainResolver`]
//! once per queue entry. A failure is fatal for that entry only.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use gosuite_core::config::ExplorerConfig;
use gosuite_core::error::{SuiteError, SuiteResult};

/// Name of the toolchain binary looked up on `PATH`.
pub const GO_BINARY: &str = "go";

/// A resolved toolchain: the binary to run and the environment it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub binary: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl Toolchain {
    /// Toolchain environment with `test_env` layered on top.
    pub fn merged_env(&self, test_env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.extend(test_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

/// Supplies the toolchain for run and debug attempts.
#[async_trait]
pub trait ToolchainResolver: Send + Sync {
    async fn resolve(&self) -> SuiteResult<Toolchain>;
}

/// Resolves `go` from configuration or `PATH`.
#[derive(Debug, Clone, Default)]
pub struct GoToolchain {
    binary: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl GoToolchain {
    pub fn new(binary: Option<PathBuf>, env: BTreeMap<String, String>) -> Self {
        Self { binary, env }
    }

    pub fn from_config(config: &ExplorerConfig) -> Self {
        Self::new(config.go_binary.clone(), config.toolchain_env.clone())
    }
}

#[async_trait]
impl ToolchainResolver for GoToolchain {
    async fn resolve(&self) -> SuiteResult<Toolchain> {
        let binary = match &self.binary {
            Some(binary) if binary.is_file() => binary.clone(),
            Some(binary) => {
                return Err(SuiteError::ToolchainUnavailable {
                    reason: format!("configured binary {} does not exist", binary.display()),
                })
            }
            None => which::which(GO_BINARY).map_err(|e| SuiteError::ToolchainUnavailable {
                reason: format!("'{}' not found on PATH: {}", GO_BINARY, e),
            })?,
        };
        debug!(binary = ?binary, "resolved go toolchain");
        Ok(Toolchain {
            binary,
            env: self.env.clone(),
        })
    }
}
