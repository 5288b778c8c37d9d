//! Configuration handling for gosuite

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SuiteError;
use crate::library::TestLibrary;

/// Directory holding project-level configuration.
pub const CONFIG_DIR: &str = ".gosuite";

/// gosuite configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Test explorer settings
    #[serde(default)]
    pub explorer: ExplorerConfig,
}

/// Discovery and execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Enabled suite libraries
    #[serde(default = "default_libraries")]
    pub libraries: Vec<TestLibrary>,

    /// Explicit go binary; looked up on PATH when unset
    #[serde(default)]
    pub go_binary: Option<PathBuf>,

    /// Environment supplied together with the toolchain
    #[serde(default)]
    pub toolchain_env: BTreeMap<String, String>,

    /// Test environment merged over the toolchain environment
    #[serde(default)]
    pub test_env: BTreeMap<String, String>,

    /// Extra flags added to every `go test` run
    #[serde(default)]
    pub run_flags: Vec<String>,

    /// Log destination handed to the debug adapter (ignored on Windows)
    #[serde(default = "default_debug_log_dest")]
    pub debug_log_dest: String,

    /// Watch event batching window
    #[serde(default = "default_watch_debounce_millis")]
    pub watch_debounce_millis: u64,
}

fn default_libraries() -> Vec<TestLibrary> {
    TestLibrary::ALL.to_vec()
}

fn default_debug_log_dest() -> String {
    "/dev/null".to_string()
}

fn default_watch_debounce_millis() -> u64 {
    100
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            libraries: default_libraries(),
            go_binary: None,
            toolchain_env: BTreeMap::new(),
            test_env: BTreeMap::new(),
            run_flags: Vec::new(),
            debug_log_dest: default_debug_log_dest(),
            watch_debounce_millis: default_watch_debounce_millis(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, SuiteError> {
        let content = fs::read_to_string(path)
            .map_err(|e| SuiteError::Config(format!("failed to read config file: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| SuiteError::Config(format!("failed to parse config file: {}", e)))
    }

    /// Load configuration from .gosuite/config.toml in the given project root
    pub fn load_from_project(project_root: &Path) -> Result<Self, SuiteError> {
        let config_path = project_root.join(CONFIG_DIR).join("config.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Config::default())
        }
    }
}
