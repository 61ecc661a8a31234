//! Registry configuration: TOML file layered under command-line overrides.
//!
//! Precedence, lowest to highest: built-in defaults, the config file
//! (created with commented defaults when missing), CLI arguments.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

/// Default configuration file content with comments.
pub const DEFAULT_CONFIG_CONTENT: &str = r#"# Quadra Registry Configuration
# =============================

# Socket address to bind to.
bind = "0.0.0.0:12977"

# Logging level: trace, debug, info, warn, error.
log_level = "info"

# Path of the state snapshot file. Rewritten at shutdown; all users are
# marked offline when it is loaded.
state_file = "registry_state.txt"
"#;

/// Command-line arguments for the registry binary.
#[derive(Parser, Debug)]
#[command(name = "quadra-registry")]
#[command(about = "Quadra registry service", long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file. Created with defaults if missing.
    #[arg(short, long, default_value = "quadra-registry.toml")]
    pub config: PathBuf,

    /// Socket address to bind to (overrides config file).
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Logging level (overrides config file).
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Path of the state snapshot file (overrides config file).
    #[arg(short, long)]
    pub state_file: Option<PathBuf>,
}

/// TOML configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

fn default_bind() -> String {
    "0.0.0.0:12977".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from("registry_state.txt")
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
            state_file: default_state_file(),
        }
    }
}

/// The resolved registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub bind: String,
    pub log_level: String,
    pub state_file: PathBuf,
}

impl RegistryConfig {
    /// Loads the configuration: CLI args over config file over defaults.
    pub fn load() -> Result<Self> {
        let args = CliArgs::parse();
        Self::from_args(args)
    }

    /// Resolves a configuration from already-parsed arguments.
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let file = load_or_create_file(&args.config)?;
        Ok(Self {
            bind: args.bind.unwrap_or(file.bind),
            log_level: args.log_level.unwrap_or(file.log_level),
            state_file: args.state_file.unwrap_or(file.state_file),
        })
    }
}

fn load_or_create_file(path: &PathBuf) -> Result<FileConfig> {
    if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))
    } else {
        fs::write(path, DEFAULT_CONFIG_CONTENT)
            .with_context(|| format!("creating config file {}", path.display()))?;
        tracing::info!(path = %path.display(), "created default config file");
        Ok(FileConfig::default())
    }
}
