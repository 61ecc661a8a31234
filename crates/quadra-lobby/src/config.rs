//! Lobby configuration: TOML file layered under command-line overrides.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::LobbyOptions;

/// Default configuration file content with comments.
pub const DEFAULT_CONFIG_CONTENT: &str = r#"# Quadra Lobby Configuration
# ==========================

# Socket address for the client listener.
bind = "0.0.0.0:13472"

# Address of the registry service.
registry_addr = "127.0.0.1:12977"

# Logging level: trace, debug, info, warn, error.
log_level = "info"

# IP that per-match listeners bind on.
game_bind_ip = "0.0.0.0"

# Inclusive port range for per-match listeners, allocated round-robin.
game_port_min = 10000
game_port_max = 65000
"#;

/// Command-line arguments for the lobby binary.
#[derive(Parser, Debug)]
#[command(name = "quadra-lobby")]
#[command(about = "Quadra lobby service", long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file. Created with defaults if missing.
    #[arg(short, long, default_value = "quadra-lobby.toml")]
    pub config: PathBuf,

    /// Socket address for the client listener (overrides config file).
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Registry service address (overrides config file).
    #[arg(short, long)]
    pub registry_addr: Option<String>,

    /// Logging level (overrides config file).
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Lower bound of the game-port range (overrides config file).
    #[arg(long)]
    pub game_port_min: Option<u16>,

    /// Upper bound of the game-port range (overrides config file).
    #[arg(long)]
    pub game_port_max: Option<u16>,
}

/// TOML configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_registry_addr")]
    pub registry_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_game_bind_ip")]
    pub game_bind_ip: String,
    #[serde(default = "default_game_port_min")]
    pub game_port_min: u16,
    #[serde(default = "default_game_port_max")]
    pub game_port_max: u16,
}

fn default_bind() -> String {
    "0.0.0.0:13472".to_string()
}

fn default_registry_addr() -> String {
    "127.0.0.1:12977".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_game_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_game_port_min() -> u16 {
    10_000
}

fn default_game_port_max() -> u16 {
    65_000
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            registry_addr: default_registry_addr(),
            log_level: default_log_level(),
            game_bind_ip: default_game_bind_ip(),
            game_port_min: default_game_port_min(),
            game_port_max: default_game_port_max(),
        }
    }
}

/// The resolved lobby configuration.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    pub options: LobbyOptions,
    pub log_level: String,
}

impl LobbyConfig {
    /// Loads the configuration: CLI args over config file over defaults.
    pub fn load() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolves a configuration from already-parsed arguments.
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let file = load_or_create_file(&args.config)?;
        Ok(Self {
            options: LobbyOptions {
                bind: args.bind.unwrap_or(file.bind),
                registry_addr: args.registry_addr.unwrap_or(file.registry_addr),
                game_bind_ip: file.game_bind_ip,
                game_port_min: args.game_port_min.unwrap_or(file.game_port_min),
                game_port_max: args.game_port_max.unwrap_or(file.game_port_max),
            },
            log_level: args.log_level.unwrap_or(file.log_level),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_content_parses() {
        let parsed: FileConfig = toml::from_str(DEFAULT_CONFIG_CONTENT).unwrap();
        assert_eq!(parsed.bind, "0.0.0.0:13472");
        assert_eq!(parsed.game_port_min, 10_000);
        assert_eq!(parsed.game_port_max, 65_000);
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let parsed: FileConfig =
            toml::from_str("registry_addr = \"10.0.0.5:12977\"").unwrap();
        assert_eq!(parsed.registry_addr, "10.0.0.5:12977");
        assert_eq!(parsed.bind, "0.0.0.0:13472");
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("lobby.toml");
        std::fs::write(&cfg_path, "game_port_min = 20000\n").unwrap();

        let args = CliArgs {
            config: cfg_path,
            bind: None,
            registry_addr: None,
            log_level: Some("debug".into()),
            game_port_min: Some(30_000),
            game_port_max: None,
        };
        let cfg = LobbyConfig::from_args(args).unwrap();
        assert_eq!(cfg.options.game_port_min, 30_000);
        assert_eq!(cfg.options.game_port_max, 65_000);
        assert_eq!(cfg.log_level, "debug");
    }
}
