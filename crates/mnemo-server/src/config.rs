//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use mnemo_sdk::MnemoConfig;

/// Default bind address
pub const DEFAULT_ADDR: &str = "127.0.0.1:7410";

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory (`MNEMO_DIR`, default `~/.mnemo`)
    pub mnemo_dir: PathBuf,
    /// Path to the orchestrator configuration file
    pub config_path: PathBuf,
    /// Long-term store database
    pub database_path: PathBuf,
    /// HTTP bind address (`MNEMO_ADDR`)
    pub addr: SocketAddr,
}

impl Config {
    /// Load configuration from the environment
    ///
    /// Standard directory structure:
    /// ```text
    /// ~/.mnemo/
    /// ├── config.toml    # Orchestrator configuration (optional)
    /// └── mnemo.db       # Long-term store
    /// ```
    pub fn load() -> anyhow::Result<Self> {
        let mnemo_dir = match std::env::var("MNEMO_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_dir(),
        };
        let addr = std::env::var("MNEMO_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        Self::from_parts(mnemo_dir, &addr)
    }

    pub fn from_parts(mnemo_dir: PathBuf, addr: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&mnemo_dir)?;
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address '{}': {}", addr, e))?;

        Ok(Self {
            config_path: mnemo_dir.join("config.toml"),
            database_path: mnemo_dir.join("mnemo.db"),
            mnemo_dir,
            addr,
        })
    }

    /// Orchestrator configuration: `config.toml` when present, otherwise
    /// defaults with a SQLite store at `database_path`.
    pub fn memory_config(&self) -> anyhow::Result<MnemoConfig> {
        if self.config_path.exists() {
            return Ok(MnemoConfig::load(&self.config_path)?);
        }
        Ok(MnemoConfig::default().with_sqlite(&self.database_path))
    }
}

fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mnemo")
}
