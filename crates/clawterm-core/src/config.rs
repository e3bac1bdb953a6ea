//! Configuration resolution for clawterm.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (`--config`, or ~/.config/clawterm/settings.json)
//! 3. `.env` file and environment variables
//! 4. CLI arguments (applied by the binary, highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::protocol::Geometry;

/// Complete clawterm configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
    /// Directory of static viewer assets served at `/`.
    pub public_dir: PathBuf,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
            public_dir: PathBuf::from("public"),
            log_level: "info".to_string(),
        }
    }
}

/// Backing terminal session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Multiplexer binary used to probe, create and attach the session.
    pub tmux_bin: PathBuf,
    pub session_name: String,
    pub default_cols: u16,
    pub default_rows: u16,
    /// Value of `TERM` for the attached process.
    pub term: String,
    /// Scrollback replayed to late joiners, in bytes.
    pub scrollback_bytes: usize,
    /// Fixed delay before re-attaching after the process exits.
    pub respawn_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tmux_bin: PathBuf::from("tmux"),
            session_name: "openclaw".to_string(),
            default_cols: Geometry::DEFAULT.cols,
            default_rows: Geometry::DEFAULT.rows,
            term: "xterm-256color".to_string(),
            scrollback_bytes: 100 * 1024, // 100 KiB
            respawn_delay_ms: 2_000,
        }
    }
}

impl SessionConfig {
    /// Default geometry, falling back to 120x40 for zero values.
    pub fn default_geometry(&self) -> Geometry {
        Geometry::new(self.default_cols, self.default_rows).unwrap_or_default()
    }
}

/// Output pattern watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Per-category alert cooldown in seconds.
    pub cooldown_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { cooldown_secs: 30 }
    }
}

/// Notification delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// CLI used to deliver messages (`<command> message send --to <chat> --message <text>`).
    pub command: PathBuf,
    /// Destination chat; notifications are disabled when unset.
    pub chat_id: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("openclaw"),
            chat_id: None,
            timeout_secs: 10,
        }
    }
}

/// LLM summarizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub url: String,
    pub model: String,
    /// Only the trailing part of a transcript is summarized.
    pub max_log_chars: usize,
    pub check_timeout_secs: u64,
    pub generate_timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "qwen3:30b-a3b".to_string(),
            max_log_chars: 12_000,
            check_timeout_secs: 3,
            generate_timeout_secs: 300,
        }
    }
}

/// Transcript and summary storage locations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub logs_dir: Option<PathBuf>,
    pub summaries_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Transcript directory, defaulting to `<data dir>/clawterm/logs`.
    pub fn logs_dir(&self) -> PathBuf {
        self.logs_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("logs"))
    }

    /// Summary directory, defaulting to `<data dir>/clawterm/summaries`.
    pub fn summaries_dir(&self) -> PathBuf {
        self.summaries_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("summaries"))
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from("."), |d| d.join("clawterm"))
}

/// Load configuration with hierarchical resolution.
///
/// `explicit_path` replaces the global settings file; a missing explicit
/// file is an error, a missing global one is not. Call [`load_dotenv`]
/// first for `.env` values to take part.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config> {
    let mut config = match explicit_path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(path) if path.exists() => load_config_file(&path)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Load `.env` from the working directory or its ancestors into the
/// process environment.
///
/// A missing file is not a problem. An unreadable or malformed one is
/// returned for the caller to report once logging is initialised.
pub fn load_dotenv() -> Option<dotenvy::Error> {
    dotenvy::dotenv().err().filter(|e| !e.not_found())
}

/// [`load_dotenv`] for an explicit file.
pub fn load_dotenv_from(path: &Path) -> Option<dotenvy::Error> {
    dotenvy::from_path(path).err().filter(|e| !e.not_found())
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("clawterm").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply environment overrides using `lookup` to read variables.
///
/// The unprefixed names match the variables operators already export for
/// the web terminal (`PORT`, `TMUX_SESSION`, `OLLAMA_URL`, ...).
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("HOST") {
        config.daemon.host = val;
    }
    if let Some(n) = lookup("PORT").and_then(|v| v.parse().ok()) {
        config.daemon.port = n;
    }
    if let Some(val) = lookup("CLAWTERM_PUBLIC_DIR") {
        config.daemon.public_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("CLAWTERM_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Some(val) = lookup("TMUX_SESSION") {
        config.session.session_name = val;
    }
    if let Some(n) = lookup("CLAWTERM_COOLDOWN_SECS").and_then(|v| v.parse().ok()) {
        config.watcher.cooldown_secs = n;
    }
    if let Some(val) = lookup("TELEGRAM_CHAT_ID").filter(|v| !v.is_empty()) {
        config.notifier.chat_id = Some(val);
    }
    if let Some(val) = lookup("OLLAMA_URL") {
        config.summarizer.url = val;
    }
    if let Some(val) = lookup("OLLAMA_MODEL") {
        config.summarizer.model = val;
    }
    if let Some(val) = lookup("CLAWTERM_LOGS_DIR") {
        config.storage.logs_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("CLAWTERM_SUMMARIES_DIR") {
        config.storage.summaries_dir = Some(PathBuf::from(val));
    }
}
