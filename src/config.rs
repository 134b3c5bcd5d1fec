//! Configuration loader and validator for the camp attendance bot.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::sheet::Layout;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub sheets: Sheets,
    pub lock: LockSettings,
    pub clubs: Clubs,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_session_idle_minutes")]
    pub session_idle_minutes: u64,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
}

/// Sheet names inside the backing store and the fixed column layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sheets {
    pub registration: String,
    pub check_inout: String,
    pub masterlist: String,
    pub scores: String,
    #[serde(default = "default_points_column")]
    pub points_column: u32,
    #[serde(default)]
    pub layout: Layout,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    /// In-process mutex; only valid when a single bot process owns the database.
    Local,
    /// Expiring lease row in the database, shared across processes.
    Lease,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockSettings {
    pub kind: LockKind,
    pub name: String,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub lease_seconds: u64,
}

impl LockSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }
}

/// Club website settings for the "explore clubs" menu.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Clubs {
    pub base_url: String,
    pub explore_path: String,
    pub names: Vec<String>,
    /// Club name -> file (relative to `app.data_dir`) whose text replaces the scraped About Us.
    #[serde(default)]
    pub about_overrides: BTreeMap<String, String>,
}

fn default_session_idle_minutes() -> u64 {
    120
}

fn default_max_workers() -> usize {
    10
}

fn default_points_column() -> u32 {
    7
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Default SQLite URL under the data directory, overridable via `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/attendance.db", self.app.data_dir))
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.app.session_idle_minutes.saturating_mul(60))
    }

    pub fn data_path(&self, relative: &str) -> PathBuf {
        Path::new(&self.app.data_dir).join(relative)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.max_workers == 0 {
        return Err(ConfigError::Invalid("app.max_workers must be > 0"));
    }
    if cfg.app.session_idle_minutes == 0 {
        return Err(ConfigError::Invalid("app.session_idle_minutes must be > 0"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }

    let s = &cfg.sheets;
    if s.registration.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.registration must be non-empty"));
    }
    if s.check_inout.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.check_inout must be non-empty"));
    }
    if s.masterlist.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.masterlist must be non-empty"));
    }
    if s.scores.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.scores must be non-empty"));
    }
    if s.registration == s.check_inout {
        return Err(ConfigError::Invalid(
            "sheets.registration and sheets.check_inout must differ",
        ));
    }
    if s.points_column == 0 {
        return Err(ConfigError::Invalid("sheets.points_column must be >= 1"));
    }
    if !s.layout.is_valid() {
        return Err(ConfigError::Invalid(
            "sheets.layout columns must be >= 1 and distinct",
        ));
    }

    if cfg.lock.name.trim().is_empty() {
        return Err(ConfigError::Invalid("lock.name must be non-empty"));
    }
    if cfg.lock.timeout_ms == 0 {
        return Err(ConfigError::Invalid("lock.timeout_ms must be > 0"));
    }
    if cfg.lock.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("lock.poll_interval_ms must be > 0"));
    }
    if cfg.lock.kind == LockKind::Lease && cfg.lock.lease_seconds == 0 {
        return Err(ConfigError::Invalid("lock.lease_seconds must be > 0"));
    }

    if cfg.clubs.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("clubs.base_url must be non-empty"));
    }
    if cfg.clubs.names.iter().any(|n| n.trim().is_empty()) {
        return Err(ConfigError::Invalid("clubs.names must not contain blanks"));
    }

    Ok(())
}

/// Returns the example YAML content shipped with the bot.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  session_idle_minutes: 120
  max_workers: 10

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"

sheets:
  registration: "Registration"
  check_inout: "Check Out & In"
  masterlist: "Masterlist"
  scores: "Overall Day 3 Results"
  points_column: 7
  layout:
    start_row: 1
    id: 2
    checkout_time: 12
    expected_return: 14
    reason: 15
    late_sign_in: 17

lock:
  kind: lease
  name: "sheet.lock"
  timeout_ms: 30000
  poll_interval_ms: 100
  lease_seconds: 60

clubs:
  base_url: "https://vivace.smu.edu.sg"
  explore_path: "explore/icon"
  names:
    - "SMU Al Khaleej"
    - "SMU Apsara Cambodia"
    - "SMU Barkada"
    - "SMU Chao Vietnam"
    - "SMU Connect China"
    - "SMU Francophiles"
    - "SMU Indian Cultural Society"
    - "SMU Japanese Cultural Club"
    - "SMU Komunitas Indonesia (SMUKI)"
    - "SMU Myanmar Community"
    - "SMU Roots"
    - "SMU Truly Malaysia"
    - "SMU Woori Sayi"
    - "SMU Yim Siam"
  about_overrides:
    "SMU Francophiles": "francophiles.txt"
"#
}
