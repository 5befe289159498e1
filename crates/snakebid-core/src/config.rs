// Configuration loading and parsing (auction.toml, credentials.toml).

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::money::Money;
use crate::rules::AuctionRules;
use crate::team::{TeamId, TeamSeed};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub league: LeagueConfig,
    pub auction: AuctionConfig,
    pub credentials: CredentialsConfig,
    pub ws_port: u16,
    pub request_timeout: Duration,
    pub db_path: String,
    pub db_timeout: Duration,
}

// ---------------------------------------------------------------------------
// auction.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire auction.toml file.
#[derive(Debug, Clone, Deserialize)]
struct AuctionFile {
    league: LeagueConfig,
    auction: AuctionConfig,
    server: ServerSection,
    database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueConfig {
    pub name: String,
    pub initial_budget: Money,
    pub max_roster_size: usize,
    /// Teams in first-round nomination order.
    pub teams: Vec<TeamSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuctionConfig {
    pub min_base_price: Money,
    pub max_base_price: Money,
    pub bid_increments: Vec<Money>,
    pub timer_secs: u32,
    pub bid_extension_secs: u32,
    pub persist_interval_secs: u32,
    pub next_auction_delay_ms: u64,
    #[serde(default = "default_expiry_grace_secs")]
    pub expiry_grace_secs: u32,
}

fn default_expiry_grace_secs() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    port: u16,
    #[serde(default = "default_timeout_ms")]
    request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub admin_secret: Option<String>,
    /// Team id -> login secret.
    #[serde(default)]
    pub team_secrets: HashMap<String, String>,
}

impl CredentialsConfig {
    pub fn team_secret(&self, team: &TeamId) -> Option<&str> {
        self.team_secrets.get(team.as_str()).map(String::as_str)
    }
}

impl Config {
    /// The parameters the auction rules run with.
    pub fn rules(&self) -> AuctionRules {
        AuctionRules {
            teams: self.league.teams.clone(),
            initial_budget: self.league.initial_budget,
            max_roster_size: self.league.max_roster_size,
            min_base_price: self.auction.min_base_price,
            max_base_price: self.auction.max_base_price,
            bid_increments: self.auction.bid_increments.clone(),
            timer_secs: self.auction.timer_secs,
            bid_extension_secs: self.auction.bid_extension_secs,
            persist_interval_secs: self.auction.persist_interval_secs,
            next_auction_delay: Duration::from_millis(self.auction.next_auction_delay_ms),
            expiry_grace_secs: self.auction.expiry_grace_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/auction.toml` and
/// (optionally) `config/credentials.toml`, relative to `base_dir`.
///
/// Does not copy defaults; prefer `load_config()`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- auction.toml (required) ---
    let auction_path = config_dir.join("auction.toml");
    let auction_text = read_file(&auction_path)?;
    let file: AuctionFile = toml::from_str(&auction_text).map_err(|e| ConfigError::ParseError {
        path: auction_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        league: file.league,
        auction: file.auction,
        credentials,
        ws_port: file.server.port,
        request_timeout: Duration::from_millis(file.server.request_timeout_ms),
        db_path: file.database.path,
        db_timeout: Duration::from_millis(file.database.timeout_ms),
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Loads config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let league = &config.league;

    if league.teams.len() < 2 {
        return Err(invalid(
            "league.teams",
            format!("need at least 2 teams, got {}", league.teams.len()),
        ));
    }
    let mut seen = HashSet::new();
    for team in &league.teams {
        if team.id.as_str().trim().is_empty() {
            return Err(invalid("league.teams.id", "must not be empty"));
        }
        if !seen.insert(team.id.clone()) {
            return Err(invalid(
                "league.teams.id",
                format!("duplicate team id `{}`", team.id),
            ));
        }
    }

    if !league.initial_budget.is_positive() {
        return Err(invalid(
            "league.initial_budget",
            format!("must be > 0, got {}", league.initial_budget),
        ));
    }
    if league.max_roster_size == 0 {
        return Err(invalid("league.max_roster_size", "must be > 0"));
    }

    let auction = &config.auction;
    if auction.bid_increments.is_empty() {
        return Err(invalid("auction.bid_increments", "must not be empty"));
    }
    if let Some(bad) = auction.bid_increments.iter().find(|i| !i.is_positive()) {
        return Err(invalid(
            "auction.bid_increments",
            format!("every increment must be > 0, got {bad}"),
        ));
    }
    if !auction.min_base_price.is_positive() {
        return Err(invalid(
            "auction.min_base_price",
            format!("must be > 0, got {}", auction.min_base_price),
        ));
    }
    if auction.min_base_price > auction.max_base_price {
        return Err(invalid(
            "auction.max_base_price",
            format!(
                "must be >= min_base_price ({}), got {}",
                auction.min_base_price, auction.max_base_price
            ),
        ));
    }
    if auction.timer_secs == 0 {
        return Err(invalid("auction.timer_secs", "must be > 0"));
    }
    if auction.bid_extension_secs > auction.timer_secs {
        return Err(invalid(
            "auction.bid_extension_secs",
            format!(
                "must be <= timer_secs ({}), got {}",
                auction.timer_secs, auction.bid_extension_secs
            ),
        ));
    }
    if auction.persist_interval_secs == 0 {
        return Err(invalid("auction.persist_interval_secs", "must be > 0"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
