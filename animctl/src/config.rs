//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `animctl.yaml` but can be specified via `-f` flag or `ANIMCTL_CONFIG`
//! environment variable. A missing file is fine: every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `animctl.yaml`)
//! 2. **Environment variables** - Variables prefixed with `ANIMCTL_` override YAML values
//! 3. **API_KEY** - Special case: the environment-level provider key, overrides
//!    `generation.api_key` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `ANIMCTL_GENERATION__POLL_INTERVAL=2s` sets the `generation.poll_interval` field.
//!
//! ## Example
//!
//! ```yaml
//! store:
//!   data_dir: ./data
//!   load_timeout: 3s
//! credits:
//!   starting_grant: 5
//! generation:
//!   model: veo-3.1-fast-generate-preview
//!   poll_interval: 5s
//!   poll_timeout: 10m
//! auth:
//!   local:
//!     uid: local-admin
//!     name: Local Admin
//!     email: admin@example.com
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::generation::{AspectRatio, Resolution};

/// CLI args: config file plus the command to run
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "ANIMCTL_CONFIG", default_value = "animctl.yaml")]
    pub config: String,

    /// Validate configuration and exit without running a command.
    #[arg(long)]
    pub validate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the signed-in identity and the views it can reach
    Whoami,
    /// Manage identities
    #[command(subcommand)]
    Users(UsersCommand),
    /// Dashboard totals
    Stats,
    /// Breakdowns by plan, payment method and role
    Analytics,
    /// List transactions visible to the signed-in identity
    Transactions,
    /// Show or change the application configuration
    #[command(subcommand, name = "config")]
    Settings(SettingsCommand),
    /// Animate an image into a video
    Generate {
        /// Source image
        #[arg(long)]
        image: PathBuf,
        /// Optional prompt describing the motion
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long, default_value = "16:9")]
        aspect_ratio: AspectRatio,
        #[arg(long, default_value = "720p")]
        resolution: Resolution,
        /// Where to write the video (default: `<video id>.mp4`)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum UsersCommand {
    List,
    SetCredits { id: String, credits: u32 },
    Suspend { id: String },
    Activate { id: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommand {
    Show,
    SetVeoKey {
        key: String,
        /// Store the key but leave the provider disabled
        #[arg(long)]
        disable: bool,
    },
    SetAppName { name: String },
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store: StoreConfig,
    pub credits: CreditsConfig,
    pub generation: GenerationConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding the persisted store blob
    pub data_dir: PathBuf,
    /// How long the configuration load may take before defaults are used
    #[serde(with = "humantime_serde")]
    pub load_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            load_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreditsConfig {
    /// Credits granted to a newly created base-role identity
    pub starting_grant: u32,
    /// Credits granted to the bootstrap administrator
    pub admin_starting_grant: u32,
    /// Promote the first identity ever recorded to admin and seed the configuration
    pub bootstrap_admin: bool,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            starting_grant: 5,
            admin_starting_grant: 9999,
            bootstrap_admin: true,
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub base_url: Url,
    pub model: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    /// Budget for polling, measured from submission. Submit and download calls are not bounded by it.
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    /// Prompt sent when the caller gives none
    pub default_prompt: String,
    /// Environment-level provider key, used when no administrator key is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://generativelanguage.googleapis.com").expect("static URL is valid"),
            model: "veo-3.1-fast-generate-preview".to_string(),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 120,
            poll_timeout: Duration::from_secs(15 * 60),
            default_prompt: "Animate this image naturally".to_string(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("base_url", &self.base_url.as_str())
            .field("model", &self.model)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("poll_timeout", &self.poll_timeout)
            .field("default_prompt", &self.default_prompt)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Identity the command-line authenticator signs in as
    pub local: LocalIdentityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalIdentityConfig {
    pub uid: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl Default for LocalIdentityConfig {
    fn default() -> Self {
        Self {
            uid: "local-admin".to_string(),
            name: "Local Admin".to_string(),
            email: "admin@localhost".to_string(),
            avatar: None,
        }
    }
}

/// Configuration rejected by [`Config::validate`]
#[derive(Debug, thiserror::Error)]
#[error("Config validation: {0}")]
pub struct ConfigError(String);

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.poll_interval.is_zero() {
            return Err(ConfigError("generation.poll_interval must be greater than zero".to_string()));
        }
        if self.generation.max_poll_attempts == 0 {
            return Err(ConfigError("generation.max_poll_attempts must be at least 1".to_string()));
        }
        if self.generation.model.trim().is_empty() {
            return Err(ConfigError("generation.model cannot be empty".to_string()));
        }
        if self.auth.local.uid.trim().is_empty() {
            return Err(ConfigError("auth.local.uid cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can override specific values
            .merge(Env::prefixed("ANIMCTL_").split("__"))
            // Environment-level provider key
            .merge(Env::raw().only(&["API_KEY"]).map(|_| "generation.api_key".into()))
    }
}
