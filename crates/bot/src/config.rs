use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bot::BotSettings;
use crate::supervisor::SupervisorSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub bot: BotConfig,
    pub storage: StorageConfig,
    pub timing: TimingConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub admin_port: u16,
    pub admin_password: String,
    /// Full bridge URL; overrides host and port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            admin_port: 3977,
            admin_password: String::new(),
            url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub name: String,
    pub command_prefix: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "ServerBot".to_string(),
            command_prefix: "!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_file: PathBuf,
    pub messages_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("state.json"),
            messages_file: PathBuf::from("messages.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub startup_reapply_delay_secs: u64,
    pub reconnect_delay_secs: u64,
    pub confirm_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            startup_reapply_delay_secs: 5,
            reconnect_delay_secs: 5,
            confirm_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Forget a company's password when it is reset or removed
    pub clear_password_on_reset: bool,
    /// Exit when the very first login is rejected
    pub fail_fast_on_auth: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            clear_password_on_reset: false,
            fail_fast_on_auth: true,
        }
    }
}

impl Config {
    /// Platform config file, e.g. `~/.config/pwbot/config.toml`
    pub fn user_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "pwbot", "pwbot")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// The file `load` would read, if any
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var("PWBOT_CONFIG") {
            return Some(PathBuf::from(path));
        }

        let mut default_paths = vec![
            PathBuf::from("pwbot.toml"),
            PathBuf::from("config/pwbot.toml"),
        ];
        if let Ok(path) = Self::user_config_path() {
            default_paths.push(path);
        }
        default_paths.into_iter().find(|path| path.exists())
    }

    /// Load the file (or defaults), then apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_path(explicit) {
            Some(path) => Self::load_from_path(&path)?,
            None => {
                tracing::warn!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Override settings from environment variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("OTTD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("OTTD_ADMIN_PORT") {
            self.server.admin_port = port
                .trim()
                .parse()
                .with_context(|| format!("OTTD_ADMIN_PORT is not a port number: {}", port))?;
        }
        if let Some(password) = lookup("OTTD_ADMIN_PASSWORD") {
            self.server.admin_password = password;
        }
        if let Some(name) = lookup("BOT_NAME") {
            self.bot.name = name;
        }
        if let Some(prefix) = lookup("COMMAND_PREFIX") {
            self.bot.command_prefix = prefix;
        }
        if let Some(path) = lookup("STATE_FILE") {
            self.storage.state_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("MESSAGES_FILE") {
            self.storage.messages_file = PathBuf::from(path);
        }

        let seconds = |key: &str, target: &mut u64| -> Result<()> {
            if let Some(value) = lookup(key) {
                *target = value
                    .trim()
                    .parse()
                    .with_context(|| format!("{} is not a number of seconds: {}", key, value))?;
            }
            Ok(())
        };
        seconds("STARTUP_REAPPLY_DELAY_SECONDS", &mut self.timing.startup_reapply_delay_secs)?;
        seconds("RECONNECT_DELAY_SECONDS", &mut self.timing.reconnect_delay_secs)?;
        seconds("CONFIRM_TIMEOUT_SECONDS", &mut self.timing.confirm_timeout_secs)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.admin_password.is_empty() {
            anyhow::bail!(
                "Admin password is not set. Use OTTD_ADMIN_PASSWORD or server.admin_password"
            );
        }
        if self.bot.command_prefix.trim().is_empty() {
            anyhow::bail!("Command prefix must not be empty");
        }
        Ok(())
    }

    /// WebSocket URL of the admin bridge
    pub fn url(&self) -> String {
        self.server
            .url
            .clone()
            .unwrap_or_else(|| format!("ws://{}:{}", self.server.host, self.server.admin_port))
    }

    /// Copy safe to print
    pub fn masked(&self) -> Self {
        let mut config = self.clone();
        if !config.server.admin_password.is_empty() {
            config.server.admin_password = "****".to_string();
        }
        config
    }

    pub fn bot_settings(&self) -> BotSettings {
        BotSettings {
            bot_name: self.bot.name.clone(),
            command_prefix: self.bot.command_prefix.clone(),
            confirm_timeout: Duration::from_secs(self.timing.confirm_timeout_secs),
            clear_password_on_reset: self.policy.clear_password_on_reset,
        }
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            bot_name: self.bot.name.clone(),
            admin_password: self.server.admin_password.clone(),
            reapply_delay: Duration::from_secs(self.timing.startup_reapply_delay_secs),
            reconnect_delay: Duration::from_secs(self.timing.reconnect_delay_secs),
            fail_fast_on_auth: self.policy.fail_fast_on_auth,
        }
    }
}
