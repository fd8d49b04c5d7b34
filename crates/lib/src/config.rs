//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.shellcast/config.json`) and environment.
//! Secrets and the target conversation may come from env so the file can stay token-free.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Env var holding the one conversation the bridge listens to.
pub const ENV_TARGET_CHANNEL_ID: &str = "TARGET_CHANNEL_ID";
pub const ENV_SLACK_BOT_TOKEN: &str = "SLACK_BOT_TOKEN";
pub const ENV_SLACK_APP_TOKEN: &str = "SLACK_APP_TOKEN";
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_CONFIG_PATH: &str = "SHELLCAST_CONFIG_PATH";

const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Which conversation to listen to and over which transport.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// How received commands are run.
    #[serde(default)]
    pub command: CommandConfig,

    /// How command output is presented.
    #[serde(default)]
    pub reply: ReplyConfig,

    /// Per-transport credentials and endpoints.
    #[serde(default)]
    pub channels: ChannelsConfig,
}

/// Conversation target and transport selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// The only conversation whose messages are executed. Overridden by TARGET_CHANNEL_ID env.
    pub conversation_id: Option<String>,

    #[serde(default)]
    pub transport: TransportKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Slack Socket Mode (app token + bot token).
    #[default]
    Slack,

    /// Telegram Bot API long polling.
    Telegram,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slack" => Ok(Self::Slack),
            "telegram" => Ok(Self::Telegram),
            other => Err(format!("unknown transport: {} (expected slack or telegram)", other)),
        }
    }
}

/// Command interpreter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandConfig {
    /// Wall-clock budget per command in seconds (default 15).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Interpreter invoked with the command text (default /bin/sh on unix, cmd on windows).
    pub shell: Option<PathBuf>,

    /// Directory commands run in. Defaults to the bridge's own working directory.
    pub working_dir: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    15
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            shell: None,
            working_dir: None,
        }
    }
}

/// Presentation of the reply block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    /// Only the selected output inside the block.
    #[default]
    Plain,

    /// A `user@host:path$ command` line before the output, like a terminal.
    Prompt,
}

impl std::str::FromStr for ReplyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "prompt" => Ok(Self::Prompt),
            other => Err(format!("unknown reply mode: {} (expected plain or prompt)", other)),
        }
    }
}

/// Reply formatting options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyConfig {
    #[serde(default)]
    pub mode: ReplyMode,

    /// In prompt mode, name the requester above the block (looked up through the transport).
    #[serde(default)]
    pub show_author: bool,

    /// Keep at most this many characters of output (tail kept). 0 disables the cap.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

fn default_max_output_chars() -> usize {
    3500
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            mode: ReplyMode::default(),
            show_author: false,
            max_output_chars: default_max_output_chars(),
        }
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub slack: SlackChannelConfig,

    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Slack channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackChannelConfig {
    /// Bot token (xoxb-...). Overridden by SLACK_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// App-level token (xapp-...) for Socket Mode. Overridden by SLACK_APP_TOKEN env when set.
    pub app_token: Option<String>,
    /// Web API base URL; only changed for tests or proxies.
    pub api_base: Option<String>,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    pub api_base: Option<String>,
}

/// Validation failures that keep the bridge from starting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the executor and formatter need. No transport secrets.
#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub command: CommandSettings,
    pub reply: ReplyConfig,
}

#[derive(Debug, Clone)]
pub struct CommandSettings {
    pub timeout: Duration,
    pub shell: PathBuf,
    pub working_dir: Option<PathBuf>,
}

/// Resolved transport credentials for the selected channel.
#[derive(Debug, Clone)]
pub enum TransportSettings {
    Slack {
        bot_token: String,
        app_token: String,
        api_base: String,
    },
    Telegram {
        bot_token: String,
        api_base: String,
    },
}

/// Validated, immutable runtime settings. Built once at startup.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub conversation_id: String,
    pub transport: TransportSettings,
    pub local: LocalSettings,
}

/// Default interpreter for the current platform.
pub fn default_shell() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("cmd")
    } else {
        PathBuf::from("/bin/sh")
    }
}

/// Env value if set and non-blank, otherwise the trimmed non-blank config value.
fn env_or_config(
    env: &impl Fn(&str) -> Option<String>,
    name: &str,
    configured: Option<&String>,
) -> Option<String> {
    env(name)
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            configured
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Executor and formatter settings; valid without any transport configured.
pub fn resolve_local_settings(config: &Config) -> Result<LocalSettings, ConfigError> {
    if config.command.timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "command.timeoutSecs must be greater than 0".to_string(),
        ));
    }
    let shell = config
        .command
        .shell
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(default_shell);
    Ok(LocalSettings {
        command: CommandSettings {
            timeout: Duration::from_secs(config.command.timeout_secs),
            shell,
            working_dir: config.command.working_dir.clone(),
        },
        reply: config.reply.clone(),
    })
}

/// Resolve runtime settings from config and process env. All missing values are reported at once.
pub fn resolve_settings(config: &Config) -> Result<BridgeSettings, ConfigError> {
    resolve_settings_with(config, |name| std::env::var(name).ok())
}

/// Same as [`resolve_settings`] with an explicit env lookup.
pub fn resolve_settings_with(
    config: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> Result<BridgeSettings, ConfigError> {
    let mut missing = Vec::new();

    let conversation_id = env_or_config(
        &env,
        ENV_TARGET_CHANNEL_ID,
        config.bridge.conversation_id.as_ref(),
    );
    if conversation_id.is_none() {
        missing.push(format!("bridge.conversationId ({})", ENV_TARGET_CHANNEL_ID));
    }

    let transport = match config.bridge.transport {
        TransportKind::Slack => {
            let slack = &config.channels.slack;
            let bot_token = env_or_config(&env, ENV_SLACK_BOT_TOKEN, slack.bot_token.as_ref());
            let app_token = env_or_config(&env, ENV_SLACK_APP_TOKEN, slack.app_token.as_ref());
            if bot_token.is_none() {
                missing.push(format!("channels.slack.botToken ({})", ENV_SLACK_BOT_TOKEN));
            }
            if app_token.is_none() {
                missing.push(format!("channels.slack.appToken ({})", ENV_SLACK_APP_TOKEN));
            }
            match (bot_token, app_token) {
                (Some(bot_token), Some(app_token)) => Some(TransportSettings::Slack {
                    bot_token,
                    app_token,
                    api_base: api_base_or(slack.api_base.as_ref(), DEFAULT_SLACK_API_BASE),
                }),
                _ => None,
            }
        }
        TransportKind::Telegram => {
            let telegram = &config.channels.telegram;
            match env_or_config(&env, ENV_TELEGRAM_BOT_TOKEN, telegram.bot_token.as_ref()) {
                Some(bot_token) => Some(TransportSettings::Telegram {
                    bot_token,
                    api_base: api_base_or(telegram.api_base.as_ref(), DEFAULT_TELEGRAM_API_BASE),
                }),
                None => {
                    missing.push(format!(
                        "channels.telegram.botToken ({})",
                        ENV_TELEGRAM_BOT_TOKEN
                    ));
                    None
                }
            }
        }
    };

    match (conversation_id, transport) {
        (Some(conversation_id), Some(transport)) if missing.is_empty() => Ok(BridgeSettings {
            conversation_id,
            transport,
            local: resolve_local_settings(config)?,
        }),
        _ => Err(ConfigError::Missing(missing)),
    }
}

fn api_base_or(configured: Option<&String>, default: &str) -> String {
    configured
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var(ENV_CONFIG_PATH).map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".shellcast").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or SHELLCAST_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
