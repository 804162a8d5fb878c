use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    Openrouter,
    Ollama,
    #[default]
    Openai,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
            LlmProvider::Openai => write!(f, "openai"),
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(LlmProvider::Openrouter),
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" => Ok(LlmProvider::Openai),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// How inbound notifications reach the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InboundMode {
    #[default]
    Webhook,
    Polling,
}

impl FromStr for InboundMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webhook" => Ok(InboundMode::Webhook),
            "polling" => Ok(InboundMode::Polling),
            other => Err(format!("expected 'webhook' or 'polling', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub max_tokens: u32,
    pub system_prompt: String,
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return self.base_url.trim_end_matches('/');
        }
        match self.provider {
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
            LlmProvider::Openai => "https://api.openai.com/v1",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub instance_id: String,
    pub api_token: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mode: InboundMode,
    pub bind_addr: SocketAddr,
    /// Expected `Authorization: Bearer` value on webhook calls, if any.
    pub webhook_token: Option<String>,
    pub poll_backoff: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Phone numbers or chat ids allowed to get replies. Empty allows everyone.
    pub allowed_senders: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub whatsapp: WhatsAppConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub relay: RelayConfig,
    /// Upper bound for every outbound HTTP call.
    pub request_timeout: Duration,
}

const DEFAULT_API_URL: &str = "https://api.green-api.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

fn default_system_prompt() -> String {
    "You are a helpful AI assistant replying to WhatsApp messages. \
     Keep answers short and conversational, and use plain text without markdown."
        .to_string()
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Reads `key`, treating blank values as absent.
fn optional(lookup: Lookup<'_>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(
    lookup: Lookup<'_>,
    key: &'static str,
    aliases: &[&str],
) -> Result<String, ConfigError> {
    std::iter::once(key)
        .chain(aliases.iter().copied())
        .find_map(|k| optional(lookup, k))
        .ok_or(ConfigError::Missing(key))
}

fn parsed<T>(lookup: Lookup<'_>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match optional(lookup, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let whatsapp = WhatsAppConfig {
            instance_id: required(lookup, "WHATSAPP_INSTANCE_ID", &["GREENAPI_INSTANCE_ID"])?,
            api_token: required(lookup, "WHATSAPP_API_KEY", &["GREENAPI_API_TOKEN"])?,
            api_url: optional(lookup, "WHATSAPP_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        };

        let llm = LlmConfig {
            provider: parsed(lookup, "AI_PROVIDER", LlmProvider::default())?,
            model: optional(lookup, "AI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: optional(lookup, "AI_BASE_URL").unwrap_or_default(),
            api_key: required(lookup, "AI_API_KEY", &[])?,
            max_tokens: parsed(lookup, "AI_MAX_TOKENS", 1024)?,
            system_prompt: optional(lookup, "AI_SYSTEM_PROMPT")
                .unwrap_or_else(default_system_prompt),
        };

        let default_addr: SocketAddr = DEFAULT_BIND_ADDR
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "RELAY_BIND_ADDR",
                reason: e.to_string(),
            })?;

        let server = ServerConfig {
            mode: parsed(lookup, "RELAY_INBOUND_MODE", InboundMode::default())?,
            bind_addr: parsed(lookup, "RELAY_BIND_ADDR", default_addr)?,
            webhook_token: optional(lookup, "WEBHOOK_TOKEN"),
            poll_backoff: Duration::from_secs(parsed(lookup, "RELAY_POLL_BACKOFF_SECS", 5)?),
        };

        let relay = RelayConfig {
            allowed_senders: optional(lookup, "RELAY_ALLOWED_SENDERS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        };

        let timeout_secs: u64 = parsed(lookup, "RELAY_REQUEST_TIMEOUT_SECS", 60)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "RELAY_REQUEST_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Config {
            whatsapp,
            llm,
            server,
            relay,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
