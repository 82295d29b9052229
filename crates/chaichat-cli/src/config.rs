use anyhow::{Context, Result, anyhow, bail};
use chaichat_core::providers::HttpClient;
use chaichat_core::providers::gemini::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
use chaichat_core::providers::openai::{DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL};
use chaichat_core::{
    Credentials, Dispatcher, GeminiProvider, LlmProvider, OpenAiProvider, PersonaRegistry,
    ProviderKind,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Written by `chaichat init`
pub const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaichatConfig {
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

// ── Chat Config ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_persona")]
    pub default_persona: String,
    /// Optional TOML file with extra or overriding personas
    #[serde(default)]
    pub personas_file: String,
    #[serde(default = "default_history_dir")]
    pub history_dir: String,
}

fn default_persona() -> String {
    "hitesh".to_string()
}

fn default_history_dir() -> String {
    "~/.chaichat/history".to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_persona: default_persona(),
            personas_file: String::new(),
            history_dir: default_history_dir(),
        }
    }
}

// ── Provider Config ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: OpenAiProviderConfig,
    #[serde(default)]
    pub gemini: GeminiProviderConfig,
    #[serde(default = "default_failover_order")]
    pub failover_order: Vec<String>,
}

fn default_failover_order() -> Vec<String> {
    vec!["openai".to_string(), "gemini".to_string()]
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: OpenAiProviderConfig::default(),
            gemini: GeminiProviderConfig::default(),
            failover_order: default_failover_order(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
}

impl std::fmt::Debug for OpenAiProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

fn default_openai_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}
fn default_openai_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

impl Default for OpenAiProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openai_base_url(),
            model: default_openai_model(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GeminiProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

impl std::fmt::Debug for GeminiProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

fn default_gemini_base_url() -> String {
    DEFAULT_GEMINI_BASE_URL.to_string()
}
fn default_gemini_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

impl Default for GeminiProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
        }
    }
}

// ── Gateway Config ──────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_token: String,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("auth_token", &mask_secret(&self.auth_token))
            .finish()
    }
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8787
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            port: default_gateway_port(),
            auth_token: String::new(),
        }
    }
}

impl GatewayConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("Invalid gateway bind address '{}:{}'", self.bind, self.port))
    }
}

/// Mask a secret for Debug output and logs.
/// Shows first 3 and last 4 chars of keys longer than 7 chars, otherwise "***".
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chaichat")
}

impl ChaichatConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        // Keys live in this file; refuse group/world readable copies
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    bail!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain API keys. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    );
                }
            }
        }

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `chaichat init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.warn_hardcoded_secrets(&content);
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Expand allowlisted `${VAR}`s, parse, and validate
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validate_base_url("providers.openai.base_url", &self.providers.openai.base_url)?;
        validate_base_url("providers.gemini.base_url", &self.providers.gemini.base_url)?;
        self.failover_order()?;
        self.gateway.socket_addr()?;
        Ok(())
    }

    // Looks at the raw text since expansion has already replaced ${VAR}
    fn warn_hardcoded_secrets(&self, raw: &str) {
        let hardcoded = |value: &str| !value.is_empty() && raw.contains(value);
        if hardcoded(&self.providers.openai.api_key) {
            warn!(
                "OpenAI API key is hardcoded in config file. For security, use environment variables: api_key = \"${{OPENAI_API_KEY}}\""
            );
        }
        if hardcoded(&self.providers.gemini.api_key) {
            warn!(
                "Gemini API key is hardcoded in config file. For security, use environment variables: api_key = \"${{GEMINI_API_KEY}}\""
            );
        }
        if hardcoded(&self.gateway.auth_token) {
            warn!(
                "Gateway token is hardcoded in config file. For security, use environment variables: auth_token = \"${{CHAICHAT_GATEWAY_TOKEN}}\""
            );
        }
    }

    /// Provider kinds in the configured order, without duplicates
    pub fn failover_order(&self) -> Result<Vec<ProviderKind>> {
        let mut order = Vec::new();
        for name in &self.providers.failover_order {
            let kind: ProviderKind = name.parse().map_err(|e: String| anyhow!(e))?;
            if order.contains(&kind) {
                bail!("Provider '{}' listed twice in failover_order", name);
            }
            order.push(kind);
        }
        if order.is_empty() {
            bail!("failover_order must name at least one provider");
        }
        Ok(order)
    }

    /// Keys from the config (blank keys are treated as absent)
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            Some(self.providers.openai.api_key.as_str()),
            Some(self.providers.gemini.api_key.as_str()),
        )
    }

    /// Built-in personas plus the configured personas file, if any
    pub fn personas(&self) -> Result<PersonaRegistry> {
        let registry = if self.chat.personas_file.trim().is_empty() {
            PersonaRegistry::builtin()?
        } else {
            PersonaRegistry::load_file(&expand_home(&self.chat.personas_file))?
        };
        if !registry.contains(&self.chat.default_persona) {
            bail!(
                "Default persona '{}' is not defined (available: {})",
                self.chat.default_persona,
                registry.ids().join(", ")
            );
        }
        Ok(registry)
    }

    /// Dispatcher over the configured providers, in failover order
    pub fn dispatcher(&self, personas: Arc<PersonaRegistry>) -> Result<Dispatcher> {
        // One connection pool shared by every provider
        let client = HttpClient::new();
        let providers: Vec<Arc<dyn LlmProvider>> = self
            .failover_order()?
            .into_iter()
            .map(|kind| -> Arc<dyn LlmProvider> {
                match kind {
                    ProviderKind::OpenAi => Arc::new(OpenAiProvider::with_client(
                        client.clone(),
                        &self.providers.openai.model,
                        &self.providers.openai.base_url,
                    )),
                    ProviderKind::Gemini => Arc::new(GeminiProvider::with_client(
                        client.clone(),
                        &self.providers.gemini.model,
                        &self.providers.gemini.base_url,
                    )),
                }
            })
            .collect();
        Dispatcher::new(personas, providers)
    }

    pub fn history_dir(&self) -> PathBuf {
        expand_home(&self.chat.history_dir)
    }
}

fn validate_base_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .with_context(|| format!("{} is not a valid URL: '{}'", field, value))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("{} must use http or https, got '{}'", field, parsed.scheme());
    }
    Ok(())
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(s).to_path_buf()
}

/// Allowlist of environment variable names that may be expanded in config files.
const ALLOWED_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_AI_API_KEY",
    "CHAICHAT_GATEWAY_TOKEN",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while let Some(start) = result[pos..].find("${") {
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Left as-is so it is visible in `chaichat config`
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}
