//! Configuration loading, validation, and management for PagePilot.
//!
//! Loads configuration from `~/.pagepilot/config.toml` with environment
//! variable overrides. The resulting [`AppConfig`] is passed explicitly into
//! every workflow phase; nothing reads configuration from global state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.pagepilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key used when the selected provider has no key of its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub default_provider: ProviderKind,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific overrides, keyed by provider kind name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// The closed set of language model backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini via its OpenAI-compatible endpoint
    #[default]
    Google,
    /// Vercel-style AI gateway
    Gateway,
    OpenRouter,
    /// NVIDIA NIM
    Nim,
    /// Any OpenAI-compatible endpoint; requires `api_url`
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::Gateway => "gateway",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Nim => "nim",
            ProviderKind::Custom => "custom",
        }
    }

    /// Provider-specific API key environment variable.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Google => Some("GOOGLE_API_KEY"),
            ProviderKind::Gateway => Some("AI_GATEWAY_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::Nim => Some("NVIDIA_API_KEY"),
            ProviderKind::Custom => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google" | "gemini" => Ok(ProviderKind::Google),
            "gateway" => Ok(ProviderKind::Gateway),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "nim" | "nvidia" => Ok(ProviderKind::Nim),
            "custom" => Ok(ProviderKind::Custom),
            other => Err(ConfigError::ValidationError(format!(
                "unknown provider '{other}' (expected google, gateway, openrouter, nim or custom)"
            ))),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("workflow", &self.workflow)
            .field("approval", &self.approval)
            .field("tools", &self.tools)
            .field("search", &self.search)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Control-loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Additional execution attempts the evaluator may request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Model steps per execution attempt
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Consecutive failed tool calls before the loop stops
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// How many recent navigations are inspected for a loop
    #[serde(default = "default_navigation_loop_window")]
    pub navigation_loop_window: usize,

    /// Identical targets within the window that count as a loop
    #[serde(default = "default_navigation_loop_threshold")]
    pub navigation_loop_threshold: usize,

    /// Planner generation attempts before the heuristic fallback plan
    #[serde(default = "default_planner_attempts")]
    pub planner_attempts: u32,

    /// Tasks allowed in progress at once in the ledger
    #[serde(default = "default_ledger_concurrency")]
    pub ledger_concurrency: usize,

    #[serde(default = "default_true")]
    pub summarize: bool,

    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

fn default_max_retries() -> u32 {
    2
}
fn default_max_steps() -> u32 {
    100
}
fn default_max_consecutive_errors() -> u32 {
    3
}
fn default_navigation_loop_window() -> usize {
    4
}
fn default_navigation_loop_threshold() -> usize {
    3
}
fn default_planner_attempts() -> u32 {
    2
}
fn default_ledger_concurrency() -> usize {
    1
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_steps: default_max_steps(),
            max_consecutive_errors: default_max_consecutive_errors(),
            navigation_loop_window: default_navigation_loop_window(),
            navigation_loop_threshold: default_navigation_loop_threshold(),
            planner_attempts: default_planner_attempts(),
            ledger_concurrency: default_ledger_concurrency(),
            summarize: true,
            evaluation: EvaluationConfig::default(),
        }
    }
}

/// Default evaluation criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub required_tools: Vec<String>,

    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    #[serde(default = "default_max_errors")]
    pub max_errors: u32,

    #[serde(default = "default_text_min_length")]
    pub text_min_length: usize,
}

fn default_min_success_rate() -> f64 {
    0.7
}
fn default_max_errors() -> u32 {
    3
}
fn default_text_min_length() -> usize {
    100
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            required_tools: vec![],
            min_success_rate: default_min_success_rate(),
            max_errors: default_max_errors(),
            text_min_length: default_text_min_length(),
        }
    }
}

/// Which tool calls need a human confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Navigation to these domains (and their subdomains) never asks
    #[serde(default = "default_whitelisted_domains")]
    pub whitelisted_domains: Vec<String>,

    /// Typing more characters than this asks for confirmation
    #[serde(default = "default_type_text_threshold")]
    pub type_text_threshold: usize,

    /// Tools that always ask
    #[serde(default)]
    pub always_confirm: Vec<String>,

    /// Seconds to wait for a decision before treating it as a rejection; 0 waits forever
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_whitelisted_domains() -> Vec<String> {
    vec![
        "google.com".into(),
        "wikipedia.org".into(),
        "github.com".into(),
        "example.com".into(),
    ]
}
fn default_type_text_threshold() -> usize {
    100
}
fn default_approval_timeout_secs() -> u64 {
    300
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            whitelisted_domains: default_whitelisted_domains(),
            type_text_threshold: default_type_text_threshold(),
            always_confirm: vec![],
            timeout_secs: default_approval_timeout_secs(),
        }
    }
}

/// Per-tool timeouts and tool-level retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    #[serde(default = "default_navigation_timeout_ms")]
    pub screenshot_timeout_ms: u64,

    /// click, type, scroll, page context
    #[serde(default = "default_interaction_timeout_ms")]
    pub interaction_timeout_ms: u64,

    #[serde(default = "default_keypress_timeout_ms")]
    pub keypress_timeout_ms: u64,

    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Total attempts per tool call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay; doubles after each failed attempt
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}
fn default_interaction_timeout_ms() -> u64 {
    10_000
}
fn default_keypress_timeout_ms() -> u64 {
    3_000
}
fn default_wait_timeout_ms() -> u64 {
    15_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_max_retry_delay_ms() -> u64 {
    4_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: default_navigation_timeout_ms(),
            screenshot_timeout_ms: default_navigation_timeout_ms(),
            interaction_timeout_ms: default_interaction_timeout_ms(),
            keypress_timeout_ms: default_keypress_timeout_ms(),
            wait_timeout_ms: default_wait_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            max_results: default_max_results(),
        }
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &redact(&self.api_key))
            .field("max_results", &self.max_results)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.pagepilot/config.toml).
    ///
    /// Environment overrides:
    /// - `PAGEPILOT_API_KEY` (fallback key for every provider)
    /// - `PAGEPILOT_PROVIDER`
    /// - `PAGEPILOT_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("PAGEPILOT_API_KEY").ok();
        }

        if let Ok(provider) = std::env::var("PAGEPILOT_PROVIDER") {
            config.default_provider = provider.parse()?;
        }

        if let Ok(model) = std::env::var("PAGEPILOT_MODEL") {
            config.default_model = model;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn config_dir() -> PathBuf {
        dirs_home().join(".pagepilot")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.workflow.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "workflow.max_steps must be > 0".into(),
            ));
        }

        if self.workflow.max_consecutive_errors == 0 {
            return Err(ConfigError::ValidationError(
                "workflow.max_consecutive_errors must be > 0".into(),
            ));
        }

        if self.workflow.navigation_loop_threshold < 2 {
            return Err(ConfigError::ValidationError(
                "workflow.navigation_loop_threshold must be at least 2".into(),
            ));
        }

        if self.workflow.ledger_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "workflow.ledger_concurrency must be > 0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.workflow.evaluation.min_success_rate) {
            return Err(ConfigError::ValidationError(
                "workflow.evaluation.min_success_rate must be between 0.0 and 1.0".into(),
            ));
        }

        if self.tools.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "tools.max_attempts must be > 0".into(),
            ));
        }

        if self.default_provider == ProviderKind::Custom
            && self
                .provider(ProviderKind::Custom)
                .and_then(|p| p.api_url.as_ref())
                .is_none()
        {
            return Err(ConfigError::ValidationError(
                "the custom provider needs providers.custom.api_url".into(),
            ));
        }

        Ok(())
    }

    /// Provider-specific settings, if configured.
    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        self.providers.get(kind.as_str())
    }

    /// Resolve the API key for a provider: its own config entry, then its
    /// environment variable, then the shared key.
    pub fn api_key_for(&self, kind: ProviderKind) -> Option<String> {
        self.provider(kind)
            .and_then(|p| p.api_key.clone())
            .or_else(|| kind.api_key_env().and_then(|var| std::env::var(var).ok()))
            .or_else(|| self.api_key.clone())
    }

    /// The model to use with a provider, honoring per-provider overrides.
    pub fn model_for(&self, kind: ProviderKind) -> String {
        self.provider(kind)
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: ProviderKind::default(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            workflow: WorkflowConfig::default(),
            approval: ApprovalConfig::default(),
            tools: ToolsConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, ProviderKind::Google);
        assert_eq!(config.workflow.max_retries, 2);
        assert_eq!(config.workflow.max_steps, 100);
        assert_eq!(config.tools.max_attempts, 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = AppConfig::default_toml();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, ProviderKind::Google);
        assert_eq!(parsed.approval.type_text_threshold, 100);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loop_limits_rejected() {
        let mut config = AppConfig::default();
        config.workflow.max_consecutive_errors = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = AppConfig::default();
        config.workflow.navigation_loop_threshold = 1;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = AppConfig::default();
        config.workflow.navigation_loop_threshold = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn approval_timeout_defaults_and_parses() {
        assert_eq!(AppConfig::default().approval.timeout_secs, 300);
        let config: AppConfig = toml::from_str("[approval]\ntimeout_secs = 0\n").unwrap();
        assert_eq!(config.approval.timeout_secs, 0);
        assert!(config.approval.enabled);
    }

    #[test]
    fn custom_provider_requires_url() {
        let config = AppConfig {
            default_provider: ProviderKind::Custom,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_model, "gemini-2.5-flash");
    }

    #[test]
    fn parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_provider = "openrouter"
default_model = "openai/gpt-4o-mini"

[providers.openrouter]
api_key = "sk-or-test"

[workflow]
max_retries = 1

[approval]
always_confirm = ["press_key"]
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_provider, ProviderKind::OpenRouter);
        assert_eq!(config.workflow.max_retries, 1);
        assert_eq!(config.workflow.max_steps, 100);
        assert_eq!(config.approval.always_confirm, vec!["press_key".to_string()]);
        assert_eq!(
            config.api_key_for(ProviderKind::OpenRouter).as_deref(),
            Some("sk-or-test")
        );
    }

    #[test]
    fn zero_tool_attempts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tools]\nmax_attempts = 0\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn provider_kind_parsing() {
        assert_eq!("Gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Google);
        assert_eq!("nvidia".parse::<ProviderKind>().unwrap(), ProviderKind::Nim);
        assert!("bedrock".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn debug_redacts_keys() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
