//! Runtime configuration
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `KESTREL_`-prefixed environment variables (double underscore as the
//! section separator, e.g. `KESTREL_LLM__BASE_URL`).

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// LLM endpoint configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Agent loop configuration
    #[serde(default)]
    pub agent: AgentConfig,
    /// Planning tool configuration
    #[serde(default)]
    pub planning: PlanningConfig,
}

/// LLM endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the chat-completions server (without a path suffix)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key; local deployments commonly use a literal sentinel
    #[serde(skip_serializing, default = "default_api_key")]
    pub api_key: SecretString,
    /// Model identifier sent in requests
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Top-p sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Per-request timeout
    #[serde(with = "humantime_serde", default = "default_llm_timeout")]
    pub timeout: Duration,
    /// Retry attempts for connection and 5xx failures
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            base_url: default_base_url(),
            api_key: default_api_key(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            timeout: default_llm_timeout(),
            max_retries: default_retries(),
        }
    }
}

/// Agent loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum loop iterations (one transition into or out of executing)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// System prompt seeded into memory
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Token budget for the rolling message store
    #[serde(default = "default_memory_tokens")]
    pub memory_max_tokens: usize,
    /// How many recent tool results feed the fallback response
    #[serde(default = "default_synthesis_results")]
    pub synthesis_results: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            max_iterations: default_max_iterations(),
            system_prompt: default_system_prompt(),
            memory_max_tokens: default_memory_tokens(),
            synthesis_results: default_synthesis_results(),
        }
    }
}

/// Planning tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    /// Directory holding one `<plan_id>.json` per plan
    #[serde(default = "default_plans_dir")]
    pub plans_dir: PathBuf,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        PlanningConfig {
            plans_dir: default_plans_dir(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:1234".to_string()
}

fn default_api_key() -> SecretString {
    // Sentinel accepted by local OpenAI-compatible servers
    SecretString::from("not-needed".to_string())
}

fn default_model() -> String {
    "local-model".to_string()
}

fn default_temperature() -> f32 {
    0.5
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_top_p() -> f32 {
    0.95
}

fn default_llm_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_retries() -> u32 {
    3
}

fn default_max_iterations() -> u32 {
    15
}

fn default_system_prompt() -> String {
    "You are Kestrel, an AI agent that helps users with their tasks. \
     You have access to tools; call them when they help, and answer \
     directly when they do not. Be concise but informative."
        .to_string()
}

fn default_memory_tokens() -> usize {
    16_000
}

fn default_synthesis_results() -> usize {
    5
}

fn default_plans_dir() -> PathBuf {
    PathBuf::from("./plans")
}

/// Load configuration from an optional file plus environment overrides.
pub fn load_config(path: Option<&str>) -> Result<RuntimeConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path));
    } else {
        builder = builder.add_source(config::File::with_name("kestrel").required(false));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix("KESTREL")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
