use crate::errors::GatewayError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One backend inference engine. Loaded once at startup, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineDescriptor {
    pub key: String,
    pub model: String,
    pub base_url: String,
}

/// On-disk registry document (JSON or YAML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineFile {
    #[serde(default)]
    pub engines: Vec<EngineDescriptor>,
    /// Dedicated backend for non-base tiers.
    #[serde(default)]
    pub premium: Option<EngineDescriptor>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
    Weighted,
    Sticky,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::Random => "random",
            Strategy::Weighted => "weighted",
            Strategy::Sticky => "sticky",
        }
    }
}

impl FromStr for Strategy {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "round_robin" => Ok(Strategy::RoundRobin),
            "random" => Ok(Strategy::Random),
            "weighted" => Ok(Strategy::Weighted),
            "sticky" => Ok(Strategy::Sticky),
            other => Err(GatewayError::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum Tier {
    #[default]
    Base,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Base => "base",
            Tier::Premium => "premium",
        }
    }

    /// Header parsing is forgiving: anything unrecognized is `None` and the
    /// caller falls back to the configured default.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "base" | "free" => Some(Tier::Base),
            "premium" => Some(Tier::Premium),
            _ => None,
        }
    }

    /// Only the base tier load-balances across the engine pool.
    pub fn multi_engine_eligible(&self) -> bool {
        matches!(self, Tier::Base)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound conversational request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Request-scoped context extracted from transport headers.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub client_id: String,
    pub user_id: Option<String>,
    pub tier_override: Option<String>,
    pub forced_engine: Option<String>,
}

/// Where a request is going. One per request, never stored; whether the
/// dispatch later fell back is carried on the reply.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub key: String,
    pub engine: EngineDescriptor,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Upstream chat-completion payload (OpenAI-compatible shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

pub const SYSTEM_PROMPT: &str =
    "You are a helpful counseling assistant specialized in emotional support.";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 512;

impl GenerationPayload {
    pub fn from_chat(req: &ChatRequest, model: &str) -> Self {
        Self {
            model: req.model.clone().unwrap_or_else(|| model.to_string()),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: req.message.clone(),
                },
            ],
            temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionMessage {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
}

/// The slice of the upstream response the gateway cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionBody {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

/// Annotated proxy response returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionReply {
    pub tier: Tier,
    pub engine: String,
    pub model: String,
    pub reply: String,
    pub processing_time: f64,
    pub fallback_used: bool,
    pub timestamp: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Healthy,
    Unhealthy,
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    pub status: EngineStatus,
    pub url: String,
    pub expected_model: String,
    #[serde(default)]
    pub available_models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Recomputed in full on every check, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub overall_status: OverallStatus,
    pub upstreams: HashMap<String, EngineHealth>,
    pub strategy: Strategy,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStats {
    pub strategy: Strategy,
    pub total_requests: u64,
    pub denied_requests: u64,
    pub fallback_count: u64,
    pub engine_share: HashMap<String, u64>,
}
