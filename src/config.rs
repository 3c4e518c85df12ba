use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;
use std::{env, path::PathBuf};

use crate::types::{EngineFile, Strategy, Tier};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub engines: EngineFile,
    pub strategy: Strategy,
    pub engine_weights: Option<String>,
    pub sticky_ttl: Duration,
    pub rate_limit_per_min: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub health_timeout: Duration,
    pub default_tier: Tier,
    pub admin_token: Option<String>,
    pub internal_networks: Vec<String>,
    pub debug: bool,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("GATEWAY_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let workers = env::var("GATEWAY_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(num_cpus::get_physical);

        let engines_path = PathBuf::from(
            env::var("GATEWAY_ENGINES_PATH").unwrap_or_else(|_| "./configs/engines.json".into()),
        );
        let engines_raw = std::fs::read_to_string(&engines_path)
            .with_context(|| format!("read engine registry at {:?}", engines_path))?;
        let engines: EngineFile = serde_json::from_str(&engines_raw)
            .or_else(|_| serde_yaml::from_str(&engines_raw))
            .with_context(|| "parse engine registry")?;

        let strategy = match env::var("GATEWAY_STRATEGY") {
            Ok(value) => Strategy::from_str(&value)
                .with_context(|| format!("invalid GATEWAY_STRATEGY '{value}'"))?,
            Err(_) => Strategy::default(),
        };

        let engine_weights = env::var("GATEWAY_ENGINE_WEIGHTS")
            .ok()
            .filter(|v| !v.is_empty());

        let sticky_ttl = Duration::from_secs(env_u64("GATEWAY_STICKY_TTL_SECS", 3600));
        let rate_limit_per_min = env_u64("GATEWAY_RATE_LIMIT_PER_MIN", 60) as usize;
        let connect_timeout = Duration::from_secs(env_u64("GATEWAY_CONNECT_TIMEOUT_SECS", 10));
        let read_timeout = Duration::from_secs(env_u64("GATEWAY_READ_TIMEOUT_SECS", 120));
        let health_timeout = Duration::from_secs(env_u64("GATEWAY_HEALTH_TIMEOUT_SECS", 5));

        let default_tier = env::var("GATEWAY_DEFAULT_TIER")
            .ok()
            .and_then(|v| Tier::parse(&v))
            .unwrap_or_default();

        let admin_token = env::var("GATEWAY_ADMIN_TOKEN")
            .ok()
            .filter(|v| !v.is_empty());
        let internal_networks = env::var("GATEWAY_INTERNAL_NETWORKS")
            .unwrap_or_else(|_| "127.0.0.1,::1".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let debug = env::var("GATEWAY_DEBUG")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            server: ServerConfig { bind_addr, workers },
            engines,
            strategy,
            engine_weights,
            sticky_ttl,
            rate_limit_per_min,
            connect_timeout,
            read_timeout,
            health_timeout,
            default_tier,
            admin_token,
            internal_networks,
            debug,
        })
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
