use crate::affinity::AffinityStore;
use crate::config::GatewayConfig;
use crate::dispatch::{DispatchFailure, Dispatcher, GenerationOutcome};
use crate::errors::GatewayError;
use crate::health::HealthChecker;
use crate::rate::RateLimiter;
use crate::strategy::EngineSelector;
use crate::types::*;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trailing window for the public-endpoint admission controller.
const ADMISSION_WINDOW: std::time::Duration = std::time::Duration::from_secs(60);

/// Validated, fixed engine set assembled once at startup.
struct EngineRegistry {
    keys: Vec<String>,
    by_key: HashMap<String, EngineDescriptor>,
    premium: Option<EngineDescriptor>,
}

impl EngineRegistry {
    fn build(file: &EngineFile) -> Result<Self, GatewayError> {
        if file.engines.is_empty() {
            return Err(GatewayError::NoEngines);
        }
        let mut keys = Vec::with_capacity(file.engines.len());
        let mut by_key = HashMap::new();
        for engine in &file.engines {
            if by_key.insert(engine.key.clone(), engine.clone()).is_some() {
                return Err(GatewayError::DuplicateEngine(engine.key.clone()));
            }
            keys.push(engine.key.clone());
        }
        Ok(Self {
            keys,
            by_key,
            premium: file.premium.clone(),
        })
    }

    fn get(&self, key: &str) -> Result<&EngineDescriptor, GatewayError> {
        self.by_key
            .get(key)
            .ok_or_else(|| GatewayError::UnknownEngine(key.to_string()))
    }

    /// Deterministic alternate for fallback: the first configured key that
    /// is not the failed one. With exactly two engines this is always "the
    /// other" engine.
    fn alternate(&self, failed: &str) -> Option<&EngineDescriptor> {
        self.keys
            .iter()
            .find(|key| *key != failed)
            .and_then(|key| self.by_key.get(key))
    }

    fn all(&self) -> Vec<EngineDescriptor> {
        let mut engines: Vec<EngineDescriptor> = self
            .keys
            .iter()
            .filter_map(|key| self.by_key.get(key).cloned())
            .collect();
        if let Some(premium) = &self.premium {
            engines.push(premium.clone());
        }
        engines
    }
}

#[derive(Default)]
struct GatewayMetrics {
    total_requests: AtomicU64,
    denied_requests: AtomicU64,
    fallback_count: AtomicU64,
    engine_share: DashMap<String, u64>,
}

impl GatewayMetrics {
    fn record_served(&self, engine_key: &str, fallback_used: bool) {
        self.engine_share
            .entry(engine_key.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
        if fallback_used {
            self.fallback_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// All routing state, owned by one instance created at startup and shared
/// by reference with the handlers. Tests build independent instances.
pub struct GatewayEngine {
    registry: EngineRegistry,
    selector: EngineSelector,
    affinity: AffinityStore,
    admission: RateLimiter,
    dispatcher: Dispatcher,
    health: HealthChecker,
    metrics: GatewayMetrics,
    default_tier: Tier,
    admin_token: Option<String>,
    internal_networks: Vec<String>,
    debug: bool,
}

impl GatewayEngine {
    pub fn bootstrap(cfg: &GatewayConfig) -> Result<Self, GatewayError> {
        let registry = EngineRegistry::build(&cfg.engines)?;
        let selector =
            EngineSelector::new(cfg.strategy, cfg.engine_weights.as_deref(), &registry.keys);
        tracing::info!(
            strategy = %cfg.strategy,
            engines = registry.keys.len(),
            premium = registry.premium.is_some(),
            "gateway engine ready"
        );
        Ok(Self {
            registry,
            selector,
            affinity: AffinityStore::in_memory(cfg.sticky_ttl),
            admission: RateLimiter::new(cfg.rate_limit_per_min, ADMISSION_WINDOW),
            dispatcher: Dispatcher::new(cfg.connect_timeout, cfg.read_timeout)?,
            health: HealthChecker::new(cfg.health_timeout)?,
            metrics: GatewayMetrics::default(),
            default_tier: cfg.default_tier,
            admin_token: cfg.admin_token.clone(),
            internal_networks: cfg.internal_networks.clone(),
            debug: cfg.debug,
        })
    }

    pub fn admission(&self) -> &RateLimiter {
        &self.admission
    }

    pub fn strategy(&self) -> Strategy {
        self.selector.strategy()
    }

    pub fn engine_count(&self) -> usize {
        self.registry.keys.len()
    }

    /// Per-request tier resolution: explicit override when valid, else the
    /// configured default. No shared mutable tier state.
    pub fn classify(&self, tier_override: Option<&str>) -> Tier {
        tier_override
            .and_then(Tier::parse)
            .unwrap_or(self.default_tier)
    }

    /// Picks the engine for a base-tier request. A forced-engine override
    /// wins when it names a configured engine; sticky resolution needs a
    /// user id and otherwise degrades to round-robin.
    pub async fn route(&self, ctx: &RequestContext) -> Result<RoutingDecision, GatewayError> {
        if let Some(forced) = ctx.forced_engine.as_deref() {
            if let Ok(engine) = self.registry.get(forced) {
                return Ok(RoutingDecision {
                    key: forced.to_string(),
                    engine: engine.clone(),
                    strategy: self.selector.strategy(),
                });
            }
            tracing::warn!(engine = forced, "ignoring override for unknown engine");
        }

        let keys = &self.registry.keys;
        let key = match (self.selector.strategy(), ctx.user_id.as_deref()) {
            (Strategy::Sticky, Some(user_id)) => match self.affinity.resolve(user_id, keys).await {
                Some(key) => key,
                None => {
                    let key = self.selector.pick_random(keys)?;
                    self.affinity.assign(user_id, &key).await;
                    key
                }
            },
            (Strategy::Sticky, None) => self.selector.round_robin(keys)?,
            _ => self.selector.pick(keys)?,
        };

        let engine = self.registry.get(&key)?.clone();
        Ok(RoutingDecision {
            key,
            engine,
            strategy: self.selector.strategy(),
        })
    }

    /// Full request path: admission, tier classification, selection,
    /// dispatch, and at most one fallback attempt.
    pub async fn complete(
        &self,
        ctx: &RequestContext,
        req: &ChatRequest,
    ) -> Result<ChatCompletionReply, GatewayError> {
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        if !self.admission.allow(&ctx.client_id) {
            self.metrics.denied_requests.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(client = %ctx.client_id, "admission denied");
            return Err(GatewayError::RateLimited {
                client: ctx.client_id.clone(),
            });
        }

        let tier = self.classify(ctx.tier_override.as_deref());
        if tier.multi_engine_eligible() {
            self.complete_base(ctx, req, tier).await
        } else {
            self.complete_dedicated(ctx, req, tier).await
        }
    }

    async fn complete_base(
        &self,
        ctx: &RequestContext,
        req: &ChatRequest,
        tier: Tier,
    ) -> Result<ChatCompletionReply, GatewayError> {
        let decision = self.route(ctx).await?;
        tracing::info!(
            request_id = %ctx.request_id,
            engine = %decision.key,
            strategy = %decision.strategy,
            "routing base-tier request"
        );

        let payload = GenerationPayload::from_chat(req, &decision.engine.model);
        let primary = match self.dispatcher.generate(&decision.engine, &payload).await {
            Ok(outcome) => {
                self.metrics.record_served(&decision.key, false);
                return Ok(self.reply(ctx, tier, &decision.engine, outcome, false));
            }
            Err(failure) => failure,
        };
        tracing::warn!(
            request_id = %ctx.request_id,
            engine = %decision.key,
            cause = primary.cause.as_str(),
            detail = %primary.detail,
            "primary engine failed"
        );

        let alternate = match self.registry.alternate(&decision.key) {
            Some(engine) => engine.clone(),
            None => return Err(upstream_error(&decision.key, None, primary)),
        };
        let payload = GenerationPayload::from_chat(req, &alternate.model);
        match self.dispatcher.generate(&alternate, &payload).await {
            Ok(outcome) => {
                tracing::info!(
                    request_id = %ctx.request_id,
                    from = %decision.key,
                    to = %alternate.key,
                    "fallback dispatch succeeded"
                );
                self.metrics.record_served(&alternate.key, true);
                Ok(self.reply(ctx, tier, &alternate, outcome, true))
            }
            Err(secondary) => {
                tracing::error!(
                    request_id = %ctx.request_id,
                    engine = %alternate.key,
                    cause = secondary.cause.as_str(),
                    "fallback engine also failed"
                );
                Err(upstream_error(
                    &decision.key,
                    Some(alternate.key.clone()),
                    primary,
                ))
            }
        }
    }

    /// Non-base tiers use the dedicated backend and fall back once into the
    /// base pool, marked degraded. With no dedicated backend configured the
    /// request goes straight to the pool.
    async fn complete_dedicated(
        &self,
        ctx: &RequestContext,
        req: &ChatRequest,
        tier: Tier,
    ) -> Result<ChatCompletionReply, GatewayError> {
        let primary = match &self.registry.premium {
            Some(engine) => {
                let payload = GenerationPayload::from_chat(req, &engine.model);
                match self.dispatcher.generate(engine, &payload).await {
                    Ok(outcome) => {
                        self.metrics.record_served(&engine.key, false);
                        return Ok(self.reply(ctx, tier, engine, outcome, false));
                    }
                    Err(failure) => {
                        tracing::warn!(
                            request_id = %ctx.request_id,
                            engine = %engine.key,
                            cause = failure.cause.as_str(),
                            "dedicated engine failed; borrowing base pool"
                        );
                        Some((engine.key.clone(), failure))
                    }
                }
            }
            None => {
                tracing::warn!(tier = %tier, "no dedicated engine configured; using base pool");
                None
            }
        };

        let key = self.selector.round_robin(&self.registry.keys)?;
        let engine = self.registry.get(&key)?.clone();
        let payload = GenerationPayload::from_chat(req, &engine.model);
        match self.dispatcher.generate(&engine, &payload).await {
            Ok(outcome) => {
                self.metrics.record_served(&engine.key, true);
                Ok(self.reply(ctx, tier, &engine, outcome, true))
            }
            Err(pool_failure) => match primary {
                Some((primary_key, failure)) => {
                    Err(upstream_error(&primary_key, Some(key), failure))
                }
                None => Err(upstream_error(&key, None, pool_failure)),
            },
        }
    }

    fn reply(
        &self,
        ctx: &RequestContext,
        tier: Tier,
        engine: &EngineDescriptor,
        outcome: GenerationOutcome,
        fallback_used: bool,
    ) -> ChatCompletionReply {
        ChatCompletionReply {
            tier,
            engine: engine.key.clone(),
            model: engine.model.clone(),
            reply: outcome.content,
            processing_time: (outcome.elapsed.as_secs_f64() * 1000.0).round() / 1000.0,
            fallback_used,
            timestamp: Utc::now().to_rfc3339(),
            request_id: ctx.request_id.clone(),
        }
    }

    /// Concurrently probes every configured engine, the dedicated backend
    /// included. The snapshot is recomputed on every call.
    pub async fn check_upstreams(&self) -> HealthSnapshot {
        let engines = self.registry.all();
        let (overall_status, upstreams) = self.health.check_all(&engines).await;
        HealthSnapshot {
            overall_status,
            upstreams,
            strategy: self.selector.strategy(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Privileged-endpoint guard: debug bypass, admin token match, or an
    /// allow-listed peer address.
    pub fn authorize_admin(
        &self,
        token: Option<&str>,
        peer: Option<&str>,
    ) -> Result<(), GatewayError> {
        if self.debug {
            return Ok(());
        }
        if let (Some(expected), Some(provided)) = (self.admin_token.as_deref(), token) {
            if expected == provided {
                return Ok(());
            }
        }
        if let Some(peer) = peer {
            if self.internal_networks.iter().any(|net| net == peer) {
                return Ok(());
            }
        }
        Err(GatewayError::Forbidden(
            "admin token or internal source address required".into(),
        ))
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            strategy: self.selector.strategy(),
            total_requests: self.metrics.total_requests.load(Ordering::Relaxed),
            denied_requests: self.metrics.denied_requests.load(Ordering::Relaxed),
            fallback_count: self.metrics.fallback_count.load(Ordering::Relaxed),
            engine_share: self
                .metrics
                .engine_share
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

fn upstream_error(
    engine: &str,
    fallback_engine: Option<String>,
    failure: DispatchFailure,
) -> GatewayError {
    GatewayError::Upstream {
        engine: engine.to_string(),
        fallback_engine,
        cause: failure.cause,
        detail: failure.detail,
    }
}
