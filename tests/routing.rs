use gateway::affinity::AffinityStore;
use gateway::config::{GatewayConfig, ServerConfig};
use gateway::engine::GatewayEngine;
use gateway::errors::GatewayError;
use gateway::rate::RateLimiter;
use gateway::strategy::EngineSelector;
use gateway::types::{EngineDescriptor, EngineFile, RequestContext, Strategy, Tier};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn round_robin_returns_each_key_once_then_wraps() {
    let pool = keys(&["engine_a", "engine_b", "engine_c"]);
    let selector = EngineSelector::new(Strategy::RoundRobin, None, &pool);

    let picks: Vec<String> = (0..3)
        .map(|_| selector.pick(&pool).expect("pick"))
        .collect();
    assert_eq!(picks, pool);
    assert_eq!(selector.pick(&pool).expect("wrap"), "engine_a");
}

#[tokio::test]
async fn concurrent_round_robin_picks_stay_balanced() {
    let pool = keys(&["a", "b", "c", "d"]);
    let selector = Arc::new(EngineSelector::new(Strategy::RoundRobin, None, &pool));

    let mut handles = Vec::new();
    for _ in 0..100 {
        let selector = selector.clone();
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            selector.pick(&pool).expect("pick")
        }));
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for handle in handles {
        *counts.entry(handle.await.expect("join")).or_default() += 1;
    }
    for key in &pool {
        assert_eq!(counts[key], 25, "uneven share for {key}: {counts:?}");
    }
}

#[test]
fn weighted_split_converges_to_configured_ratio() {
    let pool = keys(&["engine_a", "engine_b"]);
    let selector = EngineSelector::new(Strategy::Weighted, Some("engine_a:3,engine_b:1"), &pool);

    let mut hits_a = 0usize;
    for _ in 0..4000 {
        if selector.pick(&pool).expect("pick") == "engine_a" {
            hits_a += 1;
        }
    }
    // expectation 3000; generous statistical tolerance
    assert!(
        (2700..=3300).contains(&hits_a),
        "weighted split off: {hits_a}/4000"
    );
}

#[test]
fn unparsable_weights_degrade_to_uniform_random() {
    let pool = keys(&["engine_a", "engine_b"]);
    let selector = EngineSelector::new(Strategy::Weighted, Some("engine_a:x,engine_b:"), &pool);

    let mut seen: HashMap<String, usize> = HashMap::new();
    for _ in 0..200 {
        *seen.entry(selector.pick(&pool).expect("pick")).or_default() += 1;
    }
    assert!(seen.contains_key("engine_a"));
    assert!(seen.contains_key("engine_b"));
}

#[test]
fn zero_weight_engines_are_excluded() {
    let pool = keys(&["engine_a", "engine_b"]);
    let selector = EngineSelector::new(Strategy::Weighted, Some("engine_a:0,engine_b:2"), &pool);

    for _ in 0..50 {
        assert_eq!(selector.pick(&pool).expect("pick"), "engine_b");
    }
}

#[test]
fn empty_pool_is_a_configuration_error() {
    let selector = EngineSelector::new(Strategy::RoundRobin, None, &[]);
    assert!(matches!(
        selector.pick(&[]),
        Err(GatewayError::NoEngines)
    ));
}

#[tokio::test]
async fn sticky_assignment_is_stable_within_ttl() {
    let store = AffinityStore::in_memory(Duration::from_secs(60));
    let pool = keys(&["engine_a", "engine_b"]);

    store.assign("user-1", "engine_b").await;
    assert_eq!(
        store.resolve("user-1", &pool).await.as_deref(),
        Some("engine_b")
    );
    assert_eq!(
        store.resolve("user-1", &pool).await.as_deref(),
        Some("engine_b")
    );
}

#[tokio::test]
async fn sticky_assignment_expires_after_ttl() {
    let store = AffinityStore::in_memory(Duration::from_millis(100));
    let pool = keys(&["engine_a", "engine_b"]);

    store.assign("user-1", "engine_a").await;
    assert!(store.resolve("user-1", &pool).await.is_some());

    sleep(Duration::from_millis(150)).await;
    assert_eq!(store.resolve("user-1", &pool).await, None);
}

#[tokio::test]
async fn sticky_assignment_for_removed_engine_reads_as_miss() {
    let store = AffinityStore::in_memory(Duration::from_secs(60));
    store.assign("user-1", "engine_gone").await;
    assert_eq!(
        store
            .resolve("user-1", &keys(&["engine_a", "engine_b"]))
            .await,
        None
    );
}

#[test]
fn sixth_request_in_window_is_denied_then_window_advances() {
    let limiter = RateLimiter::new(5, Duration::from_millis(300));
    for _ in 0..5 {
        assert!(limiter.allow("client"));
    }
    assert!(!limiter.allow("client"));

    std::thread::sleep(Duration::from_millis(350));
    assert!(limiter.allow("client"));
}

#[test]
fn rejected_requests_do_not_extend_the_window() {
    let limiter = RateLimiter::new(1, Duration::from_millis(300));
    assert!(limiter.allow("client"));
    assert!(!limiter.allow("client"));
    assert!(!limiter.allow("client"));

    std::thread::sleep(Duration::from_millis(350));
    assert!(limiter.allow("client"));
}

#[test]
fn distinct_clients_have_independent_windows() {
    let limiter = RateLimiter::new(1, Duration::from_secs(60));
    assert!(limiter.allow("alpha"));
    assert!(limiter.allow("beta"));
    assert!(!limiter.allow("alpha"));
}

#[test]
fn sweep_drops_idle_windows() {
    let limiter = RateLimiter::new(5, Duration::from_millis(100));
    assert!(limiter.allow("client"));
    assert_eq!(limiter.tracked_clients(), 1);

    std::thread::sleep(Duration::from_millis(150));
    limiter.sweep_idle();
    assert_eq!(limiter.tracked_clients(), 0);
}

fn engine_config(strategy: Strategy) -> GatewayConfig {
    GatewayConfig {
        server: ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
            workers: 1,
        },
        engines: EngineFile {
            engines: vec![
                EngineDescriptor {
                    key: "engine_a".into(),
                    model: "model-a".into(),
                    base_url: "http://127.0.0.1:8001".into(),
                },
                EngineDescriptor {
                    key: "engine_b".into(),
                    model: "model-b".into(),
                    base_url: "http://127.0.0.1:8002".into(),
                },
            ],
            premium: None,
        },
        strategy,
        engine_weights: None,
        sticky_ttl: Duration::from_secs(60),
        rate_limit_per_min: 100,
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_secs(5),
        health_timeout: Duration::from_secs(2),
        default_tier: Tier::Base,
        admin_token: None,
        internal_networks: Vec::new(),
        debug: true,
    }
}

fn ctx(user_id: Option<&str>) -> RequestContext {
    RequestContext {
        request_id: "test".into(),
        client_id: "test-client".into(),
        user_id: user_id.map(str::to_string),
        tier_override: None,
        forced_engine: None,
    }
}

#[tokio::test]
async fn sticky_routing_pins_a_user_to_one_engine() {
    let engine = GatewayEngine::bootstrap(&engine_config(Strategy::Sticky)).expect("bootstrap");

    let first = engine.route(&ctx(Some("user-7"))).await.expect("route");
    for _ in 0..5 {
        let next = engine.route(&ctx(Some("user-7"))).await.expect("route");
        assert_eq!(next.key, first.key);
    }
}

#[tokio::test]
async fn sticky_without_user_id_degrades_to_round_robin() {
    let engine = GatewayEngine::bootstrap(&engine_config(Strategy::Sticky)).expect("bootstrap");

    let first = engine.route(&ctx(None)).await.expect("route");
    let second = engine.route(&ctx(None)).await.expect("route");
    assert_ne!(first.key, second.key);
}

#[tokio::test]
async fn forced_engine_override_wins() {
    let engine = GatewayEngine::bootstrap(&engine_config(Strategy::RoundRobin)).expect("bootstrap");

    let mut context = ctx(None);
    context.forced_engine = Some("engine_b".into());
    for _ in 0..3 {
        let decision = engine.route(&context).await.expect("route");
        assert_eq!(decision.key, "engine_b");
    }
}

#[test]
fn zero_engines_refuse_bootstrap() {
    let mut cfg = engine_config(Strategy::RoundRobin);
    cfg.engines.engines.clear();
    assert!(matches!(
        GatewayEngine::bootstrap(&cfg),
        Err(GatewayError::NoEngines)
    ));
}

#[test]
fn duplicate_engine_keys_refuse_bootstrap() {
    let mut cfg = engine_config(Strategy::RoundRobin);
    let duplicate = cfg.engines.engines[0].clone();
    cfg.engines.engines.push(duplicate);
    assert!(matches!(
        GatewayEngine::bootstrap(&cfg),
        Err(GatewayError::DuplicateEngine(_))
    ));
}

#[test]
fn tier_classification_prefers_valid_override() {
    let engine = GatewayEngine::bootstrap(&engine_config(Strategy::RoundRobin)).expect("bootstrap");

    assert_eq!(engine.classify(Some("premium")), Tier::Premium);
    assert_eq!(engine.classify(Some("free")), Tier::Base);
    assert_eq!(engine.classify(Some("platinum")), Tier::Base);
    assert_eq!(engine.classify(None), Tier::Base);
    assert!(!Tier::Premium.multi_engine_eligible());
}
