use crate::errors::GatewayError;
use crate::types::Strategy;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks one engine key from the ordered pool. The round-robin cursor is the
/// only mutable piece and advances atomically, so concurrent callers get
/// distinct sequential picks.
pub struct EngineSelector {
    strategy: Strategy,
    cursor: AtomicUsize,
    weighted: Option<WeightedPool>,
}

struct WeightedPool {
    keys: Vec<String>,
    dist: WeightedIndex<u32>,
}

impl EngineSelector {
    pub fn new(strategy: Strategy, weight_spec: Option<&str>, keys: &[String]) -> Self {
        let weighted = weight_spec.and_then(|spec| build_weighted_pool(spec, keys));
        if strategy == Strategy::Weighted && weighted.is_none() {
            tracing::warn!("no usable engine weights; weighted strategy degrades to random");
        }
        Self {
            strategy,
            cursor: AtomicUsize::new(0),
            weighted,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Non-sticky selection for the configured strategy. Sticky resolution
    /// lives in the engine because it needs the affinity store.
    pub fn pick(&self, keys: &[String]) -> Result<String, GatewayError> {
        match self.strategy {
            Strategy::Random => self.pick_random(keys),
            Strategy::Weighted => self.pick_weighted(keys),
            Strategy::RoundRobin | Strategy::Sticky => self.round_robin(keys),
        }
    }

    pub fn round_robin(&self, keys: &[String]) -> Result<String, GatewayError> {
        if keys.is_empty() {
            return Err(GatewayError::NoEngines);
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % keys.len();
        Ok(keys[slot].clone())
    }

    pub fn pick_random(&self, keys: &[String]) -> Result<String, GatewayError> {
        keys.choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(GatewayError::NoEngines)
    }

    fn pick_weighted(&self, keys: &[String]) -> Result<String, GatewayError> {
        if keys.is_empty() {
            return Err(GatewayError::NoEngines);
        }
        match &self.weighted {
            Some(pool) => {
                let idx = pool.dist.sample(&mut rand::thread_rng());
                Ok(pool.keys[idx].clone())
            }
            None => self.pick_random(keys),
        }
    }
}

/// Parses `"key:weight,key:weight,..."`. Unknown keys, unparsable weights and
/// zero weights are skipped; an empty result means uniform random fallback.
fn build_weighted_pool(spec: &str, valid_keys: &[String]) -> Option<WeightedPool> {
    let mut keys = Vec::new();
    let mut weights = Vec::new();
    for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (key, weight) = match token.split_once(':') {
            Some(parts) => parts,
            None => continue,
        };
        let weight: u32 = match weight.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(token, "ignoring unparsable engine weight");
                continue;
            }
        };
        if weight == 0 {
            continue;
        }
        if !valid_keys.iter().any(|k| k == key.trim()) {
            tracing::warn!(key, "ignoring weight for unknown engine");
            continue;
        }
        keys.push(key.trim().to_string());
        weights.push(weight);
    }
    if keys.is_empty() {
        return None;
    }
    let dist = WeightedIndex::new(&weights).ok()?;
    Some(WeightedPool { keys, dist })
}
