use crate::types::{EngineDescriptor, EngineHealth, EngineStatus, OverallStatus};
use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Probes every engine's `/v1/models` endpoint with a short timeout.
/// Probe failures fold into the snapshot, never out of it.
#[derive(Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new(probe_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(probe_timeout).build()?;
        Ok(Self { client })
    }

    pub async fn probe(&self, engine: &EngineDescriptor) -> EngineHealth {
        let url = format!("{}/v1/models", engine.base_url);
        let started = Instant::now();
        match self.client.get(&url).send().await {
            Ok(response) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                let status = response.status();
                if status.is_success() {
                    let models = response
                        .json::<ModelList>()
                        .await
                        .map(|list| list.data.into_iter().map(|m| m.id).collect())
                        .unwrap_or_default();
                    EngineHealth {
                        status: EngineStatus::Healthy,
                        url: engine.base_url.clone(),
                        expected_model: engine.model.clone(),
                        available_models: models,
                        latency_ms: Some((latency_ms * 100.0).round() / 100.0),
                        error: None,
                    }
                } else {
                    let excerpt = response
                        .text()
                        .await
                        .unwrap_or_default()
                        .chars()
                        .take(200)
                        .collect::<String>();
                    EngineHealth {
                        status: EngineStatus::Unhealthy,
                        url: engine.base_url.clone(),
                        expected_model: engine.model.clone(),
                        available_models: Vec::new(),
                        latency_ms: Some((latency_ms * 100.0).round() / 100.0),
                        error: Some(format!("HTTP {status}: {excerpt}")),
                    }
                }
            }
            Err(err) => EngineHealth {
                status: EngineStatus::Unreachable,
                url: engine.base_url.clone(),
                expected_model: engine.model.clone(),
                available_models: Vec::new(),
                latency_ms: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Fan-out/fan-in over all engines, so total latency stays close to one
    /// probe's worth of time.
    pub async fn check_all(
        &self,
        engines: &[EngineDescriptor],
    ) -> (OverallStatus, HashMap<String, EngineHealth>) {
        let probes = engines.iter().map(|engine| async {
            let health = self.probe(engine).await;
            (engine.key.clone(), health)
        });
        let upstreams: HashMap<String, EngineHealth> = join_all(probes).await.into_iter().collect();
        (aggregate(&upstreams), upstreams)
    }
}

fn aggregate(upstreams: &HashMap<String, EngineHealth>) -> OverallStatus {
    let statuses: Vec<EngineStatus> = upstreams.values().map(|h| h.status).collect();
    if statuses.iter().any(|s| *s == EngineStatus::Healthy) {
        OverallStatus::Healthy
    } else if statuses.iter().any(|s| *s != EngineStatus::Unreachable) {
        OverallStatus::Degraded
    } else {
        OverallStatus::Unhealthy
    }
}
