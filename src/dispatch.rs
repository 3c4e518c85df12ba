use crate::errors::DispatchCause;
use crate::types::{CompletionBody, EngineDescriptor, GenerationPayload};
use std::time::{Duration, Instant};

/// One failed attempt against one engine.
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub cause: DispatchCause,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub content: String,
    pub elapsed: Duration,
}

/// Forwards generation payloads to an engine's chat-completions endpoint
/// with bounded connect/read timeouts. Retry policy lives in the engine;
/// this client performs exactly one attempt per call.
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
}

impl Dispatcher {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub async fn generate(
        &self,
        engine: &EngineDescriptor,
        payload: &GenerationPayload,
    ) -> Result<GenerationOutcome, DispatchFailure> {
        let url = format!("{}/v1/chat/completions", engine.base_url);
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let excerpt = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect::<String>();
            return Err(DispatchFailure {
                cause: DispatchCause::Server,
                detail: format!("HTTP {status}: {excerpt}"),
            });
        }

        let body: CompletionBody = response.json().await.map_err(|err| DispatchFailure {
            cause: DispatchCause::Server,
            detail: format!("malformed completion body: {err}"),
        })?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| DispatchFailure {
                cause: DispatchCause::Server,
                detail: "completion body has no choices".into(),
            })?;

        Ok(GenerationOutcome {
            content,
            elapsed: started.elapsed(),
        })
    }
}

fn classify_transport(err: reqwest::Error) -> DispatchFailure {
    let cause = if err.is_timeout() {
        DispatchCause::Timeout
    } else {
        DispatchCause::Connection
    };
    DispatchFailure {
        cause,
        detail: err.to_string(),
    }
}
