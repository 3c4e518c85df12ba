use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Exact-timestamp sliding-window admission controller, one window per
/// distinct client. The dashmap entry guard keeps prune/check/record
/// exclusive per client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, VecDeque<Instant>>>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            limit,
            window,
        }
    }

    /// Admits iff the client has fewer than `limit` requests inside the
    /// trailing window. The timestamp is recorded only when admitted, so
    /// rejected requests never extend the window.
    pub fn allow(&self, client_id: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(client_id.to_string()).or_default();
        while entry
            .front()
            .map(|t| now.duration_since(*t) > self.window)
            .unwrap_or(false)
        {
            entry.pop_front();
        }
        if entry.len() < self.limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drops windows whose newest timestamp has aged out, bounding memory
    /// across many distinct clients. Called from a periodic task.
    pub fn sweep_idle(&self) {
        let window = self.window;
        self.windows
            .retain(|_, times| matches!(times.back(), Some(t) if t.elapsed() <= window));
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}
