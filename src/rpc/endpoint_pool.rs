/// Sliding-window rate accounting and ranking for upstream RPC endpoints

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Static description of one upstream endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    pub weight: u32,
    /// Requests allowed inside one window
    pub max_requests: usize,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityRequest {
    pub priority: u8,
    pub timestamp: Instant,
    pub retry_count: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window: Duration,
    request_timestamps: VecDeque<Instant>,
    priority_queue: Vec<PriorityRequest>,
}

impl RateLimit {
    fn purge(&mut self, now: Instant) {
        let window = self.window;
        // Timestamps are pushed in order, so stale entries sit at the front.
        while let Some(&oldest) = self.request_timestamps.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            self.request_timestamps.pop_front();
        }
        self.priority_queue
            .retain(|request| now.saturating_duration_since(request.timestamp) < window);
    }

    fn window_count(&self) -> usize {
        self.request_timestamps.len()
    }
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub weight: u32,
    pub error_count: u64,
    pub last_error_at: Option<Instant>,
    pub rate_limit: RateLimit,
}

impl Endpoint {
    fn new(config: &EndpointConfig) -> Self {
        Self {
            url: config.url.clone(),
            weight: config.weight,
            error_count: 0,
            last_error_at: None,
            rate_limit: RateLimit {
                max_requests: config.max_requests,
                window: Duration::from_millis(config.window_ms),
                request_timestamps: VecDeque::new(),
                priority_queue: Vec::new(),
            },
        }
    }

    /// Errors per request currently inside the window, bucketed to tenths.
    fn error_bucket(&self) -> u64 {
        let requests = self.rate_limit.window_count().max(1) as f64;
        let rate = self.error_count as f64 / requests;
        (rate * 10.0).floor() as u64
    }
}

/// Read-only view of an endpoint for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub url: String,
    pub weight: u32,
    pub requests_in_window: usize,
    pub max_requests: usize,
    pub error_count: u64,
    pub ms_since_last_error: Option<u64>,
    /// Priorities of the request records still inside the window
    pub queued_priorities: Vec<u8>,
    /// Records inside the window that were retries
    pub retries_in_window: usize,
}

#[derive(Debug, Clone)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
}

impl EndpointPool {
    pub fn new(configs: &[EndpointConfig]) -> Self {
        Self {
            endpoints: configs.iter().map(Endpoint::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoint(&self, index: usize) -> Option<&Endpoint> {
        self.endpoints.get(index)
    }

    /// Whether a request at `priority` may be dispatched to `index` right now.
    ///
    /// Over the limit, a request still goes through when the window holds a
    /// strictly lower-priority entry it can displace. The displaced entry
    /// stays in the count.
    pub fn admit(&mut self, index: usize, priority: u8, now: Instant) -> bool {
        let Some(endpoint) = self.endpoints.get_mut(index) else {
            return false;
        };
        let limit = &mut endpoint.rate_limit;
        limit.purge(now);

        if limit.window_count() < limit.max_requests {
            return true;
        }

        limit
            .priority_queue
            .iter()
            .any(|request| request.priority < priority)
    }

    /// Endpoint indices ordered best-first: admitted endpoints, then lower
    /// error-rate bucket, then higher weight. Ties keep configuration order.
    pub fn rank(&mut self, priority: u8, now: Instant) -> Vec<usize> {
        for endpoint in &mut self.endpoints {
            endpoint.rate_limit.purge(now);
        }

        let admitted: Vec<bool> = (0..self.endpoints.len())
            .map(|index| self.admit(index, priority, now))
            .collect();

        let mut order: Vec<usize> = (0..self.endpoints.len()).collect();
        order.sort_by(|&a, &b| {
            let (ea, eb) = (&self.endpoints[a], &self.endpoints[b]);
            admitted[b]
                .cmp(&admitted[a])
                .then_with(|| ea.error_bucket().cmp(&eb.error_bucket()))
                .then_with(|| eb.weight.cmp(&ea.weight))
        });
        order
    }

    pub fn best(&mut self, priority: u8, now: Instant) -> Option<usize> {
        self.rank(priority, now).into_iter().next()
    }

    /// Account for one dispatched call. Called before the call executes.
    pub fn record(&mut self, index: usize, priority: u8, now: Instant) {
        self.record_attempt(index, priority, 0, now);
    }

    /// Records a dispatched call that is the `retry_count`-th retry of its
    /// request.
    pub fn record_attempt(&mut self, index: usize, priority: u8, retry_count: u32, now: Instant) {
        if let Some(endpoint) = self.endpoints.get_mut(index) {
            endpoint.rate_limit.request_timestamps.push_back(now);
            endpoint.rate_limit.priority_queue.push(PriorityRequest {
                priority,
                timestamp: now,
                retry_count,
            });
        }
    }

    pub fn record_error(&mut self, index: usize, now: Instant) {
        if let Some(endpoint) = self.endpoints.get_mut(index) {
            endpoint.error_count += 1;
            endpoint.last_error_at = Some(now);
        }
    }

    /// Requests currently counted against `index`, after purging.
    pub fn window_count(&mut self, index: usize, now: Instant) -> usize {
        match self.endpoints.get_mut(index) {
            Some(endpoint) => {
                endpoint.rate_limit.purge(now);
                endpoint.rate_limit.window_count()
            }
            None => 0,
        }
    }

    pub fn snapshot(&self, now: Instant) -> Vec<EndpointStatus> {
        self.endpoints
            .iter()
            .map(|endpoint| EndpointStatus {
                url: endpoint.url.clone(),
                weight: endpoint.weight,
                requests_in_window: endpoint
                    .rate_limit
                    .request_timestamps
                    .iter()
                    .filter(|&&ts| now.saturating_duration_since(ts) < endpoint.rate_limit.window)
                    .count(),
                max_requests: endpoint.rate_limit.max_requests,
                error_count: endpoint.error_count,
                ms_since_last_error: endpoint
                    .last_error_at
                    .map(|at| now.saturating_duration_since(at).as_millis() as u64),
                queued_priorities: endpoint
                    .rate_limit
                    .priority_queue
                    .iter()
                    .filter(|request| now.saturating_duration_since(request.timestamp) < endpoint.rate_limit.window)
                    .map(|request| request.priority)
                    .collect(),
                retries_in_window: endpoint
                    .rate_limit
                    .priority_queue
                    .iter()
                    .filter(|request| now.saturating_duration_since(request.timestamp) < endpoint.rate_limit.window)
                    .filter(|request| request.retry_count > 0)
                    .count(),
            })
            .collect()
    }
}
