//! Per-client token-bucket rate limiting.
//!
//! One bucket per client identity (the peer IP), created full on first
//! sight and refilled lazily on every `allow`. A janitor task sweeps out
//! clients that have not been seen for `stale_after`.
//!
//! The whole client map sits behind a single mutex. Insert, refill, consume
//! and janitor deletes all happen under that lock, and it is never held
//! across an await point.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::LimiterConfig;
use crate::http::errors::ApiError;
use crate::http::server::AppState;

/// Source of the current time for bucket refills and staleness checks.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct ClientEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Registry of per-client token buckets.
pub struct RateLimiter {
    clients: Mutex<HashMap<String, ClientEntry>>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientEntry>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one token from `identity`'s bucket. Always `true` when disabled.
    pub fn allow(&self, identity: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let burst = f64::from(self.config.burst);
        let now = self.clock.now();

        let mut clients = self.lock();
        let entry = clients
            .entry(identity.to_owned())
            .or_insert_with(|| ClientEntry {
                bucket: TokenBucket::new(burst, now),
                last_seen: now,
            });
        entry.last_seen = now;
        entry
            .bucket
            .try_acquire(now, burst, self.config.requests_per_second)
    }

    /// Drop every client not seen within `stale_after`. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let stale_after = self.config.stale_after();
        let now = self.clock.now();

        let mut clients = self.lock();
        let before = clients.len();
        clients.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= stale_after);
        before - clients.len()
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock().contains_key(identity)
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until `shutdown` fires.
    pub fn spawn_janitor(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.config.sweep_interval());
            // The first tick completes immediately.
            ticker.tick().await;

            tracing::info!(
                interval_secs = self.config.sweep_interval_secs,
                stale_after_secs = self.config.stale_after_secs,
                "Rate limiter janitor starting"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = self.len(), "Swept stale rate limiter clients");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Rate limiter janitor received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

/// Middleware enforcing the per-client limit. The client is keyed by peer IP.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.limiter.is_enabled() {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let peer = ConnectInfo::<SocketAddr>::from_request_parts(&mut parts, &state).await;
    let request = Request::from_parts(parts, body);

    let Ok(ConnectInfo(addr)) = peer else {
        return state.error_response(
            request.method(),
            request.uri(),
            ApiError::internal("unable to determine client address for rate limiting"),
        );
    };

    let client = addr.ip().to_string();
    if state.limiter.allow(&client) {
        next.run(request).await
    } else {
        tracing::debug!(client = %client, "Rate limit exceeded");
        ::metrics::counter!("rate_limited_total").increment(1);
        ApiError::RateLimitExceeded.into_response()
    }
}
