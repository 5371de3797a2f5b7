//! Token-bucket rate limiter shared by every outbound call.
//!
//! One [`TokenBucket`] is shared (behind an `Arc`) by all executors and, when
//! several runs execute in the same process, by all runs. The read-modify-write
//! of `tokens`/`last_refill` happens under a single mutex.
//!
//! Time is read through the [`Clock`] trait so the bucket can be driven by a
//! [`ManualClock`] in tests and simulations.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::PipelineError;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of monotonic time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// The process monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Limits on outbound calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Maximum burst of requests.
    pub capacity: f64,
    /// Requests added per second.
    pub refill_per_second: f64,
    /// Budget of model tokens per minute (prompt plus completion). Unset
    /// disables the budget.
    pub tokens_per_minute: Option<f64>,
    /// Calls allowed in flight at once.
    pub max_concurrent: usize,
}

impl Default for RateLimitConfig {
    /// 60 requests and 150 000 model tokens per minute, 5 calls in flight.
    fn default() -> Self {
        Self {
            capacity: 60.0,
            refill_per_second: 1.0,
            tokens_per_minute: Some(150_000.0),
            max_concurrent: 5,
        }
    }
}

impl RateLimitConfig {
    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if !(self.capacity.is_finite() && self.capacity >= 1.0) {
            return Err(PipelineError::config(format!(
                "rate_limit.capacity must be at least 1, got {}",
                self.capacity
            )));
        }
        if !(self.refill_per_second.is_finite() && self.refill_per_second > 0.0) {
            return Err(PipelineError::config(format!(
                "rate_limit.refill_per_second must be positive, got {}",
                self.refill_per_second
            )));
        }
        if let Some(tpm) = self.tokens_per_minute {
            if !(tpm.is_finite() && tpm >= 1.0) {
                return Err(PipelineError::config(format!(
                    "rate_limit.tokens_per_minute must be at least 1, got {tpm}"
                )));
            }
        }
        if self.max_concurrent == 0 {
            return Err(PipelineError::config("rate_limit.max_concurrent must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Token bucket
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket.
///
/// Invariant: `0 <= tokens <= capacity` at every observation.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket driven by the system clock.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ConfigurationError`] if the constants are invalid.
    pub fn new(config: &RateLimitConfig) -> Result<Self, PipelineError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a full bucket driven by `clock`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ConfigurationError`] if the constants are invalid.
    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self::full(config.capacity, config.refill_per_second, clock))
    }

    /// The model-token budget described by `config`, if one is set. Its
    /// capacity is one minute's worth of tokens.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ConfigurationError`] if the constants are invalid.
    pub fn token_budget(
        config: &RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Option<Self>, PipelineError> {
        config.validate()?;
        Ok(config
            .tokens_per_minute
            .map(|tpm| Self::full(tpm, tpm / 60.0, clock)))
    }

    fn full(capacity: f64, refill_per_second: f64, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            capacity,
            refill_per_second,
            clock,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    /// Replaces the current token level, clamped to `[0, capacity]`.
    #[must_use]
    pub fn with_initial_tokens(self, tokens: f64) -> Self {
        {
            let mut state = self.state.lock();
            state.tokens = tokens.clamp(0.0, self.capacity);
        }
        self
    }

    /// Maximum burst size.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Refills, then takes `n` tokens if available.
    ///
    /// Returns `false` without touching the token level when fewer than `n`
    /// tokens are available.
    pub fn consume(&self, n: u32) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        let wanted = f64::from(n);
        if state.tokens >= wanted {
            state.tokens -= wanted;
            true
        } else {
            false
        }
    }

    /// Current token level after refilling.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// How long until `n` tokens will be available.
    ///
    /// Returns `Some(Duration::ZERO)` if they are available now and `None` if
    /// `n` exceeds the capacity, i.e. the request can never succeed.
    pub fn wait_hint(&self, n: u32) -> Option<Duration> {
        let wanted = f64::from(n);
        if wanted > self.capacity {
            return None;
        }
        let mut state = self.state.lock();
        self.refill(&mut state);
        let deficit = (wanted - state.tokens).max(0.0);
        Some(Duration::from_secs_f64(deficit / self.refill_per_second))
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        if now > state.last_refill {
            state.last_refill = now;
        }
    }
}
