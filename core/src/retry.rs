//! Retry policy consulted by `Transport::send`.
//!
//! The client never retries on its own. It passes the merged policy to the
//! transport, which decides per attempt whether to issue the exchange again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Outcome of one exchange, as seen by a retry predicate.
#[derive(Debug, Clone, Copy)]
pub enum Attempt<'a> {
    Response(&'a HttpResponse),
    Error(&'a TransportError),
}

type Predicate = dyn Fn(&HttpRequest, &Attempt<'_>) -> bool + Send + Sync;

/// Statuses treated as transient by the built-in policies.
pub const TRANSIENT_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    predicate: Arc<Predicate>,
}

impl RetryPolicy {
    /// Issue every request exactly once.
    pub fn never() -> Self {
        Self::custom(0, |_, _| false)
    }

    /// Retry transport errors and transient statuses, GET requests only.
    pub fn safe_transient() -> Self {
        Self::custom(3, |req, attempt| {
            req.method == HttpMethod::Get && is_transient(attempt)
        })
    }

    /// Retry transport errors and transient statuses regardless of method.
    pub fn transient() -> Self {
        Self::custom(3, |_, attempt| is_transient(attempt))
    }

    pub fn custom<F>(max_retries: u32, predicate: F) -> Self
    where
        F: Fn(&HttpRequest, &Attempt<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            predicate: Arc::new(predicate),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether attempt number `retries_so_far + 1` should be issued.
    pub fn should_retry(&self, req: &HttpRequest, attempt: &Attempt<'_>, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries && (self.predicate)(req, attempt)
    }

    /// Delay before retry `n` (zero-based): `base_delay * 2^n`.
    pub fn delay(&self, n: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(n))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::safe_transient()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

fn is_transient(attempt: &Attempt<'_>) -> bool {
    match attempt {
        Attempt::Response(response) => TRANSIENT_STATUSES.contains(&response.status),
        Attempt::Error(_) => true,
    }
}
