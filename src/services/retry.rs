use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use super::ModelError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_QUOTA_MARKERS: &[&str] = &["429", "Quota"];

/// Errors that may carry an explicit "over capacity" signal, in addition
/// to whatever their description says.
pub trait CapacitySignal: std::fmt::Display {
    fn is_capacity_exhausted(&self) -> bool {
        false
    }
}

impl CapacitySignal for ModelError {
    fn is_capacity_exhausted(&self) -> bool {
        self.is_resource_exhausted()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same pause before every retry
    Fixed(Duration),
    /// `base * 2^(n-1)` before retry n
    Exponential { base: Duration },
}

impl Backoff {
    /// Pause before the given retry (1 = first retry)
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { base } => {
                let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        }
    }
}

/// Decides which failures count as transient capacity errors.
///
/// An error is retryable when it carries the explicit exhaustion signal, or
/// when its description contains one of the configured markers. Matching is
/// a case-sensitive substring check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaMatcher {
    markers: Vec<String>,
}

impl QuotaMatcher {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let markers = markers
            .into_iter()
            .map(Into::into)
            .filter(|m: &String| !m.is_empty())
            .collect();
        Self { markers }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn matches_text(&self, text: &str) -> bool {
        self.markers.iter().any(|m| text.contains(m.as_str()))
    }

    pub fn is_retryable<E: CapacitySignal>(&self, error: &E) -> bool {
        error.is_capacity_exhausted() || self.matches_text(&error.to_string())
    }
}

impl Default for QuotaMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA_MARKERS.iter().copied())
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt hit a capacity error
    #[error("still rate limited after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    /// A non-retryable error; no further attempts were made
    #[error("attempt {attempt} failed: {error}")]
    Fatal { attempt: u32, error: E },
}

/// Bounded retry for transient capacity errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    matcher: QuotaMatcher,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one call.
    pub fn new(max_attempts: u32, backoff: Backoff, matcher: QuotaMatcher) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            matcher,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn matcher(&self) -> &QuotaMatcher {
        &self.matcher
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    /// On success the number of attempts used is returned with the value.
    ///
    /// There is no pause after the final attempt.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<(T, u32), RetryError<E>>
    where
        E: CapacitySignal,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) if self.matcher.is_retryable(&error) => {
                    if attempt >= self.max_attempts {
                        log::warn!(
                            "🚦 Rate limited on final attempt {}/{}: {}",
                            attempt,
                            self.max_attempts,
                            error
                        );
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: error,
                        });
                    }

                    let delay = self.backoff.delay(attempt);
                    log::warn!(
                        "🚦 Rate limited on attempt {}/{} ({}), retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(RetryError::Fatal { attempt, error }),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Backoff::Fixed(DEFAULT_BACKOFF),
            QuotaMatcher::default(),
        )
    }
}
