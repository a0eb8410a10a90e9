use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::CollectConfig;
use crate::error::FetchError;
use crate::events::{CollectionUnit, RawEvent};

/// What a provider returned for one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitFetch {
    Events(Vec<RawEvent>),
    /// The provider has nothing for this unit (off-day, entity idle).
    NoData,
}

/// A single external provider. Implementations perform exactly one request
/// per call; pacing and retries belong to [`Connector`].
pub trait EventSource: Send {
    fn name(&self) -> &str;
    fn fetch_unit(&self, unit: &CollectionUnit) -> Result<UnitFetch, FetchError>;
}

impl<T: EventSource + ?Sized> EventSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch_unit(&self, unit: &CollectionUnit) -> Result<UnitFetch, FetchError> {
        (**self).fetch_unit(unit)
    }
}

/// Enforces a minimum delay between consecutive calls.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    pub fn wait(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last_call = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(Vec<RawEvent>),
    NoData,
    SkippedTransient { attempts: u32, reason: String },
    SkippedPermanent { reason: String },
}

/// A source plus its own pacing and retry state.
pub struct Connector<S> {
    source: S,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl<S: EventSource> Connector<S> {
    pub fn new(source: S, min_interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            source,
            limiter: RateLimiter::new(min_interval),
            retry,
        }
    }

    pub fn from_config(source: S, cfg: &CollectConfig) -> Self {
        Self::new(
            source,
            Duration::from_millis(cfg.rate_limit_ms),
            RetryPolicy {
                max_attempts: cfg.max_attempts.max(1),
                base_backoff: Duration::from_millis(cfg.backoff_base_ms),
                max_backoff: Duration::from_millis(cfg.backoff_max_ms),
            },
        )
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetches one unit, retrying transient failures with bounded backoff.
    ///
    /// Events failing validation make the whole unit a permanent failure so a
    /// partially usable payload is never recorded as complete.
    pub fn fetch(&mut self, unit: &CollectionUnit) -> FetchOutcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.wait();
            match self.source.fetch_unit(unit) {
                Ok(UnitFetch::NoData) => {
                    debug!(source = self.source.name(), unit = %unit, "no data for unit");
                    return FetchOutcome::NoData;
                }
                Ok(UnitFetch::Events(events)) => {
                    if let Some(reason) = invalid_event(unit, &events) {
                        warn!(source = self.source.name(), unit = %unit, %reason, "malformed payload, skipping unit");
                        return FetchOutcome::SkippedPermanent { reason };
                    }
                    debug!(source = self.source.name(), unit = %unit, events = events.len(), "fetched unit");
                    return FetchOutcome::Fetched(events);
                }
                Err(FetchError::Permanent(reason)) => {
                    warn!(source = self.source.name(), unit = %unit, %reason, "permanent failure, skipping unit");
                    return FetchOutcome::SkippedPermanent { reason };
                }
                Err(FetchError::Transient(reason)) => {
                    if attempt >= max_attempts {
                        warn!(
                            source = self.source.name(),
                            unit = %unit,
                            attempts = attempt,
                            %reason,
                            "transient failure persisted, leaving unit for a later run"
                        );
                        return FetchOutcome::SkippedTransient {
                            attempts: attempt,
                            reason,
                        };
                    }
                    let backoff = self.retry.backoff(attempt);
                    debug!(
                        source = self.source.name(),
                        unit = %unit,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        %reason,
                        "transient failure, retrying"
                    );
                    std::thread::sleep(backoff);
                }
            }
        }
    }
}

fn invalid_event(unit: &CollectionUnit, events: &[RawEvent]) -> Option<String> {
    for ev in events {
        if let Err(reason) = ev.validate() {
            return Some(reason);
        }
        if ev.unit_key != unit.key() {
            return Some(format!(
                "event {} tagged with unit {} while fetching {}",
                ev.event_id,
                ev.unit_key,
                unit.key()
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::NaiveDate;

    use super::*;

    struct Scripted {
        replies: Mutex<Vec<Result<UnitFetch, FetchError>>>,
        calls: Mutex<u32>,
    }

    impl EventSource for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn fetch_unit(&self, _unit: &CollectionUnit) -> Result<UnitFetch, FetchError> {
            *self.calls.lock().unwrap() += 1;
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn connector(replies: Vec<Result<UnitFetch, FetchError>>, attempts: u32) -> Connector<Scripted> {
        Connector::new(
            Scripted {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            },
            Duration::ZERO,
            RetryPolicy {
                max_attempts: attempts,
                base_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
            },
        )
    }

    fn unit() -> CollectionUnit {
        CollectionUnit::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[test]
    fn transient_then_success_is_retried() {
        let mut c = connector(
            vec![
                Err(FetchError::Transient("503".to_string())),
                Ok(UnitFetch::Events(Vec::new())),
            ],
            3,
        );
        assert_eq!(c.fetch(&unit()), FetchOutcome::Fetched(Vec::new()));
        assert_eq!(*c.source.calls.lock().unwrap(), 2);
    }

    #[test]
    fn transient_is_bounded() {
        let mut c = connector(
            vec![
                Err(FetchError::Transient("a".to_string())),
                Err(FetchError::Transient("b".to_string())),
            ],
            2,
        );
        assert!(matches!(
            c.fetch(&unit()),
            FetchOutcome::SkippedTransient { attempts: 2, .. }
        ));
    }

    #[test]
    fn permanent_is_not_retried() {
        let mut c = connector(
            vec![
                Err(FetchError::Permanent("404".to_string())),
                Ok(UnitFetch::NoData),
            ],
            5,
        );
        assert!(matches!(
            c.fetch(&unit()),
            FetchOutcome::SkippedPermanent { .. }
        ));
        assert_eq!(*c.source.calls.lock().unwrap(), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn rate_limiter_spaces_calls() {
        let mut limiter = RateLimiter::new(Duration::from_millis(30));
        let start = Instant::now();
        limiter.wait();
        limiter.wait();
        limiter.wait();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
