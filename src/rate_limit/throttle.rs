use super::{EndpointFamily, ThrottleSettings};
use crate::SyncError;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Share of the server-reported limit the throttle allows itself.
pub const RETUNE_FACTOR: f64 = 0.9;

/// Rolling-window dispatch log.
struct WindowState {
    dispatches: VecDeque<Instant>,
    /// Set when the server reports zero remaining quota.
    blocked_until: Option<Instant>,
}

impl WindowState {
    /// Returns `None` when a dispatch may happen at `now`, otherwise the
    /// earliest instant worth re-checking.
    fn next_dispatch_at(&mut self, now: Instant, window: Duration, ceiling: u32) -> Option<Instant> {
        if let Some(until) = self.blocked_until {
            if until > now {
                return Some(until);
            }
            self.blocked_until = None;
        }

        while let Some(&oldest) = self.dispatches.front() {
            if now.duration_since(oldest) >= window {
                self.dispatches.pop_front();
            } else {
                break;
            }
        }

        if self.dispatches.len() < ceiling as usize {
            None
        } else {
            self.dispatches.front().map(|oldest| *oldest + window)
        }
    }
}

/// Concurrency + rate limiter for one endpoint family.
///
/// Concurrency is a semaphore; rate is a rolling window of dispatch instants
/// checked against `ceiling`. Both must allow a request before `acquire` returns.
pub struct Throttle {
    family: EndpointFamily,
    max_concurrency: usize,
    window: Duration,
    slots: Arc<Semaphore>,
    in_flight: AtomicUsize,
    ceiling: AtomicU32,
    state: Mutex<WindowState>,
}

/// Monitoring view of a throttle.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ThrottleStats {
    pub family: EndpointFamily,
    pub ceiling: u32,
    pub window_secs: u64,
    pub max_concurrency: usize,
    pub in_flight: usize,
}

impl Throttle {
    pub fn new(family: EndpointFamily, settings: &ThrottleSettings) -> Self {
        let max_concurrency = settings.max_concurrency.max(1);
        Self {
            family,
            max_concurrency,
            window: settings.window(),
            slots: Arc::new(Semaphore::new(max_concurrency)),
            in_flight: AtomicUsize::new(0),
            ceiling: AtomicU32::new(settings.requests_per_window.max(1)),
            state: Mutex::new(WindowState {
                dispatches: VecDeque::new(),
                blocked_until: None,
            }),
        }
    }

    pub fn family(&self) -> EndpointFamily {
        self.family
    }

    /// Current requests-per-window ceiling.
    pub fn ceiling(&self) -> u32 {
        self.ceiling.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Waits until both a concurrency slot and rate budget are available.
    ///
    /// The returned permit holds the slot until dropped.
    pub async fn acquire(self: &Arc<Self>) -> Result<ThrottlePermit, SyncError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| SyncError::Fatal(format!("{} throttle closed", self.family)))?;

        loop {
            let wake_at = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                match state.next_dispatch_at(now, self.window, self.ceiling()) {
                    None => {
                        state.dispatches.push_back(now);
                        break;
                    }
                    Some(at) => at,
                }
            };

            debug!(family = %self.family, "Rate budget exhausted, waiting");
            tokio::time::sleep_until(wake_at).await;
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(ThrottlePermit {
            throttle: Arc::clone(self),
            _slot: slot,
        })
    }

    /// Sets the ceiling to `RETUNE_FACTOR` of the server-reported limit,
    /// rounded down.
    ///
    /// The ceiling never goes below 1, so a reported limit of 1 keeps a
    /// ceiling of 1 rather than stalling the family. `remaining == Some(0)`
    /// additionally pauses the family for one window.
    pub fn retune(&self, observed_limit: u32, observed_remaining: Option<u32>) {
        let target = ((f64::from(observed_limit) * RETUNE_FACTOR).floor() as u32).max(1);
        let previous = self.ceiling.swap(target, Ordering::AcqRel);

        if previous != target {
            info!(
                family = %self.family,
                limit = observed_limit,
                remaining = ?observed_remaining,
                previous,
                ceiling = target,
                "Throttle retuned from quota headers"
            );
        }

        if observed_remaining == Some(0) {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.blocked_until = Some(Instant::now() + self.window);
            warn!(family = %self.family, window_secs = self.window.as_secs(), "Server quota exhausted, pausing family");
        }
    }

    /// Lowers the ceiling by 10% after a 429 that carried no quota headers.
    ///
    /// Floors at 1 like [`Throttle::retune`].
    pub fn penalize(&self) {
        let current = self.ceiling();
        let target = ((f64::from(current) * RETUNE_FACTOR).floor() as u32).max(1);
        self.ceiling.store(target, Ordering::Release);
        warn!(family = %self.family, previous = current, ceiling = target, "Throttle penalized after 429");
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            family: self.family,
            ceiling: self.ceiling(),
            window_secs: self.window.as_secs(),
            max_concurrency: self.max_concurrency,
            in_flight: self.in_flight(),
        }
    }
}

/// Proof of an admitted dispatch. Dropping it frees the concurrency slot.
pub struct ThrottlePermit {
    throttle: Arc<Throttle>,
    _slot: OwnedSemaphorePermit,
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        self.throttle.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(concurrency: usize, rate: u32, window_secs: u64) -> Arc<Throttle> {
        Arc::new(Throttle::new(
            EndpointFamily::Machines,
            &ThrottleSettings {
                max_concurrency: concurrency,
                requests_per_window: rate,
                window_secs,
            },
        ))
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_concurrency() {
        let t = throttle(3, 1000, 60);
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let t = Arc::clone(&t);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _permit = t.acquire().await.unwrap();
                    peak.fetch_max(t.in_flight(), Ordering::AcqRel);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::Acquire) <= 3);
        assert_eq!(t.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_ceiling_delays_excess_dispatch() {
        let t = throttle(10, 2, 10);
        let start = Instant::now();

        drop(t.acquire().await.unwrap());
        drop(t.acquire().await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));

        // Third dispatch must wait for the first to leave the window.
        drop(t.acquire().await.unwrap());
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[test]
    fn test_retune_scenarios() {
        let t = throttle(4, 60, 60);

        t.retune(100, Some(5));
        assert_eq!(t.ceiling(), 90);

        t.retune(30, None);
        assert_eq!(t.ceiling(), 27);
        assert!(f64::from(t.ceiling()) <= 0.9 * 30.0);

        // Never drops to zero.
        t.retune(1, None);
        assert_eq!(t.ceiling(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_remaining_pauses_family_for_one_window() {
        let t = throttle(4, 100, 30);
        t.retune(100, Some(0));

        let start = Instant::now();
        drop(t.acquire().await.unwrap());
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[test]
    fn test_penalize_lowers_ceiling() {
        let t = throttle(4, 50, 60);
        t.penalize();
        assert_eq!(t.ceiling(), 45);

        let single = throttle(4, 1, 60);
        single.penalize();
        assert_eq!(single.ceiling(), 1);
    }

    #[tokio::test]
    async fn test_permit_drop_releases_slot() {
        let t = throttle(1, 100, 60);
        let permit = t.acquire().await.unwrap();
        assert_eq!(t.stats().in_flight, 1);
        drop(permit);
        assert_eq!(t.stats().in_flight, 0);

        let _again = t.acquire().await.unwrap();
    }
}
