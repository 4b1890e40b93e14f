// ABOUTME: Admission gates for bulk runs: a global concurrency + requests-per-minute gate and per-domain gates.
// ABOUTME: A domain gate admits first (concurrency, minimum spacing) and then debits the global gate.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{watch, AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Window over which `requests_per_minute` is counted.
pub(crate) const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Limits shared by every gate of one bulk run. Zero values are clamped to 1.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GateLimits {
    pub concurrency: usize,
    pub concurrency_per_domain: usize,
    pub min_delay_per_domain: Duration,
    pub requests_per_minute: u32,
    pub rate_window: Duration,
}

#[derive(Debug, Error)]
#[error("bulk gates are closed")]
pub(crate) struct GateClosed;

impl From<AcquireError> for GateClosed {
    fn from(_: AcquireError) -> Self {
        GateClosed
    }
}

#[derive(Debug)]
struct DomainGate {
    permits: Arc<Semaphore>,
    // next instant a dispatch to this domain may start
    next_dispatch: Mutex<Option<Instant>>,
}

/// Dispatch log for the rolling request budget. A slot comes back to the
/// reservoir one window after it was spent.
#[derive(Debug)]
struct RateWindow {
    budget: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

/// Held for the duration of one extraction; dropping it releases both slots.
#[derive(Debug)]
pub(crate) struct Admission {
    _global: OwnedSemaphorePermit,
    _domain: OwnedSemaphorePermit,
}

pub(crate) struct Gates {
    global: Arc<Semaphore>,
    rate: RateWindow,
    domains: DashMap<String, Arc<DomainGate>>,
    per_domain: usize,
    min_delay: Duration,
    closed: watch::Sender<bool>,
}

impl Gates {
    pub(crate) fn new(limits: GateLimits) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            global: Arc::new(Semaphore::new(limits.concurrency.max(1))),
            rate: RateWindow {
                budget: limits.requests_per_minute.max(1) as usize,
                window: limits.rate_window,
                admitted: Mutex::new(VecDeque::new()),
            },
            domains: DashMap::new(),
            per_domain: limits.concurrency_per_domain.max(1),
            min_delay: limits.min_delay_per_domain,
            closed,
        }
    }

    fn domain(&self, domain: &str) -> Arc<DomainGate> {
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| {
                Arc::new(DomainGate {
                    permits: Arc::new(Semaphore::new(self.per_domain)),
                    next_dispatch: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Sleep until `at`, or fail as soon as the gates close.
    async fn wait_until(&self, at: Instant) -> Result<(), GateClosed> {
        let mut closed = self.closed.subscribe();
        tokio::select! {
            _ = sleep_until(at) => Ok(()),
            _ = closed.wait_for(|closed| *closed) => Err(GateClosed),
        }
    }

    /// Wait until `domain` and the global budget both admit one more request.
    pub(crate) async fn admit(&self, domain: &str) -> Result<Admission, GateClosed> {
        let gate = self.domain(domain);
        let domain_permit = gate.permits.clone().acquire_owned().await?;

        {
            let mut next = gate.next_dispatch.lock().await;
            if let Some(at) = *next {
                self.wait_until(at).await?;
            }
            // Spacing is measured at domain admission, before the global gate.
            *next = Some(Instant::now() + self.min_delay);
        }

        let global_permit = self.global.clone().acquire_owned().await?;
        self.spend_rate_slot().await?;

        Ok(Admission {
            _global: global_permit,
            _domain: domain_permit,
        })
    }

    /// Record one dispatch, waiting while the window already holds `budget` of them.
    async fn spend_rate_slot(&self) -> Result<(), GateClosed> {
        // The lock is held across the wait so queued dispatches leave in order.
        let mut admitted = self.rate.admitted.lock().await;
        if admitted.len() >= self.rate.budget {
            if let Some(oldest) = admitted.pop_front() {
                let reopens = oldest + self.rate.window;
                if reopens > Instant::now() {
                    debug!(
                        budget = self.rate.budget,
                        wait_ms = (reopens - Instant::now()).as_millis() as u64,
                        "request budget exhausted, waiting"
                    );
                }
                self.wait_until(reopens).await?;
            }
        }
        admitted.push_back(Instant::now());
        Ok(())
    }

    /// Refuse further admissions. Queued and sleeping waiters fail with `GateClosed`.
    pub(crate) fn close(&self) {
        self.closed.send_replace(true);
        self.global.close();
        for entry in self.domains.iter() {
            entry.value().permits.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limits(concurrency: usize, per_domain: usize, delay_ms: u64) -> GateLimits {
        GateLimits {
            concurrency,
            concurrency_per_domain: per_domain,
            min_delay_per_domain: Duration::from_millis(delay_ms),
            requests_per_minute: 6000,
            rate_window: RATE_WINDOW,
        }
    }

    fn budget(rpm: u32, window_ms: u64) -> GateLimits {
        GateLimits {
            concurrency: 1000,
            concurrency_per_domain: 10,
            min_delay_per_domain: Duration::ZERO,
            requests_per_minute: rpm,
            rate_window: Duration::from_millis(window_ms),
        }
    }

    #[tokio::test]
    async fn spaces_same_domain_dispatches() {
        let gates = Gates::new(limits(10, 5, 50));
        let mut stamps = Vec::new();
        for _ in 0..3 {
            let _admission = gates.admit("example.com").await.unwrap();
            stamps.push(Instant::now());
        }
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(45));
        }

        // Other domains are not delayed by example.com's spacing.
        let start = Instant::now();
        let _other = gates.admit("other.org").await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(45));
    }

    #[tokio::test]
    async fn bounds_global_concurrency() {
        let gates = Arc::new(Gates::new(limits(2, 10, 0)));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let gates = gates.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _admission = gates.admit(&format!("d{}.com", i)).await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn request_budget_holds_extra_dispatches_until_window_reopens() {
        let gates = Gates::new(budget(5, 400));
        let start = Instant::now();
        for i in 0..5 {
            gates.admit(&format!("d{}.com", i)).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(200));

        for i in 5..7 {
            gates.admit(&format!("d{}.com", i)).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn request_budget_never_exceeded_in_any_window() {
        // Stamps are taken just after admission; allow a little slack for that.
        let window = Duration::from_millis(295);
        let gates = Gates::new(budget(4, 300));
        let mut stamps = Vec::new();
        for i in 0..13 {
            gates.admit(&format!("d{}.com", i)).await.unwrap();
            stamps.push(Instant::now());
        }
        for (i, first) in stamps.iter().enumerate() {
            let in_window = stamps[i..]
                .iter()
                .take_while(|at| **at - *first < window)
                .count();
            assert!(in_window <= 4, "{} dispatches inside one window", in_window);
        }
    }

    #[tokio::test]
    async fn closing_wakes_dispatches_waiting_on_budget() {
        let gates = Arc::new(Gates::new(budget(1, 60_000)));
        gates.admit("a.com").await.unwrap();

        let waiter = {
            let gates = gates.clone();
            tokio::spawn(async move { gates.admit("b.com").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        gates.close();

        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn closed_gates_refuse_admission() {
        let gates = Gates::new(limits(1, 1, 0));
        gates.admit("a.com").await.unwrap();
        gates.close();
        assert!(gates.admit("a.com").await.is_err());
        assert!(gates.admit("new.com").await.is_err());
    }

    #[test]
    fn zero_limits_are_clamped() {
        let gates = Gates::new(GateLimits {
            concurrency: 0,
            concurrency_per_domain: 0,
            min_delay_per_domain: Duration::ZERO,
            requests_per_minute: 0,
            rate_window: RATE_WINDOW,
        });
        assert_eq!(gates.global.available_permits(), 1);
        assert_eq!(gates.per_domain, 1);
        assert_eq!(gates.rate.budget, 1);
    }
}
