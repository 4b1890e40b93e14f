// ABOUTME: Bulk extraction over many URLs with global and per-domain admission gates.
// ABOUTME: Results come back in input order with per-item timing, aggregate stats and progress callbacks.

mod gate;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::{debug, info, instrument, warn};

use crate::client::Client;
use crate::error::OgieError;
use crate::options::ExtractOptions;
use crate::result::ExtractResult;
use crate::urls::get_base_url;
use self::gate::{GateLimits, Gates, RATE_WINDOW};

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_CONCURRENCY_PER_DOMAIN: usize = 3;
pub const DEFAULT_MIN_DELAY_PER_DOMAIN: Duration = Duration::from_millis(200);
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 600;
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(30);

/// Running tally handed to progress callbacks. Each call receives its own copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkProgress {
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
}

/// Progress observer invoked when a URL starts and when it completes.
#[derive(Clone)]
pub struct ProgressCallback(Arc<dyn Fn(BulkProgress) + Send + Sync>);

impl ProgressCallback {
    pub fn new(f: impl Fn(BulkProgress) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    fn call(&self, progress: BulkProgress) {
        (self.0)(progress)
    }
}

impl fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressCallback")
    }
}

#[derive(Debug, Clone)]
pub struct BulkOptions {
    pub concurrency: usize,
    pub concurrency_per_domain: usize,
    pub min_delay_per_domain: Duration,
    pub requests_per_minute: u32,
    /// Per-request timeout; replaces any timeout in `extract_options`.
    pub timeout: Duration,
    pub continue_on_error: bool,
    pub extract_options: ExtractOptions,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            concurrency_per_domain: DEFAULT_CONCURRENCY_PER_DOMAIN,
            min_delay_per_domain: DEFAULT_MIN_DELAY_PER_DOMAIN,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            timeout: DEFAULT_BULK_TIMEOUT,
            continue_on_error: true,
            extract_options: ExtractOptions::default(),
            on_progress: None,
        }
    }
}

impl BulkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn concurrency_per_domain(mut self, n: usize) -> Self {
        self.concurrency_per_domain = n;
        self
    }

    pub fn min_delay_per_domain(mut self, delay: Duration) -> Self {
        self.min_delay_per_domain = delay;
        self
    }

    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn continue_on_error(mut self, yes: bool) -> Self {
        self.continue_on_error = yes;
        self
    }

    pub fn extract_options(mut self, options: ExtractOptions) -> Self {
        self.extract_options = options;
        self
    }

    pub fn on_progress(mut self, f: impl Fn(BulkProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(ProgressCallback::new(f));
        self
    }

    fn limits(&self) -> GateLimits {
        GateLimits {
            concurrency: self.concurrency,
            concurrency_per_domain: self.concurrency_per_domain,
            min_delay_per_domain: self.min_delay_per_domain,
            requests_per_minute: self.requests_per_minute,
            rate_window: RATE_WINDOW,
        }
    }
}

/// Outcome for one input URL.
#[derive(Debug)]
pub struct BulkResultItem {
    pub url: String,
    pub result: ExtractResult,
    /// Time from dispatch to completion, including time queued at the gates.
    pub duration: Duration,
}

impl BulkResultItem {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Serialize for BulkResultItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("BulkResultItem", 4)?;
        s.serialize_field("url", &self.url)?;
        s.serialize_field("success", &self.result.is_ok())?;
        match &self.result {
            Ok(metadata) => s.serialize_field("data", metadata)?,
            Err(err) => s.serialize_field("error", err)?,
        }
        s.serialize_field("durationMs", &millis(self.duration))?;
        s.end()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct BulkResult {
    /// One item per input URL, in input order.
    pub results: Vec<BulkResultItem>,
    pub stats: BulkStats,
    pub total_duration: Duration,
}

impl Serialize for BulkResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("BulkResult", 3)?;
        s.serialize_field("results", &self.results)?;
        s.serialize_field("stats", &self.stats)?;
        s.serialize_field("totalDurationMs", &millis(self.total_duration))?;
        s.end()
    }
}

fn notify(progress: &Mutex<BulkProgress>, callback: Option<&ProgressCallback>, current: Option<&str>) {
    let Some(callback) = callback else {
        return;
    };
    let snapshot = {
        let mut p = progress.lock();
        if let Some(url) = current {
            p.current_url = Some(url.to_string());
        }
        p.clone()
    };
    callback.call(snapshot);
}

fn record_completion(
    progress: &Mutex<BulkProgress>,
    callback: Option<&ProgressCallback>,
    success: bool,
) {
    let snapshot = {
        let mut p = progress.lock();
        p.completed += 1;
        if success {
            p.succeeded += 1;
        } else {
            p.failed += 1;
        }
        p.current_url = None;
        p.clone()
    };
    if let Some(callback) = callback {
        if catch_unwind(AssertUnwindSafe(|| callback.call(snapshot))).is_err() {
            warn!("progress callback panicked");
        }
    }
}

impl Client {
    /// Extract metadata from many URLs concurrently.
    ///
    /// Every URL is dispatched at once; the gates do the throttling. With
    /// `continue_on_error` (the default) this only fails if nothing could be
    /// run at all; otherwise the first per-URL exception is returned and
    /// requests already in flight are left to finish unobserved.
    #[instrument(level = "info", skip_all, fields(total = urls.len()))]
    pub async fn extract_bulk<S: AsRef<str>>(
        &self,
        urls: &[S],
        options: &BulkOptions,
    ) -> Result<BulkResult, OgieError> {
        if urls.is_empty() {
            return Ok(BulkResult::default());
        }

        let started = Instant::now();
        info!(
            total = urls.len(),
            concurrency = options.concurrency,
            per_domain = options.concurrency_per_domain,
            "bulk extraction started"
        );

        let gates = Arc::new(Gates::new(options.limits()));
        let progress = Arc::new(Mutex::new(BulkProgress {
            total: urls.len(),
            ..Default::default()
        }));
        let extract_options = options.extract_options.clone().timeout(options.timeout);

        let mut pending = FuturesUnordered::new();
        for (index, url) in urls.iter().enumerate() {
            let url = url.as_ref().to_string();
            let domain = get_base_url(&url);
            let client = self.clone();
            let gates = gates.clone();
            let progress = progress.clone();
            let callback = options.on_progress.clone();
            let opts = extract_options.clone();

            let task_url = url.clone();
            let handle = tokio::spawn(async move {
                let url = task_url;
                notify(&progress, callback.as_ref(), Some(&url));
                let dispatched = Instant::now();
                let admission = gates.admit(&domain).await.map_err(|e| {
                    OgieError::fetch(&url, "Bulk gate closed before admission").with_source(e)
                })?;
                debug!(url = %url, domain = %domain, "admitted");
                let result = client.extract(&url, &opts).await;
                drop(admission);
                Ok::<_, OgieError>(BulkResultItem {
                    url,
                    result,
                    duration: dispatched.elapsed(),
                })
            });
            pending.push(async move { (index, url, handle.await) });
        }

        let mut results: Vec<(usize, BulkResultItem)> = Vec::with_capacity(urls.len());
        while let Some((index, url, joined)) = pending.next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => Err(OgieError::fetch(&url, "Unknown error during bulk extraction")
                    .with_source(join_err)),
            };
            let item = match outcome {
                Ok(item) => item,
                Err(err) if options.continue_on_error => {
                    warn!(url = %url, error = %err, "bulk item aborted");
                    BulkResultItem {
                        url,
                        result: Err(err),
                        duration: Duration::ZERO,
                    }
                }
                Err(err) => {
                    gates.close();
                    warn!(url = %url, error = %err, "bulk extraction stopped");
                    return Err(err);
                }
            };
            record_completion(&progress, options.on_progress.as_ref(), item.is_success());
            results.push((index, item));
        }
        gates.close();

        results.sort_by_key(|(index, _)| *index);
        let results: Vec<BulkResultItem> = results.into_iter().map(|(_, item)| item).collect();
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let stats = BulkStats {
            total: urls.len(),
            succeeded,
            failed: results.len() - succeeded,
        };
        let total_duration = started.elapsed();

        info!(
            total = stats.total,
            succeeded = stats.succeeded,
            failed = stats.failed,
            elapsed_ms = millis(total_duration),
            "bulk extraction finished"
        );

        Ok(BulkResult {
            results,
            stats,
            total_duration,
        })
    }
}
