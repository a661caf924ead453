use crate::application::quota::{QuotaTracker, Reservation};
use crate::config::Config;
use crate::domain::errors::FetchError;
use crate::domain::ports::MarketDataSource;
use crate::domain::types::{
    EndpointClass, FetchRequest, OhlcvSeries, OptionChainSnapshot, QuoteSnapshot,
};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Data produced by one completed fetch call.
#[derive(Debug, Clone)]
pub enum FetchPayload {
    Historical(OhlcvSeries),
    Quote(QuoteSnapshot),
    OptionChain(OptionChainSnapshot),
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(FetchPayload),
    /// Retries exhausted (or the failure was not retryable). Reported
    /// exactly once per request; the batch proceeds with partial data.
    Exhausted(FetchError),
    /// Abandoned at the global deadline.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: String,
    pub class: EndpointClass,
    pub outcome: FetchOutcome,
}

/// Heap entry: highest priority first, then earliest ready time, then FIFO.
struct QueuedFetch {
    request: FetchRequest,
    ready_at: Instant,
    seq: u64,
}

impl PartialEq for QueuedFetch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedFetch {}

impl PartialOrd for QueuedFetch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedFetch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.request
            .priority
            .cmp(&other.request.priority)
            .then_with(|| other.ready_at.cmp(&self.ready_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Wrapper ordering parked requests by earliest ready time, so a parked
/// high-priority request never shadows due work of other classes.
struct Parked(QueuedFetch);

impl PartialEq for Parked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Parked {}

impl PartialOrd for Parked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Parked {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .ready_at
            .cmp(&self.0.ready_at)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

/// Converts a queue of [`FetchRequest`]s into completed data objects while
/// respecting per-class quotas and a bounded in-flight concurrency limit.
///
/// Quota reservation happens in the dispatch loop, synchronously with the
/// decision to spawn a fetch, so a class is never dispatched past its quota
/// even transiently. Parked requests (quota deferrals, cooldowns, retry
/// backoff) move to a separate ready-time queue: they consume no worker
/// slot and never block due requests of other classes.
pub struct FetchScheduler {
    source: Arc<dyn MarketDataSource>,
    quota: Arc<QuotaTracker>,
    workers: usize,
    max_retries: u32,
    backoff_floor: Duration,
    historical_days: u32,
}

impl FetchScheduler {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        quota: Arc<QuotaTracker>,
        config: &Config,
    ) -> Self {
        Self {
            source,
            quota,
            workers: config.fetch_workers,
            max_retries: config.max_retries,
            backoff_floor: config.retry_backoff_floor,
            historical_days: config.historical_days,
        }
    }

    /// Drain `requests`, returning one result per request.
    ///
    /// When `deadline` elapses, in-flight fetches are abandoned and every
    /// unfinished request is reported as [`FetchOutcome::TimedOut`]; the
    /// call always terminates.
    pub async fn run(
        &self,
        requests: Vec<FetchRequest>,
        deadline: Option<Duration>,
    ) -> Vec<FetchResult> {
        let total = requests.len();
        let mut results = Vec::with_capacity(total);
        if total == 0 {
            return results;
        }

        let start = Instant::now();
        let deadline_at = deadline.map(|d| start + d);

        let (requeue_tx, mut requeue_rx) = mpsc::channel::<QueuedFetch>(total);
        let (result_tx, mut result_rx) = mpsc::channel::<(u64, FetchResult)>(total);
        let semaphore = Arc::new(Semaphore::new(self.workers));

        let mut ready = BinaryHeap::with_capacity(total);
        let mut parked: BinaryHeap<Parked> = BinaryHeap::new();
        for (seq, request) in requests.into_iter().enumerate() {
            ready.push(QueuedFetch {
                request,
                ready_at: start,
                seq: seq as u64,
            });
        }

        // Identity of spawned fetches, for timed-out reporting.
        let mut in_flight: HashMap<u64, (String, EndpointClass)> = HashMap::new();
        let mut handles = Vec::new();

        while results.len() < total {
            let now = Instant::now();
            if deadline_at.is_some_and(|d| now >= d) {
                break;
            }

            // Promote parked requests whose ready time has passed.
            while parked.peek().is_some_and(|p| p.0.ready_at <= now) {
                if let Some(Parked(item)) = parked.pop() {
                    ready.push(item);
                }
            }

            // Dispatch every due request the worker pool has room for.
            while !ready.is_empty() {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                let Some(item) = ready.pop() else {
                    break;
                };

                match self.quota.reserve(item.request.class).await {
                    Reservation::Allowed => {
                        in_flight
                            .insert(item.seq, (item.request.symbol.clone(), item.request.class));
                        let worker = Worker {
                            source: Arc::clone(&self.source),
                            quota: Arc::clone(&self.quota),
                            result_tx: result_tx.clone(),
                            requeue_tx: requeue_tx.clone(),
                            max_retries: self.max_retries,
                            backoff_floor: self.backoff_floor,
                            historical_days: self.historical_days,
                        };
                        handles.push(tokio::spawn(async move {
                            worker.fetch_one(item).await;
                            drop(permit);
                        }));
                    }
                    Reservation::Deferred(wait) => {
                        drop(permit);
                        parked.push(Parked(QueuedFetch {
                            ready_at: now + wait,
                            ..item
                        }));
                    }
                    Reservation::CoolingDown(until) => {
                        drop(permit);
                        parked.push(Parked(QueuedFetch {
                            ready_at: until,
                            ..item
                        }));
                    }
                }
            }

            let next_ready = parked.peek().map(|p| p.0.ready_at);
            tokio::select! {
                biased;

                Some((seq, result)) = result_rx.recv() => {
                    in_flight.remove(&seq);
                    results.push(result);
                }

                Some(item) = requeue_rx.recv() => {
                    in_flight.remove(&item.seq);
                    if item.ready_at <= Instant::now() {
                        ready.push(item);
                    } else {
                        parked.push(Parked(item));
                    }
                }

                _ = tokio::time::sleep_until(deadline_at.unwrap_or(now)),
                    if deadline_at.is_some() => {}

                _ = tokio::time::sleep_until(next_ready.unwrap_or(now)),
                    if next_ready.is_some_and(|t| t > now) => {}
            }
        }

        if results.len() < total {
            // Deadline expired: abandon in-flight work and report the rest.
            warn!(
                "fetch deadline expired with {} of {} requests unfinished",
                total - results.len(),
                total
            );
            for handle in &handles {
                handle.abort();
            }
            for item in ready {
                results.push(FetchResult {
                    symbol: item.request.symbol,
                    class: item.request.class,
                    outcome: FetchOutcome::TimedOut,
                });
            }
            for Parked(item) in parked {
                results.push(FetchResult {
                    symbol: item.request.symbol,
                    class: item.request.class,
                    outcome: FetchOutcome::TimedOut,
                });
            }
            for (symbol, class) in in_flight.into_values() {
                results.push(FetchResult {
                    symbol,
                    class,
                    outcome: FetchOutcome::TimedOut,
                });
            }
        }

        results
    }
}

struct Worker {
    source: Arc<dyn MarketDataSource>,
    quota: Arc<QuotaTracker>,
    result_tx: mpsc::Sender<(u64, FetchResult)>,
    requeue_tx: mpsc::Sender<QueuedFetch>,
    max_retries: u32,
    backoff_floor: Duration,
    historical_days: u32,
}

impl Worker {
    async fn fetch_one(&self, item: QueuedFetch) {
        let symbol = item.request.symbol.clone();
        let class = item.request.class;

        let outcome = match class {
            EndpointClass::Historical => self
                .source
                .fetch_historical(&symbol, self.historical_days)
                .await
                .map(FetchPayload::Historical),
            EndpointClass::Quote => self
                .source
                .fetch_quote(&symbol)
                .await
                .map(FetchPayload::Quote),
            EndpointClass::OptionChain => self
                .source
                .fetch_option_chain(&symbol)
                .await
                .map(FetchPayload::OptionChain),
            EndpointClass::Other => Err(FetchError::Transient {
                reason: "no fetch handler for endpoint class 'other'".to_string(),
            }),
        };

        match outcome {
            Ok(payload) => {
                debug!("fetch [{}/{}]: completed", symbol, class);
                self.finish(item.seq, symbol, class, FetchOutcome::Success(payload))
                    .await;
            }
            Err(FetchError::RateLimited { retry_after }) => {
                self.quota.record_rejection(class, retry_after).await;
                let delay = retry_after.max(self.backoff_floor);
                self.retry_or_exhaust(
                    item,
                    delay,
                    FetchError::RateLimited { retry_after },
                )
                .await;
            }
            Err(err @ FetchError::NotFound { .. }) => {
                // Not retryable; terminal straight away.
                self.finish(item.seq, symbol, class, FetchOutcome::Exhausted(err))
                    .await;
            }
            Err(err) => {
                let exp = item.request.retries.min(10);
                let backoff = self.backoff_floor * 2u32.pow(exp);
                self.retry_or_exhaust(item, backoff, err).await;
            }
        }
    }

    async fn retry_or_exhaust(&self, mut item: QueuedFetch, delay: Duration, err: FetchError) {
        if item.request.retries >= self.max_retries {
            info!(
                "fetch [{}/{}]: retries exhausted after {} attempts: {}",
                item.request.symbol,
                item.request.class,
                item.request.retries + 1,
                err
            );
            let symbol = item.request.symbol.clone();
            let class = item.request.class;
            self.finish(item.seq, symbol, class, FetchOutcome::Exhausted(err))
                .await;
            return;
        }

        item.request.retries += 1;
        item.ready_at = Instant::now() + delay;
        debug!(
            "fetch [{}/{}]: retry {} in {:?} ({})",
            item.request.symbol, item.request.class, item.request.retries, delay, err
        );
        let _ = self.requeue_tx.send(item).await;
    }

    async fn finish(&self, seq: u64, symbol: String, class: EndpointClass, outcome: FetchOutcome) {
        let _ = self
            .result_tx
            .send((
                seq,
                FetchResult {
                    symbol,
                    class,
                    outcome,
                },
            ))
            .await;
    }
}
