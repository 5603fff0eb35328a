//! Request deduplication and batching.
//!
//! Callers submit (endpoint, symbols) requests. Identical requests, matched
//! on endpoint plus the sorted symbol set, share one pending call and one
//! result. Every window the pending calls are grouped by endpoint, ordered
//! by priority and cut into batches sized for the provider chosen to serve
//! them. Quote endpoints go out as multi-symbol calls; other endpoints are
//! one symbol per call.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::errors::MarketDataError;
use crate::models::{DataType, FetchRequest, MarketData, Payload, Priority};
use crate::router::FallbackRouter;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizerConfig {
    /// Batch window.
    pub window: Duration,
    /// Longest a caller waits for its result.
    pub request_timeout: Duration,
    /// Failed batches before a call is failed for good.
    pub max_attempts: u32,
    pub event_capacity: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            event_capacity: 64,
        }
    }
}

/// One provider call planned by a window.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub id: Uuid,
    pub endpoint: DataType,
    pub symbols: Vec<String>,
    pub priority: Priority,
    pub provider: String,
    pub scheduled_at: DateTime<Utc>,
    /// Provider calls this batch costs, weighted by the provider's cost.
    pub total_cost: f64,
}

/// What a caller receives.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub data: HashMap<String, MarketData>,
    /// Symbols the provider answered without data.
    pub failed: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum OptimizerEvent {
    BatchCompleted {
        batch: BatchRequest,
        data: Vec<MarketData>,
    },
    BatchFailed {
        batch: BatchRequest,
        error: String,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowReport {
    pub calls: usize,
    pub batches: usize,
    pub resolved: usize,
    pub postponed: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Calls dropped because every caller stopped waiting.
    pub abandoned: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerStats {
    pub requests: u64,
    pub deduplicated: u64,
    pub batches: u64,
    pub postponed: u64,
}

type DedupKey = (DataType, Vec<String>);
type Waiter = oneshot::Sender<Result<BatchResult, String>>;

#[derive(Debug)]
struct PendingCall {
    id: Uuid,
    key: DedupKey,
    priority: Priority,
    user_id: Option<String>,
    attempts: u32,
}

#[derive(Default)]
struct State {
    pending: Vec<PendingCall>,
    waiters: HashMap<DedupKey, Vec<Waiter>>,
    stats: OptimizerStats,
}

struct Choice {
    provider: String,
    batch_size: usize,
    cost: f64,
}

pub struct BatchOptimizer {
    router: Arc<FallbackRouter>,
    state: Mutex<State>,
    events: broadcast::Sender<OptimizerEvent>,
    config: OptimizerConfig,
    clock: SharedClock,
}

impl BatchOptimizer {
    pub fn new(router: Arc<FallbackRouter>, config: OptimizerConfig, clock: SharedClock) -> Self {
        let (events, _receiver) = broadcast::channel(config.event_capacity.max(1));
        Self {
            router,
            state: Mutex::new(State::default()),
            events,
            config,
            clock,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Optimizer mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OptimizerEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: OptimizerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }

    pub fn pending(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn stats(&self) -> OptimizerStats {
        self.lock_state().stats
    }

    /// Register a request and return the receiver for its result. An
    /// identical request already waiting absorbs this one.
    pub(crate) fn submit(
        &self,
        endpoint: DataType,
        symbols: &[String],
        priority: Priority,
        user_id: Option<&str>,
    ) -> oneshot::Receiver<Result<BatchResult, String>> {
        let mut symbols: Vec<String> = symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        symbols.dedup();
        let key = (endpoint, symbols);

        let (sender, receiver) = oneshot::channel();
        let mut state = self.lock_state();
        state.stats.requests += 1;

        if let Some(waiters) = state.waiters.get_mut(&key) {
            waiters.push(sender);
            state.stats.deduplicated += 1;
            if let Some(call) = state.pending.iter_mut().find(|call| call.key == key) {
                call.priority = call.priority.max(priority);
            }
            debug!("Optimizer: joined pending {} request for {:?}", endpoint, key.1);
        } else {
            state.waiters.insert(key.clone(), vec![sender]);
            state.pending.push(PendingCall {
                id: Uuid::new_v4(),
                key,
                priority,
                user_id: user_id.map(str::to_string),
                attempts: 0,
            });
        }
        receiver
    }

    /// Submit a request and wait for its batch.
    pub async fn add_request(
        &self,
        endpoint: DataType,
        symbols: &[String],
        priority: Priority,
        user_id: Option<&str>,
    ) -> Result<BatchResult, MarketDataError> {
        if symbols.iter().all(|s| s.trim().is_empty()) {
            return Ok(BatchResult::default());
        }
        let receiver = self.submit(endpoint, symbols, priority, user_id);
        match tokio::time::timeout(self.config.request_timeout, receiver).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(MarketDataError::BatchFailed { message }),
            Ok(Err(_)) => Err(MarketDataError::BatchFailed {
                message: "optimizer dropped the request".to_string(),
            }),
            Err(_) => Err(MarketDataError::RequestTimeout {
                waited: self.config.request_timeout,
            }),
        }
    }

    /// Plan and execute every pending call.
    pub async fn run_window(&self) -> WindowReport {
        let mut report = WindowReport::default();
        let calls: Vec<PendingCall> = {
            let mut state = self.lock_state();
            let waiting = std::mem::take(&mut state.pending);
            let before = waiting.len();
            let live: Vec<PendingCall> = waiting
                .into_iter()
                .filter(|call| !drop_if_abandoned(&mut state, &call.key))
                .collect();
            report.abandoned = before - live.len();
            live
        };
        report.calls = calls.len();
        if calls.is_empty() {
            return report;
        }

        let mut groups: BTreeMap<DataType, Vec<PendingCall>> = BTreeMap::new();
        for call in calls {
            groups.entry(call.key.0).or_default().push(call);
        }
        for (endpoint, mut group) in groups {
            // Stable, so equal priorities keep arrival order
            group.sort_by(|a, b| b.priority.cmp(&a.priority));
            self.run_group(endpoint, group, &mut report).await;
        }

        debug!(
            "Optimizer: window done, {} calls in {} batches ({} postponed, {} abandoned)",
            report.calls, report.batches, report.postponed, report.abandoned
        );
        report
    }

    async fn run_group(&self, endpoint: DataType, group: Vec<PendingCall>, report: &mut WindowReport) {
        let mut seen = HashSet::new();
        let mut remaining: VecDeque<String> = group
            .iter()
            .flat_map(|call| call.key.1.iter())
            .filter(|symbol| seen.insert(symbol.as_str()))
            .cloned()
            .collect();

        let mut results: HashMap<String, MarketData> = HashMap::new();
        let mut answered: HashSet<String> = HashSet::new();
        let mut errored: HashMap<String, String> = HashMap::new();
        let mut postponed: HashSet<String> = HashSet::new();

        while !remaining.is_empty() {
            let Some(choice) = self.choose_provider(endpoint, remaining.len()) else {
                info!(
                    "Optimizer: no provider with quota for {} ({} symbols), postponing",
                    endpoint,
                    remaining.len()
                );
                postponed.extend(remaining.drain(..));
                break;
            };

            let size = choice.batch_size.min(remaining.len());
            let symbols: Vec<String> = remaining.drain(..size).collect();
            let priority = group
                .iter()
                .filter(|call| call.key.1.iter().any(|s| symbols.contains(s)))
                .map(|call| call.priority)
                .max()
                .unwrap_or_default();
            let calls_needed = if endpoint.is_quote_like() { 1 } else { symbols.len() };
            let batch = BatchRequest {
                id: Uuid::new_v4(),
                endpoint,
                symbols,
                priority,
                provider: choice.provider,
                scheduled_at: self.clock.now(),
                total_cost: choice.cost * calls_needed as f64,
            };
            report.batches += 1;

            match self.execute(&batch).await {
                Ok(data) => {
                    for item in &data {
                        results.insert(item.symbol.to_uppercase(), item.clone());
                    }
                    answered.extend(batch.symbols.iter().cloned());
                    debug!(
                        "Optimizer: batch {} via '{}' returned {}/{}",
                        batch.id,
                        batch.provider,
                        data.len(),
                        batch.symbols.len()
                    );
                    self.publish(OptimizerEvent::BatchCompleted { batch, data });
                }
                Err(error) => {
                    warn!(
                        "Optimizer: batch {} via '{}' failed: {}",
                        batch.id, batch.provider, error
                    );
                    for symbol in &batch.symbols {
                        errored.insert(symbol.clone(), error.to_string());
                    }
                    self.publish(OptimizerEvent::BatchFailed {
                        batch,
                        error: error.to_string(),
                    });
                }
            }
        }

        let mut state = self.lock_state();
        state.stats.batches += report.batches as u64;
        for mut call in group {
            let symbols = &call.key.1;

            let retrying = symbols
                .iter()
                .any(|s| postponed.contains(s) || errored.contains_key(s));
            if retrying && drop_if_abandoned(&mut state, &call.key) {
                debug!("Optimizer: dropped call {}, no caller is waiting", call.id);
                report.abandoned += 1;
                continue;
            }

            if symbols.iter().any(|s| postponed.contains(s)) {
                report.postponed += 1;
                state.stats.postponed += 1;
                state.pending.push(call);
                continue;
            }

            if let Some(error) = symbols.iter().find_map(|s| errored.get(s)).cloned() {
                call.attempts += 1;
                if call.attempts >= self.config.max_attempts {
                    warn!(
                        "Optimizer: giving up on {} {:?} after {} attempts",
                        endpoint, symbols, call.attempts
                    );
                    report.failed += 1;
                    resolve(&mut state, &call.key, Err(error));
                } else {
                    call.priority = call.priority.degrade();
                    debug!(
                        "Optimizer: requeued call {} (user {:?}) at {:?}",
                        call.id, call.user_id, call.priority
                    );
                    report.requeued += 1;
                    state.pending.push(call);
                }
                continue;
            }

            let result = BatchResult {
                data: symbols
                    .iter()
                    .filter_map(|s| results.get(s).map(|d| (s.clone(), d.clone())))
                    .collect(),
                failed: symbols
                    .iter()
                    .filter(|s| answered.contains(*s) && !results.contains_key(*s))
                    .cloned()
                    .collect(),
            };
            report.resolved += 1;
            resolve(&mut state, &call.key, Ok(result));
        }
    }

    async fn execute(&self, batch: &BatchRequest) -> Result<Vec<MarketData>, MarketDataError> {
        if batch.endpoint.is_quote_like() {
            let quotes = self
                .router
                .fetch_quotes_from(&batch.provider, &batch.symbols)
                .await?;
            let now = self.clock.now();
            return Ok(quotes
                .into_iter()
                .map(|quote| {
                    MarketData::new(
                        quote.symbol.to_uppercase(),
                        batch.endpoint,
                        quote.source.clone(),
                        now,
                        Payload::Quote(quote),
                    )
                })
                .collect());
        }

        let mut data = Vec::with_capacity(batch.symbols.len());
        for symbol in &batch.symbols {
            let request = FetchRequest::new(symbol.clone(), batch.endpoint).priority(batch.priority);
            data.push(self.router.fetch_from(&batch.provider, &request).await?);
        }
        Ok(data)
    }

    /// Provider maximising `remaining * min(batch, n) / cost`, from the
    /// endpoint's strategy. Degraded providers score half. Synthetic
    /// providers are chosen only when no real one qualifies.
    fn choose_provider(&self, endpoint: DataType, symbols: usize) -> Option<Choice> {
        let quota = self.router.quota();
        let breaker = self.router.breaker();
        let registered = self.router.provider_ids();
        let strategy = self.router.strategies().get(endpoint);

        let mut best_real: Option<(f64, Choice)> = None;
        let mut best_synthetic: Option<(f64, Choice)> = None;

        for id in &strategy.providers {
            if !registered.contains(id) {
                continue;
            }
            let Some(descriptor) = quota.descriptor(id) else {
                continue;
            };
            if !descriptor.supports(endpoint) || !descriptor.enabled || !descriptor.has_credential {
                continue;
            }
            let remaining = quota.remaining(id);
            if remaining == 0 || breaker.is_open(id) {
                continue;
            }

            let batch_size = descriptor.batch_size_for(endpoint);
            let cost = descriptor.cost_per_call.max(f64::EPSILON);
            let mut score = remaining as f64 * batch_size.min(symbols) as f64 / cost;
            if breaker.is_degraded(id) {
                score *= 0.5;
            }

            let slot = if descriptor.synthetic {
                &mut best_synthetic
            } else {
                &mut best_real
            };
            if slot.as_ref().map_or(true, |(best, _)| score > *best) {
                *slot = Some((
                    score,
                    Choice {
                        provider: id.clone(),
                        batch_size,
                        cost,
                    },
                ));
            }
        }

        best_real.or(best_synthetic).map(|(_, choice)| choice)
    }
}

/// Forget `key` when none of its waiters is still listening.
fn drop_if_abandoned(state: &mut State, key: &DedupKey) -> bool {
    let listening = state
        .waiters
        .get(key)
        .is_some_and(|waiters| waiters.iter().any(|waiter| !waiter.is_closed()));
    if !listening {
        state.waiters.remove(key);
    }
    !listening
}

fn resolve(state: &mut State, key: &DedupKey, result: Result<BatchResult, String>) {
    if let Some(waiters) = state.waiters.remove(key) {
        for waiter in waiters {
            // A waiter that timed out has dropped its receiver
            let _ = waiter.send(result.clone());
        }
    }
}
