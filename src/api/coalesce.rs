//! Per-key request coalescing with a success cool-down
//!
//! Concurrent reads of the same query share one in-flight load, and a read
//! repeated shortly after a successful load is answered from memory.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, TryFutureExt};
use serde_json::Value;
use tokio::time::Instant;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(3000);

type SharedLoad<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct CoalesceEntry<T, E> {
    in_flight: Option<SharedLoad<T, E>>,
    last_completed_at: Option<Instant>,
    last_result: Option<T>,
}

impl<T, E> Default for CoalesceEntry<T, E> {
    fn default() -> Self {
        Self {
            in_flight: None,
            last_completed_at: None,
            last_result: None,
        }
    }
}

struct State<T, E> {
    /// Bumped by `clear` so loads started before it cannot write back.
    epoch: u64,
    entries: HashMap<String, CoalesceEntry<T, E>>,
}

pub struct RequestCoalescer<T, E> {
    state: Arc<Mutex<State<T, E>>>,
}

impl<T, E> Clone for RequestCoalescer<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> Default for RequestCoalescer<T, E> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                epoch: 0,
                entries: HashMap::new(),
            })),
        }
    }
}

impl<T, E> RequestCoalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `key` through `loader` unless a load is already in flight or a
    /// success completed less than `cooldown` ago.
    ///
    /// `key` must already be canonical: same endpoint and parameter set,
    /// independent of parameter order.
    pub async fn fetch<F, Fut>(&self, key: &str, loader: F, cooldown: Duration) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let pending = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let epoch = state.epoch;
            let entry = state.entries.entry(key.to_string()).or_default();

            if let Some(in_flight) = &entry.in_flight {
                tracing::debug!("Joining in-flight load for {}", key);
                in_flight.clone()
            } else {
                let fresh = entry
                    .last_completed_at
                    .is_some_and(|at| at.elapsed() < cooldown);
                if let (true, Some(cached)) = (fresh, &entry.last_result) {
                    tracing::debug!("Serving {} from cache", key);
                    return Ok(cached.clone());
                }

                let load = self.settle_into_cache(key.to_string(), epoch, loader());
                entry.in_flight = Some(load.clone());
                load
            }
        };
        pending.await
    }

    fn settle_into_cache<Fut>(&self, key: String, epoch: u64, load: Fut) -> SharedLoad<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        async move {
            let result = load.await;
            {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                if state.epoch == epoch {
                    if let Some(entry) = state.entries.get_mut(&key) {
                        entry.in_flight = None;
                        // Failures leave the last good result alone and do not
                        // start a cool-down.
                        if let Ok(value) = &result {
                            entry.last_completed_at = Some(Instant::now());
                            entry.last_result = Some(value.clone());
                        }
                    }
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Forget every entry, e.g. when the active company changes.
    pub fn clear(&self) {
        tracing::info!("Clearing request cache");
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.epoch += 1;
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }
}

impl<E> RequestCoalescer<Vec<Value>, E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Like [`fetch`](Self::fetch), but drops records that break any of
    /// `rules` before they are cached or returned.
    pub async fn fetch_records<F, Fut>(
        &self,
        key: &str,
        rules: RecordRules,
        loader: F,
        cooldown: Duration,
    ) -> Result<Vec<Value>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Value>, E>> + Send + 'static,
    {
        let key_owned = key.to_string();
        let validated = move || {
            loader().map_ok(move |records| {
                let (valid, dropped) = retain_valid(records, rules);
                if dropped > 0 {
                    tracing::warn!(
                        "Filtered out {} invalid records from {} (need {})",
                        dropped,
                        key_owned,
                        describe(rules)
                    );
                }
                valid
            })
        };
        self.fetch(key, validated, cooldown).await
    }
}

/// What a record field must hold for the record to be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// An integer, unique within one batch.
    Id,
    /// A finite JSON number.
    Number,
    /// Anything but null.
    Present,
}

impl FieldRule {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldRule::Id => value.as_i64().is_some(),
            FieldRule::Number => value.as_f64().is_some_and(f64::is_finite),
            FieldRule::Present => !value.is_null(),
        }
    }
}

pub type RecordRules = &'static [(&'static str, FieldRule)];

fn describe(rules: &[(&str, FieldRule)]) -> String {
    rules
        .iter()
        .map(|(field, _)| *field)
        .collect::<Vec<_>>()
        .join("/")
}

/// Keep records whose fields satisfy every rule. Later records repeating
/// an already kept id are dropped too. Returns the kept records and how
/// many were dropped.
pub fn retain_valid(records: Vec<Value>, rules: &[(&str, FieldRule)]) -> (Vec<Value>, usize) {
    let total = records.len();
    let mut seen: HashSet<(usize, i64)> = HashSet::new();
    let valid: Vec<Value> = records
        .into_iter()
        .filter(|record| {
            let well_formed = rules
                .iter()
                .all(|(field, rule)| record.get(*field).is_some_and(|v| rule.accepts(v)));
            if !well_formed {
                return false;
            }
            let ids: Vec<(usize, i64)> = rules
                .iter()
                .enumerate()
                .filter(|(_, (_, rule))| *rule == FieldRule::Id)
                .filter_map(|(i, (field, _))| Some((i, record.get(*field)?.as_i64()?)))
                .collect();
            if ids.iter().any(|id| seen.contains(id)) {
                return false;
            }
            seen.extend(ids);
            true
        })
        .collect();
    let dropped = total - valid.len();
    (valid, dropped)
}
