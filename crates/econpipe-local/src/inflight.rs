//! Single-flight execution per key.
//!
//! The first caller for a key spawns the work on the runtime and registers a shared handle;
//! callers that arrive before it settles await that same handle. The registry entry is removed
//! by the spawned task itself once the work settles, success or failure, so an abandoned call
//! still runs to completion and never leaves a stale entry behind.
//!
//! Callers may attach a settle hook. Hooks run inside the spawned task, under the registry lock,
//! before the entry is removed: anyone who finds the key gone also observes every hook's effect.

use crate::canon::canon_query;
use econpipe_core::{Error, Result};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type SharedCall<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Runs once with the successful value. Must not call back into the coalescer.
pub type SettleHook<T> = Box<dyn FnOnce(&T) + Send + 'static>;

struct Entry<T> {
    call: SharedCall<T>,
    on_settle: Vec<SettleHook<T>>,
}

type Registry<T> = Arc<Mutex<HashMap<String, Entry<T>>>>;

pub struct Coalescer<T> {
    inflight: Registry<T>,
    joined: AtomicU64,
}

impl<T> Default for Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(
    r: &Mutex<HashMap<String, Entry<T>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, Entry<T>>> {
    r.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            joined: AtomicU64::new(0),
        }
    }

    /// `(tool, normalized query, options JSON)`. Options are not canonicalized here; callers
    /// that want order-insensitive coalescing pass canonical options.
    pub fn coalesce_key(tool: &str, query: &str, options: &serde_json::Value) -> String {
        format!("{tool}::{}::{options}", canon_query(query))
    }

    pub async fn once<F, Fut>(
        &self,
        tool: &str,
        query: &str,
        options: &serde_json::Value,
        run: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.once_keyed(Self::coalesce_key(tool, query, options), run, None)
            .await
    }

    /// `run` is invoked synchronously under the registry lock, and only when no call for `key`
    /// is in flight; the future it returns is what gets spawned.
    pub async fn once_keyed<F, Fut>(
        &self,
        key: String,
        run: F,
        on_settle: Option<SettleHook<T>>,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        // Check and register under one lock with no await in between.
        let call = {
            let mut map = lock(&self.inflight);
            if let Some(existing) = map.get_mut(&key) {
                self.joined.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "joined in-flight call");
                existing.on_settle.extend(on_settle);
                existing.call.clone()
            } else {
                let work = run();
                let registry = Arc::clone(&self.inflight);
                let k = key.clone();
                // The task cannot remove its entry before we insert it: it needs this lock.
                let handle = tokio::spawn(async move {
                    let out = work.await;
                    let mut map = lock(&registry);
                    if let Some(entry) = map.remove(&k) {
                        if let Ok(v) = &out {
                            for hook in entry.on_settle {
                                hook(v);
                            }
                        }
                    }
                    out
                });
                let call: SharedCall<T> = async move {
                    match handle.await {
                        Ok(out) => out,
                        Err(e) => Err(Error::Internal(format!(
                            "in-flight call did not complete: {e}"
                        ))),
                    }
                }
                .boxed()
                .shared();
                map.insert(
                    key,
                    Entry {
                        call: call.clone(),
                        on_settle: on_settle.into_iter().collect(),
                    },
                );
                call
            }
        };
        call.await
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }

    /// Number of callers that were served by someone else's call.
    pub fn joined_count(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }
}
