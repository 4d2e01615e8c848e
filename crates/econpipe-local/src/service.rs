//! The dedup service: one object per process owning the memo, in-flight and seen-set stores.
//!
//! Pipeline for one tool call:
//! canonical key -> session memo -> in-flight coalescer -> retrying external call ->
//! fingerprint + in-batch dedupe -> memo insert -> per-request dedupe.

use crate::canon::{build_tool_key, canon_options};
use crate::config::ServiceConfig;
use crate::dedupe::{fingerprint_records, RequestSeen};
use crate::inflight::{Coalescer, SettleHook};
use crate::memo::MemoStore;
use crate::retry::{call_with_timeout, RetryPolicy};
use econpipe_core::{CallContext, Result, ResultRecord, SearchApi, SearchOptions, SearchOutcome};
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Counters {
    external_calls: u64,
    records_dropped: u64,
    total_deduction_dollars: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub api: &'static str,
    pub external_calls: u64,
    pub memo_hits: u64,
    pub memo_misses: u64,
    pub coalesced_joins: u64,
    pub in_flight: usize,
    pub records_dropped: u64,
    pub sessions_in_memory: usize,
    pub requests_in_memory: usize,
    pub memo_capacity: usize,
    pub total_deduction_dollars: f64,
}

pub struct DedupService {
    api: Arc<dyn SearchApi>,
    memo: Arc<MemoStore<Arc<SearchOutcome>>>,
    inflight: Coalescer<Arc<SearchOutcome>>,
    seen: RequestSeen,
    retry: RetryPolicy,
    counters: Arc<Mutex<Counters>>,
}

fn lock(c: &Mutex<Counters>) -> std::sync::MutexGuard<'_, Counters> {
    c.lock().unwrap_or_else(|e| e.into_inner())
}

impl DedupService {
    pub fn new(api: Arc<dyn SearchApi>, config: ServiceConfig) -> Self {
        Self {
            api,
            memo: Arc::new(MemoStore::new(config.memo_capacity, config.max_sessions)),
            inflight: Coalescer::new(),
            seen: RequestSeen::new(config.max_requests),
            retry: config.retry,
            counters: Arc::new(Mutex::new(Counters::default())),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run one tool's search through the full pipeline.
    ///
    /// Equivalent invocations within a session cost at most one external call while in flight
    /// and zero afterwards, until the entry is evicted. Records already surfaced under
    /// `ctx.request_id` are dropped from the returned outcome; `found` reflects what is left.
    /// A memo hit reports no deduction: nothing was billed for it.
    pub async fn search(
        &self,
        tool: &str,
        query: &str,
        options: &SearchOptions,
        ctx: &CallContext,
    ) -> Result<SearchOutcome> {
        let opts = options.to_value();
        let key = build_tool_key(tool, query, &opts);
        let session = ctx.session_id.as_deref();

        let (shared, memo_hit) = match session.and_then(|sid| self.memo.lookup(sid, &key)) {
            Some(hit) => (hit, true),
            None => self.fetch_coalesced(tool, query, options, &opts, session, &key).await?,
        };

        let before = shared.records.len();
        let records =
            self.dedupe_against_request(ctx.request_id.as_deref(), shared.records.clone());
        if records.len() < before {
            lock(&self.counters).records_dropped += (before - records.len()) as u64;
        }
        Ok(SearchOutcome {
            found: !records.is_empty(),
            records,
            total_deduction_dollars: if memo_hit {
                None
            } else {
                shared.total_deduction_dollars
            },
            tx_id: shared.tx_id.clone(),
            memo_hit,
        })
    }

    /// Join or start the external call for this invocation.
    ///
    /// The session memo is written by the settle hook, before the in-flight entry clears, so a
    /// repeat call always finds one or the other. The memo is checked again under the
    /// coalescer's lock for the same reason. The flag is true when that second look hit.
    async fn fetch_coalesced(
        &self,
        tool: &str,
        query: &str,
        options: &SearchOptions,
        opts: &serde_json::Value,
        session: Option<&str>,
        key: &str,
    ) -> Result<(Arc<SearchOutcome>, bool)> {
        let coalesce_key = Coalescer::<Arc<SearchOutcome>>::coalesce_key(
            tool,
            query,
            &canon_options(opts),
        );
        let on_settle = session.map(|sid| {
            let memo = Arc::clone(&self.memo);
            let sid = sid.to_string();
            let key = key.to_string();
            Box::new(move |v: &Arc<SearchOutcome>| memo.insert(&sid, key, Arc::clone(v)))
                as SettleHook<Arc<SearchOutcome>>
        });

        let mut rechecked = false;
        let run = || -> BoxFuture<'static, Result<Arc<SearchOutcome>>> {
            if let Some(hit) = session.and_then(|sid| self.memo.recheck(sid, key)) {
                rechecked = true;
                return futures_util::future::ready(Ok(hit)).boxed();
            }
            let api = Arc::clone(&self.api);
            let counters = Arc::clone(&self.counters);
            let retry = self.retry;
            let q = query.to_string();
            let o = options.clone();
            async move {
                lock(&counters).external_calls += 1;
                let resp = call_with_timeout(api.as_ref(), &q, &o, retry).await?;
                let raw_len = resp.results.len();
                let records = fingerprint_records(resp.results);
                {
                    let mut c = lock(&counters);
                    c.records_dropped += (raw_len - records.len()) as u64;
                    c.total_deduction_dollars += resp.total_deduction_dollars.unwrap_or(0.0);
                }
                Ok(Arc::new(SearchOutcome {
                    found: !records.is_empty(),
                    records,
                    total_deduction_dollars: resp.total_deduction_dollars,
                    tx_id: resp.tx_id,
                    memo_hit: false,
                }))
            }
            .boxed()
        };
        let out = self.inflight.once_keyed(coalesce_key, run, on_settle).await?;
        Ok((out, rechecked))
    }

    pub fn dedupe_against_request(
        &self,
        request_id: Option<&str>,
        records: Vec<ResultRecord>,
    ) -> Vec<ResultRecord> {
        self.seen.dedupe_against_request(request_id, records)
    }

    pub fn memo(&self) -> &MemoStore<Arc<SearchOutcome>> {
        &self.memo
    }

    pub fn inflight(&self) -> &Coalescer<Arc<SearchOutcome>> {
        &self.inflight
    }

    pub fn stats(&self) -> ServiceStats {
        let c = lock(&self.counters);
        ServiceStats {
            api: self.api.name(),
            external_calls: c.external_calls,
            memo_hits: self.memo.hits(),
            memo_misses: self.memo.misses(),
            coalesced_joins: self.inflight.joined_count(),
            in_flight: self.inflight.in_flight(),
            records_dropped: c.records_dropped,
            sessions_in_memory: self.memo.sessions_in_memory(),
            requests_in_memory: self.seen.requests_in_memory(),
            memo_capacity: self.memo.capacity(),
            total_deduction_dollars: c.total_deduction_dollars,
        }
    }
}
