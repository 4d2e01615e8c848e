//! First-occurrence deduplication, within one response and across tool calls of one request.

use crate::identity::result_id;
use crate::recency::Recency;
use econpipe_core::{RawRecord, ResultRecord};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Mutex;

/// Keep the first item per key; survivors stay in input order.
pub fn dedupe_by<T, K, F>(items: Vec<T>, mut key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|x| seen.insert(key(x))).collect()
}

/// Stamp fingerprints onto raw records and drop repeats within the batch.
pub fn fingerprint_records(raw: Vec<RawRecord>) -> Vec<ResultRecord> {
    let stamped: Vec<ResultRecord> = raw
        .into_iter()
        .map(|r| ResultRecord {
            id: result_id(&r),
            raw: r,
        })
        .collect();
    dedupe_by(stamped, |r: &ResultRecord| r.id.clone())
}

#[derive(Debug, Default)]
struct SeenState {
    by_request: HashMap<String, HashSet<String>>,
    recency: Recency,
}

/// Per-request "already surfaced" sets.
///
/// The outer map is capped at `max_requests`; the least recently touched request is evicted
/// first.
#[derive(Debug)]
pub struct RequestSeen {
    state: Mutex<SeenState>,
    max_requests: usize,
}

impl RequestSeen {
    pub fn new(max_requests: usize) -> Self {
        Self {
            state: Mutex::new(SeenState::default()),
            max_requests: max_requests.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SeenState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop records already surfaced under `request_id` and remember the rest.
    ///
    /// Without a request id this is a passthrough: cross-call dedup is opt-in.
    pub fn dedupe_against_request(
        &self,
        request_id: Option<&str>,
        records: Vec<ResultRecord>,
    ) -> Vec<ResultRecord> {
        let Some(rid) = request_id else {
            return records;
        };
        let mut s = self.lock();
        s.recency.touch(rid);
        let seen = s.by_request.entry(rid.to_string()).or_default();
        let out: Vec<ResultRecord> = records
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .collect();

        while s.by_request.len() > self.max_requests {
            let Some(evict) = s.recency.pop_oldest() else {
                break;
            };
            s.by_request.remove(&evict);
        }
        out
    }

    pub fn requests_in_memory(&self) -> usize {
        self.lock().by_request.len()
    }

    pub fn seen_count(&self, request_id: &str) -> usize {
        self.lock()
            .by_request
            .get(request_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}
