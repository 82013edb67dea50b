// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable pending-request queue.
//!
//! Requests that could not complete for lack of a valid credential are kept
//! in session-scoped storage until they are replayed after re-authentication.
//! The queue is bounded three ways: equivalent requests inside the dedup
//! window collapse into one, the serialized queue never exceeds
//! [`QueueLimits::max_bytes`], and records older than
//! [`QueueLimits::max_age_ms`] are purged on read and never replayed.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::storage::{KeyValue, PENDING_REQUESTS_KEY};

/// A call to retry once a credential is available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    #[serde(rename = "url")]
    pub target: String,
    pub method: String,
    #[serde(with = "body_base64", default)]
    pub body: Option<Bytes>,
    /// Enqueue time, epoch millis.
    #[serde(rename = "timestamp")]
    pub enqueued_at: u64,
}

impl PendingRequest {
    pub fn new(
        target: impl Into<String>,
        method: &str,
        body: Option<Bytes>,
        enqueued_at: u64,
    ) -> Self {
        Self { target: target.into(), method: method.to_ascii_uppercase(), body, enqueued_at }
    }

    fn dedup_key(&self) -> (String, String) {
        (self.target.clone(), self.method.to_ascii_uppercase())
    }

    fn same_call(&self, other: &PendingRequest) -> bool {
        self.target == other.target && self.method.eq_ignore_ascii_case(&other.method)
    }
}

/// Bounds applied to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub dedup_window_ms: u64,
    pub max_bytes: usize,
    pub max_age_ms: u64,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self { dedup_window_ms: 5_000, max_bytes: 1024 * 1024, max_age_ms: 10 * 60 * 1000 }
    }
}

/// Outcome of [`PendingStore::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Added,
    /// An equivalent request is already queued within the dedup window.
    Duplicate,
    /// Adding the record would push the queue past its size bound.
    Overflow,
    /// Storage failed; the record was not kept.
    Failed,
}

/// Session-scoped pending-request queue.
pub struct PendingStore {
    store: Arc<dyn KeyValue>,
    clock: Arc<dyn Clock>,
    limits: QueueLimits,
    /// Last enqueue time per `(target, METHOD)`. Purely time-based: neither
    /// `clear` nor `drain` forgets an entry before its window elapses.
    recent: Mutex<HashMap<(String, String), u64>>,
    /// Serializes read-modify-write cycles on the backing slot.
    lock: Mutex<()>,
}

impl PendingStore {
    pub fn new(store: Arc<dyn KeyValue>, clock: Arc<dyn Clock>, limits: QueueLimits) -> Self {
        Self { store, clock, limits, recent: Mutex::new(HashMap::new()), lock: Mutex::new(()) }
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    /// Append `record` unless it duplicates a recent one or would overflow.
    ///
    /// Neither rejection is an error to the caller; both are logged.
    pub fn enqueue(&self, record: PendingRequest) -> Enqueued {
        let _guard = self.lock.lock();
        let now = self.clock.now_ms();
        let mut records = self.read_fresh(now);

        let window = self.limits.dedup_window_ms;
        let key = record.dedup_key();
        let mut recent = self.recent.lock();
        recent.retain(|_, at| now.saturating_sub(*at) < window);

        let duplicate = recent.contains_key(&key)
            || records.iter().any(|existing| {
                existing.same_call(&record) && now.saturating_sub(existing.enqueued_at) < window
            });
        if duplicate {
            debug!(target_url = %record.target, method = %record.method, "skipping duplicate pending request");
            return Enqueued::Duplicate;
        }

        let target = record.target.clone();
        records.push(record);
        let json = match serde_json::to_string(&records) {
            Ok(json) => json,
            Err(e) => {
                warn!(err = %e, "failed to serialize pending requests");
                return Enqueued::Failed;
            }
        };
        if json.len() > self.limits.max_bytes {
            warn!(target_url = %target, size = json.len(), "pending request queue too large, dropping request");
            return Enqueued::Overflow;
        }
        if let Err(e) = self.store.set(PENDING_REQUESTS_KEY, &json) {
            warn!(target_url = %target, err = %e, "failed to save pending request");
            return Enqueued::Failed;
        }
        recent.insert(key, now);
        Enqueued::Added
    }

    /// Fresh records in insertion order, without removing them.
    ///
    /// Stale records are purged from storage as a side effect.
    pub fn pending(&self) -> Vec<PendingRequest> {
        let _guard = self.lock.lock();
        self.read_fresh(self.clock.now_ms())
    }

    /// Remove and return every fresh record in insertion order.
    pub fn drain(&self) -> Vec<PendingRequest> {
        let _guard = self.lock.lock();
        let records = self.read_fresh(self.clock.now_ms());
        self.remove_all();
        records
    }

    /// Empty the queue. The dedup window is time-based and unaffected: a call
    /// enqueued less than a window ago is still coalesced after a clear.
    pub fn clear(&self) {
        let _guard = self.lock.lock();
        self.remove_all();
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the persisted queue, dropping stale records and writing the
    /// filtered set back if anything was dropped. Caller holds `lock`.
    fn read_fresh(&self, now: u64) -> Vec<PendingRequest> {
        let raw = match self.store.get(PENDING_REQUESTS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(err = %e, "failed to read pending requests");
                return Vec::new();
            }
        };
        let records: Vec<PendingRequest> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(err = %e, "pending request queue is corrupt, discarding");
                return Vec::new();
            }
        };

        let total = records.len();
        let fresh: Vec<PendingRequest> = records
            .into_iter()
            .filter(|r| now.saturating_sub(r.enqueued_at) < self.limits.max_age_ms)
            .collect();

        if fresh.len() != total {
            debug!(purged = total - fresh.len(), "purged stale pending requests");
            let written = serde_json::to_string(&fresh)
                .map_err(anyhow::Error::from)
                .and_then(|json| self.store.set(PENDING_REQUESTS_KEY, &json));
            if let Err(e) = written {
                warn!(err = %e, "failed to persist purged pending requests");
            }
        }
        fresh
    }

    fn remove_all(&self) {
        if let Err(e) = self.store.remove(PENDING_REQUESTS_KEY) {
            warn!(err = %e, "failed to clear pending requests");
        }
    }
}

/// Request bodies are stored as standard base64 so arbitrary bytes survive
/// the JSON slot.
mod body_base64 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Option<Bytes>, s: S) -> Result<S::Ok, S::Error> {
        match body {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Bytes>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(s).map(Bytes::from).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
