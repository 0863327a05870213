// src/resilience.rs
//! Advisory expiring tables consulted before each fetch.
//!
//! - `invalid`: handles confirmed not-found/unauthorized (long TTL).
//! - `timeouts`: consecutive-timeout counters; skip once the threshold is hit.
//! - `backoff`: provider-imposed wait windows.
//!
//! Absence of an entry always means "attempt normally". Expired entries are
//! dropped lazily on read and by [`ResilienceCaches::sweep`]. Concurrent
//! writes to one key are last-write-wins.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::ingest::error::{FailureKind, FetchError};

#[derive(Debug, Clone, Copy)]
pub struct ResilienceConfig {
    pub invalid_ttl: ChronoDuration,
    pub timeout_window: ChronoDuration,
    pub timeout_threshold: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            invalid_ttl: ChronoDuration::hours(1),
            timeout_window: ChronoDuration::minutes(5),
            timeout_threshold: 3,
        }
    }
}

/// One recorded failure for a handle.
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceCacheEntry {
    pub kind: FailureKind,
    pub recorded_at: DateTime<Utc>,
    pub ttl: ChronoDuration,
}

impl ResilienceCacheEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.recorded_at + self.ttl
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

#[derive(Debug, Clone, Copy)]
struct TimeoutState {
    count: u32,
    last: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ResilienceCaches {
    cfg: ResilienceConfig,
    invalid: Mutex<HashMap<String, ResilienceCacheEntry>>,
    timeouts: Mutex<HashMap<String, TimeoutState>>,
    backoff: Mutex<HashMap<String, ResilienceCacheEntry>>,
}

// Poisoning is irrelevant for advisory data; keep using the inner map.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl ResilienceCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /* -------- (a) invalid handles -------- */

    pub fn mark_invalid(&self, handle: &str, now: DateTime<Utc>) {
        lock(&self.invalid).insert(
            handle.to_string(),
            ResilienceCacheEntry {
                kind: FailureKind::Invalid,
                recorded_at: now,
                ttl: self.cfg.invalid_ttl,
            },
        );
    }

    pub fn is_invalid(&self, handle: &str, now: DateTime<Utc>) -> bool {
        let mut map = lock(&self.invalid);
        match map.get(handle) {
            Some(e) if e.is_expired(now) => {
                map.remove(handle);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /* -------- (b) repeated timeouts -------- */

    /// Count one timeout; returns the consecutive count inside the window.
    pub fn record_timeout(&self, handle: &str, now: DateTime<Utc>) -> u32 {
        let mut map = lock(&self.timeouts);
        let window = self.cfg.timeout_window;
        let st = map.entry(handle.to_string()).or_insert(TimeoutState {
            count: 0,
            last: now,
        });
        if now - st.last >= window {
            st.count = 0;
        }
        st.count += 1;
        st.last = now;
        st.count
    }

    pub fn is_timing_out(&self, handle: &str, now: DateTime<Utc>) -> bool {
        let mut map = lock(&self.timeouts);
        match map.get(handle).copied() {
            Some(st) if now - st.last >= self.cfg.timeout_window => {
                map.remove(handle);
                false
            }
            Some(st) => st.count >= self.cfg.timeout_threshold,
            None => false,
        }
    }

    /* -------- (c) provider backoff -------- */

    pub fn record_backoff(&self, handle: &str, wait: std::time::Duration, now: DateTime<Utc>) {
        let ttl = ChronoDuration::from_std(wait).unwrap_or_else(|_| ChronoDuration::hours(1));
        lock(&self.backoff).insert(
            handle.to_string(),
            ResilienceCacheEntry {
                kind: FailureKind::RateLimited,
                recorded_at: now,
                ttl,
            },
        );
    }

    /// Remaining wait if `handle` is inside a backoff window.
    pub fn backoff_remaining(&self, handle: &str, now: DateTime<Utc>) -> Option<ChronoDuration> {
        let mut map = lock(&self.backoff);
        match map.get(handle) {
            Some(e) if e.is_expired(now) => {
                map.remove(handle);
                None
            }
            Some(e) => Some(e.expires_at() - now),
            None => None,
        }
    }

    /* -------- orchestrator helpers -------- */

    /// Why `handle` should be skipped right now, if at all. Backoff only
    /// counts when the caller has no alternate path.
    pub fn skip_reason(
        &self,
        handle: &str,
        now: DateTime<Utc>,
        honor_backoff: bool,
    ) -> Option<FailureKind> {
        if self.is_invalid(handle, now) {
            return Some(FailureKind::Invalid);
        }
        if self.is_timing_out(handle, now) {
            return Some(FailureKind::Timeout);
        }
        if honor_backoff && self.backoff_remaining(handle, now).is_some() {
            return Some(FailureKind::RateLimited);
        }
        None
    }

    pub fn record_failure(&self, handle: &str, err: &FetchError, now: DateTime<Utc>) {
        match (err.kind(), err) {
            (FailureKind::Invalid, _) => self.mark_invalid(handle, now),
            (FailureKind::Timeout, _) => {
                self.record_timeout(handle, now);
            }
            (FailureKind::RateLimited, FetchError::RateLimited { retry_after }) => {
                self.record_backoff(handle, *retry_after, now)
            }
            _ => {}
        }
    }

    /// A success breaks the consecutive-timeout streak.
    pub fn record_success(&self, handle: &str) {
        lock(&self.timeouts).remove(handle);
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        {
            let mut map = lock(&self.invalid);
            let before = map.len();
            map.retain(|_, e| !e.is_expired(now));
            removed += before - map.len();
        }
        {
            let mut map = lock(&self.backoff);
            let before = map.len();
            map.retain(|_, e| !e.is_expired(now));
            removed += before - map.len();
        }
        {
            let window = self.cfg.timeout_window;
            let mut map = lock(&self.timeouts);
            let before = map.len();
            map.retain(|_, st| now - st.last < window);
            removed += before - map.len();
        }
        removed
    }
}
