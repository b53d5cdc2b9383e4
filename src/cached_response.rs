use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::fetcher::{FetchedObject, ResponseMetadata};

const MAX_REFRESH_RATIO: f64 = 0.9;

/// Usability of a cached response at a point in time, strictest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FreshnessState {
    Stale = 0,
    RefreshSuggested = 1,
    Fresh = 2,
}

/// Places the "refresh suggested" window at the tail of an entry's lifetime.
///
/// With a ratio of `0.2` an entry living 100 seconds is fresh for 80 seconds
/// and asks for a background refresh during the last 20.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessPolicy {
    refresh_ratio: f64,
}

impl FreshnessPolicy {
    pub fn new(refresh_ratio: f64) -> FreshnessPolicy {
        // f64::max drops NaN
        FreshnessPolicy {
            refresh_ratio: refresh_ratio.max(0.0).min(MAX_REFRESH_RATIO),
        }
    }

    pub fn refresh_ratio(&self) -> f64 {
        self.refresh_ratio
    }

    /// Never zero for a non-zero `ttl`, so a new entry always starts fresh.
    pub fn fresh_for(&self, ttl: Duration) -> Duration {
        if ttl.is_zero() {
            return ttl;
        }
        Duration::try_from_secs_f64(ttl.as_secs_f64() * (1.0 - self.refresh_ratio))
            .unwrap_or(ttl)
            .max(Duration::from_nanos(1))
            .min(ttl)
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        FreshnessPolicy::new(0.2)
    }
}

fn offset(start: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| start.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A response captured for `source_url`. Never changes after construction; a
/// refresh builds a new entry and swaps it into the store.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    body: Bytes,
    source_url: String,
    mime_type: String,
    encoding: Option<String>,
    response: ResponseMetadata,
    created_at: DateTime<Utc>,
    refresh_at: DateTime<Utc>,
    expiry_deadline: DateTime<Utc>,
}

impl CacheEntry {
    pub fn create(source_url: &str, fetched: FetchedObject, ttl: Duration, policy: FreshnessPolicy) -> CacheEntry {
        CacheEntry::create_at(source_url, fetched, ttl, policy, Utc::now())
    }

    pub fn create_at(
        source_url: &str,
        fetched: FetchedObject,
        ttl: Duration,
        policy: FreshnessPolicy,
        created_at: DateTime<Utc>,
    ) -> CacheEntry {
        let FetchedObject { bytes, metadata } = fetched;
        let mime_type = metadata.mime.essence_str().to_string();
        let encoding = metadata
            .mime
            .get_param(mime::CHARSET)
            .map(|charset| charset.as_str().to_string());

        CacheEntry {
            body: bytes,
            source_url: source_url.to_string(),
            mime_type,
            encoding,
            response: metadata,
            created_at,
            refresh_at: offset(created_at, policy.fresh_for(ttl)),
            expiry_deadline: offset(created_at, ttl),
        }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn response(&self) -> &ResponseMetadata {
        &self.response
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expiry_deadline(&self) -> DateTime<Utc> {
        self.expiry_deadline
    }

    pub fn freshness_state(&self) -> FreshnessState {
        self.freshness_state_at(Utc::now())
    }

    pub fn freshness_state_at(&self, now: DateTime<Utc>) -> FreshnessState {
        if now >= self.expiry_deadline {
            FreshnessState::Stale
        } else if now >= self.refresh_at {
            FreshnessState::RefreshSuggested
        } else {
            FreshnessState::Fresh
        }
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expiry_deadline
            .signed_duration_since(now)
            .to_std()
            .unwrap_or_default()
    }

    pub fn to_fetched(&self) -> FetchedObject {
        FetchedObject {
            bytes: self.body.clone(),
            metadata: self.response.clone(),
        }
    }
}
