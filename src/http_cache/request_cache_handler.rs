use crate::config::{domain_matches, OverriddenCache};
use crate::fetcher::FetchedObject;
use crate::http_cache::{HttpCacheHandler, RequestCacheResult};
use actix_web::http::header;
use cache_control::CacheControl;
use std::time::Duration;
use url::Url;

/// `cache_control` has exposed `max_age` both as a chrono and a std duration.
trait ToStdDuration {
    fn to_std_duration(&self) -> Duration;
}

impl ToStdDuration for Duration {
    fn to_std_duration(&self) -> Duration {
        *self
    }
}

impl ToStdDuration for chrono::Duration {
    fn to_std_duration(&self) -> Duration {
        self.to_std().unwrap_or_default()
    }
}

/// Reads `Cache-Control` from the fetched response, or from the configured
/// override when the link's host has one.
pub struct RequestCacheHandler {
    overridden_cache: Vec<OverriddenCache>,
}

impl RequestCacheHandler {
    pub fn new(overridden_cache: Vec<OverriddenCache>) -> RequestCacheHandler {
        RequestCacheHandler { overridden_cache }
    }

    fn overridden_value(&self, link: &str) -> Option<&str> {
        let url = Url::parse(link).ok()?;
        let host = url.host_str()?;
        self.overridden_cache
            .iter()
            .find(|overridden| domain_matches(host, &overridden.domain))
            .map(|overridden| overridden.cache.as_str())
    }
}

impl HttpCacheHandler for RequestCacheHandler {
    fn should_cache(&self, link: &str, fetched_object: &FetchedObject) -> RequestCacheResult {
        let cache_header = match self.overridden_value(link) {
            Some(value) => Some(value),
            None => fetched_object
                .metadata
                .header(header::CACHE_CONTROL.as_str())
                .map(|value| value.as_str()),
        };

        if let Some(cache_header) = cache_header {
            let control = CacheControl::from_value(cache_header).unwrap_or_default();
            if control.no_store {
                return RequestCacheResult::NoCache;
            }
            if let Some(duration) = control.max_age {
                let duration = duration.to_std_duration();
                if duration.is_zero() {
                    return RequestCacheResult::NoCache;
                }
                return RequestCacheResult::IfNotExpired(duration);
            }
        }
        RequestCacheResult::ServeCache
    }
}
