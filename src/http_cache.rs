use crate::fetcher::FetchedObject;
use std::time::Duration;

pub mod request_cache_handler;

#[derive(Debug, PartialEq)]
pub enum RequestCacheResult {
    /// Cacheable, upstream gave no lifetime.
    ServeCache,
    IfNotExpired(Duration),
    NoCache,
}

pub trait HttpCacheHandler {
    fn should_cache(&self, link: &str, fetched_object: &FetchedObject) -> RequestCacheResult;
}
