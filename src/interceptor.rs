use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::config::domain_matches;
use crate::fetcher::FetchError;
use crate::gate::{CacheGate, Served};

/// Hook registered in front of the transport. The first interceptor that
/// accepts a link handles it.
#[async_trait]
pub trait Interceptor {
    fn can_intercept(&self, link: &str) -> bool;
    async fn intercept(&self, link: &str) -> Result<Served, FetchError>;
}

pub struct InterceptorProvider {
    interceptors: Vec<Arc<dyn Interceptor + Sync + Send>>
}

impl InterceptorProvider {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor + Sync + Send>>) -> InterceptorProvider {
        InterceptorProvider {
            interceptors
        }
    }

    pub fn get(&self, link: &str) -> Option<Arc<dyn Interceptor + Sync + Send>> {
        for interceptor in self.interceptors.iter() {
            if interceptor.can_intercept(link) {
                return Some(interceptor.clone());
            }
        }
        None
    }
}

/// Routes allowed hosts through a [`CacheGate`]. An empty `allow_from`
/// accepts every host.
pub struct CachingInterceptor {
    gate: CacheGate,
    allow_from: Vec<String>,
}

impl CachingInterceptor {
    pub fn new(gate: CacheGate, allow_from: Vec<String>) -> CachingInterceptor {
        CachingInterceptor { gate, allow_from }
    }

    fn is_allowed(&self, url: &Url) -> bool {
        if self.allow_from.is_empty() {
            return true;
        }
        match url.host_str() {
            Some(host) => self.allow_from.iter().any(|domain| domain_matches(host, domain)),
            None => false,
        }
    }
}

#[async_trait]
impl Interceptor for CachingInterceptor {
    fn can_intercept(&self, link: &str) -> bool {
        match Url::parse(link) {
            Ok(url) => self.is_allowed(&url) && self.gate.can_fetch(link),
            Err(_) => false,
        }
    }

    async fn intercept(&self, link: &str) -> Result<Served, FetchError> {
        self.gate.handle(link).await
    }
}
