use async_trait::async_trait;
use bytes::Bytes;
use mime::Mime;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

pub mod http_fetcher;

#[derive(Debug)]
pub enum FetchError {
    NotFound,
    NoAccess,
    Timeout,
    FetchFailed(String),
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::NotFound => write!(f, "resource not found"),
            FetchError::NoAccess => write!(f, "access to resource denied"),
            FetchError::Timeout => write!(f, "fetch timed out"),
            FetchError::FetchFailed(reason) => write!(f, "fetch failed: {}", reason),
        }
    }
}

/// Transport used by the gate for synchronous fetches and background refreshes.
///
/// `cached` is the object currently held for `link`, if any. Implementations may
/// use it to revalidate and hand it back unchanged when upstream reports no change.
#[async_trait]
pub trait Fetchable {
    fn can_fetch(&self, link: &str) -> bool;
    async fn fetch(&self, link: &str, cached: Option<&FetchedObject>) -> Result<FetchedObject, FetchError>;
}

/// Protocol-level snapshot of a response, taken when it was received.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMetadata {
    pub status: u16,
    /// Lowercase name to every value received for it, in arrival order.
    pub headers: HashMap<String, Vec<String>>,
    pub mime: Mime,
}

impl ResponseMetadata {
    pub fn header(&self, name: &str) -> Option<&String> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
    }

    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn append_header(&mut self, name: &str, value: &str) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_insert_with(Vec::new)
            .push(value.to_string());
    }
}

impl Default for ResponseMetadata {
    fn default() -> Self {
        ResponseMetadata {
            status: 200,
            headers: HashMap::new(),
            mime: mime::APPLICATION_OCTET_STREAM,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchedObject {
    pub bytes: Bytes,
    pub metadata: ResponseMetadata,
}
