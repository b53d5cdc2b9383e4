use std::fmt::{Display, Formatter};

pub mod memory_cache;

#[derive(Debug, PartialEq)]
pub enum CacheError {
    NoCacheEntry,
    LockPoisoned,
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::NoCacheEntry => write!(f, "no cache entry"),
            CacheError::LockPoisoned => write!(f, "cache lock poisoned"),
        }
    }
}

/// URL-keyed store. Implementations decide how entries are kept; uniqueness of
/// keys is theirs to enforce.
pub trait Cachable<T: Clone> {
    fn get(&self, link: &str) -> Result<T, CacheError>;
    fn set(&mut self, link: String, object: T) -> Result<bool, CacheError>;
    fn delete(&mut self, link: &str) -> bool;
    fn count(&self) -> usize;
}
