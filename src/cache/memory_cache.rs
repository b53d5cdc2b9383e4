use std::collections::HashMap;

use super::{Cachable, CacheError};

pub struct MemoryCache<T: Clone> {
    objects: HashMap<String, T>
}

impl<T: Clone> MemoryCache<T> {
    pub fn new() -> MemoryCache<T> {
        MemoryCache {
            objects: HashMap::new()
        }
    }
}

impl<T: Clone> Default for MemoryCache<T> {
    fn default() -> Self {
        MemoryCache::new()
    }
}

impl<T: Clone> Cachable<T> for MemoryCache<T> {
    fn get(&self, link: &str) -> Result<T, CacheError> {
        match self.objects.get(link) {
            Some(object) => Ok(object.clone()),
            None => Err(CacheError::NoCacheEntry),
        }
    }

    fn set(&mut self, link: String, object: T) -> Result<bool, CacheError> {
        self.objects.insert(link, object);
        Ok(true)
    }

    fn delete(&mut self, link: &str) -> bool {
        self.objects.remove(link).is_some()
    }

    fn count(&self) -> usize {
        self.objects.len()
    }
}
