use crate::jvm::BinaryName;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Bytes of every class synthesized during a weaving session, by name
///
/// Whatever loads the woven classes may ask for a synthesized class a second time (eg. while
/// resolving the dependencies of another class). Those requests are served from here instead of
/// re-deriving the class. The first bytes inserted for a name win.
#[derive(Debug, Default)]
pub struct WeaveCache {
    classes: Mutex<HashMap<BinaryName, Arc<[u8]>>>,
}

impl WeaveCache {
    pub fn new() -> WeaveCache {
        WeaveCache::default()
    }

    fn classes(&self) -> MutexGuard<'_, HashMap<BinaryName, Arc<[u8]>>> {
        // The map is never left half-updated, so a poisoned lock is still usable
        self.classes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bytes of a previously synthesized class
    pub fn get(&self, name: &BinaryName) -> Option<Arc<[u8]>> {
        self.classes().get(name).cloned()
    }

    /// Record the bytes of a synthesized class, returning the bytes now cached under that name
    pub fn insert(&self, name: BinaryName, bytes: Vec<u8>) -> Arc<[u8]> {
        self.classes()
            .entry(name)
            .or_insert_with(|| Arc::from(bytes))
            .clone()
    }

    pub fn contains(&self, name: &BinaryName) -> bool {
        self.classes().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes().is_empty()
    }
}
