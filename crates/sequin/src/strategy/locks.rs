use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

/// Lazily created async mutex per business type.
///
/// Handles are created on first use and only dropped by [`KeyedLocks::remove`].
/// A caller still holding a removed handle finishes normally; the next caller
/// gets a fresh one.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    handles: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(key) {
            return Arc::clone(handle);
        }
        let handle = Arc::new(AsyncMutex::new(()));
        handles.insert(key.to_owned(), Arc::clone(&handle));
        handle
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        self.handles.lock().remove(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.lock().len()
    }
}
