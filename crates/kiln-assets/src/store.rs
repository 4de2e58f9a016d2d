//! Path-keyed asset store with at-most-once load semantics
//!
//! The store owns every loaded record. Each key is in one of two states:
//! `Pending` while its single loader runs, collecting the callbacks of every
//! requester, or `Ready` with a slot holding the finished record. Deciding
//! whether a request starts a load and inserting the pending entry happen
//! under the same lock, so concurrent requests for a new key start exactly
//! one load.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_core::panic_message;
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::AssetError;
use crate::handle::AssetHandle;

/// A finished asset handed to a requester.
pub struct Loaded<T> {
    /// Long-lived reference into the store.
    pub handle: AssetHandle<T>,
    /// The record itself, for immediate use.
    pub record: Arc<T>,
}

impl<T> Clone for Loaded<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            record: Arc::clone(&self.record),
        }
    }
}

impl<T> std::fmt::Debug for Loaded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loaded")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// What every request eventually receives, exactly once.
pub type LoadResult<T> = Result<Loaded<T>, AssetError>;

/// Completion callback for a request.
pub type Callback<T> = Box<dyn FnOnce(LoadResult<T>) + Send + 'static>;

/// What the caller of [`AssetStore::request`] has to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The asset was ready; the callback has already run.
    Ready,
    /// A load is in flight; the callback will run when it finishes.
    Joined,
    /// This request created the pending entry and must start the load.
    Start,
}

enum Entry<T> {
    Pending(Vec<Callback<T>>),
    Ready(AssetHandle<T>),
}

struct Slot<T> {
    generation: u32,
    record: Option<Arc<T>>,
}

struct Inner<T> {
    entries: HashMap<PathBuf, Entry<T>>,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Inner<T> {
    fn allocate(&mut self, record: Arc<T>) -> AssetHandle<T> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            AssetHandle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                record: Some(record),
            });
            AssetHandle::new(index, 0)
        }
    }

    fn resolve(&self, handle: AssetHandle<T>) -> Option<Arc<T>> {
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.record.clone()
    }
}

/// Owns loaded records of one type, keyed by canonical path.
pub struct AssetStore<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Send + Sync + 'static> AssetStore<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Register interest in `key`.
    ///
    /// If the asset is ready, `on_ready` runs on the calling thread before this
    /// returns. Otherwise it is queued until the load completes. Only the
    /// request that gets [`Claim::Start`] may schedule a loader.
    pub fn request(&self, key: &Path, on_ready: Callback<T>) -> Claim {
        let (handle, record) = {
            let mut inner = self.inner.lock();
            let Inner { entries, slots, .. } = &mut *inner;

            match entries.entry(key.to_path_buf()) {
                MapEntry::Occupied(mut occupied) => match occupied.get_mut() {
                    Entry::Pending(waiters) => {
                        waiters.push(on_ready);
                        return Claim::Joined;
                    }
                    Entry::Ready(handle) => {
                        let handle = *handle;
                        (handle, slots[handle.index() as usize].record.clone())
                    }
                },
                MapEntry::Vacant(vacant) => {
                    vacant.insert(Entry::Pending(vec![on_ready]));
                    return Claim::Start;
                }
            }
        };

        match record {
            Some(record) => on_ready(Ok(Loaded { handle, record })),
            None => on_ready(Err(AssetError::NotLoaded(key.to_path_buf()))),
        }
        Claim::Ready
    }

    /// Finish the load for `key` and notify every waiting requester.
    ///
    /// On success the record moves into a slot and the key becomes ready. On
    /// failure the key is removed so a later request can try again. Callbacks
    /// run on the calling thread after the lock is released; a panicking
    /// callback is logged and does not stop the others.
    pub fn complete(&self, key: &Path, result: Result<T, AssetError>) -> usize {
        let mut inner = self.inner.lock();

        let waiters = match inner.entries.remove(key) {
            Some(Entry::Pending(waiters)) => waiters,
            Some(Entry::Ready(handle)) => {
                // Not reachable through `request`; keep the existing record.
                warn!("Load finished for already-ready asset {:?}", key);
                inner.entries.insert(key.to_path_buf(), Entry::Ready(handle));
                return 0;
            }
            None => Vec::new(),
        };

        let outcome = match result {
            Ok(record) => {
                let record = Arc::new(record);
                let handle = inner.allocate(Arc::clone(&record));
                inner.entries.insert(key.to_path_buf(), Entry::Ready(handle));
                Ok(Loaded { handle, record })
            }
            Err(e) => Err(e),
        };
        drop(inner);

        let count = waiters.len();
        for waiter in waiters {
            let delivery = outcome.clone();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || waiter(delivery))) {
                error!(
                    "Completion callback for {:?} panicked: {}",
                    key,
                    panic_message(payload.as_ref())
                );
            }
        }
        count
    }

    /// Handle to a ready asset.
    pub fn get(&self, key: &Path) -> Option<AssetHandle<T>> {
        match self.inner.lock().entries.get(key) {
            Some(Entry::Ready(handle)) => Some(*handle),
            _ => None,
        }
    }

    /// Record behind a handle, if the handle is still current.
    pub fn resolve(&self, handle: AssetHandle<T>) -> Option<Arc<T>> {
        self.inner.lock().resolve(handle)
    }

    /// Record for a ready key.
    pub fn get_record(&self, key: &Path) -> Option<Arc<T>> {
        let inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(Entry::Ready(handle)) => inner.resolve(*handle),
            _ => None,
        }
    }

    /// Whether a load for `key` is in flight.
    pub fn is_pending(&self, key: &Path) -> bool {
        matches!(self.inner.lock().entries.get(key), Some(Entry::Pending(_)))
    }

    /// Drop a ready asset. Outstanding handles to it stop resolving; records
    /// already handed out stay valid for their holders. Pending keys are left
    /// alone.
    pub fn evict(&self, key: &Path) -> bool {
        let mut inner = self.inner.lock();
        let handle = match inner.entries.get(key) {
            Some(Entry::Ready(handle)) => *handle,
            _ => return false,
        };
        inner.entries.remove(key);

        let index = handle.index();
        let slot = &mut inner.slots[index as usize];
        slot.record = None;
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(index);
        true
    }

    /// Number of ready assets.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| matches!(e, Entry::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of all ready assets, sorted.
    pub fn loaded_keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Ready(_)))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl<T: Send + Sync + 'static> Default for AssetStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
