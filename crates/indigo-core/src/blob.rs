//! Content-addressed BLOB cache (C3).
//!
//! Entries are keyed by the owning item's identity (`device`/`property`/
//! `item`) and allocated a monotonically increasing `u64` handle the first
//! time the item registers a BLOB. The handle, not the identity triple, is
//! what appears in `/blob/<handle>.<ext>` URLs — it replaces the original
//! system's address-of-item convention with something that survives
//! serialization and is stable across a process's lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;

pub type BlobKey = (String, String, String);

/// Supplies the bytes for a BLOB entry on first access. Registered by the
/// owning device when it defines the BLOB item; invoked at most once per
/// entry unless the entry is explicitly invalidated.
pub trait BlobProducer: Send + Sync {
    fn populate(&self) -> Vec<u8>;
}

struct EntryState {
    format: String,
    content: Option<Vec<u8>>,
    producer: Option<Arc<dyn BlobProducer>>,
}

pub struct BlobEntry {
    pub handle: u64,
    state: Mutex<EntryState>,
}

impl BlobEntry {
    /// Returns the entry's content, populating it via the registered
    /// producer on first access. Concurrent callers serialize on this
    /// entry's own mutex, so the producer runs exactly once even under a
    /// populate race.
    pub fn content(&self) -> (String, Vec<u8>) {
        let mut state = self.state.lock().expect("blob entry mutex poisoned");
        if state.content.is_none() {
            let bytes = state.producer.as_ref().map(|p| p.populate()).unwrap_or_default();
            state.content = Some(bytes);
        }
        (state.format.clone(), state.content.clone().unwrap_or_default())
    }

    pub fn format(&self) -> String {
        self.state.lock().expect("blob entry mutex poisoned").format.clone()
    }

    /// Replaces an entry's content directly, e.g. after an HTTP PUT upload.
    pub fn set_content(&self, format: String, bytes: Vec<u8>) {
        let mut state = self.state.lock().expect("blob entry mutex poisoned");
        state.format = format;
        state.content = Some(bytes);
    }

    /// Drops cached content so the next `content()` call re-invokes the
    /// producer.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().expect("blob entry mutex poisoned");
        state.content = None;
    }
}

#[derive(Default)]
pub struct BlobCache {
    entries: RwLock<IndexMap<BlobKey, Arc<BlobEntry>>>,
    by_handle: RwLock<IndexMap<u64, Arc<BlobEntry>>>,
    next_handle: AtomicU64,
}

impl BlobCache {
    pub fn new() -> BlobCache {
        BlobCache::default()
    }

    /// Registers (or re-registers) the BLOB-producing item identified by
    /// `key`, returning the stable handle clients should address it by.
    pub fn register(
        &self,
        key: BlobKey,
        format: String,
        producer: Option<Arc<dyn BlobProducer>>,
    ) -> u64 {
        let mut entries = self.entries.write().expect("blob cache lock poisoned");
        if let Some(existing) = entries.get(&key) {
            return existing.handle;
        }
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = Arc::new(BlobEntry {
            handle,
            state: Mutex::new(EntryState {
                format,
                content: None,
                producer,
            }),
        });
        entries.insert(key, entry.clone());
        self.by_handle
            .write()
            .expect("blob cache lock poisoned")
            .insert(handle, entry);
        handle
    }

    pub fn get_by_key(&self, key: &BlobKey) -> Option<Arc<BlobEntry>> {
        self.entries.read().expect("blob cache lock poisoned").get(key).cloned()
    }

    pub fn get(&self, handle: u64) -> Option<Arc<BlobEntry>> {
        self.by_handle.read().expect("blob cache lock poisoned").get(&handle).cloned()
    }

    /// Removes every entry owned by `device`, called when a device detaches.
    pub fn remove_device(&self, device: &str) {
        let mut entries = self.entries.write().expect("blob cache lock poisoned");
        let mut by_handle = self.by_handle.write().expect("blob cache lock poisoned");
        entries.retain(|(dev, _, _), entry| {
            if dev == device {
                by_handle.shift_remove(&entry.handle);
                false
            } else {
                true
            }
        });
    }
}
