//! In-memory store of query results keyed by query identity.
//!
//! One map behind a process-wide lock. Each read, write and remove is
//! atomic at call granularity; no transaction spans calls. Subscribers
//! receive change events over unbounded channels and unsubscribe by
//! dropping the receiver.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::keys::{QueryKey, ResourceKind, Tag};

/// Notification delivered to subscribers of a key.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
  /// The entry's observable state changed.
  Updated { key: QueryKey, version: u64 },
  /// The entry was removed from the store.
  Removed { key: QueryKey },
}

/// Stream of change events for one query key.
///
/// Dropping the subscription unsubscribes: senders whose receiver has
/// gone away are pruned on the next notification.
pub struct Subscription {
  receiver: mpsc::UnboundedReceiver<CacheEvent>,
}

impl Subscription {
  /// Wait for the next change event.
  pub async fn next(&mut self) -> Option<CacheEvent> {
    self.receiver.recv().await
  }

  /// Drain one pending event without waiting.
  pub fn try_next(&mut self) -> Option<CacheEvent> {
    self.receiver.try_recv().ok()
  }
}

#[derive(Default)]
struct Inner {
  entries: HashMap<QueryKey, CacheEntry>,
  subscribers: HashMap<QueryKey, Vec<mpsc::UnboundedSender<CacheEvent>>>,
}

impl Inner {
  fn notify(&mut self, key: &QueryKey, event: CacheEvent) {
    if let Some(senders) = self.subscribers.get_mut(key) {
      // Send errors mean the receiver was dropped; prune those senders.
      senders.retain(|tx| tx.send(event.clone()).is_ok());
      if senders.is_empty() {
        self.subscribers.remove(key);
      }
    }
  }
}

/// Shared in-memory cache, cheap to clone.
#[derive(Clone, Default)]
pub struct CacheStore {
  inner: Arc<RwLock<Inner>>,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn read_lock(&self) -> RwLockReadGuard<'_, Inner> {
    match self.inner.read() {
      Ok(guard) => guard,
      Err(poisoned) => {
        warn!("Recovered from poisoned cache lock");
        poisoned.into_inner()
      }
    }
  }

  fn write_lock(&self) -> RwLockWriteGuard<'_, Inner> {
    match self.inner.write() {
      Ok(guard) => guard,
      Err(poisoned) => {
        warn!("Recovered from poisoned cache lock");
        poisoned.into_inner()
      }
    }
  }

  /// Point-in-time snapshot of the entry at `key`.
  pub fn read(&self, key: &QueryKey) -> Option<CacheEntry> {
    self.read_lock().entries.get(key).cloned()
  }

  /// Atomically replace the entry at `key` through `updater`.
  ///
  /// The updater receives the current entry, or an empty one if the key
  /// is absent. When it fails nothing is written and the error
  /// propagates. When it succeeds the stored version advances past the
  /// previous one and subscribers are notified only if the observable
  /// state changed.
  pub fn write<F>(&self, key: &QueryKey, updater: F) -> Result<CacheEntry>
  where
    F: FnOnce(&CacheEntry) -> Result<CacheEntry>,
  {
    let mut inner = self.write_lock();
    let current = inner.entries.get(key).cloned().unwrap_or_default();
    let mut next = updater(&current)?;
    next.version = current.version + 1;

    let changed = !next.same_observable(&current);
    inner.entries.insert(key.clone(), next.clone());
    debug!(key = %key.description(), version = next.version, changed, "Cache write");

    if changed {
      inner.notify(
        key,
        CacheEvent::Updated {
          key: key.clone(),
          version: next.version,
        },
      );
    }
    Ok(next)
  }

  /// Remove the entry at `key`. Subscribers are notified only when
  /// something was actually removed.
  pub fn remove(&self, key: &QueryKey) {
    let mut inner = self.write_lock();
    if inner.entries.remove(key).is_some() {
      debug!(key = %key.description(), "Cache remove");
      inner.notify(key, CacheEvent::Removed { key: key.clone() });
    }
  }

  /// Flip the stale flag on an existing entry. Absent keys are left
  /// alone: staleness of something never fetched means nothing.
  pub fn mark_stale(&self, key: &QueryKey) {
    let mut inner = self.write_lock();
    let version = match inner.entries.get_mut(key) {
      Some(entry) => {
        entry.version += 1;
        if entry.stale {
          return;
        }
        entry.stale = true;
        entry.version
      }
      None => return,
    };
    debug!(key = %key.description(), "Marked stale");
    inner.notify(key, CacheEvent::Updated {
      key: key.clone(),
      version,
    });
  }

  /// Keys currently held for `kind`, as a point-in-time snapshot.
  /// Entries created after the snapshot are not part of it.
  pub fn keys_of_kind(&self, kind: ResourceKind) -> Vec<QueryKey> {
    self
      .read_lock()
      .entries
      .keys()
      .filter(|key| key.kind() == kind)
      .cloned()
      .collect()
  }

  /// Keys of entries whose tag set contains `tag`, as a point-in-time
  /// snapshot. This is the membership scan behind invalidation: a kind
  /// tag selects a whole family, an entity tag selects the entries that
  /// contain one specific item.
  pub fn entries_tagged(&self, tag: &Tag) -> Vec<QueryKey> {
    self
      .read_lock()
      .entries
      .iter()
      .filter(|(_, entry)| entry.tags.contains(tag))
      .map(|(key, _)| key.clone())
      .collect()
  }

  /// Subscribe to change events for `key`. Subscribing to a key that has
  /// no entry yet is allowed; events start once something writes it.
  pub fn subscribe(&self, key: &QueryKey) -> Subscription {
    let (tx, rx) = mpsc::unbounded_channel();
    self
      .write_lock()
      .subscribers
      .entry(key.clone())
      .or_default()
      .push(tx);
    Subscription { receiver: rx }
  }

  pub fn len(&self) -> usize {
    self.read_lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
