//! The in-memory whitelist. One coarse lock around one map.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use crate::entry::WhitelistEntry;
use crate::error::{WhitelistError, WhitelistResult};
use crate::steam_id::SteamId;

/// Keys are compared case-insensitively, so we store them lowercased.
pub(crate) fn key_of(id: &str) -> String {
    id.to_lowercase()
}

/// One page of `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub entries: Vec<WhitelistEntry>,
    /// 1-based, already clamped.
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Inner {
    /// Lowercased id -> entry. The BTreeMap keeps things sorted for `list`, `search` and export.
    pub(crate) entries: BTreeMap<String, WhitelistEntry>,
    /// In-memory state differs from what was last persisted.
    pub(crate) dirty: bool,
}

impl Inner {
    /// Expired entries don't block a fresh add, they are simply replaced.
    pub(crate) fn insert(
        &mut self,
        id: &SteamId,
        expiration: Option<DateTime<Utc>>,
        added_by: &str,
        now: DateTime<Utc>,
    ) -> WhitelistResult<()> {
        let key = key_of(id.as_str());
        if let Some(existing) = self.entries.get(&key) {
            if !existing.is_expired_at(now) {
                return Err(WhitelistError::AlreadyWhitelisted(existing.player_id.clone()));
            }
        }
        self.entries.insert(key, WhitelistEntry::new(id.as_str(), expiration, added_by, now));
        self.dirty = true;
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &SteamId) -> WhitelistResult<WhitelistEntry> {
        match self.entries.remove(&key_of(id.as_str())) {
            Some(entry) => {
                self.dirty = true;
                Ok(entry)
            }
            None => Err(WhitelistError::NotFound(id.to_string())),
        }
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(&key_of(id))
    }
}

/// The authoritative whitelist. Share it around as `Arc<WhitelistStore>`.
#[derive(Debug, Default)]
pub struct WhitelistStore {
    inner: Mutex<Inner>,
}

impl WhitelistStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a clean (not dirty) store, e.g. from a freshly loaded document.
    pub fn from_entries(entries: impl IntoIterator<Item = WhitelistEntry>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: entries.into_iter()
                    .map(|e| (key_of(&e.player_id), e))
                    .collect(),
                dirty: false,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    pub fn is_whitelisted(&self, id: &str) -> bool {
        self.is_whitelisted_at(id, Utc::now())
    }

    /// Membership check. Expired entries found along the way are evicted right here,
    /// so an overdue sweep never lets anyone in.
    pub fn is_whitelisted_at(&self, id: &str, now: DateTime<Utc>) -> bool {
        let key = key_of(id);
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(&key) {
            None => return false,
            Some(entry) => entry.is_expired_at(now),
        };

        if expired {
            if let Some(entry) = inner.entries.remove(&key) {
                debug!("Entry for {} expired at {:?}, evicted on lookup.", entry.player_id, entry.expiration);
            }
            inner.dirty = true;
        }
        !expired
    }

    pub fn add(&self, id: &SteamId, expiration: Option<DateTime<Utc>>, added_by: &str) -> WhitelistResult<()> {
        self.add_at(id, expiration, added_by, Utc::now())
    }

    pub fn add_at(
        &self,
        id: &SteamId,
        expiration: Option<DateTime<Utc>>,
        added_by: &str,
        now: DateTime<Utc>,
    ) -> WhitelistResult<()> {
        self.inner.lock().insert(id, expiration, added_by, now)
    }

    /// Returns the removed entry.
    pub fn remove(&self, id: &SteamId) -> WhitelistResult<WhitelistEntry> {
        self.inner.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<WhitelistEntry> {
        self.inner.lock().entries.get(&key_of(id)).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains(id)
    }

    /// Returns how many entries there were.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.entries.len();
        inner.entries.clear();
        inner.dirty = true;
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `page` is 1-based and clamped into the valid range, so asking for page 99 of 3 gives page 3.
    pub fn list(&self, page: usize, page_size: usize) -> Page {
        let page_size = page_size.max(1);
        let inner = self.inner.lock();
        let total = inner.entries.len();
        let total_pages = std::cmp::max(1, total.div_ceil(page_size));
        let page = page.clamp(1, total_pages);

        let entries = inner.entries.values()
            .skip((page - 1) * page_size)
            .take(page_size)
            .cloned()
            .collect();

        Page { entries, page, total_pages, total }
    }

    /// Case-insensitive substring match over player ids, ascending.
    pub fn search(&self, needle: &str) -> Vec<WhitelistEntry> {
        let needle = needle.to_lowercase();
        let inner = self.inner.lock();
        inner.entries.iter()
            .filter(|(key, _)| key.contains(&needle))
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// All player ids, ascending.
    pub fn ids(&self) -> Vec<String> {
        let inner = self.inner.lock();
        inner.entries.values().map(|e| e.player_id.clone()).collect()
    }

    /// Removes and returns every entry with `expiration <= now`.
    pub fn drain_expired_at(&self, now: DateTime<Utc>) -> Vec<WhitelistEntry> {
        let mut inner = self.inner.lock();
        let expired_keys: Vec<String> = inner.entries.iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();

        let expired: Vec<WhitelistEntry> = expired_keys.iter()
            .filter_map(|k| inner.entries.remove(k))
            .collect();
        if !expired.is_empty() {
            inner.dirty = true;
        }
        expired
    }

    /// Swaps the whole content, dirty flag included, e.g. on reload.
    pub fn replace_all(&self, other: WhitelistStore) {
        let other = other.inner.into_inner();
        let mut inner = self.inner.lock();
        inner.entries = other.entries;
        inner.dirty = other.dirty;
    }

    pub fn snapshot(&self) -> BTreeMap<String, WhitelistEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    pub fn mark_dirty(&self) {
        self.inner.lock().dirty = true;
    }

    /// Clears the dirty flag and hands out the content to be persisted.
    /// Whoever takes it must call `mark_dirty` again if persisting fails.
    pub fn take_snapshot(&self) -> BTreeMap<String, WhitelistEntry> {
        let mut inner = self.inner.lock();
        inner.dirty = false;
        inner.entries.clone()
    }

    /// Like `take_snapshot`, but only if there is anything new to persist.
    pub fn take_dirty_snapshot(&self) -> Option<BTreeMap<String, WhitelistEntry>> {
        let mut inner = self.inner.lock();
        if inner.dirty {
            inner.dirty = false;
            Some(inner.entries.clone())
        } else {
            None
        }
    }
}
