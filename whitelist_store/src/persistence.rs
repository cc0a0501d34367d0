//! Getting the whitelist into and out of the host's data files.
//!
//! The current document is a JSON object `id -> entry`. Older versions of the plugin wrote a
//! bare JSON array of ids instead; such documents are migrated on first load.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::entry::WhitelistEntry;
use crate::error::PersistenceError;
use crate::schedule::{self, ScheduledTask};
use crate::store::WhitelistStore;

pub const LEGACY_ADDED_BY: &str = "Legacy Import";

/// Named text documents. Think of the host's data file system.
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// `Ok(None)` if there is no such document.
    fn read(&self, name: &str) -> Result<Option<String>, PersistenceError>;
    fn write(&self, name: &str, contents: &str) -> Result<(), PersistenceError>;
}

/// Documents as plain files inside one directory.
#[derive(Debug, Clone)]
pub struct DataFiles {
    dir: PathBuf,
}

impl DataFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Document names are file names, nothing that could walk out of `dir`.
    fn path_of(&self, name: &str) -> Result<PathBuf, PersistenceError> {
        if name.is_empty() || name.contains(&['/', '\\'][..]) || name == "." || name == ".." {
            return Err(PersistenceError::new(name, "not a valid document name"));
        }
        Ok(self.dir.join(name))
    }
}

impl DocumentStore for DataFiles {
    fn read(&self, name: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_of(name)?;
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::new(name, e)),
        }
    }

    fn write(&self, name: &str, contents: &str) -> Result<(), PersistenceError> {
        let path = self.path_of(name)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| PersistenceError::new(name, e))?;

        // write next to it first, so a crash mid-write doesn't eat the old file.
        let tmp = self.dir.join(format!(".{}.tmp", name));
        std::fs::write(&tmp, contents).map_err(|e| PersistenceError::new(name, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| PersistenceError::new(name, e))
    }
}

/// Keeps documents in memory. Used by tests, and handy when nothing should touch the disk.
#[derive(Debug, Default)]
pub struct MemoryDocuments {
    docs: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, contents: impl Into<String>) {
        self.docs.lock().insert(name.into(), contents.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.docs.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.docs.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Makes every following read fail, until turned off again.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every following write fail, until turned off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl DocumentStore for MemoryDocuments {
    fn read(&self, name: &str) -> Result<Option<String>, PersistenceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PersistenceError::new(name, "simulated read failure"));
        }
        Ok(self.get(name))
    }

    fn write(&self, name: &str, contents: &str) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::new(name, "simulated write failure"));
        }
        self.insert(name, contents);
        Ok(())
    }
}

/// Whatever shape the document on disk turns out to have.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Document {
    Current(BTreeMap<String, WhitelistEntry>),
    Legacy(Vec<String>),
}

/// Loads and saves one `WhitelistStore` under a fixed document name.
#[derive(Debug, Clone)]
pub struct Persistence {
    docs: Arc<dyn DocumentStore>,
    name: String,
}

impl Persistence {
    pub fn new(docs: Arc<dyn DocumentStore>, name: impl Into<String>) -> Self {
        Self {
            docs,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.docs
    }

    pub fn load(&self) -> WhitelistStore {
        self.load_at(Utc::now())
    }

    /// Never fails: anything unreadable is logged and we start out empty, the server must still come up.
    /// Only meant for startup, when there is no whitelist in memory yet that could be lost.
    pub fn load_at(&self, now: DateTime<Utc>) -> WhitelistStore {
        match self.try_load_at(now) {
            Ok(store) => store,
            Err(err) => {
                error!("Failed to load whitelist data, starting with an empty whitelist: {}", err);
                WhitelistStore::new()
            }
        }
    }

    pub fn try_load(&self) -> Result<WhitelistStore, PersistenceError> {
        self.try_load_at(Utc::now())
    }

    /// A missing or empty document is an empty whitelist. A document that can't be read or
    /// parsed is an error.
    pub fn try_load_at(&self, now: DateTime<Utc>) -> Result<WhitelistStore, PersistenceError> {
        let text = match self.docs.read(&self.name)? {
            Some(text) => text,
            None => {
                info!("No whitelist data found at '{}', starting with an empty whitelist.", self.name);
                return Ok(WhitelistStore::new());
            }
        };

        match serde_json::from_str::<Document>(&text) {
            Ok(Document::Current(entries)) if !entries.is_empty() => {
                info!("Loaded {} whitelist entries from '{}'.", entries.len(), self.name);
                Ok(WhitelistStore::from_entries(entries.into_values()))
            }
            Ok(Document::Legacy(ids)) if !ids.is_empty() => Ok(self.migrate_legacy(ids, now)),
            Ok(_) => {
                info!("Whitelist data at '{}' is empty.", self.name);
                Ok(WhitelistStore::new())
            }
            Err(err) => Err(PersistenceError::new(
                &self.name,
                format!("neither the current nor the legacy whitelist format ({})", err),
            )),
        }
    }

    /// One-time conversion from a flat id list to full entries, saved right away.
    fn migrate_legacy(&self, ids: Vec<String>, now: DateTime<Utc>) -> WhitelistStore {
        let n = ids.len();
        let store = WhitelistStore::from_entries(
            ids.into_iter()
                .map(|id| id.trim().to_owned())
                .filter(|id| !id.is_empty())
                .map(|id| WhitelistEntry::new(id, None, LEGACY_ADDED_BY, now)),
        );
        info!("Migrating {} legacy whitelist ids from '{}' to the current format.", n, self.name);

        if let Err(err) = self.save(&store) {
            error!("Migrated legacy whitelist, but could not save it yet, will retry: {}", err);
        }
        store
    }

    /// Writes the full mapping and clears the dirty flag. On failure the flag is set again,
    /// so the next flush retries.
    pub fn save(&self, store: &WhitelistStore) -> Result<(), PersistenceError> {
        let snapshot = store.take_snapshot();
        self.write_snapshot(store, &snapshot)
    }

    /// Saves only if something changed since the last save. `Ok(true)` if we wrote.
    pub fn flush(&self, store: &WhitelistStore) -> Result<bool, PersistenceError> {
        match store.take_dirty_snapshot() {
            Some(snapshot) => {
                self.write_snapshot(store, &snapshot)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Flushes once per `period` until the returned task is dropped or cancelled.
    /// Failures are logged by `flush` and retried on the next tick.
    pub fn spawn_flusher(&self, store: Arc<WhitelistStore>, period: Duration) -> ScheduledTask {
        let persistence = self.clone();
        schedule::every("whitelist flush", period, move || {
            let persistence = persistence.clone();
            let store = store.clone();
            async move {
                let _ = persistence.flush(&store);
            }
        })
    }

    fn write_snapshot(
        &self,
        store: &WhitelistStore,
        snapshot: &BTreeMap<String, WhitelistEntry>,
    ) -> Result<(), PersistenceError> {
        let result = serde_json::to_string_pretty(snapshot)
            .map_err(|e| PersistenceError::new(&self.name, e))
            .and_then(|text| self.docs.write(&self.name, &text));

        match &result {
            Ok(()) => trace!("Saved {} whitelist entries to '{}'.", snapshot.len(), self.name),
            Err(err) => {
                store.mark_dirty();
                error!("Failed to save whitelist: {}", err);
            }
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::steam_id::SteamId;
    use chrono::{Duration, TimeZone};
    use maplit::btreemap;

    const DOC: &str = "WhitelistManager.json";

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryDocuments>, Persistence) {
        let docs = Arc::new(MemoryDocuments::new());
        let persistence = Persistence::new(docs.clone(), DOC);
        (docs, persistence)
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_docs, persistence) = setup();
        let store = WhitelistStore::new();
        let a = SteamId::parse("76561198000000001").unwrap();
        let b = SteamId::parse("76561198000000002").unwrap();
        store.add_at(&a, None, "Console (server)", t(0)).unwrap();
        store.add_at(&b, Some(t(3600)), "Admin (76561198000000009)", t(5)).unwrap();

        persistence.save(&store).unwrap();
        assert!(!store.is_dirty());

        let loaded = persistence.load_at(t(10));
        assert_eq!(loaded.snapshot(), store.snapshot());
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn legacy_list_gets_migrated_once() {
        let (docs, persistence) = setup();
        docs.insert(DOC, r#"["a","b"]"#);

        let store = persistence.load_at(t(0));
        let a = store.get("a").unwrap();
        assert_eq!(a.expiration, None);
        assert_eq!(a.added_by, LEGACY_ADDED_BY);
        assert_eq!(a.added_at, t(0));
        assert!(store.contains("b"));
        assert_eq!(store.len(), 2);

        // now in the current format
        let text = docs.get(DOC).unwrap();
        assert!(text.trim_start().starts_with('{'));

        let again = persistence.load_at(t(100));
        assert_eq!(again.snapshot(), store.snapshot());
        assert_eq!(docs.get(DOC).unwrap(), text);
    }

    #[test]
    fn current_document_with_expiry() {
        let (docs, persistence) = setup();
        let doc = btreemap! {
            "76561198000000001".to_string() => WhitelistEntry::new("76561198000000001", Some(t(60)), "Console", t(0)),
        };
        docs.insert(DOC, serde_json::to_string(&doc).unwrap());

        let store = persistence.load_at(t(1));
        assert_eq!(store.snapshot(), doc);
        assert!(store.is_whitelisted_at("76561198000000001", t(59)));
        assert!(!store.is_whitelisted_at("76561198000000001", t(60)));
    }

    #[test]
    fn missing_or_broken_documents_load_empty() {
        let (docs, persistence) = setup();
        assert!(persistence.load().is_empty());

        docs.insert(DOC, "this is not json");
        assert!(persistence.load().is_empty());

        docs.insert(DOC, "{}");
        assert!(persistence.load().is_empty());

        docs.insert(DOC, "[]");
        assert!(persistence.load().is_empty());

        docs.insert(DOC, r#"["a"]"#);
        docs.set_fail_reads(true);
        assert!(persistence.load().is_empty());
    }

    #[test]
    fn try_load_reports_what_load_swallows() {
        let (docs, persistence) = setup();
        assert!(persistence.try_load().unwrap().is_empty());

        docs.insert(DOC, "this is not json");
        let err = persistence.try_load().unwrap_err();
        assert_eq!(err.document, DOC);

        docs.insert(DOC, r#"["76561198000000001"]"#);
        docs.set_fail_reads(true);
        assert!(persistence.try_load().is_err());

        docs.set_fail_reads(false);
        assert_eq!(persistence.try_load().unwrap().len(), 1);
    }

    #[test]
    fn failed_save_keeps_store_dirty() {
        let (docs, persistence) = setup();
        let store = WhitelistStore::new();
        store.add(&SteamId::parse("76561198000000001").unwrap(), None, "Console").unwrap();

        docs.set_fail_writes(true);
        let err = persistence.flush(&store).unwrap_err();
        assert_eq!(err.document, DOC);
        assert!(store.is_dirty());
        assert!(store.contains("76561198000000001"));
        assert!(docs.get(DOC).is_none());

        docs.set_fail_writes(false);
        assert_eq!(persistence.flush(&store), Ok(true));
        assert_eq!(persistence.flush(&store), Ok(false));
        assert!(docs.get(DOC).is_some());
    }

    #[test]
    fn failed_migration_save_retries_on_flush() {
        let (docs, persistence) = setup();
        docs.insert(DOC, r#"["76561198000000001"]"#);
        docs.set_fail_writes(true);

        let store = persistence.load_at(t(0) + Duration::seconds(1));
        assert_eq!(store.len(), 1);
        assert!(store.is_dirty());

        docs.set_fail_writes(false);
        assert_eq!(persistence.flush(&store), Ok(true));
        assert!(docs.get(DOC).unwrap().contains(LEGACY_ADDED_BY));
    }

    #[tokio::test(start_paused = true)]
    async fn flusher_writes_when_dirty() {
        let (docs, persistence) = setup();
        let store = Arc::new(WhitelistStore::new());
        let _task = persistence.spawn_flusher(store.clone(), std::time::Duration::from_secs(60));

        store.add(&SteamId::parse("76561198000000001").unwrap(), None, "Console").unwrap();
        assert!(docs.get(DOC).is_none());

        tokio::time::sleep(std::time::Duration::from_secs(61)).await;
        assert!(docs.get(DOC).unwrap().contains("76561198000000001"));
        assert!(!store.is_dirty());
    }

    #[test]
    fn data_files_on_disk() {
        let dir = std::env::temp_dir().join(format!("whitelist_store_test_{}", std::process::id()));
        let files = DataFiles::new(&dir);

        assert_eq!(files.read("nothing.json"), Ok(None));
        files.write("doc.json", "[\"a\"]").unwrap();
        assert_eq!(files.read("doc.json"), Ok(Some("[\"a\"]".to_string())));

        assert!(files.write("../escape.json", "x").is_err());
        assert!(files.read("..").is_err());
        assert!(files.write("", "x").is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
