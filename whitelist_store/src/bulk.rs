//! Batch operations: bulk add/remove, and plain-text import/export.

use std::{fmt::Display, path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use itertools::Itertools;

use crate::error::{PersistenceError, WhitelistError};
use crate::persistence::Persistence;
use crate::steam_id::SteamId;
use crate::store::WhitelistStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOp {
    Add,
    Remove,
}

impl FromStr for BulkOp {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(BulkOp::Add),
            "remove" => Ok(BulkOp::Remove),
            _ => Err(()),
        }
    }
}

impl Display for BulkOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BulkOp::Add => write!(f, "add"),
            BulkOp::Remove => write!(f, "remove"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    pub imported: usize,
    /// Lines that are not a valid id. Ids that were already whitelisted are *not* counted here.
    pub invalid: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The whitelist is empty, no document was written.
    NothingToExport,
    Written { document: String, count: usize },
}

/// E.g. `WhitelistManager_Export_20240131_235959.txt` for a data file called `WhitelistManager.json`.
pub fn export_document_name(data_file: &str, now: DateTime<Utc>) -> String {
    let stem = Path::new(data_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(data_file);
    format!("{}_Export_{}.txt", stem, now.format("%Y%m%d_%H%M%S"))
}

impl WhitelistStore {
    pub fn bulk(&self, op: BulkOp, ids: &[impl AsRef<str>], added_by: &str) -> BulkOutcome {
        self.bulk_at(op, ids, added_by, Utc::now())
    }

    /// Every id is handled on its own, one bad id never stops the rest. All of it happens under
    /// one lock, so nobody sees half a batch.
    pub fn bulk_at(&self, op: BulkOp, ids: &[impl AsRef<str>], added_by: &str, now: DateTime<Utc>) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        let mut inner = self.lock();
        for raw in ids {
            let result = SteamId::parse(raw.as_ref())
                .map_err(WhitelistError::from)
                .and_then(|id| match op {
                    BulkOp::Add => inner.insert(&id, None, added_by, now),
                    BulkOp::Remove => inner.remove(&id).map(|_| ()),
                });
            match result {
                Ok(()) => outcome.succeeded += 1,
                Err(err) => {
                    trace!("bulk {} skipped '{}': {}", op, raw.as_ref(), err);
                    outcome.failed += 1;
                }
            }
        }
        drop(inner);

        if outcome.succeeded > 0 {
            debug!("{} bulk {}: {} succeeded, {} failed.", added_by, op, outcome.succeeded, outcome.failed);
        }
        outcome
    }

    pub fn import(&self, text: &str, added_by: &str) -> ImportOutcome {
        self.import_at(text, added_by, Utc::now())
    }

    /// One id per line. Blank lines are ignored, and so are ids that are already whitelisted.
    pub fn import_at(&self, text: &str, added_by: &str, now: DateTime<Utc>) -> ImportOutcome {
        let mut outcome = ImportOutcome::default();
        let mut inner = self.lock();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match SteamId::parse(line) {
                Ok(id) => match inner.insert(&id, None, added_by, now) {
                    Ok(()) => outcome.imported += 1,
                    Err(_) => trace!("import: {} is already whitelisted", id),
                },
                Err(_) => outcome.invalid += 1,
            }
        }
        drop(inner);

        if outcome.imported > 0 {
            debug!("{} imported {} ids ({} invalid lines).", added_by, outcome.imported, outcome.invalid);
        }
        outcome
    }

    /// Newline-separated ids, ascending. `None` if there is nothing to export.
    pub fn export_text(&self) -> Option<String> {
        let ids = self.ids();
        if ids.is_empty() {
            None
        } else {
            Some(ids.iter().join("\n"))
        }
    }

    /// Writes `export_text` to a fresh, timestamped document next to the whitelist data.
    pub fn export_at(&self, persistence: &Persistence, now: DateTime<Utc>) -> Result<ExportOutcome, PersistenceError> {
        let text = match self.export_text() {
            Some(text) => text,
            None => return Ok(ExportOutcome::NothingToExport),
        };
        let count = text.lines().count();
        let document = export_document_name(persistence.name(), now);
        persistence.documents().write(&document, &text)?;
        info!("Exported {} whitelist ids to '{}'.", count, document);
        Ok(ExportOutcome::Written { document, count })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::persistence::MemoryDocuments;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    const A: &str = "76561198000000001";
    const B: &str = "76561198000000002";
    const C: &str = "76561198000000003";

    #[test]
    fn bulk_add_counts_each_id() {
        let store = WhitelistStore::new();
        store.add(&SteamId::parse(B).unwrap(), None, "Console").unwrap();
        store.take_snapshot();

        let outcome = store.bulk(BulkOp::Add, &[A, "not-an-id", B], "Console");
        assert_eq!(outcome, BulkOutcome { succeeded: 1, failed: 2 });
        assert!(store.contains(A));
        assert!(store.is_dirty());
    }

    #[test]
    fn bulk_remove_counts_missing_as_failed() {
        let store = WhitelistStore::new();
        store.add(&SteamId::parse(A).unwrap(), None, "Console").unwrap();

        let outcome = store.bulk(BulkOp::Remove, &[A, C, "x"], "Console");
        assert_eq!(outcome, BulkOutcome { succeeded: 1, failed: 2 });
        assert!(store.is_empty());
    }

    #[test]
    fn bulk_with_only_failures_stays_clean() {
        let store = WhitelistStore::new();
        let outcome = store.bulk(BulkOp::Remove, &[A, "x"], "Console");
        assert_eq!(outcome, BulkOutcome { succeeded: 0, failed: 2 });
        assert!(!store.is_dirty());
    }

    #[test]
    fn import_skips_present_ids_without_calling_them_invalid() {
        let store = WhitelistStore::new();
        store.add(&SteamId::parse(B).unwrap(), None, "Console").unwrap();

        let text = format!("{}\r\n  {}  \nsome garbage\n\n", A, B);
        let outcome = store.import_at(&text, "Import", t(0));
        assert_eq!(outcome, ImportOutcome { imported: 1, invalid: 1 });
        assert_eq!(store.get(A).unwrap().added_by, "Import");
        assert_eq!(store.get(B).unwrap().added_by, "Console");
    }

    #[test]
    fn import_dedupes_within_input() {
        let store = WhitelistStore::new();
        let outcome = store.import(&format!("{}\n{}\n", A, A), "Import");
        assert_eq!(outcome, ImportOutcome { imported: 1, invalid: 0 });
    }

    #[test]
    fn bulk_op_parses() {
        assert_eq!("ADD".parse::<BulkOp>(), Ok(BulkOp::Add));
        assert_eq!("remove".parse::<BulkOp>(), Ok(BulkOp::Remove));
        assert!("delete".parse::<BulkOp>().is_err());
    }

    #[test]
    fn export_sorted_to_timestamped_document() {
        let docs = Arc::new(MemoryDocuments::new());
        let persistence = Persistence::new(docs.clone(), "WhitelistManager.json");
        let store = WhitelistStore::new();

        assert_eq!(store.export_at(&persistence, t(0)), Ok(ExportOutcome::NothingToExport));
        assert!(docs.names().is_empty());

        for id in [C, A, B] {
            store.add(&SteamId::parse(id).unwrap(), None, "Console").unwrap();
        }
        let outcome = store.export_at(&persistence, t(0)).unwrap();
        let document = export_document_name("WhitelistManager.json", t(0));
        assert_eq!(document, "WhitelistManager_Export_20231114_221320.txt");
        assert_eq!(outcome, ExportOutcome::Written { document: document.clone(), count: 3 });
        assert_eq!(docs.get(&document).unwrap(), format!("{}\n{}\n{}", A, B, C));
    }

    #[test]
    fn export_failure_is_reported() {
        let docs = Arc::new(MemoryDocuments::new());
        let persistence = Persistence::new(docs.clone(), "WhitelistManager.json");
        let store = WhitelistStore::new();
        store.add(&SteamId::parse(A).unwrap(), None, "Console").unwrap();

        docs.set_fail_writes(true);
        assert!(store.export_at(&persistence, t(0)).is_err());
    }
}
