#![warn(missing_debug_implementations, rust_2018_idioms)]
/*!
The whitelist itself: who may join, until when, and who said so.

# Example
```ignore
let docs = Arc::new(DataFiles::new("data"));
let persistence = Persistence::new(docs, "WhitelistManager.json");
let store = persistence.load();

let id = SteamId::parse("76561198000000001")?;
store.add(&id, None, "Console")?;
assert!(store.is_whitelisted("76561198000000001"));

// every once in a while:
persistence.flush(&store)?;
```
*/

#[macro_use] extern crate log;

pub mod bulk;
pub mod entry;
pub mod error;
pub mod persistence;
pub mod schedule;
pub mod steam_id;
pub mod store;
pub mod sweeper;

pub use bulk::{BulkOp, BulkOutcome, ExportOutcome, ImportOutcome};
pub use entry::WhitelistEntry;
pub use error::{PersistenceError, WhitelistError, WhitelistResult};
pub use persistence::{DataFiles, DocumentStore, MemoryDocuments, Persistence};
pub use schedule::ScheduledTask;
pub use steam_id::{is_valid_id, SteamId, SteamIdParseError};
pub use store::{Page, WhitelistStore};
pub use sweeper::{ExpiryNotifier, NotifyError, Sweeper, SweeperConfig};
