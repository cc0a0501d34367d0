//! Periodic eviction of expired entries.
//!
//! Evicting happens under the store lock. Kicking and notifying happens afterwards, without the
//! lock, since those go out to the host and may take a while. An eviction is final, even when the
//! kick or the notification for it fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::entry::WhitelistEntry;
use crate::schedule::{self, ScheduledTask};
use crate::store::WhitelistStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// What the sweeper needs from the outside world once an entry has expired.
#[async_trait]
pub trait ExpiryNotifier: Send + Sync + 'static {
    /// Disconnect the player, if they are currently connected.
    async fn kick_expired(&self, entry: &WhitelistEntry, message: &str) -> Result<(), NotifyError>;

    /// Tell every connected admin about the expiry.
    async fn notify_admins(&self, entry: &WhitelistEntry) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub kick_on_expiration: bool,
    pub kick_message: String,
    pub notify_admins: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            kick_on_expiration: true,
            kick_message: "Your whitelist access has expired.".to_string(),
            notify_admins: true,
        }
    }
}

pub struct Sweeper {
    store: Arc<WhitelistStore>,
    notifier: Arc<dyn ExpiryNotifier>,
    config: SweeperConfig,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Sweeper {
    pub fn new(store: Arc<WhitelistStore>, notifier: Arc<dyn ExpiryNotifier>, config: SweeperConfig) -> Self {
        Self { store, notifier, config }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    pub async fn sweep(&self) -> Vec<WhitelistEntry> {
        self.sweep_at(Utc::now()).await
    }

    /// Evicts everything with `expiration <= now`, then kicks/notifies as configured.
    /// Returns the evicted entries.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Vec<WhitelistEntry> {
        let expired = self.store.drain_expired_at(now); // lock is released again here.
        if expired.is_empty() {
            trace!("Sweep: nothing expired.");
            return expired;
        }
        info!("Sweep: {} whitelist entries expired.", expired.len());

        for entry in &expired {
            info!("Whitelist entry for {} expired (added by {}).", entry.player_id, entry.added_by);

            if self.config.kick_on_expiration {
                if let Err(err) = self.notifier.kick_expired(entry, &self.config.kick_message).await {
                    warn!("Failed to kick {} after whitelist expiry: {}", entry.player_id, err);
                }
            }
            if self.config.notify_admins {
                if let Err(err) = self.notifier.notify_admins(entry).await {
                    warn!("Failed to notify admins about expiry of {}: {}", entry.player_id, err);
                }
            }
        }
        expired
    }

    /// Sweeps once per `config.interval` until the returned task is dropped or cancelled.
    pub fn spawn(self: Arc<Self>) -> ScheduledTask {
        let interval = self.config.interval;
        schedule::every("whitelist sweep", interval, move || {
            let sweeper = self.clone();
            async move {
                sweeper.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::steam_id::SteamId;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[derive(Debug, Default)]
    struct Recorder {
        fail: bool,
        kicked: Mutex<Vec<(String, String)>>,
        notified: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExpiryNotifier for Recorder {
        async fn kick_expired(&self, entry: &WhitelistEntry, message: &str) -> Result<(), NotifyError> {
            self.kicked.lock().push((entry.player_id.clone(), message.to_string()));
            if self.fail { Err(NotifyError("host went away".into())) } else { Ok(()) }
        }

        async fn notify_admins(&self, entry: &WhitelistEntry) -> Result<(), NotifyError> {
            self.notified.lock().push(entry.player_id.clone());
            if self.fail { Err(NotifyError("host went away".into())) } else { Ok(()) }
        }
    }

    const OLD: &str = "76561198000000001";
    const NEW: &str = "76561198000000002";

    fn store() -> Arc<WhitelistStore> {
        let store = Arc::new(WhitelistStore::new());
        store.add_at(&SteamId::parse(OLD).unwrap(), Some(t(-10)), "Console", t(-100)).unwrap();
        store.add_at(&SteamId::parse(NEW).unwrap(), Some(t(10)), "Console", t(-100)).unwrap();
        store
    }

    #[tokio::test]
    async fn sweep_evicts_exactly_the_expired() {
        let store = store();
        let recorder = Arc::new(Recorder::default());
        let sweeper = Sweeper::new(store.clone(), recorder.clone(), SweeperConfig::default());

        let evicted = sweeper.sweep_at(t(0)).await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].player_id, OLD);
        assert!(!store.contains(OLD));
        assert!(store.contains(NEW));

        assert_eq!(*recorder.kicked.lock(), vec![(OLD.to_string(), "Your whitelist access has expired.".to_string())]);
        assert_eq!(*recorder.notified.lock(), vec![OLD.to_string()]);
    }

    #[tokio::test]
    async fn side_effects_can_be_turned_off() {
        let store = store();
        let recorder = Arc::new(Recorder::default());
        let config = SweeperConfig {
            kick_on_expiration: false,
            notify_admins: false,
            ..SweeperConfig::default()
        };
        let sweeper = Sweeper::new(store.clone(), recorder.clone(), config);

        assert_eq!(sweeper.sweep_at(t(0)).await.len(), 1);
        assert!(recorder.kicked.lock().is_empty());
        assert!(recorder.notified.lock().is_empty());
    }

    #[tokio::test]
    async fn failing_notifications_do_not_undo_eviction() {
        let store = store();
        store.take_snapshot();
        let recorder = Arc::new(Recorder { fail: true, ..Recorder::default() });
        let sweeper = Sweeper::new(store.clone(), recorder.clone(), SweeperConfig::default());

        assert_eq!(sweeper.sweep_at(t(0)).await.len(), 1);
        assert!(!store.contains(OLD));
        assert!(store.is_dirty());
        // both were still attempted
        assert_eq!(recorder.kicked.lock().len(), 1);
        assert_eq!(recorder.notified.lock().len(), 1);
    }

    #[tokio::test]
    async fn nothing_expired_nothing_happens() {
        let store = store();
        store.take_snapshot();
        let recorder = Arc::new(Recorder::default());
        let sweeper = Sweeper::new(store.clone(), recorder.clone(), SweeperConfig::default());

        assert!(sweeper.sweep_at(t(-50)).await.is_empty());
        assert_eq!(store.len(), 2);
        assert!(!store.is_dirty());
        assert!(recorder.kicked.lock().is_empty());
    }
}
