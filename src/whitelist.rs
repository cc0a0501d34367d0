//! Keeps everyone out who isn't on the whitelist, and provides `/whitelist` to manage it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use whitelist_store::{
    DocumentStore, ExpiryNotifier, ExportOutcome, NotifyError, Persistence, ScheduledTask, SteamId, Sweeper,
    WhitelistEntry, WhitelistError, WhitelistResult, WhitelistStore,
};

use crate::commands::Subcommand;
use crate::config::{fill, WhitelistConfig};
use crate::host::{Actor, Event, Host, HostError, HostResult, Player};
use crate::Plugin;

/// Shown for `search` before we cut it off.
const MAX_SEARCH_LINES: usize = 25;

fn human(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0) as u64;
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

fn entry_line(entry: &WhitelistEntry, now: DateTime<Utc>) -> String {
    match entry.remaining_at(now) {
        None => format!("{} (permanent, added by {})", entry.player_id, entry.added_by),
        Some(left) => format!("{} (expires in {}, added by {})", entry.player_id, human(left), entry.added_by),
    }
}

pub struct WhitelistPlugin {
    config: WhitelistConfig,
    store: Arc<WhitelistStore>,
    persistence: Persistence,
    /// Sweeper and flusher. Dropping them stops them.
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl std::fmt::Debug for WhitelistPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhitelistPlugin")
            .field("config", &self.config)
            .field("entries", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl WhitelistPlugin {
    /// Loads the whitelist right away (migrating old data files if needed).
    pub fn new(config: WhitelistConfig, docs: Arc<dyn DocumentStore>) -> Self {
        let persistence = Persistence::new(docs, config.data_file.clone());
        let store = Arc::new(persistence.load());
        Self {
            config,
            store,
            persistence,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<WhitelistStore> {
        &self.store
    }

    async fn is_admin(&self, host: &dyn Host, actor: &Actor) -> bool {
        match actor {
            Actor::Console => true,
            Actor::Player(p) => host.has_permission(&p.id, &self.config.admin_permission).await,
        }
    }

    fn audit(&self, actor: &Actor, what: impl std::fmt::Display) {
        if self.config.log_actions {
            info!("[{}] {} {}", Self::NAME, actor, what);
        }
    }

    async fn on_connect(&self, host: &dyn Host, player: &Player) {
        if self.store.is_whitelisted(&player.id) {
            debug!("[{}] {} is whitelisted, welcome.", Self::NAME, player);
            return;
        }
        if let Some(bypass) = &self.config.bypass_permission {
            if host.has_permission(&player.id, bypass).await {
                debug!("[{}] {} is not whitelisted, but has {}.", Self::NAME, player, bypass);
                return;
            }
        }

        info!("[{}] Kicking {}: not whitelisted.", Self::NAME, player);
        match host.kick(&player.id, &self.config.messages.not_whitelisted).await {
            Ok(()) => (),
            Err(HostError::PlayerNotFound(_)) => (), // already gone.
            Err(err) => error!("[{}] Failed to kick {}: {}", Self::NAME, player, err),
        }
    }

    async fn on_command(&self, host: &dyn Host, actor: Actor, args: &[String]) {
        let lines = match self.command(host, &actor, args).await {
            Ok(lines) => lines,
            Err(err) => vec![self.describe_error(&err)],
        };
        for line in lines {
            if let Err(err) = host.reply(&actor, &line).await {
                warn!("[{}] Failed to reply to {}: {}", Self::NAME, actor, err);
                break;
            }
        }
    }

    /// Runs one `/whitelist ...` command, returning the lines to reply with.
    pub async fn command(&self, host: &dyn Host, actor: &Actor, args: &[String]) -> WhitelistResult<Vec<String>> {
        if !self.is_admin(host, actor).await {
            return Err(WhitelistError::PermissionDenied);
        }
        let sub = Subcommand::parse(args)?;
        let mutation = sub.is_mutation();
        let lines = self.execute(host, actor, sub).await?;

        if mutation && self.config.save_immediately {
            let _ = self.persistence.flush(&self.store); // logged inside, and retried by the flusher.
        }
        Ok(lines)
    }

    async fn execute(&self, host: &dyn Host, actor: &Actor, sub: Subcommand) -> WhitelistResult<Vec<String>> {
        let msgs = &self.config.messages;
        let by = actor.to_string();
        let now = Utc::now();

        let lines = match sub {
            Subcommand::Add { id } => {
                let id = SteamId::parse(id)?;
                self.store.add_at(&id, None, &by, now)?;
                self.audit(actor, format_args!("added {} to the whitelist", id));
                self.sync_bypass(host, &id, true).await;
                vec![fill(&msgs.added, &[("player", id.to_string())])]
            }
            Subcommand::Remove { id } => {
                let id = SteamId::parse(id)?;
                self.store.remove(&id)?;
                self.audit(actor, format_args!("removed {} from the whitelist", id));
                self.sync_bypass(host, &id, false).await;
                vec![fill(&msgs.removed, &[("player", id.to_string())])]
            }
            Subcommand::Temp { id, duration } => {
                let id = SteamId::parse(id)?;
                let expiration = chrono::Duration::from_std(duration)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .ok_or_else(|| WhitelistError::BadArguments("That duration is too long.".to_string()))?;
                self.store.add_at(&id, Some(expiration), &by, now)?;
                let duration = humantime::format_duration(duration).to_string();
                self.audit(actor, format_args!("added {} to the whitelist for {}", id, duration));
                vec![fill(&msgs.added_temp, &[("player", id.to_string()), ("duration", duration)])]
            }
            Subcommand::Info { id } => {
                // evicts it first, if it happens to have expired.
                if !self.store.is_whitelisted_at(&id, now) {
                    return Err(WhitelistError::NotFound(id));
                }
                let entry = self.store.get(&id).ok_or(WhitelistError::NotFound(id))?;
                vec![
                    format!("{}:", entry.player_id),
                    format!("  added by {} on {}", entry.added_by, entry.added_at.format("%Y-%m-%d %H:%M:%S UTC")),
                    match (entry.expiration, entry.remaining_at(now)) {
                        (Some(exp), Some(left)) => format!("  expires {} (in {})", exp.format("%Y-%m-%d %H:%M:%S UTC"), human(left)),
                        _ => "  never expires".to_string(),
                    },
                ]
            }
            Subcommand::List { page } => {
                let page = self.store.list(page, self.config.page_size);
                if page.total == 0 {
                    vec![msgs.list_empty.clone()]
                } else {
                    let mut lines = vec![fill(&msgs.list_header, &[
                        ("page", page.page.to_string()),
                        ("pages", page.total_pages.to_string()),
                        ("total", page.total.to_string()),
                    ])];
                    lines.extend(page.entries.iter().map(|e| entry_line(e, now)));
                    lines
                }
            }
            Subcommand::Search { term } => {
                let hits = self.store.search(&term);
                if hits.is_empty() {
                    vec![fill(&msgs.search_none, &[("term", term)])]
                } else {
                    let mut lines = vec![fill(&msgs.search_header, &[("count", hits.len().to_string()), ("term", term)])];
                    lines.extend(hits.iter().take(MAX_SEARCH_LINES).map(|e| entry_line(e, now)));
                    if hits.len() > MAX_SEARCH_LINES {
                        lines.push(format!("... and {} more", hits.len() - MAX_SEARCH_LINES));
                    }
                    lines
                }
            }
            Subcommand::Count => vec![fill(&msgs.count, &[("count", self.store.len().to_string())])],
            Subcommand::Bulk { op, ids } => {
                let outcome = self.store.bulk_at(op, &ids, &by, now);
                self.audit(actor, format_args!("bulk {}: {} succeeded, {} failed", op, outcome.succeeded, outcome.failed));
                vec![fill(&msgs.bulk_done, &[
                    ("op", op.to_string()),
                    ("succeeded", outcome.succeeded.to_string()),
                    ("failed", outcome.failed.to_string()),
                ])]
            }
            Subcommand::Import { document } => {
                match self.persistence.documents().read(&document)? {
                    None => vec![fill(&msgs.document_missing, &[("document", document)])],
                    Some(text) => {
                        let outcome = self.store.import_at(&text, &by, now);
                        self.audit(actor, format_args!("imported {} ids from {}", outcome.imported, document));
                        vec![fill(&msgs.imported, &[
                            ("imported", outcome.imported.to_string()),
                            ("invalid", outcome.invalid.to_string()),
                        ])]
                    }
                }
            }
            Subcommand::Export => match self.store.export_at(&self.persistence, now)? {
                ExportOutcome::NothingToExport => vec![msgs.nothing_to_export.clone()],
                ExportOutcome::Written { document, count } => {
                    vec![fill(&msgs.exported, &[("count", count.to_string()), ("document", document)])]
                }
            },
            Subcommand::Clear => {
                let n = self.store.clear();
                self.audit(actor, format_args!("cleared the whitelist ({} entries)", n));
                vec![fill(&msgs.cleared, &[("count", n.to_string())])]
            }
            Subcommand::Reload => {
                // an unreadable document must not wipe what we have.
                let fresh = self.persistence.try_load()?;
                let n = fresh.len();
                self.store.replace_all(fresh);
                self.audit(actor, format_args!("reloaded the whitelist ({} entries)", n));
                vec![fill(&msgs.reloaded, &[("count", n.to_string())])]
            }
            Subcommand::Config => self.config.describe(),
        };
        Ok(lines)
    }

    /// Granting/revoking is best-effort; the whitelist entry is what counts.
    async fn sync_bypass(&self, host: &dyn Host, id: &SteamId, grant: bool) {
        let bypass = match (&self.config.bypass_permission, self.config.sync_bypass_permission) {
            (Some(bypass), true) => bypass,
            _ => return,
        };
        let result = if grant {
            host.grant_permission(id.as_str(), bypass).await
        } else {
            host.revoke_permission(id.as_str(), bypass).await
        };
        if let Err(err) = result {
            warn!("[{}] Failed to {} {} for {}: {}", Self::NAME, if grant { "grant" } else { "revoke" }, bypass, id, err);
        }
    }

    fn describe_error(&self, err: &WhitelistError) -> String {
        let msgs = &self.config.messages;
        match err {
            WhitelistError::InvalidIdentifier(e) => fill(&msgs.invalid_id, &[("player", e.0.clone())]),
            WhitelistError::AlreadyWhitelisted(id) => fill(&msgs.already_whitelisted, &[("player", id.clone())]),
            WhitelistError::NotFound(id) => fill(&msgs.not_found, &[("player", id.clone())]),
            WhitelistError::PermissionDenied => msgs.no_permission.clone(),
            WhitelistError::BadArguments(usage) => usage.clone(),
            WhitelistError::PersistenceIo(e) => fill(&msgs.storage_failed, &[("reason", e.to_string())]),
        }
    }
}

#[async_trait]
impl Plugin for WhitelistPlugin {
    const NAME: &'static str = "whitelist";

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    async fn start(self: &Arc<Self>, host: &Arc<dyn Host>) {
        info!("[{}] {} players on the whitelist.", Self::NAME, self.store.len());

        let notifier = Arc::new(HostNotifier {
            host: host.clone(),
            admin_permission: self.config.admin_permission.clone(),
            notice: self.config.messages.expired_admin_notice.clone(),
        });
        let sweeper = Arc::new(Sweeper::new(self.store.clone(), notifier, self.config.sweeper()));
        sweeper.sweep().await; // whatever expired while we were down.

        let flusher = self.persistence.spawn_flusher(self.store.clone(), self.config.save_interval);
        let mut tasks = self.tasks.lock();
        tasks.push(sweeper.spawn());
        tasks.push(flusher);
    }

    async fn event(self: Arc<Self>, host: Arc<dyn Host>, event: Event) -> HostResult<()> {
        match event {
            Event::Connected { player } => self.on_connect(host.as_ref(), &player).await,
            Event::Command { actor, command, args } if command.eq_ignore_ascii_case(&self.config.command) => {
                self.on_command(host.as_ref(), actor, &args).await
            }
            Event::Disconnected { player } => trace!("[{}] {} left.", Self::NAME, player),
            _ => (),
        }
        Ok(())
    }

    async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        drop(tasks); // cancels them.

        if let Ok(true) = self.persistence.flush(&self.store) {
            info!("[{}] Saved the whitelist on shutdown.", Self::NAME);
        }
        // a failed final save was already logged by `flush`, nothing more we can do.
    }
}

/// Kicks and notifies through the host when the sweeper evicts someone.
struct HostNotifier {
    host: Arc<dyn Host>,
    admin_permission: String,
    notice: String,
}

#[async_trait]
impl ExpiryNotifier for HostNotifier {
    async fn kick_expired(&self, entry: &WhitelistEntry, message: &str) -> Result<(), NotifyError> {
        let players = self.host.connected_players().await
            .map_err(|e| NotifyError(e.to_string()))?;
        let player = match players.iter().find(|p| p.id.eq_ignore_ascii_case(&entry.player_id)) {
            Some(p) => p,
            None => return Ok(()), // not online, nothing to do.
        };

        match self.host.kick(&player.id, message).await {
            Ok(()) | Err(HostError::PlayerNotFound(_)) => Ok(()),
            Err(e) => Err(NotifyError(e.to_string())),
        }
    }

    async fn notify_admins(&self, entry: &WhitelistEntry) -> Result<(), NotifyError> {
        let players = self.host.connected_players().await
            .map_err(|e| NotifyError(e.to_string()))?;
        let notice = fill(&self.notice, &[("player", entry.player_id.clone())]);

        let mut failures = Vec::new();
        for player in players {
            if self.host.has_permission(&player.id, &self.admin_permission).await {
                let actor = Actor::Player(player);
                if let Err(e) = self.host.reply(&actor, &notice).await {
                    failures.push(format!("{}: {}", actor, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError(failures.join("; ")))
        }
    }
}
