//! A stand-in game server driven from stdin, for running the plugin without one.
//!
//! ```text
//! join 76561198000000001 Alice     a player connects
//! leave 76561198000000001          ...and disconnects
//! grant <id> <permission>          / revoke <id> <permission>
//! as <id> whitelist list           run a command as that player
//! whitelist add 7656119...         run a command from the console
//! players                          who's online
//! quit
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use itertools::Itertools;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::host::{Actor, Event, Host, HostError, HostResult, Player};

const HELP: &str = "join <id> [name] | leave <id> | grant <id> <perm> | revoke <id> <perm> | as <id> <command...> | players | quit | <command...>";

#[derive(Debug, Default)]
struct Inner {
    /// Lowercased id -> player.
    players: BTreeMap<String, Player>,
    /// (lowercased id, permission)
    permissions: HashSet<(String, String)>,
}

#[derive(Debug)]
pub struct ConsoleHost {
    /// `None` once the console is closed, which ends every event stream.
    events: Mutex<Option<broadcast::Sender<Event>>>,
    inner: Mutex<Inner>,
}

impl ConsoleHost {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(128);
        Arc::new(Self {
            events: Mutex::new(Some(tx)),
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Reads stdin line by line until EOF or `quit`, then closes.
    pub async fn read_stdin(self: Arc<Self>) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !self.handle_line(&line) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!("Failed to read from stdin: {}", err);
                    break;
                }
            }
        }
        self.close();
    }

    /// Ends all event streams.
    pub fn close(&self) {
        if self.events.lock().take().is_some() {
            debug!("Console closed.");
        }
    }

    fn send(&self, event: Event) {
        if let Some(tx) = &*self.events.lock() {
            // nobody listening is fine.
            let _ = tx.send(event);
        }
    }

    fn player(&self, id: &str) -> Player {
        self.inner.lock().players.get(&id.to_ascii_lowercase()).cloned()
            .unwrap_or_else(|| Player::new(id, id))
    }

    /// Returns `false` when the console should stop.
    pub fn handle_line(&self, line: &str) -> bool {
        let words = line.split_whitespace().collect_vec();
        let (first, rest) = match words.split_first() {
            Some((first, rest)) => (first.to_ascii_lowercase(), rest),
            None => return true,
        };

        match (first.as_str(), rest) {
            ("quit" | "exit", _) => return false,
            ("help", _) => println!("{}", HELP),
            ("join", [id, name @ ..]) => {
                let name = if name.is_empty() { id.to_string() } else { name.join(" ") };
                let player = Player::new(*id, name);
                self.inner.lock().players.insert(id.to_ascii_lowercase(), player.clone());
                self.send(Event::Connected { player });
            }
            ("leave", [id]) => {
                match self.inner.lock().players.remove(&id.to_ascii_lowercase()) {
                    Some(player) => self.send(Event::Disconnected { player }),
                    None => println!("{} is not connected.", id),
                }
            }
            ("grant", [id, perm]) => {
                self.inner.lock().permissions.insert((id.to_ascii_lowercase(), perm.to_string()));
            }
            ("revoke", [id, perm]) => {
                self.inner.lock().permissions.remove(&(id.to_ascii_lowercase(), perm.to_string()));
            }
            ("players", []) => {
                let inner = self.inner.lock();
                if inner.players.is_empty() {
                    println!("Nobody is connected.");
                }
                for player in inner.players.values() {
                    println!("{}", player);
                }
            }
            ("as", [id, command @ ..]) if !command.is_empty() => {
                let actor = Actor::Player(self.player(id));
                self.command(actor, command);
            }
            ("join" | "leave" | "grant" | "revoke" | "players" | "as", _) => println!("{}", HELP),
            _ => self.command(Actor::Console, &words),
        }
        true
    }

    fn command(&self, actor: Actor, words: &[&str]) {
        if let Some((command, args)) = words.split_first() {
            self.send(Event::Command {
                actor,
                command: command.trim_start_matches('/').to_ascii_lowercase(),
                args: args.iter().map(|s| s.to_string()).collect(),
            });
        }
    }
}

#[async_trait]
impl Host for ConsoleHost {
    fn event_stream(&self) -> BoxStream<'static, Event> {
        let rx = match &*self.events.lock() {
            Some(tx) => tx.subscribe(),
            None => return Box::pin(futures::stream::empty()),
        };
        Box::pin(BroadcastStream::new(rx).filter_map(|ev| match ev {
            Ok(ev) => Some(ev),
            Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                warn!("Too many console events at once! Had to drop {} events", n);
                None
            }
        }))
    }

    async fn kick(&self, player_id: &str, reason: &str) -> HostResult<()> {
        let player = self.inner.lock().players.remove(&player_id.to_ascii_lowercase())
            .ok_or_else(|| HostError::PlayerNotFound(player_id.to_string()))?;
        println!("[kick] {}: {}", player, reason);
        self.send(Event::Disconnected { player });
        Ok(())
    }

    async fn reply(&self, actor: &Actor, message: &str) -> HostResult<()> {
        match actor {
            Actor::Console => println!("{}", message),
            Actor::Player(p) => println!("[to {}] {}", p.name, message),
        }
        Ok(())
    }

    async fn has_permission(&self, player_id: &str, permission: &str) -> bool {
        self.inner.lock().permissions.contains(&(player_id.to_ascii_lowercase(), permission.to_string()))
    }

    async fn grant_permission(&self, player_id: &str, permission: &str) -> HostResult<()> {
        self.inner.lock().permissions.insert((player_id.to_ascii_lowercase(), permission.to_string()));
        Ok(())
    }

    async fn revoke_permission(&self, player_id: &str, permission: &str) -> HostResult<()> {
        self.inner.lock().permissions.remove(&(player_id.to_ascii_lowercase(), permission.to_string()));
        Ok(())
    }

    async fn connected_players(&self) -> HostResult<Vec<Player>> {
        Ok(self.inner.lock().players.values().cloned().collect())
    }
}
