//! What we need from the game server we're plugged into.

use std::fmt::Display;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Player {
    /// Steam64 ID, as the host reports it.
    pub id: String,
    pub name: String,
}

impl Player {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Whoever invoked a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Actor {
    /// The server console. Always allowed to do everything.
    Console,
    Player(Player),
}

impl Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Console => write!(f, "Console"),
            Actor::Player(p) => write!(f, "{}", p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected {
        player: Player,
    },
    Disconnected {
        player: Player,
    },
    /// E.g. `/whitelist add 7656119...` gives command `whitelist` and args `["add", "7656119..."]`.
    Command {
        actor: Actor,
        command: String,
        args: Vec<String>,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("player {0} is not connected")]
    PlayerNotFound(String),
    #[error("lost connection to the host")]
    Disconnected,
    #[error("{0}")]
    Other(String),
}

pub type HostResult<T> = Result<T, HostError>;

#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// Every subscriber gets every event from now on. Ends when the host goes away.
    fn event_stream(&self) -> BoxStream<'static, Event>;

    async fn kick(&self, player_id: &str, reason: &str) -> HostResult<()>;

    /// One line back to whoever ran a command (or any player, really).
    async fn reply(&self, actor: &Actor, message: &str) -> HostResult<()>;

    async fn has_permission(&self, player_id: &str, permission: &str) -> bool;

    async fn grant_permission(&self, player_id: &str, permission: &str) -> HostResult<()>;

    async fn revoke_permission(&self, player_id: &str, permission: &str) -> HostResult<()>;

    async fn connected_players(&self) -> HostResult<Vec<Player>>;
}
