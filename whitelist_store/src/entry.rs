use std::fmt::Display;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One whitelist record. Serialized as-is into the data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub player_id: String,
    /// `None` means permanent.
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
}

impl WhitelistEntry {
    pub fn new(
        player_id: impl Into<String>,
        expiration: Option<DateTime<Utc>>,
        added_by: impl Into<String>,
        added_at: DateTime<Utc>,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            expiration,
            added_by: added_by.into(),
            added_at,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.expiration.is_none()
    }

    /// An entry expiring exactly at `now` counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(exp) if exp <= now)
    }

    /// Time left until expiry, clipped at zero. `None` for permanent entries.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expiration
            .map(|exp| std::cmp::max(exp - now, Duration::zero()))
    }
}

impl Display for WhitelistEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (added by {} at {}", self.player_id, self.added_by, self.added_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        match self.expiration {
            Some(exp) => write!(f, ", expires {})", exp.format("%Y-%m-%d %H:%M:%S UTC")),
            None => write!(f, ", permanent)"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let e = WhitelistEntry::new("76561198000000001", Some(t(0)), "Console", t(-100));
        assert!(!e.is_expired_at(t(-1)));
        assert!(e.is_expired_at(t(0)));
        assert!(e.is_expired_at(t(1)));
    }

    #[test]
    fn permanent_never_expires() {
        let e = WhitelistEntry::new("76561198000000001", None, "Console", t(0));
        assert!(e.is_permanent());
        assert!(!e.is_expired_at(t(1_000_000_000)));
        assert_eq!(e.remaining_at(t(5)), None);
    }

    #[test]
    fn remaining_clips_at_zero() {
        let e = WhitelistEntry::new("76561198000000001", Some(t(60)), "Console", t(0));
        assert_eq!(e.remaining_at(t(0)), Some(Duration::seconds(60)));
        assert_eq!(e.remaining_at(t(120)), Some(Duration::zero()));
    }
}
