use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every individual Steam account lives in this namespace.
pub const STEAM_ID_PREFIX: &str = "7656119";
pub const STEAM_ID_LEN: usize = 17;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{0}' is not a valid Steam64 ID")]
pub struct SteamIdParseError(pub String);

/// `true` for stuff like "76561198000000001": 17 digits, starting with 7656119.
pub fn is_valid_id(s: &str) -> bool {
    s.len() == STEAM_ID_LEN
        && s.bytes().all(|b| b.is_ascii_digit())
        && s.starts_with(STEAM_ID_PREFIX)
}

/// Steam64 ID. Can only be obtained by parsing, so holding one means it is valid.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SteamId(String);

impl SteamId {
    /// Input: "76561198000000001". Surrounding whitespace is ignored.
    pub fn parse(s: impl AsRef<str>) -> Result<SteamId, SteamIdParseError> {
        let trimmed = s.as_ref().trim();
        if is_valid_id(trimmed) {
            Ok(SteamId(trimmed.to_owned()))
        } else {
            Err(SteamIdParseError(trimmed.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SteamId {
    type Err = SteamIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SteamId::parse(s)
    }
}

impl TryFrom<String> for SteamId {
    type Error = SteamIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SteamId::parse(value)
    }
}

impl From<SteamId> for String {
    fn from(id: SteamId) -> Self {
        id.0
    }
}

impl AsRef<str> for SteamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for SteamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for SteamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SteamId({})", self.0)
    }
}
