use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Telegram destination: a numeric chat id or a public `@username`.
///
/// Deserializes from a JSON number, a numeric string or an `@username`
/// string, since invoice records and hand-edited config files carry all three.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Username(String),
}

impl ChatId {
    /// Parse a chat id from its textual form, tolerating surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(n) = raw.parse::<i64>() {
            return Some(ChatId::Id(n));
        }
        let name = raw.strip_prefix('@')?;
        let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        valid.then(|| ChatId::Username(raw.to_string()))
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatId::Id(n) => write!(f, "{n}"),
            ChatId::Username(name) => f.write_str(name),
        }
    }
}

impl From<i64> for ChatId {
    fn from(v: i64) -> Self {
        ChatId::Id(v)
    }
}

impl<'de> Deserialize<'de> for ChatId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(i64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(ChatId::Id(n)),
            Raw::Str(s) => ChatId::parse(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid chat id: {s:?}"))),
        }
    }
}
