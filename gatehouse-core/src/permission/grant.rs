//! Grant value types.
//!
//! A grant pairs a subject (user or role id) with the channels it applies in.
//! Grants are normalized once, when the permissions subtree is read from the
//! store, so the check path never re-parses shapes.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// The only wildcard channel token.
pub const PUBLIC_CHANNEL: &str = "public";

/// A single entry in a grant's channel set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelToken {
    /// The `public` sentinel: any channel.
    Public,
    /// A literal channel id.
    Channel(String),
}

impl ChannelToken {
    /// Parse a raw token. `*` and empty strings are rejected.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim() {
            "*" => Err(ValidationError::WildcardChannel),
            "" => Err(ValidationError::EmptyChannel),
            PUBLIC_CHANNEL => Ok(ChannelToken::Public),
            id => Ok(ChannelToken::Channel(id.to_string())),
        }
    }

    /// Token as it appears in the config document.
    pub fn as_str(&self) -> &str {
        match self {
            ChannelToken::Public => PUBLIC_CHANNEL,
            ChannelToken::Channel(id) => id,
        }
    }
}

impl std::str::FromStr for ChannelToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ChannelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ChannelToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChannelToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Channel ids are sometimes stored as bare numbers.
        let raw = match Value::deserialize(deserializer)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(de::Error::custom(format!(
                    "channel token must be a string or number, found {}",
                    other
                )))
            }
        };
        ChannelToken::parse(&raw).map_err(de::Error::custom)
    }
}

/// Channels a grant applies in.
///
/// An empty set matches nothing. A set containing [`ChannelToken::Public`]
/// matches every channel, direct messages included. Otherwise only the listed
/// channel ids match.
///
/// # Example
///
/// ```rust
/// use gatehouse_core::permission::ChannelSet;
///
/// let scoped = ChannelSet::parse(["111"]).unwrap();
/// assert!(scoped.allows(Some("111")));
/// assert!(!scoped.allows(Some("222")));
/// assert!(!scoped.allows(None));
///
/// assert!(ChannelSet::parse(["*"]).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelSet(BTreeSet<ChannelToken>);

impl ChannelSet {
    /// An empty set (deny everywhere).
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding only the `public` sentinel.
    pub fn public() -> Self {
        Self(BTreeSet::from([ChannelToken::Public]))
    }

    /// Parse raw tokens, rejecting `*` and blanks.
    pub fn parse<I, S>(tokens: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tokens
            .into_iter()
            .map(|t| ChannelToken::parse(t.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the `public` sentinel is present.
    pub fn is_public(&self) -> bool {
        self.0.contains(&ChannelToken::Public)
    }

    pub fn insert(&mut self, token: ChannelToken) -> bool {
        self.0.insert(token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelToken> {
        self.0.iter()
    }

    /// Whether this set admits `channel` (`None` for a direct message).
    pub fn allows(&self, channel: Option<&str>) -> bool {
        if self.is_public() {
            return true;
        }
        match channel {
            Some(id) => self.0.iter().any(|t| t.as_str() == id),
            None => false,
        }
    }
}

/// A subject id plus the channels it is allowed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Grant {
    /// Normalized user or role id
    pub subject_id: String,
    /// Where the grant applies
    pub channels: ChannelSet,
}

impl Grant {
    pub fn new(subject_id: impl Into<String>, channels: ChannelSet) -> Self {
        Self {
            subject_id: subject_id.into(),
            channels,
        }
    }

    /// Whether this grant admits `channel` (`None` for a direct message).
    pub fn allows(&self, channel: Option<&str>) -> bool {
        self.channels.allows(channel)
    }
}

impl Serialize for Grant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Grant", 2)?;
        state.serialize_field("id", &self.subject_id)?;
        state.serialize_field("channels", &self.channels)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Grant {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Full {
                id: Value,
                #[serde(default)]
                channels: Option<ChannelSet>,
            },
            // Legacy entries hold only the id; they carry no channels.
            Bare(Value),
        }

        let (id, channels) = match Shape::deserialize(deserializer)? {
            Shape::Full { id, channels } => (id, channels.unwrap_or_default()),
            Shape::Bare(id) => (id, ChannelSet::new()),
        };
        let subject_id = match id {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            other => return Err(de::Error::custom(format!("invalid grant id: {}", other))),
        };
        Ok(Grant {
            subject_id,
            channels,
        })
    }
}

fn digit_runs() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"[0-9]+").expect("static regex"))
}

/// Extract a numeric id from a raw id or a mention.
///
/// Accepts `12345`, `<@12345>`, `<@!12345>` and `<@&12345>`. Input that is
/// all digits is returned as-is; otherwise the longest run of 5 to 20 digits
/// wins (the first one on ties). Only ASCII digits count.
///
/// ```rust
/// use gatehouse_core::permission::extract_id;
///
/// assert_eq!(extract_id("<@!123456789012345>").unwrap(), "123456789012345");
/// assert!(extract_id("not-an-id").is_err());
/// ```
pub fn extract_id(identifier: &str) -> Result<String, ValidationError> {
    let trimmed = identifier.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(trimmed.to_string());
    }

    let mut best: Option<&str> = None;
    for run in digit_runs().find_iter(trimmed).map(|m| m.as_str()) {
        if !(5..=20).contains(&run.len()) {
            continue;
        }
        if best.map_or(true, |b| run.len() > b.len()) {
            best = Some(run);
        }
    }

    best.map(str::to_string)
        .ok_or_else(|| ValidationError::InvalidIdentifier(identifier.to_string()))
}
