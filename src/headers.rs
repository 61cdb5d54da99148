//! Header vocabulary and the [`Headers`] map.
//!
//! Header names are case-sensitive and must match what the broker expects.
//! Values are carried as strings; timestamps are epoch milliseconds.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Routing type of a destination when publishing.
pub const DESTINATION_TYPE: &str = "destination-type";

/// Routing type of a destination when subscribing.
pub const SUBSCRIPTION_TYPE: &str = "subscription-type";

/// Acknowledgement mode requested at subscribe time.
pub const ACK: &str = "ack";

/// Absolute expiry time, epoch milliseconds.
pub const EXPIRES: &str = "expires";

/// Scheduled delivery time, epoch milliseconds.
pub const SCHEDULED_TIME: &str = "AMQ_SCHEDULED_TIME";

/// Message priority.
pub const PRIORITY: &str = "priority";

/// Name of a durable topic subscription.
pub const DURABLE_SUBSCRIPTION_NAME: &str = "durable-subscription-name";

/// Body encoding marker, set only for structured bodies.
pub const ENCODING: &str = "encoding";

/// Correlation id carried on replies.
pub const CORRELATION_ID: &str = "correlation_id";

/// Broker routing semantics for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingType {
    /// Point-to-point: one subscriber receives each message.
    Anycast,

    /// Broadcast: every subscriber receives each message.
    Multicast,
}

impl RoutingType {
    /// Wire literal for this routing type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingType::Anycast => "ANYCAST",
            RoutingType::Multicast => "MULTICAST",
        }
    }

    /// Parse a wire literal.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ANYCAST" => Some(RoutingType::Anycast),
            "MULTICAST" => Some(RoutingType::Multicast),
            _ => None,
        }
    }
}

impl fmt::Display for RoutingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acknowledgement mode of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckMode {
    /// The broker considers a message consumed once delivered.
    Auto,

    /// The subscriber must ack each delivered message explicitly.
    Client,
}

impl AckMode {
    /// Wire literal for this ack mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
        }
    }

    /// Parse a wire literal.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(AckMode::Auto),
            "client" => Some(AckMode::Client),
            _ => None,
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of message or subscription headers.
///
/// Backed by an ordered map so that iteration, `Debug` output and logged
/// header sets are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// Create an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, returning the previous value if any.
    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) -> Option<String> {
        self.0.insert(name.into(), value.to_string())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a header value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// True if the header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    /// Merge `other` into `self`; `other` wins on conflicts.
    pub fn merge(mut self, other: Headers) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Routing type carried in `subscription-type`, falling back to
    /// `destination-type`.
    pub fn routing_type(&self) -> Option<RoutingType> {
        self.get(SUBSCRIPTION_TYPE)
            .or_else(|| self.get(DESTINATION_TYPE))
            .and_then(RoutingType::parse)
    }

    /// Ack mode carried in `ack`, if any.
    pub fn ack_mode(&self) -> Option<AckMode> {
        self.get(ACK).and_then(AckMode::parse)
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Headers(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for Headers {
    type Item = (String, String);
    type IntoIter = btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value:?}")?;
        }
        f.write_str("}")
    }
}
