//! Destination and header construction for queues and topics.
//!
//! Every builder takes an [`AddressOptions`] and returns the broker
//! destination together with the headers to publish or subscribe with. The
//! builders are pure: they validate eagerly and never touch a transport.
//!
//! | builder                | destination                  | routing   |
//! |------------------------|------------------------------|-----------|
//! | [`queue_for_publish`]  | `queue/<service>.<affinity>` | ANYCAST   |
//! | [`queue_for_subscribe`]| `queue/<service>.<affinity>` | ANYCAST   |
//! | [`topic_for_publish`]  | `topic/<service>`            | MULTICAST |
//! | [`topic_for_subscribe`]| `topic/<service>`            | MULTICAST |

use std::fmt;

use crate::headers::{
    //
    ACK,
    DESTINATION_TYPE,
    DURABLE_SUBSCRIPTION_NAME,
    EXPIRES,
    PRIORITY,
    SCHEDULED_TIME,
    SUBSCRIPTION_TYPE,
};
use crate::{AckMode, Destination, Headers, MessagingError, Result, RoutingType};

/// Affinity used when the caller does not supply one.
pub const DEFAULT_AFFINITY: &str = "none";

/// Names of the recognised option keys, used in configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    Service,
    Affinity,
    ExpiresOn,
    DeliverOn,
    Priority,
    PersistRef,
}

impl OptionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKey::Service => "service",
            OptionKey::Affinity => "affinity",
            OptionKey::ExpiresOn => "expires_on",
            OptionKey::DeliverOn => "deliver_on",
            OptionKey::Priority => "priority",
            OptionKey::PersistRef => "persist_ref",
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressing options for a single publish or subscribe.
///
/// All fields are optional at the type level; builders check the ones they
/// require and fail with [`MessagingError::MissingOption`].
///
/// # Example
///
/// ```
/// use mom_messaging::{queue_for_publish, AddressOptions};
///
/// let opts = AddressOptions::service("inventory")
///     .with_affinity("region-7")
///     .with_expires_on(1_700_000_000);
///
/// let (destination, headers) = queue_for_publish(&opts)?;
/// assert_eq!(destination.as_str(), "queue/inventory.region-7");
/// assert_eq!(headers.get("expires"), Some("1700000000000"));
/// # Ok::<(), mom_messaging::MessagingError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressOptions {
    // ---
    /// Logical service name. Required by every builder.
    pub service: Option<String>,

    /// Partition key for queues. Defaults to [`DEFAULT_AFFINITY`]; ignored
    /// by topics.
    pub affinity: Option<String>,

    /// Expiry time, epoch seconds.
    pub expires_on: Option<i64>,

    /// Scheduled delivery time, epoch seconds.
    pub deliver_on: Option<i64>,

    /// Message priority.
    pub priority: Option<u8>,

    /// Durable subscription name for topic subscribers.
    pub persist_ref: Option<String>,
}

impl AddressOptions {
    /// Options with only the service set.
    pub fn service(service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            ..Self::default()
        }
    }

    pub fn with_affinity(mut self, affinity: impl Into<String>) -> Self {
        self.affinity = Some(affinity.into());
        self
    }

    pub fn with_expires_on(mut self, epoch_secs: i64) -> Self {
        self.expires_on = Some(epoch_secs);
        self
    }

    pub fn with_deliver_on(mut self, epoch_secs: i64) -> Self {
        self.deliver_on = Some(epoch_secs);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_persist_ref(mut self, persist_ref: impl Into<String>) -> Self {
        self.persist_ref = Some(persist_ref.into());
        self
    }

    /// Affinity in effect: the caller's, or [`DEFAULT_AFFINITY`].
    pub fn effective_affinity(&self) -> &str {
        self.affinity.as_deref().unwrap_or(DEFAULT_AFFINITY)
    }

    fn is_set(&self, key: OptionKey) -> bool {
        match key {
            OptionKey::Service => self.service.is_some(),
            OptionKey::Affinity => self.affinity.is_some(),
            OptionKey::ExpiresOn => self.expires_on.is_some(),
            OptionKey::DeliverOn => self.deliver_on.is_some(),
            OptionKey::Priority => self.priority.is_some(),
            OptionKey::PersistRef => self.persist_ref.is_some(),
        }
    }

    fn required_service(&self) -> Result<&str> {
        self.service
            .as_deref()
            .ok_or(MessagingError::MissingOption(OptionKey::Service))
    }
}

/// Check that every key in `keys` is set.
///
/// Fails with the first missing key, in the order given.
pub fn assert_options(options: &AddressOptions, keys: &[OptionKey]) -> Result<()> {
    // ---
    match keys.iter().find(|key| !options.is_set(**key)) {
        Some(key) => Err(MessagingError::MissingOption(*key)),
        None => Ok(()),
    }
}

/// Destination and headers for publishing to an affinity-scoped queue.
pub fn queue_for_publish(options: &AddressOptions) -> Result<(Destination, Headers)> {
    // ---
    let destination = queue_destination(options)?;
    let headers = publish_headers(options, RoutingType::Anycast);

    Ok((destination, headers))
}

/// Destination and headers for consuming from an affinity-scoped queue.
///
/// Subscribers always ack explicitly.
pub fn queue_for_subscribe(options: &AddressOptions) -> Result<(Destination, Headers)> {
    // ---
    let destination = queue_destination(options)?;
    let headers = subscribe_headers(RoutingType::Anycast);

    Ok((destination, headers))
}

/// Destination and headers for broadcasting on a topic.
pub fn topic_for_publish(options: &AddressOptions) -> Result<(Destination, Headers)> {
    // ---
    let destination = topic_destination(options)?;
    let headers = publish_headers(options, RoutingType::Multicast);

    Ok((destination, headers))
}

/// Destination and headers for subscribing to a topic.
///
/// A `persist_ref` turns the subscription into a named durable one.
pub fn topic_for_subscribe(options: &AddressOptions) -> Result<(Destination, Headers)> {
    // ---
    let destination = topic_destination(options)?;
    let mut headers = subscribe_headers(RoutingType::Multicast);
    if let Some(persist_ref) = &options.persist_ref {
        headers.insert(DURABLE_SUBSCRIPTION_NAME, persist_ref);
    }

    Ok((destination, headers))
}

fn queue_destination(options: &AddressOptions) -> Result<Destination> {
    let service = options.required_service()?;
    Ok(Destination::from(format!(
        "queue/{service}.{}",
        options.effective_affinity()
    )))
}

fn topic_destination(options: &AddressOptions) -> Result<Destination> {
    let service = options.required_service()?;
    Ok(Destination::from(format!("topic/{service}")))
}

fn publish_headers(options: &AddressOptions, routing: RoutingType) -> Headers {
    // ---
    let mut headers = Headers::new().with(DESTINATION_TYPE, routing);
    if let Some(expires_on) = options.expires_on {
        headers.insert(EXPIRES, epoch_millis(expires_on));
    }
    if let Some(deliver_on) = options.deliver_on {
        headers.insert(SCHEDULED_TIME, epoch_millis(deliver_on));
    }
    if let Some(priority) = options.priority {
        headers.insert(PRIORITY, priority);
    }
    headers
}

fn subscribe_headers(routing: RoutingType) -> Headers {
    Headers::new()
        .with(SUBSCRIPTION_TYPE, routing)
        .with(ACK, AckMode::Client)
}

// Saturates instead of overflowing for far-future timestamps.
fn epoch_millis(epoch_secs: i64) -> i64 {
    epoch_secs.saturating_mul(1000)
}
