//! Broker client contract.
//!
//! This module defines the capability set that the addressing and correlation
//! layers require from a broker client. It intentionally avoids any reference
//! to concrete protocols, brokers, or client libraries.
//!
//! The transport is responsible only for delivering messages to subscribed
//! consumers and for honoring acknowledgements. Destination naming, body
//! encoding and request/response correlation are handled elsewhere.
//!
//! The crate ships one implementation, the in-memory hub.
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{Headers, Result};

/// A broker destination.
///
/// Either `queue/<service>.<affinity>` or `topic/<service>`, as produced by
/// the destination builders. The string is opaque to the transport; matching
/// is by exact equality.
///
/// Destinations are immutable, cheap to clone, and safe to share across
/// threads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination(pub Arc<str>);

impl Destination {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Destination
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Destination(value.into())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message delivered by the transport to a subscriber.
///
/// `id` is assigned by the transport and is what [`Transport::ack`] uses to
/// identify the delivery. The body is carried as the encoded text payload;
/// use [`decode_body`](crate::decode_body) to recover the original value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    // ---
    /// Transport-assigned delivery identifier.
    pub id: u64,

    /// Destination the message was published to.
    pub destination: Destination,

    /// Headers the publisher attached.
    pub headers: Headers,

    /// Encoded payload.
    pub body: String,
}

/// An open subscription.
///
/// The subscription remains active until [`Transport::unsubscribe`] is called
/// for its destination or the transport is closed; either closes `inbox`
/// once already-delivered messages have been drained.
pub struct SubscriptionHandle {
    // ---
    /// Destination this handle is subscribed to.
    pub destination: Destination,

    /// Receiver channel for delivered messages.
    ///
    /// Unbounded so that delivery never waits on a slow consumer while the
    /// transport holds its routing state.
    pub inbox: mpsc::UnboundedReceiver<Message>,
}

/// What the addressing and correlation layers need from a broker client.
///
/// Implementations must ensure that:
/// - A message published to a destination after `subscribe()` has returned
///   for it can reach the returned handle.
/// - When the subscription headers request `ack = client`, a delivered message
///   stays outstanding until `ack()` is called for it.
/// - Errors are reported, never swallowed; this crate does not retry.
///
/// See [`MemoryHub`](crate::MemoryHub) for a complete in-process example.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Identifier of this transport instance, used for logging.
    fn transport_id(&self) -> &str;

    /// Publish an encoded body with the given headers.
    async fn publish(&self, destination: &Destination, body: String, headers: Headers)
        -> Result<()>;

    /// Subscribe to a destination.
    async fn subscribe(
        &self,
        destination: &Destination,
        headers: Headers,
    ) -> Result<SubscriptionHandle>;

    /// Acknowledge a delivered message.
    async fn ack(&self, message: &Message) -> Result<()>;

    /// Release every subscription this transport holds on `destination`.
    async fn unsubscribe(&self, destination: &Destination) -> Result<()>;

    /// Release all subscriptions; later calls fail.
    async fn close(&self) -> Result<()>;
}

/// Reference-counted handle to a transport; clones share one connection.
pub type TransportPtr = Arc<dyn Transport>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_destination_serializes_as_plain_string() {
        // ---
        let destination = Destination::from("queue/svc.response.corr1");

        let yaml = serde_yaml::to_string(&destination).unwrap();
        assert_eq!(yaml.trim(), "queue/svc.response.corr1");

        let back: Destination = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, destination);
    }
}
