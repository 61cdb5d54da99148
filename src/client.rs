//! Queue and topic messaging on top of a [`Transport`](crate::Transport).
//!
//! [`Messenger`] turns addressing options and a [`Body`] into a publish, and a
//! subscription into an [`Inbox`] of acked, decoded deliveries. Every publish
//! is reported to the injected [`Logger`](crate::Logger).

use crate::codec::{decode_body, encode_body};
use crate::destination::{
    //
    queue_for_publish,
    queue_for_subscribe,
    topic_for_publish,
    topic_for_subscribe,
};
use crate::headers::CORRELATION_ID;
use crate::logger::null_logger;
use crate::macros::log_debug;
use crate::{
    // ---
    AddressOptions,
    Body,
    CorrelationId,
    Destination,
    Headers,
    LoggerPtr,
    Result,
    SubscriptionHandle,
    TransportPtr,
};

/// Publishes and subscribes by service name rather than raw destination.
///
/// Cheap to clone; clones share the transport and logger.
///
/// # Example
///
/// ```
/// # async fn example() -> mom_messaging::Result<()> {
/// use mom_messaging::{create_memory_transport, AddressOptions, Body, Messenger};
///
/// let transport = create_memory_transport("inventory-worker").await?;
/// let messenger = Messenger::new(transport);
///
/// let opts = AddressOptions::service("inventory").with_affinity("region-7");
/// let mut inbox = messenger.subscribe_messages(&opts).await?;
///
/// messenger.publish_message(&opts, Body::from("refresh")).await?;
///
/// if let Some(delivery) = inbox.next().await {
///     assert_eq!(delivery?.body, Body::from("refresh"));
/// }
/// inbox.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Messenger {
    // ---
    transport: TransportPtr,
    logger: LoggerPtr,
}

impl Messenger {
    /// Create a messenger that logs nowhere.
    pub fn new(transport: TransportPtr) -> Self {
        Self {
            transport,
            logger: null_logger(),
        }
    }

    /// Replace the publish logger.
    pub fn with_logger(mut self, logger: LoggerPtr) -> Self {
        self.logger = logger;
        self
    }

    pub fn transport(&self) -> &TransportPtr {
        &self.transport
    }

    pub fn logger(&self) -> &LoggerPtr {
        &self.logger
    }

    /// Encode `body`, publish it to `destination`, then log the publish.
    ///
    /// The logged headers include `encoding` when the body was structured.
    pub async fn raw_publish(
        &self,
        destination: &Destination,
        body: &Body,
        mut headers: Headers,
    ) -> Result<()> {
        // ---
        let raw = encode_body(&mut headers, body)?;
        self.transport
            .publish(destination, raw, headers.clone())
            .await?;

        self.logger.info(&format!(
            "Address({destination}), msg({body:?}), headers({headers})"
        ));
        Ok(())
    }

    /// Publish to the affinity-scoped queue named by `options`.
    pub async fn publish_message(&self, options: &AddressOptions, body: Body) -> Result<()> {
        // ---
        let (destination, headers) = queue_for_publish(options)?;
        self.raw_publish(&destination, &body, headers).await
    }

    /// Publish a request to a queue, tagged with `correlation_id`.
    ///
    /// The responder answers with
    /// [`Correlator::send_response`](crate::Correlator::send_response) using
    /// the same id.
    pub async fn publish_request(
        &self,
        options: &AddressOptions,
        correlation_id: &CorrelationId,
        body: Body,
    ) -> Result<()> {
        // ---
        let (destination, headers) = queue_for_publish(options)?;
        let headers = headers.with(CORRELATION_ID, correlation_id);
        self.raw_publish(&destination, &body, headers).await
    }

    /// Broadcast on the topic named by `options`.
    pub async fn publish_topic(&self, options: &AddressOptions, body: Body) -> Result<()> {
        // ---
        let (destination, headers) = topic_for_publish(options)?;
        self.raw_publish(&destination, &body, headers).await
    }

    /// Consume from the affinity-scoped queue named by `options`.
    pub async fn subscribe_messages(&self, options: &AddressOptions) -> Result<Inbox> {
        // ---
        let (destination, headers) = queue_for_subscribe(options)?;
        self.open_inbox(&destination, headers).await
    }

    /// Subscribe to the topic named by `options`; durable when `persist_ref`
    /// is set.
    pub async fn subscribe_topic(&self, options: &AddressOptions) -> Result<Inbox> {
        // ---
        let (destination, headers) = topic_for_subscribe(options)?;
        self.open_inbox(&destination, headers).await
    }

    async fn open_inbox(&self, destination: &Destination, headers: Headers) -> Result<Inbox> {
        // ---
        let handle = self.transport.subscribe(destination, headers).await?;
        log_debug!("{}: inbox open on {destination}", self.transport.transport_id());

        Ok(Inbox {
            transport: self.transport.clone(),
            handle,
        })
    }
}

/// A decoded message taken from an [`Inbox`].
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub headers: Headers,
    pub body: Body,
}

impl Delivery {
    /// Correlation id carried by the message, if any.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.headers.get(CORRELATION_ID).map(CorrelationId::from)
    }
}

/// An open subscription yielding acked and decoded deliveries.
///
/// Call [`close`](Inbox::close) to unsubscribe; dropping the inbox only stops
/// reading, the subscription stays registered with the transport.
pub struct Inbox {
    // ---
    transport: TransportPtr,
    handle: SubscriptionHandle,
}

impl Inbox {
    pub fn destination(&self) -> &Destination {
        &self.handle.destination
    }

    /// Wait for the next delivery.
    ///
    /// Each message is acked before it is decoded, so a payload that fails to
    /// decode is still consumed and reported as an error. Returns `None` once
    /// the subscription has been released.
    pub async fn next(&mut self) -> Option<Result<Delivery>> {
        // ---
        let msg = self.handle.inbox.recv().await?;

        if let Err(err) = self.transport.ack(&msg).await {
            return Some(Err(err));
        }

        Some(decode_body(&msg.headers, msg.body).map(|body| Delivery {
            headers: msg.headers,
            body,
        }))
    }

    /// Unsubscribe from the destination.
    pub async fn close(self) -> Result<()> {
        // ---
        self.transport.unsubscribe(&self.handle.destination).await
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{create_memory_transport_with_hub, MemoryHub, MemoryLogger, MessagingError};

    #[tokio::test]
    async fn test_publish_message_logs_address_body_and_headers() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_memory_transport_with_hub("logger-test", hub).await.unwrap();
        let logger = MemoryLogger::new();
        let messenger = Messenger::new(transport).with_logger(logger.clone());

        messenger
            .publish_message(&AddressOptions::service("foo").with_affinity("bar"), "hi".into())
            .await
            .unwrap();

        assert_eq!(
            logger.lines(),
            vec![r#"Address(queue/foo.bar), msg(Text("hi")), headers({destination-type: "ANYCAST"})"#]
        );
    }

    #[tokio::test]
    async fn test_inbox_acks_and_decodes_structured_bodies() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_memory_transport_with_hub("inbox-test", hub.clone())
            .await
            .unwrap();
        let messenger = Messenger::new(transport);
        let opts = AddressOptions::service("orders");

        let mut inbox = messenger.subscribe_messages(&opts).await.unwrap();
        assert_eq!(inbox.destination().as_str(), "queue/orders.none");

        let body = Body::structured(&vec![1, 2, 3]).unwrap();
        messenger.publish_message(&opts, body.clone()).await.unwrap();

        let delivery = inbox.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, body);
        assert_eq!(delivery.headers.get("encoding"), Some("yaml"));
        assert_eq!(hub.unacked_count(), 0);

        inbox.close().await.unwrap();
        assert_eq!(hub.subscriber_count(&Destination::from("queue/orders.none")), 0);
    }

    #[tokio::test]
    async fn test_publish_request_carries_correlation_id() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_memory_transport_with_hub("request-test", hub).await.unwrap();
        let messenger = Messenger::new(transport);
        let opts = AddressOptions::service("math");

        let mut inbox = messenger.subscribe_messages(&opts).await.unwrap();
        let id = CorrelationId::from("req-9");
        messenger
            .publish_request(&opts, &id, "add 2 3".into())
            .await
            .unwrap();

        let delivery = inbox.next().await.unwrap().unwrap();
        assert_eq!(delivery.correlation_id(), Some(id));
    }

    #[tokio::test]
    async fn test_topic_subscribers_all_receive() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_memory_transport_with_hub("topic-test", hub).await.unwrap();
        let messenger = Messenger::new(transport);
        let opts = AddressOptions::service("alerts");

        let mut first = messenger.subscribe_topic(&opts).await.unwrap();
        let mut second = messenger.subscribe_topic(&opts).await.unwrap();

        messenger.publish_topic(&opts, "fire".into()).await.unwrap();

        assert_eq!(first.next().await.unwrap().unwrap().body, Body::from("fire"));
        assert_eq!(second.next().await.unwrap().unwrap().body, Body::from("fire"));
    }

    #[tokio::test]
    async fn test_missing_service_fails_before_transport() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_memory_transport_with_hub("validation-test", hub.clone())
            .await
            .unwrap();
        let logger = MemoryLogger::new();
        let messenger = Messenger::new(transport).with_logger(logger.clone());

        let err = messenger
            .publish_message(&AddressOptions::default(), "x".into())
            .await
            .unwrap_err();

        assert!(matches!(err, MessagingError::MissingOption(_)));
        assert!(logger.lines().is_empty());
        assert_eq!(hub.retained_count(&Destination::from("queue/.none")), 0);
    }
}
