//! Addressing, body encoding and request/response correlation over
//! publish/subscribe brokers.
//!
//! This library sits between application code and a broker client that
//! implements [`Transport`]. It turns "send to service X with affinity Y" or
//! "broadcast on topic Z" into broker destinations and header sets, encodes
//! structured bodies as YAML, and layers request/response correlation on top
//! of one-way queues.
//!
//! - [`queue_for_publish`], [`queue_for_subscribe`], [`topic_for_publish`],
//!   [`topic_for_subscribe`] build `(Destination, Headers)` pairs.
//! - [`encode_body`] / [`decode_body`] convert between [`Body`] and payloads.
//! - [`Correlator`] sends and awaits replies on correlation-scoped queues.
//! - [`Messenger`] publishes and subscribes by service name.
//!
//! # Example
//!
//! ```
//! use mom_messaging::{create_memory_transport, Body, CorrelationId, Correlator};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mom_messaging::Result<()> {
//! let transport = create_memory_transport("doc-example").await?;
//! let correlator = Correlator::new(transport);
//! let id = CorrelationId::generate();
//!
//! let pending = correlator.subscribe_response("billing", &id).await?;
//! correlator
//!     .send_response("billing", &id, Some(Body::from("paid")))
//!     .await?;
//!
//! assert_eq!(pending.recv().await?, Body::from("paid"));
//! # Ok(())
//! # }
//! ```

mod macros;

mod client;
mod codec;
mod correlation;
mod correlator;
mod destination;
mod domain;
mod error;
pub mod headers;
mod logger;
mod transport;

pub use client::{Delivery, Inbox, Messenger};
pub use codec::{decode_body, encode_body, Body, YAML_ENCODING};
pub use correlation::CorrelationId;
pub use correlator::{
    //
    response_options,
    Correlator,
    CorrelatorBuilder,
    CorrelatorConfig,
    PendingResponse,
    DEFAULT_REPLY_TIMEOUT,
    RESPONSE_SUFFIX,
};
pub use destination::{
    //
    assert_options,
    queue_for_publish,
    queue_for_subscribe,
    topic_for_publish,
    topic_for_subscribe,
    AddressOptions,
    OptionKey,
    DEFAULT_AFFINITY,
};
pub use error::{MessagingError, Result};
pub use headers::{AckMode, Headers, RoutingType};
pub use logger::{Logger, LoggerPtr, MemoryLogger, NullLogger, TracingLogger};

pub use transport::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    MemoryHub,
};

// --- public re-exports
pub use domain::{
    //
    Destination,
    Message,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};
