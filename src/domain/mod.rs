//! Types shared between the messaging layers and any broker client.
//!
//! Nothing here knows about a particular broker; the in-memory hub and
//! external clients both implement [`Transport`].

mod transport;

pub use transport::{
    //
    Destination,
    Message,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};
