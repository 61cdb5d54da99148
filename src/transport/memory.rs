//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, local execution,
//! and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - Destinations match by exact string equality.
//! - Anycast (queue) messages go to exactly one subscriber, round-robin.
//!   While a queue has no subscriber its messages are retained and handed to
//!   the next one that subscribes.
//! - Multicast (topic) messages go to every current subscriber. A durable
//!   subscription (`durable-subscription-name`) that unsubscribes keeps a
//!   backlog which is replayed when the same name subscribes again.
//! - Subscriptions made with `ack = client` track each delivery until it is
//!   acked. Acking an unknown or already-acked delivery is an error.
//! - Delivery happens synchronously inside `publish()`, under the hub lock,
//!   so nothing reaches a subscription after `unsubscribe()` has returned.
//!
//! ## Non-Goals
//!
//! Expiry, scheduled delivery, priority ordering and redelivery of unacked
//! messages are recorded in headers but not enforced. This transport does not
//! attempt to emulate any specific broker.
//!
//! Retained queue messages never expire. A late or duplicate reply to a
//! one-shot reply queue stays in the hub until [`MemoryHub::purge`] drops it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tokio::sync::mpsc;

use crate::headers::{DESTINATION_TYPE, DURABLE_SUBSCRIPTION_NAME};
use crate::macros::{log_debug, log_trace};
use crate::{
    // ---
    AckMode,
    Destination,
    Headers,
    Message,
    MessagingError,
    Result,
    RoutingType,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};

struct Subscriber {
    // ---
    id: u64,
    transport_id: Arc<str>,
    routing: RoutingType,
    ack: AckMode,
    durable_name: Option<String>,
    tx: mpsc::UnboundedSender<Message>,
}

struct Outstanding {
    transport_id: Arc<str>,
    subscriber_id: u64,
}

#[derive(Default)]
struct HubState {
    // ---
    next_message_id: u64,
    next_subscriber_id: u64,
    subscriptions: HashMap<Destination, Vec<Subscriber>>,
    cursors: HashMap<Destination, usize>,

    // Anycast messages published while a queue had no subscriber.
    retained: HashMap<Destination, VecDeque<Message>>,

    // Backlogs of detached durable subscriptions, keyed by destination and name.
    durable: HashMap<(Destination, String), VecDeque<Message>>,

    // Client-ack deliveries awaiting ack, keyed by message id.
    outstanding: HashMap<u64, Outstanding>,
}

impl HubState {
    fn deliver(&mut self, subscriber_index: usize, destination: &Destination, msg: Message) {
        // ---
        let Some(subscriber) = self
            .subscriptions
            .get(destination)
            .and_then(|subs| subs.get(subscriber_index))
        else {
            return;
        };

        if subscriber.ack == AckMode::Client {
            self.outstanding.insert(
                msg.id,
                Outstanding {
                    transport_id: subscriber.transport_id.clone(),
                    subscriber_id: subscriber.id,
                },
            );
        }

        // A closed receiver means the handle was dropped without
        // unsubscribing; the message is lost along with it.
        if subscriber.tx.send(msg).is_err() {
            log_trace!("{}: inbox dropped for {destination}", subscriber.transport_id);
        }
    }

    fn next_anycast(&mut self, destination: &Destination) -> Option<usize> {
        // ---
        let subs = self.subscriptions.get(destination)?;
        let candidates: Vec<usize> = subs
            .iter()
            .enumerate()
            .filter(|(_, s)| s.routing == RoutingType::Anycast)
            .map(|(i, _)| i)
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let cursor = self.cursors.entry(destination.clone()).or_insert(0);
        let chosen = candidates[*cursor % candidates.len()];
        *cursor = cursor.wrapping_add(1);
        Some(chosen)
    }
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a message broker within a single process. All memory transports
/// that share a `MemoryHub` can publish and receive each other's messages,
/// exactly as clients connected to a real broker would.
///
/// For tests that need isolation between parallel test cases, construct a hub
/// explicitly and pass it to [`create_memory_transport_with_hub`]:
///
/// ```
/// # async fn example() -> mom_messaging::Result<()> {
/// use mom_messaging::{create_memory_transport_with_hub, MemoryHub};
///
/// let hub = MemoryHub::new();
/// let responder = create_memory_transport_with_hub("responder", hub.clone()).await?;
/// let requester = create_memory_transport_with_hub("requester", hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    state: Mutex<HubState>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    /// Number of live subscriptions on `destination`, across all transports.
    pub fn subscriber_count(&self, destination: &Destination) -> usize {
        // ---
        self.lock()
            .subscriptions
            .get(destination)
            .map_or(0, Vec::len)
    }

    /// Number of client-ack deliveries not yet acked.
    pub fn unacked_count(&self) -> usize {
        self.lock().outstanding.len()
    }

    /// Number of queue messages waiting for a subscriber on `destination`.
    pub fn retained_count(&self, destination: &Destination) -> usize {
        // ---
        self.lock()
            .retained
            .get(destination)
            .map_or(0, VecDeque::len)
    }

    /// Drop the queue messages retained on `destination` and return how many
    /// there were. Live subscriptions are untouched.
    pub fn purge(&self, destination: &Destination) -> usize {
        // ---
        let dropped = self
            .lock()
            .retained
            .remove(destination)
            .map_or(0, |backlog| backlog.len());
        log_debug!("{destination}: purged {dropped} retained message(s)");
        dropped
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        lock_ignore_poison(&self.state)
    }

    fn publish(
        &self,
        transport_id: &str,
        destination: &Destination,
        body: String,
        headers: Headers,
    ) -> Result<()> {
        // ---
        let routing = headers
            .get(DESTINATION_TYPE)
            .and_then(RoutingType::parse)
            .unwrap_or_else(|| routing_for(destination));

        let mut state = self.lock();
        state.next_message_id += 1;
        let msg = Message {
            id: state.next_message_id,
            destination: destination.clone(),
            headers,
            body,
        };

        log_trace!("{transport_id}: publish #{} to {destination} ({routing})", msg.id);

        match routing {
            RoutingType::Anycast => match state.next_anycast(destination) {
                Some(index) => state.deliver(index, destination, msg),
                None => {
                    log_debug!("{transport_id}: no subscriber on {destination}, retaining");
                    state
                        .retained
                        .entry(destination.clone())
                        .or_default()
                        .push_back(msg);
                }
            },
            RoutingType::Multicast => {
                let targets: Vec<usize> = state
                    .subscriptions
                    .get(destination)
                    .map(|subs| {
                        subs.iter()
                            .enumerate()
                            .filter(|(_, s)| s.routing == RoutingType::Multicast)
                            .map(|(i, _)| i)
                            .collect()
                    })
                    .unwrap_or_default();

                for (key, backlog) in state.durable.iter_mut() {
                    if &key.0 == destination {
                        backlog.push_back(msg.clone());
                    }
                }

                for (n, index) in targets.into_iter().enumerate() {
                    let mut copy = msg.clone();
                    if n > 0 {
                        state.next_message_id += 1;
                        copy.id = state.next_message_id;
                    }
                    state.deliver(index, destination, copy);
                }
            }
        }

        Ok(())
    }

    fn subscribe(
        &self,
        transport_id: &Arc<str>,
        destination: &Destination,
        headers: &Headers,
    ) -> SubscriptionHandle {
        // ---
        let routing = headers
            .routing_type()
            .unwrap_or_else(|| routing_for(destination));
        let ack = headers.ack_mode().unwrap_or(AckMode::Auto);
        let durable_name = match routing {
            RoutingType::Multicast => headers.get(DURABLE_SUBSCRIPTION_NAME).map(str::to_owned),
            RoutingType::Anycast => None,
        };

        log_debug!("{transport_id}: subscribe to {destination} ({routing}, ack={ack})");

        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.lock();
        state.next_subscriber_id += 1;
        let subscriber = Subscriber {
            id: state.next_subscriber_id,
            transport_id: transport_id.clone(),
            routing,
            ack,
            durable_name: durable_name.clone(),
            tx,
        };

        let subs = state.subscriptions.entry(destination.clone()).or_default();
        subs.push(subscriber);
        let index = subs.len() - 1;

        let pending: Vec<Message> = match (routing, durable_name) {
            (RoutingType::Anycast, _) => state
                .retained
                .remove(destination)
                .map(Vec::from)
                .unwrap_or_default(),
            (RoutingType::Multicast, Some(name)) => state
                .durable
                .remove(&(destination.clone(), name))
                .map(Vec::from)
                .unwrap_or_default(),
            (RoutingType::Multicast, None) => Vec::new(),
        };

        for mut msg in pending {
            // Backlog copies get fresh ids so acks stay unambiguous.
            state.next_message_id += 1;
            msg.id = state.next_message_id;
            state.deliver(index, destination, msg);
        }

        SubscriptionHandle {
            destination: destination.clone(),
            inbox: rx,
        }
    }

    fn ack(&self, transport_id: &str, msg: &Message) -> Result<()> {
        // ---
        let mut state = self.lock();
        let owner = state
            .outstanding
            .get(&msg.id)
            .map(|entry| entry.transport_id.clone());

        match owner {
            Some(owner) if owner.as_ref() == transport_id => {
                state.outstanding.remove(&msg.id);
                log_trace!("{transport_id}: ack #{}", msg.id);
                Ok(())
            }
            Some(_) => Err(MessagingError::Transport(format!(
                "message #{} on {} was not delivered to {transport_id}",
                msg.id, msg.destination
            ))),
            None => Err(MessagingError::Transport(format!(
                "message #{} on {} is not awaiting ack",
                msg.id, msg.destination
            ))),
        }
    }

    fn unsubscribe(&self, transport_id: &str, destination: &Destination) {
        // ---
        let mut state = self.lock();
        let Some(subs) = state.subscriptions.remove(destination) else {
            return;
        };

        let (removed, kept): (Vec<Subscriber>, Vec<Subscriber>) = subs
            .into_iter()
            .partition(|s| s.transport_id.as_ref() == transport_id);

        if !kept.is_empty() {
            state.subscriptions.insert(destination.clone(), kept);
        }

        for subscriber in removed {
            log_debug!("{transport_id}: unsubscribe from {destination}");
            state
                .outstanding
                .retain(|_, o| o.subscriber_id != subscriber.id);
            if let Some(name) = subscriber.durable_name {
                state
                    .durable
                    .entry((destination.clone(), name))
                    .or_default();
            }
            // Dropping `subscriber.tx` closes the inbox once drained.
        }
    }

    fn detach_all(&self, transport_id: &str) {
        // ---
        let destinations: Vec<Destination> = self
            .lock()
            .subscriptions
            .iter()
            .filter(|(_, subs)| subs.iter().any(|s| s.transport_id.as_ref() == transport_id))
            .map(|(dest, _)| dest.clone())
            .collect();

        for destination in destinations {
            self.unsubscribe(transport_id, &destination);
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            state: Mutex::new(HubState::default()),
        }
    }
}

fn routing_for(destination: &Destination) -> RoutingType {
    if destination.as_str().starts_with("topic/") {
        RoutingType::Multicast
    } else {
        RoutingType::Anycast
    }
}

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes messages through a shared [`MemoryHub`]. Multiple transport
/// instances sharing the same hub can publish and receive each other's
/// messages.
struct MemoryTransport {
    // ---
    transport_id: Arc<str>,
    hub: Arc<MemoryHub>,
    closed: AtomicBool,
}

impl MemoryTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MessagingError::Transport(format!(
                "{}: transport closed",
                self.transport_id
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    async fn publish(
        &self,
        destination: &Destination,
        body: String,
        headers: Headers,
    ) -> Result<()> {
        self.ensure_open()?;
        self.hub
            .publish(&self.transport_id, destination, body, headers)
    }

    async fn subscribe(
        &self,
        destination: &Destination,
        headers: Headers,
    ) -> Result<SubscriptionHandle> {
        self.ensure_open()?;
        Ok(self.hub.subscribe(&self.transport_id, destination, &headers))
    }

    async fn ack(&self, message: &Message) -> Result<()> {
        self.ensure_open()?;
        self.hub.ack(&self.transport_id, message)
    }

    async fn unsubscribe(&self, destination: &Destination) -> Result<()> {
        self.ensure_open()?;
        self.hub.unsubscribe(&self.transport_id, destination);
        Ok(())
    }

    /// Close the transport.
    ///
    /// Releases this transport's subscriptions only; other transports on the
    /// same hub are unaffected. Every later call fails.
    async fn close(&self) -> Result<()> {
        // ---
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log_debug!("{}: closing transport...", self.transport_id);
        self.hub.detach_all(&self.transport_id);
        Ok(())
    }
}

/// Create a new in-memory transport using the process-global hub.
///
/// All transports created with this function share a single message bus,
/// matching the semantics of clients connected to one broker.
///
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport(transport_id: impl Into<String>) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(transport_id, global_hub()).await
}

/// Create a new in-memory transport attached to `hub`.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    transport_id: impl Into<String>,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    let transport_id: Arc<str> = Arc::from(transport_id.into());
    log_debug!("{transport_id}: create memory transport");

    Ok(Arc::new(MemoryTransport {
        transport_id,
        hub,
        closed: AtomicBool::new(false),
    }))
}
