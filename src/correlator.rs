//! Request/response correlation over one-way queues.
//!
//! Replies for service `S` and correlation id `C` travel on the queue
//! `queue/S.response.C`: the reply service is `"S.response"` and the
//! correlation id is its affinity. Each exchange therefore has a destination
//! of its own, and no registry of outstanding requests is needed.
//!
//! One exchange moves through
//!
//! ```text
//! IDLE --subscribe_response--> SUBSCRIBED --recv--> REPLY_RECEIVED --> UNSUBSCRIBED
//! ```
//!
//! [`PendingResponse::recv`] consumes the handle and runs
//! ack → decode → unsubscribe in that order, so an exchange can never return to
//! `SUBSCRIBED`. [`Correlator::receive_response`] hands the decoded reply to
//! its callback between decode and unsubscribe.
//!
//! A `PendingResponse` dropped before it finished (an aborted task, or a
//! `request` future cut short by an outer timeout) releases its subscription
//! in the background.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::codec::decode_body;
use crate::destination::{queue_for_publish, queue_for_subscribe};
use crate::headers::CORRELATION_ID;
use crate::macros::{log_debug, log_warn};
use crate::{
    // ---
    AddressOptions,
    Body,
    CorrelationId,
    Destination,
    LoggerPtr,
    Messenger,
    MessagingError,
    Result,
    SubscriptionHandle,
    TransportPtr,
};

/// Suffix appended to a service name to form its reply service.
pub const RESPONSE_SUFFIX: &str = "response";

/// Reply timeout used when none is configured.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Correlator configuration.
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// How long [`PendingResponse::recv`] waits for a reply.
    ///
    /// `None` waits indefinitely; the caller is then responsible for
    /// imposing a deadline and calling [`PendingResponse::cancel`].
    ///
    /// Default: 30 seconds
    pub reply_timeout: Option<Duration>,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Some(DEFAULT_REPLY_TIMEOUT),
        }
    }
}

impl CorrelatorConfig {
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    /// Wait for replies without a deadline.
    pub fn without_reply_timeout(mut self) -> Self {
        self.reply_timeout = None;
        self
    }
}

/// Builder for [`Correlator`].
///
/// # Example
///
/// ```no_run
/// use mom_messaging::{create_memory_transport, CorrelatorBuilder, TracingLogger};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> mom_messaging::Result<()> {
/// let transport = create_memory_transport("billing").await?;
///
/// let correlator = CorrelatorBuilder::new(transport)
///     .logger(Arc::new(TracingLogger))
///     .reply_timeout(Duration::from_secs(5))
///     .build();
/// # Ok(())
/// # }
/// ```
pub struct CorrelatorBuilder {
    // ---
    transport: TransportPtr,
    logger: Option<LoggerPtr>,
    config: CorrelatorConfig,
}

impl CorrelatorBuilder {
    /// Create a new builder with default configuration and no logging.
    pub fn new(transport: TransportPtr) -> Self {
        Self {
            transport,
            logger: None,
            config: CorrelatorConfig::default(),
        }
    }

    /// Logger that receives one line per published response.
    pub fn logger(mut self, logger: LoggerPtr) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Per-exchange reply timeout.
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.config.reply_timeout = Some(timeout);
        self
    }

    /// Wait for replies without a deadline.
    pub fn no_reply_timeout(mut self) -> Self {
        self.config.reply_timeout = None;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: CorrelatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Correlator {
        // ---
        let mut messenger = Messenger::new(self.transport);
        if let Some(logger) = self.logger {
            messenger = messenger.with_logger(logger);
        }

        Correlator {
            messenger,
            config: self.config,
        }
    }
}

/// Matches replies to requests using correlation-scoped reply queues.
///
/// Cheap to clone. Holds no per-exchange state, so one correlator can serve
/// any number of concurrent exchanges.
#[derive(Clone)]
pub struct Correlator {
    // ---
    messenger: Messenger,
    config: CorrelatorConfig,
}

impl Correlator {
    /// Correlator with default configuration and no logging.
    pub fn new(transport: TransportPtr) -> Self {
        CorrelatorBuilder::new(transport).build()
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// Publish the reply for `correlation_id`.
    ///
    /// Goes to `queue/<service>.response.<correlation_id>` with a
    /// `correlation_id` header. A `None` result is sent as an empty payload.
    /// Fire-and-forget: nothing is awaited beyond the transport publish.
    pub async fn send_response(
        &self,
        service: &str,
        correlation_id: &CorrelationId,
        result: Option<Body>,
    ) -> Result<()> {
        // ---
        let (destination, headers) = queue_for_publish(&response_options(service, correlation_id))?;
        let headers = headers.with(CORRELATION_ID, correlation_id);
        let body = result.unwrap_or_default();

        self.messenger.raw_publish(&destination, &body, headers).await
    }

    /// Open the reply subscription for `correlation_id`.
    ///
    /// Subscribe before the request is published so the reply cannot be
    /// missed, then call [`PendingResponse::recv`].
    pub async fn subscribe_response(
        &self,
        service: &str,
        correlation_id: &CorrelationId,
    ) -> Result<PendingResponse> {
        // ---
        let (destination, headers) =
            queue_for_subscribe(&response_options(service, correlation_id))?;

        let transport = self.messenger.transport().clone();
        let handle = transport.subscribe(&destination, headers).await?;
        log_debug!("{destination}: SUBSCRIBED for {correlation_id}");

        Ok(PendingResponse {
            transport,
            correlation_id: correlation_id.clone(),
            handle,
            reply_timeout: self.config.reply_timeout,
            released: false,
        })
    }

    /// Wait for the reply in the background and hand it to `on_reply`.
    ///
    /// The subscription is open when this returns. `on_reply` runs at most
    /// once, after the reply has been acked and decoded and before the
    /// subscription is released. The returned task resolves to the outcome
    /// of the exchange; on a [`MessagingError::DuplicateReply`] `on_reply`
    /// has already seen the first reply.
    pub async fn receive_response<F>(
        &self,
        service: &str,
        correlation_id: &CorrelationId,
        on_reply: F,
    ) -> Result<JoinHandle<Result<()>>>
    where
        F: FnOnce(Body) + Send + 'static,
    {
        // ---
        let mut pending = self.subscribe_response(service, correlation_id).await?;

        Ok(tokio::spawn(async move {
            let outcome = pending.await_reply().await;
            if let Ok(body) = &outcome {
                on_reply(body.clone());
            }
            pending.release(outcome).await.map(drop)
        }))
    }

    /// Publish a request and wait for its reply.
    ///
    /// A fresh correlation id is generated. The reply subscription is opened
    /// before the request is published. The responder is expected to answer
    /// with [`send_response`](Self::send_response) for the same service name.
    pub async fn request(&self, options: &AddressOptions, body: Body) -> Result<Body> {
        // ---
        let service = options
            .service
            .as_deref()
            .ok_or(MessagingError::MissingOption(crate::OptionKey::Service))?;

        let correlation_id = CorrelationId::generate();
        let pending = self.subscribe_response(service, &correlation_id).await?;

        if let Err(err) = self
            .messenger
            .publish_request(options, &correlation_id, body)
            .await
        {
            if let Err(_release) = pending.cancel().await {
                log_warn!("failed to release reply subscription: {_release}");
            }
            return Err(err);
        }

        pending.recv().await
    }
}

/// Addressing for the reply queue of one exchange.
pub fn response_options(service: &str, correlation_id: &CorrelationId) -> AddressOptions {
    AddressOptions::service(format!("{service}.{RESPONSE_SUFFIX}"))
        .with_affinity(correlation_id.as_str())
}

/// One open reply subscription awaiting exactly one message.
///
/// Dropping it without calling [`recv`](Self::recv) or
/// [`cancel`](Self::cancel) spawns the unsubscribe on the current tokio
/// runtime.
pub struct PendingResponse {
    // ---
    transport: TransportPtr,
    correlation_id: CorrelationId,
    handle: SubscriptionHandle,
    reply_timeout: Option<Duration>,
    released: bool,
}

impl PendingResponse {
    pub fn destination(&self) -> &Destination {
        &self.handle.destination
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Wait for the reply, ack it, decode it and unsubscribe.
    ///
    /// The subscription is released on every path, including timeout and
    /// decode failure.
    ///
    /// # Errors
    ///
    /// - [`MessagingError::Timeout`] if the reply timeout elapses.
    /// - [`MessagingError::Decode`] if a YAML-flagged reply does not parse.
    /// - [`MessagingError::CorrelationMismatch`] if the reply names another id.
    /// - [`MessagingError::DuplicateReply`] if further messages were delivered
    ///   to the reply destination before it was released.
    /// - [`MessagingError::Transport`] from ack or unsubscribe.
    pub async fn recv(mut self) -> Result<Body> {
        // ---
        let outcome = self.await_reply().await;
        self.release(outcome).await
    }

    /// Release the reply subscription without waiting for a reply.
    pub async fn cancel(mut self) -> Result<()> {
        // ---
        log_debug!("{}: cancelled for {}", self.handle.destination, self.correlation_id);
        let released = self.transport.unsubscribe(&self.handle.destination).await;
        self.released = true;
        released
    }

    // Drains, unsubscribes and folds any extra deliveries into `outcome`.
    async fn release(mut self, outcome: Result<Body>) -> Result<Body> {
        // ---
        let mut extra = self.drain_and_ack().await;
        let released = self.transport.unsubscribe(&self.handle.destination).await;
        self.released = true;
        log_debug!("{}: UNSUBSCRIBED", self.handle.destination);

        // Anything that slipped in between the drain and the release.
        while self.handle.inbox.try_recv().is_ok() {
            extra += 1;
        }

        if extra > 0 {
            log_warn!(
                "{}: {extra} unexpected message(s) for {}",
                self.handle.destination,
                self.correlation_id
            );
        }

        let body = outcome?;
        released?;

        if extra > 0 {
            return Err(MessagingError::DuplicateReply {
                destination: self.handle.destination.to_string(),
                extra,
                first: Box::new(body),
            });
        }

        Ok(body)
    }

    async fn await_reply(&mut self) -> Result<Body> {
        // ---
        let next = self.handle.inbox.recv();
        let received = match self.reply_timeout {
            Some(limit) => tokio::time::timeout(limit, next)
                .await
                .map_err(|_| MessagingError::Timeout)?,
            None => next.await,
        };

        let msg = received
            .ok_or_else(|| MessagingError::SubscriptionClosed(self.handle.destination.to_string()))?;

        self.transport.ack(&msg).await?;
        log_debug!("{}: REPLY_RECEIVED #{}", self.handle.destination, msg.id);

        if let Some(actual) = msg.headers.get(CORRELATION_ID) {
            if actual != self.correlation_id.as_str() {
                return Err(MessagingError::CorrelationMismatch {
                    expected: self.correlation_id.to_string(),
                    actual: actual.to_owned(),
                });
            }
        }

        decode_body(&msg.headers, msg.body)
    }

    // Acks whatever is already queued behind the reply and returns how many.
    async fn drain_and_ack(&mut self) -> usize {
        // ---
        let mut count = 0;
        while let Ok(msg) = self.handle.inbox.try_recv() {
            count += 1;
            if let Err(_err) = self.transport.ack(&msg).await {
                log_warn!("{}: failed to ack duplicate #{}: {_err}", msg.destination, msg.id);
            }
        }
        count
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        // ---
        if self.released {
            return;
        }

        let transport = self.transport.clone();
        let destination = self.handle.destination.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                log_debug!("{destination}: dropped while SUBSCRIBED, releasing");
                runtime.spawn(async move {
                    if let Err(_err) = transport.unsubscribe(&destination).await {
                        log_warn!("{destination}: release after drop failed: {_err}");
                    }
                });
            }
            Err(_) => {
                log_warn!("{destination}: dropped outside a runtime, subscription not released");
            }
        }
    }
}
