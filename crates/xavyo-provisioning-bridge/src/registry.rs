//! Reply channel registry.
//!
//! Each reply channel gets exactly one long-lived receiver. The receiver owns
//! the engine's reply endpoint and runs a pump task that hands every reply to
//! the call waiting on its correlation id, so concurrent calls sharing a reply
//! channel never observe each other's replies.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::engine::ReplyEndpoint;
use crate::envelope::Envelope;
use crate::error::{BridgeError, BridgeResult};
use crate::holder::PipelineEngineHolder;

type PendingSlots = Arc<DashMap<Uuid, oneshot::Sender<Envelope>>>;

/// Long-lived consumer of one reply channel.
pub struct ReplyReceiver {
    channel: String,
    pending: PendingSlots,
    closed: Arc<AtomicBool>,
}

impl ReplyReceiver {
    /// Take ownership of `endpoint` and start routing its replies.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(channel: impl Into<String>, endpoint: ReplyEndpoint) -> Arc<Self> {
        let receiver = Arc::new(Self {
            channel: channel.into(),
            pending: Arc::new(DashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
        });

        tokio::spawn(pump(
            receiver.channel.clone(),
            endpoint,
            receiver.pending.clone(),
            receiver.closed.clone(),
        ));

        receiver
    }

    /// The reply channel this receiver consumes.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Register interest in the reply carrying `correlation_id`.
    ///
    /// Register before sending the request so that a fast reply cannot be
    /// dropped as uncorrelated.
    pub fn expect(&self, correlation_id: Uuid) -> BridgeResult<PendingReply> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);

        // The pump may have drained the slots between the check and the insert.
        if self.is_closed() {
            self.pending.remove(&correlation_id);
            return Err(self.closed_error());
        }

        Ok(PendingReply {
            channel: self.channel.clone(),
            correlation_id,
            rx,
            pending: self.pending.clone(),
        })
    }

    /// Number of calls currently waiting on this channel.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether the underlying endpoint has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn closed_error(&self) -> BridgeError {
        BridgeError::ReplyChannelClosed {
            channel: self.channel.clone(),
        }
    }
}

impl std::fmt::Debug for ReplyReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyReceiver")
            .field("channel", &self.channel)
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn pump(
    channel: String,
    mut endpoint: ReplyEndpoint,
    pending: PendingSlots,
    closed: Arc<AtomicBool>,
) {
    debug!(channel = %channel, "Reply receiver started");

    while let Some(envelope) = endpoint.recv().await {
        let Some(correlation_id) = envelope.correlation_id() else {
            warn!(
                channel = %channel,
                envelope_id = %envelope.id,
                "Dropping reply without correlation id"
            );
            continue;
        };

        match pending.remove(&correlation_id) {
            Some((_, slot)) => {
                if slot.send(envelope).is_err() {
                    debug!(
                        channel = %channel,
                        correlation_id = %correlation_id,
                        "Caller stopped waiting before the reply arrived"
                    );
                }
            }
            None => {
                warn!(
                    channel = %channel,
                    correlation_id = %correlation_id,
                    "Dropping reply with no waiting caller"
                );
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let abandoned = pending.len();
    pending.clear();
    info!(channel = %channel, abandoned, "Reply endpoint closed");
}

/// A call waiting for its reply.
///
/// Dropping it releases the slot; a reply arriving afterwards is discarded.
#[derive(Debug)]
pub struct PendingReply {
    channel: String,
    correlation_id: Uuid,
    rx: oneshot::Receiver<Envelope>,
    pending: PendingSlots,
}

impl PendingReply {
    /// The correlation id this call waits on.
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Wait for the reply. `None` waits without bound.
    pub async fn wait(mut self, timeout: Option<Duration>) -> BridgeResult<Envelope> {
        let received = match timeout {
            None => (&mut self.rx).await,
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(
                        channel = %self.channel,
                        correlation_id = %self.correlation_id,
                        timeout_ms = limit.as_millis() as u64,
                        "Timed out waiting for reply"
                    );
                    return Err(BridgeError::ReplyTimeout {
                        channel: self.channel.clone(),
                        timeout: limit,
                    });
                }
            },
        };

        received.map_err(|_| BridgeError::ReplyChannelClosed {
            channel: self.channel.clone(),
        })
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.pending.remove(&self.correlation_id);
    }
}

/// Lazily created, cached reply receivers keyed by channel name.
pub struct ChannelRegistry {
    holder: Arc<PipelineEngineHolder>,
    receivers: DashMap<String, Arc<ReplyReceiver>>,
    endpoint_capacity: usize,
    resolutions: AtomicUsize,
}

impl ChannelRegistry {
    /// Create an empty registry resolving endpoints through `holder`.
    pub fn new(holder: Arc<PipelineEngineHolder>, endpoint_capacity: usize) -> Self {
        Self {
            holder,
            receivers: DashMap::new(),
            endpoint_capacity,
            resolutions: AtomicUsize::new(0),
        }
    }

    /// Get the receiver for `channel`, creating it on first use.
    ///
    /// At most one receiver is ever created per channel. If creation fails
    /// nothing is cached and a later call tries again.
    #[instrument(skip(self))]
    pub async fn receiver(&self, channel: &str) -> BridgeResult<Arc<ReplyReceiver>> {
        if let Some(existing) = self.receivers.get(channel) {
            if !existing.is_closed() {
                return Ok(Arc::clone(existing.value()));
            }
        }

        let engine = self.holder.engine().await.map_err(|e| {
            error!(channel, error = %e, "Pipeline engine unavailable for reply consumer");
            BridgeError::Pipeline(e)
        })?;

        // A receiver whose endpoint went away is replaced on the next lookup.
        self.receivers.remove_if(channel, |_, receiver| receiver.is_closed());

        let created = self
            .receivers
            .entry(channel.to_string())
            .or_try_insert_with(|| {
                self.resolutions.fetch_add(1, Ordering::SeqCst);
                engine
                    .open_reply_endpoint(channel, self.endpoint_capacity)
                    .map(|endpoint| ReplyReceiver::start(channel, endpoint))
            });

        match created {
            Ok(receiver) => Ok(Arc::clone(receiver.value())),
            Err(e) => {
                error!(channel, error = %e, "Unexpected error in reply consumer creation");
                Err(BridgeError::ChannelUnavailable {
                    channel: channel.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Number of endpoint resolutions performed so far.
    #[must_use]
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    /// Whether a receiver exists for `channel`.
    #[must_use]
    pub fn contains(&self, channel: &str) -> bool {
        self.receivers.contains_key(channel)
    }

    /// Number of cached receivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    /// Whether no receiver has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }
}
