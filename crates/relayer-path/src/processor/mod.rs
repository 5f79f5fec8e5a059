//! The per-path coordination engine.
//!
//! A [`PathProcessor`] owns the runtime state for both chains of a path and
//! runs a single worker loop that merges incoming observations, decides
//! which IBC messages each side needs next, and drives them to submission.
//! Everything callable from outside the loop goes through a
//! [`PathProcessorHandle`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error_span, info, trace, warn, Instrument};

use ibc_relayer_path_types::{
    ChainId, ChannelAction, ChannelInfo, ChannelKey, ClientId, ConnectionAction, ConnectionId,
    ConnectionInfo, PacketAction, PacketInfo,
};

use crate::cache::{ChainProcessorCacheData, ChannelStateCache, ConnectionStateCache};
use crate::chain::{ChainProvider, IbcMessage};
use crate::config::PathEnd;
use crate::error::PathError;
use crate::util::Shutdown;

mod assembler;
mod flows;
mod lifecycle;
mod path_end;

pub use flows::ChannelPair;
pub use lifecycle::{
    ChannelMessage, ChannelMessageLifecycle, ConnectionMessage, ConnectionMessageLifecycle,
    MessageLifecycle, PacketMessage, PacketMessageLifecycle,
};

use flows::PlannedMessage;
use path_end::PathEndRuntime;

/// Delay before re-running a round after a processing error.
pub const DURATION_ERROR_RETRY: Duration = Duration::from_secs(5);

/// Retry-signal channel capacity. The channel is a level-triggered "re-run
/// soon" flag; when it is full a pending signal already covers the request.
const RETRY_PROCESS_QUEUE_SIZE: usize = 8;

/// Buffer for snapshots inbound from one chain processor. A full queue
/// blocks the sender, which is the intended backpressure.
const CACHE_DATA_QUEUE_SIZE: usize = 100;

/// How many recent counterparty headers to keep per side.
pub const IBC_HEADERS_TO_CACHE: usize = 10;

/// Blocks to wait before retrying a message whose assembly fell short.
pub(crate) const BLOCKS_TO_RETRY_ASSEMBLY_AFTER: u64 = 1;

/// Blocks to wait before retrying a message whose send failed (or whose
/// observation has not yet arrived).
pub(crate) const BLOCKS_TO_RETRY_SEND_AFTER: u64 = 2;

/// Attempts per message before giving up on it.
pub(crate) const MAX_MESSAGE_SEND_RETRIES: u64 = 10;

pub type PacketMessageCallback = Arc<dyn Fn(&PacketInfo) + Send + Sync>;
pub type ChannelMessageCallback = Arc<dyn Fn(&ChannelInfo) + Send + Sync>;
pub type ConnectionMessageCallback = Arc<dyn Fn(&ConnectionInfo) + Send + Sync>;

/// Per-side subscriber registries. Registration happens before the worker
/// starts; callbacks for one (side, action) fire in registration order.
#[derive(Default)]
pub(crate) struct Subscriptions {
    packet: HashMap<PacketAction, Vec<PacketMessageCallback>>,
    channel: HashMap<ChannelAction, Vec<ChannelMessageCallback>>,
    connection: HashMap<ConnectionAction, Vec<ConnectionMessageCallback>>,
}

impl Subscriptions {
    fn fire(&self, sent: &[PlannedMessage]) {
        for message in sent {
            match message {
                PlannedMessage::Packet { action, info, .. } => {
                    if let Some(callbacks) = self.packet.get(action) {
                        for callback in callbacks {
                            callback(info);
                        }
                    }
                }
                PlannedMessage::Channel { action, info, .. } => {
                    if let Some(callbacks) = self.channel.get(action) {
                        for callback in callbacks {
                            callback(info);
                        }
                    }
                }
                PlannedMessage::Connection { action, info, .. } => {
                    if let Some(callbacks) = self.connection.get(action) {
                        for callback in callbacks {
                            callback(info);
                        }
                    }
                }
            }
        }
    }
}

/// Coordination engine for one path.
pub struct PathProcessor {
    path_end_1: PathEndRuntime,
    path_end_2: PathEndRuntime,
    retry_tx: mpsc::Sender<()>,
    retry_rx: Option<mpsc::Receiver<()>>,
    retry_timer: Option<JoinHandle<()>>,
    shutdown: Shutdown,
    sent_initial_msg: bool,
}

impl PathProcessor {
    pub fn new(path_end_1: PathEnd, path_end_2: PathEnd) -> Self {
        let (retry_tx, retry_rx) = mpsc::channel(RETRY_PROCESS_QUEUE_SIZE);
        Self {
            path_end_1: PathEndRuntime::new(path_end_1),
            path_end_2: PathEndRuntime::new(path_end_2),
            retry_tx,
            retry_rx: Some(retry_rx),
            retry_timer: None,
            shutdown: Shutdown::new(),
            sent_initial_msg: false,
        }
    }

    /// The cancellation handle governing this processor's worker. Cancel it
    /// to stop the worker at its next iteration boundary.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Attach a chain provider to whichever side matches its chain id.
    /// Returns whether a side matched. Setting the same side twice replaces
    /// the provider.
    pub fn set_chain_provider(&mut self, provider: Arc<dyn ChainProvider>) -> bool {
        let chain_id = provider.chain_id().clone();
        match self.path_end_mut(&chain_id) {
            Some(end) => {
                end.chain_provider = Some(provider);
                true
            }
            None => false,
        }
    }

    /// Subscribe to packet messages finalized on the given side. Must be
    /// called before [`PathProcessor::run`].
    pub fn on_packet_message(
        &mut self,
        chain_id: &ChainId,
        action: PacketAction,
        callback: PacketMessageCallback,
    ) -> bool {
        match self.path_end_mut(chain_id) {
            Some(end) => {
                end.subscriptions
                    .packet
                    .entry(action)
                    .or_default()
                    .push(callback);
                true
            }
            None => false,
        }
    }

    /// Subscribe to channel handshake messages finalized on the given side.
    pub fn on_channel_message(
        &mut self,
        chain_id: &ChainId,
        action: ChannelAction,
        callback: ChannelMessageCallback,
    ) -> bool {
        match self.path_end_mut(chain_id) {
            Some(end) => {
                end.subscriptions
                    .channel
                    .entry(action)
                    .or_default()
                    .push(callback);
                true
            }
            None => false,
        }
    }

    /// Subscribe to connection handshake messages finalized on the given
    /// side.
    pub fn on_connection_message(
        &mut self,
        chain_id: &ChainId,
        action: ConnectionAction,
        callback: ConnectionMessageCallback,
    ) -> bool {
        match self.path_end_mut(chain_id) {
            Some(end) => {
                end.subscriptions
                    .connection
                    .entry(action)
                    .or_default()
                    .push(callback);
                true
            }
            None => false,
        }
    }

    /// The external surface of this processor, safe to clone into chain
    /// processors and other tasks.
    pub fn handle(&self) -> PathProcessorHandle {
        PathProcessorHandle {
            side_1: SideHandle {
                info: self.path_end_1.info.clone(),
                incoming_tx: self.path_end_1.incoming_sender(),
                channel_state: self.path_end_1.channel_state.clone(),
                connection_state: self.path_end_1.connection_state.clone(),
            },
            side_2: SideHandle {
                info: self.path_end_2.info.clone(),
                incoming_tx: self.path_end_2.incoming_sender(),
                channel_state: self.path_end_2.channel_state.clone(),
                connection_state: self.path_end_2.connection_state.clone(),
            },
            retry_tx: self.retry_tx.clone(),
        }
    }

    /// All channels open on either side, paired by counterparty.
    pub fn channel_pairs(&self) -> Vec<ChannelPair> {
        flows::channel_pairs(&self.path_end_1, &self.path_end_2)
    }

    /// Run the worker loop until cancelled (externally or by observing the
    /// lifecycle termination message).
    pub async fn run(self, lifecycle: Option<MessageLifecycle>) {
        let span = error_span!(
            "path_processor",
            side_a = %self.path_end_1.info.chain_id,
            side_b = %self.path_end_2.info.chain_id,
        );
        self.run_loop(lifecycle).instrument(span).await
    }

    async fn run_loop(mut self, lifecycle: Option<MessageLifecycle>) {
        let mut rx_1 = self.path_end_1.take_incoming();
        let mut rx_2 = self.path_end_2.take_incoming();
        let mut retry_rx = self
            .retry_rx
            .take()
            .expect("a path processor can only be run once");
        let shutdown = self.shutdown.clone();
        let mut cancelled = shutdown.subscribe();

        info!("path processor starting");

        loop {
            if shutdown.is_cancelled() {
                info!("context done, quitting path processor");
                break;
            }

            tokio::select! {
                _ = cancelled.changed() => {
                    info!("context done, quitting path processor");
                    break;
                }
                data = rx_1.recv() => {
                    if let Some(data) = data {
                        self.path_end_1.merge_cache_data(data, &shutdown, lifecycle.as_ref());
                    }
                }
                data = rx_2.recv() => {
                    if let Some(data) = data {
                        self.path_end_2.merge_cache_data(data, &shutdown, lifecycle.as_ref());
                    }
                }
                _ = retry_rx.recv() => {}
            }

            // Coalesce bursts into one round: merging is cheap, submitting
            // is expensive, and a newer observation can make a submission
            // unnecessary.
            while let Ok(data) = rx_1.try_recv() {
                self.path_end_1.merge_cache_data(data, &shutdown, lifecycle.as_ref());
            }
            while let Ok(data) = rx_2.try_recv() {
                self.path_end_2.merge_cache_data(data, &shutdown, lifecycle.as_ref());
            }
            while retry_rx.try_recv().is_ok() {}

            if shutdown.is_cancelled() {
                info!("context done, quitting path processor");
                break;
            }

            if !self.path_end_1.in_sync || !self.path_end_2.in_sync {
                trace!("waiting for both chain processors to be in sync");
                continue;
            }

            if let Err(e) = self.process_latest_messages(lifecycle.as_ref()).await {
                warn!(error = %e, "error processing latest messages, will retry");
                self.schedule_retry();
            }
        }

        self.abort_retry_timer();
    }

    /// One resolution round over the fully merged view of both sides.
    async fn process_latest_messages(
        &mut self,
        lifecycle: Option<&MessageLifecycle>,
    ) -> Result<(), PathError> {
        self.send_initial_message_if_needed(lifecycle).await?;

        let pairs = flows::channel_pairs(&self.path_end_1, &self.path_end_2);
        let chan_state_1 = self.path_end_1.channel_state_snapshot();
        let chan_state_2 = self.path_end_2.channel_state_snapshot();

        let mut to_end_1: Vec<PlannedMessage> = Vec::new();
        let mut to_end_2: Vec<PlannedMessage> = Vec::new();
        let mut completed_packets = Vec::new();

        for pair in &pairs {
            let open_2 = chan_state_2.get(&pair.side_2).unwrap_or(false);
            let fwd = flows::unrelayed_packet_messages(
                &self.path_end_1,
                &self.path_end_2,
                &pair.side_1,
                open_2,
            );
            to_end_2.extend(fwd.toward_dst);
            to_end_1.extend(fwd.toward_src);
            if !fwd.completed.is_empty() {
                completed_packets.push((pair.side_1.clone(), fwd.completed));
            }

            let open_1 = chan_state_1.get(&pair.side_1).unwrap_or(false);
            let rev = flows::unrelayed_packet_messages(
                &self.path_end_2,
                &self.path_end_1,
                &pair.side_2,
                open_1,
            );
            to_end_1.extend(rev.toward_dst);
            to_end_2.extend(rev.toward_src);
            if !rev.completed.is_empty() {
                completed_packets.push((pair.side_2.clone(), rev.completed));
            }
        }

        let conn_fwd = flows::unrelayed_connection_messages(&self.path_end_1, &self.path_end_2);
        let conn_rev = flows::unrelayed_connection_messages(&self.path_end_2, &self.path_end_1);
        to_end_2.extend(conn_fwd.toward_dst);
        to_end_1.extend(conn_rev.toward_dst);

        let chan_fwd = flows::unrelayed_channel_messages(&self.path_end_1, &self.path_end_2);
        let chan_rev = flows::unrelayed_channel_messages(&self.path_end_2, &self.path_end_1);
        to_end_2.extend(chan_fwd.toward_dst);
        to_end_1.extend(chan_rev.toward_dst);

        // Flows with an observed terminal message are finished; drop their
        // cache entries on both sides before assembling anything new.
        for (key, sequences) in &completed_packets {
            self.path_end_1.delete_packet_flow(key, sequences);
            self.path_end_2.delete_packet_flow(key, sequences);
        }
        for key in conn_fwd.completed.iter().chain(conn_rev.completed.iter()) {
            self.path_end_1.delete_connection_handshake(key);
            self.path_end_2.delete_connection_handshake(key);
        }
        for key in chan_fwd.completed.iter().chain(chan_rev.completed.iter()) {
            self.path_end_1.delete_channel_handshake(key);
            self.path_end_2.delete_channel_handshake(key);
        }

        let outcome_2 =
            assembler::assemble_and_send(&self.path_end_1, &mut self.path_end_2, to_end_2).await;
        let outcome_1 =
            assembler::assemble_and_send(&self.path_end_2, &mut self.path_end_1, to_end_1).await;

        self.path_end_2.subscriptions.fire(&outcome_2.sent);
        self.path_end_1.subscriptions.fire(&outcome_1.sent);

        // Messages past their retry budget are abandoned entirely.
        for message in outcome_2.dropped.iter().chain(outcome_1.dropped.iter()) {
            match message {
                PlannedMessage::Packet { info, origin, .. } => {
                    let sequences = [info.sequence];
                    self.path_end_1.delete_packet_flow(origin, &sequences);
                    self.path_end_2.delete_packet_flow(origin, &sequences);
                }
                PlannedMessage::Channel { origin, .. } => {
                    self.path_end_1.delete_channel_handshake(origin);
                    self.path_end_2.delete_channel_handshake(origin);
                }
                PlannedMessage::Connection { origin, .. } => {
                    self.path_end_1.delete_connection_handshake(origin);
                    self.path_end_2.delete_connection_handshake(origin);
                }
            }
        }

        match (outcome_1.error, outcome_2.error) {
            (None, None) => Ok(()),
            (Some(e), _) | (None, Some(e)) => Err(e),
        }
    }

    async fn send_initial_message_if_needed(
        &mut self,
        lifecycle: Option<&MessageLifecycle>,
    ) -> Result<(), PathError> {
        if self.sent_initial_msg {
            return Ok(());
        }

        let initial = match lifecycle {
            Some(MessageLifecycle::Packet(lc)) => lc.initial.as_ref().map(|m| {
                (
                    m.chain_id.clone(),
                    IbcMessage::Packet {
                        action: m.action,
                        info: m.info.clone(),
                        proof: None,
                    },
                )
            }),
            Some(MessageLifecycle::Channel(lc)) => lc.initial.as_ref().map(|m| {
                (
                    m.chain_id.clone(),
                    IbcMessage::Channel {
                        action: m.action,
                        info: m.info.clone(),
                        proof: None,
                    },
                )
            }),
            Some(MessageLifecycle::Connection(lc)) => lc.initial.as_ref().map(|m| {
                (
                    m.chain_id.clone(),
                    IbcMessage::Connection {
                        action: m.action,
                        info: m.info.clone(),
                        proof: None,
                    },
                )
            }),
            None => None,
        };

        let Some((chain_id, message)) = initial else {
            self.sent_initial_msg = true;
            return Ok(());
        };

        let provider = self
            .provider_for(&chain_id)
            .ok_or_else(|| PathError::chain_provider_not_set(chain_id.clone()))?;
        provider
            .send_messages(vec![message])
            .await
            .map_err(|e| PathError::initial_message(chain_id.clone(), e))?;

        info!(chain = %chain_id, "submitted initial lifecycle message");
        self.sent_initial_msg = true;
        Ok(())
    }

    fn provider_for(&self, chain_id: &ChainId) -> Option<Arc<dyn ChainProvider>> {
        if self.path_end_1.info.chain_id == *chain_id {
            self.path_end_1.chain_provider.clone()
        } else if self.path_end_2.info.chain_id == *chain_id {
            self.path_end_2.chain_provider.clone()
        } else {
            None
        }
    }

    fn path_end_mut(&mut self, chain_id: &ChainId) -> Option<&mut PathEndRuntime> {
        if self.path_end_1.info.chain_id == *chain_id {
            Some(&mut self.path_end_1)
        } else if self.path_end_2.info.chain_id == *chain_id {
            Some(&mut self.path_end_2)
        } else {
            None
        }
    }

    /// Schedule a one-shot retry signal, replacing any pending timer.
    fn schedule_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        let retry_tx = self.retry_tx.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(DURATION_ERROR_RETRY).await;
            let _ = retry_tx.try_send(());
        }));
    }

    fn abort_retry_timer(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }
}

#[derive(Clone)]
struct SideHandle {
    info: Arc<PathEnd>,
    incoming_tx: mpsc::Sender<ChainProcessorCacheData>,
    channel_state: Arc<std::sync::RwLock<ChannelStateCache>>,
    connection_state: Arc<std::sync::RwLock<ConnectionStateCache>>,
}

/// Clonable external surface of a [`PathProcessor`], used by chain
/// processors to push observations and decide what is worth observing.
#[derive(Clone)]
pub struct PathProcessorHandle {
    side_1: SideHandle,
    side_2: SideHandle,
    retry_tx: mpsc::Sender<()>,
}

impl PathProcessorHandle {
    fn side(&self, chain_id: &ChainId) -> Option<&SideHandle> {
        if self.side_1.info.chain_id == *chain_id {
            Some(&self.side_1)
        } else if self.side_2.info.chain_id == *chain_id {
            Some(&self.side_2)
        } else {
            None
        }
    }

    /// Route a snapshot into the inbound queue of the matching side. A
    /// non-matching chain id is a no-op. Awaits when the queue is full, so
    /// a slow worker backpressures the chain processor.
    pub async fn handle_new_data(&self, chain_id: &ChainId, data: ChainProcessorCacheData) {
        let Some(side) = self.side(chain_id) else {
            trace!(chain = %chain_id, "snapshot for a chain this path does not relay, ignoring");
            return;
        };
        if side.incoming_tx.send(data).await.is_err() {
            debug!(chain = %chain_id, "path processor stopped, dropping snapshot");
        }
    }

    /// Ask the worker to re-run a round soon. Never blocks: the signal
    /// channel is a level-triggered flag, and a pending signal already
    /// covers this request.
    pub fn process_backlog_if_ready(&self) {
        match self.retry_tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("retry signal already pending, dropping request");
            }
            Err(TrySendError::Closed(_)) => {
                trace!("path processor stopped, dropping retry request");
            }
        }
    }

    /// Whether this path relays the given channel on the given chain.
    pub fn is_relayed_channel(&self, chain_id: &ChainId, key: &ChannelKey) -> bool {
        self.side(chain_id)
            .is_some_and(|s| s.info.filter.is_allowed(&key.port_id, &key.channel_id))
    }

    /// Whether the given client on the given chain is the one this path
    /// relays on.
    pub fn is_relevant_client(&self, chain_id: &ChainId, client_id: &ClientId) -> bool {
        self.side(chain_id)
            .is_some_and(|s| s.info.client_id == *client_id)
    }

    /// Whether any tracked connection on the given chain has this id and
    /// belongs to the path's client.
    pub fn is_relevant_connection(&self, chain_id: &ChainId, connection_id: &ConnectionId) -> bool {
        let Some(side) = self.side(chain_id) else {
            return false;
        };
        if side.info.connection_id == *connection_id {
            return true;
        }
        let connections = side.connection_state.read().unwrap();
        let result = connections
            .keys()
            .any(|k| k.connection_id == *connection_id && k.client_id == side.info.client_id);
        result
    }

    /// The client id this path relays on for the given chain.
    ///
    /// It is a programmer error to call this with a chain id belonging to
    /// neither side.
    pub fn relevant_client_id(&self, chain_id: &ChainId) -> ClientId {
        match self.side(chain_id) {
            Some(side) => side.info.client_id.clone(),
            None => panic!("no relevant client id for chain {chain_id}"),
        }
    }

    /// A point-in-time copy of the channel state tracked for one side.
    pub fn channel_state_cache(&self, chain_id: &ChainId) -> Option<ChannelStateCache> {
        self.side(chain_id)
            .map(|s| s.channel_state.read().unwrap().clone())
    }

    /// A point-in-time copy of the connection state tracked for one side.
    pub fn connection_state_cache(&self, chain_id: &ChainId) -> Option<ConnectionStateCache> {
        self.side(chain_id)
            .map(|s| s.connection_state.read().unwrap().clone())
    }
}
