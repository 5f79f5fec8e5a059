//! Per-chain runtime state for one side of a path.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{info, trace};

use ibc_relayer_path_types::{
    ChannelAction, ChannelKey, ClientState, ConnectionAction, ConnectionKey, IbcHeader,
    LatestBlock, PacketAction, Sequence,
};

use crate::cache::{
    ChainProcessorCacheData, ChannelStateCache, ConnectionStateCache, IbcHeaderCache,
    IbcMessagesCache,
};
use crate::chain::ChainProvider;
use crate::config::PathEnd;
use crate::util::Shutdown;

use super::lifecycle::MessageLifecycle;
use super::{
    Subscriptions, BLOCKS_TO_RETRY_ASSEMBLY_AFTER, BLOCKS_TO_RETRY_SEND_AFTER,
    CACHE_DATA_QUEUE_SIZE, IBC_HEADERS_TO_CACHE, MAX_MESSAGE_SEND_RETRIES,
};

/// Attempt bookkeeping for one in-flight message.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ProcessingState {
    pub retry_count: u64,
    pub last_processed_height: u64,
    /// Whether the last attempt got as far as a fully assembled message.
    /// Assembly shortfalls are retried a block sooner than send failures.
    pub assembled: bool,
}

/// Whether a candidate message should go out this round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SendGate {
    Send,
    /// An attempt is in flight; wait for the chain to advance first.
    Skip,
    /// Retries exhausted; stop relaying this message and drop its cache
    /// entries.
    Drop,
}

fn gate(state: Option<&ProcessingState>, latest_height: u64) -> SendGate {
    let Some(state) = state else {
        return SendGate::Send;
    };
    if state.retry_count >= MAX_MESSAGE_SEND_RETRIES {
        return SendGate::Drop;
    }
    let blocks = if state.assembled {
        BLOCKS_TO_RETRY_SEND_AFTER
    } else {
        BLOCKS_TO_RETRY_ASSEMBLY_AFTER
    };
    if latest_height < state.last_processed_height + blocks {
        SendGate::Skip
    } else {
        SendGate::Send
    }
}

/// Mirror of everything observed on one chain, owned by the worker loop.
///
/// The channel/connection state caches sit behind read-write locks so the
/// relevance predicates on [`super::PathProcessorHandle`] can consult them
/// live; the worker is the only writer.
pub struct PathEndRuntime {
    pub(crate) info: Arc<PathEnd>,
    pub(crate) chain_provider: Option<Arc<dyn ChainProvider>>,

    incoming_tx: mpsc::Sender<ChainProcessorCacheData>,
    incoming_rx: Option<mpsc::Receiver<ChainProcessorCacheData>>,

    pub(crate) messages: IbcMessagesCache,
    pub(crate) channel_state: Arc<RwLock<ChannelStateCache>>,
    pub(crate) connection_state: Arc<RwLock<ConnectionStateCache>>,
    pub(crate) header_cache: IbcHeaderCache,
    pub(crate) client_state: Option<ClientState>,
    pub(crate) latest_block: LatestBlock,
    pub(crate) latest_header: Option<Arc<dyn IbcHeader>>,
    pub(crate) in_sync: bool,

    pub(crate) subscriptions: Subscriptions,

    packet_processing: HashMap<ChannelKey, HashMap<PacketAction, BTreeMap<Sequence, ProcessingState>>>,
    channel_processing: HashMap<ChannelKey, HashMap<ChannelAction, ProcessingState>>,
    connection_processing: HashMap<ConnectionKey, HashMap<ConnectionAction, ProcessingState>>,
}

impl PathEndRuntime {
    pub(crate) fn new(info: PathEnd) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(CACHE_DATA_QUEUE_SIZE);
        Self {
            info: Arc::new(info),
            chain_provider: None,
            incoming_tx,
            incoming_rx: Some(incoming_rx),
            messages: IbcMessagesCache::default(),
            channel_state: Arc::new(RwLock::new(ChannelStateCache::default())),
            connection_state: Arc::new(RwLock::new(ConnectionStateCache::default())),
            header_cache: IbcHeaderCache::default(),
            client_state: None,
            latest_block: LatestBlock::default(),
            latest_header: None,
            in_sync: false,
            subscriptions: Subscriptions::default(),
            packet_processing: HashMap::new(),
            channel_processing: HashMap::new(),
            connection_processing: HashMap::new(),
        }
    }

    pub(crate) fn incoming_sender(&self) -> mpsc::Sender<ChainProcessorCacheData> {
        self.incoming_tx.clone()
    }

    pub(crate) fn take_incoming(&mut self) -> mpsc::Receiver<ChainProcessorCacheData> {
        self.incoming_rx
            .take()
            .expect("a path processor can only be run once")
    }

    pub(crate) fn channel_state_snapshot(&self) -> ChannelStateCache {
        self.channel_state.read().unwrap().clone()
    }

    /// The cached header at `height`, falling back to the latest observed
    /// header when the bounded cache has already pruned it.
    pub(crate) fn header_at(&self, height: u64) -> Option<Arc<dyn IbcHeader>> {
        self.header_cache.get(height).or_else(|| {
            self.latest_header
                .clone()
                .filter(|header| header.height() == height)
        })
    }

    /// Merge one chain processor snapshot into the runtime state.
    ///
    /// If the snapshot contains the lifecycle termination message for this
    /// chain, the shutdown handle is cancelled so the worker exits at its
    /// next iteration boundary.
    pub(crate) fn merge_cache_data(
        &mut self,
        data: ChainProcessorCacheData,
        shutdown: &Shutdown,
        lifecycle: Option<&MessageLifecycle>,
    ) {
        if let Some(lifecycle) = lifecycle {
            if lifecycle.matches_termination(&self.info.chain_id, &data.ibc_messages_cache) {
                info!(
                    chain = %self.info.chain_id,
                    "observed lifecycle termination message, shutting down"
                );
                shutdown.cancel();
            }
        }

        if data.in_sync && !self.in_sync {
            info!(chain = %self.info.chain_id, "chain processor in sync");
            self.in_sync = true;
        }

        if let Some(client_state) = data.client_state {
            self.client_state = Some(client_state);
        }
        if let Some(latest_block) = data.latest_block {
            self.latest_block = latest_block;
        }
        if let Some(latest_header) = data.latest_header {
            self.latest_header = Some(latest_header);
        }

        self.messages.merge(data.ibc_messages_cache);
        self.channel_state
            .write()
            .unwrap()
            .merge(data.channel_state_cache);
        self.connection_state
            .write()
            .unwrap()
            .merge(data.connection_state_cache);

        self.header_cache.merge(data.ibc_header_cache);
        self.header_cache.prune(IBC_HEADERS_TO_CACHE);

        trace!(chain = %self.info.chain_id, "merged chain processor cache data");
    }

    pub(crate) fn should_send_packet_message(
        &self,
        key: &ChannelKey,
        action: PacketAction,
        sequence: Sequence,
    ) -> SendGate {
        let state = self
            .packet_processing
            .get(key)
            .and_then(|m| m.get(&action))
            .and_then(|m| m.get(&sequence));
        gate(state, self.latest_block.height)
    }

    pub(crate) fn should_send_channel_message(
        &self,
        key: &ChannelKey,
        action: ChannelAction,
    ) -> SendGate {
        let state = self.channel_processing.get(key).and_then(|m| m.get(&action));
        gate(state, self.latest_block.height)
    }

    pub(crate) fn should_send_connection_message(
        &self,
        key: &ConnectionKey,
        action: ConnectionAction,
    ) -> SendGate {
        let state = self
            .connection_processing
            .get(key)
            .and_then(|m| m.get(&action));
        gate(state, self.latest_block.height)
    }

    pub(crate) fn track_packet_attempt(
        &mut self,
        key: &ChannelKey,
        action: PacketAction,
        sequence: Sequence,
        assembled: bool,
    ) {
        let state = self
            .packet_processing
            .entry(key.clone())
            .or_default()
            .entry(action)
            .or_default()
            .entry(sequence)
            .or_default();
        state.retry_count += 1;
        state.last_processed_height = self.latest_block.height;
        state.assembled = assembled;
    }

    pub(crate) fn track_channel_attempt(
        &mut self,
        key: &ChannelKey,
        action: ChannelAction,
        assembled: bool,
    ) {
        let state = self
            .channel_processing
            .entry(key.clone())
            .or_default()
            .entry(action)
            .or_default();
        state.retry_count += 1;
        state.last_processed_height = self.latest_block.height;
        state.assembled = assembled;
    }

    pub(crate) fn track_connection_attempt(
        &mut self,
        key: &ConnectionKey,
        action: ConnectionAction,
        assembled: bool,
    ) {
        let state = self
            .connection_processing
            .entry(key.clone())
            .or_default()
            .entry(action)
            .or_default();
        state.retry_count += 1;
        state.last_processed_height = self.latest_block.height;
        state.assembled = assembled;
    }

    /// Drop cached packet-flow messages and their attempt bookkeeping for
    /// completed (or abandoned) sequences. The key may be given in either
    /// orientation.
    pub(crate) fn delete_packet_flow(&mut self, key: &ChannelKey, sequences: &[Sequence]) {
        self.messages.packet_flow.delete_messages(key, sequences);
        self.messages
            .packet_flow
            .delete_messages(&key.counterparty(), sequences);
        for k in [key.clone(), key.counterparty()] {
            if let Some(actions) = self.packet_processing.get_mut(&k) {
                for states in actions.values_mut() {
                    for sequence in sequences {
                        states.remove(sequence);
                    }
                }
            }
        }
    }

    /// Drop cached channel handshake messages and bookkeeping for a channel
    /// whose handshake (or close) has completed.
    pub(crate) fn delete_channel_handshake(&mut self, key: &ChannelKey) {
        self.messages.channel_handshake.delete_messages(key);
        self.messages
            .channel_handshake
            .delete_messages(&key.counterparty());
        self.channel_processing.remove(key);
        self.channel_processing.remove(&key.counterparty());
    }

    /// Drop cached connection handshake messages and bookkeeping for a
    /// completed connection handshake.
    pub(crate) fn delete_connection_handshake(&mut self, key: &ConnectionKey) {
        self.messages.connection_handshake.delete_messages(key);
        self.messages
            .connection_handshake
            .delete_messages(&key.counterparty());
        self.connection_processing.remove(key);
        self.connection_processing.remove(&key.counterparty());
    }
}
