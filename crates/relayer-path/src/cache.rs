//! In-memory caches of IBC state observed on one chain.
//!
//! These are the fact-sets a chain processor accumulates and ships to the
//! path processor in [`ChainProcessorCacheData`] snapshots. Merge semantics
//! are last-write-wins at the leaves with recursive merging of nested maps,
//! so applying two snapshots in order is equivalent to applying their union.
//!
//! All cache types are value-semantic: `Clone` yields an independent copy,
//! which is how state is handed to readers outside the worker loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ibc_relayer_path_types::{
    ChainId, ChannelAction, ChannelInfo, ChannelKey, ClientId, ClientState, ConnectionAction,
    ConnectionInfo, ConnectionKey, IbcHeader, LatestBlock, PacketAction, PacketInfo, Sequence,
};

use crate::processor::PathProcessorHandle;

/// Packet state per sequence, for one (channel, message type).
///
/// Ascending sequence order falls out of the map, which is the order
/// messages are submitted in when a transaction cannot hold them all.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PacketSequenceCache(BTreeMap<Sequence, PacketInfo>);

impl PacketSequenceCache {
    pub fn insert(&mut self, sequence: Sequence, info: PacketInfo) {
        self.0.insert(sequence, info);
    }

    pub fn get(&self, sequence: Sequence) -> Option<&PacketInfo> {
        self.0.get(&sequence)
    }

    pub fn contains(&self, sequence: Sequence) -> bool {
        self.0.contains_key(&sequence)
    }

    pub fn delete(&mut self, sequence: Sequence) {
        self.0.remove(&sequence);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Sequence, &PacketInfo)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }
}

/// Packet state per message type for one channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PacketMessagesCache(HashMap<PacketAction, PacketSequenceCache>);

impl PacketMessagesCache {
    pub fn retain(&mut self, action: PacketAction, sequence: Sequence, info: PacketInfo) {
        self.0.entry(action).or_default().insert(sequence, info);
    }

    pub fn get(&self, action: PacketAction) -> Option<&PacketSequenceCache> {
        self.0.get(&action)
    }

    pub fn get_info(&self, action: PacketAction, sequence: Sequence) -> Option<&PacketInfo> {
        self.0.get(&action).and_then(|c| c.get(sequence))
    }

    pub fn contains(&self, action: PacketAction, sequence: Sequence) -> bool {
        self.0.get(&action).is_some_and(|c| c.contains(sequence))
    }

    /// Drop every message cached for `sequence`, across all message types.
    pub fn delete_sequence(&mut self, sequence: Sequence) {
        for cache in self.0.values_mut() {
            cache.delete(sequence);
        }
        self.0.retain(|_, c| !c.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merge(&mut self, other: Self) {
        for (action, cache) in other.0 {
            self.0.entry(action).or_default().merge(cache);
        }
    }
}

/// Packet-phase messages observed on one chain, keyed by channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelPacketMessagesCache(HashMap<ChannelKey, PacketMessagesCache>);

impl ChannelPacketMessagesCache {
    pub fn retain_message(
        &mut self,
        key: ChannelKey,
        action: PacketAction,
        sequence: Sequence,
        info: PacketInfo,
    ) {
        self.0.entry(key).or_default().retain(action, sequence, info);
    }

    pub fn get(&self, key: &ChannelKey) -> Option<&PacketMessagesCache> {
        self.0.get(key)
    }

    pub fn is_cached(&self, key: &ChannelKey, action: PacketAction, sequence: Sequence) -> bool {
        self.0.get(key).is_some_and(|c| c.contains(action, sequence))
    }

    /// Drop the given sequences under `key`, across all message types.
    pub fn delete_messages(&mut self, key: &ChannelKey, sequences: &[Sequence]) {
        if let Some(cache) = self.0.get_mut(key) {
            for sequence in sequences {
                cache.delete_sequence(*sequence);
            }
            if cache.is_empty() {
                self.0.remove(key);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merge(&mut self, other: Self) {
        for (key, cache) in other.0 {
            self.0.entry(key).or_default().merge(cache);
        }
    }
}

/// Channel handshake messages observed on one chain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelMessagesCache(HashMap<ChannelAction, BTreeMap<ChannelKey, ChannelInfo>>);

impl ChannelMessagesCache {
    pub fn retain(&mut self, action: ChannelAction, key: ChannelKey, info: ChannelInfo) {
        self.0.entry(action).or_default().insert(key, info);
    }

    pub fn contains(&self, action: ChannelAction, key: &ChannelKey) -> bool {
        self.0.get(&action).is_some_and(|m| m.contains_key(key))
    }

    /// Whether an `OpenInit` for the same channel end is cached. Init
    /// messages do not yet know the counterparty channel id, so matching
    /// goes through [`ChannelKey::msg_init_key`].
    pub fn contains_init_matching(&self, key: &ChannelKey) -> bool {
        let init_key = key.msg_init_key();
        self.0
            .get(&ChannelAction::OpenInit)
            .is_some_and(|m| m.keys().any(|k| k.msg_init_key() == init_key))
    }

    pub fn iter_action(
        &self,
        action: ChannelAction,
    ) -> impl Iterator<Item = (&ChannelKey, &ChannelInfo)> {
        self.0.get(&action).into_iter().flat_map(|m| m.iter())
    }

    /// Drop every handshake message cached for this channel end, matching
    /// init entries through their zeroed counterparty id.
    pub fn delete_messages(&mut self, key: &ChannelKey) {
        let init_key = key.msg_init_key();
        for cache in self.0.values_mut() {
            cache.retain(|k, _| k.msg_init_key() != init_key);
        }
        self.0.retain(|_, m| !m.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merge(&mut self, other: Self) {
        for (action, cache) in other.0 {
            self.0.entry(action).or_default().extend(cache);
        }
    }
}

/// Connection handshake messages observed on one chain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionMessagesCache(HashMap<ConnectionAction, BTreeMap<ConnectionKey, ConnectionInfo>>);

impl ConnectionMessagesCache {
    pub fn retain(&mut self, action: ConnectionAction, key: ConnectionKey, info: ConnectionInfo) {
        self.0.entry(action).or_default().insert(key, info);
    }

    pub fn contains(&self, action: ConnectionAction, key: &ConnectionKey) -> bool {
        self.0.get(&action).is_some_and(|m| m.contains_key(key))
    }

    pub fn contains_init_matching(&self, key: &ConnectionKey) -> bool {
        let init_key = key.msg_init_key();
        self.0
            .get(&ConnectionAction::OpenInit)
            .is_some_and(|m| m.keys().any(|k| k.msg_init_key() == init_key))
    }

    pub fn iter_action(
        &self,
        action: ConnectionAction,
    ) -> impl Iterator<Item = (&ConnectionKey, &ConnectionInfo)> {
        self.0.get(&action).into_iter().flat_map(|m| m.iter())
    }

    pub fn delete_messages(&mut self, key: &ConnectionKey) {
        let init_key = key.msg_init_key();
        for cache in self.0.values_mut() {
            cache.retain(|k, _| k.msg_init_key() != init_key);
        }
        self.0.retain(|_, m| !m.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merge(&mut self, other: Self) {
        for (action, cache) in other.0 {
            self.0.entry(action).or_default().extend(cache);
        }
    }
}

/// Open/closed state of every channel tracked on one chain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelStateCache(BTreeMap<ChannelKey, bool>);

impl ChannelStateCache {
    pub fn insert(&mut self, key: ChannelKey, open: bool) {
        self.0.insert(key, open);
    }

    pub fn get(&self, key: &ChannelKey) -> Option<bool> {
        self.0.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChannelKey, bool)> {
        self.0.iter().map(|(k, open)| (k, *open))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }
}

/// Open/closed state of every connection tracked on one chain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionStateCache(BTreeMap<ConnectionKey, bool>);

impl ConnectionStateCache {
    pub fn insert(&mut self, key: ConnectionKey, open: bool) {
        self.0.insert(key, open);
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<bool> {
        self.0.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ConnectionKey> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All tracked connections whose client matches `client_id`.
    pub fn filter_for_client(&self, client_id: &ClientId) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| k.client_id == *client_id)
                .map(|(k, open)| (k.clone(), *open))
                .collect(),
        )
    }

    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }
}

/// Recent light-client headers observed on one chain, bounded by count.
#[derive(Clone, Debug, Default)]
pub struct IbcHeaderCache(BTreeMap<u64, Arc<dyn IbcHeader>>);

impl IbcHeaderCache {
    pub fn insert(&mut self, height: u64, header: Arc<dyn IbcHeader>) {
        self.0.insert(height, header);
    }

    pub fn get(&self, height: u64) -> Option<Arc<dyn IbcHeader>> {
        self.0.get(&height).cloned()
    }

    pub fn heights(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the `keep` highest headers.
    pub fn prune(&mut self, keep: usize) {
        while self.0.len() > keep {
            self.0.pop_first();
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }
}

/// All message caches for one chain, bundled the way chain processors
/// populate them.
#[derive(Clone, Debug, Default)]
pub struct IbcMessagesCache {
    pub packet_flow: ChannelPacketMessagesCache,
    pub channel_handshake: ChannelMessagesCache,
    pub connection_handshake: ConnectionMessagesCache,
}

impl IbcMessagesCache {
    /// Whether a chain processor should keep (and forward) a packet message
    /// it just observed: false when no subscribed path processor relays the
    /// channel, or when the message is already cached.
    pub fn should_retain_sequence(
        &self,
        paths: &[PathProcessorHandle],
        key: &ChannelKey,
        chain_id: &ChainId,
        action: PacketAction,
        sequence: Sequence,
    ) -> bool {
        if !paths.iter().any(|p| p.is_relayed_channel(chain_id, key)) {
            return false;
        }
        !self.packet_flow.is_cached(key, action, sequence)
    }

    /// Retain a packet message if [`Self::should_retain_sequence`] allows
    /// it; returns whether it was stored.
    pub fn retain_packet_message(
        &mut self,
        paths: &[PathProcessorHandle],
        key: &ChannelKey,
        chain_id: &ChainId,
        action: PacketAction,
        sequence: Sequence,
        info: PacketInfo,
    ) -> bool {
        if !self.should_retain_sequence(paths, key, chain_id, action, sequence) {
            return false;
        }
        self.packet_flow
            .retain_message(key.clone(), action, sequence, info);
        true
    }

    pub fn merge(&mut self, other: Self) {
        self.packet_flow.merge(other.packet_flow);
        self.channel_handshake.merge(other.channel_handshake);
        self.connection_handshake.merge(other.connection_handshake);
    }
}

/// One update pushed by a chain processor into the path processor.
#[derive(Clone, Debug, Default)]
pub struct ChainProcessorCacheData {
    pub ibc_messages_cache: IbcMessagesCache,
    pub in_sync: bool,
    pub client_state: Option<ClientState>,
    pub connection_state_cache: ConnectionStateCache,
    pub channel_state_cache: ChannelStateCache,
    pub latest_block: Option<LatestBlock>,
    pub latest_header: Option<Arc<dyn IbcHeader>>,
    pub ibc_header_cache: IbcHeaderCache,
}
