//! Lifecycle control for a path processor run.
//!
//! A lifecycle gives a run an optional first message to kick a flow off and
//! an optional terminal message to watch for. Once the termination message
//! is observed on chain, the worker shuts itself down.

use ibc_relayer_path_types::{
    ChainId, ChannelAction, ChannelInfo, ConnectionAction, ConnectionInfo, PacketAction,
    PacketInfo,
};

use crate::cache::IbcMessagesCache;

/// A packet message pinned to the chain it is observed (or submitted) on.
#[derive(Clone, Debug)]
pub struct PacketMessage {
    pub chain_id: ChainId,
    pub action: PacketAction,
    pub info: PacketInfo,
}

/// A channel handshake message pinned to a chain.
#[derive(Clone, Debug)]
pub struct ChannelMessage {
    pub chain_id: ChainId,
    pub action: ChannelAction,
    pub info: ChannelInfo,
}

/// A connection handshake message pinned to a chain.
#[derive(Clone, Debug)]
pub struct ConnectionMessage {
    pub chain_id: ChainId,
    pub action: ConnectionAction,
    pub info: ConnectionInfo,
}

#[derive(Clone, Debug, Default)]
pub struct PacketMessageLifecycle {
    pub initial: Option<PacketMessage>,
    pub termination: Option<PacketMessage>,
}

#[derive(Clone, Debug, Default)]
pub struct ChannelMessageLifecycle {
    pub initial: Option<ChannelMessage>,
    pub termination: Option<ChannelMessage>,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectionMessageLifecycle {
    pub initial: Option<ConnectionMessage>,
    pub termination: Option<ConnectionMessage>,
}

/// What a path processor run is for: relaying a packet flow, or driving a
/// connection or channel handshake.
#[derive(Clone, Debug)]
pub enum MessageLifecycle {
    Packet(PacketMessageLifecycle),
    Connection(ConnectionMessageLifecycle),
    Channel(ChannelMessageLifecycle),
}

impl MessageLifecycle {
    /// Whether a snapshot observed on `chain_id` contains this lifecycle's
    /// termination message. Handshake init messages are matched through
    /// their zeroed counterparty id; everything else matches on the full
    /// key.
    pub(crate) fn matches_termination(
        &self,
        chain_id: &ChainId,
        messages: &IbcMessagesCache,
    ) -> bool {
        match self {
            Self::Packet(lifecycle) => lifecycle.termination.as_ref().is_some_and(|t| {
                t.chain_id == *chain_id
                    && messages.packet_flow.is_cached(
                        &t.info.channel_key(t.action),
                        t.action,
                        t.info.sequence,
                    )
            }),
            Self::Connection(lifecycle) => lifecycle.termination.as_ref().is_some_and(|t| {
                if t.chain_id != *chain_id {
                    return false;
                }
                let key = t.info.connection_key();
                match t.action {
                    ConnectionAction::OpenInit => {
                        messages.connection_handshake.contains_init_matching(&key)
                    }
                    _ => messages.connection_handshake.contains(t.action, &key),
                }
            }),
            Self::Channel(lifecycle) => lifecycle.termination.as_ref().is_some_and(|t| {
                if t.chain_id != *chain_id {
                    return false;
                }
                let key = t.info.channel_key();
                match t.action {
                    ChannelAction::OpenInit => {
                        messages.channel_handshake.contains_init_matching(&key)
                    }
                    _ => messages.channel_handshake.contains(t.action, &key),
                }
            }),
        }
    }
}
