//! Interface to the chains on either side of a path.
//!
//! A [`ChainProvider`] is the submission half of a chain integration: it
//! signs and broadcasts assembled messages and serves the proof queries the
//! assembly step needs. The observation half (the chain processor) feeds the
//! path processor through [`crate::cache::ChainProcessorCacheData`] snapshots
//! instead of a trait.

use std::sync::Arc;

use async_trait::async_trait;
use flex_error::define_error;

use ibc_relayer_path_types::action::short_action;
use ibc_relayer_path_types::{
    ChainId, ChannelAction, ChannelId, ChannelInfo, ClientId, ConnectionAction, ConnectionId,
    ConnectionInfo, IbcHeader, PacketAction, PacketInfo, PortId, Sequence,
};

define_error! {
    ProviderError {
        Query
            { description: String }
            |e| { format_args!("chain query failed: {}", e.description) },

        ProofNotFound
            { height: u64 }
            |e| { format_args!("no proof available at height {}", e.height) },

        Broadcast
            { description: String }
            |e| { format_args!("failed to broadcast transaction: {}", e.description) },

        Custom
            { reason: String }
            |e| { format_args!("{}", e.reason) },
    }
}

/// A commitment proof retrieved from a chain, valid at `height`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof {
    pub bytes: Vec<u8>,
    pub height: u64,
}

/// The store paths the path processor needs proofs for.
///
/// `PacketReceiptAbsence` is a proof of non-membership; everything else
/// proves membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProofRequest {
    PacketCommitment {
        port_id: PortId,
        channel_id: ChannelId,
        sequence: Sequence,
    },
    PacketAcknowledgement {
        port_id: PortId,
        channel_id: ChannelId,
        sequence: Sequence,
    },
    PacketReceiptAbsence {
        port_id: PortId,
        channel_id: ChannelId,
        sequence: Sequence,
    },
    ChannelEnd {
        port_id: PortId,
        channel_id: ChannelId,
    },
    ConnectionEnd {
        connection_id: ConnectionId,
    },
}

/// An assembled message bound for one destination chain.
///
/// Handshake and packet infos are carried exactly as observed on the proving
/// chain; the provider derives any destination-side fields (local connection
/// hops, channel version negotiation) from its own configuration. A `None`
/// proof marks a locally initiated message (a lifecycle initial message),
/// which needs no counterparty state.
#[derive(Clone, Debug)]
pub enum IbcMessage {
    UpdateClient {
        client_id: ClientId,
        header: Arc<dyn IbcHeader>,
    },
    Packet {
        action: PacketAction,
        info: PacketInfo,
        proof: Option<Proof>,
    },
    Channel {
        action: ChannelAction,
        info: ChannelInfo,
        proof: Option<Proof>,
    },
    Connection {
        action: ConnectionAction,
        info: ConnectionInfo,
        proof: Option<Proof>,
    },
}

impl IbcMessage {
    /// The canonical message name, e.g. `/ibc.core.channel.v1.MsgRecvPacket`.
    pub fn action_str(&self) -> &'static str {
        match self {
            Self::UpdateClient { .. } => ibc_relayer_path_types::action::MSG_UPDATE_CLIENT,
            Self::Packet { action, .. } => action.as_str(),
            Self::Channel { action, .. } => action.as_str(),
            Self::Connection { action, .. } => action.as_str(),
        }
    }

    /// The short message name, e.g. `MsgRecvPacket`.
    pub fn short_name(&self) -> &'static str {
        short_action(self.action_str())
    }
}

/// Transaction submission and proof queries against one chain.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    fn chain_id(&self) -> &ChainId;

    /// Query a proof of (non-)membership for the given path at the given
    /// height.
    async fn query_proof(
        &self,
        request: ProofRequest,
        height: u64,
    ) -> Result<Proof, ProviderError>;

    /// Build, sign, and broadcast a transaction carrying the given messages,
    /// in order.
    async fn send_messages(&self, messages: Vec<IbcMessage>) -> Result<(), ProviderError>;
}
