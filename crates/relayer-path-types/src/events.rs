//! Typed payloads parsed out of on-chain IBC events by a chain processor.

use core::fmt::{Display, Error as FmtError, Formatter};

use serde_derive::{Deserialize, Serialize};

use crate::action::PacketAction;
use crate::height::{Height, TimeoutHeight};
use crate::identifier::{ChannelId, ClientId, ConnectionId, PortId};
use crate::keys::{ChannelKey, ConnectionKey};
use crate::timestamp::Timestamp;

/// Packet sequence number, scoped to a (port, channel) pair.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sequence(u64);

impl Sequence {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Sequence {
    fn from(seq: u64) -> Self {
        Self(seq)
    }
}

impl Display for Sequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", self.0)
    }
}

/// Everything observed about a packet from a single packet-phase event.
///
/// Source and destination fields are absolute (the chain the packet left
/// and the chain it is addressed to), regardless of which side observed the
/// event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketInfo {
    /// Height at which the event was observed.
    pub height: u64,
    pub source_port: PortId,
    pub source_channel: ChannelId,
    pub dest_port: PortId,
    pub dest_channel: ChannelId,
    pub sequence: Sequence,
    pub data: Vec<u8>,
    pub timeout_height: TimeoutHeight,
    pub timeout_timestamp: Timestamp,
    /// Acknowledgement bytes, present once the packet has been received and
    /// an ack written on the destination.
    pub ack: Option<Vec<u8>>,
}

impl PacketInfo {
    /// The channel key under which this packet is cached on the chain that
    /// observed `action`. Receive events happen on the destination chain,
    /// every other packet event on the source.
    pub fn channel_key(&self, action: PacketAction) -> ChannelKey {
        match action {
            PacketAction::RecvPacket => ChannelKey {
                channel_id: self.dest_channel.clone(),
                port_id: self.dest_port.clone(),
                counterparty_channel_id: self.source_channel.clone(),
                counterparty_port_id: self.source_port.clone(),
            },
            _ => ChannelKey {
                channel_id: self.source_channel.clone(),
                port_id: self.source_port.clone(),
                counterparty_channel_id: self.dest_channel.clone(),
                counterparty_port_id: self.dest_port.clone(),
            },
        }
    }
}

/// Channel handshake state observed in a channel event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub height: u64,
    pub channel_id: ChannelId,
    pub port_id: PortId,
    pub counterparty_channel_id: ChannelId,
    pub counterparty_port_id: PortId,
    pub connection_id: ConnectionId,
    pub version: String,
}

impl ChannelInfo {
    pub fn channel_key(&self) -> ChannelKey {
        ChannelKey {
            channel_id: self.channel_id.clone(),
            port_id: self.port_id.clone(),
            counterparty_channel_id: self.counterparty_channel_id.clone(),
            counterparty_port_id: self.counterparty_port_id.clone(),
        }
    }
}

/// Connection handshake state observed in a connection event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub height: u64,
    pub client_id: ClientId,
    pub connection_id: ConnectionId,
    pub counterparty_client_id: ClientId,
    pub counterparty_connection_id: ConnectionId,
}

impl ConnectionInfo {
    pub fn connection_key(&self) -> ConnectionKey {
        ConnectionKey {
            client_id: self.client_id.clone(),
            connection_id: self.connection_id.clone(),
            counterparty_client_id: self.counterparty_client_id.clone(),
            counterparty_connection_id: self.counterparty_connection_id.clone(),
        }
    }
}

/// Last observed state of the counterparty light client hosted on a chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    pub client_id: ClientId,
    /// Highest counterparty height the client has a consensus state for.
    pub consensus_height: Height,
}

/// The tip of a chain as last observed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestBlock {
    pub height: u64,
    pub time: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> PacketInfo {
        PacketInfo {
            source_port: PortId::new("transfer"),
            source_channel: ChannelId::new("channel-0"),
            dest_port: PortId::new("transfer"),
            dest_channel: ChannelId::new("channel-7"),
            sequence: 4.into(),
            ..Default::default()
        }
    }

    #[test]
    fn recv_key_is_counterparty_of_send_key() {
        let info = packet();
        let send_key = info.channel_key(PacketAction::Transfer);
        let recv_key = info.channel_key(PacketAction::RecvPacket);

        assert_eq!(send_key.counterparty(), recv_key);
        assert_eq!(send_key.channel_id, ChannelId::new("channel-0"));
        assert_eq!(recv_key.channel_id, ChannelId::new("channel-7"));
    }

    #[test]
    fn ack_and_timeout_are_cached_on_the_source() {
        let info = packet();
        let send_key = info.channel_key(PacketAction::Transfer);

        assert_eq!(info.channel_key(PacketAction::Acknowledgement), send_key);
        assert_eq!(info.channel_key(PacketAction::Timeout), send_key);
        assert_eq!(info.channel_key(PacketAction::TimeoutOnClose), send_key);
    }
}
