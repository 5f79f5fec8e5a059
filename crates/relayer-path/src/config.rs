//! Per-path configuration.

use serde_derive::{Deserialize, Serialize};

use ibc_relayer_path_types::{ChainId, ChannelId, ClientId, ConnectionId, PortId};

/// The objects on one chain that a path processor is responsible for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathEnd {
    pub chain_id: ChainId,
    pub client_id: ClientId,
    pub connection_id: ConnectionId,
    #[serde(default)]
    pub filter: PacketFilter,
}

impl PathEnd {
    pub fn new(
        chain_id: ChainId,
        client_id: ClientId,
        connection_id: ConnectionId,
        filter: PacketFilter,
    ) -> Self {
        Self {
            chain_id,
            client_id,
            connection_id,
            filter,
        }
    }
}

/// Represents the ways in which packets can be filtered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    rename_all = "lowercase",
    tag = "policy",
    content = "list",
    deny_unknown_fields
)]
pub enum PacketFilter {
    /// Relay only the specified channels.
    Allow(ChannelFilters),
    /// Relay everything except the specified channels.
    Deny(ChannelFilters),
    /// Relay any & all channels.
    AllowAll,
}

impl Default for PacketFilter {
    /// By default, allows all channels & ports.
    fn default() -> Self {
        Self::AllowAll
    }
}

impl PacketFilter {
    /// Returns true if packets can be relayed on the channel with [`PortId`]
    /// and [`ChannelId`], false otherwise.
    pub fn is_allowed(&self, port_id: &PortId, channel_id: &ChannelId) -> bool {
        match self {
            PacketFilter::Allow(spec) => spec.matches(port_id, channel_id),
            PacketFilter::Deny(spec) => !spec.matches(port_id, channel_id),
            PacketFilter::AllowAll => true,
        }
    }
}

/// An exact-match list of (port, channel) pairs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelFilters(Vec<(PortId, ChannelId)>);

impl ChannelFilters {
    pub fn new(filters: Vec<(PortId, ChannelId)>) -> Self {
        Self(filters)
    }

    pub fn matches(&self, port_id: &PortId, channel_id: &ChannelId) -> bool {
        self.0
            .iter()
            .any(|(p, c)| p == port_id && c == channel_id)
    }
}
