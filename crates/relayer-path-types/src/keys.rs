//! Keys identifying a channel or connection from the point of view of one
//! chain of a path.

use core::fmt::{Display, Error as FmtError, Formatter};

use serde_derive::{Deserialize, Serialize};

use crate::identifier::{ChannelId, ClientId, ConnectionId, PortId};

/// A channel end together with its counterparty, as seen from one side.
///
/// The same channel stored from the other side of the path is related to
/// this one by [`ChannelKey::counterparty`].
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub channel_id: ChannelId,
    pub port_id: PortId,
    pub counterparty_channel_id: ChannelId,
    pub counterparty_port_id: PortId,
}

impl ChannelKey {
    /// The same channel as seen from the other chain.
    pub fn counterparty(&self) -> Self {
        Self {
            channel_id: self.counterparty_channel_id.clone(),
            port_id: self.counterparty_port_id.clone(),
            counterparty_channel_id: self.channel_id.clone(),
            counterparty_port_id: self.port_id.clone(),
        }
    }

    /// The key as it appears in a `MsgChannelOpenInit`, which does not yet
    /// know the counterparty channel identifier. Used when matching init
    /// messages against later handshake steps.
    pub fn msg_init_key(&self) -> Self {
        Self {
            channel_id: self.channel_id.clone(),
            port_id: self.port_id.clone(),
            counterparty_channel_id: ChannelId::default(),
            counterparty_port_id: self.counterparty_port_id.clone(),
        }
    }
}

impl Display for ChannelKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "{}/{} -> {}/{}",
            self.port_id, self.channel_id, self.counterparty_port_id, self.counterparty_channel_id,
        )
    }
}

/// A connection end together with its counterparty, as seen from one side.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub client_id: ClientId,
    pub connection_id: ConnectionId,
    pub counterparty_client_id: ClientId,
    pub counterparty_connection_id: ConnectionId,
}

impl ConnectionKey {
    /// The same connection as seen from the other chain.
    pub fn counterparty(&self) -> Self {
        Self {
            client_id: self.counterparty_client_id.clone(),
            connection_id: self.counterparty_connection_id.clone(),
            counterparty_client_id: self.client_id.clone(),
            counterparty_connection_id: self.connection_id.clone(),
        }
    }

    /// The key as it appears in a `MsgConnectionOpenInit`, which does not
    /// yet know the counterparty connection identifier.
    pub fn msg_init_key(&self) -> Self {
        Self {
            client_id: self.client_id.clone(),
            connection_id: self.connection_id.clone(),
            counterparty_client_id: self.counterparty_client_id.clone(),
            counterparty_connection_id: ConnectionId::default(),
        }
    }
}

impl Display for ConnectionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "{}/{} -> {}/{}",
            self.client_id,
            self.connection_id,
            self.counterparty_client_id,
            self.counterparty_connection_id,
        )
    }
}
