//! Stable identifiers for the IBC messages a relayer observes and submits.
//!
//! Each message is identified by its canonical protobuf full name prefixed
//! with `/`, exactly as it appears in a transaction's message list.

use core::fmt::{Display, Error as FmtError, Formatter};
use core::str::FromStr;

use flex_error::define_error;
use serde_derive::{Deserialize, Serialize};

pub const MSG_TRANSFER: &str = "/ibc.applications.transfer.v1.MsgTransfer";
pub const MSG_RECV_PACKET: &str = "/ibc.core.channel.v1.MsgRecvPacket";
pub const MSG_ACKNOWLEDGEMENT: &str = "/ibc.core.channel.v1.MsgAcknowledgement";
pub const MSG_TIMEOUT: &str = "/ibc.core.channel.v1.MsgTimeout";
pub const MSG_TIMEOUT_ON_CLOSE: &str = "/ibc.core.channel.v1.MsgTimeoutOnClose";

pub const MSG_CHANNEL_OPEN_INIT: &str = "/ibc.core.channel.v1.MsgChannelOpenInit";
pub const MSG_CHANNEL_OPEN_TRY: &str = "/ibc.core.channel.v1.MsgChannelOpenTry";
pub const MSG_CHANNEL_OPEN_ACK: &str = "/ibc.core.channel.v1.MsgChannelOpenAck";
pub const MSG_CHANNEL_OPEN_CONFIRM: &str = "/ibc.core.channel.v1.MsgChannelOpenConfirm";
pub const MSG_CHANNEL_CLOSE_INIT: &str = "/ibc.core.channel.v1.MsgChannelCloseInit";
pub const MSG_CHANNEL_CLOSE_CONFIRM: &str = "/ibc.core.channel.v1.MsgChannelCloseConfirm";

pub const MSG_CONNECTION_OPEN_INIT: &str = "/ibc.core.connection.v1.MsgConnectionOpenInit";
pub const MSG_CONNECTION_OPEN_TRY: &str = "/ibc.core.connection.v1.MsgConnectionOpenTry";
pub const MSG_CONNECTION_OPEN_ACK: &str = "/ibc.core.connection.v1.MsgConnectionOpenAck";
pub const MSG_CONNECTION_OPEN_CONFIRM: &str = "/ibc.core.connection.v1.MsgConnectionOpenConfirm";

pub const MSG_CREATE_CLIENT: &str = "/ibc.core.client.v1.MsgCreateClient";
pub const MSG_UPDATE_CLIENT: &str = "/ibc.core.client.v1.MsgUpdateClient";
pub const MSG_UPGRADE_CLIENT: &str = "/ibc.core.client.v1.MsgUpgradeClient";
pub const MSG_SUBMIT_MISBEHAVIOUR: &str = "/ibc.core.client.v1.MsgSubmitMisbehaviour";

/// The short name of an action: the substring after the final `.` of the
/// canonical message name.
pub fn short_action(action: &str) -> &str {
    match action.rsplit_once('.') {
        Some((_, short)) => short,
        None => action,
    }
}

define_error! {
    ActionError {
        UnknownAction
            { action: String }
            |e| { format_args!("unknown message action: {}", e.action) },
    }
}

/// Packet-phase messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PacketAction {
    Transfer,
    RecvPacket,
    Acknowledgement,
    Timeout,
    TimeoutOnClose,
}

impl PacketAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => MSG_TRANSFER,
            Self::RecvPacket => MSG_RECV_PACKET,
            Self::Acknowledgement => MSG_ACKNOWLEDGEMENT,
            Self::Timeout => MSG_TIMEOUT,
            Self::TimeoutOnClose => MSG_TIMEOUT_ON_CLOSE,
        }
    }
}

impl FromStr for PacketAction {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            MSG_TRANSFER => Ok(Self::Transfer),
            MSG_RECV_PACKET => Ok(Self::RecvPacket),
            MSG_ACKNOWLEDGEMENT => Ok(Self::Acknowledgement),
            MSG_TIMEOUT => Ok(Self::Timeout),
            MSG_TIMEOUT_ON_CLOSE => Ok(Self::TimeoutOnClose),
            _ => Err(ActionError::unknown_action(s.to_string())),
        }
    }
}

impl Display for PacketAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", short_action(self.as_str()))
    }
}

/// Channel handshake and close messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChannelAction {
    OpenInit,
    OpenTry,
    OpenAck,
    OpenConfirm,
    CloseInit,
    CloseConfirm,
}

impl ChannelAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenInit => MSG_CHANNEL_OPEN_INIT,
            Self::OpenTry => MSG_CHANNEL_OPEN_TRY,
            Self::OpenAck => MSG_CHANNEL_OPEN_ACK,
            Self::OpenConfirm => MSG_CHANNEL_OPEN_CONFIRM,
            Self::CloseInit => MSG_CHANNEL_CLOSE_INIT,
            Self::CloseConfirm => MSG_CHANNEL_CLOSE_CONFIRM,
        }
    }
}

impl FromStr for ChannelAction {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            MSG_CHANNEL_OPEN_INIT => Ok(Self::OpenInit),
            MSG_CHANNEL_OPEN_TRY => Ok(Self::OpenTry),
            MSG_CHANNEL_OPEN_ACK => Ok(Self::OpenAck),
            MSG_CHANNEL_OPEN_CONFIRM => Ok(Self::OpenConfirm),
            MSG_CHANNEL_CLOSE_INIT => Ok(Self::CloseInit),
            MSG_CHANNEL_CLOSE_CONFIRM => Ok(Self::CloseConfirm),
            _ => Err(ActionError::unknown_action(s.to_string())),
        }
    }
}

impl Display for ChannelAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", short_action(self.as_str()))
    }
}

/// Connection handshake messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectionAction {
    OpenInit,
    OpenTry,
    OpenAck,
    OpenConfirm,
}

impl ConnectionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenInit => MSG_CONNECTION_OPEN_INIT,
            Self::OpenTry => MSG_CONNECTION_OPEN_TRY,
            Self::OpenAck => MSG_CONNECTION_OPEN_ACK,
            Self::OpenConfirm => MSG_CONNECTION_OPEN_CONFIRM,
        }
    }
}

impl FromStr for ConnectionAction {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            MSG_CONNECTION_OPEN_INIT => Ok(Self::OpenInit),
            MSG_CONNECTION_OPEN_TRY => Ok(Self::OpenTry),
            MSG_CONNECTION_OPEN_ACK => Ok(Self::OpenAck),
            MSG_CONNECTION_OPEN_CONFIRM => Ok(Self::OpenConfirm),
            _ => Err(ActionError::unknown_action(s.to_string())),
        }
    }
}

impl Display for ConnectionAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", short_action(self.as_str()))
    }
}

/// Light client messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClientAction {
    CreateClient,
    UpdateClient,
    UpgradeClient,
    SubmitMisbehaviour,
}

impl ClientAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateClient => MSG_CREATE_CLIENT,
            Self::UpdateClient => MSG_UPDATE_CLIENT,
            Self::UpgradeClient => MSG_UPGRADE_CLIENT,
            Self::SubmitMisbehaviour => MSG_SUBMIT_MISBEHAVIOUR,
        }
    }
}

impl FromStr for ClientAction {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            MSG_CREATE_CLIENT => Ok(Self::CreateClient),
            MSG_UPDATE_CLIENT => Ok(Self::UpdateClient),
            MSG_UPGRADE_CLIENT => Ok(Self::UpgradeClient),
            MSG_SUBMIT_MISBEHAVIOUR => Ok(Self::SubmitMisbehaviour),
            _ => Err(ActionError::unknown_action(s.to_string())),
        }
    }
}

impl Display for ClientAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}", short_action(self.as_str()))
    }
}
