//! Data types shared between chain processors and the path processor.
//!
//! Everything in this crate is plain observed-state data: identifiers,
//! heights and timestamps, the channel/connection key pairs a path is
//! responsible for, and the typed payloads parsed out of on-chain IBC
//! events. None of it talks to a chain.

pub mod action;
pub mod events;
pub mod header;
pub mod height;
pub mod identifier;
pub mod keys;
pub mod timestamp;

pub use action::{ChannelAction, ClientAction, ConnectionAction, PacketAction};
pub use events::{ChannelInfo, ClientState, ConnectionInfo, LatestBlock, PacketInfo, Sequence};
pub use header::IbcHeader;
pub use height::{Height, TimeoutHeight};
pub use identifier::{ChainId, ChannelId, ClientId, ConnectionId, PortId};
pub use keys::{ChannelKey, ConnectionKey};
pub use timestamp::Timestamp;
