//! Resolvers: given both sides' observed state, decide which messages each
//! destination needs next.
//!
//! Resolution is pure with respect to the runtimes; attempt gating and
//! cache deletion are applied by the caller so that a single round observes
//! a consistent view.

use std::collections::BTreeSet;

use ibc_relayer_path_types::{
    ChannelAction, ChannelInfo, ChannelKey, ConnectionAction, ConnectionInfo, ConnectionKey,
    PacketAction, PacketInfo, Sequence,
};

use crate::cache::PacketMessagesCache;

use super::path_end::PathEndRuntime;

/// One channel as seen from each side of the path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelPair {
    pub side_1: ChannelKey,
    pub side_2: ChannelKey,
}

/// A message a resolver wants submitted, together with the cache entry that
/// produced it. The origin key is oriented to the chain the message will be
/// proven on.
#[derive(Clone, Debug)]
pub(crate) enum PlannedMessage {
    Packet {
        action: PacketAction,
        info: PacketInfo,
        origin: ChannelKey,
    },
    Channel {
        action: ChannelAction,
        info: ChannelInfo,
        origin: ChannelKey,
    },
    Connection {
        action: ConnectionAction,
        info: ConnectionInfo,
        origin: ConnectionKey,
    },
}

/// All channels open on either side, merged by counterparty and filtered to
/// the channels both ends are configured to relay. The output is the same
/// regardless of which side reported a channel first.
pub(crate) fn channel_pairs(end_1: &PathEndRuntime, end_2: &PathEndRuntime) -> Vec<ChannelPair> {
    let state_1 = end_1.channel_state_snapshot();
    let state_2 = end_2.channel_state_snapshot();

    let mut keys: BTreeSet<ChannelKey> = BTreeSet::new();
    for (key, open) in state_1.iter() {
        if open {
            keys.insert(key.clone());
        }
    }
    for (key, open) in state_2.iter() {
        if open {
            keys.insert(key.counterparty());
        }
    }

    keys.into_iter()
        .filter(|key| {
            end_1.info.filter.is_allowed(&key.port_id, &key.channel_id)
                && end_2
                    .info
                    .filter
                    .is_allowed(&key.counterparty_port_id, &key.counterparty_channel_id)
        })
        .map(|key| ChannelPair {
            side_2: key.counterparty(),
            side_1: key,
        })
        .collect()
}

/// The packet-phase messages one channel direction still needs.
#[derive(Debug, Default)]
pub(crate) struct PacketFlow {
    /// Messages proven on `src`, submitted to `dst` (receives).
    pub toward_dst: Vec<PlannedMessage>,
    /// Messages proven on `dst`, submitted to `src` (acks and timeouts).
    pub toward_src: Vec<PlannedMessage>,
    /// Sequences whose terminal message has been observed; their cache
    /// entries can go on both sides.
    pub completed: Vec<Sequence>,
}

fn has_terminal(src_msgs: &PacketMessagesCache, sequence: Sequence) -> bool {
    src_msgs.contains(PacketAction::Acknowledgement, sequence)
        || src_msgs.contains(PacketAction::Timeout, sequence)
        || src_msgs.contains(PacketAction::TimeoutOnClose, sequence)
}

/// Resolve the next packet messages for packets flowing out of `src` on
/// `src_key`.
///
/// For every transfer observed on the source: a matching receive on the
/// destination asks for an acknowledgement back toward the source; an
/// expired timeout asks for a timeout toward the source (timeout-on-close
/// when the destination channel is no longer open); anything else asks for
/// a receive toward the destination. Sequences already carrying a terminal
/// message on the source are marked completed and never re-emitted, which
/// is what lets several relayers share a channel without duplicating work.
pub(crate) fn unrelayed_packet_messages(
    src: &PathEndRuntime,
    dst: &PathEndRuntime,
    src_key: &ChannelKey,
    dst_channel_open: bool,
) -> PacketFlow {
    let empty = PacketMessagesCache::default();
    let dst_key = src_key.counterparty();

    let src_msgs = src.messages.packet_flow.get(src_key).unwrap_or(&empty);
    let dst_msgs = dst.messages.packet_flow.get(&dst_key).unwrap_or(&empty);

    let mut flow = PacketFlow::default();
    let mut completed = BTreeSet::new();

    if let Some(transfers) = src_msgs.get(PacketAction::Transfer) {
        for (sequence, transfer) in transfers.iter() {
            if has_terminal(src_msgs, *sequence) {
                completed.insert(*sequence);
                continue;
            }

            if let Some(recv) = dst_msgs.get_info(PacketAction::RecvPacket, *sequence) {
                flow.toward_src.push(PlannedMessage::Packet {
                    action: PacketAction::Acknowledgement,
                    info: recv.clone(),
                    origin: dst_key.clone(),
                });
                continue;
            }

            let timed_out = transfer.timeout_height.has_expired(dst.latest_block.height)
                || transfer.timeout_timestamp.has_elapsed(dst.latest_block.time);
            if timed_out {
                let action = if dst_channel_open {
                    PacketAction::Timeout
                } else {
                    PacketAction::TimeoutOnClose
                };
                flow.toward_src.push(PlannedMessage::Packet {
                    action,
                    info: transfer.clone(),
                    origin: dst_key.clone(),
                });
            } else {
                flow.toward_dst.push(PlannedMessage::Packet {
                    action: PacketAction::RecvPacket,
                    info: transfer.clone(),
                    origin: src_key.clone(),
                });
            }
        }
    }

    // Receives whose transfer is no longer cached on the source still need
    // their acknowledgement relayed back.
    if let Some(recvs) = dst_msgs.get(PacketAction::RecvPacket) {
        for (sequence, recv) in recvs.iter() {
            if src_msgs.contains(PacketAction::Transfer, *sequence) {
                continue;
            }
            if has_terminal(src_msgs, *sequence) {
                completed.insert(*sequence);
                continue;
            }
            flow.toward_src.push(PlannedMessage::Packet {
                action: PacketAction::Acknowledgement,
                info: recv.clone(),
                origin: dst_key.clone(),
            });
        }
    }

    flow.completed = completed.into_iter().collect();
    flow
}

/// The handshake messages one direction still needs.
#[derive(Debug, Default)]
pub(crate) struct ConnectionFlow {
    pub toward_dst: Vec<PlannedMessage>,
    /// Connections (src orientation) whose handshake has completed.
    pub completed: Vec<ConnectionKey>,
}

/// Resolve the next connection handshake step driven by events observed on
/// `src`: an init without a counterparty try asks for the try, a try
/// without an ack asks for the ack, an ack without a confirm asks for the
/// confirm. A confirm on `src` means the handshake is done and its cache
/// entries can go.
pub(crate) fn unrelayed_connection_messages(
    src: &PathEndRuntime,
    dst: &PathEndRuntime,
) -> ConnectionFlow {
    let src_conns = &src.messages.connection_handshake;
    let dst_conns = &dst.messages.connection_handshake;

    let mut flow = ConnectionFlow::default();

    for (key, info) in src_conns.iter_action(ConnectionAction::OpenInit) {
        let init_key = key.msg_init_key();
        let has_try = dst_conns
            .iter_action(ConnectionAction::OpenTry)
            .any(|(k, _)| k.counterparty().msg_init_key() == init_key);
        let advanced = src_conns
            .iter_action(ConnectionAction::OpenAck)
            .any(|(k, _)| k.msg_init_key() == init_key);
        if !has_try && !advanced {
            flow.toward_dst.push(PlannedMessage::Connection {
                action: ConnectionAction::OpenTry,
                info: info.clone(),
                origin: key.clone(),
            });
        }
    }

    for (key, info) in src_conns.iter_action(ConnectionAction::OpenTry) {
        if src_conns.contains(ConnectionAction::OpenConfirm, key) {
            continue;
        }
        if !dst_conns.contains(ConnectionAction::OpenAck, &key.counterparty()) {
            flow.toward_dst.push(PlannedMessage::Connection {
                action: ConnectionAction::OpenAck,
                info: info.clone(),
                origin: key.clone(),
            });
        }
    }

    for (key, info) in src_conns.iter_action(ConnectionAction::OpenAck) {
        if !dst_conns.contains(ConnectionAction::OpenConfirm, &key.counterparty()) {
            flow.toward_dst.push(PlannedMessage::Connection {
                action: ConnectionAction::OpenConfirm,
                info: info.clone(),
                origin: key.clone(),
            });
        }
    }

    for (key, _) in src_conns.iter_action(ConnectionAction::OpenConfirm) {
        flow.completed.push(key.clone());
    }

    flow
}

#[derive(Debug, Default)]
pub(crate) struct ChannelFlow {
    pub toward_dst: Vec<PlannedMessage>,
    /// Channels (src orientation) whose handshake or close has completed.
    pub completed: Vec<ChannelKey>,
}

/// Resolve the next channel handshake step driven by events observed on
/// `src`, including the two-step close.
pub(crate) fn unrelayed_channel_messages(src: &PathEndRuntime, dst: &PathEndRuntime) -> ChannelFlow {
    let src_chans = &src.messages.channel_handshake;
    let dst_chans = &dst.messages.channel_handshake;

    let mut flow = ChannelFlow::default();

    for (key, info) in src_chans.iter_action(ChannelAction::OpenInit) {
        let init_key = key.msg_init_key();
        let has_try = dst_chans
            .iter_action(ChannelAction::OpenTry)
            .any(|(k, _)| k.counterparty().msg_init_key() == init_key);
        let advanced = src_chans
            .iter_action(ChannelAction::OpenAck)
            .any(|(k, _)| k.msg_init_key() == init_key);
        if !has_try && !advanced {
            flow.toward_dst.push(PlannedMessage::Channel {
                action: ChannelAction::OpenTry,
                info: info.clone(),
                origin: key.clone(),
            });
        }
    }

    for (key, info) in src_chans.iter_action(ChannelAction::OpenTry) {
        if src_chans.contains(ChannelAction::OpenConfirm, key) {
            continue;
        }
        if !dst_chans.contains(ChannelAction::OpenAck, &key.counterparty()) {
            flow.toward_dst.push(PlannedMessage::Channel {
                action: ChannelAction::OpenAck,
                info: info.clone(),
                origin: key.clone(),
            });
        }
    }

    for (key, info) in src_chans.iter_action(ChannelAction::OpenAck) {
        if !dst_chans.contains(ChannelAction::OpenConfirm, &key.counterparty()) {
            flow.toward_dst.push(PlannedMessage::Channel {
                action: ChannelAction::OpenConfirm,
                info: info.clone(),
                origin: key.clone(),
            });
        }
    }

    for (key, info) in src_chans.iter_action(ChannelAction::CloseInit) {
        if !dst_chans.contains(ChannelAction::CloseConfirm, &key.counterparty()) {
            flow.toward_dst.push(PlannedMessage::Channel {
                action: ChannelAction::CloseConfirm,
                info: info.clone(),
                origin: key.clone(),
            });
        }
    }

    for (key, _) in src_chans.iter_action(ChannelAction::OpenConfirm) {
        flow.completed.push(key.clone());
    }
    for (key, _) in src_chans.iter_action(ChannelAction::CloseConfirm) {
        flow.completed.push(key.clone());
    }

    flow
}
