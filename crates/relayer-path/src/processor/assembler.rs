//! Turns planned messages into a signed-and-broadcast assembly for one
//! destination chain.
//!
//! Every message in an assembly is proven on the same source chain at the
//! same height, so at most one client update is prepended per round and
//! destination.

use itertools::Itertools;
use tracing::{debug, error, trace, warn};

use ibc_relayer_path_types::PacketAction;

use crate::chain::{IbcMessage, Proof, ProofRequest};
use crate::error::PathError;

use super::flows::PlannedMessage;
use super::path_end::{PathEndRuntime, SendGate};

/// What happened to one destination's planned messages this round.
#[derive(Debug, Default)]
pub(crate) struct AssemblyOutcome {
    /// Messages that made it into a successfully broadcast transaction.
    pub sent: Vec<PlannedMessage>,
    /// Messages that exhausted their retries; the caller prunes their cache
    /// entries on both sides.
    pub dropped: Vec<PlannedMessage>,
    pub error: Option<PathError>,
}

fn proof_request(message: &PlannedMessage) -> ProofRequest {
    match message {
        PlannedMessage::Packet { action, info, .. } => match action {
            PacketAction::Acknowledgement => ProofRequest::PacketAcknowledgement {
                port_id: info.dest_port.clone(),
                channel_id: info.dest_channel.clone(),
                sequence: info.sequence,
            },
            PacketAction::Timeout | PacketAction::TimeoutOnClose => {
                ProofRequest::PacketReceiptAbsence {
                    port_id: info.dest_port.clone(),
                    channel_id: info.dest_channel.clone(),
                    sequence: info.sequence,
                }
            }
            // Receives prove the commitment written on the source; transfers
            // never reach assembly with a proof requirement.
            PacketAction::RecvPacket | PacketAction::Transfer => ProofRequest::PacketCommitment {
                port_id: info.source_port.clone(),
                channel_id: info.source_channel.clone(),
                sequence: info.sequence,
            },
        },
        PlannedMessage::Channel { info, .. } => ProofRequest::ChannelEnd {
            port_id: info.port_id.clone(),
            channel_id: info.channel_id.clone(),
        },
        PlannedMessage::Connection { info, .. } => ProofRequest::ConnectionEnd {
            connection_id: info.connection_id.clone(),
        },
    }
}

fn to_ibc_message(message: &PlannedMessage, proof: Proof) -> IbcMessage {
    match message {
        PlannedMessage::Packet { action, info, .. } => IbcMessage::Packet {
            action: *action,
            info: info.clone(),
            proof: Some(proof),
        },
        PlannedMessage::Channel { action, info, .. } => IbcMessage::Channel {
            action: *action,
            info: info.clone(),
            proof: Some(proof),
        },
        PlannedMessage::Connection { action, info, .. } => IbcMessage::Connection {
            action: *action,
            info: info.clone(),
            proof: Some(proof),
        },
    }
}

fn gate(dst: &PathEndRuntime, message: &PlannedMessage) -> SendGate {
    match message {
        PlannedMessage::Packet {
            action,
            info,
            origin,
        } => dst.should_send_packet_message(origin, *action, info.sequence),
        PlannedMessage::Channel { action, origin, .. } => {
            dst.should_send_channel_message(origin, *action)
        }
        PlannedMessage::Connection { action, origin, .. } => {
            dst.should_send_connection_message(origin, *action)
        }
    }
}

fn track_attempt(dst: &mut PathEndRuntime, message: &PlannedMessage, assembled: bool) {
    match message {
        PlannedMessage::Packet {
            action,
            info,
            origin,
        } => dst.track_packet_attempt(origin, *action, info.sequence, assembled),
        PlannedMessage::Channel { action, origin, .. } => {
            dst.track_channel_attempt(origin, *action, assembled)
        }
        PlannedMessage::Connection { action, origin, .. } => {
            dst.track_connection_attempt(origin, *action, assembled)
        }
    }
}

fn short_name(message: &PlannedMessage) -> &'static str {
    match message {
        PlannedMessage::Packet { action, .. } => {
            ibc_relayer_path_types::action::short_action(action.as_str())
        }
        PlannedMessage::Channel { action, .. } => {
            ibc_relayer_path_types::action::short_action(action.as_str())
        }
        PlannedMessage::Connection { action, .. } => {
            ibc_relayer_path_types::action::short_action(action.as_str())
        }
    }
}

/// Assemble the planned messages toward `dst`, proving each one on `src`,
/// and broadcast the result.
///
/// Missing providers, an unknown proving height, and missing headers are
/// shortfalls, not errors: the round simply defers. A failed broadcast is
/// an error so the caller schedules a retry.
pub(crate) async fn assemble_and_send(
    src: &PathEndRuntime,
    dst: &mut PathEndRuntime,
    planned: Vec<PlannedMessage>,
) -> AssemblyOutcome {
    let mut outcome = AssemblyOutcome::default();
    if planned.is_empty() {
        return outcome;
    }

    let chain_id = dst.info.chain_id.clone();

    let Some(dst_provider) = dst.chain_provider.clone() else {
        debug!(chain = %chain_id, "no chain provider attached, deferring messages");
        return outcome;
    };
    let Some(src_provider) = src.chain_provider.clone() else {
        debug!(chain = %src.info.chain_id, "no chain provider attached to proving chain, deferring messages");
        return outcome;
    };

    let proof_height = src.latest_block.height;
    if proof_height == 0 {
        debug!(chain = %src.info.chain_id, "proving chain has no observed height yet, deferring messages");
        return outcome;
    }

    let mut candidates = Vec::new();
    for message in planned {
        match gate(dst, &message) {
            SendGate::Send => candidates.push(message),
            SendGate::Skip => {
                trace!(chain = %chain_id, message = short_name(&message), "message attempt in flight, skipping")
            }
            SendGate::Drop => {
                error!(
                    chain = %chain_id,
                    message = short_name(&message),
                    "giving up on message after max send retries"
                );
                outcome.dropped.push(message);
            }
        }
    }
    if candidates.is_empty() {
        return outcome;
    }

    let mut assembly: Vec<IbcMessage> = Vec::new();

    // A proof at height H only verifies once the destination's client view
    // of the source covers H.
    let client_covers_height = dst
        .client_state
        .as_ref()
        .is_some_and(|cs| cs.consensus_height.revision_height >= proof_height);
    if !client_covers_height {
        match src.header_at(proof_height) {
            Some(header) => assembly.push(IbcMessage::UpdateClient {
                client_id: dst.info.client_id.clone(),
                header,
            }),
            None => {
                debug!(
                    chain = %chain_id,
                    height = proof_height,
                    "client update required but header not cached, deferring messages"
                );
                for message in &candidates {
                    track_attempt(dst, message, false);
                }
                return outcome;
            }
        }
    }

    let mut assembled = Vec::new();
    for message in candidates {
        match src_provider
            .query_proof(proof_request(&message), proof_height)
            .await
        {
            Ok(proof) => {
                assembly.push(to_ibc_message(&message, proof));
                assembled.push(message);
            }
            Err(e) => {
                debug!(
                    chain = %chain_id,
                    message = short_name(&message),
                    error = %e,
                    "failed to assemble message, deferring"
                );
                track_attempt(dst, &message, false);
            }
        }
    }
    if assembled.is_empty() {
        return outcome;
    }

    debug!(
        chain = %chain_id,
        messages = %assembly.iter().map(IbcMessage::short_name).join(", "),
        "sending message assembly"
    );
    match dst_provider.send_messages(assembly).await {
        Ok(()) => {
            for message in &assembled {
                track_attempt(dst, message, true);
            }
            outcome.sent = assembled;
        }
        Err(e) => {
            warn!(chain = %chain_id, error = %e, "failed to send message assembly");
            for message in &assembled {
                track_attempt(dst, message, true);
            }
            outcome.error = Some(PathError::send(chain_id, e));
        }
    }

    outcome
}
