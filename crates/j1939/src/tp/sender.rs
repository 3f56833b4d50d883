//! Send-side session drivers. These run inline in `Bus::send`.

use std::sync::Arc;

use tokio::time::{timeout_at, Instant};

use super::control::{data_transfer_frame, AbortReason, ControlMessage};
use super::session::{Role, SessionKey, SessionState, TransportSession};
use super::{Inner, ProtocolViolation, SessionAbort, T3, T4};
use crate::bus::BusError;
use crate::frame::{Frame, GLOBAL_ADDRESS};

/// RTS/CTS transfer to the frame's destination
pub(super) async fn send_connection(inner: &Arc<Inner>, frame: &Frame) -> Result<(), BusError> {
    let peer = frame.destination();
    let pgn = frame.pgn();
    let key = SessionKey {
        peer,
        pgn,
        role: Role::Sender,
    };
    let Some((_guard, mut inbox)) = inner.register(key, peer) else {
        return Err(BusError::SendFailed(format!(
            "TP session to {:02X} for PGN {:06X} already active",
            peer, pgn
        )));
    };

    let mut session = TransportSession::sender(peer, pgn, frame.payload());
    let total_packets = session.total_packets();
    let local = inner.local();

    tracing::debug!(peer, pgn, bytes = frame.len(), total_packets, "TP send session started");
    inner
        .send_control(
            ControlMessage::RequestToSend {
                total_bytes: frame.len() as u16,
                total_packets,
                max_packets: 0xFF,
                pgn,
            },
            peer,
        )
        .await?;
    let mut deadline = Instant::now() + T3;

    loop {
        let reply = match timeout_at(deadline, inbox.recv()).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return Err(BusError::Closed),
            Err(_) => {
                let waiting = match session.state() {
                    SessionState::AwaitingEom => "EOM ACK",
                    _ => "CTS",
                };
                session.set_state(SessionState::Aborted);
                inner.abort(AbortReason::Timeout, pgn, peer).await;
                return Err(SessionAbort::Timeout(waiting).into());
            }
        };

        match ControlMessage::parse(reply.data()) {
            Some(ControlMessage::ClearToSend {
                packets,
                next_packet,
                reserved,
                pgn: cts_pgn,
            }) => {
                check_clear_to_send(inner, &reply, pgn, cts_pgn, reserved, packets, next_packet);

                if packets == 0 {
                    // Hold the connection open
                    session.set_state(SessionState::AwaitingCts);
                    deadline = Instant::now() + T4;
                    continue;
                }

                let last = next_packet as u16 + packets as u16 - 1;
                if next_packet == 0 || last > total_packets as u16 {
                    inner.warn(ProtocolViolation::CtsOutOfRange {
                        first: next_packet,
                        last: last.min(u8::MAX as u16) as u8,
                        total: total_packets,
                        frame: reply.to_string(),
                    });
                    session.set_state(SessionState::Aborted);
                    inner.abort(AbortReason::BadSequenceNumber, pgn, peer).await;
                    return Err(SessionAbort::Local(AbortReason::BadSequenceNumber).into());
                }

                session.set_state(SessionState::SendingSegments);
                for sequence in next_packet..=(last as u8) {
                    let packet = data_transfer_frame(local, peer, sequence, session.chunk(sequence));
                    tracing::trace!(frame = %packet, "TP.DT");
                    inner.bus.send(packet).await?;
                    session.mark(sequence);
                }

                let state = if session.is_complete() {
                    SessionState::AwaitingEom
                } else {
                    SessionState::AwaitingCts
                };
                session.set_state(state);
                deadline = Instant::now() + T3;
            }
            Some(ControlMessage::EndOfMessageAck { .. }) => {
                session.set_state(SessionState::Complete);
                tracing::debug!(peer, pgn, "TP send session complete");
                return Ok(());
            }
            Some(ControlMessage::Abort { reason, .. }) => {
                session.set_state(SessionState::Aborted);
                tracing::info!(peer, pgn, %reason, "TP send aborted by peer");
                return Err(SessionAbort::Peer(reason).into());
            }
            _ => tracing::trace!(frame = %reply, "Ignoring TP.CM during send"),
        }
    }
}

/// BAM transfer to all nodes, paced by the configured packet interval
pub(super) async fn send_broadcast(inner: &Arc<Inner>, frame: &Frame) -> Result<(), BusError> {
    let pgn = frame.pgn();
    let key = SessionKey {
        peer: GLOBAL_ADDRESS,
        pgn,
        role: Role::Sender,
    };
    let Some((_guard, _inbox)) = inner.register(key, GLOBAL_ADDRESS) else {
        return Err(BusError::SendFailed(format!(
            "BAM for PGN {:06X} already in progress",
            pgn
        )));
    };

    let mut session = TransportSession::sender(GLOBAL_ADDRESS, pgn, frame.payload());
    let total_packets = session.total_packets();
    let local = inner.local();
    let interval = inner.config.bam_packet_interval();

    tracing::debug!(pgn, bytes = frame.len(), total_packets, "BAM send started");
    inner
        .send_control(
            ControlMessage::Broadcast {
                total_bytes: frame.len() as u16,
                total_packets,
                pgn,
            },
            GLOBAL_ADDRESS,
        )
        .await?;

    session.set_state(SessionState::SendingSegments);
    for sequence in 1..=total_packets {
        tokio::time::sleep(interval).await;
        let packet = data_transfer_frame(local, GLOBAL_ADDRESS, sequence, session.chunk(sequence));
        inner.bus.send(packet).await?;
        session.mark(sequence);
    }
    session.set_state(SessionState::Complete);
    Ok(())
}

/// Report tolerated CTS irregularities
fn check_clear_to_send(
    inner: &Inner,
    cts: &Frame,
    expected_pgn: u32,
    pgn: u32,
    reserved: u16,
    packets: u8,
    next_packet: u8,
) {
    if reserved != 0xFFFF {
        inner.warn(ProtocolViolation::CtsReservedBytes {
            value: reserved,
            frame: cts.to_string(),
        });
    }
    if pgn != expected_pgn {
        inner.warn(ProtocolViolation::CtsPgnMismatch {
            expected: expected_pgn,
            actual: pgn,
            frame: cts.to_string(),
        });
    }
    if packets == 0 && next_packet != 0xFF {
        inner.warn(ProtocolViolation::CtsHoldOpen {
            next_packet,
            frame: cts.to_string(),
        });
    }
}
