//! Receive-side session drivers

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout_at, Instant};

use super::control::{AbortReason, ControlMessage, DataTransfer};
use super::session::{Batch, Segment, SessionState, TransportSession};
use super::{Inner, ProtocolViolation, SessionAbort, T1, T2};
use crate::frame::Frame;
use crate::pgn;

/// RTS/CTS reassembly. Returns the reassembled frame after the EOM ACK went out.
pub(super) async fn receive_connection(
    inner: &Inner,
    mut session: TransportSession,
    mut inbox: UnboundedReceiver<Frame>,
    priority: u8,
    max_packets: u8,
) -> Result<Frame, SessionAbort> {
    let key = session.key();
    let limit = max_packets.min(inner.config.max_packets_per_cts).max(1);

    let mut batch = clear_to_send(inner, &session, limit).await?;
    let mut deadline = Instant::now() + T2;
    let mut retries = 0;
    let mut timestamp = None;

    loop {
        let frame = match timeout_at(deadline, inbox.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(SessionAbort::Closed),
            Err(_) => {
                if retries >= inner.config.cts_retries {
                    session.set_state(SessionState::Aborted);
                    inner.abort(AbortReason::Timeout, key.pgn, key.peer).await;
                    return Err(SessionAbort::Timeout("TP.DT"));
                }
                retries += 1;
                tracing::debug!(
                    peer = key.peer,
                    pgn = key.pgn,
                    retries,
                    received = session.progress(),
                    "TP.DT timeout, re-issuing CTS"
                );
                batch = clear_to_send(inner, &session, limit).await?;
                deadline = Instant::now() + T2;
                continue;
            }
        };

        if frame.pgn() == pgn::TP_CM {
            if let Some(ControlMessage::Abort { reason, .. }) = ControlMessage::parse(frame.data()) {
                session.set_state(SessionState::Aborted);
                return Err(SessionAbort::Peer(reason));
            }
            continue;
        }

        let Some(packet) = DataTransfer::parse(frame.data()) else {
            continue;
        };
        tracing::trace!(peer = key.peer, sequence = packet.sequence, "TP.DT");
        match session.store(packet.sequence, packet.payload) {
            Segment::Stored => {
                retries = 0;
                timestamp = frame.timestamp();
                deadline = Instant::now() + T1;
            }
            // A repeated packet is no progress, so T1 keeps running
            Segment::Duplicate => {
                tracing::trace!(peer = key.peer, sequence = packet.sequence, "Duplicate TP.DT");
                continue;
            }
            Segment::OutOfRange => {
                inner.warn(ProtocolViolation::SequenceOutOfRange {
                    sequence: packet.sequence,
                    total: session.total_packets(),
                    frame: frame.to_string(),
                });
                continue;
            }
        }

        if session.is_complete() {
            let eom = ControlMessage::EndOfMessageAck {
                total_bytes: session.total_bytes() as u16,
                total_packets: session.total_packets(),
                pgn: key.pgn,
            };
            inner
                .send_control(eom, key.peer)
                .await
                .map_err(|e| SessionAbort::Bus(e.to_string()))?;
            session.set_state(SessionState::Complete);
            return Ok(session.into_frame(priority, timestamp));
        }

        if session.covers(batch) {
            batch = clear_to_send(inner, &session, limit).await?;
            deadline = Instant::now() + T2;
        }
    }
}

/// BAM reassembly. No flow control; a silent sender simply ends the session.
pub(super) async fn receive_broadcast(
    mut session: TransportSession,
    mut inbox: UnboundedReceiver<Frame>,
    priority: u8,
) -> Result<Frame, SessionAbort> {
    let key = session.key();
    let mut timestamp = None;
    let mut deadline = Instant::now() + T1;

    loop {
        let frame = match timeout_at(deadline, inbox.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(SessionAbort::Closed),
            Err(_) => {
                session.set_state(SessionState::Aborted);
                return Err(SessionAbort::Timeout("BAM TP.DT"));
            }
        };

        let Some(packet) = DataTransfer::parse(frame.data()) else {
            continue;
        };
        if session.store(packet.sequence, packet.payload) != Segment::Stored {
            continue;
        }
        timestamp = frame.timestamp();
        deadline = Instant::now() + T1;

        if session.is_complete() {
            tracing::trace!(peer = key.peer, pgn = key.pgn, "BAM complete");
            session.set_state(SessionState::Complete);
            return Ok(session.into_frame(priority, timestamp));
        }
    }
}

/// Request the first missing run of packets
async fn clear_to_send(
    inner: &Inner,
    session: &TransportSession,
    limit: u8,
) -> Result<Batch, SessionAbort> {
    let key = session.key();
    let batch = session.first_missing_run(limit);
    tracing::trace!(
        peer = key.peer,
        pgn = key.pgn,
        next = batch.start,
        count = batch.count,
        "Sending TP.CM_CTS"
    );
    inner
        .send_control(
            ControlMessage::clear_to_send(batch.count, batch.start, key.pgn),
            key.peer,
        )
        .await
        .map_err(|e| SessionAbort::Bus(e.to_string()))?;
    Ok(batch)
}
