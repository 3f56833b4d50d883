//! J1939-21 Transport Protocol
//!
//! [`TransportProtocolBus`] decorates another [`Bus`]. A dispatcher task
//! reads the wrapped bus, forwards ordinary frames to its own subscribers
//! and routes TP.CM / TP.DT traffic to per-session tasks. Outgoing frames
//! longer than 8 bytes are segmented (RTS/CTS to a peer, BAM to global).
//!
//! ```text
//!  wrapped bus ──► dispatcher ──┬──► output queue ──► readers
//!                               │          ▲
//!                               └─► session tasks (one per transfer)
//! ```

pub mod control;
mod receiver;
mod sender;
pub mod session;
pub mod warnings;

pub use control::{AbortReason, ControlMessage, DataTransfer};
pub use session::{Role, SessionState, TransportSession};
pub use warnings::{LogWarnings, ProtocolViolation, RecordedWarnings, WarningSink};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{Bus, BusError, BusReader};
use crate::config::TransportConfig;
use crate::frame::{Frame, GLOBAL_ADDRESS, MAX_RAW_DATA, MAX_TP_DATA};
use crate::pgn;
use crate::queue::BroadcastQueue;
use control::packet_count;
use session::SessionKey;

/// Receiver: maximum gap between data packets
pub const T1: Duration = Duration::from_millis(750);
/// Receiver: wait for the first data packet after a CTS
pub const T2: Duration = Duration::from_millis(1250);
/// Sender: wait for a CTS or EOM ACK after the last packet sent
pub const T3: Duration = Duration::from_millis(1250);
/// Sender: wait for the next CTS after a hold-open CTS
pub const T4: Duration = Duration::from_millis(1050);

// The dispatcher re-arms its read after this much silence
const DISPATCH_WINDOW: Duration = Duration::from_secs(60);

/// Why a transport session ended without delivering its message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionAbort {
    #[error("Aborted by peer: {0}")]
    Peer(AbortReason),

    #[error("Aborted locally: {0}")]
    Local(AbortReason),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Bus failure during transfer: {0}")]
    Bus(String),

    #[error("Session closed")]
    Closed,
}

struct SessionHandle {
    id: u64,
    destination: u8,
    inbox: mpsc::UnboundedSender<Frame>,
}

/// Removes its session from the table when dropped
struct SessionGuard {
    inner: Arc<Inner>,
    key: SessionKey,
    id: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut sessions = self.inner.sessions.lock();
        if sessions.get(&self.key).is_some_and(|handle| handle.id == self.id) {
            sessions.remove(&self.key);
        }
    }
}

struct Inner {
    bus: Arc<dyn Bus>,
    output: BroadcastQueue<Frame>,
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
    next_session: AtomicU64,
    warnings: Arc<dyn WarningSink>,
    config: TransportConfig,
}

impl Inner {
    fn local(&self) -> u8 {
        self.bus.local_address()
    }

    /// Claim `key` in the session table, or `None` when it is already taken
    fn register(
        self: &Arc<Self>,
        key: SessionKey,
        destination: u8,
    ) -> Option<(SessionGuard, mpsc::UnboundedReceiver<Frame>)> {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(&key)
            .is_some_and(|handle| !handle.inbox.is_closed())
        {
            return None;
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (inbox, rx) = mpsc::unbounded_channel();
        sessions.insert(
            key,
            SessionHandle {
                id,
                destination,
                inbox,
            },
        );
        let guard = SessionGuard {
            inner: self.clone(),
            key,
            id,
        };
        Some((guard, rx))
    }

    async fn send_control(&self, message: ControlMessage, destination: u8) -> Result<(), BusError> {
        self.bus.send(message.to_frame(self.local(), destination)).await
    }

    /// Best-effort Abort; the session is torn down either way
    async fn abort(&self, reason: AbortReason, pgn: u32, peer: u8) {
        tracing::debug!(peer, pgn, %reason, "Sending TP abort");
        if let Err(e) = self.send_control(ControlMessage::Abort { reason, pgn }, peer).await {
            tracing::warn!(peer, pgn, error = %e, "Failed to send TP abort");
        }
    }

    fn warn(&self, violation: ProtocolViolation) {
        self.warnings.warn(violation);
    }

    fn route(self: &Arc<Self>, frame: Frame) {
        let pgn = frame.pgn();
        if !pgn::is_transport(pgn) {
            self.output.add(frame);
            return;
        }

        let local = self.local();
        if frame.source() == local {
            return;
        }
        if !control::is_for(&frame, local) {
            tracing::trace!(frame = %frame, "TP frame for another node");
            return;
        }

        if pgn == pgn::TP_DT {
            self.route_data(frame);
        } else {
            self.route_control(frame);
        }
    }

    fn route_control(self: &Arc<Self>, frame: Frame) {
        let Some(message) = ControlMessage::parse(frame.data()) else {
            tracing::debug!(frame = %frame, "Ignoring unknown TP.CM");
            return;
        };

        let peer = frame.source();
        match message {
            ControlMessage::RequestToSend { .. } | ControlMessage::Broadcast { .. } => {
                self.start_receiver(frame, message);
            }
            ControlMessage::ClearToSend { pgn, .. } | ControlMessage::EndOfMessageAck { pgn, .. } => {
                let delivered = self.deliver(peer, pgn, Role::Sender, &frame)
                    || self.deliver_any(peer, Role::Sender, &frame);
                if !delivered {
                    tracing::debug!(frame = %frame, "TP.CM with no matching send session");
                }
            }
            ControlMessage::Abort { pgn, .. } => {
                let sender = self.deliver(peer, pgn, Role::Sender, &frame);
                let receiver = self.deliver(peer, pgn, Role::Receiver, &frame);
                if !sender && !receiver {
                    let sender = self.deliver_any(peer, Role::Sender, &frame);
                    let receiver = self.deliver_any(peer, Role::Receiver, &frame);
                    if !sender && !receiver {
                        tracing::debug!(frame = %frame, "TP abort with no matching session");
                    }
                }
            }
        }
    }

    fn route_data(&self, frame: Frame) {
        let peer = frame.source();
        let destination = frame.destination();
        let sessions = self.sessions.lock();
        let handle = sessions.iter().find(|(key, handle)| {
            key.peer == peer && key.role == Role::Receiver && handle.destination == destination
        });
        match handle {
            Some((_, handle)) => {
                let _ = handle.inbox.send(frame);
            }
            None => tracing::trace!(frame = %frame, "TP.DT with no receive session"),
        }
    }

    /// PGN of the open receive session from `peer` to `destination`
    fn active_receive(&self, peer: u8, destination: u8) -> Option<u32> {
        self.sessions
            .lock()
            .iter()
            .find(|(key, handle)| {
                key.peer == peer
                    && key.role == Role::Receiver
                    && handle.destination == destination
                    && !handle.inbox.is_closed()
            })
            .map(|(key, _)| key.pgn)
    }

    fn deliver(&self, peer: u8, pgn: u32, role: Role, frame: &Frame) -> bool {
        let key = SessionKey { peer, pgn, role };
        match self.sessions.lock().get(&key) {
            Some(handle) => handle.inbox.send(frame.clone()).is_ok(),
            None => false,
        }
    }

    // A CTS or abort naming the wrong PGN still belongs to the peer's session
    fn deliver_any(&self, peer: u8, role: Role, frame: &Frame) -> bool {
        let sessions = self.sessions.lock();
        sessions
            .iter()
            .find(|(key, _)| key.peer == peer && key.role == role)
            .is_some_and(|(_, handle)| handle.inbox.send(frame.clone()).is_ok())
    }

    fn start_receiver(self: &Arc<Self>, announcement: Frame, message: ControlMessage) {
        let (total_bytes, total_packets, transported, broadcast) = match message {
            ControlMessage::RequestToSend {
                total_bytes,
                total_packets,
                pgn,
                ..
            } => (total_bytes, total_packets, pgn, false),
            ControlMessage::Broadcast {
                total_bytes,
                total_packets,
                pgn,
            } => (total_bytes, total_packets, pgn, true),
            _ => return,
        };

        let peer = announcement.source();
        let destination = announcement.destination();
        if broadcast != (destination == GLOBAL_ADDRESS) {
            tracing::debug!(frame = %announcement, "Ignoring misaddressed TP announcement");
            return;
        }
        if total_bytes == 0
            || total_bytes as usize > MAX_TP_DATA
            || packet_count(total_bytes as usize) != total_packets as usize
        {
            self.warn(ProtocolViolation::InvalidAnnouncement {
                total_bytes,
                total_packets,
                frame: announcement.to_string(),
            });
            return;
        }

        // Data packets carry no PGN, so only one transfer per peer and destination
        if let Some(active) = self
            .active_receive(peer, destination)
            .filter(|active| *active != transported)
        {
            self.warn(ProtocolViolation::ConnectionInUse {
                peer,
                pgn: transported,
                active,
                frame: announcement.to_string(),
            });
            if !broadcast {
                let inner = self.clone();
                tokio::spawn(async move {
                    inner
                        .abort(AbortReason::ExistingSession, transported, peer)
                        .await
                });
            }
            return;
        }

        let key = SessionKey {
            peer,
            pgn: transported,
            role: Role::Receiver,
        };
        let Some((guard, inbox)) = self.register(key, destination) else {
            self.warn(ProtocolViolation::DuplicateSession {
                peer,
                pgn: transported,
                frame: announcement.to_string(),
            });
            return;
        };

        tracing::debug!(
            peer,
            pgn = transported,
            total_bytes,
            total_packets,
            broadcast,
            "TP receive session started"
        );
        let session = TransportSession::receiver(
            peer,
            destination,
            transported,
            total_bytes as usize,
            total_packets,
        );
        let inner = self.clone();
        tokio::spawn(async move {
            let result = match message {
                ControlMessage::RequestToSend { max_packets, .. } => {
                    receiver::receive_connection(
                        &inner,
                        session,
                        inbox,
                        announcement.priority(),
                        max_packets,
                    )
                    .await
                }
                _ => receiver::receive_broadcast(session, inbox, announcement.priority()).await,
            };
            // Free the slot before publishing so an immediate re-send is accepted
            drop(guard);

            match result {
                Ok(frame) => {
                    tracing::debug!(frame = %frame, "TP message reassembled");
                    inner.output.add(frame);
                }
                Err(abort) => {
                    tracing::info!(peer, pgn = transported, reason = %abort, "TP receive session ended");
                }
            }
        });
    }
}

/// Bus decorator adding Transport Protocol segmentation and reassembly
///
/// Readers of this bus see ordinary frames unchanged plus one frame per
/// reassembled message; TP.CM and TP.DT traffic is consumed. Must be created
/// inside a tokio runtime.
pub struct TransportProtocolBus {
    inner: Arc<Inner>,
    dispatcher: JoinHandle<()>,
}

impl TransportProtocolBus {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self::with_settings(bus, TransportConfig::default(), Arc::new(LogWarnings))
    }

    pub fn with_settings(
        bus: Arc<dyn Bus>,
        config: TransportConfig,
        warnings: Arc<dyn WarningSink>,
    ) -> Self {
        // Subscribe before spawning so nothing sent after construction is missed
        let reader = bus.read(DISPATCH_WINDOW);
        let inner = Arc::new(Inner {
            bus,
            output: BroadcastQueue::new(),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(0),
            warnings,
            config,
        });
        let dispatcher = tokio::spawn(dispatch(inner.clone(), reader));

        Self { inner, dispatcher }
    }

    /// Sessions currently in the session table
    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.lock().len()
    }
}

impl Drop for TransportProtocolBus {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(inner: Arc<Inner>, mut reader: BusReader) {
    loop {
        match reader.next().await {
            Some(frame) => inner.route(frame),
            None if reader.is_closed() => break,
            None => continue,
        }
    }
    tracing::debug!("TP dispatcher stopped");
    inner.output.close();
}

#[async_trait]
impl Bus for TransportProtocolBus {
    async fn send(&self, frame: Frame) -> Result<(), BusError> {
        if frame.len() <= MAX_RAW_DATA {
            return self.inner.bus.send(frame).await;
        }
        if frame.len() > MAX_TP_DATA {
            return Err(BusError::FrameTooLarge(frame.len()));
        }

        if frame.destination() == GLOBAL_ADDRESS {
            sender::send_broadcast(&self.inner, &frame).await?;
        } else {
            sender::send_connection(&self.inner, &frame).await?;
        }

        self.inner.output.add(frame.into_transmitted().stamped());
        Ok(())
    }

    fn read(&self, window: Duration) -> BusReader {
        BusReader::new(self.inner.output.subscribe(), window)
    }

    fn local_address(&self) -> u8 {
        self.inner.local()
    }

    fn close(&self) {
        self.inner.output.close();
        self.inner.bus.close();
    }
}
