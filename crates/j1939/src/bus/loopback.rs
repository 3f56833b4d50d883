//! Loop-back bus for simulation and testing

use std::time::Duration;

use async_trait::async_trait;

use super::{Bus, BusError, BusReader};
use crate::frame::{Frame, MAX_RAW_DATA};
use crate::queue::BroadcastQueue;

/// In-memory CAN medium. Every sent frame is echoed to every open reader,
/// the sender's own readers included, tagged as transmitted.
///
/// Several nodes can share one medium through [`LoopbackBus::attach`], which
/// is how a simulated ECU and the tool under test talk to each other.
#[derive(Clone)]
pub struct LoopbackBus {
    medium: BroadcastQueue<Frame>,
    address: u8,
}

impl LoopbackBus {
    pub fn new(address: u8) -> Self {
        Self {
            medium: BroadcastQueue::new(),
            address,
        }
    }

    /// Another node on the same medium with its own source address
    pub fn attach(&self, address: u8) -> Self {
        Self {
            medium: self.medium.clone(),
            address,
        }
    }

    /// Put a frame on the medium as if it had been received from the wire
    pub fn inject(&self, frame: Frame) {
        self.medium.add(frame.stamped());
    }

    pub fn is_closed(&self) -> bool {
        self.medium.is_closed()
    }
}

#[async_trait]
impl Bus for LoopbackBus {
    async fn send(&self, frame: Frame) -> Result<(), BusError> {
        if self.medium.is_closed() {
            return Err(BusError::Closed);
        }
        if frame.len() > MAX_RAW_DATA {
            return Err(BusError::FrameTooLarge(frame.len()));
        }

        tracing::trace!(frame = %frame, node = self.address, "Loopback send");
        self.medium.add(frame.into_transmitted().stamped());
        Ok(())
    }

    fn read(&self, window: Duration) -> BusReader {
        BusReader::new(self.medium.subscribe(), window)
    }

    fn local_address(&self) -> u8 {
        self.address
    }

    fn close(&self) {
        self.medium.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WINDOW: Duration = Duration::from_millis(100);

    fn frame(i: u8) -> Frame {
        Frame::new(6, 0xFECA, 0x00, vec![i])
    }

    #[tokio::test]
    async fn test_echo_to_all_readers() {
        let bus = LoopbackBus::new(0xF9);
        let first = bus.read(WINDOW);
        let second = bus.read(WINDOW);

        for i in 0..10 {
            bus.send(frame(i)).await.unwrap();
        }

        let a = first.collect().await;
        let b = second.collect().await;
        assert_eq!(a.len(), 10);
        assert_eq!(a, b);
        assert!(a.iter().all(Frame::is_transmitted));
        assert!(a.iter().all(|f| f.timestamp().is_some()));
    }

    #[tokio::test]
    async fn test_attached_node_sees_traffic() {
        let tool = LoopbackBus::new(0xF9);
        let engine = tool.attach(0x00);
        let reader = tool.read(WINDOW);

        engine.send(frame(1)).await.unwrap();

        assert_eq!(engine.local_address(), 0x00);
        assert_eq!(reader.collect().await, vec![frame(1)]);
    }

    #[tokio::test]
    async fn test_rejects_oversize_frame() {
        let bus = LoopbackBus::new(0xF9);
        let big = Frame::new(6, 0xFECA, 0x00, vec![0u8; 9]);
        assert_eq!(bus.send(big).await, Err(BusError::FrameTooLarge(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_reader() {
        let bus = LoopbackBus::new(0xF9);
        let mut reader = bus.read(Duration::from_secs(30));
        let closer = bus.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close();
        });

        let start = tokio::time::Instant::now();
        assert!(reader.next().await.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(bus.send(frame(0)).await, Err(BusError::Closed));
    }

    #[tokio::test]
    async fn test_inject_is_not_tagged() {
        let bus = LoopbackBus::new(0xF9);
        let mut reader = bus.read(WINDOW);
        bus.inject(frame(7));

        let received = reader.next().await.unwrap();
        assert!(!received.is_transmitted());
    }
}
