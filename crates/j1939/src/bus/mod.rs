//! Bus abstraction
//!
//! A [`Bus`] sends frames and hands out [`BusReader`]s. Every reader is an
//! independent subscription on the bus' broadcast queue: it sees each frame
//! that arrives after it was opened, and its read sequence ends after a
//! window of silence.
//!
//! Implementations:
//! - [`LoopbackBus`] for simulation and tests
//! - [`TransportProtocolBus`](crate::tp::TransportProtocolBus), a decorator
//!   that reassembles multi-frame messages
//! - hardware adapter bindings (outside this crate)
//!
//! # Example
//!
//! ```ignore
//! use j1939::{Bus, LoopbackBus};
//!
//! let bus = LoopbackBus::new(0xF9);
//! let mut reader = bus.read(Duration::from_millis(500));
//! bus.send(frame).await?;
//! while let Some(frame) = reader.next().await {
//!     println!("{}", frame);
//! }
//! ```

pub mod error;
mod loopback;

pub use error::BusError;
pub use loopback::LoopbackBus;

use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::frame::Frame;
use crate::queue::Subscription;

/// Shared medium carrying J1939 frames
#[async_trait]
pub trait Bus: Send + Sync {
    /// Transmit a frame
    async fn send(&self, frame: Frame) -> Result<(), BusError>;

    /// Open a reader. Frames arriving after this call are delivered until
    /// `window` passes without any new frame.
    fn read(&self, window: Duration) -> BusReader;

    /// Source address this node transmits with
    fn local_address(&self) -> u8;

    /// Shut the bus down, releasing every blocked reader
    fn close(&self);
}

/// Lazy, rolling-timeout sequence of frames from a [`Bus`]
pub struct BusReader {
    subscription: Subscription<Frame>,
    window: Duration,
}

impl BusReader {
    pub fn new(subscription: Subscription<Frame>, window: Duration) -> Self {
        Self {
            subscription,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Next frame, or `None` once the window passes in silence or the bus closes
    pub async fn next(&mut self) -> Option<Frame> {
        self.subscription.next(self.window).await
    }

    /// Next frame if one is already buffered
    pub fn try_next(&mut self) -> Option<Frame> {
        self.subscription.try_next()
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }

    /// Drain the sequence until it ends
    pub async fn collect(mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next().await {
            frames.push(frame);
        }
        frames
    }

    pub fn into_stream(self) -> impl Stream<Item = Frame> {
        self.subscription.into_stream(self.window)
    }
}
