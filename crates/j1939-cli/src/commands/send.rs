//! Send command - put one frame on the bus

use anyhow::{Context, Result};
use j1939::{Bus, Frame};

use crate::output::OutputContext;

pub async fn send(
    bus: &dyn Bus,
    pgn: u32,
    destination: u8,
    priority: u8,
    data: &str,
    ctx: &OutputContext,
) -> Result<()> {
    let payload = hex::decode(data.trim()).context("Data must be a hex string")?;
    let frame = Frame::addressed(priority, pgn, destination, bus.local_address(), payload);

    bus.send(frame.clone())
        .await
        .with_context(|| format!("Failed to send {}", frame))?;
    ctx.frame(&frame.into_transmitted().stamped());
    Ok(())
}
