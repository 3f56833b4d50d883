//! Monitor command - print bus traffic

use std::time::Duration;

use anyhow::{Context, Result};
use j1939::{Bus, Frame};

use crate::output::OutputContext;

/// Print every frame seen for `seconds`, or until Ctrl+C. `poll` is sent once
/// after the reader is open.
pub async fn monitor(bus: &dyn Bus, seconds: u64, poll: Option<Frame>, ctx: &OutputContext) -> Result<()> {
    ctx.info(&format!("Monitoring for {}s, press Ctrl+C to stop", seconds));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);
    let mut reader = bus.read(Duration::from_secs(seconds.max(1)));
    if let Some(request) = poll {
        bus.send(request).await.context("Failed to send poll request")?;
    }

    let mut count = 0usize;
    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(frame) => {
                    ctx.frame(&frame);
                    count += 1;
                }
                None => break,
            },
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    ctx.info(&format!("{} frame(s)", count));
    Ok(())
}
