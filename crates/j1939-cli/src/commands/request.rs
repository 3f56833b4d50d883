//! Request command - ask one node (or all) for a PGN

use anyhow::Result;
use j1939::RequestClient;

use crate::output::OutputContext;

pub async fn request(client: &RequestClient, pgn: u32, destination: u8, ctx: &OutputContext) -> Result<()> {
    ctx.info(&format!("Requesting PGN {:06X} from {:02X}...", pgn, destination));

    let responses = client.request_raw(pgn, destination).await;
    if responses.is_empty() {
        ctx.error(&format!(
            "No response after {} attempts",
            client.config().attempts
        ));
        return Ok(());
    }

    for response in &responses {
        ctx.response(response);
    }
    Ok(())
}
