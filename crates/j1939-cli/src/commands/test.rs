//! Test command - DM7 command, DM30 result

use anyhow::Result;
use j1939::{Dm7Command, RequestClient, Response};

use crate::output::OutputContext;

pub async fn test_result(
    client: &RequestClient,
    destination: u8,
    test_id: u8,
    spn: u32,
    ctx: &OutputContext,
) -> Result<()> {
    ctx.info(&format!(
        "Running test {} for SPN {} on {:02X}...",
        test_id, spn, destination
    ));

    match client.test_result(destination, Dm7Command::new(test_id, spn)).await {
        Some(Response::Data(result)) => ctx.test_result(&result),
        Some(Response::Ack(ack)) => ctx.error(&ack.to_string()),
        None => ctx.error("No test result"),
    }
    Ok(())
}
