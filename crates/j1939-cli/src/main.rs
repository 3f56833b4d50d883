//! j1939-cli - Command-line driver for the J1939 stack
//!
//! Runs the tool side of the stack against a simulated ECU on a loop-back
//! bus, so requests, Transport Protocol transfers and DM7/DM30 exchanges can
//! be tried without hardware.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use j1939::{Bus, LogWarnings, LoopbackBus, RequestClient, TransportProtocolBus, GLOBAL_ADDRESS};
use j1939_sim::SimulatedEcu;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "j1939-cli")]
#[command(author, version, about = "J1939 request and transport tool")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (stack and simulated ECU)
    #[arg(short, long, env = "J1939_CONFIG")]
    config: Option<PathBuf>,

    /// Local source address, overrides the config file
    #[arg(short, long, value_parser = parse_address)]
    address: Option<u8>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a PGN and print every answer
    Request {
        /// PGN to request (hex)
        #[arg(long, value_parser = parse_pgn)]
        pgn: u32,

        /// Destination address (hex, FF for all nodes)
        #[arg(long, value_parser = parse_address, default_value = "00")]
        dest: u8,
    },

    /// Print bus traffic
    Monitor {
        /// How long to listen
        #[arg(long, default_value = "10")]
        seconds: u64,

        /// Send a global request for this PGN first (hex)
        #[arg(long, value_parser = parse_pgn)]
        poll: Option<u32>,
    },

    /// Send one frame (longer than 8 bytes uses the Transport Protocol)
    Send {
        /// PGN (hex)
        #[arg(long, value_parser = parse_pgn)]
        pgn: u32,

        /// Destination address (hex)
        #[arg(long, value_parser = parse_address, default_value = "FF")]
        dest: u8,

        /// Payload (hex)
        #[arg(long)]
        data: String,

        /// Priority (0-7)
        #[arg(long, default_value = "6")]
        priority: u8,
    },

    /// Run a DM7 test and print the DM30 result
    Test {
        /// Destination address (hex)
        #[arg(long, value_parser = parse_address, default_value = "00")]
        dest: u8,

        /// Test identifier
        #[arg(long)]
        test_id: u8,

        /// Suspect parameter number
        #[arg(long)]
        spn: u32,
    },
}

fn parse_hex(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value '{}': {}", s, e))
}

fn parse_pgn(s: &str) -> Result<u32, String> {
    let pgn = parse_hex(s)?;
    if pgn > j1939::pgn::MAX {
        return Err(format!("PGN {:X} wider than 18 bits", pgn));
    }
    Ok(pgn)
}

fn parse_address(s: &str) -> Result<u8, String> {
    let address = parse_hex(s)?;
    u8::try_from(address).map_err(|_| format!("address {:X} out of range", address))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "j1939=debug,j1939_sim=debug,j1939_cli=debug"
    } else {
        "j1939=info,j1939_cli=info"
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::default(),
    };
    if let Some(address) = cli.address {
        config.stack.local_address = address;
    }
    let ctx = OutputContext::new(cli.output, cli.quiet);

    let sim_config = config.sim_or_demo();
    if sim_config.address == config.stack.local_address {
        anyhow::bail!(
            "Simulated ECU and tool both use address {:02X}",
            sim_config.address
        );
    }

    let medium = LoopbackBus::new(config.stack.local_address);
    let ecu = SimulatedEcu::start_with(&medium, sim_config, &config.stack);
    let bus = Arc::new(TransportProtocolBus::with_settings(
        Arc::new(medium.clone()),
        config.stack.transport.clone(),
        Arc::new(LogWarnings),
    ));
    let client = RequestClient::with_config(bus.clone(), config.stack.request.clone());
    tracing::debug!(
        tool = config.stack.local_address,
        ecu = ecu.address(),
        name = ecu.name(),
        "Loop-back bus ready"
    );

    match cli.command {
        Commands::Request { pgn, dest } => {
            commands::request(&client, pgn, dest, &ctx).await?;
        }
        Commands::Monitor { seconds, poll } => {
            let poll = poll.map(|pgn| client.request_frame(pgn, GLOBAL_ADDRESS));
            commands::monitor(bus.as_ref(), seconds, poll, &ctx).await?;
        }
        Commands::Send {
            pgn,
            dest,
            data,
            priority,
        } => {
            commands::send(bus.as_ref(), pgn, dest, priority, &data, &ctx).await?;
        }
        Commands::Test {
            dest,
            test_id,
            spn,
        } => {
            commands::test_result(&client, dest, test_id, spn, &ctx).await?;
        }
    }

    ecu.stop();
    bus.close();
    Ok(())
}
