//! midi-ci - MIDI Capability Inquiry engine
//!
//! Runs an initiator and a responder over an in-process loopback and shows
//! the traffic, or decodes single messages.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use midi_ci::config::EngineConfig;
use midi_ci::loopback::Loopback;
use midi_ci::midi::parse_hex;
use midi_ci::sniffer::{describe_message, TrafficSniffer};

/// Demo device used when no configuration file is given
const DEMO_CONFIG: &str = include_str!("../midi-ci.example.yaml");

/// MIDI-CI engine - discovery, profiles and property exchange over SysEx
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the responder configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Decode one MIDI-CI message given as hex (F0/F7 optional)
    #[arg(long, value_name = "HEX")]
    decode: Option<String>,

    /// Interactive shell over the loopback session
    #[arg(long)]
    repl: bool,

    /// Hide the traffic sniffer
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs)?;

    if let Some(hex) = &args.decode {
        let bytes = parse_hex(hex).context("--decode expects hex bytes")?;
        println!("{}", describe_message(&bytes));
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => {
            info!("Configuration file: {}", path);
            EngineConfig::load(path)?
        }
        None => {
            info!("No configuration file, using the demo device");
            EngineConfig::from_yaml(DEMO_CONFIG)?
        }
    };

    let mut loopback = Loopback::new(config.initiator_config(), config.responder_config()?)
        .context("Failed to start the loopback session")?;
    config.populate(loopback.responder_mut())?;
    // Reports queued while populating have no listener yet
    loopback.pump()?;

    if !args.quiet {
        let sniffer = TrafficSniffer::new();
        sniffer.print_banner();
        loopback = loopback.with_tap(sniffer.tap());
    }

    info!(
        "Initiator {} / responder {}",
        loopback.initiator().muid(),
        loopback.responder().muid()
    );

    if args.repl {
        cli::run_repl(&mut loopback)?;
    } else {
        cli::run_scripted(&mut loopback)?;
        println!("\n{}", "Session finished".green());
    }

    Ok(())
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .try_init()
            .context("Failed to install the log subscriber")?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .try_init()
            .context("Failed to install the log subscriber")?;
    }

    Ok(())
}
