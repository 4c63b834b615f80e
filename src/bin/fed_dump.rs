//! fed-dump - Inspection tool for FED9U event buffer dumps
//!
//! Dump files hold one or more events back to back as little-endian
//! 32-bit words.
//!
//! Usage:
//!   fed-dump decode <file> [--config <toml>] [--json] [--samples]
//!   fed-dump spy <out> --bytes <n>
//!   fed-dump generate <out> [--config <toml>] [--count <n>]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fed9u_rs::config::Config;
use fed9u_rs::decoder::{decode_event, BufferedEvent, Event};
use fed9u_rs::emulator::{build_spy_event, FakeEventGenerator};
use rand::RngCore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fed-dump")]
#[command(about = "Inspect and synthesise FED9U event buffers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode and check every event in a dump file
    Decode {
        /// Little-endian word dump
        file: PathBuf,

        /// TOML configuration (decoder checks, FED description)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print one JSON summary per event
        #[arg(long)]
        json: bool,

        /// Print decoded samples of every channel
        #[arg(long)]
        samples: bool,
    },

    /// Write a spy event with a random payload
    Spy {
        /// Output file
        out: PathBuf,

        /// Payload size in bytes
        #[arg(short, long, default_value_t = 1024)]
        bytes: usize,

        /// L1 event number
        #[arg(long, default_value_t = 1)]
        event_number: u32,
    },

    /// Write fake events from the emulator settings
    Generate {
        /// Output file
        out: PathBuf,

        /// TOML configuration ([emulator] table)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of events
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fed9u_rs=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Decode {
            file,
            config,
            json,
            samples,
        } => decode_file(&file, &load_config(config.as_deref())?, json, samples),
        Commands::Spy {
            out,
            bytes,
            event_number,
        } => write_spy(&out, bytes, event_number),
        Commands::Generate { out, config, count } => {
            generate(&out, &load_config(config.as_deref())?, count)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn decode_file(path: &Path, config: &Config, json: bool, samples: bool) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let buffer = BufferedEvent::from_bytes(&bytes)?;
    let words = buffer.words();

    let mut offset = 0;
    let mut decoded = 0;
    while offset < words.len() {
        let event = decode_event(&words[offset..], config)
            .with_context(|| format!("Event {} at word {}", decoded, offset))?;
        if json {
            println!("{}", serde_json::to_string(&event.summary())?);
        } else {
            print_event(&event);
        }
        if samples {
            print_samples(&event);
        }

        let span = event.event_span() / 4;
        if span == 0 {
            bail!("Event at word {} has zero length", offset);
        }
        offset += span;
        decoded += 1;
    }

    info!(events = decoded, file = %path.display(), "Decoded dump");
    Ok(())
}

fn print_event(event: &Event<'_>) {
    let summary = event.summary();
    println!(
        "Event {} BX {} source {}: {:?} / {:?} ({:?} format)",
        summary.event_number,
        summary.bunch_crossing,
        summary.source_id,
        summary.daq_mode,
        summary.daq_super_mode,
        summary.format
    );
    println!(
        "  length {} words, CRC 0x{:04x} (calculated 0x{:04x}), {} channels",
        summary.total_length, summary.crc, summary.calculated_crc, summary.total_channels
    );
    if let Some(spy) = summary.spy_length {
        println!("  spy payload {} bytes", spy);
    }
    for fe in &summary.fe_units {
        println!(
            "  FE {}: {} bytes, {} channels, pipeline {}{}",
            fe.index,
            fe.length,
            fe.channels,
            fe.majority_pipeline,
            if fe.bad_channels.is_empty() {
                String::new()
            } else {
                format!(", bad status on {:?}", fe.bad_channels)
            }
        );
    }
}

fn print_samples(event: &Event<'_>) {
    let mut samples = Vec::new();
    for (fe, ch, channel) in event.channels() {
        match channel.samples_into(&mut samples) {
            Ok(()) => println!("  FE {} ch {} {:?}: {:?}", fe, ch, channel.packet_code(), samples),
            Err(e) => warn!(fe_unit = fe, channel = ch, error = %e, "Sample decoding failed"),
        }
    }
}

fn write_spy(path: &Path, bytes: usize, event_number: u32) -> Result<()> {
    let mut payload = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut payload);
    let words = build_spy_event(&payload, event_number, 0)?;
    fs::write(path, BufferedEvent::from_words(words).to_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(file = %path.display(), payload = bytes, "Wrote spy event");
    Ok(())
}

fn generate(path: &Path, config: &Config, count: usize) -> Result<()> {
    let mut generator = FakeEventGenerator::new(config.emulator.clone())?;
    let mut out = Vec::new();
    for _ in 0..count {
        let words = generator.next_event()?;
        out.extend(words.iter().flat_map(|w| w.to_le_bytes()));
    }
    fs::write(path, &out).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(file = %path.display(), events = count, bytes = out.len(), "Wrote fake events");
    Ok(())
}
