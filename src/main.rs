//! noiseguard CLI - key tooling and an in-process handshake check
//!
//! `genkey` and `pubkey` behave like their `wg` counterparts. `check-config`
//! loads a configuration file and summarizes it. `loopback` runs a complete
//! handshake between two generated identities and pushes transport packets
//! through the resulting session, which is a quick way to see the core work
//! end to end on a given machine.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use noiseguard::config::{encode_key, parse_key, NoiseGuardConfig};
use noiseguard::crypto::{random, Secret32, StaticKeypair};
use noiseguard::error::ProtocolError;
use noiseguard::protocol::handshake::{finalize_pair, process_initiation, InitiatorHandshake};
use noiseguard::protocol::{Message, TransportState};
use noiseguard::NoiseGuardError;

/// noiseguard - WireGuard handshake core tooling
#[derive(Parser, Debug)]
#[command(name = "noiseguard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a new base64 private key
    Genkey,

    /// Read a base64 private key on stdin and print its public key
    Pubkey,

    /// Load a configuration file and print a summary
    CheckConfig {
        /// Path to the configuration file
        config: PathBuf,
    },

    /// Handshake between two local identities, then exchange packets
    Loopback {
        /// Number of transport packets to send each way
        #[arg(short, long, default_value_t = 8)]
        packets: u32,

        /// Use a random preshared key
        #[arg(long)]
        psk: bool,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code(&e)
        }
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Genkey => genkey(),
        Command::Pubkey => pubkey(),
        Command::CheckConfig { config } => check_config(&config),
        Command::Loopback { packets, psk } => loopback(packets, psk),
    }
}

fn genkey() -> anyhow::Result<()> {
    let keypair = StaticKeypair::generate().map_err(NoiseGuardError::from)?;
    println!("{}", encode_key(keypair.private().as_bytes()));
    Ok(())
}

fn pubkey() -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading private key from stdin")?;

    let private = parse_key(input.trim(), "PrivateKey").map_err(NoiseGuardError::from)?;
    let keypair = StaticKeypair::from_private(Secret32::new(private));
    println!("{}", encode_key(keypair.public()));
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    tracing::info!("Loading configuration from: {}", path.display());

    let config = NoiseGuardConfig::from_file(path)
        .map_err(NoiseGuardError::from)
        .with_context(|| format!("loading {}", path.display()))?;

    println!("interface:");
    println!("  public key: {}", encode_key(&config.public_key()));
    match config.interface.listen_port {
        Some(port) => println!("  listening port: {}", port),
        None => println!("  listening port: (none)"),
    }

    for peer in &config.peers {
        println!();
        println!("peer: {}", encode_key(&peer.public_key));
        println!(
            "  preshared key: {}",
            if peer.preshared_key.is_some() { "(hidden)" } else { "(none)" }
        );
        if let Some(secs) = peer.persistent_keepalive {
            println!("  persistent keepalive: every {} seconds", secs);
        }
    }

    Ok(())
}

fn loopback(packets: u32, use_psk: bool) -> anyhow::Result<()> {
    let initiator_keys = StaticKeypair::generate().map_err(NoiseGuardError::from)?;
    let responder_keys = StaticKeypair::generate().map_err(NoiseGuardError::from)?;
    let psk = if use_psk {
        Some(Secret32::new(random::random_bytes().map_err(NoiseGuardError::from)?))
    } else {
        None
    };

    tracing::info!("Initiator {:?}", initiator_keys);
    tracing::info!("Responder {:?}", responder_keys);

    let mut initiator = InitiatorHandshake::new(*responder_keys.public(), psk.as_ref(), 1);
    let init = initiator.create_initiation(&initiator_keys, None)?;
    let init_bytes = Message::HandshakeInitiation(init).to_bytes();
    println!("initiation: {} bytes", init_bytes.len());

    let parsed = Message::parse(&init_bytes).map_err(NoiseGuardError::from)?;
    let Message::HandshakeInitiation(init) = parsed else {
        bail!("initiation did not parse back as an initiation");
    };
    let received = process_initiation(&responder_keys, &init)?;
    if received.remote_static() != initiator_keys.public() {
        bail!("responder decrypted the wrong static key");
    }

    let (mut responder, response) = received.create_response(psk.as_ref(), 2, None)?;
    let response_bytes = Message::HandshakeResponse(response).to_bytes();
    println!("response:   {} bytes", response_bytes.len());

    let parsed = Message::parse(&response_bytes).map_err(NoiseGuardError::from)?;
    let Message::HandshakeResponse(response) = parsed else {
        bail!("response did not parse back as a response");
    };
    initiator.process_response(&initiator_keys, &response)?;

    let (i, r) = finalize_pair(&mut initiator, &mut responder)?;
    println!("chaining keys agree, handshake secrets wiped");

    let mut a = TransportState::new(i.keys);
    let mut b = TransportState::new(r.keys);

    for n in 0..packets {
        let payload = format!("packet {}", n);

        let msg = a.encrypt(i.remote_index, payload.as_bytes())?;
        let plaintext = b.decrypt(&msg)?;
        if !plaintext.starts_with(payload.as_bytes()) {
            bail!("initiator -> responder packet {} corrupted", n);
        }

        let msg = b.encrypt(r.remote_index, payload.as_bytes())?;
        let plaintext = a.decrypt(&msg)?;
        if !plaintext.starts_with(payload.as_bytes()) {
            bail!("responder -> initiator packet {} corrupted", n);
        }
    }
    println!("transport:  {} packets each way", packets);

    let replay = a.encrypt(i.remote_index, b"replayed")?;
    b.decrypt(&replay)?;
    match b.decrypt(&replay) {
        Err(NoiseGuardError::Protocol(ProtocolError::ReplayRejected { counter })) => {
            println!("replay:     counter {} rejected", counter)
        }
        Ok(_) => bail!("replayed packet was accepted"),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Get exit code for error
fn exit_code(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<NoiseGuardError>() {
        Some(e) => ExitCode::from(e.exit_code() as u8),
        None => ExitCode::from(255),
    }
}
