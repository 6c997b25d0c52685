//! TBLS Party CLI
//!
//! Command-line interface for running threshold BLS party operations:
//! - Identity generation
//! - Distributed Key Generation (DKG) over authenticated TCP links
//! - Partial signing, aggregation and verification

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tbls_core::{digest, PartyId, Signer, Tbls, Verifier, DIGEST_LEN};
use tbls_net::{
    auth_with, listen_with_config, service_connections, ChannelConfig, Identity, RemoteParties,
};
use tokio::time::Instant;
use tracing::{info, Level};

use crate::config::PartyFile;

/// TBLS Party - threshold BLS party node
#[derive(Parser)]
#[command(name = "tbls-party")]
#[command(about = "Threshold BLS party node")]
#[command(version)]
struct Cli {
    /// Hex Ed25519 secret of this party
    #[arg(short, long, env = "TBLS_IDENTITY", default_value = "./identity.key")]
    identity: PathBuf,

    /// Party file with the threshold and every member
    #[arg(long, env = "TBLS_PARTIES", default_value = "./parties.json")]
    parties: PathBuf,

    /// Data directory for key shares
    #[arg(short, long, env = "DEST", default_value = "./data")]
    dest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct DigestArgs {
    /// Message to sign; its SHA-256 is used
    #[arg(short, long)]
    message: Option<String>,

    /// Precomputed 32-byte digest, hex encoded
    #[arg(long)]
    digest: Option<String>,
}

impl DigestArgs {
    fn resolve(&self) -> Result<[u8; DIGEST_LEN]> {
        match (&self.message, &self.digest) {
            (Some(message), _) => Ok(digest(message.as_bytes())),
            (None, Some(hex_digest)) => hex::decode(hex_digest.trim())?
                .try_into()
                .map_err(|_| anyhow!("Digest must be {DIGEST_LEN} bytes")),
            (None, None) => bail!("either --message or --digest is required"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a fresh identity and print its certificate
    Identity {
        /// Replace an existing identity file
        #[arg(long)]
        force: bool,
    },

    /// Run distributed key generation with the parties in the party file
    Keygen {
        /// Listen address; defaults to this party's endpoint
        #[arg(short, long)]
        listen: Option<String>,

        /// Overall deadline in seconds
        #[arg(long, default_value_t = 120)]
        timeout: u64,

        /// Connect attempts per peer before a message is dropped
        #[arg(long, default_value_t = 100)]
        connect_retries: u32,

        /// Seconds to keep running after completion so queued messages drain
        #[arg(long, default_value_t = 3)]
        linger: u64,
    },

    /// Produce this party's partial signature
    Sign {
        #[command(flatten)]
        digest: DigestArgs,
    },

    /// Combine partial signatures and verify the result
    Aggregate {
        #[command(flatten)]
        digest: DigestArgs,

        /// Partial signatures as `party:hex` (comma-separated)
        #[arg(short, long)]
        partials: String,

        /// Threshold public key; defaults to the one in the local share
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Verify an aggregated signature
    Verify {
        #[command(flatten)]
        digest: DigestArgs,

        /// Signature, hex encoded
        #[arg(short, long)]
        signature: String,

        /// Threshold public key; defaults to the one in the local share
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Show key share info
    Info,
}

/// On-disk form of a key share
#[derive(Serialize, Deserialize)]
struct KeyShareFile {
    party_id: PartyId,
    n: u16,
    threshold: u16,
    /// Threshold public key, hex
    public_key: String,
    /// Encoded share, hex
    share: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Identity { force } => {
            run_identity(&cli, force)?;
        }
        Commands::Keygen {
            ref listen,
            timeout,
            connect_retries,
            linger,
        } => {
            std::fs::create_dir_all(&cli.dest)?;
            run_keygen(&cli, listen.as_deref(), timeout, connect_retries, linger).await?;
        }
        Commands::Sign { ref digest } => {
            run_sign(&cli, digest)?;
        }
        Commands::Aggregate {
            ref digest,
            ref partials,
            ref public_key,
        } => {
            run_aggregate(&cli, digest, partials, public_key.as_deref())?;
        }
        Commands::Verify {
            ref digest,
            ref signature,
            ref public_key,
        } => {
            run_verify(&cli, digest, signature, public_key.as_deref())?;
        }
        Commands::Info => {
            show_info(&cli)?;
        }
    }

    Ok(())
}

fn run_identity(cli: &Cli, force: bool) -> Result<()> {
    if cli.identity.exists() && !force {
        bail!(
            "{} already exists, pass --force to replace it",
            cli.identity.display()
        );
    }
    if let Some(parent) = cli.identity.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let identity = Identity::generate();
    std::fs::write(&cli.identity, identity.secret_hex().as_bytes())?;

    info!(path = ?cli.identity, "Identity written");
    println!("Certificate: {}", identity.certificate());
    println!("Universal ID: {}", identity.universal_id());
    Ok(())
}

async fn run_keygen(
    cli: &Cli,
    listen: Option<&str>,
    timeout: u64,
    connect_retries: u32,
    linger: u64,
) -> Result<()> {
    let identity = Arc::new(load_identity(&cli.identity)?);
    let parties = PartyFile::load(&cli.parties)?;
    let me = parties.find(&identity.certificate())?.clone();
    let n = parties.n();

    info!(
        party_id = me.id,
        n_parties = n,
        threshold = parties.threshold,
        "Starting DKG"
    );

    let channel = ChannelConfig {
        connect_retries,
        retry_backoff: Duration::from_millis(500),
        ..ChannelConfig::default()
    };
    let listener = listen_with_config(
        listen.unwrap_or(&me.endpoint),
        identity.clone(),
        channel.clone(),
    )
    .await?;
    let (inbound, _stop) = service_connections(listener, Arc::new(parties.directory()?));
    let outbound = RemoteParties::new(me.id, parties.connections(&auth_with(identity)), channel);

    let party = Arc::new(Tbls::new(me.id));
    party.init(&parties.members(), parties.threshold, Arc::new(outbound))?;
    tokio::spawn(party.router().run(inbound));

    let deadline = Instant::now() + Duration::from_secs(timeout);
    let share = party.keygen(deadline, n, parties.threshold).await?;
    party.set_share_data(share.as_bytes())?;
    let public_key = hex::encode(party.threshold_pk()?);

    let file = KeyShareFile {
        party_id: me.id,
        n: n as u16,
        threshold: parties.threshold as u16,
        public_key: public_key.clone(),
        share: hex::encode(share.as_bytes()),
    };
    let path = key_share_path(cli, me.id);
    std::fs::write(&path, serde_json::to_string_pretty(&file)?)?;

    info!(public_key = %public_key, path = ?path, "DKG completed, key share saved");
    println!("Public Key: {public_key}");

    // Peers may still be waiting on our acknowledgement
    tokio::time::sleep(Duration::from_secs(linger)).await;
    Ok(())
}

fn run_sign(cli: &Cli, digest: &DigestArgs) -> Result<()> {
    let signer = load_signer(cli)?;
    let digest = digest.resolve()?;
    let partial = signer.sign(&digest)?;

    info!(party_id = partial.party_id, digest = %hex::encode(digest), "Partial signature generated");
    println!("{}:{}", partial.party_id, hex::encode(partial.signature_bytes()));
    Ok(())
}

fn run_aggregate(
    cli: &Cli,
    digest: &DigestArgs,
    partials: &str,
    public_key: Option<&str>,
) -> Result<()> {
    let verifier = load_verifier(cli, public_key)?;
    let digest = digest.resolve()?;

    let mut indices = Vec::new();
    let mut signatures = Vec::new();
    for entry in partials.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (party, sig) = entry
            .split_once(':')
            .ok_or_else(|| anyhow!("partial {entry:?} is not party:hex"))?;
        indices.push(party.trim().parse::<PartyId>()?);
        signatures.push(hex::decode(sig.trim())?);
    }

    let signature = verifier.aggregate_signatures(&signatures, &indices)?;
    let bytes = signature.to_bytes();
    verifier
        .verify(&digest, &bytes)
        .context("aggregated signature does not verify")?;

    info!(parties = ?indices, "Signature aggregated and verified");
    println!("Signature: {}", hex::encode(bytes));
    Ok(())
}

fn run_verify(
    cli: &Cli,
    digest: &DigestArgs,
    signature: &str,
    public_key: Option<&str>,
) -> Result<()> {
    let verifier = load_verifier(cli, public_key)?;
    let digest = digest.resolve()?;
    verifier.verify(&digest, &hex::decode(signature.trim())?)?;

    println!("Signature is valid");
    Ok(())
}

fn show_info(cli: &Cli) -> Result<()> {
    let signer = load_signer(cli)?;
    let share = signer
        .share_data()
        .ok_or_else(|| anyhow!("no key share installed"))?;

    println!("Key Share Info:");
    println!("  Party ID: {}", share.party_id);
    println!("  N Parties: {}", share.params.n);
    println!("  Threshold: {}", share.params.t);
    println!("  Public Key: {}", hex::encode(signer.threshold_pk()?));
    println!(
        "  Public Share: {}",
        hex::encode(signer.public_share(share.party_id)?)
    );

    Ok(())
}

fn load_identity(path: &Path) -> Result<Identity> {
    let secret = std::fs::read_to_string(path)
        .with_context(|| format!("reading identity {}", path.display()))?;
    Ok(Identity::from_secret_hex(&secret)?)
}

fn key_share_path(cli: &Cli, party_id: PartyId) -> PathBuf {
    cli.dest.join(format!("keyshare.{party_id}.json"))
}

/// Key share of the local identity; the party file is only needed to map
/// the identity to its index
fn load_key_share(cli: &Cli, identity: &Identity) -> Result<KeyShareFile> {
    let parties = PartyFile::load(&cli.parties)?;
    let party_id = parties.find(&identity.certificate())?.id;
    let path = key_share_path(cli, party_id);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("reading key share {}", path.display()))?;
    Ok(serde_json::from_str(&json)?)
}

fn load_signer(cli: &Cli) -> Result<Signer> {
    let identity = load_identity(&cli.identity)?;
    let file = load_key_share(cli, &identity)?;
    let share = hex::decode(&file.share)?;

    let members: Vec<PartyId> = (1..=file.n).collect();
    let signer = Signer::new(file.party_id);
    signer.init(&members, file.threshold as usize)?;
    signer.set_share_data(&share)?;
    Ok(signer)
}

fn load_verifier(cli: &Cli, public_key: Option<&str>) -> Result<Verifier> {
    let public_key = match public_key {
        Some(key) => key.trim().to_string(),
        None => {
            let identity = load_identity(&cli.identity)?;
            load_key_share(cli, &identity)?.public_key
        }
    };
    Ok(Verifier::new(&hex::decode(public_key)?)?)
}
