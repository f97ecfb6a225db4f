//! Example usage of [`eots_signer`] crate.
//!
//! Creates a key, publishes its randomness for a range of heights and signs a
//! block at every height. It then tries to sign a conflicting block through
//! the guarded path, which is refused, and through the unsafe path, which
//! leaks the private key.

use anyhow::{self};
use clap::Parser;
use eots_signer::{
    eots, EngineConfig, KeyringBackend, KeyringConfig, RandomnessOptions, SignRequest,
    SigningEngine,
};
use tracing::{info, span, warn, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CommandLineArgs {
    /// Chain to sign for.
    #[arg(short, long, default_value = "demo-chain")]
    chain_id: String,
    /// First height to sign.
    #[arg(short, long, default_value_t = 1)]
    start_height: u64,
    /// Number of heights to sign.
    #[arg(short, long, default_value_t = 10)]
    number_of_heights: u32,
    /// Keyring backend, `test` or `file`.
    #[arg(short, long, default_value = "test")]
    keyring_backend: String,
}

fn main() -> anyhow::Result<()> {
    let cli = CommandLineArgs::parse();
    // Set up logging.
    let filter = EnvFilter::from_default_env().add_directive("equivocation=info".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .compact()
        .init();
    let span = span!(Level::INFO, "main");
    let _enter = span.entered();

    anyhow::ensure!(cli.number_of_heights > 0, "need at least one height");
    let backend: KeyringBackend = cli.keyring_backend.parse()?;
    let dir = tempfile::tempdir()?;
    let config = EngineConfig {
        db_path: dir.path().join("data"),
        keyring: KeyringConfig {
            dir: dir.path().join("keyring"),
            backend,
            scrypt_log_n: 10,
        },
        disable_unsafe_endpoints: false,
    };
    let engine = SigningEngine::open(&config)?;

    let passphrase = "demo passphrase";
    let pk = engine.create_key("finality-provider", passphrase)?;
    if backend.is_encrypted() {
        engine.unlock(&pk, passphrase)?;
    }
    info!("Created key {}", pk);

    let chain_id = cli.chain_id.as_bytes();
    let nonces = engine.generate_randomness_list(
        &pk,
        chain_id,
        cli.start_height,
        cli.number_of_heights,
        RandomnessOptions::default(),
    )?;
    info!("Published {} public nonces", nonces.len());

    let requests: Vec<_> = (cli.start_height..)
        .take(nonces.len())
        .map(|height| SignRequest::new(format!("block {height}"), height))
        .collect();
    let signatures = engine.sign_batch(&pk, chain_id, &requests)?;
    for ((request, sig), nonce) in requests.iter().zip(&signatures).zip(&nonces) {
        eots::verify(&pk, nonce, &request.msg, sig)?;
    }
    info!("Signed and verified {} blocks", signatures.len());

    let height = cli.start_height;
    match engine.sign(&pk, chain_id, b"conflicting block", height) {
        Err(e) if e.is_double_sign() => info!("Guarded signing refused: {}", e),
        other => anyhow::bail!("expected a double-sign refusal, got {:?}", other),
    }

    let forged = engine.unsafe_sign(&pk, chain_id, b"conflicting block", height)?;
    let extracted = eots::extract(
        &pk,
        &nonces[0],
        &requests[0].msg,
        &signatures[0],
        b"conflicting block",
        &forged,
    )?;
    warn!(
        "Unsafe signing at height {} leaked the key of {}",
        height,
        extracted.public_key()
    );

    engine.close()?;
    Ok(())
}
