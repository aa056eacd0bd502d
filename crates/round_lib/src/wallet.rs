use anyhow::{Context, Result, bail};
use serde_json::from_str;
use solana_sdk::{signature::Keypair, signer::SeedDerivable};
use std::fs::read_to_string;
use std::path::Path;

/// Load the keeper keypair from a JSON byte-array file (solana-keygen format).
pub fn load_keypair_from_file(path: impl AsRef<Path>) -> Result<Keypair> {
    let path = path.as_ref();
    let contents = read_to_string(path)
        .with_context(|| format!("Failed to read keypair file: {}", path.display()))?;
    keypair_from_json(&contents)
}

pub fn keypair_from_json(contents: &str) -> Result<Keypair> {
    let keypair_data: Vec<u8> = from_str(contents).context("Failed to parse keypair JSON")?;

    if keypair_data.len() != 64 {
        bail!(
            "Invalid keypair length: expected 64 bytes, got {}",
            keypair_data.len()
        );
    }

    // the first half is the ed25519 seed, the second the public key
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&keypair_data[..32]);

    Keypair::from_seed(&seed)
        .map_err(|e| anyhow::anyhow!("Failed to create keypair from seed: {}", e))
}
