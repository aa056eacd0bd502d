use anyhow::{Context, Result, anyhow};
use solana_commitment_config::CommitmentLevel;
use solana_sdk::pubkey::Pubkey;
use std::{env, str::FromStr};

const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";

#[derive(Clone)]
pub struct RuntimeConfig {
    pub solana_rpc_url: String,
    pub commitment: CommitmentLevel,
    pub rpc_timeout_ms: u64,
    pub tx_max_retries: usize,
    pub preflight: bool,
    pub cu_limit: Option<u32>,
    pub cu_price_micro_lamports: Option<u64>,

    pub keeper_keypair_path: String,
    pub admin_address: Option<String>,

    pub system_program_id: Pubkey,
    pub program_id: Pubkey,

    pub mirror_db_path: String,
    pub audit_batch_max: usize,
    pub audit_batch_ms: u64,
    pub audit_queue_cap: usize,
    pub audit_retention_days: u64,
    pub keeper_instance_id: String,

    pub reconcile_period_in_secs: u64,
    pub confirm_poll_ms: u64,
    pub confirm_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    pub log_level: String,
    pub log_format: String,
    pub log_color: bool,
}

pub fn load() -> Result<RuntimeConfig> {
    let _ = dotenvy::dotenv();

    let solana_rpc_url = env_str("SOLANA_RPC_URL", None).context("SOLANA_RPC_URL must be set")?;
    let commitment = env_commitment("COMMITMENT", Some(CommitmentLevel::Confirmed))
        .context("COMMITMENT must be processed, confirmed or finalized")?;
    let rpc_timeout_ms = env_u64("RPC_TIMEOUT_MS", Some(30_000)).context("RPC_TIMEOUT_MS must be a number")?;
    let tx_max_retries = env_usize("TX_MAX_RETRIES", Some(0)).context("TX_MAX_RETRIES must be a number")?;
    let preflight = env_bool("PREFLIGHT", Some(true)).context("PREFLIGHT must be true or false")?;
    let cu_limit = env_opt::<u32>("CU_LIMIT")?;
    let cu_price_micro_lamports = env_opt::<u64>("CU_PRICE_MICRO_LAMPORTS")?;

    let keeper_keypair_path =
        env_str("KEEPER_KEYPAIR_PATH", None).context("KEEPER_KEYPAIR_PATH must be set")?;
    let admin_address = env_str("ADMIN_ADDRESS", None).filter(|v| !v.is_empty());

    let system_program_id = env_pubkey("SYSTEM_PROGRAM_ID", Pubkey::from_str(SYSTEM_PROGRAM_ID).ok())
        .context("SYSTEM_PROGRAM_ID must be a valid pubkey")?;
    let program_id = env_pubkey("PROGRAM_ID", None).context("PROGRAM_ID must be set")?;

    let mirror_db_path =
        env_str("MIRROR_DB_PATH", Some("data/mirror.sqlite".into())).context("MIRROR_DB_PATH must be set")?;
    let audit_batch_max = env_usize("AUDIT_BATCH_MAX", Some(200)).context("AUDIT_BATCH_MAX must be a number")?;
    let audit_batch_ms = env_u64("AUDIT_BATCH_MS", Some(500)).context("AUDIT_BATCH_MS must be a number")?;
    let audit_queue_cap = env_usize("AUDIT_QUEUE_CAP", Some(10_000)).context("AUDIT_QUEUE_CAP must be a number")?;
    let audit_retention_days =
        env_u64("AUDIT_RETENTION_DAYS", Some(14)).context("AUDIT_RETENTION_DAYS must be a number")?;
    let keeper_instance_id = env_str("KEEPER_INSTANCE_ID", Some("round-keeper".into()))
        .context("KEEPER_INSTANCE_ID must be set")?;

    let reconcile_period_in_secs = env_u64("RECONCILE_PERIOD_IN_SECS", Some(30))
        .context("RECONCILE_PERIOD_IN_SECS must be a number")?;
    let confirm_poll_ms = env_u64("CONFIRM_POLL_MS", Some(500)).context("CONFIRM_POLL_MS must be a number")?;
    let confirm_timeout_ms =
        env_u64("CONFIRM_TIMEOUT_MS", Some(30_000)).context("CONFIRM_TIMEOUT_MS must be a number")?;
    let retry_max_attempts =
        env_usize("RETRY_MAX_ATTEMPTS", Some(5)).context("RETRY_MAX_ATTEMPTS must be a number")?;
    let retry_base_delay_ms =
        env_u64("RETRY_BASE_DELAY_MS", Some(250)).context("RETRY_BASE_DELAY_MS must be a number")?;
    let retry_max_delay_ms =
        env_u64("RETRY_MAX_DELAY_MS", Some(5_000)).context("RETRY_MAX_DELAY_MS must be a number")?;

    let log_level = env_str("LOG_LEVEL", Some("info".into())).context("LOG_LEVEL must be set")?;
    let log_format = env_str("LOG_FORMAT", Some("json".into())).context("LOG_FORMAT must be set")?;
    let log_color = env_bool("LOG_COLOR", Some(false)).context("LOG_COLOR must be true or false")?;

    Ok(RuntimeConfig {
        solana_rpc_url,
        commitment,
        rpc_timeout_ms,
        tx_max_retries,
        preflight,
        cu_limit,
        cu_price_micro_lamports,
        keeper_keypair_path,
        admin_address,
        system_program_id,
        program_id,
        mirror_db_path,
        audit_batch_max,
        audit_batch_ms,
        audit_queue_cap,
        audit_retention_days,
        keeper_instance_id,
        reconcile_period_in_secs,
        confirm_poll_ms,
        confirm_timeout_ms,
        retry_max_attempts,
        retry_base_delay_ms,
        retry_max_delay_ms,
        log_level,
        log_format,
        log_color,
    })
}

fn env_str(key: &str, default: Option<String>) -> Option<String> {
    env::var(key).ok().or(default)
}

fn env_bool(key: &str, default: Option<bool>) -> Option<bool> {
    match env::var(key) {
        Ok(v) => v.parse().ok(),
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Option<u64> {
    match env::var(key) {
        Ok(v) => v.parse().ok(),
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: Option<usize>) -> Option<usize> {
    match env::var(key) {
        Ok(v) => v.parse().ok(),
        Err(_) => default,
    }
}

/// Unset is `None`; a value that does not parse (or does not fit) is an error.
fn env_opt<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value: {:?}", key, v)),
        Err(_) => Ok(None),
    }
}

fn env_pubkey(key: &str, default: Option<Pubkey>) -> Option<Pubkey> {
    match env::var(key) {
        Ok(v) => Pubkey::from_str(&v).ok(),
        Err(_) => default,
    }
}

fn env_commitment(key: &str, default: Option<CommitmentLevel>) -> Option<CommitmentLevel> {
    let Ok(raw) = env::var(key) else {
        return default;
    };
    parse_commitment(&raw)
}

fn parse_commitment(raw: &str) -> Option<CommitmentLevel> {
    match raw.to_lowercase().as_str() {
        "finalized" => Some(CommitmentLevel::Finalized),
        "confirmed" => Some(CommitmentLevel::Confirmed),
        "processed" => Some(CommitmentLevel::Processed),
        _ => None,
    }
}
