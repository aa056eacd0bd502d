use crate::config::RuntimeConfig;
use anyhow::{Context, Result};
use round_lib::{
    client::{RpcLedgerGateway, rpc::Rpc},
    retry::RetryPolicy,
    service::{ConfirmPolicy, RoundService},
    storage::{MirrorStore, SubmissionLogConfig, init_global_logger, sqlite::is_initialized},
    wallet::load_keypair_from_file,
};
use std::sync::Arc;
use std::time::Duration;

pub mod config;
pub mod keepers;
pub mod logging;

pub struct App {
    service: RoundService<RpcLedgerGateway>,
}

impl App {
    pub fn init_from(cfg: RuntimeConfig) -> Result<Self> {
        if !is_initialized() {
            init_global_logger(SubmissionLogConfig {
                path: cfg.mirror_db_path.clone(),
                batch_max: cfg.audit_batch_max,
                batch_ms: cfg.audit_batch_ms,
                queue_cap: cfg.audit_queue_cap,
                retention_days: cfg.audit_retention_days,
                keeper_instance_id: cfg.keeper_instance_id.clone(),
            })
            .context("failed to start submission log writer")?;
        }

        let retry = RetryPolicy::new(
            cfg.retry_max_attempts,
            cfg.retry_base_delay_ms,
            cfg.retry_max_delay_ms,
            0.2,
        );
        let rpc = Rpc::new(
            &cfg.solana_rpc_url,
            cfg.rpc_timeout_ms,
            cfg.commitment,
            cfg.preflight,
            cfg.tx_max_retries,
            cfg.cu_limit,
            cfg.cu_price_micro_lamports,
            retry,
        );
        let signer = Arc::new(load_keypair_from_file(&cfg.keeper_keypair_path)?);
        let gateway = RpcLedgerGateway::new(rpc, signer, cfg.program_id, cfg.system_program_id);

        let store = MirrorStore::open(&cfg.mirror_db_path)
            .with_context(|| format!("failed to open mirror store at {}", cfg.mirror_db_path))?;
        let confirm = ConfirmPolicy {
            poll_interval: Duration::from_millis(cfg.confirm_poll_ms),
            timeout: Duration::from_millis(cfg.confirm_timeout_ms),
        };

        Ok(Self {
            service: RoundService::new(gateway, store, confirm, cfg.admin_address),
        })
    }

    pub fn service(&self) -> &RoundService<RpcLedgerGateway> {
        &self.service
    }
}
