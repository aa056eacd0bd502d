use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    rpc_client::RpcClient,
    rpc_config::{RpcSendTransactionConfig, RpcTransactionConfig},
};
use solana_commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    instruction::Instruction,
    signature::{Keypair, Signature, Signer},
    transaction::{Transaction, VersionedTransaction},
};
use solana_transaction_status_client_types::UiTransactionEncoding;
use std::time::Duration;

use crate::error::{Result, RoundError};
use crate::retry::RetryPolicy;
use crate::storage::{SubmissionLog, log_submission};

pub struct Rpc {
    inner: RpcClient,
    commitment_cfg: CommitmentConfig,
    send_cfg: RpcSendTransactionConfig,
    cu_limit: Option<u32>,
    cu_price_micro_lamports: Option<u64>,
    retry: RetryPolicy,
}

impl Rpc {
    pub fn new(
        rpc_url: &str,
        timeout_ms: u64,
        commitment: CommitmentLevel,
        preflight: bool,
        max_retries: usize,
        cu_limit: Option<u32>,
        cu_price_micro_lamports: Option<u64>,
        retry: RetryPolicy,
    ) -> Self {
        let commitment_cfg = CommitmentConfig { commitment };
        let inner = RpcClient::new_with_timeout_and_commitment(
            rpc_url.to_string(),
            Duration::from_millis(timeout_ms),
            commitment_cfg,
        );
        let send_cfg = RpcSendTransactionConfig {
            skip_preflight: !preflight,
            max_retries: Some(max_retries),
            preflight_commitment: Some(commitment),
            ..Default::default()
        };

        Self {
            inner,
            commitment_cfg,
            send_cfg,
            cu_limit,
            cu_price_micro_lamports,
            retry,
        }
    }

    pub fn client(&self) -> &RpcClient {
        &self.inner
    }

    pub fn commitment_cfg(&self) -> &CommitmentConfig {
        &self.commitment_cfg
    }

    /// Signs once and resends the same transaction on transient failures, so a
    /// send that did reach the cluster before the error cannot land twice.
    /// Returns as soon as the node accepted the transaction.
    pub fn send_instructions(
        &self,
        op: &str,
        round_id: u64,
        payer: &Keypair,
        instructions: Vec<Instruction>,
    ) -> Result<Signature> {
        let mut ixs = Vec::with_capacity(instructions.len() + 2);
        if let Some(limit) = self.cu_limit {
            ixs.push(ComputeBudgetInstruction::set_compute_unit_limit(limit));
        }
        if let Some(price) = self.cu_price_micro_lamports {
            ixs.push(ComputeBudgetInstruction::set_compute_unit_price(price));
        }
        ixs.extend(instructions);

        let blockhash = self.retry.run(|_, _| {
            self.inner
                .get_latest_blockhash()
                .map_err(|e| classify_client_error(&e))
        })?;
        let tx = Transaction::new_signed_with_payer(&ixs, Some(&payer.pubkey()), &[payer], blockhash);

        self.retry.run(|attempt, backoff| {
            let res = self
                .inner
                .send_transaction_with_config(&tx, self.send_cfg.clone())
                .map_err(|e| classify_client_error(&e));
            let mut entry = SubmissionLog {
                op: op.to_string(),
                round_id: Some(round_id),
                attempt: attempt as u32,
                backoff_ms: backoff.as_millis() as u64,
                ..Default::default()
            };
            match &res {
                Ok(sig) => {
                    entry.status = "submitted".into();
                    entry.proof_ref = Some(sig.to_string());
                    tracing::info!(op, round_id, signature = %sig, attempt, "submitted");
                }
                Err(err) => {
                    entry.status = "failed".into();
                    entry.error_class = Some(
                        if err.is_transient() { "transient" } else { "authoritative" }.into(),
                    );
                    entry.error_message = Some(err.to_string());
                }
            }
            log_submission(entry);
            res
        })
    }

    pub fn signature_status(&self, sig: &Signature) -> Result<Option<std::result::Result<(), String>>> {
        let status = self
            .inner
            .get_signature_status(sig)
            .map_err(|e| classify_client_error(&e))?;
        Ok(status.map(|r| r.map_err(|e| e.to_string())))
    }

    /// The transaction behind a confirmed signature, `None` if it failed on-chain.
    pub fn confirmed_transaction(&self, sig: &Signature) -> Result<Option<VersionedTransaction>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment_cfg),
            max_supported_transaction_version: Some(0),
        };
        let fetched = self
            .inner
            .get_transaction_with_config(sig, config)
            .map_err(|e| classify_client_error(&e))?;
        if fetched.transaction.meta.as_ref().is_some_and(|m| m.err.is_some()) {
            return Ok(None);
        }
        fetched
            .transaction
            .transaction
            .decode()
            .map(Some)
            .ok_or_else(|| RoundError::Authoritative(format!("transaction {} could not be decoded", sig)))
    }
}

/// Transport failures never reached the ledger; everything else (including
/// preflight simulation failures) is the ledger speaking.
pub fn classify_client_error(err: &ClientError) -> RoundError {
    match err.kind() {
        ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => {
            RoundError::TransientIo(err.to_string())
        }
        _ => RoundError::Authoritative(err.to_string()),
    }
}
