use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use round_keepers::{App, config, logging::LogTarget};
use round_lib::client::LedgerGateway;
use round_lib::types::{Bet, Outcome, ProofRef};
use serde::Serialize;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "roundctl", about = "Round keeper operations CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stake on an outcome in the current round, signing with the keeper keypair.
    Bet {
        #[arg(long)]
        outcome: Outcome,
        #[arg(long)]
        amount: u64,
    },
    Close {
        #[arg(long)]
        round: u64,
    },
    Finalize {
        #[arg(long)]
        round: u64,
        #[arg(long)]
        outcome: Outcome,
    },
    StartNext,
    Withdraw {
        #[arg(long)]
        round: u64,
    },
    /// Mirrored round (current round when no id is given).
    Round {
        #[arg(long)]
        id: Option<u64>,
        /// Read the ledger instead of the mirror.
        #[arg(long, default_value_t = false)]
        ledger: bool,
    },
    Bets {
        #[arg(long)]
        round: u64,
    },
    Payouts {
        #[arg(long)]
        round: u64,
    },
    Treasury,
    /// Record a bet confirmed elsewhere, after checking its proof on the ledger.
    RecordBet {
        #[arg(long)]
        round: u64,
        #[arg(long)]
        bettor: String,
        #[arg(long)]
        outcome: Outcome,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        proof_ref: String,
    },
    Pending,
    Sweep,
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load()?;
    round_keepers::logging::init_tracing(&cfg, LogTarget::Stderr);

    let app = App::init_from(cfg)?;
    let svc = app.service();

    match cli.command {
        Commands::Bet { outcome, amount } => print(&svc.place_bet(outcome, amount)?),
        Commands::Close { round } => print(&svc.close_round(round)?),
        Commands::Finalize { round, outcome } => print(&svc.finalize_round(round, outcome)?),
        Commands::StartNext => print(&svc.start_next_round()?),
        Commands::Withdraw { round } => print(&svc.withdraw(round)?),
        Commands::Round { id, ledger: true } => {
            let id = match id {
                Some(id) => id,
                None => svc
                    .gateway()
                    .read_current_round_id()
                    .context("failed to read current round")?,
            };
            print(&svc.ledger_round(id)?)
        }
        Commands::Round { id, ledger: false } => {
            let projection = match id {
                Some(id) => svc.round(id)?,
                None => svc.current_round()?,
            };
            print(&projection)
        }
        Commands::Bets { round } => print(&svc.bets(round)?),
        Commands::Payouts { round } => print(&svc.payouts(round)?),
        Commands::Treasury => print(&json!({
            "balance": svc.treasury_balance()?,
            "entries": svc.treasury()?,
        })),
        Commands::RecordBet {
            round,
            bettor,
            outcome,
            amount,
            proof_ref,
        } => {
            let bet = Bet {
                round_id: round,
                bettor,
                outcome,
                amount,
                proof_ref: ProofRef::new(proof_ref),
                recorded_at: Utc::now(),
            };
            print(&svc.record_external_bet(&bet)?)
        }
        Commands::Pending => print(&svc.pending()?),
        Commands::Sweep => print(&svc.sweep()?),
    }
}
