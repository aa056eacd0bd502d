//! In-memory ledger program for tests. Enforces the same rules the on-chain
//! program does, and can hold transactions unconfirmed, fail transport, or be
//! mutated out-of-band.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::client::gateway::{Confirmation, LedgerGateway};
use crate::error::{Result, RoundError};
use crate::types::{Outcome, PlacedBet, PoolTotals, ProofRef, RoundSnapshot, RoundStatus};

#[derive(Clone, Debug)]
enum Intent {
    Bet {
        bettor: String,
        round_id: u64,
        outcome: Outcome,
        amount: u64,
    },
    Close {
        round_id: u64,
    },
    Finalize {
        round_id: u64,
        outcome: Outcome,
    },
    StartNext {
        next_id: u64,
    },
    Withdraw {
        bettor: String,
        round_id: u64,
    },
}

#[derive(Default)]
struct SimRound {
    status: Option<RoundStatus>,
    pools: PoolTotals,
    stakers: HashSet<String>,
    withdrawn: HashSet<String>,
}

#[derive(Default)]
struct SimState {
    current_round: u64,
    rounds: BTreeMap<u64, SimRound>,
    identity: String,
    next_sig: u64,
    hold: bool,
    queued: VecDeque<(ProofRef, Intent)>,
    results: HashMap<ProofRef, Confirmation>,
    sent: HashMap<ProofRef, Intent>,
    transient_submit_failures: usize,
    transient_read_failures: usize,
}

pub struct SimLedger {
    state: Mutex<SimState>,
}

impl SimLedger {
    /// Ledger with round 1 open, signing as `admin`.
    pub fn new() -> Self {
        let mut state = SimState {
            current_round: 1,
            identity: "admin".into(),
            ..Default::default()
        };
        state.rounds.insert(
            1,
            SimRound {
                status: Some(RoundStatus::Open),
                ..Default::default()
            },
        );
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn sign_as(&self, identity: &str) {
        self.lock().identity = identity.to_string();
    }

    /// Accepted submissions stay pending until [`SimLedger::land_pending`].
    pub fn hold_confirmations(&self, hold: bool) {
        self.lock().hold = hold;
    }

    pub fn fail_next_submits(&self, n: usize) {
        self.lock().transient_submit_failures = n;
    }

    pub fn fail_next_reads(&self, n: usize) {
        self.lock().transient_read_failures = n;
    }

    /// Executes held transactions in submission order.
    pub fn land_pending(&self) {
        let mut state = self.lock();
        while let Some((proof, intent)) = state.queued.pop_front() {
            let result = match execute(&mut state, &intent) {
                Ok(()) => Confirmation::Confirmed,
                Err(err) => Confirmation::Rejected(err.to_string()),
            };
            state.results.insert(proof, result);
        }
    }

    /// Runs an intent directly, as if another client had sent it.
    pub fn force_close(&self, round_id: u64) {
        let mut state = self.lock();
        execute(&mut state, &Intent::Close { round_id }).unwrap();
    }

    pub fn force_finalize(&self, round_id: u64, outcome: Outcome) {
        let mut state = self.lock();
        execute(&mut state, &Intent::Finalize { round_id, outcome }).unwrap();
    }

    fn submit(&self, intent: Intent) -> Result<ProofRef> {
        let mut state = self.lock();
        if state.transient_submit_failures > 0 {
            state.transient_submit_failures -= 1;
            return Err(RoundError::TransientIo("connection reset by peer".into()));
        }

        // preflight against current state
        preflight(&state, &intent)?;

        state.next_sig += 1;
        let proof = ProofRef::new(format!("sim-sig-{}", state.next_sig));
        state.sent.insert(proof.clone(), intent.clone());
        if state.hold {
            state.queued.push_back((proof.clone(), intent));
            state.results.insert(proof.clone(), Confirmation::Pending);
        } else {
            execute(&mut state, &intent)?;
            state.results.insert(proof.clone(), Confirmation::Confirmed);
        }
        Ok(proof)
    }

    fn check_read(&self) -> Result<()> {
        let mut state = self.lock();
        if state.transient_read_failures > 0 {
            state.transient_read_failures -= 1;
            return Err(RoundError::TransientIo("read timed out".into()));
        }
        Ok(())
    }
}

fn round_status(state: &SimState, round_id: u64) -> Result<RoundStatus> {
    state
        .rounds
        .get(&round_id)
        .and_then(|r| r.status)
        .ok_or(RoundError::RoundNotFound(round_id))
}

fn preflight(state: &SimState, intent: &Intent) -> Result<()> {
    let rejected = |msg: String| Err(RoundError::Authoritative(msg));
    match intent {
        Intent::Bet { round_id, amount, .. } => {
            if *amount == 0 {
                return rejected("zero stake".into());
            }
            if *round_id != state.current_round || round_status(state, *round_id)? != RoundStatus::Open {
                return rejected(format!("BettingClosed: round {}", round_id));
            }
        }
        Intent::Close { round_id } => {
            if round_status(state, *round_id)? != RoundStatus::Open {
                return rejected(format!("round {} not open", round_id));
            }
        }
        Intent::Finalize { round_id, .. } => {
            if round_status(state, *round_id)? != RoundStatus::Closed {
                return rejected(format!("round {} not closed", round_id));
            }
        }
        Intent::StartNext { next_id } => {
            let current = round_status(state, state.current_round)?;
            if !matches!(current, RoundStatus::Finalized(_)) || *next_id != state.current_round + 1 {
                return rejected(format!("cannot start round {}", next_id));
            }
        }
        Intent::Withdraw { bettor, round_id } => {
            let round = state
                .rounds
                .get(round_id)
                .ok_or(RoundError::RoundNotFound(*round_id))?;
            if !matches!(round.status, Some(RoundStatus::Finalized(_))) {
                return rejected(format!("round {} not finalized", round_id));
            }
            if !round.stakers.contains(bettor) {
                return rejected("no position".into());
            }
            if round.withdrawn.contains(bettor) {
                return rejected("AlreadyWithdrawn".into());
            }
        }
    }
    Ok(())
}

fn execute(state: &mut SimState, intent: &Intent) -> Result<()> {
    preflight(state, intent)?;
    match intent.clone() {
        Intent::Bet {
            bettor,
            round_id,
            outcome,
            amount,
        } => {
            let round = state.rounds.entry(round_id).or_default();
            round.pools.add(outcome, amount).expect("pool overflow");
            round.stakers.insert(bettor);
        }
        Intent::Close { round_id } => {
            state.rounds.entry(round_id).or_default().status = Some(RoundStatus::Closed);
        }
        Intent::Finalize { round_id, outcome } => {
            state.rounds.entry(round_id).or_default().status = Some(RoundStatus::Finalized(outcome));
        }
        Intent::StartNext { next_id } => {
            state.current_round = next_id;
            state.rounds.insert(
                next_id,
                SimRound {
                    status: Some(RoundStatus::Open),
                    ..Default::default()
                },
            );
        }
        Intent::Withdraw { bettor, round_id } => {
            state.rounds.entry(round_id).or_default().withdrawn.insert(bettor);
        }
    }
    Ok(())
}

impl LedgerGateway for SimLedger {
    fn identity(&self) -> String {
        self.lock().identity.clone()
    }

    fn submit_bet(&self, round_id: u64, outcome: Outcome, amount: u64) -> Result<ProofRef> {
        let bettor = self.identity();
        self.submit(Intent::Bet {
            bettor,
            round_id,
            outcome,
            amount,
        })
    }

    fn submit_close(&self, round_id: u64) -> Result<ProofRef> {
        self.submit(Intent::Close { round_id })
    }

    fn submit_finalize(&self, round_id: u64, outcome: Outcome) -> Result<ProofRef> {
        self.submit(Intent::Finalize { round_id, outcome })
    }

    fn submit_start_next(&self, next_id: u64) -> Result<ProofRef> {
        self.submit(Intent::StartNext { next_id })
    }

    fn submit_withdraw(&self, round_id: u64) -> Result<ProofRef> {
        let bettor = self.identity();
        self.submit(Intent::Withdraw { bettor, round_id })
    }

    fn confirmation(&self, proof_ref: &ProofRef) -> Result<Confirmation> {
        Ok(self
            .lock()
            .results
            .get(proof_ref)
            .cloned()
            .unwrap_or_else(|| Confirmation::Rejected("unknown signature".into())))
    }

    fn read_placed_bet(&self, proof_ref: &ProofRef, round_id: u64) -> Result<Option<PlacedBet>> {
        self.check_read()?;
        let state = self.lock();
        if state.results.get(proof_ref) != Some(&Confirmation::Confirmed) {
            return Ok(None);
        }
        Ok(match state.sent.get(proof_ref) {
            Some(Intent::Bet {
                bettor,
                round_id: bet_round,
                outcome,
                amount,
            }) if *bet_round == round_id => Some(PlacedBet {
                round_id,
                bettor: bettor.clone(),
                outcome: *outcome,
                amount: *amount,
            }),
            _ => None,
        })
    }

    fn read_current_round_id(&self) -> Result<u64> {
        self.check_read()?;
        Ok(self.lock().current_round)
    }

    fn read_round(&self, round_id: u64) -> Result<RoundSnapshot> {
        self.check_read()?;
        let state = self.lock();
        let round = state
            .rounds
            .get(&round_id)
            .ok_or(RoundError::RoundNotFound(round_id))?;
        Ok(RoundSnapshot {
            id: round_id,
            status: round.status.ok_or(RoundError::RoundNotFound(round_id))?,
            pools: round.pools,
        })
    }
}
