use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fs::create_dir_all;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::schema::create_tables;
use crate::error::{Result, RoundError};
use crate::types::{
    Bet, Outcome, PayoutRecord, PendingKind, PendingSubmission, PoolTotals, ProofRef,
    RoundPhase, RoundProjection, RoundStatus, TreasuryEntry,
};

/// SQLite-backed mirror: bet log, round projections, payouts, treasury,
/// reconciliation flags and in-flight submissions. One connection per
/// process, serialized behind a mutex.
pub struct MirrorStore {
    conn: Mutex<Connection>,
}

impl MirrorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panic while holding the lock leaves no partial write behind (every
        // multi-statement write runs in a transaction), so poisoning is ignored
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn raw(&self) -> MutexGuard<'_, Connection> {
        self.conn()
    }

    // ---- bets ----

    /// Returns false if a bet with the same proof reference already exists.
    pub fn insert_bet(&self, bet: &Bet) -> Result<bool> {
        let changed = self.conn().execute(
            "INSERT INTO bets (round_id, bettor, outcome, amount, proof_ref, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(proof_ref) DO NOTHING",
            params![
                bet.round_id,
                bet.bettor,
                bet.outcome.as_str(),
                bet.amount,
                bet.proof_ref.as_str(),
                bet.recorded_at,
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn contains_proof(&self, proof_ref: &ProofRef) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM bets WHERE proof_ref = ?1",
                [proof_ref.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn bets_for_round(&self, round_id: u64) -> Result<Vec<Bet>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT round_id, bettor, outcome, amount, proof_ref, recorded_at
             FROM bets WHERE round_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([round_id], bet_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---- round projections ----

    pub fn projection(&self, round_id: u64) -> Result<Option<RoundProjection>> {
        Ok(load_projection(&self.conn(), round_id)?)
    }

    pub fn latest_projection(&self) -> Result<Option<RoundProjection>> {
        let projection = self
            .conn()
            .query_row(
                "SELECT round_id, phase, winning_outcome, pool_a, pool_b, created_at, updated_at
                 FROM round_projections ORDER BY round_id DESC LIMIT 1",
                [],
                projection_from_row,
            )
            .optional()?;
        Ok(projection)
    }

    pub fn projection_ids(&self) -> Result<Vec<u64>> {
        self.query_ids("SELECT round_id FROM round_projections ORDER BY round_id")
    }

    pub fn unfinalized_projection_ids(&self) -> Result<Vec<u64>> {
        self.query_ids(
            "SELECT round_id FROM round_projections WHERE phase != 'finalized' ORDER BY round_id",
        )
    }

    /// Reads the stored projection and lets `decide` produce its replacement
    /// inside one transaction, so concurrent writers never interleave between
    /// the comparison and the write.
    pub fn update_projection<T, F>(&self, round_id: u64, decide: F) -> Result<T>
    where
        F: FnOnce(Option<&RoundProjection>) -> (Option<RoundProjection>, T),
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current = load_projection(&tx, round_id)?;
        let (replacement, result) = decide(current.as_ref());
        if let Some(p) = replacement {
            tx.execute(
                "INSERT INTO round_projections
                    (round_id, phase, winning_outcome, pool_a, pool_b, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(round_id) DO UPDATE SET
                    phase = excluded.phase,
                    winning_outcome = excluded.winning_outcome,
                    pool_a = excluded.pool_a,
                    pool_b = excluded.pool_b,
                    updated_at = excluded.updated_at",
                params![
                    p.id,
                    p.phase().as_str(),
                    p.status.winning_outcome().map(Outcome::as_str),
                    p.pools.a,
                    p.pools.b,
                    p.created_at,
                    p.updated_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(result)
    }

    // ---- reconciliation flags ----

    pub fn flag_round(&self, round_id: u64, reason: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO reconcile_flags (round_id, reason, flagged_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(round_id) DO UPDATE SET reason = excluded.reason, flagged_at = excluded.flagged_at",
            params![round_id, reason, Utc::now()],
        )?;
        Ok(())
    }

    pub fn flagged_rounds(&self) -> Result<Vec<u64>> {
        self.query_ids("SELECT round_id FROM reconcile_flags ORDER BY round_id")
    }

    pub fn clear_flag(&self, round_id: u64) -> Result<()> {
        self.conn()
            .execute("DELETE FROM reconcile_flags WHERE round_id = ?1", [round_id])?;
        Ok(())
    }

    // ---- pending submissions ----

    pub fn insert_pending(&self, pending: &PendingSubmission) -> Result<()> {
        let payload = serde_json::to_string(&pending.kind)
            .map_err(|e| RoundError::validation(format!("unencodable pending kind: {}", e)))?;
        self.conn().execute(
            "INSERT INTO pending_submissions (proof_ref, round_id, kind, payload, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(proof_ref) DO NOTHING",
            params![
                pending.proof_ref.as_str(),
                pending.round_id,
                pending.kind.label(),
                payload,
                pending.submitted_at,
            ],
        )?;
        Ok(())
    }

    pub fn pending_submissions(&self) -> Result<Vec<PendingSubmission>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT proof_ref, round_id, payload, submitted_at
             FROM pending_submissions ORDER BY submitted_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let payload: String = row.get(2)?;
            let kind: PendingKind = serde_json::from_str(&payload)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
            Ok(PendingSubmission {
                proof_ref: ProofRef::new(row.get::<_, String>(0)?),
                round_id: row.get(1)?,
                kind,
                submitted_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn remove_pending(&self, proof_ref: &ProofRef) -> Result<()> {
        self.conn().execute(
            "DELETE FROM pending_submissions WHERE proof_ref = ?1",
            [proof_ref.as_str()],
        )?;
        Ok(())
    }

    pub fn has_pending_withdrawal(&self, round_id: u64, bettor: &str) -> Result<bool> {
        Ok(self.pending_submissions()?.iter().any(|p| {
            p.round_id == round_id
                && matches!(&p.kind, PendingKind::Withdraw { bettor: b } if b == bettor)
        }))
    }

    // ---- payouts & treasury ----

    /// Persists computed payouts and the retained remainder, tagged with the
    /// outcome they were computed under. Existing rows are left untouched so
    /// a recomputation can never reset a claim.
    pub fn insert_payouts(
        &self,
        round_id: u64,
        winning_outcome: Outcome,
        records: &[PayoutRecord],
        remainder: u64,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO payouts (round_id, bettor, amount, claimed) VALUES (?1, ?2, ?3, 0)
                 ON CONFLICT(round_id, bettor) DO NOTHING",
            )?;
            for record in records {
                stmt.execute(params![record.round_id, record.bettor, record.amount])?;
            }
        }
        tx.execute(
            "INSERT INTO treasury (round_id, remainder, winning_outcome, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(round_id) DO NOTHING",
            params![round_id, remainder, winning_outcome.as_str(), Utc::now()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Outcome the round's stored payouts were computed under, if settled.
    pub fn settled_outcome(&self, round_id: u64) -> Result<Option<Outcome>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT winning_outcome FROM treasury WHERE round_id = ?1",
                [round_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|r| r.parse::<Outcome>()).transpose()
    }

    /// Drops a settlement: every unclaimed payout row and the treasury entry.
    /// Claimed rows stay, they record withdrawals the ledger already paid.
    pub fn discard_settlement(&self, round_id: u64) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let dropped = tx.execute(
            "DELETE FROM payouts WHERE round_id = ?1 AND claimed = 0",
            [round_id],
        )?;
        tx.execute("DELETE FROM treasury WHERE round_id = ?1", [round_id])?;
        tx.commit()?;
        Ok(dropped)
    }

    pub fn payouts_for_round(&self, round_id: u64) -> Result<Vec<PayoutRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT round_id, bettor, amount, claimed, claim_proof_ref
             FROM payouts WHERE round_id = ?1 ORDER BY bettor",
        )?;
        let rows = stmt.query_map([round_id], payout_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn payout(&self, round_id: u64, bettor: &str) -> Result<Option<PayoutRecord>> {
        let record = self
            .conn()
            .query_row(
                "SELECT round_id, bettor, amount, claimed, claim_proof_ref
                 FROM payouts WHERE round_id = ?1 AND bettor = ?2",
                params![round_id, bettor],
                payout_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Flips `claimed` only if it is still unset; false means someone got there first.
    pub fn mark_claimed(&self, round_id: u64, bettor: &str, proof_ref: &ProofRef) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE payouts SET claimed = 1, claim_proof_ref = ?3, claimed_at = ?4
             WHERE round_id = ?1 AND bettor = ?2 AND claimed = 0",
            params![round_id, bettor, proof_ref.as_str(), Utc::now()],
        )?;
        Ok(changed == 1)
    }

    pub fn treasury_entries(&self) -> Result<Vec<TreasuryEntry>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT round_id, remainder FROM treasury ORDER BY round_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(TreasuryEntry {
                round_id: row.get(0)?,
                remainder: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn treasury_balance(&self) -> Result<u64> {
        let total: u64 = self.conn().query_row(
            "SELECT COALESCE(SUM(remainder), 0) FROM treasury",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    fn query_ids(&self, sql: &str) -> Result<Vec<u64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, u64>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn parse_col<T: FromStr<Err = RoundError>>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn bet_from_row(row: &Row<'_>) -> rusqlite::Result<Bet> {
    let outcome: String = row.get(2)?;
    Ok(Bet {
        round_id: row.get(0)?,
        bettor: row.get(1)?,
        outcome: parse_col(2, &outcome)?,
        amount: row.get(3)?,
        proof_ref: ProofRef::new(row.get::<_, String>(4)?),
        recorded_at: row.get(5)?,
    })
}

fn projection_from_row(row: &Row<'_>) -> rusqlite::Result<RoundProjection> {
    let phase: String = row.get(1)?;
    let phase: RoundPhase = parse_col(1, &phase)?;
    let winning: Option<String> = row.get(2)?;
    let winning = winning
        .map(|w| parse_col::<Outcome>(2, &w))
        .transpose()?;
    let status = RoundStatus::from_parts(phase, winning)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let created_at: DateTime<Utc> = row.get(5)?;
    Ok(RoundProjection {
        id: row.get(0)?,
        status,
        pools: PoolTotals {
            a: row.get(3)?,
            b: row.get(4)?,
        },
        created_at,
        updated_at: row.get(6)?,
    })
}

fn payout_from_row(row: &Row<'_>) -> rusqlite::Result<PayoutRecord> {
    Ok(PayoutRecord {
        round_id: row.get(0)?,
        bettor: row.get(1)?,
        amount: row.get(2)?,
        claimed: row.get(3)?,
        claim_proof_ref: row.get::<_, Option<String>>(4)?.map(ProofRef::new),
    })
}

fn load_projection(conn: &Connection, round_id: u64) -> rusqlite::Result<Option<RoundProjection>> {
    conn.query_row(
        "SELECT round_id, phase, winning_outcome, pool_a, pool_b, created_at, updated_at
         FROM round_projections WHERE round_id = ?1",
        [round_id],
        projection_from_row,
    )
    .optional()
}
