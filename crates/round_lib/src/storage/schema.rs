use rusqlite::{Connection, Result};

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Confirmed bets, append-only. seq preserves insertion order.
        CREATE TABLE IF NOT EXISTS bets (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            round_id INTEGER NOT NULL,
            bettor TEXT NOT NULL,
            outcome TEXT NOT NULL,                    -- a|b
            amount INTEGER NOT NULL CHECK (amount > 0),
            proof_ref TEXT NOT NULL UNIQUE,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_bets_round ON bets(round_id, seq);

        -- One row per round id, replaced under the monotonic phase rule.
        CREATE TABLE IF NOT EXISTS round_projections (
            round_id INTEGER PRIMARY KEY,
            phase TEXT NOT NULL,                      -- open|closed|finalized
            winning_outcome TEXT,
            pool_a INTEGER NOT NULL DEFAULT 0,
            pool_b INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payouts (
            round_id INTEGER NOT NULL,
            bettor TEXT NOT NULL,
            amount INTEGER NOT NULL,
            claimed INTEGER NOT NULL DEFAULT 0,
            claim_proof_ref TEXT,
            claimed_at TEXT,
            PRIMARY KEY (round_id, bettor)
        );

        CREATE TABLE IF NOT EXISTS treasury (
            round_id INTEGER PRIMARY KEY,
            remainder INTEGER NOT NULL,
            winning_outcome TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS reconcile_flags (
            round_id INTEGER PRIMARY KEY,
            reason TEXT NOT NULL,
            flagged_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_submissions (
            proof_ref TEXT PRIMARY KEY,
            round_id INTEGER NOT NULL,
            kind TEXT NOT NULL,                       -- bet|close|finalize|start_next|withdraw
            payload TEXT NOT NULL,                    -- JSON PendingKind
            submitted_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_round ON pending_submissions(round_id);

        -- Audit trail of every ledger submission attempt
        CREATE TABLE IF NOT EXISTS submission_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
            keeper_instance_id TEXT NOT NULL,         -- hostname:pid or configured id
            op TEXT NOT NULL,                         -- place_bet|close_betting|...
            round_id INTEGER,
            proof_ref TEXT,
            status TEXT NOT NULL,                     -- submitted|failed
            error_class TEXT,                         -- transient|authoritative
            error_message TEXT,
            attempt INTEGER DEFAULT 0,
            backoff_ms INTEGER DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_sublogs_ts ON submission_logs(timestamp);
        CREATE INDEX IF NOT EXISTS idx_sublogs_round ON submission_logs(round_id);
        CREATE INDEX IF NOT EXISTS idx_sublogs_proof ON submission_logs(proof_ref);
        "#,
    )
}
