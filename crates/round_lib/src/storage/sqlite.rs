use once_cell::sync::OnceCell;
use rusqlite::{Connection, params};
use std::fs::create_dir_all;
use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::schema::create_tables;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct SubmissionLogConfig {
    pub path: String,
    pub batch_max: usize,
    pub batch_ms: u64,
    pub queue_cap: usize,
    pub retention_days: u64,
    pub keeper_instance_id: String,
}

/// One ledger submission attempt.
#[derive(Clone, Debug, Default)]
pub struct SubmissionLog {
    pub op: String,
    pub round_id: Option<u64>,
    pub proof_ref: Option<String>,
    pub status: String, // submitted|failed
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub attempt: u32,
    pub backoff_ms: u64,
}

/// Batches submission logs on a background thread so the submit path never
/// waits on disk.
pub struct SubmissionLogger {
    tx: SyncSender<SubmissionLog>,
    _handle: JoinHandle<()>,
}

static GLOBAL_LOGGER: OnceCell<SubmissionLogger> = OnceCell::new();

impl SubmissionLogger {
    pub fn start(cfg: SubmissionLogConfig) -> Result<Self> {
        if let Some(parent) = Path::new(&cfg.path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = create_dir_all(parent);
            }
        }
        let conn = Connection::open(&cfg.path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        create_tables(&conn)?;

        let (tx, rx) = sync_channel::<SubmissionLog>(cfg.queue_cap.max(1));
        let handle = thread::Builder::new()
            .name("submission-log".into())
            .spawn(move || run_writer(conn, rx, cfg))?;

        Ok(Self {
            tx,
            _handle: handle,
        })
    }

    /// Drops the entry if the queue is full rather than blocking a submission.
    pub fn send(&self, entry: SubmissionLog) {
        if let Err(TrySendError::Full(entry)) = self.tx.try_send(entry) {
            tracing::warn!(op = %entry.op, "submission log queue full, entry dropped");
        }
    }
}

fn run_writer(mut conn: Connection, rx: Receiver<SubmissionLog>, cfg: SubmissionLogConfig) {
    let mut buffer: Vec<SubmissionLog> = Vec::with_capacity(cfg.batch_max);
    let flush_interval = Duration::from_millis(cfg.batch_ms);
    let mut last_flush = Instant::now();
    let retention_interval = Duration::from_secs(3600);
    let mut last_retention = Instant::now();

    loop {
        let disconnected = match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(item) => {
                buffer.push(item);
                false
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
        };

        let due = last_flush.elapsed() >= flush_interval || buffer.len() >= cfg.batch_max;
        if !buffer.is_empty() && (due || disconnected) {
            if let Err(e) = flush(&mut conn, &cfg.keeper_instance_id, &mut buffer) {
                tracing::error!(error = %e, "failed to flush submission logs");
                buffer.clear();
            }
            last_flush = Instant::now();
        }

        if last_retention.elapsed() >= retention_interval {
            if let Err(e) = conn.execute(
                "DELETE FROM submission_logs WHERE timestamp < datetime('now', ?1)",
                [format!("-{} days", cfg.retention_days)],
            ) {
                tracing::warn!(error = %e, "submission log retention failed");
            }
            last_retention = Instant::now();
        }

        if disconnected {
            return;
        }
    }
}

fn flush(
    conn: &mut Connection,
    instance_id: &str,
    buffer: &mut Vec<SubmissionLog>,
) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO submission_logs (
                keeper_instance_id, op, round_id, proof_ref, status,
                error_class, error_message, attempt, backoff_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for e in buffer.drain(..) {
            stmt.execute(params![
                instance_id,
                e.op,
                e.round_id,
                e.proof_ref,
                e.status,
                e.error_class,
                e.error_message,
                e.attempt,
                e.backoff_ms,
            ])?;
        }
    }
    tx.commit()
}

pub fn init_global_logger(cfg: SubmissionLogConfig) -> Result<()> {
    let logger = SubmissionLogger::start(cfg)?;
    let _ = GLOBAL_LOGGER.set(logger);
    Ok(())
}

/// No-op until [`init_global_logger`] has run.
pub fn log_submission(entry: SubmissionLog) {
    if let Some(logger) = GLOBAL_LOGGER.get() {
        logger.send(entry);
    }
}

pub fn is_initialized() -> bool {
    GLOBAL_LOGGER.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_flushes_batches_to_disk() {
        let path = std::env::temp_dir().join(format!(
            "round_lib_sublog_{}_{}.db",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let cfg = SubmissionLogConfig {
            path: path.to_string_lossy().into_owned(),
            batch_max: 2,
            batch_ms: 10,
            queue_cap: 16,
            retention_days: 7,
            keeper_instance_id: "test-keeper".into(),
        };
        let logger = SubmissionLogger::start(cfg).unwrap();
        for attempt in 0..3 {
            logger.send(SubmissionLog {
                op: "close_betting".into(),
                round_id: Some(1),
                status: "failed".into(),
                error_class: Some("transient".into()),
                attempt,
                ..Default::default()
            });
        }
        // dropping the sender disconnects the writer, which flushes and exits
        let SubmissionLogger { tx, _handle } = logger;
        drop(tx);
        _handle.join().unwrap();

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM submission_logs WHERE keeper_instance_id = 'test-keeper'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
        let _ = std::fs::remove_file(&path);
    }
}
