use anyhow::{Context, Result};
use round_lib::reconciler::SweepReport;

use crate::App;

/// One sweep: resolve in-flight submissions, then bring every round the
/// mirror may be wrong about up to the ledger's view.
pub fn run_one(app: &App) -> Result<SweepReport> {
    app.service().sweep().context("reconciliation sweep failed")
}
