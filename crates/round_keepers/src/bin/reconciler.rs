use anyhow::Result;
use round_keepers::{App, config, logging::LogTarget};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load()?;
    round_keepers::logging::init_tracing(&cfg, LogTarget::Stdout);

    let period = Duration::from_secs(cfg.reconcile_period_in_secs.max(1));
    let start = Instant::now();
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let app = App::init_from(cfg)?;
    info!(period_secs = period.as_secs(), "reconciler started");

    loop {
        ticker.tick().await;

        match round_keepers::keepers::reconcile::run_one(&app) {
            Ok(report) => {
                if report.rounds_written > 0 || report.pending_confirmed > 0 || report.failures > 0 {
                    info!(
                        rounds_written = report.rounds_written,
                        pending_confirmed = report.pending_confirmed,
                        failures = report.failures,
                        "mirror reconciled"
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "run_one error");
            }
        }
    }
}
