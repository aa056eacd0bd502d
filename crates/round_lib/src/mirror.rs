//! Off-chain projection of round state.
//!
//! The mirror is a cache. Every write is a full replace of the round's row
//! and only ever moves the phase forward (`Open < Closed < Finalized`), which
//! makes projecting the same ledger read any number of times, from any number
//! of writers, converge on the same row.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::state_machine::{Applied, RoundStateMachine, Transition};
use crate::storage::MirrorStore;
use crate::types::{RoundPhase, RoundProjection, RoundSnapshot, RoundStatus};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionWrite {
    Inserted,
    Advanced,
    /// Same phase, newer pools.
    Refreshed,
    /// Finalized on the ledger with a different outcome than the mirror held.
    OutcomeCorrected,
    Unchanged,
    /// The snapshot is behind the mirror and was not applied.
    StaleDiscarded,
}

impl ProjectionWrite {
    pub fn changed(self) -> bool {
        matches!(
            self,
            Self::Inserted | Self::Advanced | Self::Refreshed | Self::OutcomeCorrected
        )
    }
}

pub struct RoundMirror<'a> {
    store: &'a MirrorStore,
}

impl<'a> RoundMirror<'a> {
    pub fn new(store: &'a MirrorStore) -> Self {
        Self { store }
    }

    pub fn project(&self, snapshot: &RoundSnapshot) -> Result<ProjectionWrite> {
        let now = Utc::now();
        let write = self
            .store
            .update_projection(snapshot.id, |current| decide(current, snapshot, now))?;

        match write {
            ProjectionWrite::StaleDiscarded => tracing::warn!(
                round_id = snapshot.id,
                phase = %snapshot.phase(),
                pool_a = snapshot.pools.a,
                pool_b = snapshot.pools.b,
                "stale round read discarded"
            ),
            ProjectionWrite::OutcomeCorrected => tracing::warn!(
                round_id = snapshot.id,
                winning_outcome = ?snapshot.status.winning_outcome(),
                "mirrored winning outcome replaced by the ledger's"
            ),
            ProjectionWrite::Unchanged => {}
            other => tracing::debug!(
                round_id = snapshot.id,
                phase = %snapshot.phase(),
                write = ?other,
                "round projection written"
            ),
        }
        Ok(write)
    }

    pub fn get(&self, round_id: u64) -> Result<Option<RoundProjection>> {
        self.store.projection(round_id)
    }

    /// Highest mirrored round.
    pub fn current(&self) -> Result<Option<RoundProjection>> {
        self.store.latest_projection()
    }

    /// Admin phase write. The transition is checked against the mirrored
    /// current round by the same guards the submit path uses; replaying an
    /// applied transition is a no-op.
    pub fn apply_transition(&self, transition: Transition) -> Result<Applied> {
        let current = self.current()?;
        let mut machine = current
            .as_ref()
            .map(|p| RoundStateMachine::from_current(&p.snapshot()))
            .unwrap_or_else(RoundStateMachine::genesis);

        let applied = machine.apply(transition)?;
        if applied == Applied::AlreadyApplied {
            return Ok(applied);
        }

        let snapshot = match transition {
            Transition::StartNext { next_id } => RoundSnapshot::genesis(next_id),
            Transition::Close { round_id } | Transition::Finalize { round_id, .. } => {
                let pools = current
                    .filter(|p| p.id == round_id)
                    .map(|p| p.pools)
                    .unwrap_or_default();
                RoundSnapshot {
                    id: round_id,
                    status: machine.status(),
                    pools,
                }
            }
        };
        self.project(&snapshot)?;
        tracing::info!(round_id = transition.round_id(), ?transition, "admin transition applied");
        Ok(applied)
    }
}

fn decide(
    current: Option<&RoundProjection>,
    snapshot: &RoundSnapshot,
    now: DateTime<Utc>,
) -> (Option<RoundProjection>, ProjectionWrite) {
    let Some(current) = current else {
        let row = RoundProjection {
            id: snapshot.id,
            status: snapshot.status,
            pools: snapshot.pools,
            created_at: now,
            updated_at: now,
        };
        return (Some(row), ProjectionWrite::Inserted);
    };

    let write = match snapshot.phase().cmp(&current.phase()) {
        std::cmp::Ordering::Less => ProjectionWrite::StaleDiscarded,
        std::cmp::Ordering::Greater => ProjectionWrite::Advanced,
        std::cmp::Ordering::Equal => same_phase(current, snapshot),
    };
    if !write.changed() {
        return (None, write);
    }

    let row = RoundProjection {
        id: snapshot.id,
        status: snapshot.status,
        pools: snapshot.pools,
        created_at: current.created_at,
        updated_at: now,
    };
    (Some(row), write)
}

fn same_phase(current: &RoundProjection, snapshot: &RoundSnapshot) -> ProjectionWrite {
    if current.status == snapshot.status && current.pools == snapshot.pools {
        return ProjectionWrite::Unchanged;
    }
    match (current.status, snapshot.status) {
        // the ledger never re-finalizes, so a different outcome came from an admin mirror write
        (RoundStatus::Finalized(a), RoundStatus::Finalized(b)) if a != b => {
            ProjectionWrite::OutcomeCorrected
        }
        _ if snapshot.phase() != RoundPhase::Finalized && !snapshot.pools.covers(&current.pools) => {
            ProjectionWrite::StaleDiscarded
        }
        _ => ProjectionWrite::Refreshed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RoundError;
    use crate::types::{Outcome, PoolTotals};

    fn snap(id: u64, status: RoundStatus, a: u64, b: u64) -> RoundSnapshot {
        RoundSnapshot {
            id,
            status,
            pools: PoolTotals { a, b },
        }
    }

    #[test]
    fn advances_forward_and_discards_earlier_phases() {
        let store = MirrorStore::open_in_memory().unwrap();
        let mirror = RoundMirror::new(&store);

        assert_eq!(
            mirror.project(&snap(4, RoundStatus::Open, 1, 0)).unwrap(),
            ProjectionWrite::Inserted
        );
        assert_eq!(
            mirror
                .project(&snap(4, RoundStatus::Finalized(Outcome::B), 1, 2))
                .unwrap(),
            ProjectionWrite::Advanced
        );
        assert_eq!(
            mirror.project(&snap(4, RoundStatus::Closed, 1, 2)).unwrap(),
            ProjectionWrite::StaleDiscarded
        );

        let row = mirror.get(4).unwrap().unwrap();
        assert_eq!(row.status, RoundStatus::Finalized(Outcome::B));
        assert_eq!(row.pools, PoolTotals { a: 1, b: 2 });
    }

    #[test]
    fn shrinking_pools_in_the_same_phase_are_stale() {
        let store = MirrorStore::open_in_memory().unwrap();
        let mirror = RoundMirror::new(&store);
        mirror.project(&snap(1, RoundStatus::Open, 10, 5)).unwrap();

        assert_eq!(
            mirror.project(&snap(1, RoundStatus::Open, 10, 7)).unwrap(),
            ProjectionWrite::Refreshed
        );
        assert_eq!(
            mirror.project(&snap(1, RoundStatus::Open, 10, 5)).unwrap(),
            ProjectionWrite::StaleDiscarded
        );
        assert_eq!(
            mirror.project(&snap(1, RoundStatus::Open, 10, 7)).unwrap(),
            ProjectionWrite::Unchanged
        );
    }

    #[test]
    fn ledger_outcome_replaces_a_divergent_mirrored_outcome() {
        let store = MirrorStore::open_in_memory().unwrap();
        let mirror = RoundMirror::new(&store);
        mirror.apply_transition(Transition::Close { round_id: 1 }).unwrap();
        mirror
            .apply_transition(Transition::Finalize {
                round_id: 1,
                outcome: Outcome::B,
            })
            .unwrap();

        let ledger = snap(1, RoundStatus::Finalized(Outcome::A), 10, 5);
        assert_eq!(mirror.project(&ledger).unwrap(), ProjectionWrite::OutcomeCorrected);
        assert_eq!(mirror.project(&ledger).unwrap(), ProjectionWrite::Unchanged);

        let row = mirror.get(1).unwrap().unwrap();
        assert_eq!(row.status, RoundStatus::Finalized(Outcome::A));
        assert_eq!(row.pools, PoolTotals { a: 10, b: 5 });
    }

    #[test]
    fn replays_keep_created_at() {
        let store = MirrorStore::open_in_memory().unwrap();
        let mirror = RoundMirror::new(&store);
        mirror.project(&snap(2, RoundStatus::Open, 0, 0)).unwrap();
        let created = mirror.get(2).unwrap().unwrap().created_at;
        mirror.project(&snap(2, RoundStatus::Closed, 0, 0)).unwrap();
        assert_eq!(mirror.get(2).unwrap().unwrap().created_at, created);
        assert_eq!(mirror.current().unwrap().unwrap().id, 2);
    }

    #[test]
    fn admin_transitions_follow_lifecycle_guards() {
        let store = MirrorStore::open_in_memory().unwrap();
        let mirror = RoundMirror::new(&store);

        assert!(matches!(
            mirror.apply_transition(Transition::Finalize {
                round_id: 1,
                outcome: Outcome::A
            }),
            Err(RoundError::State(_))
        ));
        assert_eq!(
            mirror.apply_transition(Transition::Close { round_id: 1 }).unwrap(),
            Applied::Advanced
        );
        assert_eq!(
            mirror.apply_transition(Transition::Close { round_id: 1 }).unwrap(),
            Applied::AlreadyApplied
        );
        mirror
            .apply_transition(Transition::Finalize {
                round_id: 1,
                outcome: Outcome::A,
            })
            .unwrap();
        assert_eq!(
            mirror
                .apply_transition(Transition::StartNext { next_id: 2 })
                .unwrap(),
            Applied::Advanced
        );

        let current = mirror.current().unwrap().unwrap();
        assert_eq!(current.id, 2);
        assert_eq!(current.status, RoundStatus::Open);
        assert_eq!(
            mirror.get(1).unwrap().unwrap().status,
            RoundStatus::Finalized(Outcome::A)
        );
    }
}
