//! Periodic reconciliation.
//!
//! One loop per [`CountKind`], each on its own interval. A loop awaits its
//! run before waiting for the next tick, so it never overlaps itself;
//! ticks that pass while a run is in progress are skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::reconcile::{CountKind, ReconcileReport, Reconciler};

/// Interval per reconciliation kind.
#[derive(Clone, Debug)]
pub struct ReconcileSchedule {
    /// Period of the applications run.
    pub applications_every: Duration,
    /// Period of the chats run.
    pub chats_every: Duration,
}

impl Default for ReconcileSchedule {
    fn default() -> Self {
        Self {
            applications_every: Duration::from_secs(60),
            chats_every: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct LoopState {
    runs: u64,
    last: Option<ReconcileReport>,
}

/// Handle to the running reconciliation loops.
#[derive(Debug)]
pub struct Scheduler {
    loops: JoinSet<()>,
    cancel: CancellationToken,
    state: Arc<Mutex<HashMap<CountKind, LoopState>>>,
}

impl Scheduler {
    /// Spawn both loops. The first run of each happens immediately.
    pub fn start(reconciler: Reconciler, schedule: &ReconcileSchedule) -> Self {
        let mut loops = JoinSet::new();
        let cancel = CancellationToken::new();
        let state = Arc::new(Mutex::new(HashMap::new()));

        for (kind, every) in [
            (CountKind::Applications, schedule.applications_every),
            (CountKind::Chats, schedule.chats_every),
        ] {
            let _ = loops.spawn(run_loop(
                reconciler.clone(),
                kind,
                every,
                cancel.clone(),
                Arc::clone(&state),
            ));
        }
        info!(
            applications_secs = schedule.applications_every.as_secs_f64(),
            chats_secs = schedule.chats_every.as_secs_f64(),
            "reconciliation scheduler started"
        );

        Self {
            loops,
            cancel,
            state,
        }
    }

    /// Completed runs of `kind` so far.
    pub fn runs(&self, kind: CountKind) -> u64 {
        self.state.lock().get(&kind).map_or(0, |s| s.runs)
    }

    /// Report of the most recent completed run of `kind`.
    pub fn last_report(&self, kind: CountKind) -> Option<ReconcileReport> {
        self.state.lock().get(&kind).and_then(|s| s.last.clone())
    }

    /// Stop both loops. A run in progress finishes first.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        while let Some(result) = self.loops.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "reconciliation loop panicked");
            }
        }
        info!("reconciliation scheduler stopped");
    }
}

async fn run_loop(
    reconciler: Reconciler,
    kind: CountKind,
    every: Duration,
    cancel: CancellationToken,
    state: Arc<Mutex<HashMap<CountKind, LoopState>>>,
) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let run = reconciler.clone();
        match tokio::task::spawn_blocking(move || run.run(kind)).await {
            Ok(report) => {
                let mut state = state.lock();
                let entry = state.entry(kind).or_default();
                entry.runs += 1;
                entry.last = Some(report);
            }
            Err(err) => error!(%kind, error = %err, "reconciliation task failed"),
        }
    }
    debug!(%kind, "reconciliation loop stopped");
}
