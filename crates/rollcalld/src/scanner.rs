//! The live scan loop: frame → detect → match → decide → persist.

use crate::capture::FrameSource;
use crate::engine::Inference;
use chrono::{DateTime, Local};
use rollcall_core::{
    Decision, DecisionEngine, DetectionResult, EuclideanMatcher, Identity, IdentityMatcher,
    MatchOutcome,
};
use rollcall_store::Store;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Wall-clock source for check-in timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Local::now)
}

/// The most recent accepted check-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub identity_id: String,
    pub name: String,
    pub timestamp_epoch_millis: i64,
    pub status: String,
}

/// Counters for one scan session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub frames: u64,
    pub faces: u64,
    pub recorded: u64,
    pub duplicates: u64,
    pub unknown: u64,
    pub errors: u64,
    /// Detections abandoned because the session was cancelled.
    pub discarded: u64,
}

/// One scanning session's state. Consumed by [`ScanLoop::run`].
pub struct ScanLoop {
    inference: Arc<dyn Inference>,
    matcher: EuclideanMatcher,
    roster: HashMap<String, Identity>,
    decisions: DecisionEngine<Arc<Store>>,
    last_check_in: Arc<Mutex<Option<CheckIn>>>,
    clock: Clock,
}

impl ScanLoop {
    /// Snapshot `roster` into a matcher for the lifetime of the session.
    pub fn new(
        inference: Arc<dyn Inference>,
        store: Arc<Store>,
        roster: Vec<Identity>,
        last_check_in: Arc<Mutex<Option<CheckIn>>>,
        clock: Clock,
    ) -> Self {
        let matcher = EuclideanMatcher::from_roster(&roster);
        Self {
            inference,
            matcher,
            roster: roster.into_iter().map(|i| (i.id.clone(), i)).collect(),
            decisions: DecisionEngine::new(store),
            last_check_in,
            clock,
        }
    }

    /// Run until `cancel` turns true or `frames` ends.
    ///
    /// One detection is in flight at a time. Cancellation interrupts both
    /// the frame wait and a pending detection, whose result is dropped.
    pub async fn run(
        self,
        mut frames: Box<dyn FrameSource>,
        mut cancel: watch::Receiver<bool>,
    ) -> ScanStats {
        let mut stats = ScanStats::default();
        tracing::info!(members = self.matcher.len(), "scan loop started");

        loop {
            if *cancel.borrow() {
                break;
            }

            let frame = tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                    continue;
                }
                next = frames.next_frame() => match next {
                    Some(frame) => frame,
                    None => {
                        tracing::warn!("frame source ended");
                        break;
                    }
                },
            };
            stats.frames += 1;

            let result = tokio::select! {
                biased;
                _ = wait_cancelled(&mut cancel) => {
                    stats.discarded += 1;
                    tracing::debug!("detection in flight at cancellation; discarded");
                    break;
                }
                result = self.inference.detect(frame) => result,
            };

            // A result that resolved alongside cancellation is stale too
            if *cancel.borrow() {
                stats.discarded += 1;
                break;
            }

            match result {
                Ok(detections) => self.handle_detections(&detections, &mut stats),
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(error = %e, "detection failed; continuing");
                }
            }

            tokio::task::yield_now().await;
        }

        frames.close().await;
        tracing::info!(?stats, "scan loop stopped");
        stats
    }

    fn handle_detections(&self, detections: &[DetectionResult], stats: &mut ScanStats) {
        for detection in detections {
            stats.faces += 1;
            let outcome = self.matcher.best_match(&detection.descriptor);
            let MatchOutcome::Known { identity_id, distance } = outcome else {
                stats.unknown += 1;
                continue;
            };
            let Some(identity) = self.roster.get(&identity_id) else {
                stats.unknown += 1;
                continue;
            };
            tracing::debug!(identity = %identity_id, distance, "face matched");

            match self.decisions.decide(identity, &(self.clock)()) {
                Ok(Decision::Recorded(record)) => {
                    stats.recorded += 1;
                    let check_in = CheckIn {
                        identity_id: record.identity_id,
                        name: record.identity_name,
                        timestamp_epoch_millis: record.timestamp_epoch_millis,
                        status: record.status.to_string(),
                    };
                    *self
                        .last_check_in
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(check_in);
                }
                Ok(Decision::Duplicate) => stats.duplicates += 1,
                Err(e) => {
                    stats.errors += 1;
                    tracing::error!(error = %e, identity = %identity_id, "failed to persist attendance");
                }
            }
        }
    }
}

/// Resolves once the flag reads true; pends forever if the sender is gone.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
