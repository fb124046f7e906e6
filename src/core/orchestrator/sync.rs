//! Pivotal Synchronizer
//!
//! The bounded barrier run before steps 1 and 7. All three engines receive
//! the same consistent snapshot and must ack within the pivotal timeout;
//! whoever misses sits the step out. The barrier itself is what makes the
//! cross-engine exchange coherent: every delta from earlier steps of the
//! cycle is already applied when the snapshot is taken.

use std::sync::atomic::Ordering;

use futures::future::join_all;
use ractor::rpc::CallResult;
use tracing::{debug, warn};

use crate::core::state::StateSnapshot;
use crate::core::types::EngineId;
use crate::engines::{EngineMessage, PivotalMsg, SyncAck};

use super::Orchestrator;

/// Outcome of one pivotal barrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BarrierOutcome {
    /// Engines that acked ready, in engine-id order
    pub ready: Vec<EngineId>,

    /// Engines that timed out or acked not-ready
    pub missed: Vec<EngineId>,
}

impl Orchestrator {
    /// Run the barrier: broadcast, collect acks, never stall past the
    /// pivotal timeout
    pub(crate) async fn pivotal_barrier(
        &self,
        step: u8,
        cycle: u64,
        state: StateSnapshot,
    ) -> BarrierOutcome {
        let timeout = self.config.pivotal_timeout;
        let calls = EngineId::ALL.iter().map(|id| {
            let engine = self.engines[id.index()].clone();
            let msg = PivotalMsg {
                step,
                cycle,
                state: state.clone(),
                deadline: timeout,
            };
            async move {
                engine
                    .call(|reply| EngineMessage::PivotalSync { msg, reply }, Some(timeout))
                    .await
            }
        });

        let mut ready = Vec::with_capacity(3);
        let mut missed = Vec::new();
        for (id, result) in EngineId::ALL.iter().zip(join_all(calls).await) {
            match result {
                Ok(CallResult::Success(SyncAck::Ready)) => {
                    debug!(engine = %id, step, cycle, "pivotal ack ready");
                    ready.push(*id);
                }
                Ok(CallResult::Success(SyncAck::NotReady { reason })) => {
                    warn!(engine = %id, step, cycle, reason, "pivotal ack not ready");
                    missed.push(*id);
                }
                Ok(CallResult::Timeout) => {
                    warn!(engine = %id, step, cycle, "pivotal ack timed out");
                    missed.push(*id);
                }
                Ok(CallResult::SenderError) | Err(_) => {
                    warn!(engine = %id, step, cycle, "pivotal ack transport failed");
                    missed.push(*id);
                }
            }
        }

        for id in &missed {
            self.metrics
                .engine(*id)
                .missed_pivotals
                .fetch_add(1, Ordering::Relaxed);
        }

        BarrierOutcome { ready, missed }
    }
}
