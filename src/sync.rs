//! Queue draining driven by the platform connectivity trigger.

use color_eyre::Result;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::delivery::{AttemptOutcome, DeliveryAttempter};
use crate::queue::QueueStore;

/// Tag of the single deferred-retry registration.
pub const SYNC_TAG: &str = "sync-solicitudes";

/// Capability object for the platform's deferred-retry registration.
///
/// Holds at most one named registration. The platform collaborator is
/// expected to fire `on_sync` with this tag once connectivity is judged
/// likely; tests fire it directly.
#[derive(Debug, Default)]
pub struct SyncTrigger {
  registered: Mutex<Option<String>>,
}

impl SyncTrigger {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register the tag. Registering while already registered is a no-op.
  pub fn register(&self, tag: &str) {
    let mut registered = self.registered.lock().unwrap_or_else(|e| e.into_inner());
    if registered.as_deref() != Some(tag) {
      info!(tag, "deferred-retry trigger registered");
      *registered = Some(tag.to_string());
    }
  }

  pub fn is_registered(&self, tag: &str) -> bool {
    let registered = self.registered.lock().unwrap_or_else(|e| e.into_inner());
    registered.as_deref() == Some(tag)
  }

  /// Clear the registration after a drain that emptied the queue.
  pub fn complete(&self, tag: &str) {
    let mut registered = self.registered.lock().unwrap_or_else(|e| e.into_inner());
    if registered.as_deref() == Some(tag) {
      *registered = None;
    }
  }
}

/// Summary of one drain invocation.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
  /// Records for which a delivery attempt was made
  pub attempted: usize,
  /// Records delivered and removed from the store
  pub delivered: usize,
  /// Records still pending when the drain ended
  pub remaining: usize,
  /// Why the drain stopped early, if it did
  pub halted: Option<String>,
}

/// Drains the persistent queue when the deferred-retry trigger fires.
///
/// There is no internal timer or backoff: the retry cadence is whatever
/// cadence the platform fires the trigger at.
pub struct SyncScheduler<Q, D> {
  queue: Arc<Q>,
  attempter: Arc<D>,
  trigger: Arc<SyncTrigger>,
  /// Serializes drains so a re-entrant trigger firing waits for the prior one
  drain_lock: tokio::sync::Mutex<()>,
}

impl<Q: QueueStore, D: DeliveryAttempter> SyncScheduler<Q, D> {
  pub fn new(queue: Arc<Q>, attempter: Arc<D>, trigger: Arc<SyncTrigger>) -> Self {
    Self {
      queue,
      attempter,
      trigger,
      drain_lock: tokio::sync::Mutex::new(()),
    }
  }

  /// Entry point for a trigger firing.
  ///
  /// Unknown or unregistered tags drain nothing. The registration is cleared
  /// only when the drain leaves the queue empty; otherwise it stays armed for
  /// the next firing.
  pub async fn on_sync(&self, tag: &str) -> Result<DrainReport> {
    if !self.trigger.is_registered(tag) {
      return Ok(DrainReport::default());
    }

    let _guard = self.drain_lock.lock().await;
    let report = self.drain().await?;

    // The report is based on a snapshot; a write suspended mid-drain may
    // have enqueued and re-armed since. Clear only if the store is empty
    // right now.
    if report.remaining == 0 && self.queue.list_all()?.is_empty() {
      self.trigger.complete(tag);
    }

    Ok(report)
  }

  /// Replay pending records in insertion order, stopping at the first
  /// failure of either kind so later records are never applied before an
  /// earlier one that is still failing.
  async fn drain(&self) -> Result<DrainReport> {
    let pending = self.queue.list_all()?;
    let total = pending.len();
    info!(pending = total, "draining queued solicitudes");

    let mut report = DrainReport {
      remaining: total,
      ..DrainReport::default()
    };

    for record in pending {
      report.attempted += 1;
      match self.attempter.attempt(&record.payload).await {
        AttemptOutcome::Delivered { status, .. } => {
          info!(id = record.id, status, "queued solicitud delivered");
          self.queue.remove(record.id)?;
          report.delivered += 1;
          report.remaining -= 1;
        }
        AttemptOutcome::Rejected { status, .. } => {
          warn!(id = record.id, status, "endpoint rejected queued solicitud, halting drain");
          report.halted = Some(format!("endpoint rejected record {} with status {}", record.id, status));
          break;
        }
        AttemptOutcome::TransportFailed { reason } => {
          warn!(id = record.id, %reason, "transport failed, halting drain");
          report.halted = Some(format!("transport failure on record {}: {}", record.id, reason));
          break;
        }
      }
    }

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::SqliteQueue;
  use serde_json::{json, Value};
  use std::collections::VecDeque;

  /// Attempter that replays a script of outcomes and records payloads seen.
  struct ScriptedAttempter {
    outcomes: Mutex<VecDeque<AttemptOutcome>>,
    seen: Mutex<Vec<Value>>,
  }

  impl ScriptedAttempter {
    fn new(outcomes: Vec<AttemptOutcome>) -> Self {
      Self {
        outcomes: Mutex::new(outcomes.into()),
        seen: Mutex::new(Vec::new()),
      }
    }

    fn seen(&self) -> Vec<Value> {
      self.seen.lock().unwrap().clone()
    }
  }

  impl DeliveryAttempter for ScriptedAttempter {
    async fn attempt(&self, payload: &Value) -> AttemptOutcome {
      self.seen.lock().unwrap().push(payload.clone());
      self
        .outcomes
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(AttemptOutcome::Delivered {
          status: 200,
          headers: Vec::new(),
          body: Vec::new(),
        })
    }
  }

  fn delivered() -> AttemptOutcome {
    AttemptOutcome::Delivered {
      status: 200,
      headers: Vec::new(),
      body: b"{\"ok\":true}".to_vec(),
    }
  }

  fn transport_failed() -> AttemptOutcome {
    AttemptOutcome::TransportFailed {
      reason: "connection refused".to_string(),
    }
  }

  fn rejected() -> AttemptOutcome {
    AttemptOutcome::Rejected {
      status: 500,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  fn scheduler(
    queue: Arc<SqliteQueue>,
    outcomes: Vec<AttemptOutcome>,
  ) -> (SyncScheduler<SqliteQueue, ScriptedAttempter>, Arc<ScriptedAttempter>, Arc<SyncTrigger>) {
    let attempter = Arc::new(ScriptedAttempter::new(outcomes));
    let trigger = Arc::new(SyncTrigger::new());
    trigger.register(SYNC_TAG);
    let scheduler = SyncScheduler::new(queue, Arc::clone(&attempter), Arc::clone(&trigger));
    (scheduler, attempter, trigger)
  }

  #[test]
  fn test_trigger_registration_is_idempotent() {
    let trigger = SyncTrigger::new();
    trigger.register(SYNC_TAG);
    trigger.register(SYNC_TAG);
    assert!(trigger.is_registered(SYNC_TAG));

    trigger.complete(SYNC_TAG);
    assert!(!trigger.is_registered(SYNC_TAG));
  }

  #[tokio::test]
  async fn test_unregistered_tag_drains_nothing() {
    let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
    queue.enqueue(&json!({"n": 0})).unwrap();

    let attempter = Arc::new(ScriptedAttempter::new(vec![]));
    let trigger = Arc::new(SyncTrigger::new());
    let scheduler = SyncScheduler::new(Arc::clone(&queue), Arc::clone(&attempter), trigger);

    let report = scheduler.on_sync(SYNC_TAG).await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(queue.list_all().unwrap().len(), 1);
  }

  // Scenario: one queued record, connectivity restored, delivery succeeds.
  #[tokio::test]
  async fn test_successful_drain_empties_store_and_clears_trigger() {
    let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
    queue.enqueue(&json!({"tipo": "instalacion"})).unwrap();

    let (scheduler, _, trigger) = scheduler(Arc::clone(&queue), vec![delivered()]);

    let report = scheduler.on_sync(SYNC_TAG).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.remaining, 0);
    assert!(report.halted.is_none());
    assert!(queue.list_all().unwrap().is_empty());
    assert!(!trigger.is_registered(SYNC_TAG));
  }

  // Scenario: first record fails transport; both records stay, in order.
  #[tokio::test]
  async fn test_transport_failure_halts_and_keeps_all_records() {
    let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
    queue.enqueue(&json!({"n": 0})).unwrap();
    queue.enqueue(&json!({"n": 1})).unwrap();

    let (scheduler, attempter, trigger) = scheduler(Arc::clone(&queue), vec![transport_failed()]);

    let report = scheduler.on_sync(SYNC_TAG).await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 2);
    assert!(report.halted.is_some());

    // Only the first record was attempted
    assert_eq!(attempter.seen(), vec![json!({"n": 0})]);

    let records = queue.list_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].payload, json!({"n": 0}));
    assert_eq!(records[1].payload, json!({"n": 1}));

    // Still armed for the next firing
    assert!(trigger.is_registered(SYNC_TAG));
  }

  #[tokio::test]
  async fn test_endpoint_rejection_halts_without_removal() {
    let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
    queue.enqueue(&json!({"n": 0})).unwrap();
    queue.enqueue(&json!({"n": 1})).unwrap();

    let (scheduler, _, _) = scheduler(Arc::clone(&queue), vec![rejected()]);

    let report = scheduler.on_sync(SYNC_TAG).await.unwrap();
    assert_eq!(report.delivered, 0);
    assert!(report.halted.is_some());
    // A record is never removed on a failure path
    assert_eq!(queue.list_all().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_drain_attempts_in_submission_order() {
    let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
    for n in 0..4 {
      queue.enqueue(&json!({"n": n})).unwrap();
    }

    let (scheduler, attempter, _) = scheduler(
      Arc::clone(&queue),
      vec![delivered(), delivered(), transport_failed()],
    );

    let report = scheduler.on_sync(SYNC_TAG).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.remaining, 2);

    assert_eq!(
      attempter.seen(),
      vec![json!({"n": 0}), json!({"n": 1}), json!({"n": 2})]
    );

    // Records 2 and 3 remain, untouched and in order
    let remaining: Vec<Value> = queue
      .list_all()
      .unwrap()
      .into_iter()
      .map(|r| r.payload)
      .collect();
    assert_eq!(remaining, vec![json!({"n": 2}), json!({"n": 3})]);
  }

  // The trigger may fire again after a partial drain; the next invocation
  // re-snapshots the store and resumes from the oldest pending record.
  #[tokio::test]
  async fn test_second_firing_resumes_from_oldest_pending() {
    let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
    queue.enqueue(&json!({"n": 0})).unwrap();
    queue.enqueue(&json!({"n": 1})).unwrap();

    let (scheduler, attempter, trigger) = scheduler(
      Arc::clone(&queue),
      vec![transport_failed(), delivered(), delivered()],
    );

    scheduler.on_sync(SYNC_TAG).await.unwrap();
    let report = scheduler.on_sync(SYNC_TAG).await.unwrap();

    assert_eq!(report.delivered, 2);
    assert_eq!(report.remaining, 0);
    assert!(queue.list_all().unwrap().is_empty());
    assert!(!trigger.is_registered(SYNC_TAG));

    // First firing attempted n=0 and halted; second attempted n=0 then n=1
    assert_eq!(
      attempter.seen(),
      vec![json!({"n": 0}), json!({"n": 0}), json!({"n": 1})]
    );
  }

  /// Attempter that simulates a mutation write landing while the drain is
  /// suspended: on its first call it enqueues a record and re-registers the
  /// trigger, then delivers.
  struct MidDrainWriter {
    queue: Arc<SqliteQueue>,
    trigger: Arc<SyncTrigger>,
    wrote: std::sync::atomic::AtomicBool,
  }

  impl DeliveryAttempter for MidDrainWriter {
    async fn attempt(&self, _payload: &Value) -> AttemptOutcome {
      if !self.wrote.swap(true, std::sync::atomic::Ordering::SeqCst) {
        self.queue.enqueue(&json!({"late": true})).unwrap();
        self.trigger.register(SYNC_TAG);
      }
      AttemptOutcome::Delivered {
        status: 200,
        headers: Vec::new(),
        body: Vec::new(),
      }
    }
  }

  // A record enqueued mid-drain is invisible to the drain's snapshot; the
  // registration must survive so a later firing can deliver it.
  #[tokio::test]
  async fn test_write_landing_mid_drain_keeps_trigger_armed() {
    let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
    queue.enqueue(&json!({"n": 0})).unwrap();

    let trigger = Arc::new(SyncTrigger::new());
    trigger.register(SYNC_TAG);
    let attempter = Arc::new(MidDrainWriter {
      queue: Arc::clone(&queue),
      trigger: Arc::clone(&trigger),
      wrote: std::sync::atomic::AtomicBool::new(false),
    });
    let scheduler = SyncScheduler::new(Arc::clone(&queue), attempter, Arc::clone(&trigger));

    let report = scheduler.on_sync(SYNC_TAG).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(queue.list_all().unwrap().len(), 1);
    assert!(trigger.is_registered(SYNC_TAG));

    // The next firing picks up the late record and only then disarms
    let report = scheduler.on_sync(SYNC_TAG).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(queue.list_all().unwrap().is_empty());
    assert!(!trigger.is_registered(SYNC_TAG));
  }
}
