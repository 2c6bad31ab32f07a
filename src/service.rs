use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::constants::DEFAULT_SWEEP_INTERVAL_SECS;
use crate::encounter::PreparedCombatInstance;
use crate::engine::LabyrinthEngine;
use crate::errors::CoreError;
use crate::store::NotificationSink;
use crate::types::{
    CombatInstanceId, FloorId, MoveOutcome, NodeId, ParticipantId, PartyId, RuntimeEvent,
    SweepReport, VisibilityView, VisionModifiers,
};

#[derive(Clone, Debug)]
pub struct LabyrinthServiceOptions {
    pub sweep_interval: Duration,
}

impl Default for LabyrinthServiceOptions {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

/// Async facade over the engine for a request-handling layer. One mutex
/// guards the whole run state, which serializes each participant's requests
/// and makes every check-then-mutate on shared node state linearizable.
/// Events drained after each operation go to the notification sink.
pub struct LabyrinthService {
    engine: Arc<Mutex<LabyrinthEngine>>,
    sink: Arc<dyn NotificationSink>,
    options: LabyrinthServiceOptions,
    sweeper: Option<JoinHandle<()>>,
}

impl LabyrinthService {
    pub fn new(
        engine: LabyrinthEngine,
        sink: Arc<dyn NotificationSink>,
        options: LabyrinthServiceOptions,
    ) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            sink,
            options,
            sweeper: None,
        }
    }

    pub async fn join_floor(
        &self,
        participant: &ParticipantId,
        floor: &FloorId,
        party: Option<PartyId>,
    ) -> Result<NodeId, CoreError> {
        let mut guard = self.engine.lock().await;
        let result = guard.join_floor(participant, floor, party, Utc::now());
        let events = guard.drain_events();
        drop(guard);
        self.emit_all(&events);
        result
    }

    pub async fn assign_start_point(
        &self,
        participant: &ParticipantId,
        floor: &FloorId,
    ) -> Result<NodeId, CoreError> {
        self.join_floor(participant, floor, None).await
    }

    pub async fn move_participant(
        &self,
        participant: &ParticipantId,
        floor: &FloorId,
        target: &NodeId,
    ) -> Result<MoveOutcome, CoreError> {
        let mut guard = self.engine.lock().await;
        let result = guard.move_participant(participant, floor, target, Utc::now());
        let events = guard.drain_events();
        drop(guard);
        self.emit_all(&events);
        result
    }

    pub async fn get_visibility(
        &self,
        participant: &ParticipantId,
        floor: &FloorId,
        modifiers: &VisionModifiers,
    ) -> Result<VisibilityView, CoreError> {
        let mut guard = self.engine.lock().await;
        guard.get_visibility(participant, floor, modifiers)
    }

    pub async fn can_enter_node(&self, floor: &FloorId, node: &NodeId) -> Result<(), CoreError> {
        let mut guard = self.engine.lock().await;
        guard.can_enter_node(floor, node)
    }

    pub async fn can_exit_node(
        &self,
        participant: &ParticipantId,
        floor: &FloorId,
        node: &NodeId,
    ) -> Result<(), CoreError> {
        let mut guard = self.engine.lock().await;
        guard.can_exit_node(participant, floor, node)
    }

    pub async fn prepare_encounter(
        &self,
        participant: &ParticipantId,
        floor: &FloorId,
        node: &NodeId,
    ) -> Result<Option<PreparedCombatInstance>, CoreError> {
        let mut guard = self.engine.lock().await;
        let result = guard.prepare_encounter(participant, floor, node, Utc::now());
        let events = guard.drain_events();
        drop(guard);
        self.emit_all(&events);
        result
    }

    pub async fn join_encounter(
        &self,
        participant: &ParticipantId,
        instance: &CombatInstanceId,
    ) -> Result<PreparedCombatInstance, CoreError> {
        let mut guard = self.engine.lock().await;
        let result = guard.join_encounter(participant, instance, Utc::now());
        let events = guard.drain_events();
        drop(guard);
        self.emit_all(&events);
        result
    }

    pub async fn resolve_encounter(
        &self,
        instance: &CombatInstanceId,
    ) -> Result<PreparedCombatInstance, CoreError> {
        let mut guard = self.engine.lock().await;
        let result = guard.resolve_encounter(instance, Utc::now());
        let events = guard.drain_events();
        drop(guard);
        self.emit_all(&events);
        result
    }

    pub async fn release_boss_lock(
        &self,
        floor: &FloorId,
        node: &NodeId,
    ) -> Result<bool, CoreError> {
        let mut guard = self.engine.lock().await;
        let result = guard.release_boss_lock(floor, node);
        let events = guard.drain_events();
        drop(guard);
        self.emit_all(&events);
        result
    }

    pub async fn sweep_eliminations(&self) -> Result<SweepReport, CoreError> {
        let mut guard = self.engine.lock().await;
        let result = guard.sweep_eliminations(Utc::now());
        let events = guard.drain_events();
        drop(guard);
        self.emit_all(&events);
        result
    }

    /// Spawns the background elimination sweeper on the configured interval.
    pub fn start_sweeper(&mut self) {
        if self.sweeper.is_some() {
            return;
        }
        let engine = self.engine.clone();
        let sink = self.sink.clone();
        let interval = self.options.sweep_interval;
        self.sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut guard = engine.lock().await;
                match guard.sweep_eliminations(Utc::now()) {
                    Ok(report) => {
                        if !report.eliminated.is_empty() {
                            log::info!(
                                "elimination sweep removed {} participants",
                                report.eliminated.len()
                            );
                        }
                    }
                    Err(err) => log::warn!("elimination sweep failed: {err}"),
                }
                let events = guard.drain_events();
                drop(guard);
                for event in &events {
                    sink.emit(event);
                }
            }
        }));
    }

    pub fn stop_sweeper(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }

    fn emit_all(&self, events: &[RuntimeEvent]) {
        for event in events {
            self.sink.emit(event);
        }
    }
}

impl Drop for LabyrinthService {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::errors::Denial;
    use crate::store::BufferingNotificationSink;
    use crate::testutil::{harness, harness_with_time_limit, FLOOR};

    fn pid(name: &str) -> ParticipantId {
        ParticipantId::new(name)
    }

    fn floor() -> FloorId {
        FloorId::new(FLOOR)
    }

    fn service_from(
        h: crate::testutil::Harness,
        options: LabyrinthServiceOptions,
    ) -> (Arc<LabyrinthService>, Arc<BufferingNotificationSink>) {
        let sink = Arc::new(BufferingNotificationSink::new());
        let service = LabyrinthService::new(h.engine, sink.clone(), options);
        (Arc::new(service), sink)
    }

    #[tokio::test]
    async fn concurrent_boss_entries_admit_exactly_one() {
        let mut h = harness();
        let now = Utc::now();
        h.place(&pid("p1"), &NodeId::new("den"), 10.0, now);
        h.place(&pid("p2"), &NodeId::new("den"), 10.0, now);
        let (service, _sink) = service_from(h, LabyrinthServiceOptions::default());

        let first = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .move_participant(&pid("p1"), &floor(), &NodeId::new("boss"))
                    .await
            })
        };
        let second = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .move_participant(&pid("p2"), &floor(), &NodeId::new("boss"))
                    .await
            })
        };
        let results = [
            first.await.expect("task should finish"),
            second.await.expect("task should finish"),
        ];

        let successes = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(successes, 1);
        let denial = results
            .iter()
            .find_map(|result| result.as_ref().err())
            .and_then(|err| err.denial().cloned())
            .expect("the loser should receive a denial");
        assert!(matches!(
            denial,
            Denial::NodeAtCapacity(_) | Denial::NodeLocked(_, _)
        ));
    }

    #[tokio::test]
    async fn concurrent_prepare_calls_share_one_instance() {
        let mut h = harness();
        let now = Utc::now();
        h.place(&pid("p1"), &NodeId::new("den"), 10.0, now);
        h.place(&pid("p2"), &NodeId::new("den"), 10.0, now);
        let (service, sink) = service_from(h, LabyrinthServiceOptions::default());

        let first = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .prepare_encounter(&pid("p1"), &floor(), &NodeId::new("den"))
                    .await
            })
        };
        let second = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .prepare_encounter(&pid("p2"), &floor(), &NodeId::new("den"))
                    .await
            })
        };
        let instance_a = first
            .await
            .expect("task should finish")
            .expect("prepare should succeed")
            .expect("den is combat-eligible");
        let instance_b = second
            .await
            .expect("task should finish")
            .expect("prepare should succeed")
            .expect("den is combat-eligible");

        assert_eq!(instance_a.id, instance_b.id);
        let combined = instance_b.participant_ids();
        assert!(combined.contains(&pid("p1")));
        assert!(combined.contains(&pid("p2")));

        let prepared_events = sink
            .drain()
            .into_iter()
            .filter(|event| matches!(event, RuntimeEvent::CombatPrepared { .. }))
            .count();
        assert_eq!(prepared_events, 1);
    }

    #[tokio::test]
    async fn sweep_through_the_facade_emits_events_to_the_sink() {
        let mut h = harness_with_time_limit(ChronoDuration::hours(2));
        let overdue = Utc::now() - ChronoDuration::hours(3);
        h.engine
            .join_floor(&pid("p1"), &floor(), None, overdue)
            .unwrap();
        h.engine.drain_events();
        let (service, sink) = service_from(h, LabyrinthServiceOptions::default());

        let report = service.sweep_eliminations().await.unwrap();
        assert_eq!(report.eliminated, vec![pid("p1")]);
        assert!(sink
            .drain()
            .iter()
            .any(|event| matches!(event, RuntimeEvent::Eliminated { .. })));
    }

    #[tokio::test]
    async fn background_sweeper_eliminates_overdue_participants() {
        let mut h = harness_with_time_limit(ChronoDuration::hours(1));
        let overdue = Utc::now() - ChronoDuration::hours(2);
        h.engine
            .join_floor(&pid("p1"), &floor(), None, overdue)
            .unwrap();
        h.engine.drain_events();

        let sink = Arc::new(BufferingNotificationSink::new());
        let mut service = LabyrinthService::new(
            h.engine,
            sink.clone(),
            LabyrinthServiceOptions {
                sweep_interval: Duration::from_millis(10),
            },
        );
        service.start_sweeper();

        let mut seen = Vec::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            seen.extend(sink.drain());
            if seen
                .iter()
                .any(|event| matches!(event, RuntimeEvent::Eliminated { .. }))
            {
                break;
            }
        }
        service.stop_sweeper();
        assert!(seen
            .iter()
            .any(|event| matches!(event, RuntimeEvent::Eliminated { .. })));
    }
}
