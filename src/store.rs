use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::StoreError;
use crate::types::{
    BossRoomLock, CharacterSnapshot, Connection, Floor, FloorId, MonsterDef, MonsterId, Node,
    NodeId, ParticipantId, ParticipantPosition, RunId, RunRules, RuntimeEvent,
};

/// Source of truth for static graph data plus the one mutable node field,
/// the boss-room lock metadata.
pub trait FloorRepository: Send {
    fn floor(&self, id: &FloorId) -> Result<Floor, StoreError>;
    fn nodes(&self, floor: &FloorId) -> Result<Vec<Node>, StoreError>;
    fn connections(&self, floor: &FloorId) -> Result<Vec<Connection>, StoreError>;
    fn node(&self, id: &NodeId) -> Result<Node, StoreError>;
    fn monster(&self, id: &MonsterId) -> Result<MonsterDef, StoreError>;
    fn set_node_lock(&mut self, id: &NodeId, lock: Option<BossRoomLock>) -> Result<(), StoreError>;
}

/// Keyed by (participant, floor). Implementations must apply each `save`
/// atomically with respect to concurrent readers; the in-process
/// implementation below relies on exclusive engine ownership for that.
pub trait PositionStore: Send {
    fn load(
        &self,
        participant: &ParticipantId,
        floor: &FloorId,
    ) -> Result<Option<ParticipantPosition>, StoreError>;
    fn save(&mut self, position: ParticipantPosition) -> Result<(), StoreError>;
    fn remove(&mut self, participant: &ParticipantId, floor: &FloorId) -> Result<(), StoreError>;
    fn positions_on_floor(&self, floor: &FloorId) -> Result<Vec<ParticipantPosition>, StoreError>;
    fn all_positions(&self) -> Result<Vec<ParticipantPosition>, StoreError>;
}

pub trait RulesProvider: Send {
    fn rules_for_run(&self, run: &RunId) -> Result<Option<RunRules>, StoreError>;
    fn global_rules(&self) -> RunRules;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RewardReason {
    TimeLimitElimination,
    EncounterResolved,
}

#[derive(Clone, Debug)]
pub struct RewardContext {
    pub floor: FloorId,
    pub reason: RewardReason,
}

/// Fire-and-forget from the core's perspective: failures are logged by the
/// caller, never retried here.
pub trait RewardCollaborator: Send {
    fn award_participation(
        &self,
        participant: &ParticipantId,
        context: &RewardContext,
    ) -> Result<(), StoreError>;
}

pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: &RuntimeEvent);
}

/// Required capability for combat roster assembly. A `None` snapshot is an
/// explicit `CharacterDataRequired` denial upstream, never a silently
/// incomplete roster.
pub trait CharacterProvider: Send {
    fn snapshot(&self, participant: &ParticipantId) -> Option<CharacterSnapshot>;
}

#[derive(Default)]
pub struct InMemoryFloorRepository {
    floors: HashMap<FloorId, Floor>,
    nodes_by_floor: HashMap<FloorId, Vec<NodeId>>,
    nodes: HashMap<NodeId, Node>,
    connections_by_floor: HashMap<FloorId, Vec<Connection>>,
    monsters: HashMap<MonsterId, MonsterDef>,
}

impl InMemoryFloorRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_floor(&mut self, floor: Floor) {
        self.nodes_by_floor.entry(floor.id.clone()).or_default();
        self.connections_by_floor
            .entry(floor.id.clone())
            .or_default();
        self.floors.insert(floor.id.clone(), floor);
    }

    pub fn insert_node(&mut self, node: Node) {
        let order = self.nodes_by_floor.entry(node.floor_id.clone()).or_default();
        if !order.contains(&node.id) {
            order.push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn insert_connection(&mut self, connection: Connection) {
        self.connections_by_floor
            .entry(connection.floor_id.clone())
            .or_default()
            .push(connection);
    }

    pub fn insert_monster(&mut self, monster: MonsterDef) {
        self.monsters.insert(monster.id.clone(), monster);
    }
}

impl FloorRepository for InMemoryFloorRepository {
    fn floor(&self, id: &FloorId) -> Result<Floor, StoreError> {
        self.floors
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::FloorNotFound(id.clone()))
    }

    fn nodes(&self, floor: &FloorId) -> Result<Vec<Node>, StoreError> {
        let order = self
            .nodes_by_floor
            .get(floor)
            .ok_or_else(|| StoreError::FloorNotFound(floor.clone()))?;
        let mut out = Vec::with_capacity(order.len());
        for id in order {
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| StoreError::NodeNotFound(id.clone()))?;
            out.push(node.clone());
        }
        Ok(out)
    }

    fn connections(&self, floor: &FloorId) -> Result<Vec<Connection>, StoreError> {
        self.connections_by_floor
            .get(floor)
            .cloned()
            .ok_or_else(|| StoreError::FloorNotFound(floor.clone()))
    }

    fn node(&self, id: &NodeId) -> Result<Node, StoreError> {
        self.nodes
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NodeNotFound(id.clone()))
    }

    fn monster(&self, id: &MonsterId) -> Result<MonsterDef, StoreError> {
        self.monsters
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::MonsterNotFound(id.clone()))
    }

    fn set_node_lock(&mut self, id: &NodeId, lock: Option<BossRoomLock>) -> Result<(), StoreError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.clone()))?;
        node.lock = lock;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPositionStore {
    positions: HashMap<(ParticipantId, FloorId), ParticipantPosition>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionStore for InMemoryPositionStore {
    fn load(
        &self,
        participant: &ParticipantId,
        floor: &FloorId,
    ) -> Result<Option<ParticipantPosition>, StoreError> {
        Ok(self
            .positions
            .get(&(participant.clone(), floor.clone()))
            .cloned())
    }

    fn save(&mut self, position: ParticipantPosition) -> Result<(), StoreError> {
        self.positions.insert(
            (position.participant.clone(), position.floor.clone()),
            position,
        );
        Ok(())
    }

    fn remove(&mut self, participant: &ParticipantId, floor: &FloorId) -> Result<(), StoreError> {
        self.positions.remove(&(participant.clone(), floor.clone()));
        Ok(())
    }

    fn positions_on_floor(&self, floor: &FloorId) -> Result<Vec<ParticipantPosition>, StoreError> {
        let mut out: Vec<ParticipantPosition> = self
            .positions
            .values()
            .filter(|position| &position.floor == floor)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.participant.cmp(&b.participant));
        Ok(out)
    }

    fn all_positions(&self) -> Result<Vec<ParticipantPosition>, StoreError> {
        let mut out: Vec<ParticipantPosition> = self.positions.values().cloned().collect();
        out.sort_by(|a, b| {
            a.participant
                .cmp(&b.participant)
                .then_with(|| a.floor.cmp(&b.floor))
        });
        Ok(out)
    }
}

pub struct StaticRulesProvider {
    rules: RunRules,
}

impl StaticRulesProvider {
    pub fn new(rules: RunRules) -> Self {
        Self { rules }
    }
}

impl RulesProvider for StaticRulesProvider {
    fn rules_for_run(&self, _run: &RunId) -> Result<Option<RunRules>, StoreError> {
        Ok(Some(self.rules.clone()))
    }

    fn global_rules(&self) -> RunRules {
        self.rules.clone()
    }
}

/// Reward collaborator that only records the grant in the log.
#[derive(Default)]
pub struct LoggingRewardCollaborator;

impl RewardCollaborator for LoggingRewardCollaborator {
    fn award_participation(
        &self,
        participant: &ParticipantId,
        context: &RewardContext,
    ) -> Result<(), StoreError> {
        log::info!(
            "participation reward granted to {participant} on floor {} ({:?})",
            context.floor,
            context.reason
        );
        Ok(())
    }
}

/// Buffers emitted events; used by tests and the simulate binary.
#[derive(Default)]
pub struct BufferingNotificationSink {
    events: Mutex<Vec<RuntimeEvent>>,
}

impl BufferingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<RuntimeEvent> {
        let mut guard = self.events.lock().unwrap_or_else(|err| err.into_inner());
        std::mem::take(&mut *guard)
    }
}

impl NotificationSink for BufferingNotificationSink {
    fn emit(&self, event: &RuntimeEvent) {
        let mut guard = self.events.lock().unwrap_or_else(|err| err.into_inner());
        guard.push(event.clone());
    }
}

pub struct StaticCharacterProvider {
    snapshots: HashMap<ParticipantId, CharacterSnapshot>,
}

impl StaticCharacterProvider {
    pub fn new() -> Self {
        Self {
            snapshots: HashMap::new(),
        }
    }

    pub fn insert(&mut self, snapshot: CharacterSnapshot) {
        self.snapshots.insert(snapshot.participant.clone(), snapshot);
    }
}

impl Default for StaticCharacterProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CharacterProvider for StaticCharacterProvider {
    fn snapshot(&self, participant: &ParticipantId) -> Option<CharacterSnapshot> {
        self.snapshots.get(participant).cloned()
    }
}
