use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MOVE_COST, MOVEMENT_HISTORY_CAP};

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_type!(RunId);
id_type!(FloorId);
id_type!(NodeId);
id_type!(ConnectionId);
id_type!(ParticipantId);
id_type!(PartyId);
id_type!(MonsterId);
id_type!(CombatInstanceId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    Capacity,
    Engaged,
}

impl LockReason {
    pub fn label(&self) -> &'static str {
        match self {
            LockReason::Capacity => "capacity reached",
            LockReason::Engaged => "encounter in progress",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BossRoomLock {
    pub reason: LockReason,
    pub locked_at: DateTime<Utc>,
    pub occupants: Vec<ParticipantId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Plain,
    Start,
    Boss {
        capacity: Option<usize>,
        monster: Option<MonsterId>,
    },
    MonsterSpawn,
    Stairs,
    Shop,
    Rest,
}

impl NodeKind {
    pub fn is_combat_eligible(&self) -> bool {
        matches!(self, NodeKind::Boss { .. } | NodeKind::MonsterSpawn)
    }

    pub fn is_boss(&self) -> bool {
        matches!(self, NodeKind::Boss { .. })
    }

    pub fn capacity(&self) -> Option<usize> {
        match self {
            NodeKind::Boss { capacity, .. } => *capacity,
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub floor_id: FloorId,
    pub x: i32,
    pub y: i32,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub lock: Option<BossRoomLock>,
}

impl Node {
    pub fn new(id: impl Into<String>, floor_id: &FloorId, x: i32, y: i32, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(id),
            floor_id: floor_id.clone(),
            x,
            y,
            kind,
            lock: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub floor_id: FloorId,
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default = "default_move_cost")]
    pub cost: f64,
    pub bidirectional: bool,
    #[serde(default)]
    pub requirement: Option<String>,
}

fn default_move_cost() -> f64 {
    DEFAULT_MOVE_COST
}

impl Connection {
    pub fn bidirectional(
        id: impl Into<String>,
        floor_id: &FloorId,
        from: &NodeId,
        to: &NodeId,
        cost: f64,
    ) -> Self {
        Self {
            id: ConnectionId::new(id),
            floor_id: floor_id.clone(),
            from: from.clone(),
            to: to.clone(),
            cost,
            bidirectional: true,
            requirement: None,
        }
    }

    pub fn one_way(
        id: impl Into<String>,
        floor_id: &FloorId,
        from: &NodeId,
        to: &NodeId,
        cost: f64,
    ) -> Self {
        Self {
            id: ConnectionId::new(id),
            floor_id: floor_id.clone(),
            from: from.clone(),
            to: to.clone(),
            cost,
            bidirectional: false,
            requirement: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonsterPoolEntry {
    pub monster: MonsterId,
    pub weight: u32,
    pub min_level: Option<u32>,
    pub max_level: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonsterDef {
    pub id: MonsterId,
    pub name: String,
    pub base_level: u32,
    pub max_hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub experience: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonsterInstance {
    pub monster: MonsterId,
    pub name: String,
    pub level: u32,
    pub max_hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub experience: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Floor {
    pub id: FloorId,
    pub number: u32,
    pub max_occupants: Option<usize>,
    pub regen_per_hour: f64,
    pub max_movement_points: f64,
    pub time_limit: Option<Duration>,
    pub monster_pool: Vec<MonsterPoolEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRecord {
    pub from: Option<NodeId>,
    pub to: NodeId,
    pub cost: f64,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPosition {
    pub participant: ParticipantId,
    pub floor: FloorId,
    pub current_node: Option<NodeId>,
    pub movement_points: f64,
    pub last_moved_at: DateTime<Utc>,
    pub explored: BTreeSet<NodeId>,
    pub history: VecDeque<MovementRecord>,
    pub joined_floor_at: DateTime<Utc>,
}

impl ParticipantPosition {
    pub fn new(
        participant: &ParticipantId,
        floor: &FloorId,
        movement_points: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            participant: participant.clone(),
            floor: floor.clone(),
            current_node: None,
            movement_points,
            last_moved_at: now,
            explored: BTreeSet::new(),
            history: VecDeque::new(),
            joined_floor_at: now,
        }
    }

    /// Returns true when the node was not explored before.
    pub fn mark_explored(&mut self, node: NodeId) -> bool {
        self.explored.insert(node)
    }

    pub fn record_move(&mut self, record: MovementRecord) {
        self.history.push_back(record);
        while self.history.len() > MOVEMENT_HISTORY_CAP {
            self.history.pop_front();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Eliminated,
    Winner,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyStatus {
    Active,
    Eliminated,
    Winner,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub id: PartyId,
    pub leader: ParticipantId,
    pub members: Vec<ParticipantId>,
    pub floor_number: u32,
    pub status: PartyStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSnapshot {
    pub participant: ParticipantId,
    pub name: String,
    pub level: u32,
    pub max_hp: i32,
    pub attack: i32,
    pub defense: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    EqualDistribution,
    Random,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRules {
    pub lock_boss_on_engage: bool,
    pub lock_boss_on_capacity: bool,
    pub locks_block_entry: bool,
    pub locks_block_exit: bool,
    pub start_policy: StartPolicy,
    pub start_non_overlap: bool,
    pub base_visibility_range: u32,
}

impl Default for RunRules {
    fn default() -> Self {
        Self {
            lock_boss_on_engage: false,
            lock_boss_on_capacity: true,
            locks_block_entry: true,
            locks_block_exit: false,
            start_policy: StartPolicy::EqualDistribution,
            start_non_overlap: false,
            base_visibility_range: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionModifiers {
    pub extra_range: u32,
    pub reveal_floor: bool,
    pub reveal_boss_nodes: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeVisibility {
    Explored,
    Adjacent,
    Revealed,
    Hidden,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityView {
    pub participant: ParticipantId,
    pub floor: FloorId,
    pub visible: Vec<NodeId>,
    pub explored: Vec<NodeId>,
    pub adjacent: Vec<NodeId>,
    pub per_node: BTreeMap<NodeId, NodeVisibility>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    pub participant: ParticipantId,
    pub floor: FloorId,
    pub from: Option<NodeId>,
    pub node: NodeId,
    pub cost: f64,
    pub remaining_points: f64,
    pub revealed: Vec<NodeId>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub checked: usize,
    pub eliminated: Vec<ParticipantId>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    ParticipantJoined {
        participant: ParticipantId,
        floor: FloorId,
        #[serde(rename = "startNode")]
        start_node: NodeId,
    },
    NodeRevealed {
        participant: ParticipantId,
        floor: FloorId,
        node: NodeId,
    },
    BossRoomLocked {
        floor: FloorId,
        node: NodeId,
        reason: LockReason,
    },
    BossRoomUnlocked {
        floor: FloorId,
        node: NodeId,
    },
    CombatPrepared {
        #[serde(rename = "instanceId")]
        instance_id: CombatInstanceId,
        floor: FloorId,
        node: NodeId,
        participants: Vec<ParticipantId>,
    },
    CombatResolved {
        #[serde(rename = "instanceId")]
        instance_id: CombatInstanceId,
        floor: FloorId,
        node: NodeId,
    },
    Eliminated {
        participant: ParticipantId,
        floor: FloorId,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_history_is_bounded() {
        let now = Utc::now();
        let participant = ParticipantId::new("p1");
        let floor = FloorId::new("f1");
        let mut position = ParticipantPosition::new(&participant, &floor, 10.0, now);
        for idx in 0..(MOVEMENT_HISTORY_CAP + 10) {
            position.record_move(MovementRecord {
                from: None,
                to: NodeId::new(format!("n{idx}")),
                cost: 1.0,
                at: now,
            });
        }
        assert_eq!(position.history.len(), MOVEMENT_HISTORY_CAP);
        assert_eq!(
            position.history.front().map(|record| record.to.as_str()),
            Some("n10")
        );
    }

    #[test]
    fn explored_set_never_duplicates() {
        let now = Utc::now();
        let mut position =
            ParticipantPosition::new(&ParticipantId::new("p1"), &FloorId::new("f1"), 5.0, now);
        assert!(position.mark_explored(NodeId::new("a")));
        assert!(!position.mark_explored(NodeId::new("a")));
        assert_eq!(position.explored.len(), 1);
    }

    #[test]
    fn runtime_events_serialize_with_type_tag() {
        let event = RuntimeEvent::Eliminated {
            participant: ParticipantId::new("p9"),
            floor: FloorId::new("f2"),
            reason: "time_limit".to_string(),
        };
        let json = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(json["type"], "eliminated");
        assert_eq!(json["participant"], "p9");
    }

    #[test]
    fn connection_cost_defaults_to_one_movement_point() {
        let connection: Connection = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "floorId": "f1",
            "from": "a",
            "to": "b",
            "bidirectional": true,
        }))
        .expect("connection should deserialize");
        assert_eq!(connection.cost, DEFAULT_MOVE_COST);
        assert_eq!(connection.requirement, None);
    }

    #[test]
    fn boss_kind_reports_capacity() {
        let kind = NodeKind::Boss {
            capacity: Some(2),
            monster: None,
        };
        assert!(kind.is_combat_eligible());
        assert_eq!(kind.capacity(), Some(2));
        assert_eq!(NodeKind::Plain.capacity(), None);
        assert!(!NodeKind::Stairs.is_combat_eligible());
    }
}
