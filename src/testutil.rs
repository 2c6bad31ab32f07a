use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::engine::{LabyrinthEngine, LabyrinthEngineOptions};
use crate::errors::StoreError;
use crate::store::{
    InMemoryFloorRepository, InMemoryPositionStore, RewardCollaborator, RewardContext,
    StaticCharacterProvider, StaticRulesProvider,
};
use crate::types::{
    CharacterSnapshot, Connection, Floor, FloorId, MonsterDef, MonsterId, MonsterPoolEntry, Node,
    NodeId, NodeKind, ParticipantId, PartyId, PartyStatus, RunId, RunRules,
};

pub(crate) const FLOOR: &str = "floor-1";
pub(crate) const FLOOR_NO_STARTS: &str = "floor-2";

pub(crate) struct RecordingRewards {
    calls: Arc<Mutex<Vec<ParticipantId>>>,
}

impl RewardCollaborator for RecordingRewards {
    fn award_participation(
        &self,
        participant: &ParticipantId,
        _context: &RewardContext,
    ) -> Result<(), StoreError> {
        self.calls
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(participant.clone());
        Ok(())
    }
}

pub(crate) struct Harness {
    pub engine: LabyrinthEngine,
    reward_calls: Arc<Mutex<Vec<ParticipantId>>>,
}

impl Harness {
    pub fn place(
        &mut self,
        participant: &ParticipantId,
        node: &NodeId,
        points: f64,
        now: DateTime<Utc>,
    ) {
        self.engine.place_for_test(
            participant,
            &FloorId::new(FLOOR),
            Some(node),
            points,
            None,
            now,
        );
    }

    pub fn place_with_party(
        &mut self,
        participant: &ParticipantId,
        node: &NodeId,
        party: Option<PartyId>,
        now: DateTime<Utc>,
    ) {
        self.engine
            .place_for_test(participant, &FloorId::new(FLOOR), Some(node), 10.0, party, now);
    }

    pub fn place_unpositioned(
        &mut self,
        participant: &ParticipantId,
        points: f64,
        now: DateTime<Utc>,
    ) {
        self.engine
            .place_for_test(participant, &FloorId::new(FLOOR), None, points, None, now);
    }

    pub fn place_unpositioned_on(
        &mut self,
        participant: &ParticipantId,
        floor: &FloorId,
        points: f64,
        now: DateTime<Utc>,
    ) {
        self.engine
            .place_for_test(participant, floor, None, points, None, now);
    }

    pub fn reward_calls(&self) -> Vec<ParticipantId> {
        self.reward_calls
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    pub fn party_status(&self, party: &PartyId) -> Option<PartyStatus> {
        self.engine.party(party).map(|party| party.status)
    }
}

pub(crate) fn harness() -> Harness {
    build(RunRules::default(), None, None)
}

pub(crate) fn harness_with_rules(rules: RunRules) -> Harness {
    build(rules, None, None)
}

pub(crate) fn harness_with_time_limit(limit: Duration) -> Harness {
    build(RunRules::default(), Some(limit), None)
}

pub(crate) fn harness_with_max_occupants(max: usize) -> Harness {
    build(RunRules::default(), None, Some(max))
}

fn build(rules: RunRules, time_limit: Option<Duration>, max_occupants: Option<usize>) -> Harness {
    let floor = FloorId::new(FLOOR);
    let mut repo = InMemoryFloorRepository::new();
    repo.insert_floor(Floor {
        id: floor.clone(),
        number: 1,
        max_occupants,
        regen_per_hour: 2.0,
        max_movement_points: 10.0,
        time_limit,
        monster_pool: vec![MonsterPoolEntry {
            monster: MonsterId::new("slime"),
            weight: 10,
            min_level: None,
            max_level: None,
        }],
    });

    for (id, x, y, kind) in [
        ("s1", 0, 0, NodeKind::Start),
        ("s2", 2, 0, NodeKind::Start),
        ("s3", 4, 0, NodeKind::Start),
        ("hall", 2, 1, NodeKind::Plain),
        ("den", 2, 2, NodeKind::MonsterSpawn),
        (
            "boss",
            2,
            3,
            NodeKind::Boss {
                capacity: Some(1),
                monster: Some(MonsterId::new("dragon")),
            },
        ),
        ("stairs", 4, 2, NodeKind::Stairs),
    ] {
        repo.insert_node(Node::new(id, &floor, x, y, kind));
    }
    for (id, from, to, cost) in [
        ("c1", "s1", "hall", 1.0),
        ("c2", "s2", "hall", 1.0),
        ("c3", "s3", "hall", 1.0),
        ("c4", "hall", "den", 1.0),
        ("c5", "den", "boss", 2.0),
        ("c6", "hall", "stairs", 3.0),
    ] {
        repo.insert_connection(Connection::bidirectional(
            id,
            &floor,
            &NodeId::new(from),
            &NodeId::new(to),
            cost,
        ));
    }
    repo.insert_monster(MonsterDef {
        id: MonsterId::new("slime"),
        name: "slime".to_string(),
        base_level: 1,
        max_hp: 16,
        attack: 4,
        defense: 2,
        experience: 10,
    });
    repo.insert_monster(MonsterDef {
        id: MonsterId::new("dragon"),
        name: "dragon".to_string(),
        base_level: 8,
        max_hp: 120,
        attack: 30,
        defense: 12,
        experience: 200,
    });

    let bare_floor = FloorId::new(FLOOR_NO_STARTS);
    repo.insert_floor(Floor {
        id: bare_floor.clone(),
        number: 2,
        max_occupants: None,
        regen_per_hour: 2.0,
        max_movement_points: 10.0,
        time_limit: None,
        monster_pool: Vec::new(),
    });
    repo.insert_node(Node::new("n1", &bare_floor, 0, 0, NodeKind::Plain));
    repo.insert_node(Node::new("n2", &bare_floor, 1, 0, NodeKind::Plain));
    repo.insert_connection(Connection::bidirectional(
        "b1",
        &bare_floor,
        &NodeId::new("n1"),
        &NodeId::new("n2"),
        1.0,
    ));

    let mut characters = StaticCharacterProvider::new();
    for idx in 0..10 {
        let name = format!("p{idx}");
        characters.insert(CharacterSnapshot {
            participant: ParticipantId::new(&name),
            name,
            level: 5,
            max_hp: 60,
            attack: 12,
            defense: 6,
        });
    }

    let reward_calls = Arc::new(Mutex::new(Vec::new()));
    let engine = LabyrinthEngine::new(
        RunId::new("run-1"),
        Box::new(repo),
        Box::new(InMemoryPositionStore::new()),
        Box::new(StaticRulesProvider::new(rules)),
        Box::new(RecordingRewards {
            calls: reward_calls.clone(),
        }),
        Box::new(characters),
        LabyrinthEngineOptions {
            seed: 7,
            ..LabyrinthEngineOptions::default()
        },
    );

    Harness {
        engine,
        reward_calls,
    }
}
