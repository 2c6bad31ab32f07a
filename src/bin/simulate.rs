use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use clap::Parser;
use labyrinth_core::engine::{LabyrinthEngine, LabyrinthEngineOptions};
use labyrinth_core::errors::{CoreError, Denial};
use labyrinth_core::rng::Rng;
use labyrinth_core::store::{
    InMemoryFloorRepository, InMemoryPositionStore, LoggingRewardCollaborator,
    StaticCharacterProvider, StaticRulesProvider,
};
use labyrinth_core::types::{
    CharacterSnapshot, Connection, Floor, FloorId, MonsterDef, MonsterId, MonsterPoolEntry, Node,
    NodeId, NodeKind, ParticipantId, RunId, RunRules,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Number of simulated participants (1-8).
    #[arg(long)]
    participants: Option<usize>,
    /// Movement attempts per participant.
    #[arg(long)]
    steps: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantResult {
    participant: String,
    start_node: String,
    final_node: Option<String>,
    moves_ok: usize,
    explored: usize,
    remaining_points: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    seed: u32,
    participants: usize,
    steps: usize,
    moves_ok: usize,
    denials: BTreeMap<String, usize>,
    events: BTreeMap<String, usize>,
    encounters_prepared: usize,
    eliminated: usize,
    anomalies: Vec<String>,
    results: Vec<ParticipantResult>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let seed = normalize_seed(cli.seed.unwrap_or_else(|| Utc::now().timestamp_millis() as u64));
    let participants = cli.participants.unwrap_or(4).clamp(1, 8);
    let steps = cli.steps.unwrap_or(12).clamp(1, 200);

    let summary = run_simulation(seed, participants, steps);
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).expect("summary should serialize")
    );

    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            log::error!("failed to write summary to {}: {error}", path.display());
            std::process::exit(2);
        }
    }

    if !summary.anomalies.is_empty() {
        std::process::exit(1);
    }
}

fn run_simulation(seed: u32, participant_count: usize, steps: usize) -> RunSummary {
    let floor = FloorId::new("floor-1");
    let mut engine = build_engine(&floor, participant_count, seed);
    let mut rng = Rng::new(seed.wrapping_add(101));
    let started_at = Utc::now();

    let ids: Vec<ParticipantId> = (1..=participant_count)
        .map(|idx| ParticipantId::new(format!("p{idx}")))
        .collect();
    let mut start_nodes = BTreeMap::new();
    for id in &ids {
        let node = engine
            .join_floor(id, &floor, None, started_at)
            .expect("fixture floor should accept joiners");
        log::info!("{id} starts at {node}");
        start_nodes.insert(id.clone(), node);
    }

    let mut moves_ok = 0usize;
    let mut denials: BTreeMap<String, usize> = BTreeMap::new();
    let mut events: BTreeMap<String, usize> = BTreeMap::new();
    let mut anomalies = Vec::new();
    let mut explored_counts: BTreeMap<ParticipantId, usize> =
        ids.iter().map(|id| (id.clone(), 1)).collect();

    for step in 0..steps {
        let now = started_at + Duration::minutes(5 * (step as i64 + 1));
        for id in &ids {
            let Some(target) = pick_target(&mut engine, &floor, id, &mut rng) else {
                continue;
            };
            match engine.move_participant(id, &floor, &target, now) {
                Ok(outcome) => {
                    moves_ok += 1;
                    check_move_invariants(
                        &mut engine,
                        &floor,
                        id,
                        outcome.remaining_points,
                        &mut explored_counts,
                        &mut anomalies,
                    );
                }
                Err(CoreError::Denied(denial)) => {
                    *denials.entry(denial_key(&denial).to_string()).or_insert(0) += 1;
                }
                Err(CoreError::Store(err)) => {
                    anomalies.push(format!("store fault during move: {err}"));
                }
            }
        }
        for event in engine.drain_events() {
            let key = serde_json::to_value(&event)
                .ok()
                .and_then(|value| value["type"].as_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            *events.entry(key).or_insert(0) += 1;
        }
    }

    let sweep_at = started_at + Duration::hours(3);
    let eliminated = match engine.sweep_eliminations(sweep_at) {
        Ok(report) => report.eliminated.len(),
        Err(err) => {
            anomalies.push(format!("sweep failed: {err}"));
            0
        }
    };
    for event in engine.drain_events() {
        let key = serde_json::to_value(&event)
            .ok()
            .and_then(|value| value["type"].as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        *events.entry(key).or_insert(0) += 1;
    }

    let mut results = Vec::new();
    for id in &ids {
        let position = engine
            .position(id, &floor)
            .ok()
            .flatten();
        results.push(ParticipantResult {
            participant: id.to_string(),
            start_node: start_nodes[id].to_string(),
            final_node: position
                .as_ref()
                .and_then(|position| position.current_node.as_ref())
                .map(|node| node.to_string()),
            moves_ok: position
                .as_ref()
                .map(|position| position.history.len())
                .unwrap_or(0),
            explored: position
                .as_ref()
                .map(|position| position.explored.len())
                .unwrap_or(0),
            remaining_points: position
                .as_ref()
                .map(|position| position.movement_points)
                .unwrap_or(0.0),
        });
    }

    let encounters_prepared = events.get("combat_prepared").copied().unwrap_or(0);
    RunSummary {
        seed,
        participants: participant_count,
        steps,
        moves_ok,
        denials,
        events,
        encounters_prepared,
        eliminated,
        anomalies,
        results,
    }
}

fn pick_target(
    engine: &mut LabyrinthEngine,
    floor: &FloorId,
    participant: &ParticipantId,
    rng: &mut Rng,
) -> Option<NodeId> {
    let current = engine
        .position(participant, floor)
        .ok()
        .flatten()?
        .current_node?;
    let graph = engine.floor_graph(floor).ok()?;
    let neighbors = graph.neighbors(&current);
    if neighbors.is_empty() {
        return None;
    }
    Some(neighbors[rng.pick_index(neighbors.len())].to.clone())
}

fn check_move_invariants(
    engine: &mut LabyrinthEngine,
    floor: &FloorId,
    participant: &ParticipantId,
    remaining_points: f64,
    explored_counts: &mut BTreeMap<ParticipantId, usize>,
    anomalies: &mut Vec<String>,
) {
    if remaining_points < 0.0 || remaining_points > 10.0 {
        anomalies.push(format!(
            "{participant} movement points out of range: {remaining_points}"
        ));
    }
    let explored = engine
        .position(participant, floor)
        .ok()
        .flatten()
        .map(|position| position.explored.len())
        .unwrap_or(0);
    let previous = explored_counts.entry(participant.clone()).or_insert(0);
    if explored < *previous {
        anomalies.push(format!(
            "{participant} explored set shrank from {previous} to {explored}"
        ));
    }
    *previous = explored;
}

fn denial_key(denial: &Denial) -> &'static str {
    match denial {
        Denial::PositionNotFound(_, _) => "position_not_found",
        Denial::InvalidTarget(_, _) => "invalid_target",
        Denial::NoPath(_, _) => "no_path",
        Denial::InsufficientMovementPoints { .. } => "insufficient_movement_points",
        Denial::NodeAtCapacity(_) => "node_at_capacity",
        Denial::NodeLocked(_, _) => "node_locked",
        Denial::NoStartPointAvailable(_, _) => "no_start_point_available",
        Denial::NoNodesOnFloor(_) => "no_nodes_on_floor",
        Denial::PartyMembershipRequired(_) => "party_membership_required",
        Denial::CombatInstanceFull(_) => "combat_instance_full",
        Denial::CombatInstanceNotFound(_) => "combat_instance_not_found",
        Denial::CharacterDataRequired(_) => "character_data_required",
    }
}

fn build_engine(floor: &FloorId, participant_count: usize, seed: u32) -> LabyrinthEngine {
    let mut repo = InMemoryFloorRepository::new();
    repo.insert_floor(Floor {
        id: floor.clone(),
        number: 1,
        max_occupants: None,
        regen_per_hour: 6.0,
        max_movement_points: 10.0,
        time_limit: Some(Duration::minutes(90)),
        monster_pool: vec![
            MonsterPoolEntry {
                monster: MonsterId::new("slime"),
                weight: 10,
                min_level: None,
                max_level: Some(8),
            },
            MonsterPoolEntry {
                monster: MonsterId::new("wolf"),
                weight: 6,
                min_level: Some(4),
                max_level: None,
            },
        ],
    });

    for (id, x, y, kind) in [
        ("s1", 0, 0, NodeKind::Start),
        ("s2", 4, 0, NodeKind::Start),
        ("s3", 8, 0, NodeKind::Start),
        ("hall", 4, 2, NodeKind::Plain),
        ("den", 2, 4, NodeKind::MonsterSpawn),
        ("warren", 6, 4, NodeKind::MonsterSpawn),
        (
            "boss",
            4,
            6,
            NodeKind::Boss {
                capacity: Some(2),
                monster: Some(MonsterId::new("dragon")),
            },
        ),
        ("stairs", 8, 6, NodeKind::Stairs),
    ] {
        repo.insert_node(Node::new(id, floor, x, y, kind));
    }
    for (id, from, to, cost) in [
        ("c1", "s1", "hall", 1.0),
        ("c2", "s2", "hall", 1.0),
        ("c3", "s3", "hall", 1.0),
        ("c4", "hall", "den", 1.0),
        ("c5", "hall", "warren", 1.0),
        ("c6", "den", "boss", 2.0),
        ("c7", "warren", "boss", 2.0),
        ("c8", "warren", "stairs", 3.0),
    ] {
        repo.insert_connection(Connection::bidirectional(
            id,
            floor,
            &NodeId::new(from),
            &NodeId::new(to),
            cost,
        ));
    }
    for (id, base_level, max_hp, attack, defense, experience) in [
        ("slime", 1, 16, 4, 2, 10),
        ("wolf", 5, 40, 11, 5, 35),
        ("dragon", 9, 150, 32, 14, 260),
    ] {
        repo.insert_monster(MonsterDef {
            id: MonsterId::new(id),
            name: id.to_string(),
            base_level,
            max_hp,
            attack,
            defense,
            experience,
        });
    }

    let mut characters = StaticCharacterProvider::new();
    for idx in 1..=participant_count {
        let name = format!("p{idx}");
        characters.insert(CharacterSnapshot {
            participant: ParticipantId::new(&name),
            name,
            level: (3 + idx as u32).min(12),
            max_hp: 50 + idx as i32 * 10,
            attack: 10 + idx as i32,
            defense: 5 + idx as i32,
        });
    }

    LabyrinthEngine::new(
        RunId::new(format!("sim-{seed}")),
        Box::new(repo),
        Box::new(InMemoryPositionStore::new()),
        Box::new(StaticRulesProvider::new(RunRules::default())),
        Box::new(LoggingRewardCollaborator),
        Box::new(characters),
        LabyrinthEngineOptions {
            seed,
            ..LabyrinthEngineOptions::default()
        },
    )
}

fn normalize_seed(seed: u64) -> u32 {
    seed as u32
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let text = serde_json::to_string_pretty(summary).expect("summary should serialize");
    std::fs::write(path, text)
}
