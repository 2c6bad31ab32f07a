use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::boss_gate::BossRoomGate;
use crate::encounter::{
    CombatParticipant, EncounterRegistry, EncounterRegistryOptions, PreparedCombatInstance,
};
use crate::errors::{CoreError, Denial, StoreError};
use crate::fog;
use crate::graph::FloorGraph;
use crate::monsters::{MonsterRosterGenerator, MonsterRosterOptions};
use crate::rng::Rng;
use crate::start_points::StartPointAllocator;
use crate::store::{
    CharacterProvider, FloorRepository, PositionStore, RewardCollaborator, RewardContext,
    RewardReason, RulesProvider,
};
use crate::types::{
    CombatInstanceId, FloorId, NodeId, ParticipantId, ParticipantPosition, ParticipantStatus,
    Party, PartyId, PartyStatus, RunId, RunRules, RuntimeEvent, VisibilityView, VisionModifiers,
};

mod movement_system;
mod sweep_system;

#[derive(Clone, Debug)]
pub struct LabyrinthEngineOptions {
    pub seed: u32,
    pub encounter: EncounterRegistryOptions,
    pub roster: MonsterRosterOptions,
}

impl Default for LabyrinthEngineOptions {
    fn default() -> Self {
        Self {
            seed: 1,
            encounter: EncounterRegistryOptions::default(),
            roster: MonsterRosterOptions::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParticipantEntry {
    pub status: ParticipantStatus,
    pub party: Option<PartyId>,
}

/// Coordination core for one labyrinth run. Owns the per-run caches (floor
/// graphs, boss gate, encounter registry, start-point allocator) and the
/// participant/party rosters; everything is dropped with the run.
pub struct LabyrinthEngine {
    run_id: RunId,
    repo: Box<dyn FloorRepository>,
    positions: Box<dyn PositionStore>,
    rules_provider: Box<dyn RulesProvider>,
    rewards: Box<dyn RewardCollaborator>,
    characters: Box<dyn CharacterProvider>,
    graphs: HashMap<FloorId, FloorGraph>,
    gate: BossRoomGate,
    encounters: EncounterRegistry,
    allocator: StartPointAllocator,
    roster: MonsterRosterGenerator,
    participants: HashMap<ParticipantId, ParticipantEntry>,
    parties: HashMap<PartyId, Party>,
    events: Vec<RuntimeEvent>,
    rng: Rng,
}

impl LabyrinthEngine {
    pub fn new(
        run_id: RunId,
        repo: Box<dyn FloorRepository>,
        positions: Box<dyn PositionStore>,
        rules_provider: Box<dyn RulesProvider>,
        rewards: Box<dyn RewardCollaborator>,
        characters: Box<dyn CharacterProvider>,
        options: LabyrinthEngineOptions,
    ) -> Self {
        Self {
            run_id,
            repo,
            positions,
            rules_provider,
            rewards,
            characters,
            graphs: HashMap::new(),
            gate: BossRoomGate::new(),
            encounters: EncounterRegistry::new(options.encounter),
            allocator: StartPointAllocator::new(),
            roster: MonsterRosterGenerator::new(options.roster),
            participants: HashMap::new(),
            parties: HashMap::new(),
            events: Vec::new(),
            rng: Rng::new(options.seed),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn participant_status(&self, participant: &ParticipantId) -> Option<ParticipantStatus> {
        self.participants.get(participant).map(|entry| entry.status)
    }

    pub fn position(
        &self,
        participant: &ParticipantId,
        floor: &FloorId,
    ) -> Result<Option<ParticipantPosition>, CoreError> {
        Ok(self.positions.load(participant, floor)?)
    }

    pub fn register_party(&mut self, party: Party) {
        self.parties.insert(party.id.clone(), party);
    }

    pub fn party(&self, party: &PartyId) -> Option<&Party> {
        self.parties.get(party)
    }

    pub fn mark_winner(&mut self, participant: &ParticipantId) -> bool {
        let Some(entry) = self.participants.get_mut(participant) else {
            return false;
        };
        entry.status = ParticipantStatus::Winner;
        let party_id = entry.party.clone();
        if let Some(party_id) = party_id {
            if let Some(party) = self.parties.get_mut(&party_id) {
                party.status = PartyStatus::Winner;
            }
        }
        true
    }

    /// Drops the cached graph for a floor; the next query rebuilds it from
    /// the repository.
    pub fn invalidate_floor(&mut self, floor: &FloorId) {
        self.graphs.remove(floor);
    }

    pub fn floor_graph(&mut self, floor: &FloorId) -> Result<&FloorGraph, CoreError> {
        self.ensure_graph(floor)?;
        match self.graphs.get(floor) {
            Some(graph) => Ok(graph),
            None => Err(StoreError::Corrupt(format!("graph cache missing floor {floor}")).into()),
        }
    }

    pub fn join_floor(
        &mut self,
        participant: &ParticipantId,
        floor: &FloorId,
        party: Option<PartyId>,
        now: DateTime<Utc>,
    ) -> Result<NodeId, CoreError> {
        if let Some(party_id) = &party {
            let is_member = self
                .parties
                .get(party_id)
                .map(|party| party.members.contains(participant))
                .unwrap_or(false);
            if !is_member {
                return Err(Denial::PartyMembershipRequired(participant.clone()).into());
            }
        }

        let floor_def = self.repo.floor(floor)?;
        self.ensure_graph(floor)?;

        if let Some(existing) = self.positions.load(participant, floor)? {
            if let Some(node) = existing.current_node {
                return Ok(node);
            }
        }

        let on_floor = self.positions.positions_on_floor(floor)?;
        if let Some(max) = floor_def.max_occupants {
            if on_floor.len() >= max {
                return Err(Denial::NoStartPointAvailable(
                    floor.clone(),
                    "floor occupant limit reached".to_string(),
                )
                .into());
            }
        }

        let rules = self.rules()?;
        let graph = match self.graphs.get(floor) {
            Some(graph) => graph,
            None => {
                return Err(
                    StoreError::Corrupt(format!("graph cache missing floor {floor}")).into(),
                )
            }
        };
        let node = self
            .allocator
            .assign(graph, floor, &on_floor, &rules, &mut self.rng, now)?;

        let mut position =
            ParticipantPosition::new(participant, floor, floor_def.max_movement_points, now);
        position.current_node = Some(node.clone());
        position.mark_explored(node.clone());
        self.positions.save(position)?;

        self.participants
            .entry(participant.clone())
            .and_modify(|entry| entry.party = party.clone())
            .or_insert(ParticipantEntry {
                status: ParticipantStatus::Active,
                party: party.clone(),
            });
        self.events.push(RuntimeEvent::ParticipantJoined {
            participant: participant.clone(),
            floor: floor.clone(),
            start_node: node.clone(),
        });
        Ok(node)
    }

    pub fn assign_start_point(
        &mut self,
        participant: &ParticipantId,
        floor: &FloorId,
        now: DateTime<Utc>,
    ) -> Result<NodeId, CoreError> {
        self.join_floor(participant, floor, None, now)
    }

    pub fn can_enter_node(&mut self, floor: &FloorId, node: &NodeId) -> Result<(), CoreError> {
        self.ensure_graph(floor)?;
        let Some(node_obj) = self.graphs.get(floor).and_then(|graph| graph.node(node)).cloned()
        else {
            return Err(Denial::InvalidTarget(node.clone(), floor.clone()).into());
        };
        let rules = self.rules()?;
        let occupancy = self.occupants_of(floor, node)?.len();
        self.gate
            .can_enter(&*self.repo, &rules, floor, &node_obj, occupancy)
    }

    pub fn can_exit_node(
        &mut self,
        participant: &ParticipantId,
        floor: &FloorId,
        node: &NodeId,
    ) -> Result<(), CoreError> {
        self.ensure_graph(floor)?;
        let Some(node_obj) = self.graphs.get(floor).and_then(|graph| graph.node(node)).cloned()
        else {
            return Err(Denial::InvalidTarget(node.clone(), floor.clone()).into());
        };
        let rules = self.rules()?;
        self.gate
            .can_exit(&*self.repo, &rules, floor, &node_obj, participant)
    }

    pub fn get_visibility(
        &mut self,
        participant: &ParticipantId,
        floor: &FloorId,
        modifiers: &VisionModifiers,
    ) -> Result<VisibilityView, CoreError> {
        let mut position = self
            .positions
            .load(participant, floor)?
            .ok_or_else(|| Denial::PositionNotFound(participant.clone(), floor.clone()))?;
        self.ensure_graph(floor)?;
        let rules = self.rules()?;
        let Some(graph) = self.graphs.get(floor) else {
            return Err(StoreError::Corrupt(format!("graph cache missing floor {floor}")).into());
        };

        let explored_before = position.explored.len();
        let view = fog::visibility(graph, &mut position, &rules, modifiers);
        if position.explored.len() != explored_before {
            self.positions.save(position)?;
        }
        Ok(view)
    }

    /// Prepares (or joins) the shared combat instance for a combat-eligible
    /// node. Returns `None` when the node is not combat-eligible or the
    /// floor's pool produced no monsters.
    pub fn prepare_encounter(
        &mut self,
        participant: &ParticipantId,
        floor: &FloorId,
        node: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<Option<PreparedCombatInstance>, CoreError> {
        self.encounters.prune_idle(now);
        self.ensure_graph(floor)?;
        let Some(node_obj) = self.graphs.get(floor).and_then(|graph| graph.node(node)).cloned()
        else {
            return Err(Denial::InvalidTarget(node.clone(), floor.clone()).into());
        };
        if !node_obj.kind.is_combat_eligible() {
            return Ok(None);
        }

        let position = self
            .positions
            .load(participant, floor)?
            .ok_or_else(|| Denial::PositionNotFound(participant.clone(), floor.clone()))?;
        if position.current_node.as_ref() != Some(node) {
            return Err(Denial::InvalidTarget(node.clone(), floor.clone()).into());
        }

        let roster = self.assemble_roster(floor, node)?;
        if self.encounters.active(floor, node).is_some() {
            let instance = self
                .encounters
                .merge_participants(floor, node, roster, now)
                .cloned();
            return match instance {
                Some(instance) => Ok(Some(instance)),
                None => {
                    Err(StoreError::Corrupt("combat instance vanished during merge".to_string())
                        .into())
                }
            };
        }

        let requester_level = self
            .characters
            .snapshot(participant)
            .ok_or_else(|| Denial::CharacterDataRequired(participant.clone()))?
            .level;
        let floor_def = self.repo.floor(floor)?;
        let monsters = self.roster.spawn(
            &node_obj,
            &floor_def,
            &*self.repo,
            requester_level,
            &mut self.rng,
        )?;
        if monsters.is_empty() {
            return Ok(None);
        }

        let instance = self
            .encounters
            .create(floor, node, monsters, roster, now)
            .clone();
        self.events.push(RuntimeEvent::CombatPrepared {
            instance_id: instance.id.clone(),
            floor: floor.clone(),
            node: node.clone(),
            participants: instance.participant_ids(),
        });
        Ok(Some(instance))
    }

    /// Late join of an ongoing combat. Requires standing on the encounter
    /// node and sharing a party with someone already in the roster.
    pub fn join_encounter(
        &mut self,
        participant: &ParticipantId,
        instance_id: &CombatInstanceId,
        now: DateTime<Utc>,
    ) -> Result<PreparedCombatInstance, CoreError> {
        self.encounters.prune_idle(now);
        let Some(instance) = self.encounters.find_by_id(instance_id) else {
            return Err(Denial::CombatInstanceNotFound(instance_id.clone()).into());
        };
        let floor = instance.floor.clone();
        let node = instance.node.clone();
        let roster_ids = instance.participant_ids();
        let roster_parties: Vec<PartyId> = instance
            .participants
            .iter()
            .filter_map(|entry| entry.party.clone())
            .collect();

        let position = self
            .positions
            .load(participant, &floor)?
            .ok_or_else(|| Denial::PositionNotFound(participant.clone(), floor.clone()))?;
        if position.current_node.as_ref() != Some(&node) {
            return Err(Denial::InvalidTarget(node.clone(), floor.clone()).into());
        }

        let party = self
            .participants
            .get(participant)
            .and_then(|entry| entry.party.clone());
        if !roster_ids.contains(participant) {
            let shares_party = party
                .as_ref()
                .map(|party_id| roster_parties.contains(party_id))
                .unwrap_or(false);
            if !shares_party {
                return Err(Denial::PartyMembershipRequired(participant.clone()).into());
            }
        }

        let snapshot = self
            .characters
            .snapshot(participant)
            .ok_or_else(|| Denial::CharacterDataRequired(participant.clone()))?;
        let instance = self
            .encounters
            .join(instance_id, CombatParticipant { snapshot, party }, now)
            .map_err(CoreError::from)?
            .clone();
        Ok(instance)
    }

    /// Removes the instance when combat concludes, releases the boss lock,
    /// and grants participation rewards.
    pub fn resolve_encounter(
        &mut self,
        instance_id: &CombatInstanceId,
        _now: DateTime<Utc>,
    ) -> Result<PreparedCombatInstance, CoreError> {
        let instance = self
            .encounters
            .resolve(instance_id)
            .ok_or_else(|| Denial::CombatInstanceNotFound(instance_id.clone()))?;

        let is_boss = self
            .repo
            .node(&instance.node)
            .map(|node| node.kind.is_boss())
            .unwrap_or(false);
        if is_boss
            && self
                .gate
                .release(&mut *self.repo, &instance.floor, &instance.node)?
        {
            self.events.push(RuntimeEvent::BossRoomUnlocked {
                floor: instance.floor.clone(),
                node: instance.node.clone(),
            });
        }

        for participant in instance.participant_ids() {
            let context = RewardContext {
                floor: instance.floor.clone(),
                reason: RewardReason::EncounterResolved,
            };
            if let Err(err) = self.rewards.award_participation(&participant, &context) {
                log::warn!("participation reward failed for {participant}: {err}");
            }
        }

        self.events.push(RuntimeEvent::CombatResolved {
            instance_id: instance.id.clone(),
            floor: instance.floor.clone(),
            node: instance.node.clone(),
        });
        Ok(instance)
    }

    pub fn active_encounter(
        &self,
        floor: &FloorId,
        node: &NodeId,
    ) -> Option<&PreparedCombatInstance> {
        self.encounters.active(floor, node)
    }

    /// Explicit external unlock of a boss room, e.g. on floor reset.
    pub fn release_boss_lock(
        &mut self,
        floor: &FloorId,
        node: &NodeId,
    ) -> Result<bool, CoreError> {
        let released = self.gate.release(&mut *self.repo, floor, node)?;
        if released {
            self.events.push(RuntimeEvent::BossRoomUnlocked {
                floor: floor.clone(),
                node: node.clone(),
            });
        }
        Ok(released)
    }

    fn rules(&self) -> Result<RunRules, StoreError> {
        match self.rules_provider.rules_for_run(&self.run_id)? {
            Some(rules) => Ok(rules),
            None => Ok(self.rules_provider.global_rules()),
        }
    }

    fn ensure_graph(&mut self, floor: &FloorId) -> Result<(), StoreError> {
        if self.graphs.contains_key(floor) {
            return Ok(());
        }
        let nodes = self.repo.nodes(floor)?;
        let connections = self.repo.connections(floor)?;
        self.graphs
            .insert(floor.clone(), FloorGraph::build(nodes, connections));
        Ok(())
    }

    fn occupants_of(
        &self,
        floor: &FloorId,
        node: &NodeId,
    ) -> Result<Vec<ParticipantId>, StoreError> {
        Ok(self
            .positions
            .positions_on_floor(floor)?
            .into_iter()
            .filter(|position| position.current_node.as_ref() == Some(node))
            .map(|position| position.participant)
            .collect())
    }

    /// Everyone standing on the node, plus party members of those occupants
    /// whose position on the node is independently verified.
    fn assemble_roster(
        &self,
        floor: &FloorId,
        node: &NodeId,
    ) -> Result<Vec<CombatParticipant>, CoreError> {
        let occupants = self.occupants_of(floor, node)?;
        let mut ordered: Vec<ParticipantId> = Vec::new();
        for occupant in &occupants {
            if !ordered.contains(occupant) {
                ordered.push(occupant.clone());
            }
        }
        for occupant in &occupants {
            let Some(party_id) = self
                .participants
                .get(occupant)
                .and_then(|entry| entry.party.clone())
            else {
                continue;
            };
            let Some(party) = self.parties.get(&party_id) else {
                continue;
            };
            for member in &party.members {
                if ordered.contains(member) {
                    continue;
                }
                let Some(member_position) = self.positions.load(member, floor)? else {
                    continue;
                };
                if member_position.current_node.as_ref() == Some(node) {
                    ordered.push(member.clone());
                }
            }
        }

        let mut roster = Vec::with_capacity(ordered.len());
        for id in ordered {
            let snapshot = self
                .characters
                .snapshot(&id)
                .ok_or_else(|| Denial::CharacterDataRequired(id.clone()))?;
            let party = self
                .participants
                .get(&id)
                .and_then(|entry| entry.party.clone());
            roster.push(CombatParticipant { snapshot, party });
        }
        Ok(roster)
    }
}

#[cfg(test)]
impl LabyrinthEngine {
    pub(crate) fn place_for_test(
        &mut self,
        participant: &ParticipantId,
        floor: &FloorId,
        node: Option<&NodeId>,
        movement_points: f64,
        party: Option<PartyId>,
        now: DateTime<Utc>,
    ) {
        let mut position = ParticipantPosition::new(participant, floor, movement_points, now);
        if let Some(node) = node {
            position.current_node = Some(node.clone());
            position.mark_explored(node.clone());
        }
        self.positions
            .save(position)
            .expect("in-memory save should not fail");
        self.participants.insert(
            participant.clone(),
            ParticipantEntry {
                status: ParticipantStatus::Active,
                party,
            },
        );
    }
}
