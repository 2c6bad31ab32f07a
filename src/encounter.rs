use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::Rng as _;
use serde::Serialize;

use crate::constants::{ENCOUNTER_IDLE_TTL_MINUTES, MAX_COMBAT_PARTICIPANTS};
use crate::errors::Denial;
use crate::types::{
    CharacterSnapshot, CombatInstanceId, FloorId, MonsterInstance, NodeId, ParticipantId, PartyId,
};

#[derive(Clone, Debug)]
pub struct EncounterRegistryOptions {
    pub max_participants: usize,
    pub idle_ttl: Duration,
}

impl Default for EncounterRegistryOptions {
    fn default() -> Self {
        Self {
            max_participants: MAX_COMBAT_PARTICIPANTS,
            idle_ttl: Duration::minutes(ENCOUNTER_IDLE_TTL_MINUTES),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatParticipant {
    pub snapshot: CharacterSnapshot,
    pub party: Option<PartyId>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedCombatInstance {
    pub id: CombatInstanceId,
    pub floor: FloorId,
    pub node: NodeId,
    pub monsters: Vec<MonsterInstance>,
    pub participants: Vec<CombatParticipant>,
    pub created_at: DateTime<Utc>,
    pub last_joined_at: DateTime<Utc>,
}

impl PreparedCombatInstance {
    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .map(|participant| participant.snapshot.participant.clone())
            .collect()
    }

    fn contains(&self, participant: &ParticipantId) -> bool {
        self.participants
            .iter()
            .any(|entry| &entry.snapshot.participant == participant)
    }
}

/// Holds every prepared combat instance of a run, keyed by (floor, node) so
/// at most one instance can be active per node. The monster roster is fixed
/// at creation; the participant roster grows until the cap.
pub struct EncounterRegistry {
    options: EncounterRegistryOptions,
    instances: HashMap<(FloorId, NodeId), PreparedCombatInstance>,
    next_seq: u64,
}

impl EncounterRegistry {
    pub fn new(options: EncounterRegistryOptions) -> Self {
        Self {
            options,
            instances: HashMap::new(),
            next_seq: 1,
        }
    }

    pub fn active(&self, floor: &FloorId, node: &NodeId) -> Option<&PreparedCombatInstance> {
        self.instances.get(&(floor.clone(), node.clone()))
    }

    pub fn find_by_id(&self, id: &CombatInstanceId) -> Option<&PreparedCombatInstance> {
        self.instances.values().find(|instance| &instance.id == id)
    }

    /// Creates the single instance for (floor, node). The initial roster
    /// sweep truncates at the cap instead of rejecting.
    pub fn create(
        &mut self,
        floor: &FloorId,
        node: &NodeId,
        monsters: Vec<MonsterInstance>,
        mut roster: Vec<CombatParticipant>,
        now: DateTime<Utc>,
    ) -> &PreparedCombatInstance {
        roster.truncate(self.options.max_participants);
        let id = self.make_instance_id();
        let key = (floor.clone(), node.clone());
        self.instances.insert(
            key.clone(),
            PreparedCombatInstance {
                id,
                floor: floor.clone(),
                node: node.clone(),
                monsters,
                participants: roster,
                created_at: now,
                last_joined_at: now,
            },
        );
        &self.instances[&key]
    }

    /// Folds late roster candidates into an existing instance, stopping
    /// silently at the cap. Used when `prepare` finds the node already
    /// engaged.
    pub fn merge_participants(
        &mut self,
        floor: &FloorId,
        node: &NodeId,
        roster: Vec<CombatParticipant>,
        now: DateTime<Utc>,
    ) -> Option<&PreparedCombatInstance> {
        let max = self.options.max_participants;
        let instance = self.instances.get_mut(&(floor.clone(), node.clone()))?;
        for candidate in roster {
            if instance.participants.len() >= max {
                break;
            }
            if !instance.contains(&candidate.snapshot.participant) {
                instance.participants.push(candidate);
            }
        }
        instance.last_joined_at = now;
        Some(&*instance)
    }

    /// Explicit join after the instance exists. Unlike the initial sweep, a
    /// join against a full roster is rejected with a descriptive reason.
    pub fn join(
        &mut self,
        id: &CombatInstanceId,
        participant: CombatParticipant,
        now: DateTime<Utc>,
    ) -> Result<&PreparedCombatInstance, Denial> {
        let max = self.options.max_participants;
        let instance = self
            .instances
            .values_mut()
            .find(|instance| &instance.id == id)
            .ok_or_else(|| Denial::CombatInstanceNotFound(id.clone()))?;
        if instance.contains(&participant.snapshot.participant) {
            instance.last_joined_at = now;
            return Ok(&*instance);
        }
        if instance.participants.len() >= max {
            return Err(Denial::CombatInstanceFull(id.clone()));
        }
        instance.participants.push(participant);
        instance.last_joined_at = now;
        Ok(&*instance)
    }

    /// Removes the instance when the encounter resolves.
    pub fn resolve(&mut self, id: &CombatInstanceId) -> Option<PreparedCombatInstance> {
        let key = self
            .instances
            .iter()
            .find(|(_, instance)| &instance.id == id)
            .map(|(key, _)| key.clone())?;
        self.instances.remove(&key)
    }

    /// Evicts instances nobody has joined within the idle TTL. Applied on
    /// registry access rather than by a timer of its own.
    pub fn prune_idle(&mut self, now: DateTime<Utc>) -> Vec<CombatInstanceId> {
        let ttl = self.options.idle_ttl;
        let mut evicted = Vec::new();
        self.instances.retain(|_, instance| {
            if now - instance.last_joined_at >= ttl {
                evicted.push(instance.id.clone());
                false
            } else {
                true
            }
        });
        for id in &evicted {
            log::warn!("evicted idle combat instance {id}");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn make_instance_id(&mut self) -> CombatInstanceId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let nonce: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        CombatInstanceId::new(format!("combat_{seq}_{nonce}"))
    }
}
