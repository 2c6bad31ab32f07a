use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::errors::{CoreError, Denial, StoreError};
use crate::store::FloorRepository;
use crate::types::{BossRoomLock, FloorId, LockReason, Node, NodeId, ParticipantId, RunRules};

/// Per-(floor, node) lock state machine for boss rooms:
/// unlocked <-> locked(capacity | engaged).
///
/// The in-memory map is a cache. On miss, lock status is rebuilt from the
/// node's lock metadata in the floor repository, so a fresh process reaches
/// correct admission decisions. Occupancy is always supplied by the caller
/// from live position data, never cached here.
#[derive(Default)]
pub struct BossRoomGate {
    locks: HashMap<(FloorId, NodeId), BossRoomLock>,
}

impl BossRoomGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_state(
        &mut self,
        repo: &dyn FloorRepository,
        floor: &FloorId,
        node: &NodeId,
    ) -> Result<Option<BossRoomLock>, StoreError> {
        let key = (floor.clone(), node.clone());
        if let Some(lock) = self.locks.get(&key) {
            return Ok(Some(lock.clone()));
        }
        let stored = repo.node(node)?.lock;
        if let Some(lock) = &stored {
            self.locks.insert(key, lock.clone());
        }
        Ok(stored)
    }

    /// Admission check. Capacity is enforced regardless of lock state; locks
    /// block entry only when the active rule set says so.
    pub fn can_enter(
        &mut self,
        repo: &dyn FloorRepository,
        rules: &RunRules,
        floor: &FloorId,
        node: &Node,
        occupancy: usize,
    ) -> Result<(), CoreError> {
        if !node.kind.is_boss() {
            return Ok(());
        }
        if let Some(capacity) = node.kind.capacity() {
            if occupancy >= capacity {
                return Err(Denial::NodeAtCapacity(node.id.clone()).into());
            }
        }
        if rules.locks_block_entry {
            if let Some(lock) = self.lock_state(repo, floor, &node.id)? {
                return Err(
                    Denial::NodeLocked(node.id.clone(), lock.reason.label().to_string()).into(),
                );
            }
        }
        Ok(())
    }

    /// Exit check: denied only when locked, the rule set marks locks as
    /// exit-blocking, and the participant is among the tracked occupants.
    pub fn can_exit(
        &mut self,
        repo: &dyn FloorRepository,
        rules: &RunRules,
        floor: &FloorId,
        node: &Node,
        participant: &ParticipantId,
    ) -> Result<(), CoreError> {
        if !node.kind.is_boss() || !rules.locks_block_exit {
            return Ok(());
        }
        if let Some(lock) = self.lock_state(repo, floor, &node.id)? {
            if lock.occupants.contains(participant) {
                return Err(
                    Denial::NodeLocked(node.id.clone(), lock.reason.label().to_string()).into(),
                );
            }
        }
        Ok(())
    }

    /// Evaluates lock-on-engage and lock-on-capacity after a participant
    /// entered `node`. `occupants` is the post-entry occupant snapshot.
    /// Returns the applied lock reason, if any.
    pub fn note_entry(
        &mut self,
        repo: &mut dyn FloorRepository,
        rules: &RunRules,
        floor: &FloorId,
        node: &Node,
        occupants: Vec<ParticipantId>,
        now: DateTime<Utc>,
    ) -> Result<Option<LockReason>, StoreError> {
        if !node.kind.is_boss() {
            return Ok(None);
        }
        if self.lock_state(repo, floor, &node.id)?.is_some() {
            return Ok(None);
        }

        let at_capacity = node
            .kind
            .capacity()
            .map(|capacity| occupants.len() >= capacity)
            .unwrap_or(false);
        let reason = if rules.lock_boss_on_engage {
            Some(LockReason::Engaged)
        } else if rules.lock_boss_on_capacity && at_capacity {
            Some(LockReason::Capacity)
        } else {
            None
        };

        if let Some(reason) = reason {
            let lock = BossRoomLock {
                reason,
                locked_at: now,
                occupants,
            };
            repo.set_node_lock(&node.id, Some(lock.clone()))?;
            self.locks.insert((floor.clone(), node.id.clone()), lock);
        }
        Ok(reason)
    }

    /// Explicit release, e.g. when the encounter resolves. Returns whether a
    /// lock was actually cleared.
    pub fn release(
        &mut self,
        repo: &mut dyn FloorRepository,
        floor: &FloorId,
        node: &NodeId,
    ) -> Result<bool, StoreError> {
        let cached = self.locks.remove(&(floor.clone(), node.clone())).is_some();
        let stored = repo.node(node)?.lock.is_some();
        if stored {
            repo.set_node_lock(node, None)?;
        }
        Ok(cached || stored)
    }

    /// Floor reset: clears every lock on the floor.
    pub fn reset_floor(
        &mut self,
        repo: &mut dyn FloorRepository,
        floor: &FloorId,
    ) -> Result<usize, StoreError> {
        self.locks.retain(|(lock_floor, _), _| lock_floor != floor);
        let mut cleared = 0;
        for node in repo.nodes(floor)? {
            if node.lock.is_some() {
                repo.set_node_lock(&node.id, None)?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryFloorRepository;
    use crate::types::NodeKind;

    fn floor_id() -> FloorId {
        FloorId::new("f1")
    }

    fn boss_node(capacity: Option<usize>) -> Node {
        Node::new(
            "boss",
            &floor_id(),
            0,
            0,
            NodeKind::Boss {
                capacity,
                monster: None,
            },
        )
    }

    fn repo_with(node: &Node) -> InMemoryFloorRepository {
        let mut repo = InMemoryFloorRepository::new();
        repo.insert_node(node.clone());
        repo
    }

    fn occupants(names: &[&str]) -> Vec<ParticipantId> {
        names.iter().map(|name| ParticipantId::new(*name)).collect()
    }

    #[test]
    fn entry_is_denied_at_capacity_regardless_of_lock() {
        let node = boss_node(Some(2));
        let repo = repo_with(&node);
        let mut gate = BossRoomGate::new();
        let rules = RunRules {
            locks_block_entry: false,
            ..RunRules::default()
        };
        assert!(gate
            .can_enter(&repo, &rules, &floor_id(), &node, 1)
            .is_ok());
        let denied = gate.can_enter(&repo, &rules, &floor_id(), &node, 2);
        assert_eq!(
            denied,
            Err(CoreError::Denied(Denial::NodeAtCapacity(node.id.clone())))
        );
    }

    #[test]
    fn capacity_lock_applies_when_room_fills() {
        let node = boss_node(Some(2));
        let mut repo = repo_with(&node);
        let mut gate = BossRoomGate::new();
        let rules = RunRules::default();
        let now = Utc::now();

        let none = gate
            .note_entry(&mut repo, &rules, &floor_id(), &node, occupants(&["p1"]), now)
            .unwrap();
        assert_eq!(none, None);

        let reason = gate
            .note_entry(
                &mut repo,
                &rules,
                &floor_id(),
                &node,
                occupants(&["p1", "p2"]),
                now,
            )
            .unwrap();
        assert_eq!(reason, Some(LockReason::Capacity));

        let denied = gate.can_enter(&repo, &rules, &floor_id(), &node, 1);
        assert!(matches!(
            denied,
            Err(CoreError::Denied(Denial::NodeLocked(_, _)))
        ));
    }

    #[test]
    fn engage_lock_is_independent_of_occupancy() {
        let node = boss_node(Some(3));
        let mut repo = repo_with(&node);
        let mut gate = BossRoomGate::new();
        let rules = RunRules {
            lock_boss_on_engage: true,
            ..RunRules::default()
        };
        let reason = gate
            .note_entry(
                &mut repo,
                &rules,
                &floor_id(),
                &node,
                occupants(&["p1"]),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(reason, Some(LockReason::Engaged));
    }

    #[test]
    fn lock_state_rebuilds_from_node_metadata_after_cache_loss() {
        let node = boss_node(Some(1));
        let mut repo = repo_with(&node);
        let mut gate = BossRoomGate::new();
        gate.note_entry(
            &mut repo,
            &RunRules::default(),
            &floor_id(),
            &node,
            occupants(&["p1"]),
            Utc::now(),
        )
        .unwrap();

        // A fresh gate simulates a restarted process with a cold cache.
        let mut fresh = BossRoomGate::new();
        let rebuilt = fresh
            .lock_state(&repo, &floor_id(), &node.id)
            .unwrap()
            .expect("lock should rebuild from metadata");
        assert_eq!(rebuilt.reason, LockReason::Capacity);
        assert!(matches!(
            fresh.can_enter(&repo, &RunRules::default(), &floor_id(), &node, 0),
            Err(CoreError::Denied(Denial::NodeLocked(_, _)))
        ));
    }

    #[test]
    fn exit_blocking_applies_only_to_tracked_occupants() {
        let node = boss_node(Some(1));
        let mut repo = repo_with(&node);
        let mut gate = BossRoomGate::new();
        let rules = RunRules {
            locks_block_exit: true,
            ..RunRules::default()
        };
        gate.note_entry(
            &mut repo,
            &rules,
            &floor_id(),
            &node,
            occupants(&["p1"]),
            Utc::now(),
        )
        .unwrap();

        let trapped = gate.can_exit(&repo, &rules, &floor_id(), &node, &ParticipantId::new("p1"));
        assert!(matches!(
            trapped,
            Err(CoreError::Denied(Denial::NodeLocked(_, _)))
        ));
        let bystander =
            gate.can_exit(&repo, &rules, &floor_id(), &node, &ParticipantId::new("p9"));
        assert!(bystander.is_ok());
    }

    #[test]
    fn exit_is_free_when_rules_do_not_block_it() {
        let node = boss_node(Some(1));
        let mut repo = repo_with(&node);
        let mut gate = BossRoomGate::new();
        let rules = RunRules::default();
        gate.note_entry(
            &mut repo,
            &rules,
            &floor_id(),
            &node,
            occupants(&["p1"]),
            Utc::now(),
        )
        .unwrap();
        assert!(gate
            .can_exit(&repo, &rules, &floor_id(), &node, &ParticipantId::new("p1"))
            .is_ok());
    }

    #[test]
    fn release_clears_cache_and_metadata() {
        let node = boss_node(Some(1));
        let mut repo = repo_with(&node);
        let mut gate = BossRoomGate::new();
        gate.note_entry(
            &mut repo,
            &RunRules::default(),
            &floor_id(),
            &node,
            occupants(&["p1"]),
            Utc::now(),
        )
        .unwrap();

        assert!(gate.release(&mut repo, &floor_id(), &node.id).unwrap());
        assert_eq!(repo.node(&node.id).unwrap().lock, None);
        assert_eq!(gate.lock_state(&repo, &floor_id(), &node.id).unwrap(), None);
        assert!(!gate.release(&mut repo, &floor_id(), &node.id).unwrap());
    }

    #[test]
    fn reset_floor_clears_every_lock() {
        let floor = floor_id();
        let mut repo = InMemoryFloorRepository::new();
        let boss_a = Node::new(
            "boss_a",
            &floor,
            0,
            0,
            NodeKind::Boss {
                capacity: Some(1),
                monster: None,
            },
        );
        let boss_b = Node::new(
            "boss_b",
            &floor,
            1,
            0,
            NodeKind::Boss {
                capacity: Some(1),
                monster: None,
            },
        );
        repo.insert_node(boss_a.clone());
        repo.insert_node(boss_b.clone());

        let mut gate = BossRoomGate::new();
        let rules = RunRules::default();
        let now = Utc::now();
        gate.note_entry(&mut repo, &rules, &floor, &boss_a, occupants(&["p1"]), now)
            .unwrap();
        gate.note_entry(&mut repo, &rules, &floor, &boss_b, occupants(&["p2"]), now)
            .unwrap();

        // reset_floor only needs the floor's node listing to exist.
        repo.insert_floor(crate::types::Floor {
            id: floor.clone(),
            number: 1,
            max_occupants: None,
            regen_per_hour: 1.0,
            max_movement_points: 10.0,
            time_limit: None,
            monster_pool: Vec::new(),
        });
        let cleared = gate.reset_floor(&mut repo, &floor).unwrap();
        assert_eq!(cleared, 2);
        assert_eq!(repo.node(&boss_a.id).unwrap().lock, None);
        assert_eq!(repo.node(&boss_b.id).unwrap().lock, None);
    }
}
