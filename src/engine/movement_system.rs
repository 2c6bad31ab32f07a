use chrono::{DateTime, Utc};

use crate::constants::round_points;
use crate::errors::{CoreError, Denial, StoreError};
use crate::types::{FloorId, MoveOutcome, MovementRecord, NodeId, ParticipantId, RuntimeEvent};

use super::LabyrinthEngine;

impl LabyrinthEngine {
    /// Validate-then-commit move. Rejections leave no residual state except
    /// the regenerated movement points, which are persisted up front.
    pub fn move_participant(
        &mut self,
        participant: &ParticipantId,
        floor: &FloorId,
        target: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<MoveOutcome, CoreError> {
        let mut position = self
            .positions
            .load(participant, floor)?
            .ok_or_else(|| Denial::PositionNotFound(participant.clone(), floor.clone()))?;
        let floor_def = self.repo.floor(floor)?;

        let hours = hours_between(position.last_moved_at, now);
        if hours > 0.0 {
            position.movement_points = round_points(
                (position.movement_points + hours * floor_def.regen_per_hour)
                    .min(floor_def.max_movement_points),
            );
            position.last_moved_at = now;
            self.positions.save(position.clone())?;
        }

        let rules = self.rules()?;
        self.ensure_graph(floor)?;
        let (target_node, current_node, target_neighbors) = {
            let Some(graph) = self.graphs.get(floor) else {
                return Err(
                    StoreError::Corrupt(format!("graph cache missing floor {floor}")).into(),
                );
            };
            let Some(target_node) = graph.node(target).cloned() else {
                return Err(Denial::InvalidTarget(target.clone(), floor.clone()).into());
            };
            let current_node = position
                .current_node
                .as_ref()
                .and_then(|id| graph.node(id))
                .cloned();
            let target_neighbors: Vec<NodeId> = graph
                .neighbors(target)
                .iter()
                .map(|edge| edge.to.clone())
                .collect();
            (target_node, current_node, target_neighbors)
        };

        if target_node.kind.is_boss() {
            let occupancy = self.occupants_of(floor, target)?.len();
            self.gate
                .can_enter(&*self.repo, &rules, floor, &target_node, occupancy)?;
        }
        if let Some(current) = &current_node {
            if current.kind.is_boss() {
                self.gate
                    .can_exit(&*self.repo, &rules, floor, current, participant)?;
            }
        }

        let cost = {
            let Some(graph) = self.graphs.get(floor) else {
                return Err(
                    StoreError::Corrupt(format!("graph cache missing floor {floor}")).into(),
                );
            };
            match position.current_node.as_ref() {
                // First move ever: only a designated start node is legal
                // (any node when the floor defines none), at zero cost.
                None => {
                    let starts = graph.start_nodes();
                    if !starts.is_empty() && !starts.iter().any(|id| id == target) {
                        return Err(Denial::NoStartPointAvailable(
                            floor.clone(),
                            format!("first move must enter a designated start node, not {target}"),
                        )
                        .into());
                    }
                    0.0
                }
                Some(current) => match graph.edge_between(current, target) {
                    Some(edge) => edge.cost,
                    None => {
                        return Err(Denial::NoPath(current.clone(), target.clone()).into());
                    }
                },
            }
        };

        if position.movement_points + 1e-9 < cost {
            return Err(Denial::InsufficientMovementPoints {
                have: position.movement_points,
                need: cost,
            }
            .into());
        }

        let from = position.current_node.clone();
        position.movement_points = round_points(position.movement_points - cost);
        position.current_node = Some(target.clone());
        position.mark_explored(target.clone());
        position.record_move(MovementRecord {
            from: from.clone(),
            to: target.clone(),
            cost,
            at: now,
        });
        let revealed: Vec<NodeId> = target_neighbors
            .into_iter()
            .filter(|id| !position.explored.contains(id))
            .collect();
        self.positions.save(position.clone())?;

        for node in &revealed {
            self.events.push(RuntimeEvent::NodeRevealed {
                participant: participant.clone(),
                floor: floor.clone(),
                node: node.clone(),
            });
        }

        if target_node.kind.is_boss() {
            let occupants = self.occupants_of(floor, target)?;
            if let Some(reason) =
                self.gate
                    .note_entry(&mut *self.repo, &rules, floor, &target_node, occupants, now)?
            {
                self.events.push(RuntimeEvent::BossRoomLocked {
                    floor: floor.clone(),
                    node: target.clone(),
                    reason,
                });
            }
        }

        // Encounter preparation is best-effort; it never fails the move.
        if target_node.kind.is_combat_eligible() {
            if let Err(err) = self.prepare_encounter(participant, floor, target, now) {
                log::warn!("encounter preparation after move failed: {err}");
            }
        }

        Ok(MoveOutcome {
            participant: participant.clone(),
            floor: floor.clone(),
            from,
            node: target.clone(),
            cost,
            remaining_points: position.movement_points,
            revealed,
        })
    }
}

fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds().max(0) as f64 / 3_600_000.0
}
