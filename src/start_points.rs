use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::errors::Denial;
use crate::graph::FloorGraph;
use crate::rng::Rng;
use crate::types::{FloorId, NodeId, ParticipantPosition, RunRules, StartPolicy};

/// Assigns initial positions over a floor's designated start nodes. Owns the
/// per-run last-assignment cache; constructed with the engine and dropped
/// with it, never a process-wide static.
#[derive(Debug, Default)]
pub struct StartPointAllocator {
    last_assigned: HashMap<(FloorId, NodeId), DateTime<Utc>>,
}

impl StartPointAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(
        &mut self,
        graph: &FloorGraph,
        floor: &FloorId,
        positions: &[ParticipantPosition],
        rules: &RunRules,
        rng: &mut Rng,
        now: DateTime<Utc>,
    ) -> Result<NodeId, Denial> {
        let mut candidates: Vec<NodeId> = graph.start_nodes().to_vec();
        if candidates.is_empty() {
            candidates = graph.iter_nodes().map(|node| node.id.clone()).collect();
        }
        if candidates.is_empty() {
            return Err(Denial::NoNodesOnFloor(floor.clone()));
        }

        if rules.start_non_overlap {
            let free: Vec<NodeId> = candidates
                .iter()
                .filter(|node| occupants_of(positions, node) == 0)
                .cloned()
                .collect();
            if !free.is_empty() {
                candidates = free;
            }
        }

        let chosen = match rules.start_policy {
            StartPolicy::Random => candidates[rng.pick_index(candidates.len())].clone(),
            StartPolicy::EqualDistribution => {
                let mut ranked: Vec<(usize, &NodeId)> = candidates.iter().enumerate().collect();
                ranked.sort_by(|(a_idx, a), (b_idx, b)| {
                    let a_occupancy = occupants_of(positions, a);
                    let b_occupancy = occupants_of(positions, b);
                    a_occupancy
                        .cmp(&b_occupancy)
                        .then_with(|| {
                            let a_last = self.last_assigned.get(&(floor.clone(), (*a).clone()));
                            let b_last = self.last_assigned.get(&(floor.clone(), (*b).clone()));
                            a_last.cmp(&b_last)
                        })
                        .then_with(|| a_idx.cmp(b_idx))
                });
                ranked[0].1.clone()
            }
        };

        self.last_assigned
            .insert((floor.clone(), chosen.clone()), now);
        Ok(chosen)
    }
}

fn occupants_of(positions: &[ParticipantPosition], node: &NodeId) -> usize {
    positions
        .iter()
        .filter(|position| position.current_node.as_ref() == Some(node))
        .count()
}
