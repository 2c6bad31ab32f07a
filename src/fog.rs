use std::collections::{BTreeMap, BTreeSet};

use crate::graph::FloorGraph;
use crate::types::{
    NodeId, NodeVisibility, ParticipantPosition, RunRules, VisibilityView, VisionModifiers,
};

/// Derives what `position`'s owner can currently see on the floor.
///
/// Explored nodes are always visible; the current node and its direct
/// neighbors are visible even when not yet explored. Modifiers extend the
/// visible ring by extra graph hops, reveal the whole floor, or reveal boss
/// nodes only. The single mutation this function performs: a never-explored
/// current node is added to the explored set.
pub fn visibility(
    graph: &FloorGraph,
    position: &mut ParticipantPosition,
    rules: &RunRules,
    modifiers: &VisionModifiers,
) -> VisibilityView {
    let current = position.current_node.clone();
    if let Some(node) = &current {
        if graph.contains(node) {
            position.mark_explored(node.clone());
        }
    }

    let mut adjacent: BTreeSet<NodeId> = BTreeSet::new();
    let mut revealed: BTreeSet<NodeId> = BTreeSet::new();
    if let Some(node) = &current {
        for edge in graph.neighbors(node) {
            if !position.explored.contains(&edge.to) {
                adjacent.insert(edge.to.clone());
            }
        }
        let range = rules.base_visibility_range.max(1) + modifiers.extra_range;
        revealed.extend(graph.reachable_within(node, range));
    }
    if modifiers.reveal_floor {
        revealed.extend(graph.iter_nodes().map(|node| node.id.clone()));
    }
    if modifiers.reveal_boss_nodes {
        revealed.extend(graph.boss_nodes().iter().cloned());
    }

    let mut per_node = BTreeMap::new();
    let mut visible = Vec::new();
    let mut explored = Vec::new();
    let mut adjacent_out = Vec::new();
    for node in graph.iter_nodes() {
        let state = if position.explored.contains(&node.id) {
            NodeVisibility::Explored
        } else if adjacent.contains(&node.id) {
            NodeVisibility::Adjacent
        } else if revealed.contains(&node.id) {
            NodeVisibility::Revealed
        } else {
            NodeVisibility::Hidden
        };
        match state {
            NodeVisibility::Explored => explored.push(node.id.clone()),
            NodeVisibility::Adjacent => adjacent_out.push(node.id.clone()),
            _ => {}
        }
        if state != NodeVisibility::Hidden {
            visible.push(node.id.clone());
        }
        per_node.insert(node.id.clone(), state);
    }

    VisibilityView {
        participant: position.participant.clone(),
        floor: position.floor.clone(),
        visible,
        explored,
        adjacent: adjacent_out,
        per_node,
    }
}
