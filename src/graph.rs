use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::types::{Connection, Node, NodeId, NodeKind};

#[derive(Clone, Debug, PartialEq)]
pub struct GraphEdge {
    pub to: NodeId,
    pub cost: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphBounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

/// Read-only projection of one floor's nodes and connections. Neighbor lists
/// keep edge insertion order so path and reachability queries are
/// deterministic for a fixed connection ordering.
#[derive(Clone, Debug)]
pub struct FloorGraph {
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, Node>,
    adjacency: HashMap<NodeId, Vec<GraphEdge>>,
    start_nodes: Vec<NodeId>,
    boss_nodes: Vec<NodeId>,
    stair_nodes: Vec<NodeId>,
}

impl FloorGraph {
    pub fn build(nodes: Vec<Node>, connections: Vec<Connection>) -> Self {
        let mut order = Vec::with_capacity(nodes.len());
        let mut node_map = HashMap::with_capacity(nodes.len());
        let mut adjacency: HashMap<NodeId, Vec<GraphEdge>> = HashMap::new();
        let mut start_nodes = Vec::new();
        let mut boss_nodes = Vec::new();
        let mut stair_nodes = Vec::new();

        for node in nodes {
            if node_map.contains_key(&node.id) {
                continue;
            }
            match node.kind {
                NodeKind::Start => start_nodes.push(node.id.clone()),
                NodeKind::Boss { .. } => boss_nodes.push(node.id.clone()),
                NodeKind::Stairs => stair_nodes.push(node.id.clone()),
                _ => {}
            }
            order.push(node.id.clone());
            adjacency.insert(node.id.clone(), Vec::new());
            node_map.insert(node.id.clone(), node);
        }

        for connection in connections {
            if !node_map.contains_key(&connection.from) || !node_map.contains_key(&connection.to) {
                continue;
            }
            if let Some(edges) = adjacency.get_mut(&connection.from) {
                edges.push(GraphEdge {
                    to: connection.to.clone(),
                    cost: connection.cost,
                });
            }
            if connection.bidirectional {
                if let Some(edges) = adjacency.get_mut(&connection.to) {
                    edges.push(GraphEdge {
                        to: connection.from.clone(),
                        cost: connection.cost,
                    });
                }
            }
        }

        Self {
            order,
            nodes: node_map,
            adjacency,
            start_nodes,
            boss_nodes,
            stair_nodes,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Nodes in their floor-authoring insertion order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn neighbors(&self, id: &NodeId) -> &[GraphEdge] {
        self.adjacency
            .get(id)
            .map(|edges| edges.as_slice())
            .unwrap_or(&[])
    }

    pub fn edge_between(&self, from: &NodeId, to: &NodeId) -> Option<&GraphEdge> {
        self.neighbors(from).iter().find(|edge| &edge.to == to)
    }

    pub fn start_nodes(&self) -> &[NodeId] {
        &self.start_nodes
    }

    pub fn boss_nodes(&self) -> &[NodeId] {
        &self.boss_nodes
    }

    pub fn stair_nodes(&self) -> &[NodeId] {
        &self.stair_nodes
    }

    pub fn nodes_where(&self, predicate: impl Fn(&Node) -> bool) -> Vec<&Node> {
        self.iter_nodes().filter(|node| predicate(node)).collect()
    }

    /// Breadth-first shortest path by hop count, including both endpoints.
    /// Ties break by edge insertion order.
    pub fn shortest_path(&self, from: &NodeId, to: &NodeId) -> Option<Vec<NodeId>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.clone()]);
        }

        let mut predecessor: HashMap<NodeId, NodeId> = HashMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(from.clone());
        predecessor.insert(from.clone(), from.clone());

        while let Some(current) = queue.pop_front() {
            for edge in self.neighbors(&current) {
                if predecessor.contains_key(&edge.to) {
                    continue;
                }
                predecessor.insert(edge.to.clone(), current.clone());
                if &edge.to == to {
                    let mut path = vec![edge.to.clone()];
                    let mut cursor = current;
                    while &cursor != from {
                        path.push(cursor.clone());
                        cursor = predecessor[&cursor].clone();
                    }
                    path.push(from.clone());
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(edge.to.clone());
            }
        }
        None
    }

    /// All nodes reachable within `max_hops` edges of `start`, start included.
    pub fn reachable_within(&self, start: &NodeId, max_hops: u32) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        if !self.contains(start) {
            return out;
        }
        let mut depth: BTreeMap<NodeId, u32> = BTreeMap::new();
        let mut queue = VecDeque::new();
        out.insert(start.clone());
        depth.insert(start.clone(), 0);
        queue.push_back(start.clone());

        while let Some(current) = queue.pop_front() {
            let current_depth = depth[&current];
            if current_depth >= max_hops {
                continue;
            }
            for edge in self.neighbors(&current) {
                if out.insert(edge.to.clone()) {
                    depth.insert(edge.to.clone(), current_depth + 1);
                    queue.push_back(edge.to.clone());
                }
            }
        }
        out
    }

    pub fn bounds(&self) -> Option<GraphBounds> {
        let mut iter = self.iter_nodes();
        let first = iter.next()?;
        let mut bounds = GraphBounds {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for node in iter {
            bounds.min_x = bounds.min_x.min(node.x);
            bounds.min_y = bounds.min_y.min(node.y);
            bounds.max_x = bounds.max_x.max(node.x);
            bounds.max_y = bounds.max_y.max(node.y);
        }
        Some(bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Connection, FloorId};

    fn floor_id() -> FloorId {
        FloorId::new("f1")
    }

    fn node(id: &str, x: i32, y: i32, kind: NodeKind) -> Node {
        Node::new(id, &floor_id(), x, y, kind)
    }

    fn line_graph() -> FloorGraph {
        // a - b - c - d, plus a one-way shortcut d -> a
        let floor = floor_id();
        let nodes = vec![
            node("a", 0, 0, NodeKind::Start),
            node("b", 1, 0, NodeKind::Plain),
            node("c", 2, 0, NodeKind::MonsterSpawn),
            node(
                "d",
                3,
                2,
                NodeKind::Boss {
                    capacity: Some(1),
                    monster: None,
                },
            ),
        ];
        let connections = vec![
            Connection::bidirectional("ab", &floor, &NodeId::new("a"), &NodeId::new("b"), 1.0),
            Connection::bidirectional("bc", &floor, &NodeId::new("b"), &NodeId::new("c"), 1.0),
            Connection::bidirectional("cd", &floor, &NodeId::new("c"), &NodeId::new("d"), 2.0),
            Connection::one_way("da", &floor, &NodeId::new("d"), &NodeId::new("a"), 1.0),
        ];
        FloorGraph::build(nodes, connections)
    }

    #[test]
    fn bidirectional_connections_add_both_edges() {
        let graph = line_graph();
        assert!(graph
            .edge_between(&NodeId::new("a"), &NodeId::new("b"))
            .is_some());
        assert!(graph
            .edge_between(&NodeId::new("b"), &NodeId::new("a"))
            .is_some());
    }

    #[test]
    fn one_way_connections_add_a_single_edge() {
        let graph = line_graph();
        assert!(graph
            .edge_between(&NodeId::new("d"), &NodeId::new("a"))
            .is_some());
        assert!(graph
            .edge_between(&NodeId::new("a"), &NodeId::new("d"))
            .is_none());
    }

    #[test]
    fn shortest_path_follows_hop_count() {
        let graph = line_graph();
        let path = graph
            .shortest_path(&NodeId::new("a"), &NodeId::new("d"))
            .expect("path should exist");
        let ids: Vec<&str> = path.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn shortest_path_uses_one_way_shortcuts() {
        let graph = line_graph();
        let path = graph
            .shortest_path(&NodeId::new("d"), &NodeId::new("a"))
            .expect("path should exist");
        let ids: Vec<&str> = path.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a"]);
    }

    #[test]
    fn shortest_path_to_self_is_trivial() {
        let graph = line_graph();
        let path = graph
            .shortest_path(&NodeId::new("b"), &NodeId::new("b"))
            .expect("path should exist");
        assert_eq!(path, vec![NodeId::new("b")]);
    }

    #[test]
    fn shortest_path_missing_node_is_none() {
        let graph = line_graph();
        assert!(graph
            .shortest_path(&NodeId::new("a"), &NodeId::new("zz"))
            .is_none());
    }

    #[test]
    fn reachable_within_respects_hop_budget() {
        let graph = line_graph();
        let within_one = graph.reachable_within(&NodeId::new("a"), 1);
        assert!(within_one.contains(&NodeId::new("a")));
        assert!(within_one.contains(&NodeId::new("b")));
        assert!(!within_one.contains(&NodeId::new("c")));

        let within_two = graph.reachable_within(&NodeId::new("a"), 2);
        assert!(within_two.contains(&NodeId::new("c")));
        assert!(!within_two.contains(&NodeId::new("d")));
    }

    #[test]
    fn classification_indices_follow_insertion_order() {
        let graph = line_graph();
        assert_eq!(graph.start_nodes(), &[NodeId::new("a")]);
        assert_eq!(graph.boss_nodes(), &[NodeId::new("d")]);
        assert!(graph.stair_nodes().is_empty());
        let spawns = graph.nodes_where(|node| node.kind == NodeKind::MonsterSpawn);
        assert_eq!(spawns.len(), 1);
        assert_eq!(spawns[0].id, NodeId::new("c"));
    }

    #[test]
    fn bounds_cover_all_coordinates() {
        let graph = line_graph();
        let bounds = graph.bounds().expect("graph has nodes");
        assert_eq!(
            bounds,
            GraphBounds {
                min_x: 0,
                min_y: 0,
                max_x: 3,
                max_y: 2,
            }
        );
        let empty = FloorGraph::build(Vec::new(), Vec::new());
        assert!(empty.bounds().is_none());
        assert!(empty.is_empty());
    }

    #[test]
    fn connections_to_unknown_nodes_are_ignored() {
        let floor = floor_id();
        let graph = FloorGraph::build(
            vec![node("a", 0, 0, NodeKind::Plain)],
            vec![Connection::bidirectional(
                "ax",
                &floor,
                &NodeId::new("a"),
                &NodeId::new("ghost"),
                1.0,
            )],
        );
        assert!(graph.neighbors(&NodeId::new("a")).is_empty());
    }
}
