use crate::chain::{anchor_consequence, anchor_threat};
use crate::graph::{BarrierKind, Edge, GraphIndex, Node, NodeKind};
use std::collections::HashSet;

/// Finds the barrier owning a degradation node. A control carries the
/// barrier edge directly; a factor has no barrier edge of its own and must
/// resolve through its control first. First match in document order wins.
pub fn owning_barrier<'a>(index: &GraphIndex<'a>, node: &Node) -> Option<&'a str> {
    match node.kind {
        NodeKind::DegradationControl => attached_of_kind(index, &node.id, NodeKind::Barrier),
        NodeKind::DegradationFactor => {
            let control = attached_of_kind(index, &node.id, NodeKind::DegradationControl)?;
            attached_of_kind(index, control, NodeKind::Barrier)
        }
        _ => None,
    }
}

fn attached_of_kind<'a>(index: &GraphIndex<'a>, node_id: &str, kind: NodeKind) -> Option<&'a str> {
    for edge in index.incident(node_id) {
        let other = edge.other_endpoint(node_id)?;
        if index.kind(other) == Some(kind) {
            return Some(index.node(other)?.id.as_str());
        }
    }
    None
}

fn barrier_visible(index: &GraphIndex<'_>, barrier: &Node) -> bool {
    match barrier.data.barrier_kind {
        Some(BarrierKind::Prevention) => anchor_threat(index, &barrier.id)
            .and_then(|threat| index.node(&threat))
            .is_some_and(|threat| threat.data.expanded),
        Some(BarrierKind::Mitigation) => anchor_consequence(index, &barrier.id)
            .and_then(|consequence| index.node(&consequence))
            .is_some_and(|consequence| consequence.data.expanded),
        None => false,
    }
}

/// Expansion state on the anchoring threat/consequence is the single source
/// of truth for everything hanging off it. Nodes whose anchor cannot be
/// resolved fail closed.
pub fn is_visible(index: &GraphIndex<'_>, node: &Node) -> bool {
    match node.kind {
        NodeKind::Hazard
        | NodeKind::TopEvent
        | NodeKind::Threat
        | NodeKind::Consequence
        | NodeKind::BarrierGroup => true,
        NodeKind::Barrier => barrier_visible(index, node),
        NodeKind::DegradationFactor | NodeKind::DegradationControl => owning_barrier(index, node)
            .and_then(|barrier| index.node(barrier))
            .is_some_and(|barrier| barrier_visible(index, barrier)),
    }
}

pub fn visible_nodes<'a>(index: &GraphIndex<'a>) -> Vec<&'a Node> {
    index
        .all_nodes()
        .iter()
        .filter(|node| is_visible(index, node))
        .collect()
}

/// An edge renders only when both endpoints do.
pub fn visible_edges<'a>(index: &GraphIndex<'a>) -> Vec<&'a Edge> {
    let visible: HashSet<&str> = visible_nodes(index)
        .iter()
        .map(|node| node.id.as_str())
        .collect();
    index
        .edges()
        .iter()
        .filter(|edge| visible.contains(edge.source.as_str()) && visible.contains(edge.target.as_str()))
        .collect()
}
