use std::collections::HashSet;

use crate::chain::{Direction, first_attached_barrier, follow_chain};
use crate::graph::{BarrierKind, Edge, GraphIndex, Node, NodeKind};
use crate::visibility::owning_barrier;

/// Insertion-ordered id set; hover paths and scenario paths come out in the
/// order the walk discovered them.
#[derive(Debug, Default)]
struct PathSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl PathSet {
    fn insert(&mut self, id: &str) {
        if self.seen.insert(id.to_string()) {
            self.order.push(id.to_string());
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    fn into_vec(self) -> Vec<String> {
        self.order
    }
}

fn is_prevention(node: &Node) -> bool {
    node.kind == NodeKind::Barrier && node.data.barrier_kind == Some(BarrierKind::Prevention)
}

fn is_mitigation(node: &Node) -> bool {
    node.kind == NodeKind::Barrier && node.data.barrier_kind == Some(BarrierKind::Mitigation)
}

/// Pulls a barrier's degradation branch into the path: every attached
/// control, and every factor hanging off those controls. A no-op until the
/// barrier itself has been added.
fn add_degradation_nodes(index: &GraphIndex<'_>, path: &mut PathSet, barrier_id: &str) {
    if !path.contains(barrier_id) {
        return;
    }
    for edge in index.incident(barrier_id) {
        let Some(control) = edge.other_endpoint(barrier_id) else {
            continue;
        };
        if index.kind(control) != Some(NodeKind::DegradationControl) {
            continue;
        }
        path.insert(control);
        for factor_edge in index.incident(control) {
            let Some(factor) = factor_edge.other_endpoint(control) else {
                continue;
            };
            if index.kind(factor) == Some(NodeKind::DegradationFactor) {
                path.insert(factor);
            }
        }
    }
}

/// Absorbs a chain walk into the path, attaching degradation branches as
/// each barrier joins.
fn absorb_walk(index: &GraphIndex<'_>, path: &mut PathSet, walk: &[String]) {
    for id in walk {
        path.insert(id);
        if index.kind(id) == Some(NodeKind::Barrier) {
            add_degradation_nodes(index, path, id);
        }
    }
}

/// The id the walk stopped on, but only when it is the wanted terminal.
fn terminal_of<'w>(
    index: &GraphIndex<'_>,
    walk: &'w [String],
    kind: NodeKind,
) -> Option<&'w String> {
    walk.last().filter(|id| index.kind(id) == Some(kind))
}

/// Fans out from the top event into every chain of the given side: each
/// attached barrier of that side joins the path together with its full walk
/// to the far anchor and the degradation branches along the way.
fn span_opposite_side(
    index: &GraphIndex<'_>,
    path: &mut PathSet,
    top_event_id: &str,
    side: BarrierKind,
) {
    let (matches, direction, terminal): (fn(&Node) -> bool, Direction, NodeKind) = match side {
        BarrierKind::Mitigation => (is_mitigation, Direction::Forward, NodeKind::Consequence),
        BarrierKind::Prevention => (is_prevention, Direction::Backward, NodeKind::Threat),
    };
    for edge in index.incident(top_event_id) {
        let Some(other) = edge.other_endpoint(top_event_id) else {
            continue;
        };
        let Some(node) = index.node(other) else {
            continue;
        };
        if !matches(node) {
            continue;
        }
        let walk = follow_chain(index, other, direction, matches, |candidate| {
            candidate.kind == terminal
        });
        absorb_walk(index, path, &walk);
    }
}

/// The set of nodes that highlight together when one node is hovered or
/// selected. Threats and consequences light their own chain up to the top
/// event; a barrier lights the complete bowtie span it participates in; the
/// top event deliberately stays alone; a hazard pulls in its threats.
pub fn node_path(index: &GraphIndex<'_>, node_id: &str) -> Vec<String> {
    let mut path = PathSet::default();
    path.insert(node_id);
    let Some(node) = index.node(node_id) else {
        return path.into_vec();
    };

    match node.kind {
        NodeKind::Threat => {
            if let Some(first) = first_attached_barrier(index, node_id, BarrierKind::Prevention) {
                let walk = follow_chain(index, first, Direction::Forward, is_prevention, |n| {
                    n.kind == NodeKind::TopEvent
                });
                absorb_walk(index, &mut path, &walk);
            }
        }
        NodeKind::Consequence => {
            if let Some(first) = first_attached_barrier(index, node_id, BarrierKind::Mitigation) {
                let walk = follow_chain(index, first, Direction::Backward, is_mitigation, |n| {
                    n.kind == NodeKind::TopEvent
                });
                absorb_walk(index, &mut path, &walk);
            }
        }
        NodeKind::Barrier => match node.data.barrier_kind {
            Some(BarrierKind::Prevention) => {
                add_degradation_nodes(index, &mut path, node_id);
                // Own side first: upstream to the anchoring threat, then
                // downstream to the top event.
                let upstream =
                    follow_chain(index, node_id, Direction::Backward, is_prevention, |n| {
                        n.kind == NodeKind::Threat
                    });
                absorb_walk(index, &mut path, &upstream);
                let walk = follow_chain(index, node_id, Direction::Forward, is_prevention, |n| {
                    n.kind == NodeKind::TopEvent
                });
                absorb_walk(index, &mut path, &walk);
                if let Some(top_event) = terminal_of(index, &walk, NodeKind::TopEvent) {
                    span_opposite_side(index, &mut path, top_event, BarrierKind::Mitigation);
                }
            }
            Some(BarrierKind::Mitigation) => {
                add_degradation_nodes(index, &mut path, node_id);
                let downstream =
                    follow_chain(index, node_id, Direction::Forward, is_mitigation, |n| {
                        n.kind == NodeKind::Consequence
                    });
                absorb_walk(index, &mut path, &downstream);
                let walk = follow_chain(index, node_id, Direction::Backward, is_mitigation, |n| {
                    n.kind == NodeKind::TopEvent
                });
                absorb_walk(index, &mut path, &walk);
                if let Some(top_event) = terminal_of(index, &walk, NodeKind::TopEvent) {
                    span_opposite_side(index, &mut path, top_event, BarrierKind::Prevention);
                }
            }
            None => {}
        },
        NodeKind::TopEvent => {
            // Deliberately itself only; expanding to every chain would
            // highlight the entire diagram.
        }
        NodeKind::Hazard => {
            for edge in index.incident(node_id) {
                if let Some(other) = edge.other_endpoint(node_id) {
                    if index.kind(other) == Some(NodeKind::Threat) {
                        path.insert(other);
                    }
                }
            }
        }
        _ => {}
    }

    path.into_vec()
}

/// What a failure of this barrier reaches. A prevention barrier's failure
/// runs forward through its own chain to the top event and then out through
/// every mitigation chain to every consequence; a mitigation barrier's
/// failure reaches only its own consequence. Degradation branches are not
/// part of the scenario.
pub fn downstream_path(index: &GraphIndex<'_>, barrier_id: &str) -> Vec<String> {
    let Some(node) = index.node(barrier_id) else {
        return Vec::new();
    };
    if node.kind != NodeKind::Barrier {
        return Vec::new();
    }

    let mut path = PathSet::default();
    path.insert(barrier_id);

    match node.data.barrier_kind {
        Some(BarrierKind::Prevention) => {
            let walk = follow_chain(index, barrier_id, Direction::Forward, is_prevention, |n| {
                n.kind == NodeKind::TopEvent
            });
            for id in &walk {
                path.insert(id);
            }
            if let Some(top_event) = terminal_of(index, &walk, NodeKind::TopEvent) {
                for edge in index.incident(top_event) {
                    let Some(other) = edge.other_endpoint(top_event) else {
                        continue;
                    };
                    let Some(candidate) = index.node(other) else {
                        continue;
                    };
                    if !is_mitigation(candidate) {
                        continue;
                    }
                    let chain =
                        follow_chain(index, other, Direction::Forward, is_mitigation, |n| {
                            n.kind == NodeKind::Consequence
                        });
                    for id in &chain {
                        path.insert(id);
                    }
                }
            }
        }
        Some(BarrierKind::Mitigation) => {
            let walk = follow_chain(index, barrier_id, Direction::Forward, is_mitigation, |n| {
                n.kind == NodeKind::Consequence
            });
            for id in &walk {
                path.insert(id);
            }
        }
        None => {}
    }

    path.into_vec()
}

/// Ambient UI flags, passed in explicitly so composition stays pure.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighlightState<'a> {
    pub hovered: Option<&'a str>,
    pub selected: Option<&'a str>,
    pub focus_mode: bool,
    pub animating: bool,
    pub animated: Option<&'a str>,
}

impl HighlightState<'_> {
    fn idle(&self) -> bool {
        self.hovered.is_none() && self.selected.is_none()
    }
}

/// Composes the rendered highlight set: hover path (suppressed during a
/// walkthrough animation), select path (under focus or animation), the
/// downstream scenario of every failed barrier when nothing is hovered or
/// selected, and the animated node. Degradation nodes survive only when
/// their owning barrier is in the set, and never as a side effect of focus
/// mode alone.
pub fn highlighted_nodes(index: &GraphIndex<'_>, state: HighlightState<'_>) -> HashSet<String> {
    let mut ids: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let extend = |more: Vec<String>, seen: &mut HashSet<String>, ids: &mut Vec<String>| {
        for id in more {
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
    };

    if let Some(hovered) = state.hovered {
        if !state.animating {
            extend(node_path(index, hovered), &mut seen, &mut ids);
        }
    }
    if let Some(selected) = state.selected {
        if state.focus_mode || state.animating {
            extend(node_path(index, selected), &mut seen, &mut ids);
        }
    }
    if state.idle() {
        for barrier in index.nodes_of_kind(NodeKind::Barrier) {
            if barrier.is_failed_barrier() {
                extend(downstream_path(index, &barrier.id), &mut seen, &mut ids);
            }
        }
    }
    if let Some(animated) = state.animated {
        if seen.insert(animated.to_string()) {
            ids.push(animated.to_string());
        }
    }

    let highlighted_barriers: HashSet<String> = ids
        .iter()
        .filter(|id| index.kind(id) == Some(NodeKind::Barrier))
        .cloned()
        .collect();
    let any_failed = index
        .nodes_of_kind(NodeKind::Barrier)
        .any(|barrier| barrier.is_failed_barrier());
    let focus_only =
        state.focus_mode && state.idle() && state.animated.is_none();

    let mut filtered = HashSet::new();
    for id in ids {
        let Some(node) = index.node(&id) else {
            filtered.insert(id);
            continue;
        };
        if !node.kind.is_degradation() {
            filtered.insert(id);
            continue;
        }
        let owner = owning_barrier(index, node);
        if owner.is_some_and(|barrier| highlighted_barriers.contains(barrier)) {
            if focus_only && !any_failed {
                continue;
            }
            filtered.insert(id);
        }
    }

    filtered
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeEmphasis {
    pub highlighted: bool,
    pub dimmed: bool,
}

/// An edge lights up only when both of its endpoints do (or the walkthrough
/// animation is sitting on one of them); under focus or animation everything
/// else dims.
pub fn edge_emphasis(
    edge: &Edge,
    highlighted: &HashSet<String>,
    state: HighlightState<'_>,
) -> EdgeEmphasis {
    let both_ends = highlighted.contains(&edge.source) && highlighted.contains(&edge.target);
    let animated = state.animated == Some(edge.source.as_str())
        || state.animated == Some(edge.target.as_str());
    let on = both_ends || animated;
    EdgeEmphasis {
        highlighted: on,
        dimmed: (state.focus_mode || state.animating) && !on,
    }
}
