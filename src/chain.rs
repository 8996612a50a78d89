use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::{BarrierKind, GraphIndex, Node, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Walks a simple chain one hop at a time. At each node the incident edges
/// are scanned in document order and the first edge whose far endpoint is
/// either the terminal or a qualifying intermediate wins; anything else
/// (degradation nodes included) never qualifies, so the walk cannot leak
/// into a side branch. A visited set terminates cycles silently.
///
/// Returns the ids from `start` up to and including the terminal, or as far
/// as the chain reaches before dead-ending.
pub fn follow_chain<I, T>(
    index: &GraphIndex<'_>,
    start: &str,
    direction: Direction,
    is_intermediate: I,
    is_terminal: T,
) -> Vec<String>
where
    I: Fn(&Node) -> bool,
    T: Fn(&Node) -> bool,
{
    let mut path = vec![start.to_string()];
    let mut visited: HashSet<&str> = HashSet::new();
    let Some(mut current) = index.node(start).map(|node| node.id.as_str()) else {
        return path;
    };
    visited.insert(current);

    loop {
        let mut advanced = false;
        for edge in index.incident(current) {
            let candidate = match direction {
                Direction::Forward => {
                    if edge.source != current {
                        continue;
                    }
                    edge.target.as_str()
                }
                Direction::Backward => {
                    if edge.target != current {
                        continue;
                    }
                    edge.source.as_str()
                }
            };
            if visited.contains(candidate) {
                continue;
            }
            let Some(node) = index.node(candidate) else {
                continue;
            };
            if is_terminal(node) {
                path.push(candidate.to_string());
                return path;
            }
            if is_intermediate(node) {
                path.push(candidate.to_string());
                visited.insert(candidate);
                current = candidate;
                advanced = true;
                break;
            }
        }
        if !advanced {
            return path;
        }
    }
}

fn is_barrier_of(node: &Node, kind: BarrierKind) -> bool {
    node.kind == NodeKind::Barrier && node.data.barrier_kind == Some(kind)
}

/// First barrier of the given side attached to an anchor, scanning the
/// anchor's incident edges in document order and checking both directions.
pub fn first_attached_barrier<'a>(
    index: &GraphIndex<'a>,
    anchor_id: &str,
    kind: BarrierKind,
) -> Option<&'a str> {
    for edge in index.incident(anchor_id) {
        let other = edge.other_endpoint(anchor_id)?;
        if let Some(node) = index.node(other) {
            if is_barrier_of(node, kind) {
                return Some(node.id.as_str());
            }
        }
    }
    None
}

/// Threat's prevention walk in threat → top-event order. Includes the top
/// event when the chain reaches it; the threat itself is not part of the
/// returned sequence.
pub fn prevention_walk(index: &GraphIndex<'_>, threat_id: &str) -> Vec<String> {
    let Some(first) = first_attached_barrier(index, threat_id, BarrierKind::Prevention) else {
        return Vec::new();
    };
    follow_chain(
        index,
        first,
        Direction::Forward,
        |node| is_barrier_of(node, BarrierKind::Prevention),
        |node| node.kind == NodeKind::TopEvent,
    )
}

/// Consequence's mitigation walk in consequence → top-event order (the
/// backward read of the chain). Includes the top event when reached.
pub fn mitigation_walk(index: &GraphIndex<'_>, consequence_id: &str) -> Vec<String> {
    let Some(first) = first_attached_barrier(index, consequence_id, BarrierKind::Mitigation) else {
        return Vec::new();
    };
    follow_chain(
        index,
        first,
        Direction::Backward,
        |node| is_barrier_of(node, BarrierKind::Mitigation),
        |node| node.kind == NodeKind::TopEvent,
    )
}

/// Barrier-only chain for a threat, ordered threat → top event.
pub fn prevention_chain(index: &GraphIndex<'_>, threat_id: &str) -> Vec<String> {
    let mut walk = prevention_walk(index, threat_id);
    walk.retain(|id| index.kind(id) == Some(NodeKind::Barrier));
    walk
}

/// Barrier-only chain for a consequence, ordered top event → consequence.
pub fn mitigation_chain(index: &GraphIndex<'_>, consequence_id: &str) -> Vec<String> {
    let mut walk = mitigation_walk(index, consequence_id);
    walk.retain(|id| index.kind(id) == Some(NodeKind::Barrier));
    walk.reverse();
    walk
}

/// Resolves the threat anchoring a prevention barrier's chain: walk backward
/// along edges that terminate at the current barrier, restricted to threat
/// or prevention-barrier sources. Direct threats are tried before recursing
/// into upstream barriers, with one visited set shared across the whole
/// search. `None` when the chain dead-ends or loops.
pub fn anchor_threat(index: &GraphIndex<'_>, barrier_id: &str) -> Option<String> {
    fn search<'a>(
        index: &GraphIndex<'a>,
        barrier_id: &'a str,
        visited: &mut HashSet<&'a str>,
    ) -> Option<String> {
        if !visited.insert(barrier_id) {
            return None;
        }
        for edge in index.incident(barrier_id) {
            if edge.target != barrier_id {
                continue;
            }
            if index.kind(&edge.source) == Some(NodeKind::Threat) {
                return Some(edge.source.clone());
            }
        }
        for edge in index.incident(barrier_id) {
            if edge.target != barrier_id {
                continue;
            }
            let Some(source) = index.node(&edge.source) else {
                continue;
            };
            if is_barrier_of(source, BarrierKind::Prevention) {
                if let Some(found) = search(index, source.id.as_str(), visited) {
                    return Some(found);
                }
            }
        }
        None
    }

    let barrier = index.node(barrier_id)?;
    let mut visited = HashSet::new();
    search(index, barrier.id.as_str(), &mut visited)
}

/// Resolves the consequence anchoring a mitigation barrier's chain: walk
/// forward along edges that originate at the current barrier, restricted to
/// consequence or mitigation-barrier targets, in one interleaved pass.
pub fn anchor_consequence(index: &GraphIndex<'_>, barrier_id: &str) -> Option<String> {
    fn search<'a>(
        index: &GraphIndex<'a>,
        barrier_id: &'a str,
        visited: &mut HashSet<&'a str>,
    ) -> Option<String> {
        if !visited.insert(barrier_id) {
            return None;
        }
        for edge in index.incident(barrier_id) {
            if edge.source != barrier_id {
                continue;
            }
            let Some(target) = index.node(&edge.target) else {
                continue;
            };
            if target.kind == NodeKind::Consequence {
                return Some(target.id.clone());
            }
            if is_barrier_of(target, BarrierKind::Mitigation) {
                if let Some(found) = search(index, target.id.as_str(), visited) {
                    return Some(found);
                }
            }
        }
        None
    }

    let barrier = index.node(barrier_id)?;
    let mut visited = HashSet::new();
    search(index, barrier.id.as_str(), &mut visited)
}

/// Breadth-first shortest path over the undirected adjacency, for walking a
/// highlight animation hop by hop. `None` when the endpoints are not
/// connected.
pub fn ordered_path(
    index: &GraphIndex<'_>,
    start_id: &str,
    end_id: &str,
) -> Option<Vec<String>> {
    if index.node(start_id).is_none() || index.node(end_id).is_none() {
        return None;
    }
    if start_id == end_id {
        return Some(vec![start_id.to_string()]);
    }

    let mut predecessor: HashMap<&str, &str> = HashMap::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    let start = index.node(start_id)?.id.as_str();
    visited.insert(start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        for edge in index.incident(current) {
            let Some(next) = edge.other_endpoint(current) else {
                continue;
            };
            if !visited.insert(next) {
                continue;
            }
            predecessor.insert(next, current);
            if next == end_id {
                let mut path = vec![next.to_string()];
                let mut cursor = next;
                while let Some(&prev) = predecessor.get(cursor) {
                    path.push(prev.to_string());
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(next);
        }
    }

    None
}

/// Every simple path reachable from `start` following nominal edge
/// direction, depth-bounded. Includes the trivial path of just `start`.
pub fn all_paths_from(index: &GraphIndex<'_>, start_id: &str, max_depth: usize) -> Vec<Vec<String>> {
    fn descend(
        index: &GraphIndex<'_>,
        current: &str,
        path: &mut Vec<String>,
        depth: usize,
        max_depth: usize,
        out: &mut Vec<Vec<String>>,
    ) {
        if depth > max_depth {
            return;
        }
        out.push(path.clone());
        for edge in index.incident(current) {
            if edge.source != current {
                continue;
            }
            if path.iter().any(|id| id == &edge.target) {
                continue;
            }
            path.push(edge.target.clone());
            descend(index, &edge.target, path, depth + 1, max_depth, out);
            path.pop();
        }
    }

    if index.node(start_id).is_none() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut path = vec![start_id.to_string()];
    descend(index, start_id, &mut path, 0, max_depth, &mut out);
    out
}

pub const MAX_PATH_DEPTH: usize = 10;

/// The longest forward path from a node, preferring paths that terminate at
/// a consequence; among equals the earliest found wins.
pub fn main_path(index: &GraphIndex<'_>, start_id: &str) -> Vec<String> {
    let paths = all_paths_from(index, start_id, MAX_PATH_DEPTH);
    if paths.is_empty() {
        return vec![start_id.to_string()];
    }

    let longest = |candidates: &[Vec<String>]| -> Option<Vec<String>> {
        let mut best: Option<&Vec<String>> = None;
        for path in candidates {
            if best.is_none_or(|current| path.len() > current.len()) {
                best = Some(path);
            }
        }
        best.cloned()
    };

    let to_consequence: Vec<Vec<String>> = paths
        .iter()
        .filter(|path| {
            path.last()
                .and_then(|id| index.kind(id))
                .is_some_and(|kind| kind == NodeKind::Consequence)
        })
        .cloned()
        .collect();

    if let Some(best) = longest(&to_consequence) {
        return best;
    }
    longest(&paths).unwrap_or_else(|| vec![start_id.to_string()])
}
