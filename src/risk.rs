use std::collections::HashMap;

use crate::graph::{GraphIndex, Node, NodeKind, RiskLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskAssessment {
    pub score: u8,
    pub level: RiskLevel,
}

pub fn base_score(kind: NodeKind) -> i32 {
    match kind {
        NodeKind::Hazard => 80,
        NodeKind::TopEvent => 90,
        NodeKind::Threat => 60,
        NodeKind::Barrier => 40,
        NodeKind::Consequence => 100,
        _ => 50,
    }
}

/// Heuristic per-node score: base by kind, +5 per incident edge, with two
/// overrides — a failed barrier is pinned to 90 and a consequence adjacent
/// to a failed barrier is pinned to 100. Clamped into [0, 100].
pub fn score(index: &GraphIndex<'_>, node: &Node) -> u8 {
    let mut score = base_score(node.kind);
    score += index.incident(&node.id).len() as i32 * 5;

    if node.is_failed_barrier() {
        score = 90;
    }

    if node.kind == NodeKind::Consequence {
        let adjacent_failure = index.incident(&node.id).iter().any(|edge| {
            edge.other_endpoint(&node.id)
                .and_then(|other| index.node(other))
                .is_some_and(Node::is_failed_barrier)
        });
        if adjacent_failure {
            score = 100;
        }
    }

    score.clamp(0, 100) as u8
}

pub fn level(score: u8) -> RiskLevel {
    if score >= 80 {
        RiskLevel::Critical
    } else if score >= 60 {
        RiskLevel::High
    } else if score >= 40 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub fn assess(index: &GraphIndex<'_>, node: &Node) -> RiskAssessment {
    let score = score(index, node);
    RiskAssessment {
        score,
        level: level(score),
    }
}

/// Fresh assessment for every node in the document. Derived state only;
/// nothing here is cached or written back into the nodes.
pub fn annotate(index: &GraphIndex<'_>) -> HashMap<String, RiskAssessment> {
    index
        .all_nodes()
        .iter()
        .map(|node| (node.id.clone(), assess(index, node)))
        .collect()
}
