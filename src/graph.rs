use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Hazard,
    TopEvent,
    Threat,
    Barrier,
    Consequence,
    DegradationFactor,
    DegradationControl,
    BarrierGroup,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Hazard => "hazard",
            NodeKind::TopEvent => "topEvent",
            NodeKind::Threat => "threat",
            NodeKind::Barrier => "barrier",
            NodeKind::Consequence => "consequence",
            NodeKind::DegradationFactor => "degradationFactor",
            NodeKind::DegradationControl => "degradationControl",
            NodeKind::BarrierGroup => "barrierGroup",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "hazard" => Some(NodeKind::Hazard),
            "topEvent" => Some(NodeKind::TopEvent),
            "threat" => Some(NodeKind::Threat),
            "barrier" => Some(NodeKind::Barrier),
            "consequence" => Some(NodeKind::Consequence),
            "degradationFactor" => Some(NodeKind::DegradationFactor),
            "degradationControl" => Some(NodeKind::DegradationControl),
            "barrierGroup" => Some(NodeKind::BarrierGroup),
            _ => None,
        }
    }

    pub fn is_degradation(self) -> bool {
        matches!(
            self,
            NodeKind::DegradationFactor | NodeKind::DegradationControl
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierKind {
    Prevention,
    Mitigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierStatus {
    Normal,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BarrierStatus>,
    #[serde(
        default,
        rename = "barrierType",
        skip_serializing_if = "Option::is_none"
    )]
    pub barrier_kind: Option<BarrierKind>,
    #[serde(default)]
    pub expanded: bool,
}

impl NodeData {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: None,
            status: None,
            barrier_kind: None,
            expanded: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub position: Point,
    pub data: NodeData,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, data: NodeData) -> Self {
        Self {
            id: id.into(),
            kind,
            position: Point::default(),
            data,
        }
    }

    pub fn barrier_kind(&self) -> Option<BarrierKind> {
        if self.kind == NodeKind::Barrier || self.kind.is_degradation() {
            self.data.barrier_kind
        } else {
            None
        }
    }

    pub fn is_failed_barrier(&self) -> bool {
        self.kind == NodeKind::Barrier && self.data.status == Some(BarrierStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    /// Nominal direction is construction/rendering metadata only; traversal
    /// treats edges as undirected and resolves the far side through here.
    pub fn other_endpoint(&self, node_id: &str) -> Option<&str> {
        if self.source == node_id {
            Some(&self.target)
        } else if self.target == node_id {
            Some(&self.source)
        } else {
            None
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

pub fn edge_identifier(source: &str, target: &str) -> String {
    format!("{source}-{target}")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Document {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if node.data.label.trim().is_empty() {
            bail!("node '{}' must carry a non-empty label", node.id);
        }
        if self.nodes.iter().any(|existing| existing.id == node.id) {
            bail!("duplicate node id '{}'", node.id);
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn connect(
        &mut self,
        source: &str,
        target: &str,
        label: Option<String>,
    ) -> Result<String> {
        if self.node(source).is_none() {
            bail!("edge source '{source}' does not reference an existing node");
        }
        if self.node(target).is_none() {
            bail!("edge target '{target}' does not reference an existing node");
        }
        let id = edge_identifier(source, target);
        if self.edges.iter().any(|edge| edge.id == id) {
            bail!("duplicate edge id '{id}'");
        }
        self.edges.push(Edge {
            id: id.clone(),
            source: source.to_string(),
            target: target.to_string(),
            label,
        });
        Ok(id)
    }

    pub fn remove_node(&mut self, node_id: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|node| node.id != node_id);
        let existed = before != self.nodes.len();
        if existed {
            self.edges
                .retain(|edge| edge.source != node_id && edge.target != node_id);
        }
        existed
    }

    pub fn remove_edge(&mut self, edge_id: &str) -> bool {
        let before = self.edges.len();
        self.edges.retain(|edge| edge.id != edge_id);
        before != self.edges.len()
    }

    pub fn update_node(&mut self, updated: Node) -> bool {
        match self.node_mut(&updated.id) {
            Some(node) => {
                *node = updated;
                true
            }
            None => false,
        }
    }

    /// Flips `expanded` on a threat or consequence. Any other kind is left
    /// untouched; the flag is meaningless there.
    pub fn toggle_expansion(&mut self, node_id: &str) -> bool {
        match self.node_mut(node_id) {
            Some(node) if matches!(node.kind, NodeKind::Threat | NodeKind::Consequence) => {
                node.data.expanded = !node.data.expanded;
                true
            }
            _ => false,
        }
    }

    pub fn validate(&self) -> bool {
        let mut node_ids: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            if node.data.label.trim().is_empty() {
                return false;
            }
            if !node_ids.insert(node.id.as_str()) {
                return false;
            }
        }

        let mut edge_ids: HashSet<&str> = HashSet::new();
        for edge in &self.edges {
            if !edge_ids.insert(edge.id.as_str()) {
                return false;
            }
            if !node_ids.contains(edge.source.as_str()) || !node_ids.contains(edge.target.as_str())
            {
                return false;
            }
        }

        true
    }

    pub fn from_json(input: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(input)?;
        if !validate_value(&value) {
            log::debug!("rejected bowtie document failing schema validation");
            bail!("invalid bowtie document: schema validation failed");
        }
        let document: Document = serde_json::from_value(value)?;
        Ok(document)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Strict schema check over raw JSON, applied before any part of a document
/// is deserialized. A `false` here means the caller must not apply anything.
pub fn validate_value(value: &Value) -> bool {
    let Some(root) = value.as_object() else {
        return false;
    };
    let (Some(nodes), Some(edges)) = (
        root.get("nodes").and_then(Value::as_array),
        root.get("edges").and_then(Value::as_array),
    ) else {
        return false;
    };

    let mut node_ids: HashSet<&str> = HashSet::new();
    for node in nodes {
        let Some(node) = node.as_object() else {
            return false;
        };
        let Some(id) = node.get("id").and_then(Value::as_str) else {
            return false;
        };
        if id.is_empty() || !node_ids.insert(id) {
            return false;
        }
        match node.get("type").and_then(Value::as_str) {
            Some(kind) if NodeKind::parse(kind).is_some() => {}
            _ => return false,
        }
        let Some(position) = node.get("position").and_then(Value::as_object) else {
            return false;
        };
        if !position.get("x").is_some_and(Value::is_number)
            || !position.get("y").is_some_and(Value::is_number)
        {
            return false;
        }
        let Some(data) = node.get("data").and_then(Value::as_object) else {
            return false;
        };
        match data.get("label").and_then(Value::as_str) {
            Some(label) if !label.trim().is_empty() => {}
            _ => return false,
        }
    }

    let mut edge_ids: HashSet<&str> = HashSet::new();
    for edge in edges {
        let Some(edge) = edge.as_object() else {
            return false;
        };
        match edge.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() && edge_ids.insert(id) => {}
            _ => return false,
        }
        let (Some(source), Some(target)) = (
            edge.get("source").and_then(Value::as_str),
            edge.get("target").and_then(Value::as_str),
        ) else {
            return false;
        };
        if !node_ids.contains(source) || !node_ids.contains(target) {
            return false;
        }
    }

    true
}

/// Id-indexed lookup tables over one document version. Rebuild after any
/// mutation; every traversal component reads through this instead of
/// rescanning the node and edge arrays.
pub struct GraphIndex<'a> {
    nodes: HashMap<&'a str, &'a Node>,
    incident: HashMap<&'a str, Vec<&'a Edge>>,
    node_list: &'a [Node],
    edges: &'a [Edge],
}

impl<'a> GraphIndex<'a> {
    pub fn build(document: &'a Document) -> Self {
        let mut nodes: HashMap<&str, &Node> = HashMap::with_capacity(document.nodes.len());
        for node in &document.nodes {
            nodes.entry(node.id.as_str()).or_insert(node);
        }

        let mut incident: HashMap<&str, Vec<&Edge>> = HashMap::new();
        for edge in &document.edges {
            incident.entry(edge.source.as_str()).or_default().push(edge);
            if edge.target != edge.source {
                incident.entry(edge.target.as_str()).or_default().push(edge);
            }
        }

        Self {
            nodes,
            incident,
            node_list: &document.nodes,
            edges: &document.edges,
        }
    }

    pub fn node(&self, id: &str) -> Option<&'a Node> {
        self.nodes.get(id).copied()
    }

    pub fn kind(&self, id: &str) -> Option<NodeKind> {
        self.node(id).map(|node| node.kind)
    }

    /// Incident edges in document order, which is also the traversal
    /// tie-break order everywhere: first qualifying edge wins.
    pub fn incident(&self, id: &str) -> &[&'a Edge] {
        self.incident.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edges(&self) -> &'a [Edge] {
        self.edges
    }

    /// Document-order iteration; everything that fans out over node groups
    /// (failed barriers, threat rows, consequence rows) depends on it staying
    /// deterministic.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &'a Node> + '_ {
        self.node_list.iter().filter(move |node| node.kind == kind)
    }

    pub fn all_nodes(&self) -> &'a [Node] {
        self.node_list
    }

    pub fn neighbor_ids(&self, id: &str) -> Vec<&'a str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        for edge in self.incident(id) {
            if let Some(other) = edge.other_endpoint(id) {
                if seen.insert(other) {
                    out.push(other);
                }
            }
        }
        out
    }
}
