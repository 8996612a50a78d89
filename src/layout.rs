use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::chain::{mitigation_chain, prevention_chain};
use crate::graph::{Document, GraphIndex, Node, NodeKind};
use crate::visibility::{visible_edges, visible_nodes};
use crate::{
    BARRIER_GAP, BARYCENTER_SWEEPS, CENTER_X, CENTER_Y, DEG_BOTTOM_SPACING, DEG_CLUSTER_MARGIN,
    DEG_HORIZONTAL_GAP, DEG_INITIAL_OFFSET, DEG_NODE_HEIGHT, DEG_NODE_WIDTH, DEG_VERTICAL_OFFSET,
    CanvasSize, HAZARD_OFFSET_Y, LAYER_NODE_MARGIN, LAYER_SPACING, MIN_PATH_GAP, NODE_HEIGHT,
    NODE_WIDTH, PATH_HEIGHT_PADDING, Point, TOP_EVENT_HEIGHT, TOP_EVENT_WIDTH,
};

/// Fixed per-kind box sizes: most kinds use the compact collapsed box, the
/// top event a larger one, degradation nodes a smaller one.
pub fn node_size(kind: NodeKind) -> (f32, f32) {
    match kind {
        NodeKind::TopEvent => (TOP_EVENT_WIDTH, TOP_EVENT_HEIGHT),
        NodeKind::DegradationFactor | NodeKind::DegradationControl => {
            (DEG_NODE_WIDTH, DEG_NODE_HEIGHT)
        }
        _ => (NODE_WIDTH, NODE_HEIGHT),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Top,
    Bottom,
    Left,
    Right,
}

/// Where edges should attach when rendered: hazards hang above the top
/// event, degradation nodes hang below their barrier, everything else flows
/// left to right.
pub fn handle_sides(kind: NodeKind) -> (Side, Side) {
    match kind {
        NodeKind::Hazard => (Side::Bottom, Side::Top),
        NodeKind::DegradationFactor | NodeKind::DegradationControl => (Side::Top, Side::Bottom),
        _ => (Side::Right, Side::Left),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    pub layer_spacing: f32,
    pub node_margin: f32,
    pub degradation_margin: f32,
    pub center_x: f32,
    pub center_y: f32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            layer_spacing: LAYER_SPACING,
            node_margin: LAYER_NODE_MARGIN,
            degradation_margin: DEG_CLUSTER_MARGIN,
            center_x: CENTER_X,
            center_y: CENTER_Y,
        }
    }
}

/// Manually pinned node positions, applied on top of whatever the engine
/// computed. Persisted by hosts, so stale ids must be prunable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutOverrides {
    #[serde(default)]
    pub nodes: HashMap<String, Point>,
}

impl LayoutOverrides {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn prune(&mut self, live: &HashSet<String>) {
        self.nodes.retain(|id, _| live.contains(id));
    }
}

#[derive(Debug, Clone)]
pub struct LayoutBox {
    pub id: String,
    pub kind: NodeKind,
    pub width: f32,
    pub height: f32,
}

/// Engine input: the visible subgraph as sized boxes plus directed
/// connection hints. Built fresh per layout request.
#[derive(Debug, Clone, Default)]
pub struct LayoutGraph {
    pub boxes: Vec<LayoutBox>,
    pub links: Vec<(String, String)>,
}

impl LayoutGraph {
    pub fn build(index: &GraphIndex<'_>) -> Self {
        let boxes = visible_nodes(index)
            .into_iter()
            .map(|node| {
                let (width, height) = node_size(node.kind);
                LayoutBox {
                    id: node.id.clone(),
                    kind: node.kind,
                    width,
                    height,
                }
            })
            .collect();
        let links = visible_edges(index)
            .into_iter()
            .map(|edge| (edge.source.clone(), edge.target.clone()))
            .collect();
        Self { boxes, links }
    }

    pub fn ids(&self) -> HashSet<String> {
        self.boxes.iter().map(|b| b.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

#[allow(async_fn_in_trait)]
pub trait LayoutEngine {
    /// May run to convergence over many iterations; the caller awaits it
    /// rather than blocking.
    async fn compute(
        &self,
        graph: &LayoutGraph,
        options: &LayoutOptions,
    ) -> Result<HashMap<String, Point>>;
}

/// Layered left-to-right arrangement: longest-path layer assignment,
/// barycenter ordering sweeps within layers, stacked coordinates, then an
/// overlap-removal pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayeredEngine;

impl LayoutEngine for LayeredEngine {
    async fn compute(
        &self,
        graph: &LayoutGraph,
        options: &LayoutOptions,
    ) -> Result<HashMap<String, Point>> {
        layered_positions(graph, options)
    }
}

fn layered_positions(
    graph: &LayoutGraph,
    options: &LayoutOptions,
) -> Result<HashMap<String, Point>> {
    if graph.is_empty() {
        return Ok(HashMap::new());
    }

    let box_of: HashMap<&str, &LayoutBox> = graph
        .boxes
        .iter()
        .map(|b| (b.id.as_str(), b))
        .collect();
    let links: Vec<(&str, &str)> = graph
        .links
        .iter()
        .filter(|(source, target)| box_of.contains_key(source.as_str()) && box_of.contains_key(target.as_str()))
        .map(|(source, target)| (source.as_str(), target.as_str()))
        .collect();

    // Longest-path layering seeded from in-degree-zero nodes; nodes left
    // unvisited by a cycle get repaired onto one past their deepest parent.
    let mut levels: HashMap<&str, usize> =
        graph.boxes.iter().map(|b| (b.id.as_str(), 0)).collect();
    let mut indegree: HashMap<&str, usize> =
        graph.boxes.iter().map(|b| (b.id.as_str(), 0)).collect();
    for (_, target) in &links {
        if let Some(count) = indegree.get_mut(*target) {
            *count += 1;
        }
    }

    let mut queue: VecDeque<&str> = VecDeque::new();
    for b in &graph.boxes {
        if indegree.get(b.id.as_str()).copied().unwrap_or(0) == 0 {
            queue.push_back(b.id.as_str());
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    while let Some(node_id) = queue.pop_front() {
        visited.insert(node_id);
        let node_level = levels.get(node_id).copied().unwrap_or(0);
        for (source, target) in &links {
            if *source != node_id {
                continue;
            }
            let entry = levels.entry(*target).or_insert(0);
            if *entry < node_level + 1 {
                *entry = node_level + 1;
            }
            if let Some(degree) = indegree.get_mut(*target) {
                if *degree > 0 {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*target);
                    }
                }
            }
        }
    }

    if visited.len() != graph.boxes.len() {
        for b in &graph.boxes {
            let id = b.id.as_str();
            if visited.contains(id) {
                continue;
            }
            let mut max_parent = 0usize;
            let mut has_parent = false;
            for (source, target) in &links {
                if *target != id {
                    continue;
                }
                has_parent = true;
                let parent_level = levels.get(source).copied().unwrap_or(0);
                max_parent = max_parent.max(parent_level + 1);
            }
            levels.insert(id, if has_parent { max_parent } else { 0 });
        }
    }

    let mut layers_map: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for b in &graph.boxes {
        let level = levels.get(b.id.as_str()).copied().unwrap_or(0);
        layers_map.entry(level).or_default().push(b.id.clone());
    }
    let mut layers: Vec<Vec<String>> = layers_map.into_values().collect();

    // Crossing reduction: alternate downward/upward barycenter sweeps; a
    // stable sort keeps document order on ties.
    let mut neighbors: HashMap<&str, Vec<&str>> = HashMap::new();
    for (source, target) in &links {
        neighbors.entry(*source).or_default().push(*target);
        neighbors.entry(*target).or_default().push(*source);
    }
    for _ in 0..BARYCENTER_SWEEPS {
        for layer_ix in 1..layers.len() {
            reorder_layer(&mut layers, layer_ix, layer_ix - 1, &neighbors);
        }
        for layer_ix in (0..layers.len().saturating_sub(1)).rev() {
            reorder_layer(&mut layers, layer_ix, layer_ix + 1, &neighbors);
        }
    }

    // Coordinates: layer centers spaced evenly around the canvas midline,
    // boxes stacked within each layer with pair-dependent margins.
    let span = options.layer_spacing * layers.len().saturating_sub(1) as f32;
    let first_center_x = options.center_x - span / 2.0;

    let mut positions: HashMap<String, Point> = HashMap::new();
    for (layer_ix, layer) in layers.iter().enumerate() {
        let center_x = first_center_x + layer_ix as f32 * options.layer_spacing;
        let mut total_height = 0.0_f32;
        for (row_ix, id) in layer.iter().enumerate() {
            if let Some(b) = box_of.get(id.as_str()) {
                total_height += b.height;
                if row_ix + 1 != layer.len() {
                    total_height += pair_margin(options, b, box_of.get(layer[row_ix + 1].as_str()));
                }
            }
        }

        let mut cursor = options.center_y - total_height / 2.0;
        for (row_ix, id) in layer.iter().enumerate() {
            let Some(b) = box_of.get(id.as_str()) else {
                continue;
            };
            positions.insert(
                id.clone(),
                Point::new(center_x - b.width / 2.0, cursor),
            );
            cursor += b.height;
            if row_ix + 1 != layer.len() {
                cursor += pair_margin(options, b, box_of.get(layer[row_ix + 1].as_str()));
            }
        }
    }

    resolve_overlaps(&mut positions, graph, options);
    Ok(positions)
}

fn pair_margin(options: &LayoutOptions, a: &LayoutBox, b: Option<&&LayoutBox>) -> f32 {
    let both_degradation = a.kind.is_degradation()
        && b.is_some_and(|other| other.kind.is_degradation());
    if both_degradation {
        options.degradation_margin
    } else {
        options.node_margin
    }
}

fn reorder_layer(
    layers: &mut [Vec<String>],
    layer_ix: usize,
    reference_ix: usize,
    neighbors: &HashMap<&str, Vec<&str>>,
) {
    let reference_pos: HashMap<&str, usize> = layers[reference_ix]
        .iter()
        .enumerate()
        .map(|(pos, id)| (id.as_str(), pos))
        .collect();

    let current: Vec<String> = layers[layer_ix].clone();
    let barycenter: HashMap<&str, f32> = current
        .iter()
        .enumerate()
        .map(|(pos, id)| {
            let adjacent: Vec<usize> = neighbors
                .get(id.as_str())
                .map(|others| {
                    others
                        .iter()
                        .filter_map(|other| reference_pos.get(other).copied())
                        .collect()
                })
                .unwrap_or_default();
            let value = if adjacent.is_empty() {
                pos as f32
            } else {
                adjacent.iter().sum::<usize>() as f32 / adjacent.len() as f32
            };
            (id.as_str(), value)
        })
        .collect();

    layers[layer_ix].sort_by(|a, b| {
        let left = barycenter.get(a.as_str()).copied().unwrap_or(0.0);
        let right = barycenter.get(b.as_str()).copied().unwrap_or(0.0);
        left.partial_cmp(&right).unwrap_or(Ordering::Equal)
    });
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
}

fn rects_intersect_with_margin(a: &Rect, b: &Rect, margin: f32) -> bool {
    (a.min_x - margin) < (b.max_x + margin)
        && (a.max_x + margin) > (b.min_x - margin)
        && (a.min_y - margin) < (b.max_y + margin)
        && (a.max_y + margin) > (b.min_y - margin)
}

const OVERLAP_MAX_ITER: usize = 32;

/// Pushes intersecting boxes apart vertically until the arrangement is
/// collision free. Degradation pairs get the tighter margin so a staircase
/// stays compact while still clearing neighboring clusters.
fn resolve_overlaps(
    positions: &mut HashMap<String, Point>,
    graph: &LayoutGraph,
    options: &LayoutOptions,
) {
    let mut order: Vec<&LayoutBox> = graph
        .boxes
        .iter()
        .filter(|b| positions.contains_key(&b.id))
        .collect();

    for _ in 0..OVERLAP_MAX_ITER {
        order.sort_by(|a, b| {
            let pa = positions[&a.id];
            let pb = positions[&b.id];
            pa.y.partial_cmp(&pb.y)
                .unwrap_or(Ordering::Equal)
                .then(pa.x.partial_cmp(&pb.x).unwrap_or(Ordering::Equal))
                .then(a.id.cmp(&b.id))
        });

        let mut moved = false;
        for upper_ix in 0..order.len() {
            for lower_ix in (upper_ix + 1)..order.len() {
                let upper = order[upper_ix];
                let lower = order[lower_ix];
                // Degradation pairs keep the tight cluster gap; everything
                // else only needs to stop intersecting.
                let gap = if upper.kind.is_degradation() && lower.kind.is_degradation() {
                    options.degradation_margin
                } else {
                    0.0
                };
                let ra = rect_of(positions[&upper.id], upper);
                let rb = rect_of(positions[&lower.id], lower);
                if rects_intersect_with_margin(&ra, &rb, gap / 2.0) {
                    let shift = ra.max_y + gap - rb.min_y;
                    if shift > f32::EPSILON {
                        if let Some(point) = positions.get_mut(&lower.id) {
                            point.y += shift;
                            moved = true;
                        }
                    }
                }
            }
        }
        if !moved {
            break;
        }
    }
}

fn rect_of(point: Point, b: &LayoutBox) -> Rect {
    Rect {
        min_x: point.x,
        min_y: point.y,
        max_x: point.x + b.width,
        max_y: point.y + b.height,
    }
}

/// A barrier's full degradation cluster: every degradation node attached to
/// the barrier plus the factors hanging off its controls, factors before
/// controls, then label order — the staircase order under the barrier.
fn sorted_degradation_nodes<'a>(index: &GraphIndex<'a>, barrier_id: &str) -> Vec<&'a Node> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut nodes: Vec<&'a Node> = Vec::new();
    let mut push = |node: &'a Node, nodes: &mut Vec<&'a Node>, seen: &mut HashSet<&'a str>| {
        if node.kind.is_degradation() && seen.insert(node.id.as_str()) {
            nodes.push(node);
        }
    };
    for edge in index.incident(barrier_id) {
        let Some(other) = edge.other_endpoint(barrier_id) else {
            continue;
        };
        let Some(node) = index.node(other) else {
            continue;
        };
        push(node, &mut nodes, &mut seen);
        if node.kind == NodeKind::DegradationControl {
            for factor_edge in index.incident(&node.id) {
                let Some(factor) = factor_edge.other_endpoint(&node.id) else {
                    continue;
                };
                if let Some(factor_node) = index.node(factor) {
                    if factor_node.kind == NodeKind::DegradationFactor {
                        push(factor_node, &mut nodes, &mut seen);
                    }
                }
            }
        }
    }
    nodes.sort_by(|a, b| {
        let rank = |node: &Node| match node.kind {
            NodeKind::DegradationFactor => 0,
            _ => 1,
        };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.data.label.cmp(&b.data.label))
    });
    nodes
}

fn staircase_extent(count: usize) -> f32 {
    if count == 0 {
        return 0.0;
    }
    DEG_INITIAL_OFFSET + (count - 1) as f32 * DEG_VERTICAL_OFFSET + DEG_NODE_HEIGHT
}

/// Slot height for one anchor row and the staircase overhang below it. The
/// row must fit its tallest degradation staircase; the overhang keeps the
/// next row from starting inside it.
fn chain_slot_metrics(index: &GraphIndex<'_>, chain: &[String]) -> (f32, f32) {
    let mut max_bottom = 0.0_f32;
    for barrier_id in chain {
        let count = sorted_degradation_nodes(index, barrier_id).len();
        if count > 0 {
            max_bottom = max_bottom.max(staircase_extent(count));
        }
    }
    let staircase = if max_bottom > 0.0 {
        max_bottom + DEG_BOTTOM_SPACING
    } else {
        0.0
    };
    let path_height = NODE_HEIGHT + staircase + PATH_HEIGHT_PADDING;
    (path_height, max_bottom)
}

/// Stacks anchor rows (threats or consequences): each row's slot is sized by
/// its path height plus the deepest degradation staircase, rows separated by
/// the fixed minimum gap, then the whole stack is centered on the canvas
/// midline. Returns each anchor's center y.
fn stack_rows(
    index: &GraphIndex<'_>,
    anchors: &[&Node],
    chains: &HashMap<String, Vec<String>>,
    center_y: f32,
) -> HashMap<String, f32> {
    let mut centers: HashMap<String, f32> = HashMap::new();
    let mut cursor = 0.0_f32;
    for anchor in anchors {
        let empty = Vec::new();
        let chain = chains.get(&anchor.id).unwrap_or(&empty);
        let (path_height, max_bottom) = chain_slot_metrics(index, chain);
        let center = cursor + path_height / 2.0;
        centers.insert(anchor.id.clone(), center);
        cursor = center + path_height / 2.0 + max_bottom + MIN_PATH_GAP;
    }
    let total = (cursor - MIN_PATH_GAP).max(0.0);
    let start = center_y - total / 2.0;
    for value in centers.values_mut() {
        *value += start;
    }
    centers
}

/// Deterministic structural bowtie arrangement, used when the layered engine
/// is unavailable: top event centered, hazard above it, prevention chains
/// end-to-end on the left at their threat's row, mitigation chains on the
/// right at their consequence's row, degradation staircases below their
/// barrier. Columns widen beyond the default spacing when a chain would
/// otherwise run into the next column.
pub fn structural_layout(
    index: &GraphIndex<'_>,
    options: &LayoutOptions,
) -> Result<HashMap<String, Point>> {
    let Some(top_event) = index.nodes_of_kind(NodeKind::TopEvent).next() else {
        bail!("structural layout requires a top event");
    };

    let threats: Vec<&Node> = index.nodes_of_kind(NodeKind::Threat).collect();
    let consequences: Vec<&Node> = index.nodes_of_kind(NodeKind::Consequence).collect();

    let threat_chains: HashMap<String, Vec<String>> = threats
        .iter()
        .map(|threat| (threat.id.clone(), prevention_chain(index, &threat.id)))
        .collect();
    let consequence_chains: HashMap<String, Vec<String>> = consequences
        .iter()
        .map(|consequence| (consequence.id.clone(), mitigation_chain(index, &consequence.id)))
        .collect();

    let threat_centers = stack_rows(index, &threats, &threat_chains, options.center_y);
    let consequence_centers = stack_rows(index, &consequences, &consequence_chains, options.center_y);

    let te_left = options.center_x - TOP_EVENT_WIDTH / 2.0;
    let te_right = options.center_x + TOP_EVENT_WIDTH / 2.0;
    let slot = NODE_WIDTH + BARRIER_GAP;

    let max_prevention = threat_chains.values().map(Vec::len).max().unwrap_or(0) as f32;
    let max_mitigation = consequence_chains.values().map(Vec::len).max().unwrap_or(0) as f32;

    // The default columns sit two layers out from the center; long chains
    // push them further so a chain never runs into the next column.
    let threat_x = (options.center_x - options.layer_spacing * 2.0 - NODE_WIDTH / 2.0)
        .min(te_left - BARRIER_GAP - max_prevention * slot - NODE_WIDTH);
    let threat_right = threat_x + NODE_WIDTH;
    let mitigation_start = options.center_x + options.layer_spacing + TOP_EVENT_WIDTH / 2.0;
    let consequence_x = (options.center_x + options.layer_spacing * 2.0 - NODE_WIDTH / 2.0)
        .max(te_right + BARRIER_GAP + max_mitigation * slot)
        .max(mitigation_start + BARRIER_GAP + max_mitigation * slot);

    let mut positions: HashMap<String, Point> = HashMap::new();
    positions.insert(
        top_event.id.clone(),
        Point::new(te_left, options.center_y - TOP_EVENT_HEIGHT / 2.0),
    );
    if let Some(hazard) = index.nodes_of_kind(NodeKind::Hazard).next() {
        positions.insert(
            hazard.id.clone(),
            Point::new(
                options.center_x - NODE_WIDTH / 2.0,
                options.center_y + HAZARD_OFFSET_Y - NODE_HEIGHT / 2.0,
            ),
        );
    }

    for threat in &threats {
        let Some(&center) = threat_centers.get(&threat.id) else {
            continue;
        };
        positions.insert(
            threat.id.clone(),
            Point::new(threat_x, center - NODE_HEIGHT / 2.0),
        );
        let empty = Vec::new();
        let chain = threat_chains.get(&threat.id).unwrap_or(&empty);
        for (barrier_ix, barrier_id) in chain.iter().enumerate() {
            let barrier_x = threat_right + BARRIER_GAP + barrier_ix as f32 * slot;
            positions.insert(
                barrier_id.clone(),
                Point::new(barrier_x, center - NODE_HEIGHT / 2.0),
            );
            place_staircase(index, &mut positions, barrier_id, barrier_x, center);
        }
    }

    for consequence in &consequences {
        let Some(&center) = consequence_centers.get(&consequence.id) else {
            continue;
        };
        positions.insert(
            consequence.id.clone(),
            Point::new(consequence_x, center - NODE_HEIGHT / 2.0),
        );
        let empty = Vec::new();
        let chain = consequence_chains.get(&consequence.id).unwrap_or(&empty);
        for (barrier_ix, barrier_id) in chain.iter().enumerate() {
            let barrier_x = mitigation_start + BARRIER_GAP + barrier_ix as f32 * slot;
            positions.insert(
                barrier_id.clone(),
                Point::new(barrier_x, center - NODE_HEIGHT / 2.0),
            );
            place_staircase(index, &mut positions, barrier_id, barrier_x, center);
        }
    }

    Ok(positions)
}

/// Down-and-right staircase anchored under a barrier, centered on it
/// horizontally.
fn place_staircase(
    index: &GraphIndex<'_>,
    positions: &mut HashMap<String, Point>,
    barrier_id: &str,
    barrier_x: f32,
    row_center_y: f32,
) {
    let nodes = sorted_degradation_nodes(index, barrier_id);
    if nodes.is_empty() {
        return;
    }
    let total_width =
        nodes.len() as f32 * DEG_NODE_WIDTH + (nodes.len() - 1) as f32 * DEG_HORIZONTAL_GAP;
    let barrier_center_x = barrier_x + NODE_WIDTH / 2.0;
    let start_x = barrier_center_x - total_width / 2.0;
    for (step, node) in nodes.iter().enumerate() {
        positions.insert(
            node.id.clone(),
            Point::new(
                start_x + step as f32 * (DEG_NODE_WIDTH + DEG_HORIZONTAL_GAP),
                row_center_y
                    + NODE_HEIGHT / 2.0
                    + DEG_INITIAL_OFFSET
                    + step as f32 * DEG_VERTICAL_OFFSET,
            ),
        );
    }
}

/// Bounding canvas for a computed arrangement, for hosts that fit the view
/// to the diagram. Empty arrangements get a zero canvas.
pub fn canvas_size(positions: &HashMap<String, Point>, graph: &LayoutGraph) -> CanvasSize {
    let mut max_x = 0.0_f32;
    let mut max_y = 0.0_f32;
    let mut any = false;
    for b in &graph.boxes {
        if let Some(point) = positions.get(&b.id) {
            max_x = max_x.max(point.x + b.width);
            max_y = max_y.max(point.y + b.height);
            any = true;
        }
    }
    if !any {
        return CanvasSize {
            width: 0.0,
            height: 0.0,
        };
    }
    CanvasSize {
        width: max_x,
        height: max_y,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutSource {
    Layered,
    Structural,
}

#[derive(Debug, Clone)]
pub struct LayoutOutcome {
    pub positions: HashMap<String, Point>,
    pub source: LayoutSource,
}

/// Computes positions for the visible subgraph. The engine runs first; on
/// failure the structural arrangement takes over with a non-fatal notice.
/// Manual overrides are applied last. The document itself is never touched —
/// applying positions is the scheduler's job.
pub async fn auto_layout<E: LayoutEngine>(
    document: &Document,
    engine: &E,
    options: &LayoutOptions,
    overrides: Option<&LayoutOverrides>,
) -> Result<LayoutOutcome> {
    let index = GraphIndex::build(document);
    let graph = LayoutGraph::build(&index);
    let ids = graph.ids();

    let (mut positions, source) = match engine.compute(&graph, options).await {
        Ok(positions) => (positions, LayoutSource::Layered),
        Err(error) => {
            log::warn!("layout engine failed ({error:#}); using structural fallback");
            (structural_layout(&index, options)?, LayoutSource::Structural)
        }
    };
    positions.retain(|id, _| ids.contains(id));

    if let Some(overrides) = overrides {
        for (id, point) in &overrides.nodes {
            if positions.contains_key(id) {
                positions.insert(id.clone(), *point);
            }
        }
    }

    Ok(LayoutOutcome { positions, source })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTicket(u64);

/// Serializes layout application: every request gets a ticket, and only the
/// newest ticket may commit. A stale commit (a newer request began in the
/// meantime) is discarded without touching the document, so exactly one
/// pending layout ever mutates positions — last applied wins.
#[derive(Debug, Default)]
pub struct LayoutScheduler {
    generation: u64,
    pending: Option<u64>,
}

impl LayoutScheduler {
    pub fn begin(&mut self) -> LayoutTicket {
        self.generation += 1;
        self.pending = Some(self.generation);
        LayoutTicket(self.generation)
    }

    pub fn is_layouting(&self) -> bool {
        self.pending.is_some()
    }

    pub fn commit(
        &mut self,
        ticket: LayoutTicket,
        positions: &HashMap<String, Point>,
        document: &mut Document,
    ) -> bool {
        if ticket.0 != self.generation {
            return false;
        }
        for node in &mut document.nodes {
            if let Some(point) = positions.get(&node.id) {
                node.position = *point;
            }
        }
        self.pending = None;
        true
    }

    pub fn cancel(&mut self, ticket: LayoutTicket) {
        if ticket.0 == self.generation {
            self.pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::*;
    use anyhow::anyhow;

    fn expanded_sample() -> Document {
        let mut doc = sample_bowtie();
        doc.toggle_expansion("t1");
        doc.toggle_expansion("c1");
        doc.toggle_expansion("c2");
        doc
    }

    fn trace_x(positions: &HashMap<String, Point>, ids: &[&str]) -> Vec<f32> {
        ids.iter().map(|id| positions[*id].x).collect()
    }

    fn assert_strictly_increasing(values: &[f32], label: &str) {
        for pair in values.windows(2) {
            assert!(
                pair[0] < pair[1],
                "{label}: expected strictly increasing x, got {values:?}"
            );
        }
    }

    #[test]
    fn sizes_and_handles_by_kind() {
        assert_eq!(node_size(NodeKind::TopEvent), (TOP_EVENT_WIDTH, TOP_EVENT_HEIGHT));
        assert_eq!(node_size(NodeKind::Threat), (NODE_WIDTH, NODE_HEIGHT));
        assert_eq!(
            node_size(NodeKind::DegradationFactor),
            (DEG_NODE_WIDTH, DEG_NODE_HEIGHT)
        );
        assert_eq!(handle_sides(NodeKind::Hazard), (Side::Bottom, Side::Top));
        assert_eq!(
            handle_sides(NodeKind::DegradationControl),
            (Side::Top, Side::Bottom)
        );
        assert_eq!(handle_sides(NodeKind::Barrier), (Side::Right, Side::Left));
    }

    #[test]
    fn layout_graph_covers_only_the_visible_subgraph() {
        let doc = sample_bowtie();
        let index = GraphIndex::build(&doc);
        let graph = LayoutGraph::build(&index);
        // Collapsed: hazard, top event, threat, two consequences.
        assert_eq!(graph.boxes.len(), 5);
        assert_eq!(graph.links.len(), 1);

        let doc = expanded_sample();
        let index = GraphIndex::build(&doc);
        let graph = LayoutGraph::build(&index);
        assert_eq!(graph.boxes.len(), doc.nodes.len());
        assert_eq!(graph.links.len(), doc.edges.len());
    }

    #[test]
    fn layered_engine_orders_chain_layers_left_to_right() {
        let doc = expanded_sample();
        let index = GraphIndex::build(&doc);
        let graph = LayoutGraph::build(&index);
        let positions =
            pollster::block_on(LayeredEngine.compute(&graph, &LayoutOptions::default())).unwrap();
        assert_eq!(positions.len(), graph.boxes.len());
        assert_strictly_increasing(
            &trace_x(&positions, &["t1", "pb1", "pb2", "te", "mb1", "c1"]),
            "layered chain",
        );
    }

    #[test]
    fn layered_engine_produces_no_overlapping_boxes() {
        let doc = expanded_sample();
        let index = GraphIndex::build(&doc);
        let graph = LayoutGraph::build(&index);
        let positions =
            pollster::block_on(LayeredEngine.compute(&graph, &LayoutOptions::default())).unwrap();
        for (ix, a) in graph.boxes.iter().enumerate() {
            for b in graph.boxes.iter().skip(ix + 1) {
                let ra = rect_of(positions[&a.id], a);
                let rb = rect_of(positions[&b.id], b);
                assert!(
                    !rects_intersect_with_margin(&ra, &rb, 0.0),
                    "{} and {} overlap",
                    a.id,
                    b.id
                );
            }
        }
    }

    #[test]
    fn layered_engine_handles_empty_and_cyclic_graphs() {
        let empty = LayoutGraph::default();
        let positions =
            pollster::block_on(LayeredEngine.compute(&empty, &LayoutOptions::default())).unwrap();
        assert!(positions.is_empty());

        let mut doc = Document::default();
        doc.add_node(node("a", NodeKind::Threat)).unwrap();
        doc.add_node(node("b", NodeKind::Consequence)).unwrap();
        doc.connect("a", "b", None).unwrap();
        doc.connect("b", "a", None).unwrap();
        let index = GraphIndex::build(&doc);
        let graph = LayoutGraph::build(&index);
        let positions =
            pollster::block_on(LayeredEngine.compute(&graph, &LayoutOptions::default())).unwrap();
        assert_eq!(positions.len(), 2);
    }

    #[test]
    fn structural_layout_is_monotone_along_a_traced_chain() {
        let doc = sample_bowtie();
        let index = GraphIndex::build(&doc);
        let positions = structural_layout(&index, &LayoutOptions::default()).unwrap();
        assert_strictly_increasing(
            &trace_x(&positions, &["t1", "pb1", "pb2", "te", "mb1", "c1"]),
            "structural chain",
        );
        assert_strictly_increasing(
            &trace_x(&positions, &["t1", "pb1", "pb2", "te", "mb2", "c2"]),
            "structural chain 2",
        );
        // Hazard sits above the top event on the center column.
        let hazard = positions["hz"];
        let top_event = positions["te"];
        assert!(hazard.y < top_event.y);
    }

    #[test]
    fn structural_layout_requires_a_top_event() {
        let mut doc = Document::default();
        doc.add_node(node("t", NodeKind::Threat)).unwrap();
        let index = GraphIndex::build(&doc);
        assert!(structural_layout(&index, &LayoutOptions::default()).is_err());
    }

    #[test]
    fn sibling_threat_rows_never_overlap_vertically() {
        let mut doc = sample_bowtie();
        // Second threat with its own chain and a tall degradation staircase.
        doc.add_node(node("t2", NodeKind::Threat)).unwrap();
        doc.add_node(barrier("pb3", crate::graph::BarrierKind::Prevention))
            .unwrap();
        doc.add_node(node("dc2", NodeKind::DegradationControl)).unwrap();
        doc.add_node(node("dc3", NodeKind::DegradationControl)).unwrap();
        doc.connect("t2", "pb3", None).unwrap();
        doc.connect("pb3", "te", None).unwrap();
        doc.connect("dc2", "pb3", None).unwrap();
        doc.connect("dc3", "pb3", None).unwrap();

        let index = GraphIndex::build(&doc);
        let positions = structural_layout(&index, &LayoutOptions::default()).unwrap();

        // Row 1 span: its lowest point is the bottom of pb1's staircase.
        let row1_bottom = positions["df1"].y + DEG_NODE_HEIGHT;
        let row2_top = positions["t2"].y;
        assert!(
            row1_bottom < row2_top,
            "row spans overlap: {row1_bottom} vs {row2_top}"
        );

        // Degradation staircase steps down and to the right.
        assert!(positions["dc2"].x < positions["dc3"].x);
        assert!(positions["dc2"].y < positions["dc3"].y);
    }

    #[test]
    fn long_chains_push_the_anchor_columns_outward() {
        let mut doc = sample_bowtie();
        for ix in 0..4 {
            let id = format!("mbx{ix}");
            doc.add_node(barrier(&id, crate::graph::BarrierKind::Mitigation))
                .unwrap();
        }
        doc.add_node(node("c3", NodeKind::Consequence)).unwrap();
        doc.connect("te", "mbx0", None).unwrap();
        doc.connect("mbx0", "mbx1", None).unwrap();
        doc.connect("mbx1", "mbx2", None).unwrap();
        doc.connect("mbx2", "mbx3", None).unwrap();
        doc.connect("mbx3", "c3", None).unwrap();

        let index = GraphIndex::build(&doc);
        let positions = structural_layout(&index, &LayoutOptions::default()).unwrap();
        assert_strictly_increasing(
            &trace_x(
                &positions,
                &["t1", "pb1", "pb2", "te", "mbx0", "mbx1", "mbx2", "mbx3", "c3"],
            ),
            "long mitigation chain",
        );
        // The last barrier clears the consequence column.
        assert!(positions["mbx3"].x + NODE_WIDTH <= positions["c3"].x);
    }

    struct FailingEngine;

    impl LayoutEngine for FailingEngine {
        async fn compute(
            &self,
            _graph: &LayoutGraph,
            _options: &LayoutOptions,
        ) -> Result<HashMap<String, Point>> {
            Err(anyhow!("engine unavailable"))
        }
    }

    #[test]
    fn adapter_falls_back_to_structural_layout() {
        let doc = expanded_sample();
        let outcome = pollster::block_on(auto_layout(
            &doc,
            &FailingEngine,
            &LayoutOptions::default(),
            None,
        ))
        .unwrap();
        assert_eq!(outcome.source, LayoutSource::Structural);
        assert!(outcome.positions.contains_key("pb1"));
        assert_strictly_increasing(
            &trace_x(&outcome.positions, &["t1", "pb1", "pb2", "te", "mb1", "c1"]),
            "fallback chain",
        );
    }

    #[test]
    fn adapter_never_mutates_the_document() {
        let doc = expanded_sample();
        let snapshot = doc.to_json().unwrap();
        let _ = pollster::block_on(auto_layout(
            &doc,
            &LayeredEngine,
            &LayoutOptions::default(),
            None,
        ))
        .unwrap();
        assert_eq!(doc.to_json().unwrap(), snapshot);
    }

    #[test]
    fn overrides_pin_positions_and_prune_dead_ids() {
        let doc = expanded_sample();
        let mut overrides = LayoutOverrides::default();
        overrides
            .nodes
            .insert("te".to_string(), Point::new(42.0, 7.0));
        overrides
            .nodes
            .insert("gone".to_string(), Point::new(1.0, 1.0));

        let outcome = pollster::block_on(auto_layout(
            &doc,
            &LayeredEngine,
            &LayoutOptions::default(),
            Some(&overrides),
        ))
        .unwrap();
        assert_eq!(outcome.positions["te"], Point::new(42.0, 7.0));
        assert!(!outcome.positions.contains_key("gone"));

        let live: HashSet<String> = doc.nodes.iter().map(|n| n.id.clone()).collect();
        overrides.prune(&live);
        assert!(overrides.nodes.contains_key("te"));
        assert!(!overrides.nodes.contains_key("gone"));
    }

    #[test]
    fn scheduler_discards_stale_commits() {
        let mut doc = expanded_sample();
        let mut scheduler = LayoutScheduler::default();
        assert!(!scheduler.is_layouting());

        let first = scheduler.begin();
        assert!(scheduler.is_layouting());
        // A second request begins before the first finishes.
        let second = scheduler.begin();

        let mut stale = HashMap::new();
        stale.insert("te".to_string(), Point::new(-999.0, -999.0));
        assert!(!scheduler.commit(first, &stale, &mut doc));
        assert_eq!(doc.node("te").unwrap().position, Point::default());
        assert!(scheduler.is_layouting());

        let mut fresh = HashMap::new();
        fresh.insert("te".to_string(), Point::new(10.0, 20.0));
        assert!(scheduler.commit(second, &fresh, &mut doc));
        assert_eq!(doc.node("te").unwrap().position, Point::new(10.0, 20.0));
        assert!(!scheduler.is_layouting());
    }

    #[test]
    fn canvas_size_bounds_the_arrangement() {
        let doc = expanded_sample();
        let index = GraphIndex::build(&doc);
        let graph = LayoutGraph::build(&index);
        let positions = structural_layout(&index, &LayoutOptions::default()).unwrap();
        let size = canvas_size(&positions, &graph);
        for b in &graph.boxes {
            if let Some(point) = positions.get(&b.id) {
                assert!(point.x + b.width <= size.width);
                assert!(point.y + b.height <= size.height);
            }
        }

        let empty = canvas_size(&HashMap::new(), &LayoutGraph::default());
        assert_eq!(empty.width, 0.0);
        assert_eq!(empty.height, 0.0);
    }

    #[test]
    fn scheduler_cancel_clears_busy_state() {
        let mut scheduler = LayoutScheduler::default();
        let ticket = scheduler.begin();
        scheduler.cancel(ticket);
        assert!(!scheduler.is_layouting());
        // Cancelling a stale ticket leaves a newer request pending.
        let old = scheduler.begin();
        let _new = scheduler.begin();
        scheduler.cancel(old);
        assert!(scheduler.is_layouting());
    }
}
