use std::collections::HashSet;

use bowgraph::{
    BarrierKind, BarrierStatus, Document, GraphIndex, HighlightState, LayeredEngine, LayoutOptions,
    LayoutScheduler, Node, NodeData, NodeKind, RiskLevel, auto_layout, downstream_path,
    highlighted_nodes, is_visible, node_path, risk, storyline, validate_value, visible_nodes,
};

fn typed_node(id: &str, kind: NodeKind, label: &str) -> Node {
    Node::new(id, kind, NodeData::labeled(label))
}

fn typed_barrier(id: &str, kind: BarrierKind, label: &str) -> Node {
    let mut node = typed_node(id, NodeKind::Barrier, label);
    node.data.barrier_kind = Some(kind);
    node
}

/// Builds a process-safety bowtie purely through the public mutators.
fn build_document() -> Document {
    let mut doc = Document::default();
    doc.add_node(typed_node("hazard", NodeKind::Hazard, "Pressurized storage"))
        .unwrap();
    doc.add_node(typed_node("top", NodeKind::TopEvent, "Loss of containment"))
        .unwrap();
    doc.add_node(typed_node("corrosion", NodeKind::Threat, "Vessel corrosion"))
        .unwrap();
    doc.add_node(typed_barrier(
        "inspection",
        BarrierKind::Prevention,
        "Inspection program",
    ))
    .unwrap();
    doc.add_node(typed_barrier(
        "coating",
        BarrierKind::Prevention,
        "Protective coating",
    ))
    .unwrap();
    doc.add_node(typed_barrier(
        "shutdown",
        BarrierKind::Mitigation,
        "Emergency shutdown",
    ))
    .unwrap();
    doc.add_node(typed_barrier(
        "dike",
        BarrierKind::Mitigation,
        "Containment dike",
    ))
    .unwrap();
    doc.add_node(typed_node("fire", NodeKind::Consequence, "Pool fire"))
        .unwrap();
    doc.add_node(typed_node("spill", NodeKind::Consequence, "Ground spill"))
        .unwrap();
    doc.add_node(typed_node(
        "audits",
        NodeKind::DegradationControl,
        "Audit schedule",
    ))
    .unwrap();
    doc.add_node(typed_node(
        "staffing",
        NodeKind::DegradationFactor,
        "Inspector shortage",
    ))
    .unwrap();

    doc.connect("hazard", "top", None).unwrap();
    doc.connect("corrosion", "inspection", None).unwrap();
    doc.connect("inspection", "coating", None).unwrap();
    doc.connect("coating", "top", None).unwrap();
    doc.connect("top", "shutdown", None).unwrap();
    doc.connect("shutdown", "fire", None).unwrap();
    doc.connect("top", "dike", None).unwrap();
    doc.connect("dike", "spill", None).unwrap();
    doc.connect("audits", "inspection", None).unwrap();
    doc.connect("staffing", "audits", None).unwrap();
    doc
}

#[test]
fn mutator_built_document_round_trips_through_json() {
    let doc = build_document();
    let json = doc.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert!(validate_value(&value));

    let reloaded = Document::from_json(&json).unwrap();
    assert!(reloaded.validate());
    assert_eq!(reloaded.nodes.len(), doc.nodes.len());
    assert_eq!(reloaded.edges.len(), doc.edges.len());
}

#[test]
fn expansion_gates_the_rendered_subgraph() {
    let mut doc = build_document();
    {
        let index = GraphIndex::build(&doc);
        let visible: Vec<&str> = visible_nodes(&index)
            .iter()
            .map(|node| node.id.as_str())
            .collect();
        assert_eq!(visible, vec!["hazard", "top", "corrosion", "fire", "spill"]);
    }

    doc.toggle_expansion("corrosion");
    let index = GraphIndex::build(&doc);
    for id in ["inspection", "coating", "audits", "staffing"] {
        assert!(is_visible(&index, doc.node(id).unwrap()), "{id} hidden");
    }
    for id in ["shutdown", "dike"] {
        assert!(!is_visible(&index, doc.node(id).unwrap()), "{id} visible");
    }
}

#[test]
fn hovering_a_barrier_highlights_the_whole_risk_pathway() {
    let doc = build_document();
    let index = GraphIndex::build(&doc);

    let path: HashSet<String> = node_path(&index, "coating").into_iter().collect();
    for id in [
        "coating",
        "inspection",
        "corrosion",
        "top",
        "shutdown",
        "fire",
        "dike",
        "spill",
        "audits",
        "staffing",
    ] {
        assert!(path.contains(id), "{id} missing from barrier span");
    }
    assert!(!path.contains("hazard"));
}

#[test]
fn failed_barrier_scenario_reaches_every_consequence() {
    let mut doc = build_document();
    doc.node_mut("inspection").unwrap().data.status = Some(BarrierStatus::Failed);
    let index = GraphIndex::build(&doc);

    let scenario: HashSet<String> = downstream_path(&index, "inspection").into_iter().collect();
    for id in ["inspection", "coating", "top", "shutdown", "fire", "dike", "spill"] {
        assert!(scenario.contains(id), "{id} missing from scenario");
    }

    // The idle highlight set is driven by the failure, and the degradation
    // branch stays out of it because its barrier path came in without it.
    let set = highlighted_nodes(&index, HighlightState::default());
    assert!(set.contains("fire") && set.contains("spill"));
    assert!(!set.contains("audits") && !set.contains("staffing"));

    let assessments = risk::annotate(&index);
    assert_eq!(assessments["inspection"].score, 90);
    assert_eq!(assessments["inspection"].level, RiskLevel::Critical);
    assert_eq!(assessments["top"].score, 100);
}

#[test]
fn layout_pipeline_applies_positions_through_the_scheduler() {
    let mut doc = build_document();
    doc.toggle_expansion("corrosion");
    doc.toggle_expansion("fire");
    doc.toggle_expansion("spill");

    let mut scheduler = LayoutScheduler::default();
    let ticket = scheduler.begin();
    assert!(scheduler.is_layouting());

    let outcome = pollster::block_on(auto_layout(
        &doc,
        &LayeredEngine,
        &LayoutOptions::default(),
        None,
    ))
    .unwrap();
    assert_eq!(outcome.positions.len(), doc.nodes.len());

    assert!(scheduler.commit(ticket, &outcome.positions, &mut doc));
    assert!(!scheduler.is_layouting());

    let corrosion = doc.node("corrosion").unwrap().position;
    let top = doc.node("top").unwrap().position;
    let fire = doc.node("fire").unwrap().position;
    assert!(corrosion.x < top.x && top.x < fire.x);
}

#[test]
fn storyline_reports_barrier_health() {
    let mut doc = build_document();
    doc.node_mut("dike").unwrap().data.status = Some(BarrierStatus::Failed);

    let lines = storyline(&doc);
    assert_eq!(
        lines[0],
        "We are managing the hazard \"Pressurized storage\" to avoid the top event \"Loss of containment\"."
    );
    assert!(
        lines
            .iter()
            .any(|line| line == "⚠️ Mitigation barriers failed: Containment dike.")
    );
    assert!(
        lines
            .iter()
            .any(|line| line == "Mitigation barriers currently effective: Emergency shutdown.")
    );
}
