use crate::graph::{BarrierKind, Document, NodeKind};

fn labels_of<'a>(document: &'a Document, kind: NodeKind) -> Vec<&'a str> {
    document
        .nodes
        .iter()
        .filter(|node| node.kind == kind)
        .map(|node| node.data.label.as_str())
        .collect()
}

fn barriers_of(document: &Document, kind: BarrierKind) -> (Vec<&str>, Vec<&str>) {
    let mut effective = Vec::new();
    let mut failed = Vec::new();
    for node in &document.nodes {
        if node.kind != NodeKind::Barrier || node.data.barrier_kind != Some(kind) {
            continue;
        }
        if node.is_failed_barrier() {
            failed.push(node.data.label.as_str());
        } else {
            effective.push(node.data.label.as_str());
        }
    }
    (effective, failed)
}

fn first_label(document: &Document, kind: NodeKind) -> &str {
    document
        .nodes
        .iter()
        .find(|node| node.kind == kind)
        .map(|node| node.data.label.as_str())
        .unwrap_or("—")
}

/// Plain-language narrative of the document for the presentation view:
/// framing sentence, monitored threats, barrier health per side, and the
/// consequences in scope. Document order throughout.
pub fn storyline(document: &Document) -> Vec<String> {
    let hazard = first_label(document, NodeKind::Hazard);
    let top_event = first_label(document, NodeKind::TopEvent);
    let mut lines = vec![format!(
        "We are managing the hazard \"{hazard}\" to avoid the top event \"{top_event}\"."
    )];

    let threats = labels_of(document, NodeKind::Threat);
    if !threats.is_empty() {
        lines.push(format!(
            "Primary threats monitored: {}.",
            threats.join(", ")
        ));
    }

    for (kind, label) in [
        (BarrierKind::Prevention, "Prevention barriers"),
        (BarrierKind::Mitigation, "Mitigation barriers"),
    ] {
        let (effective, failed) = barriers_of(document, kind);
        if effective.is_empty() && failed.is_empty() {
            continue;
        }
        if !effective.is_empty() {
            lines.push(format!(
                "{label} currently effective: {}.",
                effective.join(", ")
            ));
        }
        if !failed.is_empty() {
            lines.push(format!("⚠️ {label} failed: {}.", failed.join(", ")));
        }
    }

    let consequences = labels_of(document, NodeKind::Consequence);
    if !consequences.is_empty() {
        lines.push(format!(
            "If the top event occurs, potential consequences include {}.",
            consequences.join(", ")
        ));
    }

    lines
}

/// The failed barriers a storyline or scenario view should call out.
pub fn failed_barrier_ids(document: &Document) -> Vec<&str> {
    document
        .nodes
        .iter()
        .filter(|node| node.is_failed_barrier())
        .map(|node| node.id.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::BarrierStatus;
    use crate::graph::fixtures::*;

    #[test]
    fn storyline_frames_hazard_and_top_event() {
        let doc = sample_bowtie();
        let lines = storyline(&doc);
        assert_eq!(
            lines[0],
            "We are managing the hazard \"hz\" to avoid the top event \"te\"."
        );
        assert!(lines.iter().any(|line| line == "Primary threats monitored: t1."));
        assert!(
            lines
                .iter()
                .any(|line| line == "Prevention barriers currently effective: pb1, pb2.")
        );
        assert!(
            lines
                .iter()
                .any(|line| line
                    == "If the top event occurs, potential consequences include c1, c2.")
        );
        assert!(!lines.iter().any(|line| line.contains("failed")));
    }

    #[test]
    fn failed_barriers_are_called_out() {
        let mut doc = sample_bowtie();
        doc.node_mut("pb2").unwrap().data.status = Some(BarrierStatus::Failed);
        doc.node_mut("mb1").unwrap().data.status = Some(BarrierStatus::Failed);

        let lines = storyline(&doc);
        assert!(
            lines
                .iter()
                .any(|line| line == "Prevention barriers currently effective: pb1.")
        );
        assert!(lines.iter().any(|line| line == "⚠️ Prevention barriers failed: pb2."));
        assert!(lines.iter().any(|line| line == "⚠️ Mitigation barriers failed: mb1."));
        assert_eq!(failed_barrier_ids(&doc), vec!["pb2", "mb1"]);
    }

    #[test]
    fn empty_document_still_tells_a_story() {
        let doc = Document::default();
        let lines = storyline(&doc);
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0],
            "We are managing the hazard \"—\" to avoid the top event \"—\"."
        );
    }
}
