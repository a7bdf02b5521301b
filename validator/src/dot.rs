// dot.rs — Graphviz DOT output for validated graphs
//
// Transforms a ValidatedGraph into DOT format suitable for rendering
// with `dot` or other Graphviz layout engines.
//
// Preconditions: `graph` passed validation.
// Postconditions: returns a valid DOT string; nodes appear in dependency
//                 order, back edges are dashed and do not constrain ranks.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::{self, Write};

use crate::edges::EdgeInfo;
use crate::node::NodeRef;
use crate::validated::ValidatedGraph;

/// Emit the validated graph as a Graphviz DOT string.
pub fn emit_dot(graph: &ValidatedGraph) -> String {
    Dot(graph).to_string()
}

/// Renders a validated graph as DOT through `Display`.
pub struct Dot<'a>(pub &'a ValidatedGraph);

impl fmt::Display for Dot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_dot(f, self.0)
    }
}

fn write_dot(buf: &mut impl Write, graph: &ValidatedGraph) -> fmt::Result {
    writeln!(buf, "digraph flowcheck {{")?;
    writeln!(buf, "    rankdir=LR;")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

    if !graph.generators().is_empty() {
        writeln!(buf)?;
        writeln!(buf, "    subgraph cluster_generators {{")?;
        writeln!(buf, "        label=\"packet generators\";")?;
        writeln!(buf, "        style=rounded;")?;
        writeln!(buf, "        color=gray50;")?;
        for info in graph.generators() {
            write_node(buf, graph, info.node, "        ")?;
        }
        writeln!(buf, "    }}")?;
    }

    writeln!(buf)?;
    for output in graph.output_streams() {
        if let NodeRef::GraphInputStream(_) = output.parent_node {
            write_node(buf, graph, output.parent_node, "    ")?;
        }
    }
    for info in graph.calculators() {
        write_node(buf, graph, info.node, "    ")?;
    }
    for info in graph.status_handlers() {
        write_node(buf, graph, info.node, "    ")?;
    }
    for name in graph.required_side_packets() {
        writeln!(
            buf,
            "    {} [shape=plaintext, label=\"{}\"];",
            external_id(name),
            escape(name)
        )?;
    }

    // Streams
    writeln!(buf)?;
    for input in graph.input_streams() {
        let Some(upstream) = input.upstream else {
            continue;
        };
        let output = &graph.output_streams()[upstream];
        let label = edge_label(graph, input);
        let src = node_id(output.parent_node);
        let tgt = node_id(input.parent_node);
        if input.back_edge {
            writeln!(
                buf,
                "    {src} -> {tgt} [label=\"{label}\", style=dashed, color=blue, constraint=false];"
            )?;
        } else {
            writeln!(buf, "    {src} -> {tgt} [label=\"{label}\"];")?;
        }
    }

    // Side packets
    let side_packets = graph.input_side_packets();
    if !side_packets.is_empty() {
        writeln!(buf)?;
        writeln!(buf, "    // Side packets")?;
    }
    for input in side_packets {
        let src = match input.upstream {
            Some(upstream) => node_id(graph.output_side_packets()[upstream].parent_node),
            None => external_id(&input.name),
        };
        let tgt = node_id(input.parent_node);
        let label = edge_label(graph, input);
        writeln!(buf, "    {src} -> {tgt} [label=\"{label}\", style=dotted];")?;
    }

    writeln!(buf, "}}")
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// DOT node ID: one prefix per node kind, then the index.
fn node_id(node: NodeRef) -> String {
    match node {
        NodeRef::PacketGenerator(i) => format!("g{i}"),
        NodeRef::Calculator(i) => format!("c{i}"),
        NodeRef::StatusHandler(i) => format!("s{i}"),
        NodeRef::GraphInputStream(i) => format!("in{i}"),
    }
}

fn external_id(side_packet: &str) -> String {
    format!("ext_{}", sanitize(side_packet))
}

/// Return DOT attributes for a node kind.
fn node_attrs(node: NodeRef) -> (&'static str, &'static str) {
    match node {
        NodeRef::PacketGenerator(_) => ("box", "lightyellow"),
        NodeRef::Calculator(_) => ("box", "lightblue"),
        NodeRef::StatusHandler(_) => ("note", "gray90"),
        NodeRef::GraphInputStream(_) => ("cylinder", "lightsalmon"),
    }
}

fn write_node(buf: &mut impl Write, graph: &ValidatedGraph, node: NodeRef, indent: &str) -> fmt::Result {
    let (shape, color) = node_attrs(node);
    let label = escape(&graph.debug_name(node));
    writeln!(
        buf,
        "{indent}{} [shape={shape}, style=filled, fillcolor={color}, label=\"{label}\"];",
        node_id(node)
    )
}

fn edge_label(graph: &ValidatedGraph, edge: &EdgeInfo) -> String {
    escape(&format!(
        "{} : {}",
        edge.name,
        graph.arena().debug_type_name(edge.packet_type)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphConfig, InputStreamInfo, NodeConfig};
    use crate::registry::Registry;
    use std::collections::HashSet;

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.load_manifest_str(
            r#"{
                "calculators": {
                    "Source": { "outputs": { "*": "int" } },
                    "Merge": { "inputs": { "*": "int" }, "outputs": { "*": "int" } },
                    "Scaled": {
                        "inputs": { "*": "int" },
                        "input_side_packets": { "*": "float" },
                        "outputs": { "*": "int" }
                    }
                }
            }"#,
            "dot_test.json",
        )
        .unwrap();
        reg
    }

    fn calc(name: &str, calculator: &str, inputs: &[&str], outputs: &[&str]) -> NodeConfig {
        NodeConfig {
            name: name.to_string(),
            calculator: calculator.to_string(),
            input_stream: inputs.iter().map(|s| s.to_string()).collect(),
            output_stream: outputs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn emit(cfg: &GraphConfig) -> String {
        let graph = ValidatedGraph::initialize(cfg, &registry()).unwrap();
        emit_dot(&graph)
    }

    #[test]
    fn valid_dot_structure() {
        let dot = emit(&GraphConfig {
            node: vec![
                calc("src", "Source", &[], &["x"]),
                calc("sink", "Merge", &["x"], &["y"]),
            ],
            ..Default::default()
        });
        assert!(dot.starts_with("digraph flowcheck {"));
        assert!(dot.trim_end().ends_with('}'));
        assert!(dot.contains("c0 [shape=box"));
        assert!(dot.contains("c0 -> c1 [label=\"x : int\"];"));
    }

    #[test]
    fn display_wrapper_streams_into_any_writer() {
        let cfg = GraphConfig {
            node: vec![calc("src", "Source", &[], &["x"])],
            ..Default::default()
        };
        let graph = ValidatedGraph::initialize(&cfg, &registry()).unwrap();
        let mut out = String::from("// header\n");
        write!(out, "{}", Dot(&graph)).unwrap();
        assert_eq!(out, format!("// header\n{}", emit_dot(&graph)));
    }

    #[test]
    fn back_edge_is_dashed_and_unconstrained() {
        let mut merge = calc("merge", "Merge", &["IN:0:x", "IN:1:loop"], &["y"]);
        merge.input_stream_info = vec![InputStreamInfo {
            tag_index: "IN:1".into(),
            back_edge: true,
        }];
        let dot = emit(&GraphConfig {
            node: vec![
                calc("src", "Source", &[], &["x"]),
                merge,
                calc("tail", "Merge", &["y"], &["loop"]),
            ],
            ..Default::default()
        });
        assert!(
            dot.contains("c2 -> c1 [label=\"loop : int\", style=dashed, color=blue, constraint=false];"),
            "dot:\n{dot}"
        );
    }

    #[test]
    fn external_side_packets_get_plain_nodes() {
        let mut scaled = calc("scale", "Scaled", &["in"], &["out"]);
        scaled.input_side_packet = vec!["gain".into()];
        let dot = emit(&GraphConfig {
            input_stream: vec!["in".into()],
            node: vec![scaled],
            ..Default::default()
        });
        assert!(dot.contains("ext_gain [shape=plaintext, label=\"gain\"];"));
        assert!(dot.contains("ext_gain -> c0 [label=\"gain : float\", style=dotted];"));
        assert!(dot.contains("in1 [shape=cylinder"));
        assert!(dot.contains("in1 -> c0"));
    }

    #[test]
    fn unique_node_ids() {
        let dot = emit(&GraphConfig {
            node: vec![
                calc("a", "Source", &[], &["x"]),
                calc("b", "Merge", &["x"], &["y"]),
                calc("c", "Merge", &["y"], &["z"]),
            ],
            ..Default::default()
        });
        let node_ids: Vec<&str> = dot
            .lines()
            .filter(|l| l.contains("shape="))
            .filter_map(|l| l.split_whitespace().next())
            .collect();
        let unique: HashSet<&&str> = node_ids.iter().collect();
        assert_eq!(node_ids.len(), 3);
        assert_eq!(node_ids.len(), unique.len(), "duplicate node IDs: {:?}", node_ids);
    }

    #[test]
    fn sanitize_replaces_punctuation() {
        assert_eq!(sanitize("a.b-c"), "a_b_c");
        assert_eq!(escape("say \"hi\""), "say \\\"hi\\\"");
    }
}
