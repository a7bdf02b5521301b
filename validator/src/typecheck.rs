// typecheck.rs — Wildcard resolution and edge type consistency
//
// Preconditions: edge tables are final and back edges have an upstream.
// Postconditions: every wildcard slot with a linked counterpart aliases it;
//                 every linked input is consistent with its producer.
// Failure modes: mismatches are collected per edge kind; an input stream
//                without upstream is an internal failure.
// Side effects: adds `same_as` links in the arena.

use crate::config::GraphConfig;
use crate::diag::{codes, combine, Diagnostic, ErrorKind, ValidationError};
use crate::edges::EdgeInfo;
use crate::node::{debug_name, NodeRef};
use crate::packet_type::TypeArena;

/// For each linked pair, alias a wildcard end to the other end. The input
/// side wins when both are wildcards.
pub fn resolve_any_types(inputs: &[EdgeInfo], outputs: &[EdgeInfo], arena: &mut TypeArena) {
    for input in inputs {
        let Some(upstream) = input.upstream else {
            continue;
        };
        let output = &outputs[upstream];
        let input_root = arena.root(input.packet_type);
        let output_root = arena.root(output.packet_type);
        if arena.is_any(input_root) {
            arena.set_same_as(input_root, output.packet_type);
        } else if arena.is_any(output_root) {
            arena.set_same_as(output_root, input.packet_type);
        }
    }
}

pub fn validate_side_packet_types(
    config: &GraphConfig,
    inputs: &[EdgeInfo],
    outputs: &[EdgeInfo],
    arena: &TypeArena,
) -> Result<(), ValidationError> {
    let diags = inputs
        .iter()
        .filter_map(|input| {
            let output = &outputs[input.upstream?];
            if arena.is_consistent_with(input.packet_type, output.packet_type) {
                return None;
            }
            Some(
                Diagnostic::error(
                    ErrorKind::Unknown,
                    format!(
                        "Input side packet \"{}\" of {} \"{}\" expected a packet of type \"{}\" \
                         but the connected output side packet will be of type \"{}\"",
                        input.name,
                        input.parent_node.type_name(),
                        debug_name(config, input.parent_node),
                        arena.debug_type_name(input.packet_type),
                        arena.debug_type_name(output.packet_type)
                    ),
                )
                .with_code(codes::E0302)
                .at_node(debug_name(config, input.parent_node))
                .at_edge(&input.name),
            )
        })
        .collect();
    combine("side packet type validation failed", diags)
}

pub fn validate_stream_types(
    config: &GraphConfig,
    inputs: &[EdgeInfo],
    outputs: &[EdgeInfo],
    arena: &TypeArena,
) -> Result<(), ValidationError> {
    let mut diags = Vec::new();
    for input in inputs {
        let Some(upstream) = input.upstream else {
            return Err(Diagnostic::internal(format!(
                "input stream \"{}\" has no upstream after back-edge resolution",
                input.name
            ))
            .into());
        };
        let output = &outputs[upstream];
        if arena.is_consistent_with(input.packet_type, output.packet_type) {
            continue;
        }
        let owner = match input.parent_node {
            NodeRef::Calculator(_) => "calculator",
            other => other.type_name(),
        };
        diags.push(
            Diagnostic::error(
                ErrorKind::Unknown,
                format!(
                    "Input stream \"{}\" of {} \"{}\" expects packets of type \"{}\" but the \
                     connected output stream will contain packets of type \"{}\"",
                    input.name,
                    owner,
                    debug_name(config, input.parent_node),
                    arena.debug_type_name(input.packet_type),
                    arena.debug_type_name(output.packet_type)
                ),
            )
            .with_code(codes::E0301)
            .at_node(debug_name(config, input.parent_node))
            .at_edge(&input.name),
        );
    }
    combine("stream type validation failed", diags)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::packet_type::{PacketTypeDecl, TypeSlotId};

    fn edge(name: &str, node: NodeRef, slot: TypeSlotId, upstream: Option<usize>) -> EdgeInfo {
        EdgeInfo {
            name: name.to_string(),
            parent_node: node,
            packet_type: slot,
            upstream,
            back_edge: false,
        }
    }

    fn config() -> GraphConfig {
        GraphConfig {
            node: vec![
                NodeConfig {
                    name: "src".into(),
                    calculator: "Source".into(),
                    ..Default::default()
                },
                NodeConfig {
                    name: "dst".into(),
                    calculator: "Sink".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn wildcard_consumer_adopts_producer_type() {
        let mut arena = TypeArena::new();
        let out = arena.alloc(PacketTypeDecl::exact("int"));
        let inp = arena.alloc(PacketTypeDecl::any());
        let outputs = [edge("x", NodeRef::Calculator(0), out, None)];
        let inputs = [edge("x", NodeRef::Calculator(1), inp, Some(0))];
        resolve_any_types(&inputs, &outputs, &mut arena);
        assert_eq!(arena.registered_type_name(inp), Some("int"));
    }

    #[test]
    fn wildcard_producer_adopts_consumer_type() {
        let mut arena = TypeArena::new();
        let out = arena.alloc(PacketTypeDecl::any());
        let inp = arena.alloc(PacketTypeDecl::exact("int"));
        let outputs = [edge("x", NodeRef::Calculator(0), out, None)];
        let inputs = [edge("x", NodeRef::Calculator(1), inp, Some(0))];
        resolve_any_types(&inputs, &outputs, &mut arena);
        assert_eq!(arena.registered_type_name(out), Some("int"));
    }

    #[test]
    fn mismatches_are_all_reported() {
        let mut arena = TypeArena::new();
        let out = arena.alloc(PacketTypeDecl::exact("int"));
        let a = arena.alloc(PacketTypeDecl::exact("string"));
        let b = arena.alloc(PacketTypeDecl::exact("float"));
        let outputs = [edge("x", NodeRef::Calculator(0), out, None)];
        let inputs = [
            edge("x", NodeRef::Calculator(1), a, Some(0)),
            edge("x", NodeRef::Calculator(1), b, Some(0)),
        ];
        let err = validate_stream_types(&config(), &inputs, &outputs, &arena).unwrap_err();
        assert_eq!(err.diagnostics.len(), 2);
        assert_eq!(
            err.diagnostics[0].message,
            "Input stream \"x\" of calculator \"dst\" expects packets of type \"string\" but \
             the connected output stream will contain packets of type \"int\""
        );
    }

    #[test]
    fn unlinked_input_stream_is_internal() {
        let mut arena = TypeArena::new();
        let a = arena.alloc(PacketTypeDecl::any());
        let inputs = [edge("x", NodeRef::Calculator(1), a, None)];
        let err = validate_stream_types(&config(), &inputs, &[], &arena).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn unlinked_side_packets_are_skipped() {
        let mut arena = TypeArena::new();
        let out = arena.alloc(PacketTypeDecl::exact("int"));
        let a = arena.alloc(PacketTypeDecl::exact("string"));
        let outputs = [edge("s", NodeRef::Calculator(0), out, None)];
        let inputs = [edge("s", NodeRef::Calculator(1), a, None)];
        assert!(validate_side_packet_types(&config(), &inputs, &outputs, &arena).is_ok());
        let inputs = [edge("s", NodeRef::Calculator(1), a, Some(0))];
        let err = validate_side_packet_types(&config(), &inputs, &outputs, &arena).unwrap_err();
        assert!(err.has_code(codes::E0302));
        assert!(err.diagnostics[0].message.contains("of Calculator \"dst\""));
    }
}
