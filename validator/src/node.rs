// node.rs — Node identities and contract resolution
//
// Resolves the contract of every declared generator, calculator and status
// handler through the registry. Every node is attempted; failures are
// collected into one `ValidationError`.
//
// Preconditions: `config` went through the basic transforms.
// Postconditions: one `NodeTypeInfo` per node with every contract slot typed.
// Failure modes: unknown node type (NotFound), malformed declarations or
//                annotations (InvalidArgument), filler failures and slots
//                left untyped (Unknown, with the slot sets as causes).
// Side effects: allocates contract slots in the arena.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::Serialize;

use crate::config::GraphConfig;
use crate::contract::{Contract, ContractContext, Declared, SlotSet};
use crate::diag::{codes, Diagnostic, ErrorKind, ValidationError};
use crate::packet_type::TypeArena;
use crate::registry::{NodeKind, Registry};
use crate::tag_map::{parse_tag_index, TagMap};

// ── Node identity ───────────────────────────────────────────────────────────

/// A node and its position in its kind's list. Graph input streams are
/// virtual nodes numbered after the calculators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeRef {
    PacketGenerator(usize),
    Calculator(usize),
    StatusHandler(usize),
    GraphInputStream(usize),
}

impl NodeRef {
    pub fn index(self) -> usize {
        match self {
            NodeRef::PacketGenerator(i)
            | NodeRef::Calculator(i)
            | NodeRef::StatusHandler(i)
            | NodeRef::GraphInputStream(i) => i,
        }
    }

    pub fn with_index(self, index: usize) -> NodeRef {
        match self {
            NodeRef::PacketGenerator(_) => NodeRef::PacketGenerator(index),
            NodeRef::Calculator(_) => NodeRef::Calculator(index),
            NodeRef::StatusHandler(_) => NodeRef::StatusHandler(index),
            NodeRef::GraphInputStream(_) => NodeRef::GraphInputStream(index),
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            NodeRef::PacketGenerator(_) => "Packet Generator",
            NodeRef::Calculator(_) => "Calculator",
            NodeRef::StatusHandler(_) => "Status Handler",
            NodeRef::GraphInputStream(_) => "Graph Input Stream",
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.type_name(), self.index())
    }
}

/// Human readable name of any node, including virtual ones.
pub fn debug_name(config: &GraphConfig, node: NodeRef) -> String {
    match node {
        NodeRef::PacketGenerator(i) => config.packet_generator[i].debug_name(),
        NodeRef::Calculator(i) => config.node[i].debug_name(),
        NodeRef::StatusHandler(i) => config.status_handler[i].debug_name(),
        NodeRef::GraphInputStream(i) => TagMap::create(&config.input_stream)
            .ok()
            .and_then(|map| map.names().get(i.wrapping_sub(config.node.len())).cloned())
            .unwrap_or_else(|| format!("[graph input stream {}]", i)),
    }
}

/// See `GraphConfig::canonical_node_name`.
pub fn canonical_node_name(config: &GraphConfig, index: usize) -> String {
    config.canonical_node_name(index)
}

// ── Node type info ──────────────────────────────────────────────────────────

/// Resolved contract and edge-table placement of one real node.
#[derive(Debug, Clone)]
pub struct NodeTypeInfo {
    pub node: NodeRef,
    pub contract: Contract,
    pub input_stream_base: usize,
    pub output_stream_base: usize,
    pub input_side_packet_base: usize,
    pub output_side_packet_base: usize,
    /// Calculators only: source calculators and graph input streams that
    /// transitively feed this node.
    pub ancestor_sources: BTreeSet<usize>,
}

impl NodeTypeInfo {
    fn new(node: NodeRef, contract: Contract) -> Self {
        NodeTypeInfo {
            node,
            contract,
            input_stream_base: 0,
            output_stream_base: 0,
            input_side_packet_base: 0,
            output_side_packet_base: 0,
            ancestor_sources: BTreeSet::new(),
        }
    }

    pub fn set_node_index(&mut self, index: usize) {
        self.node = self.node.with_index(index);
    }
}

/// Resolved nodes of each kind, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedNodes {
    pub generators: Vec<NodeTypeInfo>,
    pub calculators: Vec<NodeTypeInfo>,
    pub status_handlers: Vec<NodeTypeInfo>,
    /// Generators and calculators in the order side packets are linked:
    /// all generators then all calculators until sorted, interleaved after.
    pub order: Vec<NodeRef>,
}

impl ResolvedNodes {
    /// The generator or calculator `node` refers to.
    pub fn get_mut(&mut self, node: NodeRef) -> Option<&mut NodeTypeInfo> {
        match node {
            NodeRef::PacketGenerator(i) => self.generators.get_mut(i),
            NodeRef::Calculator(i) => self.calculators.get_mut(i),
            NodeRef::StatusHandler(i) => self.status_handlers.get_mut(i),
            NodeRef::GraphInputStream(_) => None,
        }
    }
}

// ── Resolution ──────────────────────────────────────────────────────────────

pub fn resolve_all(
    config: &GraphConfig,
    registry: &Registry,
    arena: &mut TypeArena,
) -> Result<ResolvedNodes, ValidationError> {
    let mut diags = Vec::new();
    let mut out = ResolvedNodes::default();
    for index in 0..config.packet_generator.len() {
        match resolve_generator(config, index, registry, arena) {
            Ok(info) => out.generators.push(info),
            Err(d) => diags.push(d),
        }
    }
    for index in 0..config.node.len() {
        match resolve_calculator(config, index, registry, arena) {
            Ok(info) => out.calculators.push(info),
            Err(d) => diags.push(d),
        }
    }
    for index in 0..config.status_handler.len() {
        match resolve_status_handler(config, index, registry, arena) {
            Ok(info) => out.status_handlers.push(info),
            Err(d) => diags.push(d),
        }
    }
    if diags.is_empty() {
        out.order = (0..out.generators.len())
            .map(NodeRef::PacketGenerator)
            .chain((0..out.calculators.len()).map(NodeRef::Calculator))
            .collect();
        Ok(out)
    } else {
        Err(ValidationError::new("node contract resolution failed", diags))
    }
}

pub fn resolve_calculator(
    config: &GraphConfig,
    index: usize,
    registry: &Registry,
    arena: &mut TypeArena,
) -> Result<NodeTypeInfo, Diagnostic> {
    let node = &config.node[index];
    let display = node.debug_name();
    let mut contract = build_contract(
        Declared {
            inputs: &node.input_stream,
            outputs: &node.output_stream,
            input_side_packets: &node.input_side_packet,
            output_side_packets: &node.output_side_packet,
        },
        node.options.clone(),
        &display,
        arena,
    )?;
    contract.node_name = canonical_node_name(config, index);
    contract.input_stream_handler = node
        .input_stream_handler
        .as_ref()
        .map(|h| h.input_stream_handler.clone());

    let mut used = HashSet::new();
    for info in &node.input_stream_info {
        let (tag, idx) = parse_tag_index(&info.tag_index).map_err(|e| {
            Diagnostic::error(ErrorKind::InvalidArgument, format!("input_stream_info: {}", e))
                .with_code(codes::E0107)
                .at_node(&display)
        })?;
        let id = contract.inputs.tag_map().get_id(&tag, idx).ok_or_else(|| {
            Diagnostic::error(
                ErrorKind::InvalidArgument,
                format!(
                    "Input stream with tag_index \"{}\" requested in InputStreamInfo but is \
                     not an input stream of the calculator.",
                    info.tag_index
                ),
            )
            .with_code(codes::E0104)
            .at_node(&display)
        })?;
        if !used.insert(id) {
            return Err(Diagnostic::error(
                ErrorKind::InvalidArgument,
                format!(
                    "Input stream with tag_index \"{}\" has more than one InputStreamInfo.",
                    info.tag_index
                ),
            )
            .with_code(codes::E0105)
            .at_node(&display));
        }
    }

    let mut type_urls = HashSet::new();
    for options in &node.node_options {
        if !type_urls.insert(options.type_url.as_str()) {
            return Err(Diagnostic::error(
                ErrorKind::InvalidArgument,
                format!(
                    "Options type: '{}' specified more than once for a single calculator \
                     node config.",
                    options.type_url
                ),
            )
            .with_code(codes::E0106)
            .at_node(&display));
        }
    }

    fill_contract(
        NodeKind::Calculator,
        &node.calculator,
        &display,
        &contract,
        registry,
        arena,
    )?;
    Ok(NodeTypeInfo::new(NodeRef::Calculator(index), contract))
}

pub fn resolve_generator(
    config: &GraphConfig,
    index: usize,
    registry: &Registry,
    arena: &mut TypeArena,
) -> Result<NodeTypeInfo, Diagnostic> {
    let node = &config.packet_generator[index];
    let display = node.debug_name();
    let contract = build_contract(
        Declared {
            input_side_packets: &node.input_side_packet,
            output_side_packets: &node.output_side_packet,
            ..Default::default()
        },
        node.options.clone(),
        &display,
        arena,
    )?;
    fill_contract(
        NodeKind::PacketGenerator,
        &node.packet_generator,
        &display,
        &contract,
        registry,
        arena,
    )?;
    Ok(NodeTypeInfo::new(NodeRef::PacketGenerator(index), contract))
}

pub fn resolve_status_handler(
    config: &GraphConfig,
    index: usize,
    registry: &Registry,
    arena: &mut TypeArena,
) -> Result<NodeTypeInfo, Diagnostic> {
    let node = &config.status_handler[index];
    let display = node.debug_name();
    let contract = build_contract(
        Declared {
            input_side_packets: &node.input_side_packet,
            ..Default::default()
        },
        node.options.clone(),
        &display,
        arena,
    )?;
    fill_contract(
        NodeKind::StatusHandler,
        &node.status_handler,
        &display,
        &contract,
        registry,
        arena,
    )?;
    Ok(NodeTypeInfo::new(NodeRef::StatusHandler(index), contract))
}

fn build_contract(
    declared: Declared<'_>,
    options: serde_json::Value,
    display: &str,
    arena: &mut TypeArena,
) -> Result<Contract, Diagnostic> {
    Contract::new(declared, options, arena).map_err(|(set, err)| {
        Diagnostic::error(
            ErrorKind::InvalidArgument,
            format!("invalid {} declaration {}", set, err),
        )
        .with_code(codes::E0107)
        .at_node(display)
    })
}

/// Run the registered filler, then check that no slot was left untyped.
fn fill_contract(
    kind: NodeKind,
    class: &str,
    display: &str,
    contract: &Contract,
    registry: &Registry,
    arena: &mut TypeArena,
) -> Result<(), Diagnostic> {
    let registered = registry.lookup(kind, class).ok_or_else(|| {
        let kind_name = match kind {
            NodeKind::Calculator => "Calculator",
            NodeKind::PacketGenerator => "PacketGenerator",
            NodeKind::StatusHandler => "StatusHandler",
        };
        Diagnostic::error(
            ErrorKind::NotFound,
            format!("Unable to find {} \"{}\"", kind_name, class),
        )
        .with_code(codes::E0101)
        .at_node(display)
    })?;
    let phase = registered.phase(kind);

    registered
        .fill(&mut ContractContext::new(contract, arena))
        .map_err(|message| {
            Diagnostic::error(ErrorKind::Unknown, format!("{}::{} failed", class, phase))
                .with_code(codes::E0102)
                .at_node(display)
                .with_cause(Diagnostic::error(ErrorKind::Unknown, message))
        })?;

    let checked: &[SlotSet] = match kind {
        // Calculator output side packets may stay untyped.
        NodeKind::Calculator => &[
            SlotSet::InputStreams,
            SlotSet::OutputStreams,
            SlotSet::InputSidePackets,
        ],
        NodeKind::PacketGenerator => &[SlotSet::InputSidePackets, SlotSet::OutputSidePackets],
        NodeKind::StatusHandler => &[SlotSet::InputSidePackets],
    };
    let causes: Vec<Diagnostic> = checked
        .iter()
        .filter_map(|&set| {
            let unset = contract.set(set).unset_slots(arena);
            (!unset.is_empty()).then(|| {
                Diagnostic::error(
                    ErrorKind::Unknown,
                    format!("For {}: no packet type set for {}", set, unset.join(", ")),
                )
            })
        })
        .collect();
    if causes.is_empty() {
        Ok(())
    } else {
        Err(Diagnostic::error(
            ErrorKind::Unknown,
            format!("{}::{} failed to validate", class, phase),
        )
        .with_code(codes::E0103)
        .at_node(display)
        .with_causes(causes))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputStreamInfo, NodeConfig, TypedOptions};
    use crate::packet_type::PacketTypeDecl;

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.load_manifest_str(
            r#"{
                "calculators": {
                    "Pass": { "inputs": { "*": "any" }, "outputs": { "*": "same_as:*" } }
                },
                "packet_generators": { "Seed": { "output_side_packets": { "*": "int" } } }
            }"#,
            "test.json",
        )
        .unwrap();
        reg.register_calculator("Lazy", |cc: &mut ContractContext<'_>| -> Result<(), String> {
            cc.set_tag(SlotSet::InputStreams, "", &PacketTypeDecl::any());
            Ok(())
        })
        .unwrap();
        reg.register_legacy_calculator("Old", |_: &mut ContractContext<'_>| -> Result<(), String> {
            Err("options missing".to_string())
        })
        .unwrap();
        reg
    }

    fn calc(calculator: &str, inputs: &[&str], outputs: &[&str]) -> NodeConfig {
        NodeConfig {
            calculator: calculator.to_string(),
            input_stream: inputs.iter().map(|s| s.to_string()).collect(),
            output_stream: outputs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn resolve_one(node: NodeConfig) -> Result<NodeTypeInfo, Diagnostic> {
        let cfg = GraphConfig {
            node: vec![node],
            ..Default::default()
        };
        resolve_calculator(&cfg, 0, &registry(), &mut TypeArena::new())
    }

    #[test]
    fn resolves_and_names_calculator() {
        let info = resolve_one(calc("Pass", &["a"], &["b"])).unwrap();
        assert_eq!(info.node, NodeRef::Calculator(0));
        assert_eq!(info.contract.node_name, "Pass");
        assert_eq!(info.contract.inputs.len(), 1);
    }

    #[test]
    fn unknown_calculator_is_not_found() {
        let err = resolve_one(calc("Missing", &[], &["b"])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "Unable to find Calculator \"Missing\"");
        assert_eq!(
            err.location.node.as_deref(),
            Some("[Missing, no input streams, and output stream: b]")
        );
    }

    #[test]
    fn filler_failure_names_phase() {
        let err = resolve_one(calc("Old", &[], &[])).unwrap_err();
        assert_eq!(err.message, "Old::FillExpectations failed");
        assert_eq!(err.causes[0].message, "options missing");
    }

    #[test]
    fn untyped_slots_are_reported_per_set() {
        let err = resolve_one(calc("Lazy", &["a"], &["b", "c"])).unwrap_err();
        assert_eq!(err.code, Some(codes::E0103));
        assert_eq!(err.message, "Lazy::GetContract failed to validate");
        assert_eq!(err.causes.len(), 1);
        assert_eq!(
            err.causes[0].message,
            "For output streams: no packet type set for :0, :1"
        );
    }

    #[test]
    fn calculator_output_side_packets_are_not_checked_for_types() {
        let mut node = calc("Lazy", &["a"], &[]);
        node.output_side_packet = vec!["s".into()];
        let info = resolve_one(node).unwrap();
        assert_eq!(info.contract.output_side_packets.len(), 1);

        let mut node = calc("Lazy", &["a"], &[]);
        node.input_side_packet = vec!["s".into()];
        let err = resolve_one(node).unwrap_err();
        assert_eq!(
            err.causes[0].message,
            "For input side packets: no packet type set for :0"
        );
    }

    #[test]
    fn input_stream_info_must_name_an_input() {
        let mut node = calc("Pass", &["a"], &["b"]);
        node.input_stream_info = vec![InputStreamInfo {
            tag_index: "LOOP".into(),
            back_edge: true,
        }];
        let err = resolve_one(node).unwrap_err();
        assert_eq!(err.code, Some(codes::E0104));

        let mut node = calc("Pass", &["a"], &["b"]);
        node.input_stream_info = vec![
            InputStreamInfo {
                tag_index: ":0".into(),
                back_edge: true,
            },
            InputStreamInfo {
                tag_index: "".into(),
                back_edge: false,
            },
        ];
        let err = resolve_one(node).unwrap_err();
        assert_eq!(err.code, Some(codes::E0105));
    }

    #[test]
    fn repeated_option_type_rejected() {
        let mut node = calc("Pass", &[], &[]);
        let opts = TypedOptions {
            type_url: "type.example/Opts".into(),
            value: serde_json::Value::Null,
        };
        node.node_options = vec![opts.clone(), opts];
        let err = resolve_one(node).unwrap_err();
        assert_eq!(err.code, Some(codes::E0106));
    }

    #[test]
    fn resolve_all_collects_every_failure() {
        let cfg = GraphConfig {
            node: vec![calc("Missing", &[], &[]), calc("Pass", &[], &[]), calc("Old", &[], &[])],
            packet_generator: vec![crate::config::GeneratorConfig {
                packet_generator: "Nope".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = resolve_all(&cfg, &registry(), &mut TypeArena::new()).unwrap_err();
        assert_eq!(err.diagnostics.len(), 3);
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.diagnostics[0].message.contains("PacketGenerator \"Nope\""));
    }

    #[test]
    fn graph_input_stream_debug_name() {
        let cfg = GraphConfig {
            node: vec![calc("Pass", &["in"], &["out"])],
            input_stream: vec!["in".into()],
            ..Default::default()
        };
        assert_eq!(debug_name(&cfg, NodeRef::GraphInputStream(1)), "in");
        assert_eq!(NodeRef::GraphInputStream(1).to_string(), "Graph Input Stream 1");
    }
}
