// validated.rs — The validated graph: pass orchestration and queries
//
// Runs the validation passes over a graph declaration and keeps the
// resulting read-only tables: nodes in dependency order, linked edge tables
// and resolved packet types.
//
// Preconditions: every node type referenced by the config is registered.
// Postconditions: on success generators and calculators are in dependency
//                 order, every input stream is linked, every link is
//                 type-consistent and ancestor sources are computed.
// Failure modes: aggregated `ValidationError` (see each pass module).
// Side effects: tracing events; no I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::config::{perform_basic_transforms, GraphConfig, NoSubgraphs, SubgraphExpander};
use crate::diag::{codes, combine, Diagnostic, ErrorKind, ValidationError};
use crate::edges::{BuildPass, EdgeInfo, EdgeTables};
use crate::executor::validate_executors;
use crate::node::{debug_name, resolve_all, NodeRef, NodeTypeInfo, ResolvedNodes};
use crate::packet_type::{Packet, PacketTypeDecl, TypeArena};
use crate::pass::{descriptor, PassId, PassTiming};
use crate::registry::Registry;
use crate::typecheck::{resolve_any_types, validate_side_packet_types, validate_stream_types};

/// A graph that passed validation. Immutable once built.
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    config: GraphConfig,
    arena: TypeArena,
    nodes: ResolvedNodes,
    edges: EdgeTables,
    sorted: bool,
    fingerprint: [u8; 32],
    timings: Vec<PassTiming>,
}

fn timed<T>(timings: &mut Vec<PassTiming>, pass: PassId, f: impl FnOnce() -> T) -> T {
    let _span = tracing::debug_span!("pass", name = descriptor(pass).name).entered();
    let start = Instant::now();
    let out = f();
    timings.push(PassTiming {
        pass,
        elapsed: start.elapsed(),
    });
    out
}

fn build_edges(
    config: &GraphConfig,
    nodes: &mut ResolvedNodes,
    edges: &mut EdgeTables,
    arena: &mut TypeArena,
    pass: BuildPass,
) -> Result<bool, Diagnostic> {
    let side_packets = edges.build_side_packets(config, nodes, pass)?;
    let streams = edges.build_streams(config, &mut nodes.calculators, arena, pass)?;
    Ok(side_packets || streams)
}

impl ValidatedGraph {
    /// Validate a graph whose nodes need no subgraph expansion.
    pub fn initialize(input: &GraphConfig, registry: &Registry) -> Result<Self, ValidationError> {
        Self::initialize_with(input, registry, &NoSubgraphs)
    }

    pub fn initialize_with(
        input: &GraphConfig,
        registry: &Registry,
        expander: &dyn SubgraphExpander,
    ) -> Result<Self, ValidationError> {
        let _span = tracing::debug_span!(
            "validate",
            calculators = input.node.len(),
            generators = input.packet_generator.len()
        )
        .entered();
        let mut timings = Vec::new();

        let mut config = timed(&mut timings, PassId::BasicTransforms, || {
            perform_basic_transforms(input, expander)
        })?;

        let mut arena = TypeArena::new();
        let mut nodes = timed(&mut timings, PassId::ResolveContracts, || {
            resolve_all(&config, registry, &mut arena)
        })?;
        let contract_slots = arena.len();

        let mut edges = EdgeTables::default();
        let needs_sort = timed(&mut timings, PassId::BuildEdges, || {
            build_edges(&config, &mut nodes, &mut edges, &mut arena, BuildPass::Initial)
        })?;

        if needs_sort {
            tracing::debug!("declaration order is not a dependency order, sorting");
            timed(&mut timings, PassId::Sort, || {
                sort_nodes(&mut config, &mut nodes, &edges)
            })?;
            edges.clear();
            arena.truncate(contract_slots);
            timed(&mut timings, PassId::RebuildEdges, || {
                build_edges(&config, &mut nodes, &mut edges, &mut arena, BuildPass::Final)
            })?;
        }

        timed(&mut timings, PassId::FillBackEdges, || {
            edges.fill_upstream_for_back_edges(&config)
        })?;

        timed(&mut timings, PassId::ResolveTypes, || {
            resolve_any_types(&edges.input_streams, &edges.output_streams, &mut arena);
            resolve_any_types(&edges.input_side_packets, &edges.output_side_packets, &mut arena);
        });

        timed(&mut timings, PassId::ValidateTypes, || -> Result<(), ValidationError> {
            validate_side_packet_types(
                &config,
                &edges.input_side_packets,
                &edges.output_side_packets,
                &arena,
            )?;
            validate_stream_types(&config, &edges.input_streams, &edges.output_streams, &arena)
        })?;

        timed(&mut timings, PassId::SourceDependence, || {
            compute_source_dependence(&mut nodes.calculators, &edges)
        })?;

        timed(&mut timings, PassId::ValidateExecutors, || validate_executors(&config))?;

        for warning in &edges.warnings {
            tracing::warn!(code = ?warning.code, "{}", warning.message);
        }

        let fingerprint = compute_fingerprint(&config)?;
        tracing::info!(
            calculators = nodes.calculators.len(),
            generators = nodes.generators.len(),
            sorted = needs_sort,
            "graph validated"
        );
        Ok(ValidatedGraph {
            config,
            arena,
            nodes,
            edges,
            sorted: needs_sort,
            fingerprint,
            timings,
        })
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// The canonical configuration: transformed and in dependency order.
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn generators(&self) -> &[NodeTypeInfo] {
        &self.nodes.generators
    }

    pub fn calculators(&self) -> &[NodeTypeInfo] {
        &self.nodes.calculators
    }

    pub fn status_handlers(&self) -> &[NodeTypeInfo] {
        &self.nodes.status_handlers
    }

    pub fn input_streams(&self) -> &[EdgeInfo] {
        &self.edges.input_streams
    }

    pub fn output_streams(&self) -> &[EdgeInfo] {
        &self.edges.output_streams
    }

    pub fn input_side_packets(&self) -> &[EdgeInfo] {
        &self.edges.input_side_packets
    }

    pub fn output_side_packets(&self) -> &[EdgeInfo] {
        &self.edges.output_side_packets
    }

    pub fn arena(&self) -> &TypeArena {
        &self.arena
    }

    /// Names of the side packets the caller must supply, sorted.
    pub fn required_side_packets(&self) -> impl Iterator<Item = &str> {
        self.edges.required_side_packets.keys().map(String::as_str)
    }

    /// Non-fatal findings, such as unnecessary back-edge annotations.
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.edges.warnings
    }

    /// Whether the declaration order had to be sorted.
    pub fn was_sorted(&self) -> bool {
        self.sorted
    }

    pub fn timings(&self) -> &[PassTiming] {
        &self.timings
    }

    pub fn canonical_node_name(&self, index: usize) -> String {
        self.config.canonical_node_name(index)
    }

    pub fn debug_name(&self, node: NodeRef) -> String {
        debug_name(&self.config, node)
    }

    /// SHA-256 of the canonical configuration JSON.
    pub fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint
    }

    pub fn fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.fingerprint)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Concrete type of a side packet, from its producer or else any
    /// consumer.
    pub fn registered_side_packet_type_name(&self, name: &str) -> Result<String, Diagnostic> {
        let mut defined = false;
        if let Some(&producer) = self.edges.side_packet_to_producer.get(name) {
            defined = true;
            let output = &self.edges.output_side_packets[producer];
            if let Some(t) = self.arena.registered_type_name(output.packet_type) {
                return Ok(t.to_string());
            }
        }
        for input in self.edges.input_side_packets.iter().filter(|e| e.name == name) {
            defined = true;
            if let Some(t) = self.arena.registered_type_name(input.packet_type) {
                return Ok(t.to_string());
            }
        }
        if !defined {
            return Err(Diagnostic::error(
                ErrorKind::InvalidArgument,
                format!("Side packet \"{}\" is not defined in the config.", name),
            )
            .with_code(codes::E0503)
            .at_edge(name));
        }
        Err(undeterminable("side packet", name))
    }

    /// Concrete type of a stream, from its producer or else any consumer.
    pub fn registered_stream_type_name(&self, name: &str) -> Result<String, Diagnostic> {
        let producer = *self.edges.stream_to_producer.get(name).ok_or_else(|| {
            Diagnostic::error(
                ErrorKind::InvalidArgument,
                format!("Stream \"{}\" is not defined in the config.", name),
            )
            .with_code(codes::E0503)
            .at_edge(name)
        })?;
        let output = &self.edges.output_streams[producer];
        if let Some(t) = self.arena.registered_type_name(output.packet_type) {
            return Ok(t.to_string());
        }
        self.edges
            .input_streams
            .iter()
            .filter(|e| e.upstream == Some(producer))
            .find_map(|e| self.arena.registered_type_name(e.packet_type))
            .map(str::to_string)
            .ok_or_else(|| undeterminable("stream", name))
    }

    /// Check externally supplied side packets against every consumer.
    pub fn validate_required_side_packets(
        &self,
        side_packets: &BTreeMap<String, Packet>,
    ) -> Result<(), ValidationError> {
        let mut diags = Vec::new();
        for (name, consumers) in &self.edges.required_side_packets {
            let Some(packet) = side_packets.get(name) else {
                diags.push(missing_side_packet(name));
                continue;
            };
            for &index in consumers {
                let slot = self.edges.input_side_packets[index].packet_type;
                if let Err(message) = self.arena.validate_packet(slot, packet) {
                    diags.push(
                        Diagnostic::error(
                            ErrorKind::InvalidArgument,
                            format!("Side packet \"{}\" failed validation: {}", name, message),
                        )
                        .with_code(codes::E0502)
                        .at_node(debug_name(&self.config, self.edges.input_side_packets[index].parent_node))
                        .at_edge(name),
                    );
                }
            }
        }
        combine("ValidateRequiredSidePackets failed to validate", diags)
    }

    /// Like `validate_required_side_packets`, with declared types instead of
    /// values.
    pub fn validate_required_side_packet_types(
        &self,
        side_packet_types: &BTreeMap<String, PacketTypeDecl>,
    ) -> Result<(), ValidationError> {
        let mut diags = Vec::new();
        for (name, consumers) in &self.edges.required_side_packets {
            let Some(decl) = side_packet_types.get(name) else {
                diags.push(missing_side_packet(name));
                continue;
            };
            let mismatch = consumers.iter().any(|&index| {
                !self
                    .arena
                    .is_consistent_with_spec(self.edges.input_side_packets[index].packet_type, &decl.spec)
            });
            if mismatch {
                diags.push(
                    Diagnostic::error(
                        ErrorKind::Unknown,
                        format!("Side packet \"{}\" has incorrect type.", name),
                    )
                    .with_code(codes::E0502)
                    .at_edge(name),
                );
            }
        }
        combine("ValidateRequiredSidePacketTypes failed to validate", diags)
    }

    // ── Summary ─────────────────────────────────────────────────────────

    pub fn summary(&self) -> GraphSummary {
        let node_summary = |info: &NodeTypeInfo, class: &str| NodeSummary {
            index: info.node.index(),
            name: debug_name(&self.config, info.node),
            node_type: class.to_string(),
            sources: info.ancestor_sources.iter().copied().collect(),
        };
        let streams = self
            .edges
            .output_streams
            .iter()
            .enumerate()
            .map(|(index, output)| StreamSummary {
                name: output.name.clone(),
                packet_type: self.arena.debug_type_name(output.packet_type),
                producer: debug_name(&self.config, output.parent_node),
                consumers: self
                    .edges
                    .input_streams
                    .iter()
                    .filter(|e| e.upstream == Some(index))
                    .map(|e| {
                        let name = debug_name(&self.config, e.parent_node);
                        if e.back_edge {
                            format!("{} (back edge)", name)
                        } else {
                            name
                        }
                    })
                    .collect(),
            })
            .collect();
        let side_packets = self
            .edges
            .output_side_packets
            .iter()
            .enumerate()
            .map(|(index, output)| StreamSummary {
                name: output.name.clone(),
                packet_type: self.arena.debug_type_name(output.packet_type),
                producer: debug_name(&self.config, output.parent_node),
                consumers: self
                    .edges
                    .input_side_packets
                    .iter()
                    .filter(|e| e.upstream == Some(index))
                    .map(|e| debug_name(&self.config, e.parent_node))
                    .collect(),
            })
            .collect();
        GraphSummary {
            fingerprint: self.fingerprint_hex(),
            sorted: self.sorted,
            generators: self
                .config
                .packet_generator
                .iter()
                .zip(&self.nodes.generators)
                .map(|(c, info)| node_summary(info, &c.packet_generator))
                .collect(),
            calculators: self
                .config
                .node
                .iter()
                .zip(&self.nodes.calculators)
                .map(|(c, info)| node_summary(info, &c.calculator))
                .collect(),
            status_handlers: self
                .config
                .status_handler
                .iter()
                .zip(&self.nodes.status_handlers)
                .map(|(c, info)| node_summary(info, &c.status_handler))
                .collect(),
            streams,
            side_packets,
            required_side_packets: self.required_side_packets().map(str::to_string).collect(),
            executors: self
                .config
                .executor
                .iter()
                .map(|e| if e.name.is_empty() { "(default)".to_string() } else { e.name.clone() })
                .collect(),
            warnings: self.edges.warnings.iter().map(|w| w.message.clone()).collect(),
        }
    }
}

fn undeterminable(what: &str, name: &str) -> Diagnostic {
    Diagnostic::error(
        ErrorKind::Unknown,
        format!(
            "Unable to find the type for {} \"{}\".  It may be set to AnyType or something else \
             that isn't determinable, or the type may be defined but not registered.",
            what, name
        ),
    )
    .with_code(codes::E0504)
    .at_edge(name)
}

fn missing_side_packet(name: &str) -> Diagnostic {
    Diagnostic::error(
        ErrorKind::InvalidArgument,
        format!("Side packet \"{}\" is required but was not provided.", name),
    )
    .with_code(codes::E0501)
    .at_edge(name)
}

// ── Sorting ────────────────────────────────────────────────────────────────

fn node_for_sorter_index(index: usize, num_generators: usize) -> NodeRef {
    if index < num_generators {
        NodeRef::PacketGenerator(index)
    } else {
        NodeRef::Calculator(index - num_generators)
    }
}

/// Reorder generators and calculators (and their config records) into
/// dependency order and renumber them. `nodes.order` records the
/// interleaved order the sorter chose.
fn sort_nodes(
    config: &mut GraphConfig,
    nodes: &mut ResolvedNodes,
    edges: &EdgeTables,
) -> Result<(), Diagnostic> {
    let num_generators = nodes.generators.len();
    let sorter = edges.dependency_sorter(num_generators, nodes.calculators.len());
    let order = sorter.sort().map_err(|cycle| {
        let indexes: Vec<String> = cycle.iter().map(|i| i.to_string()).collect();
        let names: Vec<String> = cycle
            .iter()
            .map(|&i| debug_name(config, node_for_sorter_index(i, num_generators)))
            .collect();
        Diagnostic::error(
            ErrorKind::Unknown,
            format!(
                "Generator side packet cycle or calculator stream cycle detected in graph. \
                 Cycle indexes: {} ({})",
                indexes.join(", "),
                names.join(" -> ")
            ),
        )
        .with_code(codes::E0205)
        .with_hint("mark one input stream of the cycle as a back edge in input_stream_info")
    })?;

    let mut old_generators: Vec<Option<NodeTypeInfo>> =
        std::mem::take(&mut nodes.generators).into_iter().map(Some).collect();
    let mut old_calculators: Vec<Option<NodeTypeInfo>> =
        std::mem::take(&mut nodes.calculators).into_iter().map(Some).collect();
    let mut generator_configs = Vec::with_capacity(old_generators.len());
    let mut node_configs = Vec::with_capacity(old_calculators.len());
    nodes.order.clear();

    for sorter_index in order {
        let taken = match node_for_sorter_index(sorter_index, num_generators) {
            NodeRef::PacketGenerator(i) => {
                generator_configs.push(std::mem::take(&mut config.packet_generator[i]));
                old_generators[i].take().map(|info| (info, nodes.generators.len()))
            }
            NodeRef::Calculator(i) => {
                node_configs.push(std::mem::take(&mut config.node[i]));
                old_calculators[i].take().map(|info| (info, nodes.calculators.len()))
            }
            other => return Err(Diagnostic::internal(format!("{} in sorter output", other))),
        };
        let (mut info, new_index) = taken.ok_or_else(|| {
            Diagnostic::internal(format!("sorter emitted index {} twice", sorter_index))
        })?;
        tracing::trace!(from = %info.node, to = new_index, "reordered");
        info.set_node_index(new_index);
        nodes.order.push(info.node);
        match info.node {
            NodeRef::PacketGenerator(_) => nodes.generators.push(info),
            _ => nodes.calculators.push(info),
        }
    }
    config.packet_generator = generator_configs;
    config.node = node_configs;
    for (index, info) in nodes.calculators.iter_mut().enumerate() {
        info.contract.node_name = config.canonical_node_name(index);
    }
    Ok(())
}

// ── Source dependence ──────────────────────────────────────────────────────

/// Calculators without input streams are their own source; others inherit
/// the sources of their producers, and graph input streams count as the
/// virtual source that produced them.
fn compute_source_dependence(
    calculators: &mut [NodeTypeInfo],
    edges: &EdgeTables,
) -> Result<(), Diagnostic> {
    for node_index in 0..calculators.len() {
        let info = &calculators[node_index];
        let mut sources = BTreeSet::new();
        if info.contract.inputs.is_empty() {
            sources.insert(node_index);
        }
        let range = info.input_stream_base..info.input_stream_base + info.contract.inputs.len();
        for stream_index in range {
            let input = edges.input_streams.get(stream_index).ok_or_else(|| {
                Diagnostic::internal(format!(
                    "Unable to find input streams for non-source node with index {} tried to use {}",
                    node_index, stream_index
                ))
            })?;
            let upstream = input.upstream.ok_or_else(|| {
                Diagnostic::internal(format!(
                    "input stream \"{}\" is not connected to an output stream.",
                    input.name
                ))
            })?;
            match edges.output_streams[upstream].parent_node {
                NodeRef::GraphInputStream(virtual_index) => {
                    sources.insert(virtual_index);
                }
                NodeRef::Calculator(producer) => {
                    sources.extend(calculators[producer].ancestor_sources.iter().copied());
                }
                other => {
                    return Err(Diagnostic::internal(format!(
                        "output stream \"{}\" is owned by {}",
                        input.name, other
                    )))
                }
            }
        }
        calculators[node_index].ancestor_sources = sources;
    }
    Ok(())
}

// ── Fingerprint ────────────────────────────────────────────────────────────

fn compute_fingerprint(config: &GraphConfig) -> Result<[u8; 32], Diagnostic> {
    use sha2::{Digest, Sha256};

    let canonical = config
        .to_canonical_json()
        .map_err(|e| Diagnostic::internal(format!("cannot serialize config: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    Ok(hash)
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

// ── Summary ────────────────────────────────────────────────────────────────

/// Serializable overview of a validated graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSummary {
    pub fingerprint: String,
    pub sorted: bool,
    pub generators: Vec<NodeSummary>,
    pub calculators: Vec<NodeSummary>,
    pub status_handlers: Vec<NodeSummary>,
    pub streams: Vec<StreamSummary>,
    pub side_packets: Vec<StreamSummary>,
    pub required_side_packets: Vec<String>,
    pub executors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub index: usize,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<usize>,
}

/// A stream or side packet with its producer and consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub packet_type: String,
    pub producer: String,
    pub consumers: Vec<String>,
}

impl fmt::Display for ValidatedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary();
        writeln!(
            f,
            "graph: {} generator(s), {} calculator(s), {} status handler(s){}",
            summary.generators.len(),
            summary.calculators.len(),
            summary.status_handlers.len(),
            if summary.sorted { " (sorted)" } else { "" }
        )?;
        let write_nodes = |f: &mut fmt::Formatter<'_>, title: &str, nodes: &[NodeSummary]| -> fmt::Result {
            if nodes.is_empty() {
                return Ok(());
            }
            writeln!(f, "{}:", title)?;
            for n in nodes {
                write!(f, "  {:>2}  {} ({})", n.index, n.name, n.node_type)?;
                if !n.sources.is_empty() {
                    let sources: Vec<String> = n.sources.iter().map(|s| s.to_string()).collect();
                    write!(f, "  sources={{{}}}", sources.join(", "))?;
                }
                writeln!(f)?;
            }
            Ok(())
        };
        write_nodes(f, "generators", &summary.generators)?;
        write_nodes(f, "calculators", &summary.calculators)?;
        write_nodes(f, "status handlers", &summary.status_handlers)?;
        let write_edges = |f: &mut fmt::Formatter<'_>, title: &str, edges: &[StreamSummary]| -> fmt::Result {
            if edges.is_empty() {
                return Ok(());
            }
            writeln!(f, "{}:", title)?;
            for e in edges {
                let consumers = if e.consumers.is_empty() {
                    "(none)".to_string()
                } else {
                    e.consumers.join(", ")
                };
                writeln!(f, "  {}: {}  {} -> {}", e.name, e.packet_type, e.producer, consumers)?;
            }
            Ok(())
        };
        write_edges(f, "streams", &summary.streams)?;
        write_edges(f, "side packets", &summary.side_packets)?;
        if !summary.required_side_packets.is_empty() {
            writeln!(f, "required side packets: {}", summary.required_side_packets.join(", "))?;
        }
        writeln!(f, "executors: {}", summary.executors.join(", "))?;
        for w in &summary.warnings {
            writeln!(f, "warning: {}", w)?;
        }
        write!(f, "fingerprint: {}", summary.fingerprint)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
