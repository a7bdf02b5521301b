// edges.rs — Flat stream and side-packet edge tables
//
// Turns every node's contract slots into four flat edge lists and links each
// input to the output that produces it. The build is idempotent: it runs
// once over declaration order and, when that order is not a valid
// dependency order, once more after sorting on freshly cleared tables.
//
// Preconditions: every node's contract is resolved.
// Postconditions (final pass): every output name has one producer; every
//                 non-back-edge input stream has an upstream; side packets
//                 without a producer are listed as required externally.
// Failure modes: duplicate producers always fail; a missing producer or a
//                side packet produced after use fails on the final pass and
//                requests a sort on the initial pass.
// Side effects: allocates one wildcard slot per graph input stream; records
//               unnecessary back-edge annotations as warnings.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::config::GraphConfig;
use crate::diag::{codes, Diagnostic, ErrorKind};
use crate::node::{debug_name, NodeRef, NodeTypeInfo, ResolvedNodes};
use crate::packet_type::{PacketTypeDecl, TypeArena, TypeSlotId};
use crate::tag_map::{parse_tag_index, TagMap};
use crate::topo::TopologicalSorter;

// ── Edge records ────────────────────────────────────────────────────────────

/// One occurrence of a stream or side packet on one node.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeInfo {
    pub name: String,
    pub parent_node: NodeRef,
    /// Shared with the node's contract; never copied.
    pub packet_type: TypeSlotId,
    /// Index into the opposite-direction list.
    pub upstream: Option<usize>,
    /// Input streams only.
    pub back_edge: bool,
}

/// Which build this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPass {
    /// Declaration order; ordering problems request a sort.
    Initial,
    /// Sorted order; ordering problems are errors.
    Final,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeTables {
    pub input_streams: Vec<EdgeInfo>,
    pub output_streams: Vec<EdgeInfo>,
    pub input_side_packets: Vec<EdgeInfo>,
    pub output_side_packets: Vec<EdgeInfo>,
    pub stream_to_producer: HashMap<String, usize>,
    pub side_packet_to_producer: HashMap<String, usize>,
    /// Side packets with no producer: name → consuming input side packets.
    pub required_side_packets: BTreeMap<String, Vec<usize>>,
    /// Non-fatal findings of the most recent build.
    pub warnings: Vec<Diagnostic>,
}

impl EdgeTables {
    pub fn clear(&mut self) {
        *self = EdgeTables::default();
    }

    // ── Side packets ────────────────────────────────────────────────────

    /// Generators and calculators in `nodes.order`, inputs before outputs;
    /// status handlers last and only when no sort is pending. Returns
    /// whether a sort is needed.
    pub fn build_side_packets(
        &mut self,
        config: &GraphConfig,
        nodes: &mut ResolvedNodes,
        pass: BuildPass,
    ) -> Result<bool, Diagnostic> {
        let mut needs_sort = false;
        for position in 0..nodes.order.len() {
            let node = nodes.order[position];
            let info = nodes
                .get_mut(node)
                .ok_or_else(|| Diagnostic::internal(format!("{} is not a resolved node", node)))?;
            self.add_input_side_packets(info);
            needs_sort |= self.add_output_side_packets(config, info, pass)?;
        }
        if needs_sort {
            return Ok(true);
        }
        for info in nodes.status_handlers.iter_mut() {
            self.add_input_side_packets(info);
        }
        Ok(false)
    }

    fn add_input_side_packets(&mut self, info: &mut NodeTypeInfo) {
        info.input_side_packet_base = self.input_side_packets.len();
        for (_, name, slot) in info.contract.input_side_packets.entries() {
            let upstream = self.side_packet_to_producer.get(name).copied();
            if upstream.is_none() {
                self.required_side_packets
                    .entry(name.to_string())
                    .or_default()
                    .push(self.input_side_packets.len());
            }
            self.input_side_packets.push(EdgeInfo {
                name: name.to_string(),
                parent_node: info.node,
                packet_type: slot,
                upstream,
                back_edge: false,
            });
        }
    }

    fn add_output_side_packets(
        &mut self,
        config: &GraphConfig,
        info: &mut NodeTypeInfo,
        pass: BuildPass,
    ) -> Result<bool, Diagnostic> {
        info.output_side_packet_base = self.output_side_packets.len();
        let mut needs_sort = false;
        for (_, name, slot) in info.contract.output_side_packets.entries() {
            let index = self.output_side_packets.len();
            self.output_side_packets.push(EdgeInfo {
                name: name.to_string(),
                parent_node: info.node,
                packet_type: slot,
                upstream: None,
                back_edge: false,
            });
            if let Some(&first) = self.side_packet_to_producer.get(name) {
                let first_node = self.output_side_packets[first].parent_node;
                return Err(Diagnostic::error(
                    ErrorKind::Unknown,
                    format!(
                        "Output Side Packet \"{}\" defined twice (by {} and {}).",
                        name,
                        debug_name(config, first_node),
                        debug_name(config, info.node)
                    ),
                )
                .with_code(codes::E0202)
                .at_edge(name));
            }
            self.side_packet_to_producer.insert(name.to_string(), index);
            if self.required_side_packets.contains_key(name) {
                match pass {
                    // Keep going: the sort needs every producer.
                    BuildPass::Initial => needs_sort = true,
                    BuildPass::Final => {
                        return Err(Diagnostic::error(
                            ErrorKind::Unknown,
                            format!("Side packet \"{}\" was produced after it was used.", name),
                        )
                        .with_code(codes::E0203)
                        .at_node(debug_name(config, info.node))
                        .at_edge(name));
                    }
                }
            }
        }
        Ok(needs_sort)
    }

    // ── Streams ─────────────────────────────────────────────────────────

    /// Graph input streams first, then each calculator's inputs before its
    /// outputs, so that a node feeding itself needs a back-edge annotation.
    /// Returns whether a sort is needed.
    pub fn build_streams(
        &mut self,
        config: &GraphConfig,
        calculators: &mut [NodeTypeInfo],
        arena: &mut TypeArena,
        pass: BuildPass,
    ) -> Result<bool, Diagnostic> {
        let graph_inputs = TagMap::create(&config.input_stream)
            .map_err(|e| malformed("graph input stream", e.to_string()))?;
        for (index, name) in graph_inputs.names().iter().enumerate() {
            let slot = arena.alloc(PacketTypeDecl::any());
            let node = NodeRef::GraphInputStream(index + calculators.len());
            self.add_output_stream(config, node, name, slot)?;
        }

        let mut needs_sort = false;
        for info in calculators.iter_mut() {
            needs_sort |= self.add_input_streams(config, info, pass)?;
            info.output_stream_base = self.output_streams.len();
            for (_, name, slot) in info.contract.outputs.entries() {
                self.add_output_stream(config, info.node, name, slot)?;
            }
        }

        TagMap::create(&config.output_stream)
            .map_err(|e| malformed("graph output stream", e.to_string()))?;
        Ok(needs_sort)
    }

    fn add_output_stream(
        &mut self,
        config: &GraphConfig,
        node: NodeRef,
        name: &str,
        slot: TypeSlotId,
    ) -> Result<(), Diagnostic> {
        let index = self.output_streams.len();
        self.output_streams.push(EdgeInfo {
            name: name.to_string(),
            parent_node: node,
            packet_type: slot,
            upstream: None,
            back_edge: false,
        });
        if let Some(&first) = self.stream_to_producer.get(name) {
            let first_node = self.output_streams[first].parent_node;
            return Err(Diagnostic::error(
                ErrorKind::Unknown,
                format!(
                    "Output Stream \"{}\" defined twice (by {} and {}).",
                    name,
                    debug_name(config, first_node),
                    debug_name(config, node)
                ),
            )
            .with_code(codes::E0201)
            .at_edge(name));
        }
        self.stream_to_producer.insert(name.to_string(), index);
        Ok(())
    }

    fn add_input_streams(
        &mut self,
        config: &GraphConfig,
        info: &mut NodeTypeInfo,
        pass: BuildPass,
    ) -> Result<bool, Diagnostic> {
        info.input_stream_base = self.input_streams.len();
        let node_index = info.node.index();
        let display = debug_name(config, info.node);

        let mut back_edges = HashSet::new();
        for annotation in config.node[node_index]
            .input_stream_info
            .iter()
            .filter(|a| a.back_edge)
        {
            let id = parse_tag_index(&annotation.tag_index)
                .ok()
                .and_then(|(tag, index)| info.contract.inputs.tag_map().get_id(&tag, index))
                .ok_or_else(|| {
                    Diagnostic::internal(format!(
                        "back edge \"{}\" of {} escaped contract validation",
                        annotation.tag_index, display
                    ))
                })?;
            back_edges.insert(id);
        }

        let mut needs_sort = false;
        for (id, name, slot) in info.contract.inputs.entries() {
            let back_edge = back_edges.contains(&id);
            let mut upstream = None;
            match (self.stream_to_producer.get(name), back_edge) {
                (Some(&producer), false) => upstream = Some(producer),
                (Some(_), true) => {
                    self.warnings.push(
                        Diagnostic::warning(format!(
                            "Input Stream \"{}\" for node {} (sorted index {}) is marked as a \
                             back edge, but its output stream is already available. This \
                             means it was not necessary to mark it as a back edge.",
                            name, display, node_index
                        ))
                        .with_code(codes::W0201)
                        .at_node(&display)
                        .at_edge(name),
                    );
                }
                (None, true) => {
                    tracing::debug!(
                        stream = name,
                        node = node_index,
                        "back edge producer not yet seen, as expected"
                    );
                }
                (None, false) => match pass {
                    // Keep going: the sort needs every consumer.
                    BuildPass::Initial => needs_sort = true,
                    BuildPass::Final => {
                        return Err(Diagnostic::error(
                            ErrorKind::Unknown,
                            format!(
                                "Input Stream \"{}\" for node {} (sorted index {}) does not \
                                 have a corresponding output stream.",
                                name, display, node_index
                            ),
                        )
                        .with_code(codes::E0204)
                        .at_node(&display)
                        .at_edge(name));
                    }
                },
            }
            self.input_streams.push(EdgeInfo {
                name: name.to_string(),
                parent_node: info.node,
                packet_type: slot,
                upstream,
                back_edge,
            });
        }
        Ok(needs_sort)
    }

    // ── Ordering ────────────────────────────────────────────────────────

    /// Dependency graph over generators (`0..G`) and calculators
    /// (`G..G+C`). Back edges, graph input streams and status handlers add
    /// no edges. Producers are looked up by name since `upstream` is
    /// incomplete before sorting.
    pub fn dependency_sorter(&self, num_generators: usize, num_calculators: usize) -> TopologicalSorter {
        let sorter_index = |node: NodeRef| match node {
            NodeRef::PacketGenerator(i) => Some(i),
            NodeRef::Calculator(i) => Some(num_generators + i),
            NodeRef::StatusHandler(_) | NodeRef::GraphInputStream(_) => None,
        };
        let mut sorter = TopologicalSorter::new(num_generators + num_calculators);
        for input in self.input_streams.iter().filter(|e| !e.back_edge) {
            let Some(&producer) = self.stream_to_producer.get(&input.name) else {
                continue;
            };
            let from = sorter_index(self.output_streams[producer].parent_node);
            if let (Some(from), Some(to)) = (from, sorter_index(input.parent_node)) {
                tracing::trace!(stream = %input.name, from, to, "sort edge");
                sorter.add_edge(from, to);
            }
        }
        for input in &self.input_side_packets {
            let Some(&producer) = self.side_packet_to_producer.get(&input.name) else {
                continue;
            };
            let from = sorter_index(self.output_side_packets[producer].parent_node);
            if let (Some(from), Some(to)) = (from, sorter_index(input.parent_node)) {
                tracing::trace!(side_packet = %input.name, from, to, "sort edge");
                sorter.add_edge(from, to);
            }
        }
        sorter
    }

    /// Link back edges to their producers once every output is known.
    pub fn fill_upstream_for_back_edges(&mut self, config: &GraphConfig) -> Result<(), Diagnostic> {
        for input in self.input_streams.iter_mut().filter(|e| e.back_edge) {
            if input.upstream.is_some() {
                return Err(Diagnostic::internal(format!(
                    "back edge \"{}\" already has an upstream",
                    input.name
                )));
            }
            let producer = self.stream_to_producer.get(&input.name).ok_or_else(|| {
                Diagnostic::error(
                    ErrorKind::Unknown,
                    format!(
                        "Input Stream \"{}\" is marked as a back edge but no node produces it.",
                        input.name
                    ),
                )
                .with_code(codes::E0204)
                .at_node(debug_name(config, input.parent_node))
                .at_edge(&input.name)
            })?;
            input.upstream = Some(*producer);
        }
        Ok(())
    }
}

fn malformed(what: &str, detail: String) -> Diagnostic {
    Diagnostic::error(
        ErrorKind::InvalidArgument,
        format!("invalid {} declaration {}", what, detail),
    )
    .with_code(codes::E0107)
}

// ── Tests ───────────────────────────────────────────────────────────────────
