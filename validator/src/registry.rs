// registry.rs — Node contract registry
//
// Maps node type names to contract fillers, separately for calculators,
// packet generators and status handlers. Fillers are either closures
// registered programmatically or `NodeSignature`s loaded from JSON
// manifests.
//
// Preconditions: none.
// Postconditions: every registered name is unique per node kind.
// Failure modes: `RegistryError` for I/O, malformed manifests, duplicate
//                registrations and ports that cannot be expressed.
// Side effects: manifest loading reads files.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::contract::{ContractContext, SlotSet};
use crate::packet_type::{PacketTypeDecl, TypeExprError};

// ── Data types ──────────────────────────────────────────────────────────────

/// The three kinds of registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Calculator,
    PacketGenerator,
    StatusHandler,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Calculator => "calculator",
            NodeKind::PacketGenerator => "packet generator",
            NodeKind::StatusHandler => "status handler",
        })
    }
}

/// Fills a node's contract from its options and declared tag maps.
pub trait ContractFiller: Send + Sync {
    fn fill(&self, cc: &mut ContractContext<'_>) -> Result<(), String>;
}

impl<F> ContractFiller for F
where
    F: Fn(&mut ContractContext<'_>) -> Result<(), String> + Send + Sync,
{
    fn fill(&self, cc: &mut ContractContext<'_>) -> Result<(), String> {
        self(cc)
    }
}

/// A registered node type.
#[derive(Clone)]
pub struct RegisteredNode {
    filler: Arc<dyn ContractFiller>,
    /// Calculators registered through the legacy interface report
    /// `FillExpectations` instead of `GetContract`.
    pub legacy: bool,
    origin: String,
}

impl RegisteredNode {
    pub fn fill(&self, cc: &mut ContractContext<'_>) -> Result<(), String> {
        self.filler.fill(cc)
    }

    /// Name of the contract phase used in failure messages.
    pub fn phase(&self, kind: NodeKind) -> &'static str {
        if kind == NodeKind::Calculator && !self.legacy {
            "GetContract"
        } else {
            "FillExpectations"
        }
    }
}

impl fmt::Debug for RegisteredNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredNode")
            .field("legacy", &self.legacy)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Errors that can occur during registry loading.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{origin}: {message}")]
    Parse { origin: String, message: String },
    #[error("duplicate {kind} '{name}': first registered from {first}, redefined in {second}")]
    Duplicate {
        kind: NodeKind,
        name: String,
        first: String,
        second: String,
    },
    #[error("{origin}: {kind} '{name}': {message}")]
    InvalidPort {
        origin: String,
        kind: NodeKind,
        name: String,
        message: String,
    },
}

// ── Manifest signatures ─────────────────────────────────────────────────────

/// Port type in a manifest: a type expression or `same_as:TAG`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum PortType {
    Decl(PacketTypeDecl),
    /// Alias the input slot with the same index under this tag (`*` keeps
    /// the port's own tag).
    SameAs(String),
}

impl TryFrom<String> for PortType {
    type Error = TypeExprError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.strip_prefix("same_as:") {
            Some(tag) => Ok(PortType::SameAs(tag.trim().to_string())),
            None => s.parse().map(PortType::Decl),
        }
    }
}

/// Declarative contract of a node type: tag → port type per slot set.
/// The tag `*` matches every tag without its own entry; `""` is the
/// untagged group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSignature {
    #[serde(default)]
    pub inputs: BTreeMap<String, PortType>,
    #[serde(default)]
    pub outputs: BTreeMap<String, PortType>,
    #[serde(default)]
    pub input_side_packets: BTreeMap<String, PortType>,
    #[serde(default)]
    pub output_side_packets: BTreeMap<String, PortType>,
    #[serde(default)]
    pub legacy: bool,
}

impl NodeSignature {
    fn ports(&self, which: SlotSet) -> &BTreeMap<String, PortType> {
        match which {
            SlotSet::InputStreams => &self.inputs,
            SlotSet::OutputStreams => &self.outputs,
            SlotSet::InputSidePackets => &self.input_side_packets,
            SlotSet::OutputSidePackets => &self.output_side_packets,
        }
    }

    /// Reject port sets the node kind cannot have and aliases on inputs.
    fn check(&self, kind: NodeKind) -> Result<(), String> {
        let allowed: &[SlotSet] = match kind {
            NodeKind::Calculator => &SlotSet::ALL,
            NodeKind::PacketGenerator => {
                &[SlotSet::InputSidePackets, SlotSet::OutputSidePackets]
            }
            NodeKind::StatusHandler => &[SlotSet::InputSidePackets],
        };
        for which in SlotSet::ALL {
            let ports = self.ports(which);
            if !ports.is_empty() && !allowed.contains(&which) {
                return Err(format!("a {} cannot declare {}", kind, which));
            }
            if alias_source(which).is_none() {
                if let Some((tag, _)) = ports.iter().find(|(_, p)| matches!(p, PortType::SameAs(_))) {
                    return Err(format!("{} tag \"{}\" cannot use same_as", which, tag));
                }
            }
        }
        if self.legacy && kind != NodeKind::Calculator {
            return Err("only calculators can be marked legacy".to_string());
        }
        Ok(())
    }
}

/// Input set an output set may alias.
fn alias_source(which: SlotSet) -> Option<SlotSet> {
    match which {
        SlotSet::OutputStreams => Some(SlotSet::InputStreams),
        SlotSet::OutputSidePackets => Some(SlotSet::InputSidePackets),
        SlotSet::InputStreams | SlotSet::InputSidePackets => None,
    }
}

impl ContractFiller for NodeSignature {
    fn fill(&self, cc: &mut ContractContext<'_>) -> Result<(), String> {
        for which in SlotSet::ALL {
            let ports = self.ports(which);
            let tag_map = cc.tag_map(which).clone();
            for id in tag_map.ids() {
                let (tag, index) = tag_map
                    .tag_and_index(id)
                    .ok_or_else(|| format!("{} slot {} has no tag", which, id.0))?;
                let port = ports.get(tag).or_else(|| ports.get("*")).ok_or_else(|| {
                    if tag.is_empty() {
                        format!("untagged {} are not accepted", which)
                    } else {
                        format!("tag \"{}\" is not accepted for {}", tag, which)
                    }
                })?;
                match port {
                    PortType::Decl(decl) => cc.set(which, id, decl.clone()),
                    PortType::SameAs(target_tag) => {
                        let source = alias_source(which)
                            .ok_or_else(|| format!("{} cannot use same_as", which))?;
                        let target_tag = if target_tag == "*" { tag } else { target_tag.as_str() };
                        let target = cc
                            .tag_map(source)
                            .get_id(target_tag, index)
                            .ok_or_else(|| {
                                format!(
                                    "{} {}:{} mirrors {} {}:{}, which is not connected",
                                    which, tag, index, source, target_tag, index
                                )
                            })?;
                        cc.set_same_as(which, id, source, target)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(default)]
    calculators: BTreeMap<String, NodeSignature>,
    #[serde(default)]
    packet_generators: BTreeMap<String, NodeSignature>,
    #[serde(default)]
    status_handlers: BTreeMap<String, NodeSignature>,
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Contract provider queried by node kind and type name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    nodes: HashMap<(NodeKind, String), RegisteredNode>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            nodes: HashMap::new(),
        }
    }

    fn insert(
        &mut self,
        kind: NodeKind,
        name: &str,
        node: RegisteredNode,
    ) -> Result<(), RegistryError> {
        let key = (kind, name.to_string());
        if let Some(first) = self.nodes.get(&key) {
            return Err(RegistryError::Duplicate {
                kind,
                name: name.to_string(),
                first: first.origin.clone(),
                second: node.origin,
            });
        }
        self.nodes.insert(key, node);
        Ok(())
    }

    fn register_with(
        &mut self,
        kind: NodeKind,
        name: &str,
        legacy: bool,
        filler: impl ContractFiller + 'static,
    ) -> Result<(), RegistryError> {
        self.insert(
            kind,
            name,
            RegisteredNode {
                filler: Arc::new(filler),
                legacy,
                origin: "<code>".to_string(),
            },
        )
    }

    pub fn register_calculator(
        &mut self,
        name: &str,
        filler: impl ContractFiller + 'static,
    ) -> Result<(), RegistryError> {
        self.register_with(NodeKind::Calculator, name, false, filler)
    }

    /// Register a calculator whose contract comes from `FillExpectations`.
    pub fn register_legacy_calculator(
        &mut self,
        name: &str,
        filler: impl ContractFiller + 'static,
    ) -> Result<(), RegistryError> {
        self.register_with(NodeKind::Calculator, name, true, filler)
    }

    pub fn register_generator(
        &mut self,
        name: &str,
        filler: impl ContractFiller + 'static,
    ) -> Result<(), RegistryError> {
        self.register_with(NodeKind::PacketGenerator, name, false, filler)
    }

    pub fn register_status_handler(
        &mut self,
        name: &str,
        filler: impl ContractFiller + 'static,
    ) -> Result<(), RegistryError> {
        self.register_with(NodeKind::StatusHandler, name, false, filler)
    }

    /// Register a declarative signature.
    pub fn register_signature(
        &mut self,
        kind: NodeKind,
        name: &str,
        signature: NodeSignature,
    ) -> Result<(), RegistryError> {
        self.register_signature_from(kind, name, signature, "<code>")
    }

    fn register_signature_from(
        &mut self,
        kind: NodeKind,
        name: &str,
        signature: NodeSignature,
        origin: &str,
    ) -> Result<(), RegistryError> {
        signature
            .check(kind)
            .map_err(|message| RegistryError::InvalidPort {
                origin: origin.to_string(),
                kind,
                name: name.to_string(),
                message,
            })?;
        let legacy = signature.legacy;
        self.insert(
            kind,
            name,
            RegisteredNode {
                filler: Arc::new(signature),
                legacy,
                origin: origin.to_string(),
            },
        )
    }

    /// Load node signatures from a JSON manifest. Returns the number of
    /// node types registered.
    pub fn load_manifest(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.load_manifest_str(&text, &path.display().to_string())
    }

    pub fn load_manifest_str(&mut self, text: &str, origin: &str) -> Result<usize, RegistryError> {
        let manifest: Manifest =
            serde_json::from_str(text).map_err(|e| RegistryError::Parse {
                origin: origin.to_string(),
                message: e.to_string(),
            })?;
        let mut count = 0;
        for (kind, group) in [
            (NodeKind::Calculator, manifest.calculators),
            (NodeKind::PacketGenerator, manifest.packet_generators),
            (NodeKind::StatusHandler, manifest.status_handlers),
        ] {
            for (name, signature) in group {
                self.register_signature_from(kind, &name, signature, origin)?;
                count += 1;
            }
        }
        tracing::debug!(origin, count, "loaded registry manifest");
        Ok(count)
    }

    pub fn lookup(&self, kind: NodeKind, name: &str) -> Option<&RegisteredNode> {
        self.nodes.get(&(kind, name.to_string()))
    }

    /// Registered names of one kind, sorted.
    pub fn names(&self, kind: NodeKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .nodes
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{Contract, Declared};
    use crate::packet_type::TypeArena;

    const MANIFEST: &str = r#"{
        "calculators": {
            "PassThrough": { "inputs": { "*": "any" }, "outputs": { "*": "same_as:*" } },
            "IntSource": { "outputs": { "": "int" }, "legacy": true }
        },
        "packet_generators": {
            "Seed": { "output_side_packets": { "": "int" } }
        },
        "status_handlers": {
            "Report": { "input_side_packets": { "*": "any" } }
        }
    }"#;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn load_manifest_registers_every_kind() {
        let mut reg = Registry::new();
        let count = reg.load_manifest_str(MANIFEST, "test.json").unwrap();
        assert_eq!(count, 4);
        assert_eq!(reg.names(NodeKind::Calculator), vec!["IntSource", "PassThrough"]);
        assert!(reg.lookup(NodeKind::PacketGenerator, "Seed").is_some());
        assert!(reg.lookup(NodeKind::Calculator, "Seed").is_none());
        let legacy = reg.lookup(NodeKind::Calculator, "IntSource").unwrap();
        assert_eq!(legacy.phase(NodeKind::Calculator), "FillExpectations");
        let modern = reg.lookup(NodeKind::Calculator, "PassThrough").unwrap();
        assert_eq!(modern.phase(NodeKind::Calculator), "GetContract");
        assert_eq!(modern.phase(NodeKind::PacketGenerator), "FillExpectations");
    }

    #[test]
    fn duplicate_registration_error() {
        let mut reg = Registry::new();
        reg.load_manifest_str(MANIFEST, "a.json").unwrap();
        let err = reg.load_manifest_str(MANIFEST, "b.json").unwrap_err();
        match err {
            RegistryError::Duplicate { first, second, .. } => {
                assert_eq!(first, "a.json");
                assert_eq!(second, "b.json");
            }
            _ => panic!("expected Duplicate error, got: {}", err),
        }
    }

    #[test]
    fn malformed_type_is_a_parse_error() {
        let mut reg = Registry::new();
        let err = reg
            .load_manifest_str(r#"{"calculators": {"X": {"inputs": {"": "a b"}}}}"#, "bad.json")
            .unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }), "got: {}", err);
    }

    #[test]
    fn status_handler_outputs_rejected() {
        let mut reg = Registry::new();
        let err = reg
            .load_manifest_str(
                r#"{"status_handlers": {"X": {"outputs": {"": "int"}}}}"#,
                "bad.json",
            )
            .unwrap_err();
        match err {
            RegistryError::InvalidPort { message, .. } => {
                assert!(message.contains("cannot declare output streams"), "got: {}", message)
            }
            _ => panic!("expected InvalidPort error, got: {}", err),
        }
    }

    #[test]
    fn signature_fills_and_links_slots() {
        let mut reg = Registry::new();
        reg.load_manifest_str(MANIFEST, "test.json").unwrap();
        let mut arena = TypeArena::new();
        let inputs = strings(&["A:x", "B:y"]);
        let outputs = strings(&["A:x_out", "B:y_out"]);
        let contract = Contract::new(
            Declared {
                inputs: &inputs,
                outputs: &outputs,
                ..Default::default()
            },
            serde_json::Value::Null,
            &mut arena,
        )
        .unwrap();
        let node = reg.lookup(NodeKind::Calculator, "PassThrough").unwrap();
        node.fill(&mut ContractContext::new(&contract, &mut arena))
            .unwrap();
        let out_b = contract.outputs.get("B", 0).unwrap();
        let in_b = contract.inputs.get("B", 0).unwrap();
        assert_eq!(arena.root(out_b), in_b);
    }

    #[test]
    fn signature_rejects_unknown_tag() {
        let mut reg = Registry::new();
        reg.load_manifest_str(MANIFEST, "test.json").unwrap();
        let mut arena = TypeArena::new();
        let outputs = strings(&["EXTRA:x"]);
        let contract = Contract::new(
            Declared {
                outputs: &outputs,
                ..Default::default()
            },
            serde_json::Value::Null,
            &mut arena,
        )
        .unwrap();
        let node = reg.lookup(NodeKind::Calculator, "IntSource").unwrap();
        let err = node
            .fill(&mut ContractContext::new(&contract, &mut arena))
            .unwrap_err();
        assert!(err.contains("\"EXTRA\""), "got: {}", err);
    }

    #[test]
    fn closures_are_fillers() {
        let mut reg = Registry::new();
        reg.register_calculator("Custom", |cc: &mut ContractContext<'_>| -> Result<(), String> {
            if cc.options().get("fail").is_some() {
                return Err("asked to fail".to_string());
            }
            Ok(())
        })
        .unwrap();
        assert!(reg
            .register_calculator("Custom", |_: &mut ContractContext<'_>| -> Result<(), String> { Ok(()) })
            .is_err());
        assert_eq!(reg.len(), 1);
    }
}
