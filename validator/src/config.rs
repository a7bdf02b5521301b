// config.rs — Graph configuration records and basic transforms
//
// Serde model of a graph declaration: calculators ("node"), packet
// generators, status handlers, executors and the graph's own input/output
// streams. Field names follow the JSON form read by the CLI.
//
// Preconditions: none.
// Postconditions: `perform_basic_transforms` returns a copy with subgraphs
//                 expanded, a default executor present and graph-level input
//                 stream handlers pushed into nodes.
// Failure modes: subgraph expansion and executor normalization errors.
// Side effects: none.

use serde::{Deserialize, Serialize};

use crate::diag::{codes, Diagnostic, ErrorKind};
use crate::executor::add_predefined_executor_configs;

fn is_null(v: &serde_json::Value) -> bool {
    v.is_null()
}

// ── Records ─────────────────────────────────────────────────────────────────

/// A whole graph declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub node: Vec<NodeConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub packet_generator: Vec<GeneratorConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub status_handler: Vec<StatusHandlerConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub executor: Vec<ExecutorConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_stream: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_stream: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_stream_handler: Option<InputStreamHandlerConfig>,
    /// Thread count of the default executor; 0 means unspecified.
    #[serde(skip_serializing_if = "is_zero")]
    pub num_threads: u32,
    /// Graph type name, used when the graph is itself a subgraph.
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub graph_type: String,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// One calculator declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub calculator: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_stream: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_stream: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_side_packet: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_side_packet: Vec<String>,
    #[serde(skip_serializing_if = "is_null")]
    pub options: serde_json::Value,
    /// Typed option blobs, at most one per type URL.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub node_options: Vec<TypedOptions>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_stream_info: Vec<InputStreamInfo>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub executor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_stream_handler: Option<InputStreamHandlerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypedOptions {
    pub type_url: String,
    #[serde(skip_serializing_if = "is_null")]
    pub value: serde_json::Value,
}

/// Per-input annotation; `tag_index` is `TAG`, `TAG:index` or `:index`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputStreamInfo {
    pub tag_index: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub back_edge: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    pub packet_generator: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_side_packet: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_side_packet: Vec<String>,
    #[serde(skip_serializing_if = "is_null")]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatusHandlerConfig {
    pub status_handler: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_side_packet: Vec<String>,
    #[serde(skip_serializing_if = "is_null")]
    pub options: serde_json::Value,
}

/// An executor declaration; the empty name is the default executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub executor_type: String,
    #[serde(skip_serializing_if = "is_null")]
    pub options: serde_json::Value,
}

impl ExecutorConfig {
    pub fn num_threads(&self) -> Option<u64> {
        self.options.get("num_threads").and_then(|v| v.as_u64())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputStreamHandlerConfig {
    pub input_stream_handler: String,
    #[serde(skip_serializing_if = "is_null")]
    pub options: serde_json::Value,
}

// ── Debug names ─────────────────────────────────────────────────────────────

fn debug_edge_names(edge_type: &str, edges: &[String]) -> String {
    match edges {
        [] => format!("no {}s", edge_type),
        [one] => format!("{}: {}", edge_type, one),
        _ => format!("{}s: <{}>", edge_type, edges.join(",")),
    }
}

impl NodeConfig {
    /// Declared name, or a description built from type and streams.
    pub fn debug_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        format!(
            "[{}, {}, and {}]",
            self.calculator,
            debug_edge_names("input stream", &self.input_stream),
            debug_edge_names("output stream", &self.output_stream)
        )
    }
}

impl GeneratorConfig {
    pub fn debug_name(&self) -> String {
        format!(
            "[{}, {}, and {}]",
            self.packet_generator,
            debug_edge_names("input side packet", &self.input_side_packet),
            debug_edge_names("output side packet", &self.output_side_packet)
        )
    }
}

impl StatusHandlerConfig {
    pub fn debug_name(&self) -> String {
        format!(
            "[{}, {}]",
            self.status_handler,
            debug_edge_names("input side packet", &self.input_side_packet)
        )
    }
}

impl GraphConfig {
    pub fn from_json(text: &str) -> Result<GraphConfig, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Compact JSON with empty fields omitted.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Declared name of calculator `index`, or its type when unnamed, with
    /// an `_N` suffix when several calculators share that name.
    pub fn canonical_node_name(&self, index: usize) -> String {
        let base = |n: &NodeConfig| {
            if n.name.is_empty() {
                n.calculator.clone()
            } else {
                n.name.clone()
            }
        };
        let name = base(&self.node[index]);
        let mut count = 0;
        let mut sequence = 0;
        for (i, node) in self.node.iter().enumerate() {
            if base(node) == name {
                count += 1;
                if i < index {
                    sequence += 1;
                }
            }
        }
        if count <= 1 {
            name
        } else {
            format!("{}_{}", name, sequence + 1)
        }
    }
}

// ── Basic transforms ────────────────────────────────────────────────────────

/// Expands composite nodes in place before validation.
pub trait SubgraphExpander {
    fn expand(&self, config: &mut GraphConfig) -> Result<(), String>;
}

/// Expander for graphs without subgraphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSubgraphs;

impl SubgraphExpander for NoSubgraphs {
    fn expand(&self, _config: &mut GraphConfig) -> Result<(), String> {
        Ok(())
    }
}

/// Copy `input`, expand subgraphs, normalize executors and push the
/// graph-level input stream handler into nodes that declare none.
pub fn perform_basic_transforms(
    input: &GraphConfig,
    expander: &dyn SubgraphExpander,
) -> Result<GraphConfig, Diagnostic> {
    let mut config = input.clone();
    expander.expand(&mut config).map_err(|message| {
        Diagnostic::error(ErrorKind::Unknown, "subgraph expansion failed")
            .with_code(codes::E0901)
            .with_cause(Diagnostic::error(ErrorKind::Unknown, message))
    })?;
    add_predefined_executor_configs(&mut config)?;
    if let Some(handler) = config.input_stream_handler.clone() {
        for node in config.node.iter_mut().filter(|n| n.input_stream_handler.is_none()) {
            node.input_stream_handler = Some(handler.clone());
        }
    }
    Ok(config)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, calculator: &str) -> NodeConfig {
        NodeConfig {
            name: name.to_string(),
            calculator: calculator.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn parse_graph_json() {
        let cfg = GraphConfig::from_json(
            r#"{
                "input_stream": ["in"],
                "node": [{
                    "calculator": "Pass",
                    "input_stream": ["in"],
                    "output_stream": ["out"],
                    "input_stream_info": [{"tag_index": ":0", "back_edge": true}]
                }],
                "num_threads": 4
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.node.len(), 1);
        assert!(cfg.node[0].input_stream_info[0].back_edge);
        assert_eq!(cfg.num_threads, 4);
        assert!(GraphConfig::from_json(r#"{"nodes": []}"#).is_err());
    }

    #[test]
    fn canonical_json_omits_empty_fields() {
        let cfg = GraphConfig {
            node: vec![node("", "Pass")],
            ..Default::default()
        };
        assert_eq!(
            cfg.to_canonical_json().unwrap(),
            r#"{"node":[{"calculator":"Pass"}]}"#
        );
    }

    #[test]
    fn debug_names() {
        let mut n = node("", "Adder");
        n.input_stream = vec!["a".into(), "b".into()];
        n.output_stream = vec!["sum".into()];
        assert_eq!(
            n.debug_name(),
            "[Adder, input streams: <a,b>, and output stream: sum]"
        );
        assert_eq!(node("named", "Adder").debug_name(), "named");
        let g = GeneratorConfig {
            packet_generator: "Seed".into(),
            output_side_packet: vec!["seed".into()],
            ..Default::default()
        };
        assert_eq!(
            g.debug_name(),
            "[Seed, no input side packets, and output side packet: seed]"
        );
        let s = StatusHandlerConfig {
            status_handler: "Report".into(),
            ..Default::default()
        };
        assert_eq!(s.debug_name(), "[Report, no input side packets]");
    }

    #[test]
    fn canonical_names_get_suffix_when_repeated() {
        let cfg = GraphConfig {
            node: vec![node("", "Pass"), node("solo", "Pass"), node("", "Pass")],
            ..Default::default()
        };
        assert_eq!(cfg.canonical_node_name(0), "Pass_1");
        assert_eq!(cfg.canonical_node_name(1), "solo");
        assert_eq!(cfg.canonical_node_name(2), "Pass_2");
    }

    #[test]
    fn graph_level_handler_is_pushed_into_nodes() {
        let own = InputStreamHandlerConfig {
            input_stream_handler: "Own".into(),
            ..Default::default()
        };
        let mut with_handler = node("b", "Pass");
        with_handler.input_stream_handler = Some(own.clone());
        let cfg = GraphConfig {
            node: vec![node("a", "Pass"), with_handler],
            input_stream_handler: Some(InputStreamHandlerConfig {
                input_stream_handler: "Graph".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let out = perform_basic_transforms(&cfg, &NoSubgraphs).unwrap();
        assert_eq!(
            out.node[0].input_stream_handler.as_ref().unwrap().input_stream_handler,
            "Graph"
        );
        assert_eq!(out.node[1].input_stream_handler, Some(own));
        assert_eq!(out.executor.len(), 1);
    }

    #[test]
    fn expander_failure_is_reported() {
        struct Failing;
        impl SubgraphExpander for Failing {
            fn expand(&self, _config: &mut GraphConfig) -> Result<(), String> {
                Err("no such subgraph: Inner".to_string())
            }
        }
        let err = perform_basic_transforms(&GraphConfig::default(), &Failing).unwrap_err();
        assert_eq!(err.code, Some(codes::E0901));
    }
}
