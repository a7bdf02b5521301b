// executor.rs — Executor declarations: normalization and validation
//
// Preconditions: `validate_executors` runs on a config that went through
//                `add_predefined_executor_configs`.
// Postconditions: on success every executor name is unique, none is
//                 reserved, and every node-referenced executor is declared.
// Failure modes: `InvalidArgument` diagnostics, aggregated.
// Side effects: none.

use std::collections::HashSet;

use crate::config::{ExecutorConfig, GraphConfig};
use crate::diag::{codes, combine, Diagnostic, ErrorKind, ValidationError};

/// `default`, `gpu` and anything starting with `__` are reserved.
pub fn is_reserved_executor_name(name: &str) -> bool {
    name == "default" || name == "gpu" || name.starts_with("__")
}

/// Turn graph-level `num_threads` into a default executor declaration and
/// make sure a default executor exists.
pub fn add_predefined_executor_configs(config: &mut GraphConfig) -> Result<(), Diagnostic> {
    let has_default = config.executor.iter().any(|e| e.name.is_empty());
    if has_default {
        if config.num_threads != 0 {
            return Err(Diagnostic::error(
                ErrorKind::InvalidArgument,
                "ExecutorConfig for the default executor and the graph-level num_threads \
                 field should not both be specified.",
            )
            .with_code(codes::E0404));
        }
        return Ok(());
    }
    let mut default = ExecutorConfig::default();
    if config.num_threads != 0 {
        default.options = serde_json::json!({ "num_threads": config.num_threads });
        config.num_threads = 0;
    }
    config.executor.push(default);
    Ok(())
}

pub fn validate_executors(config: &GraphConfig) -> Result<(), ValidationError> {
    let mut diags = Vec::new();
    let mut declared: HashSet<&str> = HashSet::new();
    for executor in &config.executor {
        if is_reserved_executor_name(&executor.name) {
            diags.push(reserved(&executor.name));
            continue;
        }
        if !declared.insert(executor.name.as_str()) {
            let message = if executor.name.is_empty() {
                "ExecutorConfig for the default executor is duplicate.".to_string()
            } else {
                format!("ExecutorConfig for \"{}\" is duplicate.", executor.name)
            };
            diags.push(
                Diagnostic::error(ErrorKind::InvalidArgument, message).with_code(codes::E0402),
            );
        }
    }
    for node in config.node.iter().filter(|n| !n.executor.is_empty()) {
        if is_reserved_executor_name(&node.executor) {
            diags.push(reserved(&node.executor).at_node(node.debug_name()));
        } else if !declared.contains(node.executor.as_str()) {
            diags.push(
                Diagnostic::error(
                    ErrorKind::InvalidArgument,
                    format!(
                        "The executor \"{}\" is not declared in an ExecutorConfig.",
                        node.executor
                    ),
                )
                .with_code(codes::E0403)
                .at_node(node.debug_name()),
            );
        }
    }
    combine("executor validation failed", diags)
}

fn reserved(name: &str) -> Diagnostic {
    Diagnostic::error(
        ErrorKind::InvalidArgument,
        format!("\"{}\" is a reserved executor name.", name),
    )
    .with_code(codes::E0401)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    fn executor(name: &str) -> ExecutorConfig {
        ExecutorConfig {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn reserved_names() {
        assert!(is_reserved_executor_name("default"));
        assert!(is_reserved_executor_name("gpu"));
        assert!(is_reserved_executor_name("__internal"));
        assert!(!is_reserved_executor_name("io"));
        assert!(!is_reserved_executor_name(""));
    }

    #[test]
    fn num_threads_becomes_default_executor() {
        let mut cfg = GraphConfig {
            num_threads: 3,
            ..Default::default()
        };
        add_predefined_executor_configs(&mut cfg).unwrap();
        assert_eq!(cfg.num_threads, 0);
        assert_eq!(cfg.executor.len(), 1);
        assert_eq!(cfg.executor[0].num_threads(), Some(3));
    }

    #[test]
    fn num_threads_with_default_executor_is_rejected() {
        let mut cfg = GraphConfig {
            num_threads: 3,
            executor: vec![executor("")],
            ..Default::default()
        };
        let err = add_predefined_executor_configs(&mut cfg).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert_eq!(err.code, Some(codes::E0404));
    }

    #[test]
    fn explicit_default_is_kept() {
        let mut cfg = GraphConfig {
            executor: vec![executor("io"), executor("")],
            ..Default::default()
        };
        add_predefined_executor_configs(&mut cfg).unwrap();
        assert_eq!(cfg.executor.len(), 2);
    }

    #[test]
    fn gpu_declaration_is_rejected() {
        let cfg = GraphConfig {
            executor: vec![executor(""), executor("gpu")],
            ..Default::default()
        };
        let err = validate_executors(&cfg).unwrap_err();
        assert!(err.has_code(codes::E0401));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn all_problems_are_reported() {
        let cfg = GraphConfig {
            executor: vec![executor(""), executor(""), executor("io"), executor("io")],
            node: vec![
                NodeConfig {
                    name: "a".into(),
                    calculator: "X".into(),
                    executor: "missing".into(),
                    ..Default::default()
                },
                NodeConfig {
                    name: "b".into(),
                    calculator: "X".into(),
                    executor: "__hidden".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let err = validate_executors(&cfg).unwrap_err();
        let messages: Vec<&str> = err.diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "ExecutorConfig for the default executor is duplicate.",
                "ExecutorConfig for \"io\" is duplicate.",
                "The executor \"missing\" is not declared in an ExecutorConfig.",
                "\"__hidden\" is a reserved executor name.",
            ]
        );
    }

    #[test]
    fn declared_reference_passes() {
        let cfg = GraphConfig {
            executor: vec![executor(""), executor("io")],
            node: vec![NodeConfig {
                calculator: "X".into(),
                executor: "io".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(validate_executors(&cfg).is_ok());
    }
}
