// pass.rs — Pass descriptor module: metadata, ordering, timings
//
// Declares the validation passes in execution order with their dependency
// edges. `ValidatedGraph::initialize` records a `PassTiming` per executed
// pass; the sort and rebuild passes only run when declaration order is not
// a dependency order.

use std::time::Duration;

// ── Pass identifiers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    BasicTransforms,
    ResolveContracts,
    BuildEdges,
    Sort,
    RebuildEdges,
    FillBackEdges,
    ResolveTypes,
    ValidateTypes,
    SourceDependence,
    ValidateExecutors,
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a validation pass.
pub struct PassDescriptor {
    /// Human-readable name for verbose output.
    pub name: &'static str,
    /// Passes whose results this pass consumes.
    pub inputs: &'static [PassId],
    /// What holds once the pass succeeds (documentation only).
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::BasicTransforms => PassDescriptor {
            name: "basic_transforms",
            inputs: &[],
            invariants: "subgraphs expanded, default executor present",
        },
        PassId::ResolveContracts => PassDescriptor {
            name: "resolve_contracts",
            inputs: &[PassId::BasicTransforms],
            invariants: "every contract slot typed",
        },
        PassId::BuildEdges => PassDescriptor {
            name: "build_edges",
            inputs: &[PassId::ResolveContracts],
            invariants: "producers unique",
        },
        PassId::Sort => PassDescriptor {
            name: "sort",
            inputs: &[PassId::BuildEdges],
            invariants: "generators and calculators in dependency order",
        },
        PassId::RebuildEdges => PassDescriptor {
            name: "rebuild_edges",
            inputs: &[PassId::Sort],
            invariants: "every non-back-edge input linked",
        },
        PassId::FillBackEdges => PassDescriptor {
            name: "fill_back_edges",
            inputs: &[PassId::BuildEdges],
            invariants: "every input stream linked",
        },
        PassId::ResolveTypes => PassDescriptor {
            name: "resolve_types",
            inputs: &[PassId::FillBackEdges],
            invariants: "linked wildcards alias their counterpart",
        },
        PassId::ValidateTypes => PassDescriptor {
            name: "validate_types",
            inputs: &[PassId::ResolveTypes],
            invariants: "every link type-consistent",
        },
        PassId::SourceDependence => PassDescriptor {
            name: "source_dependence",
            inputs: &[PassId::FillBackEdges],
            invariants: "ancestor sources computed per calculator",
        },
        PassId::ValidateExecutors => PassDescriptor {
            name: "validate_executors",
            inputs: &[PassId::BasicTransforms],
            invariants: "executor references declared, none reserved",
        },
    }
}

/// All passes in execution order.
pub const ALL_PASSES: [PassId; 10] = [
    PassId::BasicTransforms,
    PassId::ResolveContracts,
    PassId::BuildEdges,
    PassId::Sort,
    PassId::RebuildEdges,
    PassId::FillBackEdges,
    PassId::ResolveTypes,
    PassId::ValidateTypes,
    PassId::SourceDependence,
    PassId::ValidateExecutors,
];

// ── Timings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct PassTiming {
    pub pass: PassId,
    pub elapsed: Duration,
}

impl PassTiming {
    pub fn name(&self) -> &'static str {
        descriptor(self.pass).name
    }

    pub fn millis(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
