// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by every validation pass, plus
// the aggregated `ValidationError` handed back to callers.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0201`, `W0201`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Contract resolution (E01xx)
    pub const E0101: DiagCode = DiagCode("E0101"); // unknown node type
    pub const E0102: DiagCode = DiagCode("E0102"); // contract filling failed
    pub const E0103: DiagCode = DiagCode("E0103"); // slot left without a type
    pub const E0104: DiagCode = DiagCode("E0104"); // input_stream_info names no input
    pub const E0105: DiagCode = DiagCode("E0105"); // duplicate input_stream_info
    pub const E0106: DiagCode = DiagCode("E0106"); // options type_url repeated
    pub const E0107: DiagCode = DiagCode("E0107"); // malformed TAG:index:name

    // Edge tables and ordering (E02xx)
    pub const E0201: DiagCode = DiagCode("E0201"); // output stream defined twice
    pub const E0202: DiagCode = DiagCode("E0202"); // output side packet defined twice
    pub const E0203: DiagCode = DiagCode("E0203"); // side packet produced after use
    pub const E0204: DiagCode = DiagCode("E0204"); // input stream has no producer
    pub const E0205: DiagCode = DiagCode("E0205"); // cycle

    // Types (E03xx)
    pub const E0301: DiagCode = DiagCode("E0301"); // stream type mismatch
    pub const E0302: DiagCode = DiagCode("E0302"); // side packet type mismatch

    // Executors (E04xx)
    pub const E0401: DiagCode = DiagCode("E0401"); // reserved executor name
    pub const E0402: DiagCode = DiagCode("E0402"); // duplicate executor declaration
    pub const E0403: DiagCode = DiagCode("E0403"); // undeclared executor reference
    pub const E0404: DiagCode = DiagCode("E0404"); // num_threads and default executor

    // Externally supplied side packets and queries (E05xx)
    pub const E0501: DiagCode = DiagCode("E0501"); // required side packet missing
    pub const E0502: DiagCode = DiagCode("E0502"); // side packet failed validation
    pub const E0503: DiagCode = DiagCode("E0503"); // name not defined in the config
    pub const E0504: DiagCode = DiagCode("E0504"); // type not determinable

    // Collaborators and internal checks (E09xx)
    pub const E0901: DiagCode = DiagCode("E0901"); // subgraph expansion failed
    pub const E0999: DiagCode = DiagCode("E0999"); // internal consistency

    // Warnings
    pub const W0201: DiagCode = DiagCode("W0201"); // unnecessary back edge
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Error kind ───────────────────────────────────────────────────────────

/// Coarse classification of a failure, used by callers to react without
/// matching on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed declarations (bad tags, reserved executor names, missing
    /// side packets).
    InvalidArgument,
    /// Semantic failures (duplicate producers, cycles, type mismatches).
    Unknown,
    /// A node type name missing from the registry.
    NotFound,
    /// A broken internal invariant; never the user's fault.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Unknown => "unknown",
            ErrorKind::NotFound => "not found",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ── Location ─────────────────────────────────────────────────────────────

/// Where in the graph description a diagnostic points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Location {
    /// Display name of the offending node.
    pub node: Option<String>,
    /// Stream or side packet name.
    pub edge: Option<String>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.node.is_none() && self.edge.is_none()
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any validation pass.
///
/// Aggregated failures (e.g. a node whose contract failed in several slot
/// sets) carry their sub-errors in `causes`.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub kind: ErrorKind,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
    pub causes: Vec<Diagnostic>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, location, or causes.
    pub fn new(level: DiagLevel, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            kind,
            location: Location::default(),
            message: message.into(),
            hint: None,
            causes: Vec::new(),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, kind, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, ErrorKind::Unknown, message)
    }

    /// Internal consistency failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::error(ErrorKind::Internal, message).with_code(codes::E0999)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn at_node(mut self, node: impl Into<String>) -> Self {
        self.location.node = Some(node.into());
        self
    }

    pub fn at_edge(mut self, edge: impl Into<String>) -> Self {
        self.location.edge = Some(edge.into());
        self
    }

    /// Attach a sub-error.
    pub fn with_cause(mut self, cause: Diagnostic) -> Self {
        self.causes.push(cause);
        self
    }

    pub fn with_causes(mut self, causes: impl IntoIterator<Item = Diagnostic>) -> Self {
        self.causes.extend(causes);
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{pad}{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{pad}{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n{pad}  hint: {}", hint)?;
        }
        for cause in &self.causes {
            writeln!(f)?;
            cause.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

// ── Aggregated error ─────────────────────────────────────────────────────

/// The error returned by a validation entry point: a summary line plus
/// every independent problem found.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", render(.summary, .diagnostics))]
pub struct ValidationError {
    pub summary: String,
    pub diagnostics: Vec<Diagnostic>,
}

fn render(summary: &str, diagnostics: &[Diagnostic]) -> String {
    let mut out = summary.to_string();
    for diag in diagnostics {
        out.push('\n');
        out.push_str(&diag.to_string());
    }
    out
}

impl ValidationError {
    pub fn new(summary: impl Into<String>, diagnostics: Vec<Diagnostic>) -> Self {
        ValidationError {
            summary: summary.into(),
            diagnostics,
        }
    }

    /// Wrap a single fatal diagnostic.
    pub fn single(diagnostic: Diagnostic) -> Self {
        Self::new("graph validation failed", vec![diagnostic])
    }

    /// The common kind of all error diagnostics, or `Unknown` when they
    /// disagree.
    pub fn kind(&self) -> ErrorKind {
        let mut kinds = self
            .diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.kind);
        match kinds.next() {
            Some(first) if kinds.all(|k| k == first) => first,
            _ => ErrorKind::Unknown,
        }
    }

    /// True if any diagnostic (at any depth) carries `code`.
    pub fn has_code(&self, code: DiagCode) -> bool {
        fn walk(diags: &[Diagnostic], code: DiagCode) -> bool {
            diags
                .iter()
                .any(|d| d.code == Some(code) || walk(&d.causes, code))
        }
        walk(&self.diagnostics, code)
    }
}

impl From<Diagnostic> for ValidationError {
    fn from(diagnostic: Diagnostic) -> Self {
        ValidationError::single(diagnostic)
    }
}

/// Collapse a list of diagnostics into `Ok` when empty, else an aggregated
/// error with `summary`.
pub fn combine(summary: &str, diagnostics: Vec<Diagnostic>) -> Result<(), ValidationError> {
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(summary, diagnostics))
    }
}
