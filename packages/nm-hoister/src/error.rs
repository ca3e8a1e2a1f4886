use std::fmt;

/// A broken hoisting contract found by the self-check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PromiseViolation {
    /// Pretty-printed tree path of the node holding the broken promise.
    pub path: String,
    pub kind: ViolationKind,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ViolationKind {
    /// A non-peer original dependency is gone.
    MissingRequire {
        name: String,
        hoisted_from: Option<String>,
        hoisted_to: Option<String>,
    },
    /// A non-peer original dependency resolves to another ident.
    RequireMismatch {
        name: String,
        expected: String,
        found: String,
        hoisted_from: Option<String>,
        hoisted_to: Option<String>,
    },
    /// A peer-named dependency differs from what the parent supplies.
    PeerMismatch {
        expected: String,
        found: Option<String>,
    },
}

fn render_trace(label: &str, trace: &Option<String>) -> String {
    trace
        .as_ref()
        .map(|entries| format!(" hoisted {label} {entries}"))
        .unwrap_or_default()
}

impl fmt::Display for PromiseViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::MissingRequire { name, hoisted_from, hoisted_to } => write!(
                f,
                "{}{} - broken require promise: no required dependency {}{} found",
                self.path,
                render_trace("from", hoisted_from),
                name,
                render_trace("to", hoisted_to),
            ),
            ViolationKind::RequireMismatch { name, expected, found, hoisted_from, hoisted_to } => write!(
                f,
                "{}{} - broken require promise for {}{}: expected {}, but found: {}",
                self.path,
                render_trace("from", hoisted_from),
                name,
                render_trace("to", hoisted_to),
                expected,
                found,
            ),
            ViolationKind::PeerMismatch { expected, found } => write!(
                f,
                "{} - broken peer promise: expected {} but found {}",
                self.path,
                expected,
                found.as_deref().unwrap_or("none"),
            ),
        }
    }
}

fn render_violations(violations: &[PromiseViolation]) -> String {
    violations
        .iter()
        .map(|violation| violation.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The hoisted tree breaks a require or peer promise.
    #[error("{}, after hoisting finished:\n{tree_dump}", render_violations(.violations))]
    SelfCheckFailed {
        violations: Vec<PromiseViolation>,
        tree_dump: String,
    },

    /// An extra hoisting sweep still changed the graph.
    #[error("The hoisting result is not terminal, prev tree:\n{previous}, next tree:\n{next}")]
    NonTerminalResult { previous: String, next: String },

    #[error("Invalid input tree ({0})")]
    InvalidInputTree(String),
}
