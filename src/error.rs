//! Error types for the editing model, the compiler, and persistence.
//!
//! Actions either fully apply or return one of these and leave the project
//! untouched. The realtime engine never surfaces errors as values; it
//! substitutes silence for the offending wire and keeps running.

use crate::model::NodeId;
use thiserror::Error;

/// Structural and value errors raised by action application and editing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("unknown node kind: {0}")]
    UnknownKind(String),

    #[error("node {0} does not exist")]
    NodeNotFound(NodeId),

    #[error("a {0} node already exists and at most one is allowed")]
    DuplicateUnique(&'static str),

    #[error("node kind {0} is internal and cannot be created")]
    InternalKind(&'static str),

    #[error("port index {port} out of range on node {node}")]
    BadPort { node: NodeId, port: usize },

    #[error("connection would create a cycle not broken by a delay or hold")]
    CycleNotBroken,

    #[error("node {node} has no parameter named {name}")]
    UnknownParam { node: NodeId, name: String },

    #[error("value {value} out of range [{min}, {max}] for parameter {name}")]
    ParamOutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("parameter {0} has the wrong type")]
    ParamWrongType(String),

    #[error("name must be 1 to {max} characters")]
    BadNameLength { max: usize },

    #[error("title must be at most {max} characters")]
    BadTitleLength { max: usize },

    #[error("node {0} is not a sequencer")]
    NotASequencer(NodeId),

    #[error("pattern index {0} out of range")]
    BadPatternIndex(usize),

    #[error("cell ({step}, {row}) out of range")]
    BadCell { step: usize, row: usize },

    #[error("pattern length must stay a positive multiple of 16")]
    BadPatternLength,

    #[error("divider factor must be greater than zero")]
    BadFactor,

    #[error("MIDI channel must be between 1 and 16")]
    BadChannel,

    #[error("a {0} node cannot be part of a module")]
    CannotGroup(&'static str),

    #[error("invalid note name: {0}")]
    BadNoteName(String),

    #[error("unknown scale name: {0}")]
    BadScaleName(String),
}

/// Errors produced while compiling a project graph into a `Unit`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("cycle detected involving {} nodes", nodes.len())]
    Cycle { nodes: Vec<NodeId> },

    #[error("more than one AudioOut node in the graph")]
    MultipleOutputs,

    #[error("module {0} has inconsistent port maps")]
    BadModule(NodeId),
}

/// Errors produced while decoding a `.ncft` payload.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed project file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("project failed validation: {}", issues.first().map(|i| i.to_string()).unwrap_or_default())]
    Invalid {
        issues: Vec<crate::validate::ValidateIssue>,
    },
}
