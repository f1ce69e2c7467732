//! Project Data Model
//!
//! The authoritative project state: a titled map of nodes wired by
//! input-side edges. Edges are `(source id, source port)` index pairs, never
//! references, which keeps the in-memory form identical to the serialized
//! form. Ids are monotonically allocated integers rendered as decimal
//! strings on the wire.

use crate::error::ModelError;
use crate::music;
use crate::schema::{NodeKind, ParamDefault};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Maximum project title length.
pub const MAX_TITLE_LEN: usize = 50;

/// Maximum node and port label length.
pub const MAX_NAME_LEN: usize = 12;

/// Margin kept between the canvas origin and the nearest node when a
/// project is repositioned for publishing.
pub const EDGE_PADDING: i32 = 25;

/// Steps appended or removed by pattern resizing come in blocks of this.
pub const PATTERN_STEP_BLOCK: usize = 16;

/// Unique identifier of a node within a project, including inside modules.
///
/// Serialized as a decimal string, both as a map key and inside edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(NodeId)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| D::Error::custom(format!("node id is not a decimal string: {s:?}")))
    }
}

/// An input-side edge: the source node and which of its outputs feeds us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef(pub NodeId, pub usize);

impl PortRef {
    pub fn node(&self) -> NodeId {
        self.0
    }

    pub fn port(&self) -> usize {
        self.1
    }
}

/// A parameter value: number, string, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Num(f64),
    Str(String),
    Null,
}

impl ParamValue {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            ParamValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// Whether this value has the same shape as a schema default.
    /// Null-defaulted parameters accept numbers too (e.g. a bound controlId).
    pub fn matches_default(&self, default: &ParamDefault) -> bool {
        matches!(
            (self, default),
            (ParamValue::Num(_), ParamDefault::Num(_))
                | (ParamValue::Str(_), ParamDefault::Str(_))
                | (ParamValue::Null, ParamDefault::Null)
                | (ParamValue::Num(_), ParamDefault::Null)
        )
    }
}

impl From<ParamDefault> for ParamValue {
    fn from(d: ParamDefault) -> Self {
        match d {
            ParamDefault::Num(n) => ParamValue::Num(n),
            ParamDefault::Str(s) => ParamValue::Str(s.to_string()),
            ParamDefault::Null => ParamValue::Null,
        }
    }
}

/// A sequencer pattern: `num_steps × num_rows` binary grid.
///
/// Indexed as `cells[step][row]`; every cell is 0 or 1 and the step count
/// stays a positive multiple of 16.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid {
    cells: Vec<Vec<u8>>,
}

impl Grid {
    pub fn new(num_steps: usize, num_rows: usize) -> Self {
        Self {
            cells: vec![vec![0; num_rows]; num_steps],
        }
    }

    pub fn num_steps(&self) -> usize {
        self.cells.len()
    }

    pub fn num_rows(&self) -> usize {
        self.cells.first().map_or(0, Vec::len)
    }

    pub fn get(&self, step: usize, row: usize) -> Option<u8> {
        self.cells.get(step).and_then(|s| s.get(row)).copied()
    }

    pub fn set(&mut self, step: usize, row: usize, value: u8) {
        if let Some(cell) = self.cells.get_mut(step).and_then(|s| s.get_mut(row)) {
            *cell = u8::from(value != 0);
        }
    }

    /// Zero every cell of one step.
    pub fn clear_step(&mut self, step: usize) {
        if let Some(s) = self.cells.get_mut(step) {
            s.fill(0);
        }
    }

    /// The first active row of a step, if any.
    pub fn active_row(&self, step: usize) -> Option<usize> {
        self.cells.get(step)?.iter().position(|&c| c != 0)
    }

    /// Rows of a step, for gate sequencing.
    pub fn step(&self, step: usize) -> Option<&[u8]> {
        self.cells.get(step).map(Vec::as_slice)
    }

    /// Rebuild to a new row count, keeping cells that still fit.
    pub fn resize_rows(&mut self, num_rows: usize) {
        for step in &mut self.cells {
            step.resize(num_rows, 0);
        }
    }

    /// Append `extra` zeroed steps.
    pub fn extend(&mut self, extra: usize) {
        let rows = self.num_rows();
        for _ in 0..extra {
            self.cells.push(vec![0; rows]);
        }
    }

    /// Append a copy of the current steps (doubling the pattern).
    pub fn extend_copy(&mut self) {
        let copy = self.cells.clone();
        self.cells.extend(copy);
    }

    /// Drop steps from the end down to `keep`.
    pub fn shrink(&mut self, keep: usize) {
        self.cells.truncate(keep);
    }

    /// Iterate over steps, each yielding its row cells.
    pub fn steps_iter(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.cells.iter()
    }
}

/// A node in the project graph.
///
/// The common shape is shared by every kind; the optional fields at the end
/// are schema-declared state carried only by the kinds that use them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub ins: Vec<Option<PortRef>>,
    #[serde(rename = "inNames")]
    pub in_names: Vec<String>,
    #[serde(rename = "outNames")]
    pub out_names: Vec<String>,
    pub params: BTreeMap<String, ParamValue>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub patterns: Option<Vec<Grid>>,
    #[serde(
        rename = "curPattern",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub cur_pattern: Option<usize>,
    #[serde(rename = "scaleRoot", skip_serializing_if = "Option::is_none", default)]
    pub scale_root: Option<String>,
    #[serde(rename = "scaleName", skip_serializing_if = "Option::is_none", default)]
    pub scale_name: Option<String>,
    #[serde(
        rename = "numOctaves",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub num_octaves: Option<u32>,
    #[serde(rename = "numRows", skip_serializing_if = "Option::is_none", default)]
    pub num_rows: Option<usize>,

    /// Scope capture buffer. Transient: reset on Stop, never serialized.
    #[serde(skip)]
    pub samples: Option<Vec<f32>>,

    /// Module sub-graph.
    #[serde(rename = "nodes", skip_serializing_if = "Option::is_none", default)]
    pub sub_nodes: Option<BTreeMap<NodeId, Node>>,
    /// Per module input: the internal input ports it fans out to.
    #[serde(rename = "inMap", skip_serializing_if = "Option::is_none", default)]
    pub in_map: Option<Vec<Vec<PortRef>>>,
    /// Per module output: the internal output port behind it.
    #[serde(rename = "outMap", skip_serializing_if = "Option::is_none", default)]
    pub out_map: Option<Vec<PortRef>>,
}

impl Node {
    /// Number of output ports, accounting for state-derived arity.
    pub fn out_arity(&self) -> usize {
        self.out_names.len()
    }

    /// Number of input ports.
    pub fn in_arity(&self) -> usize {
        self.ins.len()
    }

    pub fn is_sequencer(&self) -> bool {
        matches!(self.kind, NodeKind::MonoSeq | NodeKind::GateSeq)
    }

    /// Numeric parameter lookup.
    pub fn param_num(&self, name: &str) -> Option<f64> {
        self.params.get(name).and_then(ParamValue::as_num)
    }

    /// The row count a grid of this node must have.
    pub fn grid_rows(&self) -> usize {
        match self.kind {
            NodeKind::MonoSeq => {
                let root = self.scale_root.as_deref().unwrap_or("C2");
                let scale = self.scale_name.as_deref().unwrap_or("minor pentatonic");
                let octaves = self.num_octaves.unwrap_or(1);
                music::scale_rows(root, scale, octaves).unwrap_or(0)
            }
            NodeKind::GateSeq => self.num_rows.unwrap_or(0),
            _ => 0,
        }
    }
}

/// The authoritative project state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub title: String,
    pub nodes: BTreeMap<NodeId, Node>,
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

impl Project {
    pub fn new() -> Self {
        Self {
            title: "New Project".to_string(),
            nodes: BTreeMap::new(),
        }
    }

    /// Next free id: one past the maximum id in use, module interiors
    /// included, so pasted or inlined sub-nodes can never collide.
    pub fn next_id(&self) -> NodeId {
        fn max_id(nodes: &BTreeMap<NodeId, Node>) -> u64 {
            let mut max = 0;
            for (id, node) in nodes {
                max = max.max(id.0 + 1);
                if let Some(sub) = &node.sub_nodes {
                    max = max.max(max_id(sub));
                }
            }
            max
        }
        NodeId(max_id(&self.nodes))
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, ModelError> {
        self.nodes.get(&id).ok_or(ModelError::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, ModelError> {
        self.nodes.get_mut(&id).ok_or(ModelError::NodeNotFound(id))
    }

    /// The id of the first node of `kind`, if any.
    pub fn find_kind(&self, kind: NodeKind) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, n)| n.kind == kind)
            .map(|(&id, _)| id)
    }

    /// Build a fresh node of `kind` with schema defaults seeded.
    ///
    /// Does not insert it; `CreateNode` and `Paste` allocate ids first.
    pub fn seed_node(kind: NodeKind, x: i32, y: i32) -> Node {
        let schema = kind.schema();
        let mut node = Node {
            kind,
            name: schema.name.chars().take(MAX_NAME_LEN).collect(),
            x,
            y,
            ins: vec![None; schema.ins.len()],
            in_names: schema.ins.iter().map(|i| i.name.to_string()).collect(),
            out_names: schema.outs.iter().map(|o| o.to_string()).collect(),
            params: schema
                .params
                .iter()
                .map(|p| (p.name.to_string(), ParamValue::from(p.default)))
                .collect(),
            patterns: None,
            cur_pattern: None,
            scale_root: None,
            scale_name: None,
            num_octaves: None,
            num_rows: None,
            samples: None,
            sub_nodes: None,
            in_map: None,
            out_map: None,
        };

        match kind {
            NodeKind::MonoSeq => {
                node.scale_root = Some("C2".to_string());
                node.scale_name = Some("minor pentatonic".to_string());
                node.num_octaves = Some(1);
                node.cur_pattern = Some(0);
                let rows = node.grid_rows();
                node.patterns = Some(vec![Grid::new(PATTERN_STEP_BLOCK, rows)]);
            }
            NodeKind::GateSeq => {
                node.num_rows = Some(4);
                node.cur_pattern = Some(0);
                node.patterns = Some(vec![Grid::new(PATTERN_STEP_BLOCK, 4)]);
                node.out_names = (0..4).map(|i| format!("gate{i}")).collect();
            }
            NodeKind::Module => {
                node.sub_nodes = Some(BTreeMap::new());
                node.in_map = Some(Vec::new());
                node.out_map = Some(Vec::new());
            }
            _ => {}
        }

        node
    }

    /// Drop every input edge referencing a node that no longer exists.
    pub fn prune_dangling_edges(&mut self) {
        let live: Vec<NodeId> = self.nodes.keys().copied().collect();
        for node in self.nodes.values_mut() {
            for input in &mut node.ins {
                if let Some(edge) = input {
                    if !live.contains(&edge.node()) {
                        *input = None;
                    }
                }
            }
        }
    }

    /// Shift coordinates so the minimum x and y equal `EDGE_PADDING`.
    ///
    /// Idempotent; applied before publishing a project.
    pub fn reposition(&mut self) {
        if self.nodes.is_empty() {
            return;
        }
        let min_x = self.nodes.values().map(|n| n.x).min().unwrap_or(0);
        let min_y = self.nodes.values().map(|n| n.y).min().unwrap_or(0);
        let dx = EDGE_PADDING - min_x;
        let dy = EDGE_PADDING - min_y;
        for node in self.nodes.values_mut() {
            node.x += dx;
            node.y += dy;
        }
    }
}
