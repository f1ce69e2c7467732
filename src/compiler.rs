//! Graph Compiler
//!
//! Turns a project graph into a `Unit`: a flat per-sample evaluation plan
//! plus the state seeds the audio engine needs to allocate or reuse node
//! state. Compilation inlines modules, splits every `Delay` and `Hold` into
//! a write half and a read half so feedback loops through them become
//! acyclic, topologically sorts the result with Kahn's algorithm, and emits
//! one step per node over a flat array of wire indices.
//!
//! The same sort is used by the editor to preview whether a proposed
//! connection would introduce a forbidden cycle.

use crate::error::CompileError;
use crate::model::{Grid, Node, NodeId, ParamValue, PortRef, Project};
use crate::schema::NodeKind;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

/// Stateless arithmetic operations evaluated inline by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Equal,
    Greater,
}

/// Where a step input comes from: an earlier step's output wire, or the
/// schema default folded in at compile time for unconnected ports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Src {
    Wire(usize),
    Const(f64),
}

/// One step of the evaluation plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Binary arithmetic. `Div` yields 0 on a zero divisor and `Mod` clamps
    /// NaN to 0, both inside the evaluation, not the interpreter.
    Arith {
        op: ArithOp,
        a: Src,
        b: Src,
        out: usize,
    },
    /// `Nop`: copy input to output.
    Copy { a: Src, out: usize },
    /// Call into a stateful node's `update`. The engine dispatches on the
    /// kind recorded here; `inputs` and `outputs` follow the schema port
    /// order of the (post-split) kind.
    Update {
        kind: NodeKind,
        inputs: Vec<Src>,
        outputs: Vec<usize>,
    },
    /// Feed the stereo output, scaled by the headroom factor.
    Output { left: Src, right: Src },
}

/// A plan step: the opcode plus the node it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub node: NodeId,
    pub op: Op,
}

/// State seed for one stateful node: kind, params, and declared state.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSeed {
    pub kind: NodeKind,
    pub params: BTreeMap<String, ParamValue>,
    pub patterns: Option<Vec<Grid>>,
    pub cur_pattern: Option<usize>,
    pub scale_root: Option<String>,
    pub scale_name: Option<String>,
    pub num_octaves: Option<u32>,
    pub num_rows: Option<usize>,
}

impl NodeSeed {
    pub fn from_node(node: &Node) -> Self {
        Self {
            kind: node.kind,
            params: node.params.clone(),
            patterns: node.patterns.clone(),
            cur_pattern: node.cur_pattern,
            scale_root: node.scale_root.clone(),
            scale_name: node.scale_name.clone(),
            num_octaves: node.num_octaves,
            num_rows: node.num_rows,
        }
    }
}

/// The compiler's output: an evaluation plan plus node-state seeds.
///
/// Immutable once handed to the audio engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub plan: Vec<Step>,
    pub seeds: BTreeMap<NodeId, NodeSeed>,
    /// The `AudioOut` node, if the graph has one. `None` means silence.
    pub out_node: Option<NodeId>,
    /// Size of the wire scratch array the interpreter needs.
    pub num_wires: usize,
}

/// A node after module inlining and cycle-breaker splitting. Read and write
/// halves share the original node's id (and, in the engine, its state).
struct CompNode {
    id: NodeId,
    kind: NodeKind,
    ins: Vec<Option<PortRef>>,
    out_arity: usize,
}

/// Compile a project into a `Unit`.
pub fn compile(project: &Project) -> Result<Unit, CompileError> {
    let flat = inline_modules(project)?;
    let comp = split_cycle_breakers(&flat);
    let order = topo_sort(&comp)?;

    // At most one AudioOut; absent means the plan renders silence.
    let mut out_node = None;
    for node in comp.iter() {
        if node.kind == NodeKind::AudioOut {
            if out_node.is_some() {
                return Err(CompileError::MultipleOutputs);
            }
            out_node = Some(node.id);
        }
    }

    // Assign a wire to every output of every node, in plan order.
    let mut wire_of: HashMap<(NodeId, usize), usize> = HashMap::new();
    let mut num_wires = 0;
    for &idx in &order {
        let node = &comp[idx];
        // Write halves produce nothing; their reads own the node's wires.
        for port in 0..node.out_arity {
            wire_of.insert((node.id, port), num_wires);
            num_wires += 1;
        }
    }

    let resolve = |node: &CompNode, port: usize| -> Src {
        match node.ins[port] {
            Some(edge) => match wire_of.get(&(edge.node(), edge.port())) {
                Some(&w) => Src::Wire(w),
                // Dangling edge: fall back to the unconnected default.
                None => Src::Const(input_default(node.kind, port)),
            },
            None => Src::Const(input_default(node.kind, port)),
        }
    };

    let mut plan = Vec::with_capacity(order.len());
    for &idx in &order {
        let node = &comp[idx];
        let op = match node.kind {
            NodeKind::Add => arith(node, ArithOp::Add, &resolve, &wire_of),
            NodeKind::Sub => arith(node, ArithOp::Sub, &resolve, &wire_of),
            NodeKind::Mul => arith(node, ArithOp::Mul, &resolve, &wire_of),
            NodeKind::Div => arith(node, ArithOp::Div, &resolve, &wire_of),
            NodeKind::Mod => arith(node, ArithOp::Mod, &resolve, &wire_of),
            NodeKind::Equal => arith(node, ArithOp::Equal, &resolve, &wire_of),
            NodeKind::Greater => arith(node, ArithOp::Greater, &resolve, &wire_of),
            NodeKind::Nop => Op::Copy {
                a: resolve(node, 0),
                out: wire_of[&(node.id, 0)],
            },
            NodeKind::AudioOut => Op::Output {
                left: resolve(node, 0),
                right: resolve(node, 1),
            },
            kind => Op::Update {
                kind,
                inputs: (0..node.ins.len()).map(|p| resolve(node, p)).collect(),
                outputs: (0..node.out_arity)
                    .map(|p| wire_of[&(node.id, p)])
                    .collect(),
            },
        };
        plan.push(Step { node: node.id, op });
    }

    // Seeds for every node the engine keeps state for.
    let mut seeds = BTreeMap::new();
    for (id, node) in &flat {
        if needs_state(node.kind) {
            seeds.insert(*id, NodeSeed::from_node(node));
        }
    }

    debug!(
        steps = plan.len(),
        wires = num_wires,
        seeds = seeds.len(),
        "compiled unit"
    );

    Ok(Unit {
        plan,
        seeds,
        out_node,
        num_wires,
    })
}

/// Whether connecting `src.out[src_port]` to `dst.ins[dst_port]` would
/// create a cycle not broken by a delay or hold. Runs the same inlining,
/// split, and sort as `compile`.
pub fn connect_would_cycle(
    project: &Project,
    src: NodeId,
    src_port: usize,
    dst: NodeId,
    dst_port: usize,
) -> bool {
    let mut preview = project.clone();
    let Ok(node) = preview.node_mut(dst) else {
        return false;
    };
    if dst_port >= node.ins.len() {
        return false;
    }
    node.ins[dst_port] = Some(PortRef(src, src_port));
    check_acyclic(&preview).is_err()
}

/// Check that the project graph (with cycle-breakers split) is a DAG.
pub fn check_acyclic(project: &Project) -> Result<(), CompileError> {
    let flat = inline_modules(project)?;
    let comp = split_cycle_breakers(&flat);
    topo_sort(&comp).map(|_| ())
}

fn arith(
    node: &CompNode,
    op: ArithOp,
    resolve: &impl Fn(&CompNode, usize) -> Src,
    wire_of: &HashMap<(NodeId, usize), usize>,
) -> Op {
    Op::Arith {
        op,
        a: resolve(node, 0),
        b: resolve(node, 1),
        out: wire_of[&(node.id, 0)],
    }
}

fn input_default(kind: NodeKind, port: usize) -> f64 {
    kind.schema().ins.get(port).map_or(0.0, |i| i.default)
}

/// Kinds the engine allocates per-node state for.
fn needs_state(kind: NodeKind) -> bool {
    !kind.is_pure()
        && !matches!(
            kind,
            NodeKind::Notes | NodeKind::AudioOut | NodeKind::Module
        )
}

/// Recursively splice module sub-graphs into the top level, rewriting every
/// edge through the module's port maps and renaming sub-nodes to globally
/// fresh ids.
fn inline_modules(project: &Project) -> Result<BTreeMap<NodeId, Node>, CompileError> {
    let mut flat = project.nodes.clone();
    let mut next = project.next_id().0;

    while let Some(module_id) = flat
        .iter()
        .find(|(_, n)| n.kind == NodeKind::Module)
        .map(|(&id, _)| id)
    {
        let module = flat.remove(&module_id).expect("module id just found");
        let sub_nodes = module.sub_nodes.unwrap_or_default();
        let in_map = module.in_map.unwrap_or_default();
        let out_map = module.out_map.unwrap_or_default();

        if in_map.len() != module.ins.len() || out_map.len() != module.out_names.len() {
            return Err(CompileError::BadModule(module_id));
        }

        // Fresh ids for the interior.
        let mut rename: HashMap<NodeId, NodeId> = HashMap::new();
        for &sid in sub_nodes.keys() {
            rename.insert(sid, NodeId(next));
            next += 1;
        }

        for (sid, mut sub) in sub_nodes {
            for input in &mut sub.ins {
                *input = input.and_then(|edge| {
                    rename.get(&edge.node()).map(|&nid| PortRef(nid, edge.port()))
                });
            }
            flat.insert(rename[&sid], sub);
        }

        // Module inputs fan out to the recorded interior input ports.
        for (i, targets) in in_map.iter().enumerate() {
            let external = module.ins[i];
            for target in targets {
                let Some(&nid) = rename.get(&target.node()) else {
                    return Err(CompileError::BadModule(module_id));
                };
                let node = flat.get_mut(&nid).expect("renamed sub-node present");
                if target.port() >= node.ins.len() {
                    return Err(CompileError::BadModule(module_id));
                }
                node.ins[target.port()] = external;
            }
        }

        // External consumers of module outputs re-bind to the interior
        // source ports.
        let mut resolved_outs = Vec::with_capacity(out_map.len());
        for source in &out_map {
            let Some(&nid) = rename.get(&source.node()) else {
                return Err(CompileError::BadModule(module_id));
            };
            resolved_outs.push(PortRef(nid, source.port()));
        }
        for node in flat.values_mut() {
            for input in &mut node.ins {
                if let Some(edge) = *input {
                    if edge.node() == module_id {
                        *input = resolved_outs.get(edge.port()).copied();
                    }
                }
            }
        }
    }

    Ok(flat)
}

/// Replace every `Delay` and `Hold` with a write pseudo-node (taking the
/// original inputs) and a read pseudo-node (producing the original
/// outputs), both under the original id. `Notes` nodes have no runtime
/// presence and are dropped here.
fn split_cycle_breakers(flat: &BTreeMap<NodeId, Node>) -> Vec<CompNode> {
    let mut comp = Vec::with_capacity(flat.len());
    for (&id, node) in flat {
        match node.kind {
            NodeKind::Notes => {}
            NodeKind::Delay => {
                comp.push(CompNode {
                    id,
                    kind: NodeKind::DelayRead,
                    ins: Vec::new(),
                    out_arity: 1,
                });
                comp.push(CompNode {
                    id,
                    kind: NodeKind::DelayWrite,
                    ins: node.ins.clone(),
                    out_arity: 0,
                });
            }
            NodeKind::Hold => {
                comp.push(CompNode {
                    id,
                    kind: NodeKind::HoldRead,
                    ins: Vec::new(),
                    out_arity: 1,
                });
                comp.push(CompNode {
                    id,
                    kind: NodeKind::HoldWrite,
                    ins: node.ins.clone(),
                    out_arity: 0,
                });
            }
            kind => {
                comp.push(CompNode {
                    id,
                    kind,
                    ins: node.ins.clone(),
                    out_arity: node.out_arity(),
                });
            }
        }
    }
    comp
}

/// Kahn's algorithm over the split graph. Producer lookup goes through the
/// read half for split nodes, so a loop through a delay or hold no longer
/// forms a cycle.
fn topo_sort(comp: &[CompNode]) -> Result<Vec<usize>, CompileError> {
    // Which comp node produces the outputs published under a node id.
    let mut producer: HashMap<NodeId, usize> = HashMap::new();
    for (idx, node) in comp.iter().enumerate() {
        if node.out_arity > 0 {
            producer.insert(node.id, idx);
        }
    }

    let mut in_degree = vec![0usize; comp.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); comp.len()];
    for (idx, node) in comp.iter().enumerate() {
        for edge in node.ins.iter().flatten() {
            if let Some(&src) = producer.get(&edge.node()) {
                in_degree[idx] += 1;
                successors[src].push(idx);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..comp.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(comp.len());

    while let Some(idx) = queue.pop_front() {
        order.push(idx);
        for &succ in &successors[idx] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                queue.push_back(succ);
            }
        }
    }

    if order.len() != comp.len() {
        let nodes = (0..comp.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| comp[i].id)
            .collect();
        return Err(CompileError::Cycle { nodes });
    }

    Ok(order)
}
