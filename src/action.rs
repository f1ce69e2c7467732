//! Actions and the Editing Model
//!
//! Every edit is a self-describing, atomic `Action` applied through
//! `Model::update`. An action either fully applies (state change, undo
//! record, broadcast to views) or returns an error and leaves the project
//! untouched. Undo is by full state snapshot, bounded, with rapid
//! successive edits (knob drags, node drags) compressed into the top entry.

use crate::compiler;
use crate::error::ModelError;
use crate::model::{
    Grid, Node, NodeId, ParamValue, Project, MAX_NAME_LEN, MAX_TITLE_LEN, PATTERN_STEP_BLOCK,
};
use crate::music;
use crate::schema::NodeKind;
use crate::views::{NullView, View};
use std::collections::BTreeMap;
use tracing::warn;

/// Bound on the undo stack; the oldest snapshot falls off first.
pub const MAX_UNDO_STEPS: usize = 400;

/// The closed set of editing operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetTitle {
        title: String,
    },
    CreateNode {
        kind: NodeKind,
        x: i32,
        y: i32,
    },
    MoveNodes {
        ids: Vec<NodeId>,
        dx: i32,
        dy: i32,
    },
    DeleteNodes {
        ids: Vec<NodeId>,
    },
    ConnectNodes {
        src: NodeId,
        src_port: usize,
        dst: NodeId,
        dst_port: usize,
    },
    Disconnect {
        dst: NodeId,
        dst_port: usize,
    },
    SetNodeName {
        id: NodeId,
        name: String,
    },
    SetInName {
        id: NodeId,
        port: usize,
        name: String,
    },
    SetOutName {
        id: NodeId,
        port: usize,
        name: String,
    },
    SetParam {
        id: NodeId,
        name: String,
        value: ParamValue,
    },
    Paste {
        nodes: BTreeMap<NodeId, Node>,
        x: i32,
        y: i32,
    },
    GroupNodes {
        ids: Vec<NodeId>,
    },
    ToggleCell {
        id: NodeId,
        pattern: usize,
        step: usize,
        row: usize,
    },
    SetPattern {
        id: NodeId,
        pattern: usize,
    },
    QueuePattern {
        id: NodeId,
        pattern: usize,
    },
    SetScale {
        id: NodeId,
        root: String,
        scale: String,
        octaves: u32,
    },
    SetNumRows {
        id: NodeId,
        rows: usize,
    },
    ExtendPattern {
        id: NodeId,
        pattern: usize,
    },
    ExtendCopy {
        id: NodeId,
        pattern: usize,
    },
    ShrinkPattern {
        id: NodeId,
        pattern: usize,
    },

    // Audio → model feedback; never undoable.
    SetCurStep {
        id: NodeId,
        step: usize,
    },
    SendSamples {
        id: NodeId,
        samples: Vec<f32>,
    },
    NoteOn {
        id: NodeId,
        note: u8,
        velocity: u8,
    },
    ClockPulse {
        id: NodeId,
        time: f64,
    },

    Play,
    Stop,
}

impl Action {
    /// Whether applying this action records an undo snapshot.
    pub fn undoable(&self) -> bool {
        !matches!(
            self,
            Action::SetCurStep { .. }
                | Action::SendSamples { .. }
                | Action::NoteOn { .. }
                | Action::ClockPulse { .. }
                | Action::Play
                | Action::Stop
        )
    }

    /// Whether this action can merge with the previous one in the undo
    /// queue: a continued drag of the same nodes, or a continued turn of
    /// the same `value` knob.
    pub fn combinable(&self, prev: &Action) -> bool {
        match (self, prev) {
            (Action::MoveNodes { ids: a, .. }, Action::MoveNodes { ids: b, .. }) => a == b,
            (
                Action::SetParam { id: a, name: an, .. },
                Action::SetParam { id: b, name: bn, .. },
            ) => a == b && an == "value" && bn == "value",
            _ => false,
        }
    }
}

/// Values some actions hand back to the editor.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    Created(NodeId),
    Pasted(Vec<NodeId>),
}

/// The editing model: authoritative project state, undo/redo stacks, and
/// the list of views notified after every applied action.
pub struct Model {
    project: Project,
    playing: bool,
    undo_stack: Vec<Project>,
    redo_stack: Vec<Project>,
    last_undoable: Option<Action>,
    views: Vec<Box<dyn View>>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self::with_project(Project::new())
    }

    pub fn with_project(project: Project) -> Self {
        Self {
            project,
            playing: false,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            last_undoable: None,
            views: Vec::new(),
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn playing(&self) -> bool {
        self.playing
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn add_view(&mut self, view: Box<dyn View>) {
        self.views.push(view);
    }

    /// Replace the project wholesale (load). Clears history and refreshes
    /// every view.
    pub fn load(&mut self, project: Project) {
        self.project = project;
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.last_undoable = None;
        self.refresh_views();
    }

    /// Apply one action. On error the project is untouched, nothing is
    /// recorded, and no view hears about it.
    pub fn update(&mut self, action: Action) -> Result<Option<ActionOutput>, ModelError> {
        let undoable = action.undoable();
        let combine = undoable
            && self
                .last_undoable
                .as_ref()
                .is_some_and(|prev| action.combinable(prev));

        let snapshot = if undoable {
            Some(self.project.clone())
        } else {
            None
        };

        let output = match apply(&mut self.project, &mut self.playing, &action) {
            Ok(output) => output,
            Err(err) => {
                warn!(%err, "action rejected");
                return Err(err);
            }
        };

        if let Some(snapshot) = snapshot {
            // A combinable run of edits keeps a single entry holding the
            // state just before the latest edit, so undo steps back one
            // notch, not to the start of the run.
            match self.undo_stack.last_mut() {
                Some(top) if combine => *top = snapshot,
                _ => {
                    if self.undo_stack.len() >= MAX_UNDO_STEPS {
                        self.undo_stack.remove(0);
                    }
                    self.undo_stack.push(snapshot);
                }
            }
            self.redo_stack.clear();
            self.last_undoable = Some(action.clone());
        }

        for view in &mut self.views {
            view.notify(&self.project, &action);
        }
        Ok(output)
    }

    /// Revert to the snapshot before the last undoable action.
    pub fn undo(&mut self) -> bool {
        match self.undo_stack.pop() {
            Some(prev) => {
                self.redo_stack.push(std::mem::replace(&mut self.project, prev));
                self.last_undoable = None;
                self.refresh_views();
                true
            }
            None => false,
        }
    }

    /// Re-apply the last undone action's resulting state.
    pub fn redo(&mut self) -> bool {
        match self.redo_stack.pop() {
            Some(next) => {
                self.undo_stack.push(std::mem::replace(&mut self.project, next));
                self.last_undoable = None;
                self.refresh_views();
                true
            }
            None => false,
        }
    }

    /// Editor tick: let each view pump queued work (the audio view drains
    /// engine feedback here and re-emits it as actions).
    pub fn tick(&mut self) {
        for i in 0..self.views.len() {
            let mut view = std::mem::replace(&mut self.views[i], Box::new(NullView));
            view.pump(self);
            self.views[i] = view;
        }
    }

    fn refresh_views(&mut self) {
        for view in &mut self.views {
            view.refresh(&self.project, self.playing);
        }
    }
}

fn apply(
    project: &mut Project,
    playing: &mut bool,
    action: &Action,
) -> Result<Option<ActionOutput>, ModelError> {
    match action {
        Action::SetTitle { title } => {
            if title.chars().count() > MAX_TITLE_LEN {
                return Err(ModelError::BadTitleLength { max: MAX_TITLE_LEN });
            }
            project.title = title.clone();
            Ok(None)
        }

        Action::CreateNode { kind, x, y } => {
            let schema = kind.schema();
            if schema.internal {
                return Err(ModelError::InternalKind(schema.name));
            }
            if schema.unique && project.find_kind(*kind).is_some() {
                return Err(ModelError::DuplicateUnique(schema.name));
            }
            let id = project.next_id();
            project.nodes.insert(id, Project::seed_node(*kind, *x, *y));
            Ok(Some(ActionOutput::Created(id)))
        }

        Action::MoveNodes { ids, dx, dy } => {
            for &id in ids {
                project.node(id)?;
            }
            for &id in ids {
                let node = project.node_mut(id)?;
                node.x += dx;
                node.y += dy;
            }
            Ok(None)
        }

        Action::DeleteNodes { ids } => {
            for &id in ids {
                project.node(id)?;
            }
            for &id in ids {
                project.nodes.remove(&id);
            }
            project.prune_dangling_edges();
            Ok(None)
        }

        Action::ConnectNodes {
            src,
            src_port,
            dst,
            dst_port,
        } => {
            let src_node = project.node(*src)?;
            if *src_port >= src_node.out_arity() {
                return Err(ModelError::BadPort {
                    node: *src,
                    port: *src_port,
                });
            }
            let dst_node = project.node(*dst)?;
            if *dst_port >= dst_node.in_arity() {
                return Err(ModelError::BadPort {
                    node: *dst,
                    port: *dst_port,
                });
            }
            if compiler::connect_would_cycle(project, *src, *src_port, *dst, *dst_port) {
                return Err(ModelError::CycleNotBroken);
            }
            project.node_mut(*dst)?.ins[*dst_port] = Some(crate::model::PortRef(*src, *src_port));
            Ok(None)
        }

        Action::Disconnect { dst, dst_port } => {
            let node = project.node_mut(*dst)?;
            if *dst_port >= node.ins.len() {
                return Err(ModelError::BadPort {
                    node: *dst,
                    port: *dst_port,
                });
            }
            node.ins[*dst_port] = None;
            Ok(None)
        }

        Action::SetNodeName { id, name } => {
            check_name(name)?;
            project.node_mut(*id)?.name = name.clone();
            Ok(None)
        }

        Action::SetInName { id, port, name } => {
            check_name(name)?;
            let node = project.node_mut(*id)?;
            match node.in_names.get_mut(*port) {
                Some(slot) => {
                    *slot = name.clone();
                    Ok(None)
                }
                None => Err(ModelError::BadPort {
                    node: *id,
                    port: *port,
                }),
            }
        }

        Action::SetOutName { id, port, name } => {
            check_name(name)?;
            let node = project.node_mut(*id)?;
            match node.out_names.get_mut(*port) {
                Some(slot) => {
                    *slot = name.clone();
                    Ok(None)
                }
                None => Err(ModelError::BadPort {
                    node: *id,
                    port: *port,
                }),
            }
        }

        Action::SetParam { id, name, value } => {
            set_param(project, *id, name, value)?;
            Ok(None)
        }

        Action::Paste { nodes, x, y } => {
            let ids = paste(project, nodes, *x, *y);
            Ok(Some(ActionOutput::Pasted(ids)))
        }

        Action::GroupNodes { ids } => {
            group_nodes(project, ids)?;
            Ok(None)
        }

        Action::ToggleCell {
            id,
            pattern,
            step,
            row,
        } => {
            let kind = project.node(*id)?.kind;
            if !project.node(*id)?.is_sequencer() {
                return Err(ModelError::NotASequencer(*id));
            }
            let node = project.node_mut(*id)?;
            let grids = node.patterns.as_mut().ok_or(ModelError::NotASequencer(*id))?;
            let grid = grids
                .get_mut(*pattern)
                .ok_or(ModelError::BadPatternIndex(*pattern))?;
            let cur = grid.get(*step, *row).ok_or(ModelError::BadCell {
                step: *step,
                row: *row,
            })?;
            if cur == 0 {
                // Monophonic sequencers keep at most one cell per step.
                if kind == NodeKind::MonoSeq {
                    grid.clear_step(*step);
                }
                grid.set(*step, *row, 1);
            } else {
                grid.set(*step, *row, 0);
            }
            Ok(None)
        }

        Action::SetPattern { id, pattern } => {
            ensure_pattern(project, *id, *pattern)?;
            project.node_mut(*id)?.cur_pattern = Some(*pattern);
            Ok(None)
        }

        Action::QueuePattern { id, pattern } => {
            // The switch itself lives in the engine; the model only makes
            // sure the pattern slot exists.
            ensure_pattern(project, *id, *pattern)?;
            Ok(None)
        }

        Action::SetScale {
            id,
            root,
            scale,
            octaves,
        } => {
            let node = project.node(*id)?;
            if node.kind != NodeKind::MonoSeq {
                return Err(ModelError::NotASequencer(*id));
            }
            let rows = music::scale_rows(root, scale, *octaves)?;
            let node = project.node_mut(*id)?;
            node.scale_root = Some(root.clone());
            node.scale_name = Some(scale.clone());
            node.num_octaves = Some(*octaves);
            if let Some(grids) = &mut node.patterns {
                for grid in grids {
                    grid.resize_rows(rows);
                }
            }
            Ok(None)
        }

        Action::SetNumRows { id, rows } => {
            let node = project.node(*id)?;
            if node.kind != NodeKind::GateSeq {
                return Err(ModelError::NotASequencer(*id));
            }
            if *rows == 0 {
                return Err(ModelError::BadPatternLength);
            }
            let node = project.node_mut(*id)?;
            node.num_rows = Some(*rows);
            node.out_names = (0..*rows).map(|i| format!("gate{i}")).collect();
            if let Some(grids) = &mut node.patterns {
                for grid in grids {
                    grid.resize_rows(*rows);
                }
            }
            // Consumers of outputs that no longer exist lose the edge.
            let arity = *rows;
            let id = *id;
            for node in project.nodes.values_mut() {
                for input in &mut node.ins {
                    if let Some(edge) = input {
                        if edge.node() == id && edge.port() >= arity {
                            *input = None;
                        }
                    }
                }
            }
            Ok(None)
        }

        Action::ExtendPattern { id, pattern } => {
            with_grid(project, *id, *pattern, |grid| {
                grid.extend(grid.num_steps());
                Ok(())
            })
        }

        Action::ExtendCopy { id, pattern } => {
            with_grid(project, *id, *pattern, |grid| {
                grid.extend_copy();
                Ok(())
            })
        }

        Action::ShrinkPattern { id, pattern } => {
            with_grid(project, *id, *pattern, |grid| {
                let keep = grid.num_steps() / 2;
                if keep < PATTERN_STEP_BLOCK || keep % PATTERN_STEP_BLOCK != 0 {
                    return Err(ModelError::BadPatternLength);
                }
                grid.shrink(keep);
                Ok(())
            })
        }

        Action::SetCurStep { id, .. } => {
            // Display-only feedback; the project carries no step cursor.
            project.node(*id)?;
            Ok(None)
        }

        Action::SendSamples { id, samples } => {
            let node = project.node_mut(*id)?;
            let history_len = node.param_num("historyLen").unwrap_or(150.0).max(1.0) as usize;
            let buf = node.samples.get_or_insert_with(Vec::new);
            buf.extend_from_slice(samples);
            let overflow = buf.len().saturating_sub(history_len);
            if overflow > 0 {
                buf.drain(..overflow);
            }
            Ok(None)
        }

        Action::NoteOn { id, .. } | Action::ClockPulse { id, .. } => {
            project.node(*id)?;
            Ok(None)
        }

        Action::Play => {
            *playing = true;
            Ok(None)
        }

        Action::Stop => {
            *playing = false;
            // Purge declared-transient state.
            for node in project.nodes.values_mut() {
                if node.kind.schema().transient_state.contains(&"samples") {
                    node.samples = None;
                }
            }
            Ok(None)
        }
    }
}

fn check_name(name: &str) -> Result<(), ModelError> {
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(ModelError::BadNameLength { max: MAX_NAME_LEN });
    }
    Ok(())
}

fn set_param(
    project: &mut Project,
    id: NodeId,
    name: &str,
    value: &ParamValue,
) -> Result<(), ModelError> {
    let node = project.node(id)?;
    let schema = node.kind.schema();
    let def = schema.param(name).ok_or_else(|| ModelError::UnknownParam {
        node: id,
        name: name.to_string(),
    })?;
    if !value.matches_default(&def.default) {
        return Err(ModelError::ParamWrongType(name.to_string()));
    }

    // Value-range invariant: minVal <= value <= maxVal, using the would-be
    // values after this write.
    if matches!(name, "value" | "minVal" | "maxVal") {
        let pick = |param: &str| -> Option<f64> {
            if param == name {
                value.as_num()
            } else {
                node.param_num(param)
            }
        };
        if let (Some(min), Some(v), Some(max)) = (pick("minVal"), pick("value"), pick("maxVal")) {
            if v < min || v > max {
                return Err(ModelError::ParamOutOfRange {
                    name: name.to_string(),
                    value: v,
                    min,
                    max,
                });
            }
        }
    }

    if name == "factor" {
        match value.as_num() {
            Some(f) if f > 0.0 => {}
            _ => return Err(ModelError::BadFactor),
        }
    }

    if name == "channel" && !value.is_null() {
        match value.as_num() {
            Some(c) if (1.0..=16.0).contains(&c) && c.fract() == 0.0 => {}
            _ => return Err(ModelError::BadChannel),
        }
    }

    project
        .node_mut(id)?
        .params
        .insert(name.to_string(), value.clone());
    Ok(())
}

/// Clone `nodes` into the project with fresh ids, keeping edges between
/// pasted nodes and dropping edges that point outside the paste. Unique
/// kinds already present are skipped.
fn paste(project: &mut Project, nodes: &BTreeMap<NodeId, Node>, x: i32, y: i32) -> Vec<NodeId> {
    let mut rename: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    let mut next = project.next_id().0;

    for (&old_id, node) in nodes {
        if node.kind.schema().internal {
            continue;
        }
        if node.kind.schema().unique && project.find_kind(node.kind).is_some() {
            continue;
        }
        rename.insert(old_id, NodeId(next));
        next += 1;
    }

    let min_x = nodes
        .iter()
        .filter(|(id, _)| rename.contains_key(id))
        .map(|(_, n)| n.x)
        .min()
        .unwrap_or(0);
    let min_y = nodes
        .iter()
        .filter(|(id, _)| rename.contains_key(id))
        .map(|(_, n)| n.y)
        .min()
        .unwrap_or(0);

    let mut ids = Vec::with_capacity(rename.len());
    for (&old_id, node) in nodes {
        let Some(&new_id) = rename.get(&old_id) else {
            continue;
        };
        let mut clone = node.clone();
        clone.x = node.x - min_x + x;
        clone.y = node.y - min_y + y;
        for input in &mut clone.ins {
            *input = input.and_then(|edge| {
                rename
                    .get(&edge.node())
                    .map(|&nid| crate::model::PortRef(nid, edge.port()))
            });
        }
        project.nodes.insert(new_id, clone);
        ids.push(new_id);
    }
    ids
}

/// Replace a selection with a single `Module` node. Edges inside the
/// selection are preserved; edges crossing the boundary become module
/// inputs and outputs in stable (id, port) order.
fn group_nodes(project: &mut Project, ids: &[NodeId]) -> Result<(), ModelError> {
    let mut selected: Vec<NodeId> = ids.to_vec();
    selected.sort();
    selected.dedup();

    for &id in &selected {
        let node = project.node(id)?;
        if node.kind.schema().unique {
            return Err(ModelError::CannotGroup(node.kind.schema().name));
        }
    }

    let module_id = project.next_id();
    let mut module = Project::seed_node(NodeKind::Module, 0, 0);

    // Inputs: one module port per distinct external source feeding the
    // selection, fanning out to every interior target it fed.
    let mut ext_ins: Vec<(crate::model::PortRef, Vec<crate::model::PortRef>)> = Vec::new();
    // Outputs: one module port per distinct interior source feeding the
    // outside.
    let mut ext_outs: Vec<crate::model::PortRef> = Vec::new();

    for &id in &selected {
        let node = project.node(id)?;
        for (port, input) in node.ins.iter().enumerate() {
            if let Some(edge) = input {
                if !selected.contains(&edge.node()) {
                    let target = crate::model::PortRef(id, port);
                    match ext_ins.iter_mut().find(|(src, _)| src == edge) {
                        Some((_, targets)) => targets.push(target),
                        None => ext_ins.push((*edge, vec![target])),
                    }
                }
            }
        }
    }

    let outside: Vec<NodeId> = project
        .nodes
        .keys()
        .filter(|id| !selected.contains(id))
        .copied()
        .collect();
    for &id in &outside {
        let node = project.node(id)?;
        for input in node.ins.iter().flatten() {
            if selected.contains(&input.node()) && !ext_outs.contains(input) {
                ext_outs.push(*input);
            }
        }
    }
    ext_outs.sort_by_key(|e| (e.node(), e.port()));

    // Position the module where the selection was.
    module.x = selected
        .iter()
        .filter_map(|id| project.nodes.get(id).map(|n| n.x))
        .min()
        .unwrap_or(0);
    module.y = selected
        .iter()
        .filter_map(|id| project.nodes.get(id).map(|n| n.y))
        .min()
        .unwrap_or(0);

    module.ins = ext_ins.iter().map(|(src, _)| Some(*src)).collect();
    module.in_names = (0..ext_ins.len()).map(|i| format!("in{i}")).collect();
    module.in_map = Some(ext_ins.into_iter().map(|(_, targets)| targets).collect());
    module.out_names = (0..ext_outs.len()).map(|i| format!("out{i}")).collect();
    module.out_map = Some(ext_outs.clone());

    // Move the selection inside. Interior edges keep their ids; the
    // interior ports that were externally fed go unconnected.
    let mut sub = BTreeMap::new();
    for &id in &selected {
        let mut node = project.nodes.remove(&id).expect("selection checked above");
        for input in &mut node.ins {
            if let Some(edge) = *input {
                if !selected.contains(&edge.node()) {
                    *input = None;
                }
            }
        }
        sub.insert(id, node);
    }
    module.sub_nodes = Some(sub);

    // Outside consumers now reference the module's output ports.
    for node in project.nodes.values_mut() {
        for input in &mut node.ins {
            if let Some(edge) = *input {
                if let Some(port) = ext_outs.iter().position(|e| *e == edge) {
                    *input = Some(crate::model::PortRef(module_id, port));
                }
            }
        }
    }

    project.nodes.insert(module_id, module);
    Ok(())
}

fn ensure_pattern(project: &mut Project, id: NodeId, pattern: usize) -> Result<(), ModelError> {
    let node = project.node(id)?;
    if !node.is_sequencer() {
        return Err(ModelError::NotASequencer(id));
    }
    let rows = node.grid_rows();
    let len = node.patterns.as_ref().map_or(0, Vec::len);
    if pattern > len {
        return Err(ModelError::BadPatternIndex(pattern));
    }
    if pattern == len {
        let steps = project
            .node(id)?
            .patterns
            .as_ref()
            .and_then(|p| p.last())
            .map_or(PATTERN_STEP_BLOCK, Grid::num_steps);
        let node = project.node_mut(id)?;
        if let Some(patterns) = &mut node.patterns {
            patterns.push(Grid::new(steps, rows));
        }
    }
    Ok(())
}

fn with_grid(
    project: &mut Project,
    id: NodeId,
    pattern: usize,
    f: impl FnOnce(&mut Grid) -> Result<(), ModelError>,
) -> Result<Option<ActionOutput>, ModelError> {
    let node = project.node_mut(id)?;
    if !node.is_sequencer() {
        return Err(ModelError::NotASequencer(id));
    }
    let grid = node
        .patterns
        .as_mut()
        .and_then(|p| p.get_mut(pattern))
        .ok_or(ModelError::BadPatternIndex(pattern))?;
    f(grid)?;
    Ok(None)
}
