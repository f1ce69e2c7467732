//! Views and the Audio Bridge
//!
//! Views receive `(project, action)` after every applied action. In the
//! single-threaded editor context this is a plain list of handles; across
//! the audio boundary it is strictly message passing: `AudioView` turns
//! small actions into direct control messages, structural changes into a
//! recompiled `Unit`, and drains engine feedback back into model actions on
//! the editor's tick.

use crate::action::{Action, Model};
use crate::compiler::{self, NodeSeed};
use crate::engine::{ControlMsg, EngineHandle, FeedbackMsg};
use crate::model::{NodeId, ParamValue, Project};
use tracing::{debug, warn};

/// A handle receiving model broadcasts.
pub trait View {
    /// Called after every applied action with the post-action state.
    fn notify(&mut self, project: &Project, action: &Action);

    /// Called on wholesale state replacement: load, undo, redo.
    fn refresh(&mut self, _project: &Project, _playing: bool) {}

    /// Called on the editor tick; a view may inject actions here.
    fn pump(&mut self, _model: &mut Model) {}
}

/// Placeholder occupying a view slot while that view is being pumped.
pub struct NullView;

impl View for NullView {
    fn notify(&mut self, _: &Project, _: &Action) {}
}

/// The audio side of the editor: owns the engine handle.
pub struct AudioView {
    handle: EngineHandle,
    playing: bool,
}

impl AudioView {
    pub fn new(handle: EngineHandle) -> Self {
        Self {
            handle,
            playing: false,
        }
    }

    fn recompile(&mut self, project: &Project) {
        match compiler::compile(project) {
            Ok(unit) => {
                self.handle.send(ControlMsg::NewUnit(Box::new(unit)));
            }
            Err(err) => {
                // The engine keeps playing the previous plan; the editor
                // surfaces the error.
                warn!(%err, "recompile failed, keeping previous unit");
            }
        }
    }

    fn send_state(&mut self, project: &Project, id: NodeId) {
        if let Some(node) = project.nodes.get(&id) {
            self.handle.send(ControlMsg::SetState {
                node: id,
                seed: Box::new(NodeSeed::from_node(node)),
            });
        }
    }
}

impl View for AudioView {
    fn notify(&mut self, project: &Project, action: &Action) {
        match action {
            Action::Play => {
                self.playing = true;
                self.handle.send(ControlMsg::Play);
                self.recompile(project);
            }
            Action::Stop => {
                self.playing = false;
                self.handle.send(ControlMsg::Stop);
            }

            // Everything below only matters while the engine is running.
            _ if !self.playing => {}

            Action::SetParam { id, name, value } => {
                if let ParamValue::Num(v) = value {
                    self.handle.send(ControlMsg::SetParam {
                        node: *id,
                        name: name.clone(),
                        value: *v,
                    });
                }
            }

            Action::ToggleCell {
                id,
                pattern,
                step,
                row,
            } => {
                let value = project
                    .nodes
                    .get(id)
                    .and_then(|n| n.patterns.as_ref())
                    .and_then(|p| p.get(*pattern))
                    .and_then(|g| g.get(*step, *row))
                    .unwrap_or(0);
                self.handle.send(ControlMsg::SetCell {
                    node: *id,
                    pattern: *pattern,
                    step: *step,
                    row: *row,
                    value,
                });
            }

            Action::QueuePattern { id, pattern } => {
                let data = project
                    .nodes
                    .get(id)
                    .and_then(|n| n.patterns.as_ref())
                    .and_then(|p| p.get(*pattern))
                    .cloned();
                self.handle.send(ControlMsg::QueuePattern {
                    node: *id,
                    pattern: *pattern,
                    data,
                });
            }

            // Scale, pattern-length, and pattern-cursor edits replace the
            // node's engine state wholesale.
            Action::SetPattern { id, .. }
            | Action::SetScale { id, .. }
            | Action::ExtendPattern { id, .. }
            | Action::ExtendCopy { id, .. }
            | Action::ShrinkPattern { id, .. } => self.send_state(project, *id),

            // Structural changes need a fresh plan. Row-count edits are
            // structural too: they change the node's output arity.
            Action::CreateNode { .. }
            | Action::DeleteNodes { .. }
            | Action::ConnectNodes { .. }
            | Action::Disconnect { .. }
            | Action::Paste { .. }
            | Action::GroupNodes { .. }
            | Action::SetNumRows { .. } => self.recompile(project),

            Action::NoteOn { id, note, velocity } => {
                self.handle.send(ControlMsg::NoteOn {
                    node: *id,
                    note: *note,
                    velocity: *velocity,
                });
            }

            // Geometry, labels, and feedback echoes do not touch audio.
            Action::SetTitle { .. }
            | Action::MoveNodes { .. }
            | Action::SetNodeName { .. }
            | Action::SetInName { .. }
            | Action::SetOutName { .. }
            | Action::SetCurStep { .. }
            | Action::SendSamples { .. }
            | Action::ClockPulse { .. } => {}
        }
    }

    fn refresh(&mut self, project: &Project, playing: bool) {
        self.playing = playing;
        if playing {
            self.recompile(project);
        }
    }

    fn pump(&mut self, model: &mut Model) {
        while let Some(msg) = self.handle.poll() {
            let action = match msg {
                FeedbackMsg::SetCurStep { node, step } => Action::SetCurStep { id: node, step },
                FeedbackMsg::SetPattern { node, pattern } => {
                    Action::SetPattern { id: node, pattern }
                }
                FeedbackMsg::SendSamples { node, samples } => {
                    Action::SendSamples { id: node, samples }
                }
                FeedbackMsg::ClockPulse { node, time } => Action::ClockPulse { id: node, time },
                FeedbackMsg::NoteOn {
                    node,
                    note,
                    velocity,
                } => Action::NoteOn {
                    id: node,
                    note,
                    velocity,
                },
            };
            // Feedback can race a deletion; stale messages just drop.
            if let Err(err) = model.update(action) {
                debug!(%err, "stale engine feedback dropped");
            }
        }
    }
}
