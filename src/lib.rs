//! # Nodecraft: Graph-Based Modular Synthesis Core
//!
//! `nodecraft` is the signal-processing heart of a node-graph synthesizer:
//! an undoable project model, a graph compiler, a stateful DSP node
//! library, and a realtime engine, wired together by lock-free message
//! queues. Users wire oscillators, filters, sequencers, arithmetic, delay
//! lines, and envelopes into a directed graph; playback renders a stereo
//! stream at 44.1 kHz.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Editor context                          │
//! │  Model ── Action ──► Project             │   undo/redo snapshots,
//! │    │ broadcast (project, action)         │   validation, .ncft files
//! │    ▼                                     │
//! │  AudioView ── compile ──► Unit           │   topological plan with
//! └────│─────────────────────────▲───────────┘   cycle-breaking
//!      │ control SPSC            │ feedback SPSC
//! ┌────▼─────────────────────────│───────────┐
//! │  Realtime context            │           │
//! │  AudioEngine: plan interpreter over      │   node state survives
//! │  wire scratch + NodeState map            │   plan swaps
//! └──────────────────────────────────────────┘
//! ```
//!
//! Cycles are legal as long as they pass through a `Delay` or `Hold`: the
//! compiler splits those nodes into a write half and a read half, which
//! turns the loop into a one-sample recurrence the topological sort can
//! order.
//!
//! ## Quick Start
//!
//! ```rust
//! use nodecraft::prelude::*;
//!
//! let (mut engine, handle) = AudioEngine::new();
//! let mut model = Model::new();
//! model.add_view(Box::new(AudioView::new(handle)));
//!
//! // A 440 Hz sine straight to the stereo output.
//! let freq = match model.update(Action::CreateNode {
//!     kind: NodeKind::Const, x: 25, y: 25,
//! }) {
//!     Ok(Some(ActionOutput::Created(id))) => id,
//!     _ => unreachable!(),
//! };
//! model.update(Action::SetParam {
//!     id: freq, name: "value".into(), value: ParamValue::Num(440.0),
//! }).unwrap();
//! let sine = match model.update(Action::CreateNode {
//!     kind: NodeKind::Sine, x: 150, y: 25,
//! }) {
//!     Ok(Some(ActionOutput::Created(id))) => id,
//!     _ => unreachable!(),
//! };
//! let out = match model.update(Action::CreateNode {
//!     kind: NodeKind::AudioOut, x: 300, y: 25,
//! }) {
//!     Ok(Some(ActionOutput::Created(id))) => id,
//!     _ => unreachable!(),
//! };
//! model.update(Action::ConnectNodes { src: freq, src_port: 0, dst: sine, dst_port: 0 }).unwrap();
//! model.update(Action::ConnectNodes { src: sine, src_port: 0, dst: out, dst_port: 0 }).unwrap();
//! model.update(Action::ConnectNodes { src: sine, src_port: 0, dst: out, dst_port: 1 }).unwrap();
//! model.update(Action::Play).unwrap();
//!
//! // The realtime side renders frame by frame (normally on its own thread).
//! let mut buffer = [0.0f32; 128];
//! engine.render(&mut buffer);
//! ```
//!
//! ## Module Documentation
//!
//! - [`model`] - Project data model: nodes, edges, grids, ids
//! - [`schema`] - The closed node-kind set and its schemas
//! - [`action`] - Actions, undo/redo, the editing model
//! - [`serialize`] - `.ncft` persistence and legacy-payload repair
//! - [`validate`] - Total, pure project validation
//! - [`compiler`] - Module inlining, cycle-breaking, plan emission
//! - [`nodes`] - Stateful DSP node library
//! - [`engine`] - Realtime plan interpreter and message queues
//! - [`views`] - View broadcast and the audio bridge
//! - [`music`] - Scales and note-to-frequency tables

pub mod action;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod model;
pub mod music;
pub mod nodes;
pub mod rng;
pub mod schema;
pub mod serialize;
pub mod validate;
pub mod views;

/// Fixed engine sample rate in Hz.
pub const SAMPLE_RATE: f64 = 44_100.0;

/// Clock pulses per quarter note.
pub const CLOCK_PPQ: u32 = 24;

/// Sequencer steps per beat (sixteenth notes).
pub const STEPS_PER_BEAT: u32 = 4;

/// Clock pulses per sequencer step.
pub const CLOCK_PPS: u32 = CLOCK_PPQ / STEPS_PER_BEAT;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{Action, ActionOutput, Model, MAX_UNDO_STEPS};
    pub use crate::compiler::{compile, connect_would_cycle, NodeSeed, Op, Src, Step, Unit};
    pub use crate::engine::{AudioEngine, ControlMsg, EngineHandle, FeedbackMsg, OUT_SCALE};
    pub use crate::error::{CompileError, ModelError, ParseError};
    pub use crate::model::{
        Grid, Node, NodeId, ParamValue, PortRef, Project, EDGE_PADDING, MAX_NAME_LEN,
        MAX_TITLE_LEN,
    };
    pub use crate::music::{gen_scale, note_to_freq, parse_note, ScaleNote};
    pub use crate::nodes::NodeState;
    pub use crate::schema::{NodeKind, NodeSchema};
    pub use crate::serialize::{deserialize, normalize, serialize, FILE_EXT};
    pub use crate::validate::{validate, ValidateIssue};
    pub use crate::views::{AudioView, View};
    pub use crate::{CLOCK_PPQ, CLOCK_PPS, SAMPLE_RATE, STEPS_PER_BEAT};
}

pub use prelude::*;
