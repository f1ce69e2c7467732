//! Realtime Audio Engine
//!
//! Interprets compiled `Unit` plans at sample rate and exchanges messages
//! with the editor thread over two lock-free SPSC rings: control messages
//! in, feedback (step positions, scope captures, clock pulses) out. The
//! engine never blocks, drains a bounded number of control messages per
//! frame, and keeps node state across plan swaps so edits do not reset
//! phase, envelopes, or delay lines.

use crate::compiler::{ArithOp, NodeSeed, Op, Src, Unit};
use crate::model::{Grid, NodeId};
use crate::nodes::{NodeState, UpdateCtx};
use crate::SAMPLE_RATE;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::collections::HashMap;
use tracing::{debug, error, warn};

/// Headroom scaling applied to both output channels.
pub const OUT_SCALE: f64 = 0.3;

/// Control messages drained per frame, at most.
pub const MAX_MSGS_PER_FRAME: usize = 32;

const CTRL_QUEUE_LEN: usize = 256;
const FEEDBACK_QUEUE_LEN: usize = 1024;

/// Most inputs any plan step can have (ADSR's five, rounded up).
const MAX_STEP_INPUTS: usize = 8;

/// Editor → engine control messages.
///
/// Small edits arrive as direct messages; structural edits arrive as a
/// freshly compiled `NewUnit`.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMsg {
    NewUnit(Box<Unit>),
    SetParam {
        node: NodeId,
        name: String,
        value: f64,
    },
    SetCell {
        node: NodeId,
        pattern: usize,
        step: usize,
        row: usize,
        value: u8,
    },
    QueuePattern {
        node: NodeId,
        pattern: usize,
        data: Option<Grid>,
    },
    /// Wholesale state replacement for scale and row-count edits.
    SetState { node: NodeId, seed: Box<NodeSeed> },
    NoteOn {
        node: NodeId,
        note: u8,
        velocity: u8,
    },
    Play,
    Stop,
}

/// Engine → editor feedback messages, re-emitted as model actions on the
/// editor's tick.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackMsg {
    SetCurStep { node: NodeId, step: usize },
    SetPattern { node: NodeId, pattern: usize },
    SendSamples { node: NodeId, samples: Vec<f32> },
    ClockPulse { node: NodeId, time: f64 },
    NoteOn { node: NodeId, note: u8, velocity: u8 },
}

/// Editor-side endpoint: send control, drain feedback.
pub struct EngineHandle {
    ctrl_tx: HeapProd<ControlMsg>,
    feedback_rx: HeapCons<FeedbackMsg>,
}

impl EngineHandle {
    /// Enqueue a control message. Returns false (and drops the message)
    /// when the engine has fallen behind and the queue is full.
    pub fn send(&mut self, msg: ControlMsg) -> bool {
        match self.ctrl_tx.try_push(msg) {
            Ok(()) => true,
            Err(dropped) => {
                warn!(?dropped, "control queue full, message dropped");
                false
            }
        }
    }

    /// Pop one pending feedback message.
    pub fn poll(&mut self) -> Option<FeedbackMsg> {
        self.feedback_rx.try_pop()
    }
}

/// The realtime audio engine. Owns its node state exclusively after
/// hand-off; the editor only ever talks to it through the queues.
pub struct AudioEngine {
    sample_rate: f64,
    play_pos: f64,
    unit: Option<Unit>,
    nodes: HashMap<NodeId, NodeState>,
    wires: Vec<f64>,
    out_scratch: Vec<f64>,
    feedback_scratch: Vec<FeedbackMsg>,
    ctrl_rx: HeapCons<ControlMsg>,
    feedback_tx: HeapProd<FeedbackMsg>,
    /// Set when the plan referenced state it cannot have; the engine goes
    /// silent and reports once instead of aborting.
    plan_fault: bool,
}

impl AudioEngine {
    /// Create an engine and its editor-side handle at the standard rate.
    pub fn new() -> (AudioEngine, EngineHandle) {
        Self::with_sample_rate(SAMPLE_RATE)
    }

    pub fn with_sample_rate(sample_rate: f64) -> (AudioEngine, EngineHandle) {
        let (ctrl_tx, ctrl_rx) = HeapRb::<ControlMsg>::new(CTRL_QUEUE_LEN).split();
        let (feedback_tx, feedback_rx) = HeapRb::<FeedbackMsg>::new(FEEDBACK_QUEUE_LEN).split();
        (
            AudioEngine {
                sample_rate,
                play_pos: 0.0,
                unit: None,
                nodes: HashMap::new(),
                wires: Vec::new(),
                out_scratch: Vec::new(),
                feedback_scratch: Vec::new(),
                ctrl_rx,
                feedback_tx,
                plan_fault: false,
            },
            EngineHandle {
                ctrl_tx,
                feedback_rx,
            },
        )
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Seconds since play start.
    pub fn play_pos(&self) -> f64 {
        self.play_pos
    }

    /// Render one stereo frame.
    pub fn render_frame(&mut self) -> (f64, f64) {
        for _ in 0..MAX_MSGS_PER_FRAME {
            match self.ctrl_rx.try_pop() {
                Some(msg) => self.dispatch(msg),
                None => break,
            }
        }

        let frame = if self.plan_fault {
            (0.0, 0.0)
        } else {
            self.interpret()
        };

        self.play_pos += 1.0 / self.sample_rate;

        // Hand feedback to the editor; drop on overflow rather than block.
        for msg in self.feedback_scratch.drain(..) {
            if self.feedback_tx.try_push(msg).is_err() {
                break;
            }
        }

        frame
    }

    /// Render interleaved stereo into `out` (length must be even).
    pub fn render(&mut self, out: &mut [f32]) {
        for frame in out.chunks_exact_mut(2) {
            let (l, r) = self.render_frame();
            frame[0] = l as f32;
            frame[1] = r as f32;
        }
    }

    fn interpret(&mut self) -> (f64, f64) {
        let Some(unit) = self.unit.take() else {
            return (0.0, 0.0);
        };

        let mut frame = (0.0, 0.0);
        let mut inputs = [0.0f64; MAX_STEP_INPUTS];
        let mut fault = false;

        for step in &unit.plan {
            match &step.op {
                Op::Arith { op, a, b, out } => {
                    let a = self.read(*a);
                    let b = self.read(*b);
                    self.wires[*out] = eval_arith(*op, a, b);
                }
                Op::Copy { a, out } => {
                    self.wires[*out] = self.read(*a);
                }
                Op::Output { left, right } => {
                    frame = (self.read(*left) * OUT_SCALE, self.read(*right) * OUT_SCALE);
                }
                Op::Update {
                    kind,
                    inputs: srcs,
                    outputs,
                } => {
                    let arity = srcs.len().min(MAX_STEP_INPUTS);
                    for (slot, src) in inputs.iter_mut().zip(srcs.iter()) {
                        *slot = self.read(*src);
                    }
                    let n = outputs.len();
                    self.out_scratch[..n].fill(0.0);

                    let ok = match self.nodes.get_mut(&step.node) {
                        Some(state) => {
                            let mut ctx = UpdateCtx {
                                sample_rate: self.sample_rate,
                                time: self.play_pos,
                                node: step.node,
                                feedback: &mut self.feedback_scratch,
                            };
                            state.update(*kind, &mut ctx, &inputs[..arity],
                                &mut self.out_scratch[..n])
                        }
                        None => false,
                    };

                    if !ok {
                        // A step the engine cannot execute is fatal for this
                        // plan: silence and report once.
                        error!(node = %step.node, ?kind, "unexecutable plan step");
                        fault = true;
                        break;
                    }

                    for (i, &wire) in outputs.iter().enumerate() {
                        let v = self.out_scratch[i];
                        // A node that produced NaN contributes silence, not
                        // a poisoned graph.
                        self.wires[wire] = if v.is_finite() { v } else { 0.0 };
                    }
                }
            }
        }

        self.unit = Some(unit);
        if fault {
            self.plan_fault = true;
            return (0.0, 0.0);
        }
        frame
    }

    #[inline]
    fn read(&self, src: Src) -> f64 {
        match src {
            Src::Wire(w) => self.wires[w],
            Src::Const(c) => c,
        }
    }

    fn dispatch(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::NewUnit(unit) => self.install_unit(*unit),
            ControlMsg::SetParam { node, name, value } => {
                if let Some(state) = self.nodes.get_mut(&node) {
                    state.set_param(&name, value);
                }
            }
            ControlMsg::SetCell {
                node,
                pattern,
                step,
                row,
                value,
            } => {
                if let Some(state) = self.nodes.get_mut(&node) {
                    state.set_cell(pattern, step, row, value);
                }
            }
            ControlMsg::QueuePattern {
                node,
                pattern,
                data,
            } => {
                if let Some(state) = self.nodes.get_mut(&node) {
                    state.queue_pattern(pattern, data);
                }
            }
            ControlMsg::SetState { node, seed } => {
                if let Some(state) = self.nodes.get_mut(&node) {
                    state.reseed(&seed, self.sample_rate);
                }
            }
            ControlMsg::NoteOn {
                node,
                note,
                velocity,
            } => {
                if let Some(state) = self.nodes.get_mut(&node) {
                    state.note_on(note, velocity);
                    self.feedback_scratch.push(FeedbackMsg::NoteOn {
                        node,
                        note,
                        velocity,
                    });
                }
            }
            ControlMsg::Play => {
                self.play_pos = 0.0;
            }
            ControlMsg::Stop => {
                debug!("engine stopped, state purged");
                self.unit = None;
                self.nodes.clear();
                self.wires.clear();
                self.feedback_scratch.clear();
                self.play_pos = 0.0;
                self.plan_fault = false;
            }
        }
    }

    /// Install a freshly compiled unit. Node state with a matching kind is
    /// reused (reseeded with the new configuration); state for ids no
    /// longer in the plan is kept until Stop, since a disconnected delay
    /// line may be reconnected.
    fn install_unit(&mut self, unit: Unit) {
        for (&id, seed) in &unit.seeds {
            match self.nodes.get_mut(&id) {
                Some(state) if state.serves(seed.kind) => {
                    state.reseed(seed, self.sample_rate);
                }
                _ => {
                    if let Some(state) = NodeState::from_seed(id, seed, self.sample_rate) {
                        self.nodes.insert(id, state);
                    }
                }
            }
        }

        self.wires.clear();
        self.wires.resize(unit.num_wires, 0.0);

        let max_outs = unit
            .plan
            .iter()
            .map(|s| match &s.op {
                Op::Update { outputs, .. } => outputs.len(),
                _ => 0,
            })
            .max()
            .unwrap_or(0);
        self.out_scratch.clear();
        self.out_scratch.resize(max_outs.max(2), 0.0);

        self.plan_fault = false;
        debug!(steps = unit.plan.len(), wires = unit.num_wires, "unit installed");
        self.unit = Some(unit);
    }
}

fn eval_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        // Division by zero yields zero, not infinity.
        ArithOp::Div => {
            if b == 0.0 {
                0.0
            } else {
                a / b
            }
        }
        // Remainder of a zero or non-finite divisor would be NaN; clamp.
        ArithOp::Mod => {
            let r = a % b;
            if r.is_finite() {
                r
            } else {
                0.0
            }
        }
        ArithOp::Equal => {
            if a == b {
                1.0
            } else {
                0.0
            }
        }
        ArithOp::Greater => {
            if a > b {
                1.0
            } else {
                0.0
            }
        }
    }
}
