//! Node Kind Registry
//!
//! The closed set of node kinds and their schemas: input ports with the
//! default value used when unconnected, output port names, parameter
//! defaults, the state fields that persist in project files, and the
//! `unique` / `internal` flags. `GateSeq` and `Module` derive their port
//! arity from node state rather than the schema table.

use serde::{Deserialize, Serialize};

/// The closed set of node kinds.
///
/// The four `*_read` / `*_write` kinds are internal: they only exist in
/// compiled plans, where the compiler splits each `Delay` and `Hold` into a
/// write half (taking the original inputs) and a read half (producing the
/// original outputs) to break feedback cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Add,
    #[serde(rename = "ADSR")]
    Adsr,
    AudioOut,
    BitCrush,
    Clock,
    ClockDiv,
    ClockOut,
    Const,
    Delay,
    Distort,
    Div,
    Equal,
    Filter,
    Fold,
    GateSeq,
    Greater,
    Hold,
    Knob,
    MidiIn,
    Mod,
    MonoSeq,
    Mul,
    Noise,
    Nop,
    Notes,
    Pulse,
    Saw,
    Scope,
    Sine,
    Slide,
    Sub,
    Tri,
    Module,
    #[serde(rename = "delay_read")]
    DelayRead,
    #[serde(rename = "delay_write")]
    DelayWrite,
    #[serde(rename = "hold_read")]
    HoldRead,
    #[serde(rename = "hold_write")]
    HoldWrite,
}

/// Definition of one input port: name and the value substituted when the
/// port is unconnected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputDef {
    pub name: &'static str,
    pub default: f64,
}

const fn input(name: &'static str, default: f64) -> InputDef {
    InputDef { name, default }
}

/// Default value of a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    Num(f64),
    Str(&'static str),
    Null,
}

/// Definition of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamDef {
    pub name: &'static str,
    pub default: ParamDefault,
}

const fn num_param(name: &'static str, default: f64) -> ParamDef {
    ParamDef {
        name,
        default: ParamDefault::Num(default),
    }
}

const fn str_param(name: &'static str, default: &'static str) -> ParamDef {
    ParamDef {
        name,
        default: ParamDefault::Str(default),
    }
}

const fn null_param(name: &'static str) -> ParamDef {
    ParamDef {
        name,
        default: ParamDefault::Null,
    }
}

/// Schema of a node kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSchema {
    /// Wire / display name.
    pub name: &'static str,
    /// Input ports in order. For `Module` the table is empty and the real
    /// arity comes from the node's port maps.
    pub ins: &'static [InputDef],
    /// Output port names. For `GateSeq` and `Module` the real arity is
    /// derived from node state.
    pub outs: &'static [&'static str],
    /// Parameters with defaults.
    pub params: &'static [ParamDef],
    /// State fields persisted in project files.
    pub state: &'static [&'static str],
    /// State fields kept only while playing: reset on Stop, never saved.
    pub transient_state: &'static [&'static str],
    /// At most one node of this kind per project.
    pub unique: bool,
    /// Never user-creatable; produced by the compiler only.
    pub internal: bool,
}

const EMPTY: NodeSchema = NodeSchema {
    name: "",
    ins: &[],
    outs: &[],
    params: &[],
    state: &[],
    transient_state: &[],
    unique: false,
    internal: false,
};

const OSC_PARAMS: &[ParamDef] = &[num_param("minVal", -1.0), num_param("maxVal", 1.0)];

static ADD: NodeSchema = NodeSchema {
    name: "Add",
    ins: &[input("in0", 0.0), input("in1", 0.0)],
    outs: &["out"],
    ..EMPTY
};

static ADSR: NodeSchema = NodeSchema {
    name: "ADSR",
    ins: &[
        input("gate", 0.0),
        input("att", 0.02),
        input("dec", 0.1),
        input("sus", 0.2),
        input("rel", 0.1),
    ],
    outs: &["out"],
    ..EMPTY
};

static AUDIO_OUT: NodeSchema = NodeSchema {
    name: "AudioOut",
    ins: &[input("left", 0.0), input("right", 0.0)],
    unique: true,
    ..EMPTY
};

static BIT_CRUSH: NodeSchema = NodeSchema {
    name: "BitCrush",
    ins: &[input("in", 0.0)],
    outs: &["out"],
    params: &[num_param("bitDepth", 8.0), num_param("factor", 1.0)],
    ..EMPTY
};

static CLOCK: NodeSchema = NodeSchema {
    name: "Clock",
    outs: &["out"],
    params: &[
        num_param("value", 120.0),
        num_param("minVal", 60.0),
        num_param("maxVal", 240.0),
    ],
    ..EMPTY
};

static CLOCK_DIV: NodeSchema = NodeSchema {
    name: "ClockDiv",
    ins: &[input("clock", 0.0)],
    outs: &["out"],
    params: &[num_param("factor", 2.0)],
    ..EMPTY
};

static CLOCK_OUT: NodeSchema = NodeSchema {
    name: "ClockOut",
    ins: &[input("clock", 0.0)],
    ..EMPTY
};

static CONST: NodeSchema = NodeSchema {
    name: "Const",
    outs: &["out"],
    params: &[num_param("value", 0.0)],
    ..EMPTY
};

static DELAY: NodeSchema = NodeSchema {
    name: "Delay",
    ins: &[input("in", 0.0), input("time", 0.0)],
    outs: &["out"],
    params: &[num_param("maxDelaySec", 1.0)],
    ..EMPTY
};

static DISTORT: NodeSchema = NodeSchema {
    name: "Distort",
    ins: &[input("in", 0.0), input("amt", 0.0)],
    outs: &["out"],
    ..EMPTY
};

static DIV: NodeSchema = NodeSchema {
    name: "Div",
    ins: &[input("in0", 0.0), input("in1", 1.0)],
    outs: &["out"],
    ..EMPTY
};

static EQUAL: NodeSchema = NodeSchema {
    name: "Equal",
    ins: &[input("in0", 0.0), input("in1", 0.0)],
    outs: &["out"],
    ..EMPTY
};

static FILTER: NodeSchema = NodeSchema {
    name: "Filter",
    ins: &[
        input("in", 0.0),
        input("cutoff", 1.0),
        input("reso", 0.0),
    ],
    outs: &["out"],
    ..EMPTY
};

static FOLD: NodeSchema = NodeSchema {
    name: "Fold",
    ins: &[input("in", 0.0), input("rate", 1.0)],
    outs: &["out"],
    ..EMPTY
};

static GATE_SEQ: NodeSchema = NodeSchema {
    name: "GateSeq",
    ins: &[input("clock", 0.0)],
    // Real arity derived from numRows; see `Node::out_names`.
    outs: &[],
    state: &["patterns", "curPattern", "numRows"],
    ..EMPTY
};

static GREATER: NodeSchema = NodeSchema {
    name: "Greater",
    ins: &[input("in0", 0.0), input("in1", 0.0)],
    outs: &["out"],
    ..EMPTY
};

static HOLD: NodeSchema = NodeSchema {
    name: "Hold",
    ins: &[input("in", 0.0), input("trig", 0.0)],
    outs: &["out"],
    ..EMPTY
};

static KNOB: NodeSchema = NodeSchema {
    name: "Knob",
    outs: &["out"],
    params: &[
        num_param("value", 0.0),
        num_param("minVal", 0.0),
        num_param("maxVal", 1.0),
        null_param("controlId"),
    ],
    ..EMPTY
};

static MIDI_IN: NodeSchema = NodeSchema {
    name: "MidiIn",
    outs: &["freq", "gate"],
    params: &[null_param("channel")],
    ..EMPTY
};

static MOD: NodeSchema = NodeSchema {
    name: "Mod",
    ins: &[input("in0", 0.0), input("in1", 1.0)],
    outs: &["out"],
    ..EMPTY
};

static MONO_SEQ: NodeSchema = NodeSchema {
    name: "MonoSeq",
    ins: &[input("clock", 0.0), input("gateT", 0.1)],
    outs: &["freq", "gate"],
    state: &[
        "patterns",
        "curPattern",
        "scaleRoot",
        "scaleName",
        "numOctaves",
    ],
    ..EMPTY
};

static MUL: NodeSchema = NodeSchema {
    name: "Mul",
    ins: &[input("in0", 1.0), input("in1", 1.0)],
    outs: &["out"],
    ..EMPTY
};

static NOISE: NodeSchema = NodeSchema {
    name: "Noise",
    outs: &["out"],
    params: &[num_param("minVal", 0.0), num_param("maxVal", 1.0)],
    ..EMPTY
};

static NOP: NodeSchema = NodeSchema {
    name: "Nop",
    ins: &[input("in", 0.0)],
    outs: &["out"],
    ..EMPTY
};

static NOTES: NodeSchema = NodeSchema {
    name: "Notes",
    params: &[str_param("text", "")],
    ..EMPTY
};

static PULSE: NodeSchema = NodeSchema {
    name: "Pulse",
    ins: &[input("freq", 0.0), input("pw", 0.5)],
    outs: &["out"],
    params: OSC_PARAMS,
    ..EMPTY
};

static SAW: NodeSchema = NodeSchema {
    name: "Saw",
    ins: &[input("freq", 0.0)],
    outs: &["out"],
    params: OSC_PARAMS,
    ..EMPTY
};

static SCOPE: NodeSchema = NodeSchema {
    name: "Scope",
    ins: &[input("in", 0.0)],
    params: &[
        num_param("minVal", -1.0),
        num_param("maxVal", 1.0),
        num_param("sendRate", 20.0),
        num_param("sendSize", 5.0),
        num_param("historyLen", 150.0),
    ],
    transient_state: &["samples"],
    ..EMPTY
};

static SINE: NodeSchema = NodeSchema {
    name: "Sine",
    ins: &[input("freq", 0.0), input("sync", 0.0)],
    outs: &["out"],
    params: OSC_PARAMS,
    ..EMPTY
};

static SLIDE: NodeSchema = NodeSchema {
    name: "Slide",
    ins: &[input("in", 0.0), input("rate", 0.1)],
    outs: &["out"],
    ..EMPTY
};

static SUB: NodeSchema = NodeSchema {
    name: "Sub",
    ins: &[input("in0", 0.0), input("in1", 0.0)],
    outs: &["out"],
    ..EMPTY
};

static TRI: NodeSchema = NodeSchema {
    name: "Tri",
    ins: &[input("freq", 0.0)],
    outs: &["out"],
    params: OSC_PARAMS,
    ..EMPTY
};

static MODULE: NodeSchema = NodeSchema {
    name: "Module",
    // Arity derived from the node's port maps.
    state: &["nodes", "inMap", "outMap"],
    ..EMPTY
};

static DELAY_READ: NodeSchema = NodeSchema {
    name: "delay_read",
    outs: &["out"],
    internal: true,
    ..EMPTY
};

static DELAY_WRITE: NodeSchema = NodeSchema {
    name: "delay_write",
    ins: &[input("in", 0.0), input("time", 0.0)],
    internal: true,
    ..EMPTY
};

static HOLD_READ: NodeSchema = NodeSchema {
    name: "hold_read",
    outs: &["out"],
    internal: true,
    ..EMPTY
};

static HOLD_WRITE: NodeSchema = NodeSchema {
    name: "hold_write",
    ins: &[input("in", 0.0), input("trig", 0.0)],
    internal: true,
    ..EMPTY
};

impl NodeKind {
    /// Every kind, internal ones included.
    pub const ALL: [NodeKind; 37] = [
        NodeKind::Add,
        NodeKind::Adsr,
        NodeKind::AudioOut,
        NodeKind::BitCrush,
        NodeKind::Clock,
        NodeKind::ClockDiv,
        NodeKind::ClockOut,
        NodeKind::Const,
        NodeKind::Delay,
        NodeKind::Distort,
        NodeKind::Div,
        NodeKind::Equal,
        NodeKind::Filter,
        NodeKind::Fold,
        NodeKind::GateSeq,
        NodeKind::Greater,
        NodeKind::Hold,
        NodeKind::Knob,
        NodeKind::MidiIn,
        NodeKind::Mod,
        NodeKind::MonoSeq,
        NodeKind::Mul,
        NodeKind::Noise,
        NodeKind::Nop,
        NodeKind::Notes,
        NodeKind::Pulse,
        NodeKind::Saw,
        NodeKind::Scope,
        NodeKind::Sine,
        NodeKind::Slide,
        NodeKind::Sub,
        NodeKind::Tri,
        NodeKind::Module,
        NodeKind::DelayRead,
        NodeKind::DelayWrite,
        NodeKind::HoldRead,
        NodeKind::HoldWrite,
    ];

    /// The schema for this kind.
    pub fn schema(self) -> &'static NodeSchema {
        match self {
            NodeKind::Add => &ADD,
            NodeKind::Adsr => &ADSR,
            NodeKind::AudioOut => &AUDIO_OUT,
            NodeKind::BitCrush => &BIT_CRUSH,
            NodeKind::Clock => &CLOCK,
            NodeKind::ClockDiv => &CLOCK_DIV,
            NodeKind::ClockOut => &CLOCK_OUT,
            NodeKind::Const => &CONST,
            NodeKind::Delay => &DELAY,
            NodeKind::Distort => &DISTORT,
            NodeKind::Div => &DIV,
            NodeKind::Equal => &EQUAL,
            NodeKind::Filter => &FILTER,
            NodeKind::Fold => &FOLD,
            NodeKind::GateSeq => &GATE_SEQ,
            NodeKind::Greater => &GREATER,
            NodeKind::Hold => &HOLD,
            NodeKind::Knob => &KNOB,
            NodeKind::MidiIn => &MIDI_IN,
            NodeKind::Mod => &MOD,
            NodeKind::MonoSeq => &MONO_SEQ,
            NodeKind::Mul => &MUL,
            NodeKind::Noise => &NOISE,
            NodeKind::Nop => &NOP,
            NodeKind::Notes => &NOTES,
            NodeKind::Pulse => &PULSE,
            NodeKind::Saw => &SAW,
            NodeKind::Scope => &SCOPE,
            NodeKind::Sine => &SINE,
            NodeKind::Slide => &SLIDE,
            NodeKind::Sub => &SUB,
            NodeKind::Tri => &TRI,
            NodeKind::Module => &MODULE,
            NodeKind::DelayRead => &DELAY_READ,
            NodeKind::DelayWrite => &DELAY_WRITE,
            NodeKind::HoldRead => &HOLD_READ,
            NodeKind::HoldWrite => &HOLD_WRITE,
        }
    }

    /// Wire / display name.
    pub fn name(self) -> &'static str {
        self.schema().name
    }

    /// Parse a wire name back into a kind.
    pub fn from_name(name: &str) -> Option<NodeKind> {
        NodeKind::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Stateless arithmetic kinds evaluated inline by the plan interpreter.
    pub fn is_pure(self) -> bool {
        matches!(
            self,
            NodeKind::Add
                | NodeKind::Sub
                | NodeKind::Mul
                | NodeKind::Div
                | NodeKind::Mod
                | NodeKind::Equal
                | NodeKind::Greater
                | NodeKind::Nop
        )
    }

    /// Kinds the compiler splits into `*_write` / `*_read` halves.
    pub fn is_cycle_breaker(self) -> bool {
        matches!(self, NodeKind::Delay | NodeKind::Hold)
    }
}

impl NodeSchema {
    /// Look up an input index by port name.
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.ins.iter().position(|i| i.name == name)
    }

    /// Look up a parameter definition by name.
    pub fn param(&self, name: &str) -> Option<&'static ParamDef> {
        self.params.iter().find(|p| p.name == name)
    }
}
