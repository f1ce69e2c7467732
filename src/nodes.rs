//! Stateful Audio Node Library
//!
//! Per-sample DSP state for every node kind the compiler cannot fold into
//! pure arithmetic. Each state is allocated from a compile-time `NodeSeed`
//! and advanced one sample at a time by `update`. What survives a plan swap
//! (oscillator phase, delay buffers, envelope position, sequencer counters)
//! and what is re-seeded (parameters, patterns, scales) is decided per kind
//! in `reseed`.

use crate::compiler::NodeSeed;
use crate::engine::FeedbackMsg;
use crate::model::{Grid, NodeId};
use crate::music::{self, ScaleNote};
use crate::rng::Rng;
use crate::schema::NodeKind;
use crate::{CLOCK_PPQ, CLOCK_PPS};
use libm::Libm;

/// Context handed to every stateful update.
pub struct UpdateCtx<'a> {
    pub sample_rate: f64,
    /// Seconds since play start.
    pub time: f64,
    /// The node being updated.
    pub node: NodeId,
    /// Feedback messages produced this frame; the engine drains this into
    /// the outgoing queue after the frame.
    pub feedback: &'a mut Vec<FeedbackMsg>,
}

/// Rising zero-crossing detector shared by everything clocked.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EdgeDetect {
    last: f64,
}

impl EdgeDetect {
    /// True exactly when the signal crosses from <= 0 to > 0.
    pub fn rising(&mut self, value: f64) -> bool {
        let edge = value > 0.0 && self.last <= 0.0;
        self.last = value;
        edge
    }
}

/// Oscillator waveform selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wave {
    Sine,
    Saw,
    Tri,
    Pulse,
}

/// Phase-accumulator oscillator backing `Sine`, `Saw`, `Tri`, and `Pulse`.
#[derive(Debug, Clone)]
pub struct OscState {
    wave: Wave,
    phase: f64,
    sync: EdgeDetect,
    min: f64,
    max: f64,
}

impl OscState {
    fn new(wave: Wave, seed: &NodeSeed) -> Self {
        Self {
            wave,
            phase: 0.0,
            sync: EdgeDetect::default(),
            min: seed_num(seed, "minVal", -1.0),
            max: seed_num(seed, "maxVal", 1.0),
        }
    }

    /// One sample. `sync` is only wired for `Sine`; the others pass 0.
    fn update(&mut self, ctx: &UpdateCtx, freq: f64, sync: f64) -> f64 {
        if self.wave == Wave::Sine && self.sync.rising(sync) {
            self.phase = 0.0;
        }

        // Unit-range waveform before mapping to [min, max]
        let unit = match self.wave {
            Wave::Sine => (Libm::<f64>::sin(self.phase * core::f64::consts::TAU) + 1.0) * 0.5,
            Wave::Saw => self.phase,
            Wave::Tri => 1.0 - Libm::<f64>::fabs(2.0 * self.phase - 1.0),
            Wave::Pulse => 0.0, // handled by caller with pw
        };
        let out = self.min + (self.max - self.min) * unit;

        let next = self.phase + freq / ctx.sample_rate;
        self.phase = next - Libm::<f64>::floor(next);
        if self.phase < 0.0 {
            self.phase += 1.0;
        }
        out
    }

    fn update_pulse(&mut self, ctx: &UpdateCtx, freq: f64, pw: f64) -> f64 {
        let out = if self.phase < pw.clamp(0.0, 1.0) {
            self.max
        } else {
            self.min
        };
        let next = self.phase + freq / ctx.sample_rate;
        self.phase = next - Libm::<f64>::floor(next);
        if self.phase < 0.0 {
            self.phase += 1.0;
        }
        out
    }

    fn reseed(&mut self, seed: &NodeSeed) {
        // Phase survives; range is configuration.
        self.min = seed_num(seed, "minVal", -1.0);
        self.max = seed_num(seed, "maxVal", 1.0);
    }
}

/// White noise mapped to [minVal, maxVal], seeded from the node id so the
/// stream is reproducible and survives plan swaps.
#[derive(Debug, Clone)]
pub struct NoiseState {
    rng: Rng,
    min: f64,
    max: f64,
}

impl NoiseState {
    fn new(id: NodeId, seed: &NodeSeed) -> Self {
        Self {
            rng: Rng::from_seed(id.0),
            min: seed_num(seed, "minVal", 0.0),
            max: seed_num(seed, "maxVal", 1.0),
        }
    }

    fn update(&mut self) -> f64 {
        self.min + (self.max - self.min) * self.rng.next_f64()
    }
}

/// Master clock: square wave at `CLOCK_PPQ * bpm / 60` Hz, 50% duty.
#[derive(Debug, Clone)]
pub struct ClockState {
    bpm: f64,
    phase: f64,
}

impl ClockState {
    fn new(seed: &NodeSeed) -> Self {
        Self {
            bpm: seed_num(seed, "value", 120.0),
            phase: 0.0,
        }
    }

    fn update(&mut self, ctx: &UpdateCtx) -> f64 {
        let freq = f64::from(CLOCK_PPQ) * self.bpm / 60.0;
        let out = if self.phase < 0.5 { 1.0 } else { 0.0 };
        let next = self.phase + freq / ctx.sample_rate;
        self.phase = next - Libm::<f64>::floor(next);
        out
    }
}

/// Rising-edge counter; output flips every `factor` pulses.
#[derive(Debug, Clone)]
pub struct ClockDivState {
    factor: f64,
    edge: EdgeDetect,
    count: u64,
    level: f64,
}

impl ClockDivState {
    fn new(seed: &NodeSeed) -> Self {
        Self {
            factor: seed_num(seed, "factor", 2.0).max(1.0),
            edge: EdgeDetect::default(),
            count: 0,
            level: 0.0,
        }
    }

    fn update(&mut self, clock: f64) -> f64 {
        if self.edge.rising(clock) {
            self.count += 1;
            if self.count >= self.factor as u64 {
                self.count = 0;
                self.level = 1.0 - self.level;
            }
        }
        self.level
    }
}

/// `ClockOut`: reports pulses back to the editor.
#[derive(Debug, Clone, Default)]
pub struct ClockOutState {
    edge: EdgeDetect,
}

impl ClockOutState {
    fn update(&mut self, ctx: &mut UpdateCtx, clock: f64) {
        if self.edge.rising(clock) {
            ctx.feedback.push(FeedbackMsg::ClockPulse {
                node: ctx.node,
                time: ctx.time,
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvSegment {
    Off,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Four-segment envelope keyed off `gate`.
///
/// Attack, decay, and release track elapsed time from the segment start so
/// mid-segment duration changes re-shape rather than jump.
#[derive(Debug, Clone)]
pub struct AdsrState {
    segment: EnvSegment,
    gate: EdgeDetect,
    seg_start: f64,
    start_level: f64,
    level: f64,
}

impl AdsrState {
    fn new() -> Self {
        Self {
            segment: EnvSegment::Off,
            gate: EdgeDetect::default(),
            seg_start: 0.0,
            start_level: 0.0,
            level: 0.0,
        }
    }

    fn update(&mut self, ctx: &UpdateCtx, gate: f64, att: f64, dec: f64, sus: f64, rel: f64) -> f64 {
        let gate_high = gate > 0.0;
        if self.gate.rising(gate) {
            self.segment = EnvSegment::Attack;
            self.seg_start = ctx.time;
            self.start_level = self.level;
        } else if !gate_high
            && !matches!(self.segment, EnvSegment::Off | EnvSegment::Release)
        {
            self.segment = EnvSegment::Release;
            self.seg_start = ctx.time;
            self.start_level = self.level;
        }

        let elapsed = ctx.time - self.seg_start;
        let sus = sus.clamp(0.0, 1.0);
        match self.segment {
            EnvSegment::Off => self.level = 0.0,
            EnvSegment::Attack => {
                if att <= 0.0 || elapsed >= att {
                    self.level = 1.0;
                    self.segment = EnvSegment::Decay;
                    self.seg_start = ctx.time;
                    self.start_level = 1.0;
                } else {
                    self.level = self.start_level + (1.0 - self.start_level) * (elapsed / att);
                }
            }
            EnvSegment::Decay => {
                if dec <= 0.0 || elapsed >= dec {
                    self.level = sus;
                    self.segment = EnvSegment::Sustain;
                } else {
                    self.level = 1.0 + (sus - 1.0) * (elapsed / dec);
                }
            }
            EnvSegment::Sustain => self.level = sus,
            EnvSegment::Release => {
                if rel <= 0.0 || elapsed >= rel {
                    self.level = 0.0;
                    self.segment = EnvSegment::Off;
                } else {
                    self.level = self.start_level * (1.0 - elapsed / rel);
                }
            }
        }
        self.level
    }
}

/// Two-pole state-variable lowpass. `cutoff` is a normalized Nyquist
/// fraction in [0, 1], `reso` in [0, 1].
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    low: f64,
    band: f64,
}

impl FilterState {
    fn update(&mut self, input: f64, cutoff: f64, reso: f64) -> f64 {
        let cutoff = cutoff.clamp(0.0, 1.0);
        let reso = reso.clamp(0.0, 1.0);

        // f = 2 sin(pi * fc / fs) with fc = cutoff * fs / 2
        let f = (2.0 * Libm::<f64>::sin(core::f64::consts::PI * cutoff * 0.5)).min(0.99);
        let q = 1.0 - reso * 0.9;

        let high = input - self.low - q * self.band;
        self.band += f * high;
        self.low += f * self.band;

        if !self.low.is_finite() || !self.band.is_finite() {
            self.low = 0.0;
            self.band = 0.0;
        }
        self.low
    }
}

/// Bit-depth quantizer with sample-rate reduction.
#[derive(Debug, Clone)]
pub struct BitCrushState {
    bits: f64,
    factor: u32,
    held: f64,
    count: u32,
}

impl BitCrushState {
    fn new(seed: &NodeSeed) -> Self {
        Self {
            bits: seed_num(seed, "bitDepth", 8.0).clamp(1.0, 24.0),
            factor: seed_num(seed, "factor", 1.0).max(1.0) as u32,
            held: 0.0,
            count: 0,
        }
    }

    fn update(&mut self, input: f64) -> f64 {
        if self.count == 0 {
            let levels = Libm::<f64>::pow(2.0, self.bits);
            self.held = Libm::<f64>::round(input * levels) / levels;
        }
        self.count = (self.count + 1) % self.factor.max(1);
        self.held
    }
}

/// One-pole lag toward the input, `rate` seconds to close most of the gap.
#[derive(Debug, Clone, Default)]
pub struct SlideState {
    current: f64,
}

impl SlideState {
    fn update(&mut self, ctx: &UpdateCtx, input: f64, rate: f64) -> f64 {
        if rate <= 0.0 {
            self.current = input;
        } else {
            let step = (1.0 / (rate * ctx.sample_rate)).min(1.0);
            self.current += (input - self.current) * step;
        }
        self.current
    }
}

/// Delay line split by the compiler into a write half and a read half.
///
/// The read executes earlier in the plan than the write, so it sees the
/// delay time captured by the previous sample's write; that one-sample lag
/// is what breaks the cycle.
#[derive(Debug, Clone)]
pub struct DelayState {
    buf: Vec<f64>,
    write_pos: usize,
    max_delay_sec: f64,
    time: f64,
}

impl DelayState {
    fn new(seed: &NodeSeed, sample_rate: f64) -> Self {
        let max_delay_sec = seed_num(seed, "maxDelaySec", 1.0).max(0.0);
        let len = (max_delay_sec * sample_rate) as usize + 2;
        Self {
            buf: vec![0.0; len],
            write_pos: 0,
            max_delay_sec,
            time: 0.0,
        }
    }

    fn write(&mut self, input: f64, time: f64) {
        self.buf[self.write_pos] = input;
        self.write_pos = (self.write_pos + 1) % self.buf.len();
        self.time = time;
    }

    /// Linear interpolation between the two nearest samples.
    fn read(&self, sample_rate: f64) -> f64 {
        let delay = self.time.clamp(0.0, self.max_delay_sec) * sample_rate;
        let floor = Libm::<f64>::floor(delay);
        let frac = delay - floor;
        let s1 = self.read_at(floor as usize);
        let s2 = self.read_at(floor as usize + 1);
        s1 + (s2 - s1) * frac
    }

    fn read_at(&self, delay: usize) -> f64 {
        let len = self.buf.len();
        if delay >= len {
            return 0.0;
        }
        self.buf[(self.write_pos + len - delay - 1) % len]
    }

    fn reseed(&mut self, seed: &NodeSeed, sample_rate: f64) {
        let max = seed_num(seed, "maxDelaySec", 1.0).max(0.0);
        if (max - self.max_delay_sec).abs() > f64::EPSILON {
            // Content is kept only when the window does not change.
            self.max_delay_sec = max;
            self.buf = vec![0.0; (max * sample_rate) as usize + 2];
            self.write_pos = 0;
        }
    }
}

/// Sample-and-hold split into write/read halves like the delay.
#[derive(Debug, Clone, Default)]
pub struct HoldState {
    value: f64,
    trig: EdgeDetect,
}

impl HoldState {
    fn write(&mut self, input: f64, trig: f64) {
        if self.trig.rising(trig) {
            self.value = input;
        }
    }

    fn read(&self) -> f64 {
        self.value
    }
}

/// Shared step-advance machinery for the two sequencers.
#[derive(Debug, Clone)]
struct SeqClock {
    edge: EdgeDetect,
    /// Pulses seen since the start of the current pattern pass.
    pulse_count: u32,
    cur_step: usize,
}

impl SeqClock {
    fn new() -> Self {
        Self {
            edge: EdgeDetect::default(),
            pulse_count: 0,
            cur_step: 0,
        }
    }

    /// Advance on a clock sample. Returns `Some(step)` when a step boundary
    /// fires, and sets `wrapped` when that boundary wrapped to step 0.
    fn advance(&mut self, clock: f64, num_steps: usize, wrapped: &mut bool) -> Option<usize> {
        *wrapped = false;
        if num_steps == 0 || !self.edge.rising(clock) {
            return None;
        }
        let boundary = self.pulse_count % CLOCK_PPS == 0;
        let step = (self.pulse_count / CLOCK_PPS) as usize % num_steps;
        self.pulse_count += 1;
        if self.pulse_count >= CLOCK_PPS * num_steps as u32 {
            self.pulse_count = 0;
            *wrapped = true;
        }
        if boundary {
            self.cur_step = step;
            Some(step)
        } else {
            None
        }
    }
}

/// Monophonic step sequencer: outputs `(freq, gate)`.
#[derive(Debug, Clone)]
pub struct MonoSeqState {
    scale: Vec<ScaleNote>,
    patterns: Vec<Grid>,
    cur_pattern: usize,
    next_pattern: Option<usize>,
    clock: SeqClock,
    freq: f64,
    gate: f64,
    trig_time: f64,
    last_sent_step: Option<usize>,
}

impl MonoSeqState {
    fn new(seed: &NodeSeed) -> Self {
        let root = seed.scale_root.as_deref().unwrap_or("C2");
        let name = seed.scale_name.as_deref().unwrap_or("minor pentatonic");
        let octaves = seed.num_octaves.unwrap_or(1);
        Self {
            scale: music::gen_scale(root, name, octaves).unwrap_or_default(),
            patterns: seed.patterns.clone().unwrap_or_default(),
            cur_pattern: seed.cur_pattern.unwrap_or(0),
            next_pattern: None,
            clock: SeqClock::new(),
            freq: 0.0,
            gate: 0.0,
            trig_time: 0.0,
            last_sent_step: None,
        }
    }

    fn update(&mut self, ctx: &mut UpdateCtx, clock: f64, gate_time: f64) -> (f64, f64) {
        let num_steps = self
            .patterns
            .get(self.cur_pattern)
            .map_or(0, Grid::num_steps);

        let mut wrapped = false;
        if let Some(step) = self.clock.advance(clock, num_steps, &mut wrapped) {
            self.gate = 0.0;
            self.trig_time = 0.0;
            if let Some(row) = self
                .patterns
                .get(self.cur_pattern)
                .and_then(|g| g.active_row(step))
            {
                if let Some(note) = self.scale.get(row) {
                    self.freq = note.freq;
                    self.gate = 1.0;
                    self.trig_time = ctx.time;
                }
            }
            // One message per step change keeps the queue quiet.
            if self.last_sent_step != Some(step) {
                self.last_sent_step = Some(step);
                ctx.feedback.push(FeedbackMsg::SetCurStep {
                    node: ctx.node,
                    step,
                });
            }
        }

        if wrapped {
            if let Some(next) = self.next_pattern.take() {
                if next < self.patterns.len() {
                    self.cur_pattern = next;
                    ctx.feedback.push(FeedbackMsg::SetPattern {
                        node: ctx.node,
                        pattern: next,
                    });
                }
            }
        }

        if self.gate > 0.0 && ctx.time - self.trig_time > gate_time {
            self.gate = 0.0;
        }

        (self.freq, self.gate)
    }

    fn reseed(&mut self, seed: &NodeSeed) {
        let fresh = MonoSeqState::new(seed);
        self.scale = fresh.scale;
        self.patterns = fresh.patterns;
        self.cur_pattern = fresh.cur_pattern.min(self.patterns.len().saturating_sub(1));
        // Clock position and held note survive the swap.
    }

    fn set_cell(&mut self, pattern: usize, step: usize, row: usize, value: u8) {
        if let Some(grid) = self.patterns.get_mut(pattern) {
            if value != 0 {
                grid.clear_step(step);
            }
            grid.set(step, row, value);
        }
    }

    fn queue_pattern(&mut self, index: usize, data: Option<Grid>) {
        if let Some(grid) = data {
            if index >= self.patterns.len() {
                self.patterns.resize(index + 1, Grid::new(0, 0));
            }
            self.patterns[index] = grid;
        }
        if index < self.patterns.len() {
            self.next_pattern = Some(index);
        }
    }
}

/// Gate sequencer: one gate output per row, high for the first half of an
/// active step.
#[derive(Debug, Clone)]
pub struct GateSeqState {
    patterns: Vec<Grid>,
    cur_pattern: usize,
    next_pattern: Option<usize>,
    num_rows: usize,
    clock: SeqClock,
    last_sent_step: Option<usize>,
}

impl GateSeqState {
    fn new(seed: &NodeSeed) -> Self {
        Self {
            patterns: seed.patterns.clone().unwrap_or_default(),
            cur_pattern: seed.cur_pattern.unwrap_or(0),
            next_pattern: None,
            num_rows: seed.num_rows.unwrap_or(0),
            clock: SeqClock::new(),
            last_sent_step: None,
        }
    }

    fn update(&mut self, ctx: &mut UpdateCtx, clock: f64, outputs: &mut [f64]) {
        let num_steps = self
            .patterns
            .get(self.cur_pattern)
            .map_or(0, Grid::num_steps);

        let mut wrapped = false;
        if let Some(step) = self.clock.advance(clock, num_steps, &mut wrapped) {
            if self.last_sent_step != Some(step) {
                self.last_sent_step = Some(step);
                ctx.feedback.push(FeedbackMsg::SetCurStep {
                    node: ctx.node,
                    step,
                });
            }
        }
        if wrapped {
            if let Some(next) = self.next_pattern.take() {
                if next < self.patterns.len() {
                    self.cur_pattern = next;
                    ctx.feedback.push(FeedbackMsg::SetPattern {
                        node: ctx.node,
                        pattern: next,
                    });
                }
            }
        }

        // Gates drop at the half-step so adjacent steps retrigger. Pulse
        // counts run 1..=CLOCK_PPS within a step (the boundary pulse is 1).
        let pulse_in_step = (self.clock.pulse_count + CLOCK_PPS - 1) % CLOCK_PPS;
        let in_first_half = pulse_in_step < CLOCK_PPS / 2;
        let step_rows = self
            .patterns
            .get(self.cur_pattern)
            .and_then(|g| g.step(self.clock.cur_step));

        for (row, out) in outputs.iter_mut().enumerate() {
            let active = row < self.num_rows
                && step_rows.map_or(false, |cells| cells.get(row).copied().unwrap_or(0) != 0);
            *out = if active && in_first_half { 1.0 } else { 0.0 };
        }
    }

    fn reseed(&mut self, seed: &NodeSeed) {
        let fresh = GateSeqState::new(seed);
        self.patterns = fresh.patterns;
        self.num_rows = fresh.num_rows;
        self.cur_pattern = fresh.cur_pattern.min(self.patterns.len().saturating_sub(1));
    }

    fn set_cell(&mut self, pattern: usize, step: usize, row: usize, value: u8) {
        if let Some(grid) = self.patterns.get_mut(pattern) {
            grid.set(step, row, value);
        }
    }
}

/// Scope capture: every `send_rate` samples, ship the last `send_size`
/// samples back to the editor and remember them in a ring bounded by
/// `history_len`.
#[derive(Debug, Clone)]
pub struct ScopeState {
    send_rate: u32,
    send_size: usize,
    history_len: usize,
    window: Vec<f32>,
    window_pos: usize,
    counter: u32,
    history: Vec<f32>,
}

impl ScopeState {
    fn new(seed: &NodeSeed) -> Self {
        let send_size = seed_num(seed, "sendSize", 5.0).max(1.0) as usize;
        Self {
            send_rate: seed_num(seed, "sendRate", 20.0).max(1.0) as u32,
            send_size,
            history_len: seed_num(seed, "historyLen", 150.0).max(1.0) as usize,
            window: vec![0.0; send_size],
            window_pos: 0,
            counter: 0,
            history: Vec::new(),
        }
    }

    fn update(&mut self, ctx: &mut UpdateCtx, input: f64) {
        self.window[self.window_pos] = input as f32;
        self.window_pos = (self.window_pos + 1) % self.window.len();

        self.counter += 1;
        if self.counter >= self.send_rate {
            self.counter = 0;
            let mut samples = Vec::with_capacity(self.send_size);
            for i in 0..self.window.len() {
                samples.push(self.window[(self.window_pos + i) % self.window.len()]);
            }
            self.history.extend_from_slice(&samples);
            let overflow = self.history.len().saturating_sub(self.history_len);
            if overflow > 0 {
                self.history.drain(..overflow);
            }
            ctx.feedback.push(FeedbackMsg::SendSamples {
                node: ctx.node,
                samples,
            });
        }
    }
}

/// MIDI-driven voice: `(freq, gate)` set by NOTE_ON control messages.
#[derive(Debug, Clone, Default)]
pub struct MidiInState {
    freq: f64,
    gate: f64,
    cur_note: Option<u8>,
}

impl MidiInState {
    pub fn note_on(&mut self, note: u8, velocity: u8) {
        if velocity > 0 {
            self.freq = music::note_to_freq(i32::from(note));
            self.gate = 1.0;
            self.cur_note = Some(note);
        } else if self.cur_note == Some(note) {
            self.gate = 0.0;
            self.cur_note = None;
        }
    }
}

/// Parameter-driven sources: `Knob` and `Const`.
#[derive(Debug, Clone)]
pub struct ValueState {
    value: f64,
    min: f64,
    max: f64,
}

impl ValueState {
    fn new(kind: NodeKind, seed: &NodeSeed) -> Self {
        let (min, max) = match kind {
            NodeKind::Knob => (seed_num(seed, "minVal", 0.0), seed_num(seed, "maxVal", 1.0)),
            _ => (f64::NEG_INFINITY, f64::INFINITY),
        };
        Self {
            value: seed_num(seed, "value", 0.0),
            min,
            max,
        }
    }

    fn set(&mut self, value: f64) {
        self.value = value.clamp(self.min, self.max);
    }
}

fn seed_num(seed: &NodeSeed, name: &str, default: f64) -> f64 {
    seed.params
        .get(name)
        .and_then(crate::model::ParamValue::as_num)
        .unwrap_or(default)
}

/// Runtime state of one node, owned by the audio engine and kept across
/// plan swaps.
#[derive(Debug, Clone)]
pub enum NodeState {
    Osc(OscState),
    Noise(NoiseState),
    Clock(ClockState),
    ClockDiv(ClockDivState),
    ClockOut(ClockOutState),
    Adsr(AdsrState),
    Filter(FilterState),
    BitCrush(BitCrushState),
    Slide(SlideState),
    Delay(DelayState),
    Hold(HoldState),
    MonoSeq(MonoSeqState),
    GateSeq(GateSeqState),
    Scope(ScopeState),
    MidiIn(MidiInState),
    Value(ValueState),
}

impl NodeState {
    /// Allocate state for a seed. Returns `None` for kinds that carry none.
    pub fn from_seed(id: NodeId, seed: &NodeSeed, sample_rate: f64) -> Option<NodeState> {
        let state = match seed.kind {
            NodeKind::Sine => NodeState::Osc(OscState::new(Wave::Sine, seed)),
            NodeKind::Saw => NodeState::Osc(OscState::new(Wave::Saw, seed)),
            NodeKind::Tri => NodeState::Osc(OscState::new(Wave::Tri, seed)),
            NodeKind::Pulse => NodeState::Osc(OscState::new(Wave::Pulse, seed)),
            NodeKind::Noise => NodeState::Noise(NoiseState::new(id, seed)),
            NodeKind::Clock => NodeState::Clock(ClockState::new(seed)),
            NodeKind::ClockDiv => NodeState::ClockDiv(ClockDivState::new(seed)),
            NodeKind::ClockOut => NodeState::ClockOut(ClockOutState::default()),
            NodeKind::Adsr => NodeState::Adsr(AdsrState::new()),
            NodeKind::Filter => NodeState::Filter(FilterState::default()),
            NodeKind::BitCrush => NodeState::BitCrush(BitCrushState::new(seed)),
            NodeKind::Slide => NodeState::Slide(SlideState::default()),
            NodeKind::Delay => NodeState::Delay(DelayState::new(seed, sample_rate)),
            NodeKind::Hold => NodeState::Hold(HoldState::default()),
            NodeKind::MonoSeq => NodeState::MonoSeq(MonoSeqState::new(seed)),
            NodeKind::GateSeq => NodeState::GateSeq(GateSeqState::new(seed)),
            NodeKind::Scope => NodeState::Scope(ScopeState::new(seed)),
            NodeKind::MidiIn => NodeState::MidiIn(MidiInState::default()),
            NodeKind::Knob | NodeKind::Const => {
                NodeState::Value(ValueState::new(seed.kind, seed))
            }
            _ => return None,
        };
        Some(state)
    }

    /// The kind this state serves. Delay and hold states serve both their
    /// read and write step kinds.
    pub fn serves(&self, kind: NodeKind) -> bool {
        matches!(
            (self, kind),
            (NodeState::Osc(OscState { wave: Wave::Sine, .. }), NodeKind::Sine)
                | (NodeState::Osc(OscState { wave: Wave::Saw, .. }), NodeKind::Saw)
                | (NodeState::Osc(OscState { wave: Wave::Tri, .. }), NodeKind::Tri)
                | (NodeState::Osc(OscState { wave: Wave::Pulse, .. }), NodeKind::Pulse)
                | (NodeState::Noise(_), NodeKind::Noise)
                | (NodeState::Clock(_), NodeKind::Clock)
                | (NodeState::ClockDiv(_), NodeKind::ClockDiv)
                | (NodeState::ClockOut(_), NodeKind::ClockOut)
                | (NodeState::Adsr(_), NodeKind::Adsr)
                | (NodeState::Filter(_), NodeKind::Filter)
                | (NodeState::BitCrush(_), NodeKind::BitCrush)
                | (NodeState::Slide(_), NodeKind::Slide)
                | (NodeState::Delay(_), NodeKind::Delay)
                | (NodeState::Delay(_), NodeKind::DelayRead)
                | (NodeState::Delay(_), NodeKind::DelayWrite)
                | (NodeState::Hold(_), NodeKind::Hold)
                | (NodeState::Hold(_), NodeKind::HoldRead)
                | (NodeState::Hold(_), NodeKind::HoldWrite)
                | (NodeState::MonoSeq(_), NodeKind::MonoSeq)
                | (NodeState::GateSeq(_), NodeKind::GateSeq)
                | (NodeState::Scope(_), NodeKind::Scope)
                | (NodeState::MidiIn(_), NodeKind::MidiIn)
                | (NodeState::Value(_), NodeKind::Knob)
                | (NodeState::Value(_), NodeKind::Const)
        )
    }

    /// Refresh configuration from a new seed while keeping the state that
    /// must survive recompilation.
    pub fn reseed(&mut self, seed: &NodeSeed, sample_rate: f64) {
        match self {
            NodeState::Osc(osc) => osc.reseed(seed),
            NodeState::Noise(noise) => {
                noise.min = seed_num(seed, "minVal", 0.0);
                noise.max = seed_num(seed, "maxVal", 1.0);
            }
            NodeState::Clock(clock) => clock.bpm = seed_num(seed, "value", 120.0),
            NodeState::ClockDiv(div) => div.factor = seed_num(seed, "factor", 2.0).max(1.0),
            NodeState::BitCrush(crush) => {
                crush.bits = seed_num(seed, "bitDepth", 8.0).clamp(1.0, 24.0);
                crush.factor = seed_num(seed, "factor", 1.0).max(1.0) as u32;
            }
            NodeState::Delay(delay) => delay.reseed(seed, sample_rate),
            NodeState::MonoSeq(seq) => seq.reseed(seed),
            NodeState::GateSeq(seq) => seq.reseed(seed),
            NodeState::Scope(_) => *self = NodeState::Scope(ScopeState::new(seed)),
            NodeState::Value(value) => *value = ValueState::new(seed.kind, seed),
            // Envelope position, latches, and lag state carry over as-is.
            NodeState::ClockOut(_)
            | NodeState::Adsr(_)
            | NodeState::Filter(_)
            | NodeState::Slide(_)
            | NodeState::Hold(_)
            | NodeState::MidiIn(_) => {}
        }
    }

    /// Advance one sample. Returns false when the step kind does not match
    /// this state; the engine treats that as a fatal plan fault.
    pub fn update(
        &mut self,
        kind: NodeKind,
        ctx: &mut UpdateCtx,
        inputs: &[f64],
        outputs: &mut [f64],
    ) -> bool {
        let in_at = |i: usize| inputs.get(i).copied().unwrap_or(0.0);
        match (self, kind) {
            (NodeState::Osc(osc), NodeKind::Pulse) => {
                outputs[0] = osc.update_pulse(ctx, in_at(0), in_at(1));
            }
            (NodeState::Osc(osc), NodeKind::Sine) => {
                outputs[0] = osc.update(ctx, in_at(0), in_at(1));
            }
            (NodeState::Osc(osc), NodeKind::Saw | NodeKind::Tri) => {
                outputs[0] = osc.update(ctx, in_at(0), 0.0);
            }
            (NodeState::Noise(noise), NodeKind::Noise) => outputs[0] = noise.update(),
            (NodeState::Clock(clock), NodeKind::Clock) => outputs[0] = clock.update(ctx),
            (NodeState::ClockDiv(div), NodeKind::ClockDiv) => outputs[0] = div.update(in_at(0)),
            (NodeState::ClockOut(out), NodeKind::ClockOut) => out.update(ctx, in_at(0)),
            (NodeState::Adsr(env), NodeKind::Adsr) => {
                outputs[0] = env.update(ctx, in_at(0), in_at(1), in_at(2), in_at(3), in_at(4));
            }
            (NodeState::Filter(filter), NodeKind::Filter) => {
                outputs[0] = filter.update(in_at(0), in_at(1), in_at(2));
            }
            (NodeState::BitCrush(crush), NodeKind::BitCrush) => {
                outputs[0] = crush.update(in_at(0));
            }
            (NodeState::Slide(slide), NodeKind::Slide) => {
                outputs[0] = slide.update(ctx, in_at(0), in_at(1));
            }
            (NodeState::Delay(delay), NodeKind::DelayWrite) => {
                delay.write(in_at(0), in_at(1));
            }
            (NodeState::Delay(delay), NodeKind::DelayRead) => {
                outputs[0] = delay.read(ctx.sample_rate);
            }
            (NodeState::Hold(hold), NodeKind::HoldWrite) => hold.write(in_at(0), in_at(1)),
            (NodeState::Hold(hold), NodeKind::HoldRead) => outputs[0] = hold.read(),
            (NodeState::MonoSeq(seq), NodeKind::MonoSeq) => {
                let (freq, gate) = seq.update(ctx, in_at(0), in_at(1));
                outputs[0] = freq;
                outputs[1] = gate;
            }
            (NodeState::GateSeq(seq), NodeKind::GateSeq) => seq.update(ctx, in_at(0), outputs),
            (NodeState::Scope(scope), NodeKind::Scope) => scope.update(ctx, in_at(0)),
            (NodeState::MidiIn(midi), NodeKind::MidiIn) => {
                outputs[0] = midi.freq;
                outputs[1] = midi.gate;
            }
            (NodeState::Value(value), NodeKind::Knob | NodeKind::Const) => {
                outputs[0] = value.value;
            }
            _ => return false,
        }
        true
    }

    /// Apply a SET_PARAM control message.
    pub fn set_param(&mut self, name: &str, value: f64) {
        match self {
            NodeState::Value(v) if name == "value" => v.set(value),
            NodeState::Clock(c) if name == "value" => c.bpm = value,
            NodeState::ClockDiv(d) if name == "factor" => d.factor = value.max(1.0),
            NodeState::BitCrush(b) if name == "bitDepth" => b.bits = value.clamp(1.0, 24.0),
            NodeState::BitCrush(b) if name == "factor" => b.factor = value.max(1.0) as u32,
            NodeState::Osc(o) if name == "minVal" => o.min = value,
            NodeState::Osc(o) if name == "maxVal" => o.max = value,
            NodeState::Noise(n) if name == "minVal" => n.min = value,
            NodeState::Noise(n) if name == "maxVal" => n.max = value,
            _ => {}
        }
    }

    /// Apply a SET_CELL control message.
    pub fn set_cell(&mut self, pattern: usize, step: usize, row: usize, value: u8) {
        match self {
            NodeState::MonoSeq(seq) => seq.set_cell(pattern, step, row, value),
            NodeState::GateSeq(seq) => seq.set_cell(pattern, step, row, value),
            _ => {}
        }
    }

    /// Apply a QUEUE_PATTERN control message.
    pub fn queue_pattern(&mut self, index: usize, data: Option<Grid>) {
        match self {
            NodeState::MonoSeq(seq) => seq.queue_pattern(index, data),
            NodeState::GateSeq(seq) => {
                if let Some(grid) = data {
                    if index >= seq.patterns.len() {
                        seq.patterns.resize(index + 1, Grid::new(0, 0));
                    }
                    seq.patterns[index] = grid;
                }
                if index < seq.patterns.len() {
                    seq.next_pattern = Some(index);
                }
            }
            _ => {}
        }
    }

    /// Apply a NOTE_ON control message.
    pub fn note_on(&mut self, note: u8, velocity: u8) {
        if let NodeState::MidiIn(midi) = self {
            midi.note_on(note, velocity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamValue;
    use crate::SAMPLE_RATE;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn seed(kind: NodeKind) -> NodeSeed {
        let node = crate::model::Project::seed_node(kind, 0, 0);
        NodeSeed {
            kind,
            params: node.params.clone(),
            patterns: node.patterns.clone(),
            cur_pattern: node.cur_pattern,
            scale_root: node.scale_root.clone(),
            scale_name: node.scale_name.clone(),
            num_octaves: node.num_octaves,
            num_rows: node.num_rows,
        }
    }

    fn ctx<'a>(time: f64, feedback: &'a mut Vec<FeedbackMsg>) -> UpdateCtx<'a> {
        UpdateCtx {
            sample_rate: SAMPLE_RATE,
            time,
            node: NodeId(0),
            feedback,
        }
    }

    #[test]
    fn test_sine_matches_closed_form() {
        let mut state = NodeState::from_seed(NodeId(0), &seed(NodeKind::Sine), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];
        for n in 0..64 {
            let time = n as f64 / SAMPLE_RATE;
            let mut c = ctx(time, &mut feedback);
            assert!(state.update(NodeKind::Sine, &mut c, &[440.0, 0.0], &mut out));
            let expected =
                libm::sin(core::f64::consts::TAU * 440.0 * n as f64 / SAMPLE_RATE);
            assert_relative_eq!(out[0], expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_sine_sync_resets_phase() {
        let mut state = NodeState::from_seed(NodeId(0), &seed(NodeKind::Sine), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];
        for _ in 0..100 {
            let mut c = ctx(0.0, &mut feedback);
            state.update(NodeKind::Sine, &mut c, &[440.0, 0.0], &mut out);
        }
        // Rising sync edge resets the accumulator to phase zero.
        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::Sine, &mut c, &[440.0, 1.0], &mut out);
        assert_relative_eq!(out[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pulse_duty_cycle() {
        let mut state =
            NodeState::from_seed(NodeId(0), &seed(NodeKind::Pulse), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];
        let mut high = 0usize;
        let n = 4410; // ten 441 Hz cycles
        for _ in 0..n {
            let mut c = ctx(0.0, &mut feedback);
            state.update(NodeKind::Pulse, &mut c, &[441.0, 0.25], &mut out);
            if out[0] > 0.0 {
                high += 1;
            }
        }
        let duty = high as f64 / n as f64;
        assert!((duty - 0.25).abs() < 0.02, "duty was {}", duty);
    }

    #[test]
    fn test_noise_stays_in_range() {
        let mut state =
            NodeState::from_seed(NodeId(3), &seed(NodeKind::Noise), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];
        for _ in 0..1000 {
            let mut c = ctx(0.0, &mut feedback);
            state.update(NodeKind::Noise, &mut c, &[], &mut out);
            assert!((0.0..=1.0).contains(&out[0]));
        }
    }

    #[test]
    fn test_clock_pulse_rate() {
        // 120 bpm -> 24 * 120 / 60 = 48 pulses per second
        let mut state =
            NodeState::from_seed(NodeId(0), &seed(NodeKind::Clock), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];
        let mut edges = 0;
        let mut edge = EdgeDetect::default();
        for _ in 0..SAMPLE_RATE as usize {
            let mut c = ctx(0.0, &mut feedback);
            state.update(NodeKind::Clock, &mut c, &[], &mut out);
            if edge.rising(out[0]) {
                edges += 1;
            }
        }
        assert_eq!(edges, 48);
    }

    #[test]
    fn test_clock_div_flips_every_factor() {
        let mut state =
            NodeState::from_seed(NodeId(0), &seed(NodeKind::ClockDiv), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];
        let mut levels = Vec::new();
        // 8 pulses with factor 2: level flips on pulses 2, 4, 6, 8
        for pulse in 0..8 {
            for &v in &[0.0, 1.0] {
                let mut c = ctx(0.0, &mut feedback);
                state.update(NodeKind::ClockDiv, &mut c, &[v], &mut out);
            }
            let _ = pulse;
            levels.push(out[0]);
        }
        assert_eq!(levels, vec![0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_adsr_reaches_sustain_and_releases() {
        let mut state = NodeState::from_seed(NodeId(0), &seed(NodeKind::Adsr), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];
        let (att, dec, sus, rel) = (0.01, 0.01, 0.5, 0.01);

        let mut level_after_ad = 0.0;
        for n in 0..(SAMPLE_RATE * 0.05) as usize {
            let time = n as f64 / SAMPLE_RATE;
            let mut c = ctx(time, &mut feedback);
            state.update(NodeKind::Adsr, &mut c, &[1.0, att, dec, sus, rel], &mut out);
            level_after_ad = out[0];
        }
        assert_relative_eq!(level_after_ad, sus, epsilon = 1e-6);

        // Gate low: release to zero
        let mut level = 1.0;
        for n in 0..(SAMPLE_RATE * 0.05) as usize {
            let time = 0.05 + n as f64 / SAMPLE_RATE;
            let mut c = ctx(time, &mut feedback);
            state.update(NodeKind::Adsr, &mut c, &[0.0, att, dec, sus, rel], &mut out);
            level = out[0];
        }
        assert_relative_eq!(level, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_filter_passes_dc_and_stays_finite() {
        let mut state =
            NodeState::from_seed(NodeId(0), &seed(NodeKind::Filter), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];
        for _ in 0..2000 {
            let mut c = ctx(0.0, &mut feedback);
            state.update(NodeKind::Filter, &mut c, &[1.0, 0.3, 0.5], &mut out);
            assert!(out[0].is_finite());
        }
        // A lowpass settles on the DC input level.
        assert_relative_eq!(out[0], 1.0, epsilon = 0.05);
    }

    #[test]
    fn test_delay_round_trip() {
        let mut state =
            NodeState::from_seed(NodeId(0), &seed(NodeKind::Delay), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let delay_sec = 100.0 / SAMPLE_RATE;

        let mut outputs = Vec::new();
        for n in 0..300 {
            let mut out = [0.0];
            let mut c = ctx(0.0, &mut feedback);
            // Read first, then write: plan order for split nodes.
            state.update(NodeKind::DelayRead, &mut c, &[], &mut out);
            outputs.push(out[0]);
            let impulse = if n == 0 { 1.0 } else { 0.0 };
            let mut c = ctx(0.0, &mut feedback);
            state.update(NodeKind::DelayWrite, &mut c, &[impulse, delay_sec], &mut out);
        }

        // The impulse written at n=0 surfaces 100 samples later (+1 for the
        // read-before-write split).
        let peak = outputs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert_eq!(peak.0, 101);
        assert_relative_eq!(*peak.1, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_delay_time_clamped_to_max() {
        let mut state =
            NodeState::from_seed(NodeId(0), &seed(NodeKind::Delay), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];
        // Request 10 s from a 1 s line; must not panic and must read zeros.
        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::DelayWrite, &mut c, &[1.0, 10.0], &mut out);
        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::DelayRead, &mut c, &[], &mut out);
        assert_relative_eq!(out[0], 0.0);
    }

    #[test]
    fn test_hold_latches_on_rising_edge() {
        let mut state = NodeState::from_seed(NodeId(0), &seed(NodeKind::Hold), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];

        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::HoldWrite, &mut c, &[0.7, 1.0], &mut out);
        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::HoldRead, &mut c, &[], &mut out);
        assert_relative_eq!(out[0], 0.7);

        // No edge: latch unchanged
        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::HoldWrite, &mut c, &[0.2, 1.0], &mut out);
        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::HoldRead, &mut c, &[], &mut out);
        assert_relative_eq!(out[0], 0.7);
    }

    #[test]
    fn test_mono_seq_advances_and_reports() {
        let mut s = seed(NodeKind::MonoSeq);
        // Activate row 2 of step 0 and row 0 of step 1
        let patterns = s.patterns.as_mut().unwrap();
        patterns[0].set(0, 2, 1);
        patterns[0].set(1, 0, 1);

        let mut state = NodeState::from_seed(NodeId(5), &s, SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0, 0.0];

        // Clock at 120 bpm: a pulse every 918.75 samples; step advances
        // every CLOCK_PPS = 6 pulses.
        let pulse_period = SAMPLE_RATE / 48.0;
        let total = (pulse_period * 6.5) as usize;
        for n in 0..total {
            let time = n as f64 / SAMPLE_RATE;
            let phase = (n as f64 / pulse_period).fract();
            let clock = if phase < 0.5 { 1.0 } else { 0.0 };
            let mut c = UpdateCtx {
                sample_rate: SAMPLE_RATE,
                time,
                node: NodeId(5),
                feedback: &mut feedback,
            };
            state.update(NodeKind::MonoSeq, &mut c, &[clock, 0.1], &mut out);
        }

        let steps: Vec<usize> = feedback
            .iter()
            .filter_map(|m| match m {
                FeedbackMsg::SetCurStep { step, .. } => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![0, 1]);

        // Step 1 row 0 is the scale root (C2)
        let c2 = music::note_to_freq(36);
        assert_relative_eq!(out[0], c2, epsilon = 1e-6);
    }

    #[test]
    fn test_mono_seq_gate_time() {
        let mut s = seed(NodeKind::MonoSeq);
        s.patterns.as_mut().unwrap()[0].set(0, 0, 1);
        let mut state = NodeState::from_seed(NodeId(0), &s, SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0, 0.0];

        // First pulse triggers step 0; gate opens.
        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::MonoSeq, &mut c, &[1.0, 0.05], &mut out);
        assert_relative_eq!(out[1], 1.0);

        // Past gateT the gate closes even though the step is unchanged.
        let mut c = ctx(0.06, &mut feedback);
        state.update(NodeKind::MonoSeq, &mut c, &[1.0, 0.05], &mut out);
        assert_relative_eq!(out[1], 0.0);
    }

    #[test]
    fn test_mono_seq_pattern_switch_on_wrap() {
        let mut s = seed(NodeKind::MonoSeq);
        let rows = s.patterns.as_ref().unwrap()[0].num_rows();
        s.patterns.as_mut().unwrap().push(Grid::new(16, rows));
        let mut state = NodeState::from_seed(NodeId(0), &s, SAMPLE_RATE).unwrap();
        state.queue_pattern(1, None);

        let mut feedback = Vec::new();
        let mut out = [0.0, 0.0];
        // 16 steps * 6 pulses: alternate clock low/high to fire pulses.
        for _ in 0..(16 * 6) {
            for &clock in &[0.0, 1.0] {
                let mut c = ctx(0.0, &mut feedback);
                state.update(NodeKind::MonoSeq, &mut c, &[clock, 0.1], &mut out);
            }
        }

        assert!(feedback
            .iter()
            .any(|m| matches!(m, FeedbackMsg::SetPattern { pattern: 1, .. })));
    }

    #[test]
    fn test_gate_seq_outputs_rows() {
        let mut s = seed(NodeKind::GateSeq);
        s.patterns.as_mut().unwrap()[0].set(0, 1, 1);
        let mut state = NodeState::from_seed(NodeId(0), &s, SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0; 4];

        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::GateSeq, &mut c, &[1.0], &mut out);
        assert_eq!(out, [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_scope_emits_batches() {
        let mut state =
            NodeState::from_seed(NodeId(0), &seed(NodeKind::Scope), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out: [f64; 0] = [];
        for n in 0..40 {
            let mut c = ctx(0.0, &mut feedback);
            state.update(NodeKind::Scope, &mut c, &[n as f64], &mut out);
        }
        // sendRate = 20: two batches of sendSize = 5
        let batches: Vec<&Vec<f32>> = feedback
            .iter()
            .filter_map(|m| match m {
                FeedbackMsg::SendSamples { samples, .. } => Some(samples),
                _ => None,
            })
            .collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].as_slice(), &[15.0, 16.0, 17.0, 18.0, 19.0]);
    }

    #[test]
    fn test_midi_in_note_lifecycle() {
        let mut state =
            NodeState::from_seed(NodeId(0), &seed(NodeKind::MidiIn), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0, 0.0];

        state.note_on(69, 100);
        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::MidiIn, &mut c, &[], &mut out);
        assert_relative_eq!(out[0], 440.0);
        assert_relative_eq!(out[1], 1.0);

        // Release of a different note is ignored
        state.note_on(70, 0);
        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::MidiIn, &mut c, &[], &mut out);
        assert_relative_eq!(out[1], 1.0);

        state.note_on(69, 0);
        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::MidiIn, &mut c, &[], &mut out);
        assert_relative_eq!(out[1], 0.0);
    }

    #[test]
    fn test_knob_clamps_to_range() {
        let mut params = BTreeMap::new();
        params.insert("value".to_string(), ParamValue::Num(0.5));
        params.insert("minVal".to_string(), ParamValue::Num(0.0));
        params.insert("maxVal".to_string(), ParamValue::Num(1.0));
        let s = NodeSeed {
            kind: NodeKind::Knob,
            params,
            patterns: None,
            cur_pattern: None,
            scale_root: None,
            scale_name: None,
            num_octaves: None,
            num_rows: None,
        };
        let mut state = NodeState::from_seed(NodeId(0), &s, SAMPLE_RATE).unwrap();
        state.set_param("value", 4.0);

        let mut feedback = Vec::new();
        let mut out = [0.0];
        let mut c = ctx(0.0, &mut feedback);
        state.update(NodeKind::Knob, &mut c, &[], &mut out);
        assert_relative_eq!(out[0], 1.0);
    }

    #[test]
    fn test_kind_mismatch_reports_false() {
        let mut state = NodeState::from_seed(NodeId(0), &seed(NodeKind::Sine), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];
        let mut c = ctx(0.0, &mut feedback);
        assert!(!state.update(NodeKind::Filter, &mut c, &[0.0], &mut out));
    }

    #[test]
    fn test_reseed_keeps_oscillator_phase() {
        let mut state = NodeState::from_seed(NodeId(0), &seed(NodeKind::Sine), SAMPLE_RATE).unwrap();
        let mut feedback = Vec::new();
        let mut out = [0.0];
        for _ in 0..37 {
            let mut c = ctx(0.0, &mut feedback);
            state.update(NodeKind::Sine, &mut c, &[440.0, 0.0], &mut out);
        }
        let before = match &state {
            NodeState::Osc(o) => o.phase,
            _ => unreachable!(),
        };
        state.reseed(&seed(NodeKind::Sine), SAMPLE_RATE);
        let after = match &state {
            NodeState::Osc(o) => o.phase,
            _ => unreachable!(),
        };
        assert_relative_eq!(before, after);
    }
}
