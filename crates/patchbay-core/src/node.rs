//! Graph nodes: a uniform, port-based wrapper around a [`Processor`].
//!
//! A [`GraphNode`] is shared as `Arc<GraphNode>` between the graph's node
//! table and every render sequence that references it.
//!
//! # Threading
//!
//! Scalar state (flags, gains, MIDI filters, meters) lives in atomics with
//! one writer (control thread) and one reader (render thread). The wrapped
//! processor and its lanes sit behind a `parking_lot::Mutex`; the render
//! thread only ever `try_lock`s it and renders silence for the block if the
//! control thread holds it. Program lists have their own lock and are never
//! touched by the render thread.
//!
//! Control-thread reads never take the render lock. The processor's state
//! blob is snapshotted whenever it changes (`set_state`, program loads) and
//! the prepared block size is mirrored in an atomic.
//!
//! # State composition
//!
//! Each block, in order: a disabled, suspended or unprepared node outputs
//! silence and skips everything else. Otherwise MIDI input is filtered,
//! input mute or input gain is applied, then either the bypass path or the
//! processor runs (oversampled if configured), then output gain, then mute.
//! Mute clears audio after either path, so it wins over bypass.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;
use crate::description::{Position, PropertyValue};
use crate::events::GraphEvent;
use crate::graph::SubGraphHandle;
use crate::midi::{MidiChannels, MidiPipe};
use crate::oversample::{
    MAX_OVERSAMPLING_POW, Oversampler, OversamplingError, is_valid_factor, oversampling_latency,
};
use crate::port::{PortConfig, PortList, PortType};
use crate::processor::{Processor, StateError};
use crate::program::ProgramBank;
use crate::tasks::{NodeTask, TaskSender};

/// Graph-unique node identifier. Never reused within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Wraps a raw id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw id.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a node is, as far as the scheduler cares.
#[derive(Clone)]
pub enum NodeKind {
    /// Host audio input. Outputs the host's input channels.
    AudioInput,
    /// Host audio output. Sums its inputs into the host buffer.
    AudioOutput,
    /// Host MIDI input.
    MidiInput,
    /// Host MIDI output.
    MidiOutput,
    /// A wrapped processor.
    Processor,
    /// A nested graph, rendered by one op in the parent sequence.
    SubGraph(SubGraphHandle),
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NodeKind::AudioInput => "AudioInput",
            NodeKind::AudioOutput => "AudioOutput",
            NodeKind::MidiInput => "MidiInput",
            NodeKind::MidiOutput => "MidiOutput",
            NodeKind::Processor => "Processor",
            NodeKind::SubGraph(_) => "SubGraph",
        })
    }
}

impl NodeKind {
    /// Host IO node of any kind.
    pub fn is_io(&self) -> bool {
        !matches!(self, NodeKind::Processor | NodeKind::SubGraph(_))
    }
}

/// Parameter index meaning "no parameter".
pub const NO_PARAMETER: i32 = -1;

/// Node flags addressable as parameters through reserved negative indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialParameter {
    /// Enabled flag.
    Enabled = -2,
    /// Bypass flag.
    Bypass = -3,
    /// Mute flag.
    Mute = -4,
}

impl SpecialParameter {
    /// Parameter for a reserved index.
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            -2 => Some(Self::Enabled),
            -3 => Some(Self::Bypass),
            -4 => Some(Self::Mute),
            _ => None,
        }
    }

    /// Reserved index.
    pub fn index(self) -> i32 {
        self as i32
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Enabled => "Enabled",
            Self::Bypass => "Bypass",
            Self::Mute => "Mute",
        }
    }
}

/// Whether `index` is one of the reserved node-flag parameters.
pub fn is_special_parameter(index: i32) -> bool {
    SpecialParameter::from_index(index).is_some()
}

/// Name of a reserved parameter index.
pub fn special_parameter_name(index: i32) -> Option<&'static str> {
    SpecialParameter::from_index(index).map(SpecialParameter::name)
}

/// Audio channels metered per direction.
pub const MAX_METER_CHANNELS: usize = 32;

/// Largest transpose in semitones, either direction.
pub const MAX_TRANSPOSE: i32 = 24;

/// Node-level failures.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Oversampling could not be set up.
    #[error(transparent)]
    Oversampling(#[from] OversamplingError),
    /// Key range outside 0..=127 or inverted.
    #[error("key range {low}..={high} is invalid")]
    InvalidKeyRange {
        /// Requested low note.
        low: i32,
        /// Requested high note.
        high: i32,
    },
    /// Transpose outside -24..=24.
    #[error("transpose {0} is outside -24..=24")]
    InvalidTranspose(i32),
    /// Program number outside 0..=127.
    #[error("MIDI program {0} is outside 0..=127")]
    InvalidProgram(i32),
    /// Program was never saved.
    #[error("MIDI program {0} has not been saved")]
    ProgramNotFound(i32),
    /// Program list text could not be parsed or written.
    #[error("malformed MIDI program data: {0}")]
    ProgramData(#[from] serde_json::Error),
    /// Processor rejected a state blob.
    #[error(transparent)]
    State(#[from] StateError),
    /// Oversampling prepared for a block size other than the node's.
    #[error("block size {requested} does not match the prepared block size {prepared}")]
    BlockSizeMismatch {
        /// Block size the node was prepared with.
        prepared: usize,
        /// Block size asked for.
        requested: usize,
    },
}

#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Editor metadata carried for persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMetadata {
    /// Editor position.
    pub position: Position,
    /// Property bag from the description.
    pub properties: std::collections::BTreeMap<String, PropertyValue>,
}

/// Render-side state guarded by the node's render lock.
pub(crate) struct RenderState {
    pub(crate) processor: Box<dyn Processor>,
    pub(crate) audio: AudioBuffer,
    pub(crate) midi: MidiPipe,
    oversampler: Option<Oversampler>,
    config: PortConfig,
    prepared: bool,
    sample_rate: f64,
    block_size: usize,
}

/// A processing unit in a graph.
pub struct GraphNode {
    id: NodeId,
    kind: NodeKind,
    identifier: String,
    name: Mutex<String>,
    ports: ArcSwap<PortList>,
    render: Mutex<RenderState>,
    prepared: AtomicBool,
    block_size: AtomicUsize,
    state: ArcSwap<Vec<u8>>,

    enabled: AtomicBool,
    bypassed: AtomicBool,
    muted: AtomicBool,
    mute_input: AtomicBool,
    suspended: AtomicBool,

    gain: AtomicF32,
    last_gain: AtomicF32,
    input_gain: AtomicF32,
    last_input_gain: AtomicF32,

    key_low: AtomicI32,
    key_high: AtomicI32,
    transpose: AtomicI32,
    midi_channels: AtomicU16,

    user_latency: AtomicU32,
    latency_override: AtomicBool,
    os_pow: AtomicU32,

    input_rms: [AtomicF32; MAX_METER_CHANNELS],
    output_rms: [AtomicF32; MAX_METER_CHANNELS],

    midi_program: AtomicI32,
    last_midi_program: AtomicI32,
    programs_enabled: AtomicBool,
    programs: Mutex<ProgramBank>,

    metadata: Mutex<NodeMetadata>,
    tasks: OnceLock<TaskSender>,
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("identifier", &self.identifier)
            .field("enabled", &self.is_enabled())
            .field("prepared", &self.is_prepared())
            .finish_non_exhaustive()
    }
}

impl GraphNode {
    pub(crate) fn new(id: NodeId, kind: NodeKind, processor: Box<dyn Processor>) -> Self {
        let config = processor.port_config();
        let identifier = processor.identifier().to_owned();
        let name = processor.name().to_owned();
        let latency = processor.latency_samples() as u32;
        let state = processor.state();
        Self {
            id,
            kind,
            identifier,
            name: Mutex::new(name),
            ports: ArcSwap::from_pointee(PortList::from_config(&config)),
            render: Mutex::new(RenderState {
                processor,
                audio: AudioBuffer::default(),
                midi: MidiPipe::default(),
                oversampler: None,
                config,
                prepared: false,
                sample_rate: 0.0,
                block_size: 0,
            }),
            prepared: AtomicBool::new(false),
            block_size: AtomicUsize::new(0),
            state: ArcSwap::from_pointee(state),
            enabled: AtomicBool::new(true),
            bypassed: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            mute_input: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            gain: AtomicF32::new(1.0),
            last_gain: AtomicF32::new(1.0),
            input_gain: AtomicF32::new(1.0),
            last_input_gain: AtomicF32::new(1.0),
            key_low: AtomicI32::new(0),
            key_high: AtomicI32::new(127),
            transpose: AtomicI32::new(0),
            midi_channels: AtomicU16::new(MidiChannels::all().bits()),
            user_latency: AtomicU32::new(latency),
            latency_override: AtomicBool::new(false),
            os_pow: AtomicU32::new(0),
            input_rms: std::array::from_fn(|_| AtomicF32::new(0.0)),
            output_rms: std::array::from_fn(|_| AtomicF32::new(0.0)),
            midi_program: AtomicI32::new(-1),
            last_midi_program: AtomicI32::new(-1),
            programs_enabled: AtomicBool::new(false),
            programs: Mutex::new(ProgramBank::default()),
            metadata: Mutex::new(NodeMetadata::default()),
            tasks: OnceLock::new(),
        }
    }

    pub(crate) fn attach(&self, sender: TaskSender) {
        let _ = self.tasks.set(sender);
    }

    fn post(&self, task: NodeTask) {
        if let Some(sender) = self.tasks.get() {
            sender.post(task);
        }
    }

    pub(crate) fn render_state(&self) -> &Mutex<RenderState> {
        &self.render
    }

    // ------------------------------------------------------------------
    // Identity and ports
    // ------------------------------------------------------------------

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node kind.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Processor type identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Display name.
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    /// Renames the node.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = name.into();
    }

    /// Host audio input or output node.
    pub fn is_audio_io_node(&self) -> bool {
        matches!(self.kind, NodeKind::AudioInput | NodeKind::AudioOutput)
    }

    /// Host MIDI input or output node.
    pub fn is_midi_io_node(&self) -> bool {
        matches!(self.kind, NodeKind::MidiInput | NodeKind::MidiOutput)
    }

    /// Host audio input node.
    pub fn is_audio_input_node(&self) -> bool {
        matches!(self.kind, NodeKind::AudioInput)
    }

    /// Host audio output node.
    pub fn is_audio_output_node(&self) -> bool {
        matches!(self.kind, NodeKind::AudioOutput)
    }

    /// Host MIDI input node.
    pub fn is_midi_input_node(&self) -> bool {
        matches!(self.kind, NodeKind::MidiInput)
    }

    /// Host MIDI output node.
    pub fn is_midi_output_node(&self) -> bool {
        matches!(self.kind, NodeKind::MidiOutput)
    }

    /// Nested graph node.
    pub fn is_sub_graph(&self) -> bool {
        matches!(self.kind, NodeKind::SubGraph(_))
    }

    /// Handle of the nested graph, for subgraph nodes.
    pub fn sub_graph(&self) -> Option<&SubGraphHandle> {
        match &self.kind {
            NodeKind::SubGraph(handle) => Some(handle),
            _ => None,
        }
    }

    /// Current port table.
    pub fn ports(&self) -> Arc<PortList> {
        self.ports.load_full()
    }

    /// Port counts of the current table.
    pub fn port_config(&self) -> PortConfig {
        self.ports.load().config()
    }

    /// Number of ports of a type and direction.
    pub fn num_ports(&self, port_type: PortType, is_input: bool) -> u32 {
        self.ports.load().count(port_type, is_input)
    }

    /// Index of the `n`-th port of a type and direction.
    pub fn nth_port(&self, port_type: PortType, n: usize, is_input: bool) -> Option<u32> {
        self.ports.load().nth_port(port_type, n, is_input)
    }

    /// Port index for a zero-based channel of a type and direction.
    pub fn port_for_channel(&self, port_type: PortType, channel: u32, is_input: bool) -> Option<u32> {
        self.ports.load().port_for_channel(port_type, channel, is_input)
    }

    /// Zero-based channel of a port within its type and direction.
    pub fn channel_for_port(&self, port: u32) -> Option<u32> {
        self.ports.load().channel_for_port(port)
    }

    /// Type of a port.
    pub fn port_type(&self, port: u32) -> Option<PortType> {
        self.ports.load().port_type(port)
    }

    /// Whether `port` exists and is an input.
    pub fn is_port_input(&self, port: u32) -> bool {
        self.ports.load().is_input(port)
    }

    /// Whether `port` exists and is an output.
    pub fn is_port_output(&self, port: u32) -> bool {
        self.ports.load().is_output(port)
    }

    /// First MIDI input port.
    pub fn default_midi_input_port(&self) -> Option<u32> {
        self.nth_port(PortType::Midi, 0, true)
    }

    /// First MIDI output port.
    pub fn default_midi_output_port(&self) -> Option<u32> {
        self.nth_port(PortType::Midi, 0, false)
    }

    /// Re-queries the processor's ports after an IO change and rebuilds the
    /// table. A prepared node is re-prepared for the new layout. Returns
    /// whether the layout changed.
    pub fn reset_ports(&self) -> Result<bool, NodeError> {
        let mut state = self.render.lock();
        let config = state.processor.port_config();
        if config == state.config {
            return Ok(false);
        }
        state.config = config;
        self.ports.store(Arc::new(PortList::from_config(&config)));
        if state.prepared {
            let (sample_rate, block_size) = (state.sample_rate, state.block_size);
            self.release_locked(&mut state);
            self.prepare_locked(&mut state, sample_rate, block_size)?;
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Prepares for rendering. Idempotent for unchanged settings.
    ///
    /// On failure the node stays unprepared and renders silence.
    pub fn prepare_to_render(&self, sample_rate: f64, max_block_size: usize) -> Result<(), NodeError> {
        let mut state = self.render.lock();
        if state.prepared && state.sample_rate == sample_rate && state.block_size == max_block_size {
            return Ok(());
        }
        self.release_locked(&mut state);
        self.prepare_locked(&mut state, sample_rate, max_block_size)
    }

    /// Frees render resources. The node renders silence until prepared again.
    pub fn release_resources(&self) {
        let mut state = self.render.lock();
        self.release_locked(&mut state);
    }

    /// Whether the node has been prepared and not released.
    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    fn prepare_locked(&self, state: &mut RenderState, sample_rate: f64, block_size: usize) -> Result<(), NodeError> {
        state.sample_rate = sample_rate;
        state.block_size = block_size;
        let factor = self.oversampling_factor();
        state.oversampler = None;
        if factor > 1 {
            let mut os = Oversampler::new(factor)?;
            os.prepare(state.config.total_lanes(), block_size)?;
            state.oversampler = Some(os);
        }
        state
            .processor
            .prepare(sample_rate * factor as f64, block_size * factor);
        if !self.latency_override.load(Ordering::Acquire) {
            let latency = state.processor.latency_samples() as u32;
            self.user_latency.store(latency, Ordering::Release);
        }
        state.audio = AudioBuffer::placeholder(state.config.total_lanes());
        state.midi = MidiPipe::placeholder(state.config.midi_slots());
        state.prepared = true;
        self.block_size.store(block_size, Ordering::Release);
        self.prepared.store(true, Ordering::Release);
        Ok(())
    }

    fn release_locked(&self, state: &mut RenderState) {
        if state.prepared {
            state.processor.release();
        }
        state.oversampler = None;
        state.prepared = false;
        self.prepared.store(false, Ordering::Release);
        for meter in self.input_rms.iter().chain(self.output_rms.iter()) {
            meter.store(0.0);
        }
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Renders one block in place. Never blocks: if the control thread
    /// holds the render lock, the block is silent.
    pub fn render(&self, audio: &mut AudioBuffer, midi: &mut MidiPipe) {
        match self.render.try_lock() {
            Some(mut state) => self.process_block(&mut state, audio, midi),
            None => {
                audio.clear();
                midi.clear();
            }
        }
    }

    pub(crate) fn process_block(&self, state: &mut RenderState, audio: &mut AudioBuffer, midi: &mut MidiPipe) {
        let config = state.config;
        if !state.prepared
            || !self.is_enabled()
            || self.is_suspended()
            || audio.num_samples() > state.block_size
            || audio.num_channels() < config.total_lanes()
            || midi.len() < config.midi_slots()
        {
            audio.clear();
            midi.clear();
            return;
        }
        let ins = config.audio_inputs as usize;
        let outs = config.audio_outputs as usize;

        self.filter_midi_input(midi, config.midi_inputs as usize);

        if self.is_muting_inputs() {
            audio.clear_channels(0..ins);
        } else {
            let (from, to) = (self.last_input_gain(), self.input_gain());
            for ch in 0..ins {
                audio.apply_gain_ramp(ch, from, to);
            }
        }
        Self::meter(&self.input_rms, audio, ins);

        if self.is_bypassed() {
            Self::render_bypassed(config, audio);
        } else if let Some(os) = state.oversampler.as_mut() {
            let factor = os.factor() as u32;
            for lane in midi.iter_mut() {
                lane.scale_times(factor);
            }
            let inner = os.upsample(audio);
            state.processor.process(inner, midi);
            os.downsample(audio);
            for lane in midi.iter_mut() {
                lane.unscale_times(factor);
            }
        } else {
            state.processor.process(audio, midi);
        }

        let (from, to) = (self.last_gain(), self.gain());
        for ch in 0..outs {
            audio.apply_gain_ramp(ch, from, to);
        }
        if self.is_muted() {
            audio.clear_channels(0..outs);
        }
        Self::meter(&self.output_rms, audio, outs);
    }

    /// Pass-through used while bypassed: input lanes are left as they are,
    /// output-only lanes are cleared, MIDI passes unchanged.
    fn render_bypassed(config: PortConfig, audio: &mut AudioBuffer) {
        audio.clear_channels(config.audio_inputs as usize..config.audio_outputs as usize);
    }

    fn meter(meters: &[AtomicF32; MAX_METER_CHANNELS], audio: &AudioBuffer, channels: usize) {
        for (ch, meter) in meters.iter().enumerate().take(channels) {
            meter.store(audio.rms(ch));
        }
    }

    fn filter_midi_input(&self, midi: &mut MidiPipe, inputs: usize) {
        let channels = self.midi_channels();
        let low = self.key_low.load(Ordering::Acquire);
        let high = self.key_high.load(Ordering::Acquire);
        let transpose = self.transpose.load(Ordering::Acquire);
        let programs = self.midi_programs_enabled();
        let full_range = low == 0 && high == 127 && transpose == 0;
        if channels.is_omni() && full_range && !programs {
            return;
        }

        let mut requested = None;
        for lane in midi.iter_mut().take(inputs) {
            lane.retain_mut(|msg| {
                if let Some(ch) = msg.channel() {
                    if !channels.is_on(ch) {
                        return false;
                    }
                }
                if programs {
                    if let Some(program) = msg.program_number() {
                        requested = Some(i32::from(program));
                    }
                }
                if full_range {
                    return true;
                }
                let Some(note) = msg.note_number() else {
                    return true;
                };
                let note = i32::from(note);
                if note < low || note > high {
                    return false;
                }
                let shifted = note + transpose;
                if !(0..=127).contains(&shifted) {
                    return false;
                }
                msg.set_note_number(shifted as u8);
                true
            });
        }

        if let Some(program) = requested {
            if program != self.last_midi_program() {
                self.midi_program.store(program, Ordering::Release);
                self.post(NodeTask::LoadMidiProgram(self.id));
            }
        }
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    /// Whether the node is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enables or disables the node. The control thread later prepares or
    /// releases it and notifies listeners.
    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::AcqRel) != enabled {
            self.post(NodeTask::UpdateEnablement(self.id));
        }
    }

    /// Whether the node runs its bypass path.
    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Acquire)
    }

    /// Sets bypass.
    pub fn set_bypassed(&self, bypassed: bool) {
        if self.bypassed.swap(bypassed, Ordering::AcqRel) != bypassed {
            self.post(NodeTask::Notify(GraphEvent::BypassChanged(self.id)));
        }
    }

    /// Whether audio output is forced to silence.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Sets mute.
    pub fn set_muted(&self, muted: bool) {
        if self.muted.swap(muted, Ordering::AcqRel) != muted {
            self.post(NodeTask::Notify(GraphEvent::MuteChanged(self.id)));
        }
    }

    /// Whether audio inputs are silenced before processing.
    pub fn is_muting_inputs(&self) -> bool {
        self.mute_input.load(Ordering::Acquire)
    }

    /// Sets input mute.
    pub fn set_mute_input(&self, mute: bool) {
        self.mute_input.store(mute, Ordering::Release);
    }

    /// Whether processing is suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Suspends processing from the next block on. A suspended node
    /// outputs silence and does not run its processor.
    pub fn suspend_processing(&self, suspend: bool) {
        self.suspended.store(suspend, Ordering::Release);
    }

    /// Sets a flag through its reserved parameter index. Values above 0.5
    /// are on.
    pub fn set_special_parameter(&self, parameter: SpecialParameter, value: f32) {
        let on = value > 0.5;
        match parameter {
            SpecialParameter::Enabled => self.set_enabled(on),
            SpecialParameter::Bypass => self.set_bypassed(on),
            SpecialParameter::Mute => self.set_muted(on),
        }
    }

    /// Flag value through its reserved parameter index, 0.0 or 1.0.
    pub fn special_parameter(&self, parameter: SpecialParameter) -> f32 {
        let on = match parameter {
            SpecialParameter::Enabled => self.is_enabled(),
            SpecialParameter::Bypass => self.is_bypassed(),
            SpecialParameter::Mute => self.is_muted(),
        };
        if on { 1.0 } else { 0.0 }
    }

    // ------------------------------------------------------------------
    // Gain
    // ------------------------------------------------------------------

    /// Target output gain.
    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    /// Output gain at the start of the current block.
    pub fn last_gain(&self) -> f32 {
        self.last_gain.load()
    }

    /// Sets the output gain. The next block ramps from the last gain to it.
    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain);
    }

    /// Target input gain.
    pub fn input_gain(&self) -> f32 {
        self.input_gain.load()
    }

    /// Input gain at the start of the current block.
    pub fn last_input_gain(&self) -> f32 {
        self.last_input_gain.load()
    }

    /// Sets the input gain.
    pub fn set_input_gain(&self, gain: f32) {
        self.input_gain.store(gain);
    }

    /// Commits the ramp: the last gains become the targets. Called once
    /// per block after the node renders.
    pub fn update_gain(&self) {
        self.last_gain.store(self.gain.load());
        self.last_input_gain.store(self.input_gain.load());
    }

    // ------------------------------------------------------------------
    // Latency and oversampling
    // ------------------------------------------------------------------

    /// Reported latency: user latency plus the rounded oversampling delay.
    pub fn latency_samples(&self) -> usize {
        self.user_latency.load(Ordering::Acquire) as usize
            + self.oversampling_latency().round() as usize
    }

    /// Whether [`set_latency_samples`](Self::set_latency_samples) was called.
    pub fn has_latency_override(&self) -> bool {
        self.latency_override.load(Ordering::Acquire)
    }

    /// Latency before oversampling is added.
    pub fn user_latency_samples(&self) -> usize {
        self.user_latency.load(Ordering::Acquire) as usize
    }

    /// Overrides the latency the node reports. Until this is called the
    /// processor's own latency is used, re-read on every prepare.
    pub fn set_latency_samples(&self, samples: usize) {
        self.latency_override.store(true, Ordering::Release);
        self.user_latency.store(samples as u32, Ordering::Release);
    }

    /// Oversampling factor.
    pub fn oversampling_factor(&self) -> usize {
        1 << self.os_pow.load(Ordering::Acquire)
    }

    /// Delay added by oversampling, in host samples.
    pub fn oversampling_latency(&self) -> f32 {
        oversampling_latency(self.oversampling_factor())
    }

    /// Changes the oversampling factor (1, 2, 4 or 8). A prepared node is
    /// re-prepared at the current block size.
    pub fn set_oversampling_factor(&self, factor: usize) -> Result<(), NodeError> {
        if !is_valid_factor(factor) {
            return Err(OversamplingError::InvalidFactor(factor).into());
        }
        let pow = factor.trailing_zeros();
        debug_assert!(pow <= MAX_OVERSAMPLING_POW);
        if self.os_pow.swap(pow, Ordering::AcqRel) == pow {
            return Ok(());
        }
        if self.is_prepared() {
            self.prepare_oversampling(self.prepared_block_size())?;
        }
        Ok(())
    }

    /// Rebuilds oversampling state and re-prepares the processor at the
    /// oversampled rate. `block_size` must be the block size the node is
    /// prepared with. An unprepared node picks the factor up at its next
    /// prepare. On failure the node is left unprepared.
    pub fn prepare_oversampling(&self, block_size: usize) -> Result<(), NodeError> {
        let mut state = self.render.lock();
        if !state.prepared {
            return Ok(());
        }
        if block_size != state.block_size {
            return Err(NodeError::BlockSizeMismatch {
                prepared: state.block_size,
                requested: block_size,
            });
        }
        let sample_rate = state.sample_rate;
        self.release_locked(&mut state);
        self.prepare_locked(&mut state, sample_rate, block_size)
    }

    /// Maximum block size of the last prepare, 0 if never prepared.
    pub fn prepared_block_size(&self) -> usize {
        self.block_size.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // MIDI filters
    // ------------------------------------------------------------------

    /// Lowest and highest note passed.
    pub fn key_range(&self) -> (u8, u8) {
        (
            self.key_low.load(Ordering::Acquire) as u8,
            self.key_high.load(Ordering::Acquire) as u8,
        )
    }

    /// Restricts notes to `low..=high`.
    pub fn set_key_range(&self, low: i32, high: i32) -> Result<(), NodeError> {
        if !(0..=127).contains(&low) || !(0..=127).contains(&high) || low > high {
            return Err(NodeError::InvalidKeyRange { low, high });
        }
        self.key_low.store(low, Ordering::Release);
        self.key_high.store(high, Ordering::Release);
        Ok(())
    }

    /// Semitones added to incoming notes.
    pub fn transpose(&self) -> i32 {
        self.transpose.load(Ordering::Acquire)
    }

    /// Sets the transpose offset.
    pub fn set_transpose(&self, semitones: i32) -> Result<(), NodeError> {
        if !(-MAX_TRANSPOSE..=MAX_TRANSPOSE).contains(&semitones) {
            return Err(NodeError::InvalidTranspose(semitones));
        }
        self.transpose.store(semitones, Ordering::Release);
        Ok(())
    }

    /// Enabled MIDI channels.
    pub fn midi_channels(&self) -> MidiChannels {
        MidiChannels::from_bits(self.midi_channels.load(Ordering::Acquire))
    }

    /// Sets the enabled MIDI channels.
    pub fn set_midi_channels(&self, channels: MidiChannels) {
        self.midi_channels.store(channels.bits(), Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Metering
    // ------------------------------------------------------------------

    /// RMS of an audio input channel over the last block.
    pub fn input_rms(&self, channel: usize) -> f32 {
        self.input_rms.get(channel).map_or(0.0, AtomicF32::load)
    }

    /// RMS of an audio output channel over the last block.
    pub fn output_rms(&self, channel: usize) -> f32 {
        self.output_rms.get(channel).map_or(0.0, AtomicF32::load)
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Processor state blob as of the last state change. Never waits on
    /// the render thread.
    pub fn state(&self) -> Vec<u8> {
        self.state.load().as_ref().clone()
    }

    /// Restores processor state.
    pub fn set_state(&self, state: &[u8]) -> Result<(), NodeError> {
        let mut render = self.render.lock();
        render.processor.set_state(state)?;
        self.state.store(Arc::new(render.processor.state()));
        Ok(())
    }

    /// Editor metadata.
    pub fn metadata(&self) -> NodeMetadata {
        self.metadata.lock().clone()
    }

    /// Replaces editor metadata.
    pub fn set_metadata(&self, metadata: NodeMetadata) {
        *self.metadata.lock() = metadata;
    }

    // ------------------------------------------------------------------
    // MIDI programs
    // ------------------------------------------------------------------

    /// Whether program change messages request program loads.
    pub fn midi_programs_enabled(&self) -> bool {
        self.programs_enabled.load(Ordering::Acquire)
    }

    /// Enables program change handling.
    pub fn set_midi_programs_enabled(&self, enabled: bool) {
        self.programs_enabled.store(enabled, Ordering::Release);
    }

    /// Requested program, -1 for none. Not necessarily loaded yet.
    pub fn midi_program(&self) -> i32 {
        self.midi_program.load(Ordering::Acquire)
    }

    /// Program that was last loaded successfully, -1 for none.
    pub fn last_midi_program(&self) -> i32 {
        self.last_midi_program.load(Ordering::Acquire)
    }

    /// Selects the active program without loading it.
    pub fn set_midi_program(&self, program: i32) -> Result<(), NodeError> {
        if !(0..=127).contains(&program) {
            return Err(NodeError::InvalidProgram(program));
        }
        self.midi_program.store(program, Ordering::Release);
        Ok(())
    }

    /// Names a program slot, creating it if needed.
    pub fn set_midi_program_name(&self, program: i32, name: impl Into<String>) -> Result<(), NodeError> {
        if !(0..=127).contains(&program) {
            return Err(NodeError::InvalidProgram(program));
        }
        self.programs.lock().entry(program).name = name.into();
        Ok(())
    }

    /// Name of a saved program.
    pub fn midi_program_name(&self, program: i32) -> Option<String> {
        self.programs.lock().get(program).map(|p| p.name.clone())
    }

    /// Numbers of saved programs.
    pub fn midi_program_numbers(&self) -> Vec<i32> {
        self.programs.lock().iter().map(|p| p.program).collect()
    }

    /// Stores the processor's current state under the active program.
    pub fn save_midi_program(&self) -> Result<(), NodeError> {
        let program = self.midi_program();
        if !(0..=127).contains(&program) {
            return Err(NodeError::InvalidProgram(program));
        }
        let state = self.state();
        let mut programs = self.programs.lock();
        programs.entry(program).state = state;
        self.last_midi_program.store(program, Ordering::Release);
        Ok(())
    }

    /// Asks the control thread to (re)load the active program.
    pub fn reload_midi_program(&self) {
        self.last_midi_program.store(-1, Ordering::Release);
        self.post(NodeTask::LoadMidiProgram(self.id));
    }

    /// Deletes a saved program.
    pub fn remove_midi_program(&self, program: i32) -> bool {
        self.programs.lock().remove(program)
    }

    /// Loads the requested program if it differs from the last loaded one.
    ///
    /// Runs on the control thread. The previous program stays in effect on
    /// failure. Returns whether a program was loaded.
    pub fn load_pending_midi_program(&self) -> Result<bool, NodeError> {
        let program = self.midi_program();
        if program < 0 || program == self.last_midi_program() {
            return Ok(false);
        }
        let programs = self.programs.lock();
        let saved = programs
            .get(program)
            .ok_or(NodeError::ProgramNotFound(program))?;
        let mut render = self.render.lock();
        render.processor.set_state(&saved.state)?;
        self.state.store(Arc::new(render.processor.state()));
        drop(render);
        self.last_midi_program.store(program, Ordering::Release);
        Ok(true)
    }

    /// Saved programs as JSON text, empty if there are none.
    pub fn midi_programs_state(&self) -> Result<String, NodeError> {
        Ok(self.programs.lock().to_json()?)
    }

    /// Replaces saved programs from JSON text. Empty text clears them.
    pub fn set_midi_programs_state(&self, text: &str) -> Result<(), NodeError> {
        let bank = ProgramBank::from_json(text)?;
        *self.programs.lock() = bank;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiMessage;

    struct Scale {
        factor: f32,
        value: f32,
    }

    impl Processor for Scale {
        fn name(&self) -> &str {
            "Scale"
        }
        fn identifier(&self) -> &str {
            "test.scale"
        }
        fn port_config(&self) -> PortConfig {
            PortConfig::audio(1, 1).with_midi(1, 1)
        }
        fn prepare(&mut self, _sample_rate: f64, _max_block_size: usize) {}
        fn process(&mut self, audio: &mut AudioBuffer, _midi: &mut MidiPipe) {
            audio.apply_gain(0, self.factor);
        }
        fn state(&self) -> Vec<u8> {
            self.value.to_le_bytes().to_vec()
        }
        fn set_state(&mut self, state: &[u8]) -> Result<(), StateError> {
            let bytes: [u8; 4] = state
                .try_into()
                .map_err(|_| StateError(format!("expected 4 bytes, got {}", state.len())))?;
            self.value = f32::from_le_bytes(bytes);
            Ok(())
        }
    }

    fn make_node() -> GraphNode {
        let node = GraphNode::new(
            NodeId::new(7),
            NodeKind::Processor,
            Box::new(Scale {
                factor: 0.5,
                value: 0.0,
            }),
        );
        node.prepare_to_render(48000.0, 8).unwrap();
        node
    }

    fn block(value: f32) -> (AudioBuffer, MidiPipe) {
        (
            AudioBuffer::from_channels(vec![vec![value; 8]]),
            MidiPipe::with_buffers(vec![crate::midi::MidiBuffer::with_capacity(16)]),
        )
    }

    #[test]
    fn test_gain_and_last_gain() {
        let node = make_node();
        node.set_gain(0.25);
        assert_eq!(node.gain(), 0.25);
        assert_eq!(node.last_gain(), 1.0);
        node.update_gain();
        assert_eq!(node.last_gain(), 0.25);
    }

    #[test]
    fn test_render_applies_processor() {
        let node = make_node();
        let (mut audio, mut midi) = block(1.0);
        node.render(&mut audio, &mut midi);
        assert!(audio.channel(0).iter().all(|s| (s - 0.5).abs() < 1e-6));
        assert!((node.output_rms(0) - 0.5).abs() < 1e-6);
        assert!((node.input_rms(0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_bypass_passes_input() {
        let node = make_node();
        node.set_bypassed(true);
        let (mut audio, mut midi) = block(0.8);
        node.render(&mut audio, &mut midi);
        assert!(audio.channel(0).iter().all(|s| (s - 0.8).abs() < 1e-6));
    }

    #[test]
    fn test_mute_wins_over_bypass() {
        let node = make_node();
        node.set_bypassed(true);
        node.set_muted(true);
        let (mut audio, mut midi) = block(0.8);
        node.render(&mut audio, &mut midi);
        assert!(audio.channel(0).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_unprepared_and_suspended_render_silence() {
        let node = make_node();
        node.suspend_processing(true);
        let (mut audio, mut midi) = block(1.0);
        node.render(&mut audio, &mut midi);
        assert!(audio.channel(0).iter().all(|s| *s == 0.0));

        node.suspend_processing(false);
        node.release_resources();
        assert!(!node.is_prepared());
        let (mut audio, mut midi) = block(1.0);
        node.render(&mut audio, &mut midi);
        assert!(audio.channel(0).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_input_gain_ramp_then_steady() {
        let node = make_node();
        node.set_input_gain(0.0);
        let (mut audio, mut midi) = block(1.0);
        node.render(&mut audio, &mut midi);
        // ramp from 1.0 down to 0.0, then the processor halves it
        assert_eq!(audio.channel(0)[0], 0.5);
        node.update_gain();
        let (mut audio, mut midi) = block(1.0);
        node.render(&mut audio, &mut midi);
        assert!(audio.channel(0).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_latency_includes_rounded_oversampling_delay() {
        let node = make_node();
        node.set_latency_samples(10);
        node.set_oversampling_factor(2).unwrap();
        let delay = node.oversampling_latency();
        assert!(delay > 0.0);
        assert_eq!(node.latency_samples(), 10 + delay.round() as usize);
        assert!(node.is_prepared());
        assert!(node.set_oversampling_factor(3).is_err());
        assert_eq!(node.oversampling_factor(), 2);
    }

    /// Records the MIDI event times it sees, then halves audio lane 0.
    struct TimeLog {
        times: Arc<std::sync::Mutex<Vec<u32>>>,
    }

    impl Processor for TimeLog {
        fn name(&self) -> &str {
            "Time log"
        }
        fn identifier(&self) -> &str {
            "test.time_log"
        }
        fn port_config(&self) -> PortConfig {
            PortConfig::audio(1, 1).with_midi(1, 1)
        }
        fn prepare(&mut self, _sample_rate: f64, _max_block_size: usize) {}
        fn process(&mut self, audio: &mut AudioBuffer, midi: &mut MidiPipe) {
            if let Some(lane) = midi.get(0) {
                self.times.lock().unwrap().extend(lane.iter().map(|m| m.time));
            }
            audio.apply_gain(0, 0.5);
        }
    }

    #[test]
    fn test_oversampled_render_settles_and_keeps_event_times() {
        let times = Arc::new(std::sync::Mutex::new(Vec::new()));
        let node = GraphNode::new(
            NodeId::new(3),
            NodeKind::Processor,
            Box::new(TimeLog {
                times: Arc::clone(&times),
            }),
        );
        node.set_oversampling_factor(2).unwrap();
        node.prepare_to_render(48000.0, 8).unwrap();

        let mut last = Vec::new();
        for _ in 0..4 {
            let (mut audio, mut midi) = block(1.0);
            midi.get_mut(0).unwrap().push(MidiMessage::note_on(1, 60, 100, 5));
            node.render(&mut audio, &mut midi);
            let out: Vec<u32> = midi.get(0).unwrap().iter().map(|m| m.time).collect();
            assert_eq!(out, vec![5]);
            last = audio.channel(0).to_vec();
        }
        assert!(last.iter().all(|s| (s - 0.5).abs() < 1e-4), "{last:?}");
        assert_eq!(*times.lock().unwrap(), vec![10; 4]);
    }

    #[test]
    fn test_prepare_oversampling_rejects_other_block_size() {
        let node = make_node();
        node.set_oversampling_factor(2).unwrap();
        assert!(matches!(
            node.prepare_oversampling(16),
            Err(NodeError::BlockSizeMismatch {
                prepared: 8,
                requested: 16
            })
        ));
        assert!(node.is_prepared());

        let mut audio = AudioBuffer::from_channels(vec![vec![1.0; 64]]);
        let mut midi = MidiPipe::with_buffers(vec![crate::midi::MidiBuffer::with_capacity(16)]);
        node.render(&mut audio, &mut midi);
        assert!(audio.channel(0).iter().all(|s| *s == 0.0));

        node.prepare_oversampling(8).unwrap();
        let (mut audio, mut midi) = block(1.0);
        node.render(&mut audio, &mut midi);
        assert!(audio.channel(0).iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_state_reads_skip_render_lock() {
        let node = make_node();
        node.set_state(&0.25f32.to_le_bytes()).unwrap();
        let guard = node.render_state().lock();
        assert_eq!(node.state(), 0.25f32.to_le_bytes().to_vec());
        assert_eq!(node.prepared_block_size(), 8);
        drop(guard);
        assert!(node.set_state(&[1, 2]).is_err());
        assert_eq!(node.state(), 0.25f32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_key_range_and_transpose_filter() {
        let node = make_node();
        node.set_key_range(60, 72).unwrap();
        node.set_transpose(12).unwrap();
        assert!(node.set_key_range(80, 70).is_err());
        assert!(node.set_transpose(25).is_err());

        let (mut audio, mut midi) = block(0.0);
        let lane = midi.get_mut(0).unwrap();
        lane.push(MidiMessage::note_on(1, 59, 100, 0));
        lane.push(MidiMessage::note_on(1, 64, 100, 1));
        lane.push(MidiMessage::controller(1, 1, 10, 2));
        node.render(&mut audio, &mut midi);
        let notes: Vec<_> = midi.get(0).unwrap().iter().map(|m| m.note_number()).collect();
        assert_eq!(notes, vec![Some(76), None]);
    }

    #[test]
    fn test_channel_mask_drops_other_channels() {
        let node = make_node();
        let mut channels = MidiChannels::none();
        channels.set(2, true);
        node.set_midi_channels(channels);
        let (mut audio, mut midi) = block(0.0);
        let lane = midi.get_mut(0).unwrap();
        lane.push(MidiMessage::note_on(1, 60, 100, 0));
        lane.push(MidiMessage::note_on(2, 61, 100, 0));
        node.render(&mut audio, &mut midi);
        assert_eq!(midi.get(0).unwrap().len(), 1);
        assert_eq!(midi.get(0).unwrap().as_slice()[0].channel(), Some(2));
    }

    #[test]
    fn test_program_save_and_load() {
        let node = make_node();
        node.set_state(&0.75f32.to_le_bytes()).unwrap();
        node.set_midi_program(3).unwrap();
        node.set_midi_program_name(3, "Soft").unwrap();
        node.save_midi_program().unwrap();
        assert_eq!(node.last_midi_program(), 3);

        node.set_state(&0.1f32.to_le_bytes()).unwrap();
        node.reload_midi_program();
        assert!(node.load_pending_midi_program().unwrap());
        assert_eq!(node.state(), 0.75f32.to_le_bytes().to_vec());
        assert_eq!(node.midi_program_name(3).as_deref(), Some("Soft"));
    }

    #[test]
    fn test_failed_program_load_keeps_previous() {
        let node = make_node();
        node.set_midi_program(1).unwrap();
        node.save_midi_program().unwrap();
        node.set_midi_program(2).unwrap();
        assert!(matches!(
            node.load_pending_midi_program(),
            Err(NodeError::ProgramNotFound(2))
        ));
        assert_eq!(node.last_midi_program(), 1);
    }

    #[test]
    fn test_programs_state_json() {
        let node = make_node();
        node.set_midi_program_name(4, "Keys").unwrap();
        let text = node.midi_programs_state().unwrap();
        let other = make_node();
        other.set_midi_programs_state(&text).unwrap();
        assert_eq!(other.midi_program_name(4).as_deref(), Some("Keys"));
        other.set_midi_programs_state("").unwrap();
        assert!(other.midi_program_numbers().is_empty());
        assert!(other.set_midi_programs_state("{not json").is_err());
    }

    #[test]
    fn test_special_parameters() {
        let node = make_node();
        assert!(is_special_parameter(-3));
        assert!(!is_special_parameter(NO_PARAMETER));
        assert_eq!(special_parameter_name(-4), Some("Mute"));
        node.set_special_parameter(SpecialParameter::Bypass, 1.0);
        assert!(node.is_bypassed());
        assert_eq!(node.special_parameter(SpecialParameter::Enabled), 1.0);
    }

    #[test]
    fn test_port_queries() {
        let node = make_node();
        assert_eq!(node.num_ports(PortType::Audio, true), 1);
        assert_eq!(node.default_midi_input_port(), Some(2));
        assert_eq!(node.default_midi_output_port(), Some(3));
        assert_eq!(node.port_for_channel(PortType::Audio, 0, false), Some(1));
        assert!(node.is_port_input(0));
        assert!(node.is_port_output(1));
        assert!(!node.is_audio_io_node());
        assert!(!node.is_sub_graph());
    }
}
