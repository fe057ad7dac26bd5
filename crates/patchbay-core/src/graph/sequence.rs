//! Compiled render sequences and their execution.
//!
//! A [`RenderSequence`] is an immutable snapshot of the graph: a flat list of
//! [`RenderOp`]s, the nodes they render, and the buffer pool they run
//! against. The render thread executes it once per block. Topology changes
//! never touch a published sequence; they compile a new one.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{AudioBuffer, BufferPool};
use crate::graph::IoConfig;
use crate::midi::{DEFAULT_MIDI_CAPACITY, MidiBuffer};
use crate::node::{GraphNode, NodeId, NodeKind};

/// A slot in the sequence's buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRef {
    /// Sample lane (audio or control).
    Audio(usize),
    /// MIDI buffer.
    Midi(usize),
}

impl fmt::Display for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferRef::Audio(i) => write!(f, "audio[{i}]"),
            BufferRef::Midi(i) => write!(f, "midi[{i}]"),
        }
    }
}

/// A run of entries in the sequence's lane table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneSpan {
    /// First entry.
    pub start: usize,
    /// Number of entries.
    pub len: usize,
}

impl LaneSpan {
    fn range(self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// One step of a render sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOp {
    /// Zero a buffer.
    ClearBuffer(BufferRef),
    /// Overwrite `dest` with `source`.
    CopyBuffer {
        /// Read.
        source: BufferRef,
        /// Written.
        dest: BufferRef,
    },
    /// Add `source` into `dest` (merge, for MIDI).
    AccumulateBuffer {
        /// Read.
        source: BufferRef,
        /// Written.
        dest: BufferRef,
    },
    /// Render a node in place over its lanes.
    RenderNode {
        /// Node rendered.
        node: NodeId,
        /// Index into the sequence's node list.
        slot: usize,
        /// Audio and control lanes, inputs on entry, outputs on return.
        audio: LaneSpan,
        /// MIDI lanes.
        midi: LaneSpan,
    },
}

impl fmt::Display for RenderOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderOp::ClearBuffer(buf) => write!(f, "Clear {buf}"),
            RenderOp::CopyBuffer { source, dest } => write!(f, "Copy {source} -> {dest}"),
            RenderOp::AccumulateBuffer { source, dest } => write!(f, "Accumulate {source} -> {dest}"),
            RenderOp::RenderNode {
                node, audio, midi, ..
            } => write!(
                f,
                "Render node {node} ({} audio lanes, {} midi lanes)",
                audio.len, midi.len
            ),
        }
    }
}

struct RenderBuffers {
    pool: BufferPool,
    host_input: AudioBuffer,
    host_midi: MidiBuffer,
}

/// An immutable, executable render plan.
pub struct RenderSequence {
    ops: Vec<RenderOp>,
    nodes: Vec<Arc<GraphNode>>,
    audio_lanes: Vec<usize>,
    midi_lanes: Vec<usize>,
    buffers: Mutex<RenderBuffers>,
    block_size: usize,
    latency: usize,
}

impl fmt::Debug for RenderSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSequence")
            .field("ops", &self.ops.len())
            .field("nodes", &self.nodes.len())
            .field("block_size", &self.block_size)
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

/// Parts of a sequence produced by the compiler.
pub(crate) struct SequenceParts {
    pub ops: Vec<RenderOp>,
    pub nodes: Vec<Arc<GraphNode>>,
    pub audio_lanes: Vec<usize>,
    pub midi_lanes: Vec<usize>,
    pub audio_buffers: usize,
    pub midi_buffers: usize,
    pub latency: usize,
}

impl RenderSequence {
    /// A sequence that renders silence.
    pub fn empty() -> Self {
        Self::from_parts(
            SequenceParts {
                ops: Vec::new(),
                nodes: Vec::new(),
                audio_lanes: Vec::new(),
                midi_lanes: Vec::new(),
                audio_buffers: 0,
                midi_buffers: 0,
                latency: 0,
            },
            IoConfig::default(),
            0,
        )
    }

    pub(crate) fn from_parts(parts: SequenceParts, io: IoConfig, block_size: usize) -> Self {
        Self {
            ops: parts.ops,
            nodes: parts.nodes,
            audio_lanes: parts.audio_lanes,
            midi_lanes: parts.midi_lanes,
            buffers: Mutex::new(RenderBuffers {
                pool: BufferPool::new(
                    parts.audio_buffers,
                    parts.midi_buffers,
                    block_size,
                    DEFAULT_MIDI_CAPACITY,
                ),
                host_input: AudioBuffer::new(io.audio_inputs as usize, block_size),
                host_midi: MidiBuffer::with_capacity(if io.midi_input {
                    DEFAULT_MIDI_CAPACITY
                } else {
                    0
                }),
            }),
            block_size,
            latency: parts.latency,
        }
    }

    /// Ops in execution order.
    pub fn ops(&self) -> &[RenderOp] {
        &self.ops
    }

    /// Rendered nodes in execution order.
    pub fn node_order(&self) -> Vec<NodeId> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                RenderOp::RenderNode { node, .. } => Some(*node),
                _ => None,
            })
            .collect()
    }

    /// Whether `id` is rendered by this sequence.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|n| n.id() == id)
    }

    /// Physical sample lanes in the pool.
    pub fn num_audio_buffers(&self) -> usize {
        self.buffers.lock().pool.audio_count()
    }

    /// Physical MIDI buffers in the pool.
    pub fn num_midi_buffers(&self) -> usize {
        self.buffers.lock().pool.midi_count()
    }

    /// Largest block the sequence renders.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Longest path latency to the audio outputs.
    pub fn latency_samples(&self) -> usize {
        self.latency
    }

    /// Whether the sequence renders nothing.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Renders one block. Host audio channels are the graph's inputs on
    /// entry and its outputs on return; the MIDI buffer likewise.
    ///
    /// Samples beyond the sequence's block size are silenced. Never blocks.
    pub fn render(&self, audio: &mut AudioBuffer, midi: &mut MidiBuffer) {
        let Some(mut guard) = self.buffers.try_lock() else {
            audio.clear();
            midi.clear();
            return;
        };
        let bufs = &mut *guard;
        let len = audio.num_samples().min(self.block_size);

        bufs.host_input.set_num_samples(len);
        for ch in 0..bufs.host_input.num_channels() {
            let dst = bufs.host_input.channel_mut(ch);
            let src = if ch < audio.num_channels() { audio.channel(ch) } else { &[] };
            let n = src.len().min(len);
            dst[..n].copy_from_slice(&src[..n]);
            dst[n..].fill(0.0);
        }
        bufs.host_midi.copy_from(midi);
        audio.clear();
        midi.clear();

        for op in &self.ops {
            match *op {
                RenderOp::ClearBuffer(BufferRef::Audio(i)) => bufs.pool.audio_mut(i, len).fill(0.0),
                RenderOp::ClearBuffer(BufferRef::Midi(i)) => bufs.pool.midi_mut(i).clear(),
                RenderOp::CopyBuffer {
                    source: BufferRef::Audio(s),
                    dest: BufferRef::Audio(d),
                } if s != d => {
                    let (src, dst) = bufs.pool.audio_pair(s, d, len);
                    dst.copy_from_slice(src);
                }
                RenderOp::AccumulateBuffer {
                    source: BufferRef::Audio(s),
                    dest: BufferRef::Audio(d),
                } if s != d => {
                    let (src, dst) = bufs.pool.audio_pair(s, d, len);
                    for (o, i) in dst.iter_mut().zip(src) {
                        *o += i;
                    }
                }
                RenderOp::CopyBuffer {
                    source: BufferRef::Midi(s),
                    dest: BufferRef::Midi(d),
                } if s != d => {
                    let (src, dst) = bufs.pool.midi_pair(s, d);
                    dst.copy_from(src);
                }
                RenderOp::AccumulateBuffer {
                    source: BufferRef::Midi(s),
                    dest: BufferRef::Midi(d),
                } if s != d => {
                    let (src, dst) = bufs.pool.midi_pair(s, d);
                    dst.merge_from(src);
                }
                RenderOp::CopyBuffer { .. } | RenderOp::AccumulateBuffer { .. } => {}
                RenderOp::RenderNode {
                    slot, audio: a, midi: m, ..
                } => {
                    self.render_node(slot, a, m, bufs, audio, midi, len);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn render_node(
        &self,
        slot: usize,
        audio_span: LaneSpan,
        midi_span: LaneSpan,
        bufs: &mut RenderBuffers,
        host_audio: &mut AudioBuffer,
        host_midi: &mut MidiBuffer,
        len: usize,
    ) {
        let node = &self.nodes[slot];
        let audio_lanes = &self.audio_lanes[audio_span.range()];
        let midi_lanes = &self.midi_lanes[midi_span.range()];
        let live = node.is_enabled() && !node.is_muted() && !node.is_suspended();

        match node.kind() {
            NodeKind::AudioInput => {
                for (ch, &lane) in audio_lanes.iter().enumerate() {
                    let dst = bufs.pool.audio_mut(lane, len);
                    if live && ch < bufs.host_input.num_channels() {
                        dst.copy_from_slice(bufs.host_input.channel(ch));
                    } else {
                        dst.fill(0.0);
                    }
                }
            }
            NodeKind::AudioOutput => {
                if live {
                    for (ch, &lane) in audio_lanes.iter().enumerate() {
                        if ch < host_audio.num_channels() {
                            let src = bufs.pool.audio(lane, len);
                            for (o, i) in host_audio.channel_mut(ch).iter_mut().zip(src) {
                                *o += i;
                            }
                        }
                    }
                }
            }
            NodeKind::MidiInput => {
                if let Some(&lane) = midi_lanes.first() {
                    let dst = bufs.pool.midi_mut(lane);
                    if live {
                        dst.copy_from(&bufs.host_midi);
                    } else {
                        dst.clear();
                    }
                }
            }
            NodeKind::MidiOutput => {
                if let Some(&lane) = midi_lanes.first() {
                    if live {
                        host_midi.merge_from(bufs.pool.midi(lane));
                    }
                }
            }
            NodeKind::Processor | NodeKind::SubGraph(_) => {
                Self::render_processor(node, audio_lanes, midi_lanes, &mut bufs.pool, len);
            }
        }
        node.update_gain();
    }

    fn render_processor(
        node: &GraphNode,
        audio_lanes: &[usize],
        midi_lanes: &[usize],
        pool: &mut BufferPool,
        len: usize,
    ) {
        let silence = |pool: &mut BufferPool| {
            for &lane in audio_lanes {
                pool.audio_mut(lane, len).fill(0.0);
            }
            for &lane in midi_lanes {
                pool.midi_mut(lane).clear();
            }
        };
        let Some(mut guard) = node.render_state().try_lock() else {
            silence(pool);
            return;
        };
        let state = &mut *guard;
        let mut audio = std::mem::take(&mut state.audio);
        let mut midi = std::mem::take(&mut state.midi);

        if audio.num_channels() == audio_lanes.len() && midi.len() == midi_lanes.len() {
            for (i, &lane) in audio_lanes.iter().enumerate() {
                audio.swap_lane(i, pool.audio_storage(lane));
            }
            for (i, &lane) in midi_lanes.iter().enumerate() {
                midi.swap_lane(i, pool.midi_storage(lane));
            }
            audio.set_num_samples(len);

            node.process_block(state, &mut audio, &mut midi);

            for (i, &lane) in audio_lanes.iter().enumerate() {
                audio.swap_lane(i, pool.audio_storage(lane));
            }
            for (i, &lane) in midi_lanes.iter().enumerate() {
                midi.swap_lane(i, pool.midi_storage(lane));
            }
        } else {
            // ports changed since this sequence was compiled
            silence(pool);
        }

        state.audio = audio;
        state.midi = midi;
    }
}
