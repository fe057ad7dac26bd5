//! The processing graph: node table, arcs, and compiled render sequences.
//!
//! # Architecture
//!
//! The graph is split between two threads:
//!
//! - [`GraphProcessor`] is owned by the control thread. It holds the node
//!   table and the arc set, validates edits, and compiles
//!   [`RenderSequence`]s. The render thread never touches it.
//! - [`GraphRenderer`] is the render thread's handle. It loads the currently
//!   published sequence with a single wait-free pointer read and executes it.
//!
//! A new sequence is compiled entirely on the control thread and published
//! with one `ArcSwap` store. The render thread picks it up at its next block
//! and never sees a partially built plan. Old sequences and removed nodes
//! are freed by [`GraphProcessor::collect_garbage`] once no block holds them.
//!
//! # Example
//!
//! ```rust
//! use patchbay_core::graph::{GraphProcessor, IoConfig};
//! use patchbay_core::processors::{GainProcessor, IoNodeType};
//! use patchbay_core::{AudioBuffer, MidiBuffer};
//!
//! let mut graph = GraphProcessor::new(IoConfig::stereo());
//! let input = graph.add_io_node(IoNodeType::AudioInput);
//! let gain = graph.add_node(Box::new(GainProcessor::new(0.5, 2)));
//! let output = graph.add_io_node(IoNodeType::AudioOutput);
//! for ch in 0..2 {
//!     graph.connect(input.id(), ch, gain.id(), ch).unwrap();
//!     graph.connect(gain.id(), 2 + ch, output.id(), ch).unwrap();
//! }
//! graph.prepare_to_render(48000.0, 64);
//!
//! let renderer = graph.renderer();
//! let mut audio = AudioBuffer::from_channels(vec![vec![1.0; 64]; 2]);
//! let mut midi = MidiBuffer::new();
//! renderer.render(&mut audio, &mut midi);
//! assert!((audio.channel(0)[10] - 0.5).abs() < 1e-6);
//! ```

mod compile;
mod processor;
pub mod sequence;

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;
use crate::midi::MidiBuffer;
use crate::node::NodeId;

pub use processor::{DisconnectFilter, GraphError, GraphProcessor};
pub use sequence::{BufferRef, LaneSpan, RenderOp, RenderSequence};

/// Shared handle to a nested graph's control side.
pub type SubGraphHandle = Arc<Mutex<GraphProcessor>>;

/// Host-facing IO of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Host audio input channels.
    pub audio_inputs: u32,
    /// Host audio output channels.
    pub audio_outputs: u32,
    /// Whether a host MIDI input exists.
    pub midi_input: bool,
    /// Whether a host MIDI output exists.
    pub midi_output: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self::stereo()
    }
}

impl IoConfig {
    /// Stereo in and out with MIDI in and out.
    pub const fn stereo() -> Self {
        Self {
            audio_inputs: 2,
            audio_outputs: 2,
            midi_input: true,
            midi_output: true,
        }
    }

    /// No host IO at all.
    pub const fn none() -> Self {
        Self {
            audio_inputs: 0,
            audio_outputs: 0,
            midi_input: false,
            midi_output: false,
        }
    }
}

/// A directed arc from an output port to an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Connection {
    /// Source node.
    pub source_node: NodeId,
    /// Output port on the source node.
    pub source_port: u32,
    /// Destination node.
    pub dest_node: NodeId,
    /// Input port on the destination node.
    pub dest_port: u32,
}

impl Connection {
    /// Creates an arc description.
    pub fn new(source_node: NodeId, source_port: u32, dest_node: NodeId, dest_port: u32) -> Self {
        Self {
            source_node,
            source_port,
            dest_node,
            dest_port,
        }
    }

    /// Whether the arc touches `node` on either end.
    pub fn involves(&self, node: NodeId) -> bool {
        self.source_node == node || self.dest_node == node
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source_node, self.source_port, self.dest_node, self.dest_port
        )
    }
}

/// State shared between the control side and render handles.
pub(crate) struct GraphShared {
    pub(crate) sequence: ArcSwap<RenderSequence>,
    pub(crate) io: ArcSwap<IoConfig>,
}

impl GraphShared {
    pub(crate) fn new(io: IoConfig) -> Self {
        Self {
            sequence: ArcSwap::from_pointee(RenderSequence::empty()),
            io: ArcSwap::from_pointee(io),
        }
    }
}

/// Render-thread handle to a graph. Cheap to clone, `Send + Sync`.
#[derive(Clone)]
pub struct GraphRenderer {
    shared: Arc<GraphShared>,
}

impl fmt::Debug for GraphRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphRenderer")
            .field("sequence", &*self.shared.sequence.load())
            .finish()
    }
}

impl GraphRenderer {
    pub(crate) fn new(shared: Arc<GraphShared>) -> Self {
        Self { shared }
    }

    /// Renders one block through the currently published sequence.
    ///
    /// `audio` holds the host inputs on entry and the host outputs on
    /// return; `midi` likewise. Does not allocate, lock, or block.
    pub fn render(&self, audio: &mut AudioBuffer, midi: &mut MidiBuffer) {
        let sequence = self.shared.sequence.load();
        sequence.render(audio, midi);
    }

    /// Latency of the published sequence.
    pub fn latency_samples(&self) -> usize {
        self.shared.sequence.load().latency_samples()
    }

    /// Current host IO configuration.
    pub fn io_config(&self) -> IoConfig {
        **self.shared.io.load()
    }
}
