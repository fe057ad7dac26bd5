//! Patchbay Core - real-time audio/MIDI processing graph
//!
//! This crate is the engine of patchbay: an in-memory graph of typed
//! processing nodes that is validated and compiled on a control thread and
//! rendered, block by block, on a real-time thread.
//!
//! # Core Abstractions
//!
//! ## Nodes and Ports
//!
//! - [`Processor`] - Object-safe trait every processing unit implements
//! - [`GraphNode`] - Uniform wrapper adding enable/bypass/mute, gain ramps,
//!   MIDI filtering, oversampling, latency and MIDI programs
//! - [`PortList`] - Typed, directional ports (audio, control, MIDI)
//!
//! ## Graph
//!
//! - [`GraphProcessor`] - Node table, arc validation, sequence compilation
//! - [`RenderSequence`] - Immutable compiled op list, executed per block
//! - [`GraphRenderer`] - Render-thread handle, wait-free sequence pickup
//! - [`GraphManager`] - Control-thread facade: batched edits, load/save,
//!   deferred tasks and events
//!
//! ## Buffers
//!
//! - [`AudioBuffer`] - Owned multichannel block
//! - [`MidiBuffer`] / [`MidiPipe`] - Fixed-capacity timestamped events
//!
//! # Threading
//!
//! The render thread only ever calls [`GraphRenderer::render`]. It loads the
//! published sequence through `arc-swap`, `try_lock`s each node's render
//! state, and never allocates. Everything else runs on the control thread.
//!
//! # Example
//!
//! ```rust
//! use patchbay_core::description::{ArcDescription, GraphDescription, NodeDescription, PropertyValue};
//! use patchbay_core::{AudioBuffer, GraphManager, IoConfig, MidiBuffer};
//!
//! let io = IoConfig { audio_inputs: 1, audio_outputs: 1, midi_input: false, midi_output: false };
//! let desc = GraphDescription {
//!     nodes: vec![
//!         NodeDescription::new("audio.input").with_id(1),
//!         NodeDescription::new("gain")
//!             .with_id(2)
//!             .with_property("gain", PropertyValue::Float(0.5))
//!             .with_property("channels", PropertyValue::Int(1)),
//!         NodeDescription::new("audio.output").with_id(3),
//!     ],
//!     arcs: vec![ArcDescription::new(1, 0, 2, 0), ArcDescription::new(2, 1, 3, 0)],
//!     ..GraphDescription::default()
//! };
//!
//! let mut manager = GraphManager::with_registry(io);
//! let report = manager.load(&desc);
//! assert!(report.missing.is_empty());
//! manager.prepare_to_render(48000.0, 128);
//!
//! let renderer = manager.renderer();
//! let mut audio = AudioBuffer::from_channels(vec![vec![0.8; 128]]);
//! let mut midi = MidiBuffer::new();
//! renderer.render(&mut audio, &mut midi);
//! assert!((audio.channel(0)[64] - 0.4).abs() < 1e-6);
//! ```

pub mod buffer;
pub mod description;
pub mod events;
pub mod graph;
pub mod manager;
pub mod midi;
pub mod node;
pub mod oversample;
pub mod port;
pub mod processor;
pub mod processors;
pub mod program;
pub mod registry;
pub mod tasks;

pub use buffer::{AudioBuffer, BufferPool};
pub use description::{ArcDescription, GraphDescription, NodeDescription, PropertyValue};
pub use events::{EventDispatcher, GraphEvent, ListenerId};
pub use graph::{
    Connection, DisconnectFilter, GraphError, GraphProcessor, GraphRenderer, IoConfig,
    RenderOp, RenderSequence, SubGraphHandle,
};
pub use manager::{GraphManager, LoadReport, ManagerError, NewArc};
pub use midi::{MidiBuffer, MidiChannels, MidiMessage, MidiPipe};
pub use node::{GraphNode, NodeError, NodeId, NodeKind, SpecialParameter};
pub use oversample::{Oversampler, OversamplingError};
pub use port::{Port, PortConfig, PortList, PortType};
pub use processor::{Processor, StateError};
pub use registry::{FactoryError, ProcessorFactory, ProcessorRegistry};
