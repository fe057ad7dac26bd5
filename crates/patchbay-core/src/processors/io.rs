//! Host IO nodes.
//!
//! IO processors carry no DSP. The render sequence moves samples and events
//! between the host buffers and the graph when it reaches an IO node; the
//! processor only reports ports, derived from the graph's current
//! [`IoConfig`](crate::graph::IoConfig).

use std::sync::Arc;

use crate::buffer::AudioBuffer;
use crate::graph::GraphShared;
use crate::midi::MidiPipe;
use crate::node::NodeKind;
use crate::port::PortConfig;
use crate::processor::Processor;

/// Which side of the host a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoNodeType {
    /// Host audio into the graph.
    AudioInput,
    /// Graph audio out to the host.
    AudioOutput,
    /// Host MIDI into the graph.
    MidiInput,
    /// Graph MIDI out to the host.
    MidiOutput,
}

impl IoNodeType {
    /// Every IO node type.
    pub const ALL: [IoNodeType; 4] = [
        IoNodeType::AudioInput,
        IoNodeType::AudioOutput,
        IoNodeType::MidiInput,
        IoNodeType::MidiOutput,
    ];

    /// Registry identifier.
    pub const fn identifier(self) -> &'static str {
        match self {
            IoNodeType::AudioInput => "audio.input",
            IoNodeType::AudioOutput => "audio.output",
            IoNodeType::MidiInput => "midi.input",
            IoNodeType::MidiOutput => "midi.output",
        }
    }

    /// Display name.
    pub const fn name(self) -> &'static str {
        match self {
            IoNodeType::AudioInput => "Audio Input",
            IoNodeType::AudioOutput => "Audio Output",
            IoNodeType::MidiInput => "MIDI Input",
            IoNodeType::MidiOutput => "MIDI Output",
        }
    }

    /// Looks up a type by registry identifier.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.identifier() == identifier)
    }

    /// IO type of a node kind, if it is one.
    pub fn of(kind: &NodeKind) -> Option<Self> {
        match kind {
            NodeKind::AudioInput => Some(IoNodeType::AudioInput),
            NodeKind::AudioOutput => Some(IoNodeType::AudioOutput),
            NodeKind::MidiInput => Some(IoNodeType::MidiInput),
            NodeKind::MidiOutput => Some(IoNodeType::MidiOutput),
            NodeKind::Processor | NodeKind::SubGraph(_) => None,
        }
    }

    pub(crate) fn node_kind(self) -> NodeKind {
        match self {
            IoNodeType::AudioInput => NodeKind::AudioInput,
            IoNodeType::AudioOutput => NodeKind::AudioOutput,
            IoNodeType::MidiInput => NodeKind::MidiInput,
            IoNodeType::MidiOutput => NodeKind::MidiOutput,
        }
    }
}

/// Port-only processor behind an IO node.
pub struct IoProcessor {
    io_type: IoNodeType,
    shared: Arc<GraphShared>,
}

impl std::fmt::Debug for IoProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoProcessor")
            .field("io_type", &self.io_type)
            .finish_non_exhaustive()
    }
}

impl IoProcessor {
    pub(crate) fn new(io_type: IoNodeType, shared: Arc<GraphShared>) -> Self {
        Self { io_type, shared }
    }

    /// IO type.
    pub fn io_type(&self) -> IoNodeType {
        self.io_type
    }
}

impl Processor for IoProcessor {
    fn name(&self) -> &str {
        self.io_type.name()
    }

    fn identifier(&self) -> &str {
        self.io_type.identifier()
    }

    fn port_config(&self) -> PortConfig {
        let io = self.shared.io.load();
        match self.io_type {
            // A graph's input is a source inside the graph, so host inputs
            // become output ports and vice versa.
            IoNodeType::AudioInput => PortConfig::audio(0, io.audio_inputs),
            IoNodeType::AudioOutput => PortConfig::audio(io.audio_outputs, 0),
            IoNodeType::MidiInput => PortConfig::default().with_midi(0, u32::from(io.midi_input)),
            IoNodeType::MidiOutput => PortConfig::default().with_midi(u32::from(io.midi_output), 0),
        }
    }

    fn prepare(&mut self, _sample_rate: f64, _max_block_size: usize) {}

    fn process(&mut self, _audio: &mut AudioBuffer, _midi: &mut MidiPipe) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::IoConfig;

    #[test]
    fn test_identifier_roundtrip() {
        for t in IoNodeType::ALL {
            assert_eq!(IoNodeType::from_identifier(t.identifier()), Some(t));
            assert_eq!(IoNodeType::of(&t.node_kind()), Some(t));
        }
        assert_eq!(IoNodeType::from_identifier("gain"), None);
    }

    #[test]
    fn test_ports_follow_io_config() {
        let shared = Arc::new(GraphShared::new(IoConfig::stereo()));
        let input = IoProcessor::new(IoNodeType::AudioInput, Arc::clone(&shared));
        assert_eq!(input.port_config(), PortConfig::audio(0, 2));

        shared.io.store(Arc::new(IoConfig {
            audio_inputs: 4,
            midi_input: false,
            ..IoConfig::stereo()
        }));
        assert_eq!(input.port_config(), PortConfig::audio(0, 4));
        let midi = IoProcessor::new(IoNodeType::MidiInput, shared);
        assert_eq!(midi.port_config().midi_outputs, 0);
    }
}
