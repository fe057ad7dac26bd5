//! Typed, directional ports and the per-node port table.
//!
//! Every node exposes an ordered [`PortList`]. Indices are laid out by
//! [`PortList::from_config`] in a fixed order: audio inputs, audio outputs,
//! control inputs, control outputs, MIDI inputs, MIDI outputs. Within each
//! group the port's `channel` counts from zero, so an audio port index can
//! be mapped to a buffer lane and back.
//!
//! Port indices are stable for a node's lifetime unless the node's I/O
//! configuration is rebuilt (see [`GraphNode::reset_ports`](crate::GraphNode::reset_ports)).

use serde::{Deserialize, Serialize};

/// Kind of signal carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    /// Block of audio samples.
    Audio,
    /// Audio-rate control signal (one sample lane per port).
    Control,
    /// Timestamped MIDI events.
    Midi,
}

impl PortType {
    /// Short lowercase name used in logs and descriptions.
    pub const fn name(self) -> &'static str {
        match self {
            PortType::Audio => "audio",
            PortType::Control => "control",
            PortType::Midi => "midi",
        }
    }

    /// Whether an output of this type may feed an input of `other`.
    pub fn can_connect(self, other: PortType) -> bool {
        self == other
    }
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single port on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    /// Signal type.
    pub port_type: PortType,
    /// Index within the owning node's [`PortList`].
    pub index: u32,
    /// Channel within the port's type and direction group.
    pub channel: u32,
    /// `true` for inputs, `false` for outputs.
    pub is_input: bool,
    /// Stable machine-readable symbol, e.g. `audio_in_1`.
    pub symbol: String,
    /// Display name, e.g. `Audio In 1`.
    pub name: String,
}

impl Port {
    /// Whether this port is an output.
    pub fn is_output(&self) -> bool {
        !self.is_input
    }
}

/// Port counts a processor declares. Drives [`PortList::from_config`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Number of audio input channels.
    pub audio_inputs: u32,
    /// Number of audio output channels.
    pub audio_outputs: u32,
    /// Number of control inputs.
    pub control_inputs: u32,
    /// Number of control outputs.
    pub control_outputs: u32,
    /// Number of MIDI inputs.
    pub midi_inputs: u32,
    /// Number of MIDI outputs.
    pub midi_outputs: u32,
}

impl PortConfig {
    /// Audio-only configuration.
    pub const fn audio(inputs: u32, outputs: u32) -> Self {
        Self {
            audio_inputs: inputs,
            audio_outputs: outputs,
            control_inputs: 0,
            control_outputs: 0,
            midi_inputs: 0,
            midi_outputs: 0,
        }
    }

    /// Adds MIDI ports.
    pub const fn with_midi(mut self, inputs: u32, outputs: u32) -> Self {
        self.midi_inputs = inputs;
        self.midi_outputs = outputs;
        self
    }

    /// Adds control ports.
    pub const fn with_control(mut self, inputs: u32, outputs: u32) -> Self {
        self.control_inputs = inputs;
        self.control_outputs = outputs;
        self
    }

    /// Audio lanes a node needs for in-place processing.
    pub fn audio_lanes(&self) -> usize {
        self.audio_inputs.max(self.audio_outputs) as usize
    }

    /// Control lanes, stored after the audio lanes in the same buffer.
    pub fn control_lanes(&self) -> usize {
        self.control_inputs.max(self.control_outputs) as usize
    }

    /// Total sample lanes (audio then control).
    pub fn total_lanes(&self) -> usize {
        self.audio_lanes() + self.control_lanes()
    }

    /// MIDI buffer slots the node needs.
    pub fn midi_slots(&self) -> usize {
        self.midi_inputs.max(self.midi_outputs) as usize
    }

    /// Count for one port group.
    pub fn count(&self, port_type: PortType, is_input: bool) -> u32 {
        match (port_type, is_input) {
            (PortType::Audio, true) => self.audio_inputs,
            (PortType::Audio, false) => self.audio_outputs,
            (PortType::Control, true) => self.control_inputs,
            (PortType::Control, false) => self.control_outputs,
            (PortType::Midi, true) => self.midi_inputs,
            (PortType::Midi, false) => self.midi_outputs,
        }
    }
}

/// Ordered port table of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortList {
    ports: Vec<Port>,
}

const GROUP_ORDER: [(PortType, bool); 6] = [
    (PortType::Audio, true),
    (PortType::Audio, false),
    (PortType::Control, true),
    (PortType::Control, false),
    (PortType::Midi, true),
    (PortType::Midi, false),
];

impl PortList {
    /// Creates an empty port list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the canonical port layout for a configuration.
    pub fn from_config(config: &PortConfig) -> Self {
        let mut list = Self::new();
        for (port_type, is_input) in GROUP_ORDER {
            let count = config.count(port_type, is_input);
            for channel in 0..count {
                let (symbol, name) = port_labels(port_type, is_input, channel, count);
                list.add(port_type, channel, is_input, symbol, name);
            }
        }
        list
    }

    /// Appends a port and returns its index.
    pub fn add(
        &mut self,
        port_type: PortType,
        channel: u32,
        is_input: bool,
        symbol: impl Into<String>,
        name: impl Into<String>,
    ) -> u32 {
        let index = self.ports.len() as u32;
        self.ports.push(Port {
            port_type,
            index,
            channel,
            is_input,
            symbol: symbol.into(),
            name: name.into(),
        });
        index
    }

    /// Number of ports.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Whether the node has no ports.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Port by index.
    pub fn get(&self, index: u32) -> Option<&Port> {
        self.ports.get(index as usize)
    }

    /// Iterates all ports in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    /// Type of the port at `index`.
    pub fn port_type(&self, index: u32) -> Option<PortType> {
        self.get(index).map(|p| p.port_type)
    }

    /// Whether the port at `index` exists and is an input.
    pub fn is_input(&self, index: u32) -> bool {
        self.get(index).is_some_and(|p| p.is_input)
    }

    /// Whether the port at `index` exists and is an output.
    pub fn is_output(&self, index: u32) -> bool {
        self.get(index).is_some_and(|p| !p.is_input)
    }

    /// Number of ports of a type and direction.
    pub fn count(&self, port_type: PortType, is_input: bool) -> u32 {
        self.ports
            .iter()
            .filter(|p| p.port_type == port_type && p.is_input == is_input)
            .count() as u32
    }

    /// Channel of the port at `index` within its group.
    pub fn channel_for_port(&self, index: u32) -> Option<u32> {
        self.get(index).map(|p| p.channel)
    }

    /// Port index for a channel of a group.
    pub fn port_for_channel(&self, port_type: PortType, channel: u32, is_input: bool) -> Option<u32> {
        self.ports
            .iter()
            .find(|p| p.port_type == port_type && p.is_input == is_input && p.channel == channel)
            .map(|p| p.index)
    }

    /// Index of the `n`-th port of a group, counting in index order.
    pub fn nth_port(&self, port_type: PortType, n: usize, is_input: bool) -> Option<u32> {
        self.ports
            .iter()
            .filter(|p| p.port_type == port_type && p.is_input == is_input)
            .nth(n)
            .map(|p| p.index)
    }

    /// Port counts, recovered from the table.
    pub fn config(&self) -> PortConfig {
        PortConfig {
            audio_inputs: self.count(PortType::Audio, true),
            audio_outputs: self.count(PortType::Audio, false),
            control_inputs: self.count(PortType::Control, true),
            control_outputs: self.count(PortType::Control, false),
            midi_inputs: self.count(PortType::Midi, true),
            midi_outputs: self.count(PortType::Midi, false),
        }
    }
}

fn port_labels(port_type: PortType, is_input: bool, channel: u32, count: u32) -> (String, String) {
    let (dir_sym, dir_name) = if is_input { ("in", "In") } else { ("out", "Out") };
    let type_name = match port_type {
        PortType::Audio => "Audio",
        PortType::Control => "Control",
        PortType::Midi => "MIDI",
    };
    if port_type == PortType::Midi && count == 1 {
        return (format!("midi_{dir_sym}"), format!("{type_name} {dir_name}"));
    }
    (
        format!("{}_{dir_sym}_{}", port_type.name(), channel + 1),
        format!("{type_name} {dir_name} {}", channel + 1),
    )
}
