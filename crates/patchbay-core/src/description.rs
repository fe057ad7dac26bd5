//! Serializable description of a graph: nodes, arcs, and per-node state.
//!
//! The session layer loads a [`GraphDescription`] into a
//! [`GraphManager`](crate::GraphManager) and asks the manager for one when
//! saving. Field order matters for TOML output: plain values come before
//! nested tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::IoConfig;
use crate::port::PortConfig;

/// Identifier of the nested-graph node type.
pub const SUBGRAPH_IDENTIFIER: &str = "graph";

/// Whole-graph description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Host IO the graph expects. The engine's IO applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io: Option<IoConfig>,
    /// Nodes in id order.
    #[serde(default)]
    pub nodes: Vec<NodeDescription>,
    /// Connections.
    #[serde(default)]
    pub arcs: Vec<ArcDescription>,
}

impl GraphDescription {
    /// Description of a node by id.
    pub fn node(&self, id: u32) -> Option<&NodeDescription> {
        self.nodes.iter().find(|n| n.id == Some(id))
    }
}

/// A value in a node's property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
}

impl PropertyValue {
    /// Numeric value, converting integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Editor position of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal.
    pub x: f64,
    /// Vertical.
    pub y: f64,
}

fn default_true() -> bool {
    true
}

fn default_unity() -> f32 {
    1.0
}

fn default_factor() -> u32 {
    1
}

fn default_key_high() -> u8 {
    127
}

fn default_channels() -> u16 {
    u16::MAX
}

fn default_program() -> i32 {
    -1
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// One node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    /// Requested node id. A fresh id is assigned when absent or taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Processor type, resolved by a [`ProcessorFactory`](crate::ProcessorFactory).
    pub identifier: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Enabled flag.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bypass flag.
    #[serde(default, skip_serializing_if = "is_false")]
    pub bypassed: bool,
    /// Mute flag.
    #[serde(default, skip_serializing_if = "is_false")]
    pub muted: bool,
    /// Input mute flag.
    #[serde(default, skip_serializing_if = "is_false")]
    pub mute_input: bool,
    /// Output gain.
    #[serde(default = "default_unity")]
    pub gain: f32,
    /// Input gain.
    #[serde(default = "default_unity")]
    pub input_gain: f32,
    /// Oversampling factor: 1, 2, 4 or 8.
    #[serde(default = "default_factor")]
    pub oversampling: u32,
    /// Latency override in samples. Zero keeps the processor's own latency.
    #[serde(default)]
    pub latency: u32,
    /// Lowest MIDI note passed to the node.
    #[serde(default)]
    pub key_low: u8,
    /// Highest MIDI note passed to the node.
    #[serde(default = "default_key_high")]
    pub key_high: u8,
    /// Semitones added to incoming notes.
    #[serde(default)]
    pub transpose: i32,
    /// Enabled MIDI channels, bit 0 is channel 1.
    #[serde(default = "default_channels")]
    pub midi_channels: u16,
    /// Active MIDI program, -1 for none.
    #[serde(default = "default_program")]
    pub midi_program: i32,
    /// Whether program change messages load programs.
    #[serde(default, skip_serializing_if = "is_false")]
    pub midi_programs_enabled: bool,
    /// Saved MIDI programs as JSON.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub midi_programs: String,
    /// Processor state blob.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state: Vec<u8>,
    /// Port layout, used to stand in for a processor that cannot be created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortConfig>,
    /// Editor position.
    #[serde(default)]
    pub position: Position,
    /// Processor-specific settings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Contents of a nested graph node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<Box<GraphDescription>>,
}

impl NodeDescription {
    /// Description with defaults for everything but the identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            id: None,
            identifier: identifier.into(),
            name: String::new(),
            enabled: true,
            bypassed: false,
            muted: false,
            mute_input: false,
            gain: 1.0,
            input_gain: 1.0,
            oversampling: 1,
            latency: 0,
            key_low: 0,
            key_high: 127,
            transpose: 0,
            midi_channels: u16::MAX,
            midi_program: -1,
            midi_programs_enabled: false,
            midi_programs: String::new(),
            state: Vec::new(),
            ports: None,
            position: Position::default(),
            properties: BTreeMap::new(),
            graph: None,
        }
    }

    /// Sets the requested id.
    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a property.
    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Sets the port layout.
    pub fn with_ports(mut self, ports: PortConfig) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Numeric property with a fallback.
    pub fn number(&self, key: &str, default: f64) -> f64 {
        self.properties
            .get(key)
            .and_then(PropertyValue::as_f64)
            .unwrap_or(default)
    }
}

/// One connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArcDescription {
    /// Source node id.
    pub source_node: u32,
    /// Source port index.
    pub source_port: u32,
    /// Destination node id.
    pub dest_node: u32,
    /// Destination port index.
    pub dest_port: u32,
    /// Arc could not be made when loaded and is retried after edits.
    #[serde(default, skip_serializing_if = "is_false")]
    pub missing: bool,
}

impl ArcDescription {
    /// A live arc.
    pub fn new(source_node: u32, source_port: u32, dest_node: u32, dest_port: u32) -> Self {
        Self {
            source_node,
            source_port,
            dest_node,
            dest_port,
            missing: false,
        }
    }

    /// Same endpoints, ignoring the missing flag.
    pub fn same_endpoints(&self, other: &ArcDescription) -> bool {
        self.source_node == other.source_node
            && self.source_port == other.source_port
            && self.dest_node == other.dest_node
            && self.dest_port == other.dest_port
    }
}
