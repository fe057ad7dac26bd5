//! Control-thread facade over a [`GraphProcessor`].
//!
//! The manager is where controllers, editors and the session layer meet the
//! engine. It:
//!
//! - turns [`NodeDescription`]s into nodes through a [`ProcessorFactory`];
//! - batches edits so each call publishes exactly one new render sequence;
//! - keeps arcs that could not be made at load time and retries them after
//!   every later edit;
//! - drains the graph's deferred tasks and dispatches the resulting events.
//!
//! # Example
//!
//! ```rust
//! use patchbay_core::description::{NodeDescription, PropertyValue};
//! use patchbay_core::graph::IoConfig;
//! use patchbay_core::manager::{GraphManager, NewArc};
//! use patchbay_core::processors::IoNodeType;
//!
//! let mut manager = GraphManager::with_registry(IoConfig::stereo());
//! let input = manager.add_io_node(IoNodeType::AudioInput).unwrap().id();
//!
//! let gain = NodeDescription::new("gain").with_property("gain", PropertyValue::Float(0.5));
//! let node = manager
//!     .add_node_with_connections(
//!         &gain,
//!         &[
//!             NewArc::Input { source: input, source_port: 0, dest_port: 0 },
//!             NewArc::Input { source: input, source_port: 1, dest_port: 1 },
//!         ],
//!     )
//!     .unwrap();
//! assert_eq!(manager.graph().connections().len(), 2);
//! assert_eq!(node.identifier(), "gain");
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::description::{
    ArcDescription, GraphDescription, NodeDescription, Position, SUBGRAPH_IDENTIFIER,
};
use crate::events::{EventDispatcher, GraphEvent, ListenerId};
use crate::graph::{Connection, DisconnectFilter, GraphError, GraphProcessor, GraphRenderer, IoConfig};
use crate::midi::MidiChannels;
use crate::node::{GraphNode, NodeError, NodeId, NodeMetadata};
use crate::processor::Processor;
use crate::processors::{IoNodeType, PlaceholderProcessor};
use crate::registry::{FactoryError, ProcessorFactory, ProcessorRegistry};

/// Errors from manager operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Topology edit rejected.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Processor could not be created.
    #[error(transparent)]
    Factory(#[from] FactoryError),
    /// Node setting rejected.
    #[error(transparent)]
    Node(#[from] NodeError),
}

/// An arc to make together with a new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewArc {
    /// An existing node's output feeds the new node's input.
    Input {
        /// Existing node.
        source: NodeId,
        /// Its output port.
        source_port: u32,
        /// New node's input port.
        dest_port: u32,
    },
    /// The new node's output feeds an existing node's input.
    Output {
        /// New node's output port.
        source_port: u32,
        /// Existing node.
        dest: NodeId,
        /// Its input port.
        dest_port: u32,
    },
}

impl NewArc {
    fn resolve(self, new_node: NodeId) -> Connection {
        match self {
            NewArc::Input {
                source,
                source_port,
                dest_port,
            } => Connection::new(source, source_port, new_node, dest_port),
            NewArc::Output {
                source_port,
                dest,
                dest_port,
            } => Connection::new(new_node, source_port, dest, dest_port),
        }
    }
}

/// What happened while loading a description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Nodes in the graph after loading.
    pub nodes: usize,
    /// Live arcs after loading.
    pub arcs: usize,
    /// Arcs kept for retry: both endpoints exist but the arc was rejected.
    pub missing: Vec<ArcDescription>,
    /// Arcs dropped because an endpoint does not exist.
    pub purged: Vec<ArcDescription>,
    /// Nodes standing in for processors the factory could not create.
    pub placeholders: Vec<NodeId>,
    /// IO nodes added or removed to match the host IO.
    pub io_changes: usize,
    /// Non-fatal problems, one line each.
    pub warnings: Vec<String>,
}

impl LoadReport {
    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }
}

/// Processor ready to be inserted into a graph.
enum Built {
    Io(IoNodeType),
    SubGraph(GraphProcessor),
    Processor(Box<dyn Processor>),
}

/// Serializes control-thread edits to one graph.
pub struct GraphManager {
    name: String,
    graph: GraphProcessor,
    factory: Box<dyn ProcessorFactory>,
    events: EventDispatcher,
    missing: Vec<ArcDescription>,
}

impl std::fmt::Debug for GraphManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphManager")
            .field("name", &self.name)
            .field("graph", &self.graph)
            .field("missing", &self.missing.len())
            .finish_non_exhaustive()
    }
}

impl GraphManager {
    /// Manager creating processors through `factory`.
    pub fn new(io: IoConfig, factory: impl ProcessorFactory + 'static) -> Self {
        Self {
            name: String::new(),
            graph: GraphProcessor::new(io),
            factory: Box::new(factory),
            events: EventDispatcher::new(),
            missing: Vec::new(),
        }
    }

    /// Manager using the built-in [`ProcessorRegistry`].
    pub fn with_registry(io: IoConfig) -> Self {
        Self::new(io, ProcessorRegistry::new())
    }

    /// Graph name used when describing.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the graph.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Read-only view of the graph.
    pub fn graph(&self) -> &GraphProcessor {
        &self.graph
    }

    /// Node by id.
    pub fn node(&self, id: NodeId) -> Option<&Arc<GraphNode>> {
        self.graph.node(id)
    }

    /// Render-thread handle.
    pub fn renderer(&self) -> GraphRenderer {
        self.graph.renderer()
    }

    /// Registers an event listener.
    pub fn subscribe(&mut self, listener: impl FnMut(&GraphEvent) + Send + 'static) -> ListenerId {
        self.events.subscribe(listener)
    }

    /// Removes an event listener.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    /// See [`GraphProcessor::prepare_to_render`].
    pub fn prepare_to_render(&mut self, sample_rate: f64, block_size: usize) {
        self.graph.prepare_to_render(sample_rate, block_size);
    }

    /// See [`GraphProcessor::release_resources`].
    pub fn release_resources(&mut self) {
        self.graph.release_resources();
    }

    /// Arcs waiting for retry.
    pub fn missing_arcs(&self) -> &[ArcDescription] {
        &self.missing
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Runs a batch of edits and publishes the result once.
    ///
    /// If `edit` fails, nodes and arcs are rolled back to where they were
    /// and nothing is published. Node settings changed inside a failed
    /// batch are not rolled back.
    pub fn edit<R, E>(&mut self, edit: impl FnOnce(&mut GraphProcessor) -> Result<R, E>) -> Result<R, E> {
        let checkpoint = self.graph.checkpoint();
        let arcs_before = self.graph.connections().to_vec();
        match edit(&mut self.graph) {
            Ok(value) => {
                self.retry_missing();
                self.graph.rebuild();
                if self.graph.connections() != arcs_before.as_slice() {
                    self.events.dispatch(&GraphEvent::ArcsChanged);
                }
                Ok(value)
            }
            Err(err) => {
                self.graph.restore(checkpoint);
                self.graph.collect_garbage();
                Err(err)
            }
        }
    }

    /// Creates a node from a description.
    pub fn add_node(&mut self, desc: &NodeDescription) -> Result<Arc<GraphNode>, ManagerError> {
        self.add_node_with_connections(desc, &[])
    }

    /// Creates a node and its first arcs as one edit. If any arc is
    /// rejected, the node is not added.
    pub fn add_node_with_connections(&mut self, desc: &NodeDescription, arcs: &[NewArc]) -> Result<Arc<GraphNode>, ManagerError> {
        let mut report = LoadReport::default();
        let built = build(&*self.factory, desc, self.graph.io_config(), &mut report)?;
        let node = self.edit(|graph| -> Result<Arc<GraphNode>, ManagerError> {
            let node = insert(graph, built, desc.id.map(NodeId::new))?;
            apply_settings(&node, desc)?;
            for arc in arcs {
                let conn = arc.resolve(node.id());
                graph.connect(conn.source_node, conn.source_port, conn.dest_node, conn.dest_port)?;
            }
            Ok(node)
        })?;
        self.events.dispatch(&GraphEvent::NodeAdded(node.id()));
        Ok(node)
    }

    /// Adds a host IO node.
    pub fn add_io_node(&mut self, io_type: IoNodeType) -> Result<Arc<GraphNode>, ManagerError> {
        let node = self.edit(|graph| graph.add_io_node_with_id(io_type, None))?;
        self.events.dispatch(&GraphEvent::NodeAdded(node.id()));
        Ok(node)
    }

    /// Removes a node and its arcs.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), ManagerError> {
        if self.graph.node(id).is_none() {
            return Err(GraphError::NodeNotFound(id).into());
        }
        self.events.dispatch(&GraphEvent::WillBeRemoved(id));
        self.edit(|graph| graph.remove_node(id).map(drop))?;
        self.events.dispatch(&GraphEvent::NodeRemoved(id));
        Ok(())
    }

    /// Adds an arc.
    pub fn connect(&mut self, source_node: NodeId, source_port: u32, dest_node: NodeId, dest_port: u32) -> Result<(), ManagerError> {
        self.edit(|graph| graph.connect(source_node, source_port, dest_node, dest_port))?;
        Ok(())
    }

    /// Connects matching audio channels of two nodes as one edit. See
    /// [`GraphProcessor::connect_audio`].
    pub fn connect_audio(&mut self, source: NodeId, dest: NodeId) -> Result<usize, ManagerError> {
        Ok(self.edit(|graph| graph.connect_audio(source, dest))?)
    }

    /// Removes an arc.
    pub fn disconnect(&mut self, conn: &Connection) -> Result<(), ManagerError> {
        self.edit(|graph| graph.disconnect(conn))?;
        Ok(())
    }

    /// Removes arcs touching a node that match `filter`.
    pub fn disconnect_node(&mut self, id: NodeId, filter: DisconnectFilter) -> usize {
        self.edit(|graph| Ok::<_, GraphError>(graph.disconnect_node(id, filter)))
            .unwrap_or_default()
    }

    /// Changes host IO, then adds or removes IO nodes to match.
    pub fn set_io_config(&mut self, io: IoConfig) -> usize {
        let mut report = LoadReport::default();
        self.graph.set_io_config(io);
        let changes = self.enforce_io_nodes(&mut report);
        self.retry_missing();
        self.graph.rebuild();
        changes
    }

    /// Removes every node.
    pub fn clear(&mut self) {
        let ids = self.remove_all_nodes();
        self.graph.rebuild();
        for id in ids {
            self.events.dispatch(&GraphEvent::NodeRemoved(id));
        }
    }

    /// Empties the node table and missing arcs without publishing. The
    /// render thread keeps the last published sequence until the caller
    /// rebuilds. Returns the removed ids.
    fn remove_all_nodes(&mut self) -> Vec<NodeId> {
        let ids: Vec<NodeId> = self.graph.nodes().map(|n| n.id()).collect();
        for &id in &ids {
            self.events.dispatch(&GraphEvent::WillBeRemoved(id));
        }
        self.graph.clear();
        self.missing.clear();
        ids
    }

    /// Retries missing arcs. Arcs whose endpoints are gone are purged.
    /// Returns how many were connected.
    fn retry_missing(&mut self) -> usize {
        let graph = &mut self.graph;
        let mut connected = 0;
        self.missing.retain(|arc| {
            let (source, dest) = (NodeId::new(arc.source_node), NodeId::new(arc.dest_node));
            if graph.node(source).is_none() || graph.node(dest).is_none() {
                tracing::debug!(?arc, "purging missing arc");
                return false;
            }
            match graph.connect(source, arc.source_port, dest, arc.dest_port) {
                Ok(()) => {
                    connected += 1;
                    false
                }
                Err(GraphError::Duplicate(_)) => false,
                Err(_) => true,
            }
        });
        connected
    }

    /// Adds IO nodes the host IO wants and removes those it does not.
    fn enforce_io_nodes(&mut self, report: &mut LoadReport) -> usize {
        let io = self.graph.io_config();
        let mut changes = 0;
        for io_type in IoNodeType::ALL {
            let wanted = match io_type {
                IoNodeType::AudioInput => io.audio_inputs > 0,
                IoNodeType::AudioOutput => io.audio_outputs > 0,
                IoNodeType::MidiInput => io.midi_input,
                IoNodeType::MidiOutput => io.midi_output,
            };
            let existing: Vec<NodeId> = self
                .graph
                .nodes()
                .filter(|n| IoNodeType::of(n.kind()) == Some(io_type))
                .map(|n| n.id())
                .collect();
            if wanted && existing.is_empty() {
                let node = self.graph.add_io_node(io_type);
                node.set_metadata(NodeMetadata {
                    position: default_io_position(io_type),
                    ..NodeMetadata::default()
                });
                self.events.dispatch(&GraphEvent::NodeAdded(node.id()));
                changes += 1;
            } else if !wanted {
                for id in existing {
                    if self.graph.remove_node(id).is_ok() {
                        report.warn(format!("removed {} node {id}: host has no such IO", io_type.identifier()));
                        self.events.dispatch(&GraphEvent::NodeRemoved(id));
                        changes += 1;
                    }
                }
            }
        }
        changes
    }

    // ------------------------------------------------------------------
    // Load and save
    // ------------------------------------------------------------------

    /// Replaces the graph with a description.
    ///
    /// Nothing here is fatal. Unknown processors become placeholders, arcs
    /// that fail between existing nodes are kept as missing, arcs to absent
    /// nodes are purged, and IO nodes are made to match the host IO.
    ///
    /// The old graph keeps rendering until the loaded one is published,
    /// which happens exactly once.
    pub fn load(&mut self, desc: &GraphDescription) -> LoadReport {
        for id in self.remove_all_nodes() {
            self.events.dispatch(&GraphEvent::NodeRemoved(id));
        }
        self.name = desc.name.clone();
        if let Some(io) = desc.io {
            self.graph.set_io_config(io);
        }

        let mut report = LoadReport::default();
        let ids = populate(&mut self.graph, &*self.factory, desc, &mut report);
        self.missing = route(&mut self.graph, desc, &ids, &mut report);
        report.missing = self.missing.clone();
        for node in self.graph.nodes() {
            self.events.dispatch(&GraphEvent::NodeAdded(node.id()));
        }
        report.io_changes = self.enforce_io_nodes(&mut report);
        self.graph.rebuild();
        self.events.dispatch(&GraphEvent::ArcsChanged);

        report.nodes = self.graph.num_nodes();
        report.arcs = self.graph.connections().len();
        tracing::info!(
            name = %self.name,
            nodes = report.nodes,
            arcs = report.arcs,
            missing = report.missing.len(),
            purged = report.purged.len(),
            placeholders = report.placeholders.len(),
            "graph loaded"
        );
        report
    }

    /// Describes the graph, including every node's state, for saving.
    pub fn describe(&self) -> GraphDescription {
        describe_graph(&self.graph, self.name.clone(), &self.missing)
    }

    /// Drains deferred tasks, dispatches their events, and republishes if
    /// needed. Call once per control cycle. Returns the number of events.
    pub fn process_pending(&mut self) -> usize {
        let Self { graph, events, .. } = self;
        let mut count = 0;
        let needs_rebuild = graph.process_pending(&mut |event| {
            count += 1;
            events.dispatch(event);
        });
        if needs_rebuild || self.graph.is_dirty() {
            self.retry_missing();
            self.graph.rebuild();
        }
        count
    }
}

fn default_io_position(io_type: IoNodeType) -> Position {
    match io_type {
        IoNodeType::AudioInput => Position { x: 0.0, y: 100.0 },
        IoNodeType::MidiInput => Position { x: 0.0, y: 300.0 },
        IoNodeType::AudioOutput => Position { x: 600.0, y: 100.0 },
        IoNodeType::MidiOutput => Position { x: 600.0, y: 300.0 },
    }
}

/// Resolves a description to something insertable.
fn build(
    factory: &dyn ProcessorFactory,
    desc: &NodeDescription,
    io: IoConfig,
    report: &mut LoadReport,
) -> Result<Built, FactoryError> {
    if let Some(io_type) = IoNodeType::from_identifier(&desc.identifier) {
        return Ok(Built::Io(io_type));
    }
    if desc.identifier == SUBGRAPH_IDENTIFIER {
        let inner_desc = desc.graph.as_deref().cloned().unwrap_or_default();
        let mut inner = GraphProcessor::new(inner_desc.io.unwrap_or(io));
        let ids = populate(&mut inner, factory, &inner_desc, report);
        for arc in route(&mut inner, &inner_desc, &ids, report) {
            report.warn(format!("nested graph arc {arc:?} rejected, dropped"));
        }
        inner.rebuild();
        return Ok(Built::SubGraph(inner));
    }
    factory.create(desc).map(Built::Processor)
}

fn insert(graph: &mut GraphProcessor, built: Built, id: Option<NodeId>) -> Result<Arc<GraphNode>, GraphError> {
    match built {
        Built::Io(io_type) => graph.add_io_node_with_id(io_type, id),
        Built::SubGraph(inner) => graph.add_sub_graph(inner, id),
        Built::Processor(processor) => match id {
            Some(id) => graph.add_node_with_id(processor, id),
            None => Ok(graph.add_node(processor)),
        },
    }
}

/// Copies a description's node-level settings onto a node.
fn apply_settings(node: &GraphNode, desc: &NodeDescription) -> Result<(), NodeError> {
    if !desc.name.is_empty() {
        node.set_name(desc.name.clone());
    }
    if !desc.state.is_empty() {
        node.set_state(&desc.state)?;
    }
    node.set_midi_programs_state(&desc.midi_programs)?;
    node.set_midi_programs_enabled(desc.midi_programs_enabled);
    if desc.midi_program >= 0 {
        node.set_midi_program(desc.midi_program)?;
    }
    node.set_key_range(i32::from(desc.key_low), i32::from(desc.key_high))?;
    node.set_transpose(desc.transpose)?;
    node.set_midi_channels(MidiChannels::from_bits(desc.midi_channels));
    if desc.latency > 0 {
        node.set_latency_samples(desc.latency as usize);
    }
    node.set_oversampling_factor(desc.oversampling as usize)?;

    node.set_gain(desc.gain);
    node.set_input_gain(desc.input_gain);
    node.update_gain();
    node.set_mute_input(desc.mute_input);
    node.set_bypassed(desc.bypassed);
    node.set_muted(desc.muted);
    node.set_enabled(desc.enabled);
    node.set_metadata(NodeMetadata {
        position: desc.position,
        properties: desc.properties.clone(),
    });
    Ok(())
}

/// Creates every described node. Returns described id to actual id for
/// nodes that carry an id.
fn populate(
    graph: &mut GraphProcessor,
    factory: &dyn ProcessorFactory,
    desc: &GraphDescription,
    report: &mut LoadReport,
) -> HashMap<u32, NodeId> {
    let mut ids = HashMap::new();
    for node_desc in &desc.nodes {
        let requested = node_desc.id.map(NodeId::new).filter(|id| {
            let free = graph.node(*id).is_none();
            if !free {
                report.warn(format!("node id {id} used twice, assigning a fresh id"));
            }
            free
        });

        let (built, placeholder) = match build(factory, node_desc, graph.io_config(), report) {
            Ok(built) => (built, false),
            Err(err) => {
                report.warn(format!("{err}; inserting a placeholder"));
                let stand_in = PlaceholderProcessor::new(
                    node_desc.identifier.clone(),
                    node_desc.name.clone(),
                    node_desc.ports.unwrap_or_default(),
                    node_desc.state.clone(),
                );
                (Built::Processor(Box::new(stand_in)), true)
            }
        };

        let node = match insert(graph, built, requested) {
            Ok(node) => node,
            Err(err) => {
                report.warn(format!("node {:?} '{}' not added: {err}", node_desc.id, node_desc.identifier));
                continue;
            }
        };
        if placeholder {
            report.placeholders.push(node.id());
        }
        if let Err(err) = apply_settings(&node, node_desc) {
            report.warn(format!("node {} '{}': {err}", node.id(), node_desc.identifier));
        }
        if let Some(id) = node_desc.id {
            ids.entry(id).or_insert(node.id());
        }
    }
    ids
}

/// Makes every described arc. Returns the arcs kept as missing.
fn route(
    graph: &mut GraphProcessor,
    desc: &GraphDescription,
    ids: &HashMap<u32, NodeId>,
    report: &mut LoadReport,
) -> Vec<ArcDescription> {
    let mut missing = Vec::new();
    for arc in &desc.arcs {
        let (Some(&source), Some(&dest)) = (ids.get(&arc.source_node), ids.get(&arc.dest_node)) else {
            tracing::debug!(?arc, "purging arc to an absent node");
            report.purged.push(*arc);
            continue;
        };
        match graph.connect(source, arc.source_port, dest, arc.dest_port) {
            Ok(()) | Err(GraphError::Duplicate(_)) => {}
            Err(err) => {
                tracing::debug!(?arc, error = %err, "keeping arc as missing");
                missing.push(ArcDescription {
                    missing: true,
                    ..ArcDescription::new(source.get(), arc.source_port, dest.get(), arc.dest_port)
                });
            }
        }
    }
    missing
}

fn describe_graph(graph: &GraphProcessor, name: String, missing: &[ArcDescription]) -> GraphDescription {
    let nodes = graph.nodes().map(|node| describe_node(node)).collect();
    let arcs = graph
        .connections()
        .iter()
        .map(|c| ArcDescription::new(c.source_node.get(), c.source_port, c.dest_node.get(), c.dest_port))
        .chain(missing.iter().map(|arc| ArcDescription { missing: true, ..*arc }))
        .collect();
    GraphDescription {
        name,
        io: Some(graph.io_config()),
        nodes,
        arcs,
    }
}

fn describe_node(node: &GraphNode) -> NodeDescription {
    let metadata = node.metadata();
    let (key_low, key_high) = node.key_range();
    let midi_programs = node.midi_programs_state().unwrap_or_else(|err| {
        tracing::warn!(node = %node.id(), error = %err, "could not serialize MIDI programs");
        String::new()
    });
    let graph = node.sub_graph().map(|handle| {
        let inner = handle.lock();
        Box::new(describe_graph(&inner, node.name(), &[]))
    });
    let state = if graph.is_some() || node.kind().is_io() {
        Vec::new()
    } else {
        node.state()
    };

    NodeDescription {
        id: Some(node.id().get()),
        identifier: node.identifier().to_owned(),
        name: node.name(),
        enabled: node.is_enabled(),
        bypassed: node.is_bypassed(),
        muted: node.is_muted(),
        mute_input: node.is_muting_inputs(),
        gain: node.gain(),
        input_gain: node.input_gain(),
        oversampling: node.oversampling_factor() as u32,
        latency: if node.has_latency_override() {
            node.user_latency_samples() as u32
        } else {
            0
        },
        key_low,
        key_high,
        transpose: node.transpose(),
        midi_channels: node.midi_channels().bits(),
        midi_program: node.midi_program(),
        midi_programs_enabled: node.midi_programs_enabled(),
        midi_programs,
        state,
        ports: Some(node.port_config()),
        position: metadata.position,
        properties: metadata.properties,
        graph,
    }
}
