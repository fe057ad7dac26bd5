//! Control-side graph: node table, arc set, validation, publication.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::compile::{CompileContext, compile};
use super::{Connection, GraphRenderer, GraphShared, IoConfig, RenderSequence, SubGraphHandle};
use crate::events::GraphEvent;
use crate::node::{GraphNode, NodeError, NodeId, NodeKind};
use crate::port::PortType;
use crate::processor::Processor;
use crate::processors::{IoNodeType, IoProcessor, SubGraphProcessor};
use crate::tasks::{NodeTask, TaskQueue};

/// Longest wait for the render thread to let go of a sequence.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Topology errors. Every failing edit leaves the graph unchanged.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// No node with this id.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    /// Requested id is taken.
    #[error("node id {0} is already in use")]
    DuplicateNodeId(NodeId),
    /// Port index does not exist on the node.
    #[error("node {node} has no port {port}")]
    InvalidPort {
        /// Node.
        node: NodeId,
        /// Missing port.
        port: u32,
    },
    /// Source is not an output or destination is not an input.
    #[error("arc {0} must run from an output port to an input port")]
    DirectionMismatch(Connection),
    /// Port types differ.
    #[error("cannot connect {source_type} output to {dest_type} input")]
    TypeMismatch {
        /// Source port type.
        source_type: PortType,
        /// Destination port type.
        dest_type: PortType,
    },
    /// Arc already present.
    #[error("arc {0} already exists")]
    Duplicate(Connection),
    /// Destination already reaches source.
    #[error("arc {0} would create a cycle")]
    WouldCreateCycle(Connection),
    /// Arc not present.
    #[error("arc {0} does not exist")]
    ArcNotFound(Connection),
    /// Node-level failure during an edit.
    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Which arcs [`GraphProcessor::disconnect_node`] removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectFilter {
    /// Arcs ending at the node.
    pub inputs: bool,
    /// Arcs starting at the node.
    pub outputs: bool,
    /// Audio arcs.
    pub audio: bool,
    /// Control arcs.
    pub control: bool,
    /// MIDI arcs.
    pub midi: bool,
}

impl Default for DisconnectFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl DisconnectFilter {
    /// Every arc touching the node.
    pub const fn all() -> Self {
        Self {
            inputs: true,
            outputs: true,
            audio: true,
            control: true,
            midi: true,
        }
    }

    /// Keeps only the given directions.
    pub const fn directions(mut self, inputs: bool, outputs: bool) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }

    /// Keeps only the given port types.
    pub const fn types(mut self, audio: bool, control: bool, midi: bool) -> Self {
        self.audio = audio;
        self.control = control;
        self.midi = midi;
        self
    }

    fn matches_type(&self, port_type: PortType) -> bool {
        match port_type {
            PortType::Audio => self.audio,
            PortType::Control => self.control,
            PortType::Midi => self.midi,
        }
    }
}

/// Snapshot used to undo a failed batch of edits.
pub(crate) struct Checkpoint {
    nodes: BTreeMap<NodeId, Arc<GraphNode>>,
    connections: Vec<Connection>,
}

/// Owns the nodes and arcs of one graph and publishes its render sequence.
///
/// All methods run on the control thread. Edits mark the graph dirty;
/// [`rebuild`](Self::rebuild) compiles and publishes a new sequence.
pub struct GraphProcessor {
    nodes: BTreeMap<NodeId, Arc<GraphNode>>,
    connections: Vec<Connection>,
    shared: Arc<GraphShared>,
    retired: Vec<Arc<RenderSequence>>,
    pending_release: Vec<Arc<GraphNode>>,
    tasks: TaskQueue,
    last_node_id: u32,
    sample_rate: f64,
    block_size: usize,
    prepared: bool,
    dirty: bool,
    rebuilds: u64,
}

impl Default for GraphProcessor {
    fn default() -> Self {
        Self::new(IoConfig::default())
    }
}

impl std::fmt::Debug for GraphProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphProcessor")
            .field("nodes", &self.nodes.len())
            .field("connections", &self.connections.len())
            .field("prepared", &self.prepared)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl GraphProcessor {
    /// Creates an empty, unprepared graph.
    pub fn new(io: IoConfig) -> Self {
        Self {
            nodes: BTreeMap::new(),
            connections: Vec::new(),
            shared: Arc::new(GraphShared::new(io)),
            retired: Vec::new(),
            pending_release: Vec::new(),
            tasks: TaskQueue::default(),
            last_node_id: 0,
            sample_rate: 0.0,
            block_size: 0,
            prepared: false,
            dirty: false,
            rebuilds: 0,
        }
    }

    /// Render-thread handle.
    pub fn renderer(&self) -> GraphRenderer {
        GraphRenderer::new(Arc::clone(&self.shared))
    }

    /// Currently published sequence.
    pub fn sequence(&self) -> Arc<RenderSequence> {
        self.shared.sequence.load_full()
    }

    /// Latency of the published sequence.
    pub fn latency_samples(&self) -> usize {
        self.shared.sequence.load().latency_samples()
    }

    /// Host IO.
    pub fn io_config(&self) -> IoConfig {
        **self.shared.io.load()
    }

    /// Changes host IO. IO nodes rebuild their ports and arcs that no longer
    /// fit are dropped.
    pub fn set_io_config(&mut self, io: IoConfig) {
        if self.io_config() == io {
            return;
        }
        self.shared.io.store(Arc::new(io));
        let io_nodes: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.kind().is_io())
            .map(|n| n.id())
            .collect();
        for id in io_nodes {
            if let Err(err) = self.refresh_ports(id) {
                tracing::warn!(node = %id, error = %err, "io node port refresh failed");
            }
        }
        self.dirty = true;
    }

    /// Sample rate of the last prepare.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Block size of the last prepare.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether [`prepare_to_render`](Self::prepare_to_render) ran and
    /// resources were not released since.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Whether edits are waiting for a rebuild.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Sequences compiled and published by [`rebuild`](Self::rebuild) so far.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Node by id.
    pub fn node(&self, id: NodeId) -> Option<&Arc<GraphNode>> {
        self.nodes.get(&id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<GraphNode>> {
        self.nodes.values()
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// First IO node of a type.
    pub fn io_node(&self, io_type: IoNodeType) -> Option<&Arc<GraphNode>> {
        self.nodes
            .values()
            .find(|n| IoNodeType::of(n.kind()) == Some(io_type))
    }

    /// Adds a node wrapping `processor` under a fresh id.
    pub fn add_node(&mut self, processor: Box<dyn Processor>) -> Arc<GraphNode> {
        self.insert(NodeKind::Processor, processor, None)
            .unwrap_or_else(|_| unreachable!("fresh ids are never taken"))
    }

    /// Adds a node under a specific id, as when restoring a saved graph.
    pub fn add_node_with_id(&mut self, processor: Box<dyn Processor>, id: NodeId) -> Result<Arc<GraphNode>, GraphError> {
        self.insert(NodeKind::Processor, processor, Some(id))
    }

    /// Adds a host IO node under a fresh id.
    pub fn add_io_node(&mut self, io_type: IoNodeType) -> Arc<GraphNode> {
        self.add_io_node_with_id(io_type, None)
            .unwrap_or_else(|_| unreachable!("fresh ids are never taken"))
    }

    /// Adds a host IO node, optionally under a specific id.
    pub fn add_io_node_with_id(&mut self, io_type: IoNodeType, id: Option<NodeId>) -> Result<Arc<GraphNode>, GraphError> {
        let processor = IoProcessor::new(io_type, Arc::clone(&self.shared));
        self.insert(io_type.node_kind(), Box::new(processor), id)
    }

    /// Adds a nested graph as one node, optionally under a specific id.
    pub fn add_sub_graph(&mut self, graph: GraphProcessor, id: Option<NodeId>) -> Result<Arc<GraphNode>, GraphError> {
        let renderer = graph.renderer();
        let handle: SubGraphHandle = Arc::new(Mutex::new(graph));
        let processor = SubGraphProcessor::new(Arc::clone(&handle), renderer);
        self.insert(NodeKind::SubGraph(handle), Box::new(processor), id)
    }

    fn insert(&mut self, kind: NodeKind, processor: Box<dyn Processor>, id: Option<NodeId>) -> Result<Arc<GraphNode>, GraphError> {
        let id = match id {
            Some(id) if self.nodes.contains_key(&id) => return Err(GraphError::DuplicateNodeId(id)),
            Some(id) => {
                self.last_node_id = self.last_node_id.max(id.get());
                id
            }
            None => {
                self.last_node_id += 1;
                NodeId::new(self.last_node_id)
            }
        };

        let node = Arc::new(GraphNode::new(id, kind, processor));
        node.attach(self.tasks.sender());
        if self.prepared {
            if let Err(err) = node.prepare_to_render(self.sample_rate, self.block_size) {
                tracing::warn!(node = %id, error = %err, "node failed to prepare, rendering silence");
            }
        }
        tracing::debug!(node = %id, identifier = node.identifier(), "graph_add_node");
        self.nodes.insert(id, Arc::clone(&node));
        self.dirty = true;
        Ok(node)
    }

    /// Removes a node and every arc touching it.
    ///
    /// The node stays alive until no published sequence references it and
    /// is released by [`collect_garbage`](Self::collect_garbage).
    pub fn remove_node(&mut self, id: NodeId) -> Result<Arc<GraphNode>, GraphError> {
        let node = self.nodes.remove(&id).ok_or(GraphError::NodeNotFound(id))?;
        self.connections.retain(|c| !c.involves(id));
        self.pending_release.push(Arc::clone(&node));
        self.dirty = true;
        tracing::debug!(node = %id, "graph_remove_node");
        Ok(node)
    }

    /// Removes every node and arc.
    pub fn clear(&mut self) {
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            let _ = self.remove_node(id);
        }
    }

    /// Re-queries a node's ports after its processor changed IO, then drops
    /// arcs the new layout cannot carry.
    pub fn refresh_ports(&mut self, id: NodeId) -> Result<bool, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))?;
        let changed = node.reset_ports()?;
        if changed {
            self.remove_illegal_connections();
            self.dirty = true;
        }
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Arcs
    // ------------------------------------------------------------------

    /// Arcs in insertion order.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Whether this exact arc exists.
    pub fn is_connected(&self, conn: &Connection) -> bool {
        self.connections.contains(conn)
    }

    /// Checks an arc without adding it.
    ///
    /// Checks run in a fixed order: ports exist, direction, type,
    /// duplicate, cycle.
    pub fn can_connect(&self, conn: &Connection) -> Result<(), GraphError> {
        let source = self
            .nodes
            .get(&conn.source_node)
            .ok_or(GraphError::NodeNotFound(conn.source_node))?;
        let dest = self
            .nodes
            .get(&conn.dest_node)
            .ok_or(GraphError::NodeNotFound(conn.dest_node))?;
        let source_ports = source.ports();
        let dest_ports = dest.ports();
        let source_port = source_ports.get(conn.source_port).ok_or(GraphError::InvalidPort {
            node: conn.source_node,
            port: conn.source_port,
        })?;
        let dest_port = dest_ports.get(conn.dest_port).ok_or(GraphError::InvalidPort {
            node: conn.dest_node,
            port: conn.dest_port,
        })?;
        if source_port.is_input || !dest_port.is_input {
            return Err(GraphError::DirectionMismatch(*conn));
        }
        if !source_port.port_type.can_connect(dest_port.port_type) {
            return Err(GraphError::TypeMismatch {
                source_type: source_port.port_type,
                dest_type: dest_port.port_type,
            });
        }
        if self.connections.contains(conn) {
            return Err(GraphError::Duplicate(*conn));
        }
        if self.can_reach(conn.dest_node, conn.source_node) {
            return Err(GraphError::WouldCreateCycle(*conn));
        }
        Ok(())
    }

    /// Adds an arc from an output port to an input port.
    pub fn connect(&mut self, source_node: NodeId, source_port: u32, dest_node: NodeId, dest_port: u32) -> Result<(), GraphError> {
        let conn = Connection::new(source_node, source_port, dest_node, dest_port);
        self.can_connect(&conn)?;
        self.connections.push(conn);
        self.dirty = true;
        tracing::debug!(arc = %conn, "graph_connect");
        Ok(())
    }

    /// Connects audio output channel `n` of `source` to audio input channel
    /// `n` of `dest` for every channel both have. Arcs that already exist
    /// are left alone. Either every new arc is added or none is. Returns
    /// how many were added.
    pub fn connect_audio(&mut self, source: NodeId, dest: NodeId) -> Result<usize, GraphError> {
        let source_node = self.nodes.get(&source).ok_or(GraphError::NodeNotFound(source))?;
        let dest_node = self.nodes.get(&dest).ok_or(GraphError::NodeNotFound(dest))?;
        let channels = source_node
            .num_ports(PortType::Audio, false)
            .min(dest_node.num_ports(PortType::Audio, true));

        let mut arcs = Vec::new();
        for channel in 0..channels {
            let (Some(source_port), Some(dest_port)) = (
                source_node.port_for_channel(PortType::Audio, channel, false),
                dest_node.port_for_channel(PortType::Audio, channel, true),
            ) else {
                continue;
            };
            let conn = Connection::new(source, source_port, dest, dest_port);
            if !self.connections.contains(&conn) {
                arcs.push(conn);
            }
        }
        for conn in &arcs {
            self.can_connect(conn)?;
        }
        for conn in &arcs {
            self.connections.push(*conn);
            tracing::debug!(arc = %conn, "graph_connect");
        }
        if !arcs.is_empty() {
            self.dirty = true;
        }
        Ok(arcs.len())
    }

    /// Removes one arc.
    pub fn disconnect(&mut self, conn: &Connection) -> Result<(), GraphError> {
        let at = self
            .connections
            .iter()
            .position(|c| c == conn)
            .ok_or(GraphError::ArcNotFound(*conn))?;
        self.connections.remove(at);
        self.dirty = true;
        tracing::debug!(arc = %conn, "graph_disconnect");
        Ok(())
    }

    /// Removes arcs touching `id` that match the filter. Returns how many
    /// were removed.
    pub fn disconnect_node(&mut self, id: NodeId, filter: DisconnectFilter) -> usize {
        let nodes = &self.nodes;
        let before = self.connections.len();
        self.connections.retain(|c| {
            let direction = (filter.inputs && c.dest_node == id) || (filter.outputs && c.source_node == id);
            if !direction {
                return true;
            }
            let port_type = nodes.get(&c.source_node).and_then(|n| n.port_type(c.source_port));
            !port_type.is_some_and(|t| filter.matches_type(t))
        });
        let removed = before - self.connections.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Drops arcs whose nodes or ports no longer exist or no longer fit.
    /// Returns how many were removed.
    pub fn remove_illegal_connections(&mut self) -> usize {
        let nodes = &self.nodes;
        let before = self.connections.len();
        self.connections.retain(|c| {
            let (Some(source), Some(dest)) = (nodes.get(&c.source_node), nodes.get(&c.dest_node)) else {
                return false;
            };
            let (source_ports, dest_ports) = (source.ports(), dest.ports());
            match (source_ports.get(c.source_port), dest_ports.get(c.dest_port)) {
                (Some(s), Some(d)) => !s.is_input && d.is_input && s.port_type.can_connect(d.port_type),
                _ => false,
            }
        });
        let removed = before - self.connections.len();
        if removed > 0 {
            tracing::debug!(removed, "graph_remove_illegal_connections");
            self.dirty = true;
        }
        removed
    }

    /// Whether a path of arcs leads from `from` to `to`. A node reaches itself.
    pub fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = std::collections::HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            stack.extend(
                self.connections
                    .iter()
                    .filter(|c| c.source_node == current)
                    .map(|c| c.dest_node),
            );
        }
        false
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            nodes: self.nodes.clone(),
            connections: self.connections.clone(),
        }
    }

    /// Puts nodes and arcs back as they were at `checkpoint`. Nodes added
    /// since are queued for release.
    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        for (id, node) in &self.nodes {
            if !checkpoint.nodes.contains_key(id) {
                self.pending_release.push(Arc::clone(node));
            }
        }
        self.nodes = checkpoint.nodes;
        self.connections = checkpoint.connections;
        let nodes = &self.nodes;
        self.pending_release.retain(|n| !nodes.contains_key(&n.id()));
    }

    // ------------------------------------------------------------------
    // Publication and lifecycle
    // ------------------------------------------------------------------

    /// Compiles the current topology and publishes it. The previous
    /// sequence is retired until the render thread lets go of it.
    pub fn rebuild(&mut self) -> Arc<RenderSequence> {
        let sequence = Arc::new(compile(&CompileContext {
            nodes: &self.nodes,
            connections: &self.connections,
            io: self.io_config(),
            block_size: self.block_size,
            skip_unprepared: self.prepared,
        }));
        let old = self.shared.sequence.swap(Arc::clone(&sequence));
        self.retired.push(old);
        self.dirty = false;
        self.rebuilds += 1;
        self.collect_garbage();
        sequence
    }

    /// Rebuilds if an edit is pending. Returns whether it did.
    pub fn rebuild_if_dirty(&mut self) -> bool {
        if self.dirty {
            self.rebuild();
            true
        } else {
            false
        }
    }

    /// Frees retired sequences no block still holds, then releases removed
    /// nodes no sequence references. Returns how many nodes were released.
    pub fn collect_garbage(&mut self) -> usize {
        self.retired.retain(|s| Arc::strong_count(s) > 1);
        let before = self.pending_release.len();
        self.pending_release.retain(|node| {
            if Arc::strong_count(node) == 1 {
                node.release_resources();
                false
            } else {
                true
            }
        });
        before - self.pending_release.len()
    }

    /// Nodes removed but not yet released.
    pub fn pending_release_count(&self) -> usize {
        self.pending_release.len()
    }

    /// Publishes a silent sequence and waits until no block is still
    /// running the previous one.
    fn drain_render_thread(&mut self) {
        let old = self.shared.sequence.swap(Arc::new(RenderSequence::empty()));
        self.retired.push(old);
        let started = Instant::now();
        while self.retired.iter().any(|s| Arc::strong_count(s) > 1) {
            if started.elapsed() > DRAIN_TIMEOUT {
                tracing::warn!("render thread did not release the previous sequence in time");
                break;
            }
            std::thread::sleep(Duration::from_micros(200));
        }
        self.collect_garbage();
    }

    /// Prepares every enabled node for a sample rate and maximum block size,
    /// then publishes a fresh sequence. Nodes that fail to prepare are left
    /// out of the sequence.
    pub fn prepare_to_render(&mut self, sample_rate: f64, block_size: usize) {
        self.drain_render_thread();
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        for node in self.nodes.values() {
            if !node.is_enabled() {
                continue;
            }
            if let Err(err) = node.prepare_to_render(sample_rate, block_size) {
                tracing::warn!(node = %node.id(), error = %err, "node failed to prepare, rendering silence");
            }
        }
        self.prepared = true;
        tracing::info!(sample_rate, block_size, nodes = self.nodes.len(), "graph prepared");
        self.rebuild();
    }

    /// Releases every node. The graph renders silence until prepared again.
    pub fn release_resources(&mut self) {
        self.drain_render_thread();
        for node in self.nodes.values() {
            node.release_resources();
        }
        self.prepared = false;
        self.rebuild();
    }

    /// Drains the deferred task queue, forwarding events to `sink`.
    /// Nested graphs are drained too. Returns whether a rebuild is needed.
    pub fn process_pending(&mut self, sink: &mut dyn FnMut(&GraphEvent)) -> bool {
        let mut needs_rebuild = false;
        for task in self.tasks.drain() {
            match task {
                NodeTask::UpdateEnablement(id) => {
                    let Some(node) = self.nodes.get(&id) else { continue };
                    if node.is_enabled() {
                        if self.prepared {
                            if let Err(err) = node.prepare_to_render(self.sample_rate, self.block_size) {
                                tracing::warn!(node = %id, error = %err, "node failed to prepare");
                                sink(&GraphEvent::PrepareFailed(id));
                            }
                        }
                    } else {
                        node.release_resources();
                    }
                    needs_rebuild = true;
                    sink(&GraphEvent::EnablementChanged(id));
                }
                NodeTask::LoadMidiProgram(id) => {
                    let Some(node) = self.nodes.get(&id) else { continue };
                    match node.load_pending_midi_program() {
                        Ok(true) => sink(&GraphEvent::MidiProgramChanged(id)),
                        Ok(false) => {}
                        Err(err) => {
                            let program = node.midi_program();
                            tracing::warn!(node = %id, program, error = %err, "MIDI program load failed");
                            sink(&GraphEvent::MidiProgramLoadFailed { node: id, program });
                        }
                    }
                }
                NodeTask::Notify(event) => sink(&event),
            }
        }

        for node in self.nodes.values() {
            if let Some(handle) = node.sub_graph() {
                let mut inner = handle.lock();
                if inner.process_pending(sink) || inner.is_dirty() {
                    inner.rebuild();
                }
            }
        }

        if needs_rebuild {
            self.dirty = true;
        }
        self.collect_garbage();
        needs_rebuild
    }

    /// Tasks dropped because the queue was full.
    pub fn dropped_tasks(&self) -> usize {
        self.tasks.dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBuffer;
    use crate::midi::{MidiBuffer, MidiPipe};
    use crate::port::PortConfig;

    /// Minimal mono-capable stage for topology tests.
    struct Gain {
        gain: f32,
        channels: u32,
        latency: usize,
    }

    impl Gain {
        fn boxed(gain: f32) -> Box<Self> {
            Box::new(Self {
                gain,
                channels: 1,
                latency: 0,
            })
        }
    }

    impl Processor for Gain {
        fn name(&self) -> &str {
            "Gain"
        }
        fn identifier(&self) -> &str {
            "test.gain"
        }
        fn port_config(&self) -> PortConfig {
            PortConfig::audio(self.channels, self.channels).with_midi(1, 0)
        }
        fn prepare(&mut self, _sample_rate: f64, _max_block_size: usize) {}
        fn process(&mut self, audio: &mut AudioBuffer, _midi: &mut MidiPipe) {
            for ch in 0..self.channels as usize {
                audio.apply_gain(ch, self.gain);
            }
        }
        fn latency_samples(&self) -> usize {
            self.latency
        }
    }

    fn mono_graph() -> GraphProcessor {
        GraphProcessor::new(IoConfig {
            audio_inputs: 1,
            audio_outputs: 1,
            midi_input: true,
            midi_output: false,
        })
    }

    // Gain ports: 0 audio in, 1 audio out, 2 midi in.

    #[test]
    fn test_connect_validation_order() {
        let mut graph = mono_graph();
        let a = graph.add_node(Gain::boxed(1.0)).id();
        let b = graph.add_node(Gain::boxed(1.0)).id();

        assert!(matches!(graph.connect(a, 9, b, 0), Err(GraphError::InvalidPort { port: 9, .. })));
        assert!(matches!(graph.connect(a, 0, b, 0), Err(GraphError::DirectionMismatch(_))));
        assert!(matches!(graph.connect(a, 1, b, 1), Err(GraphError::DirectionMismatch(_))));
        assert!(matches!(graph.connect(a, 1, b, 2), Err(GraphError::TypeMismatch { .. })));
        graph.connect(a, 1, b, 0).unwrap();
        assert!(matches!(graph.connect(a, 1, b, 0), Err(GraphError::Duplicate(_))));
        assert!(matches!(graph.connect(b, 1, a, 0), Err(GraphError::WouldCreateCycle(_))));
        assert!(matches!(graph.connect(a, 1, a, 0), Err(GraphError::WouldCreateCycle(_))));
        assert!(matches!(
            graph.connect(a, 1, NodeId::new(99), 0),
            Err(GraphError::NodeNotFound(_))
        ));
        assert_eq!(graph.connections().len(), 1);
    }

    #[test]
    fn test_node_ids_never_reused() {
        let mut graph = mono_graph();
        let a = graph.add_node(Gain::boxed(1.0)).id();
        graph.remove_node(a).unwrap();
        let b = graph.add_node(Gain::boxed(1.0)).id();
        assert!(b > a);
        assert!(matches!(
            graph.add_node_with_id(Gain::boxed(1.0), b),
            Err(GraphError::DuplicateNodeId(_))
        ));
        let c = graph.add_node_with_id(Gain::boxed(1.0), NodeId::new(40)).unwrap().id();
        assert_eq!(c, NodeId::new(40));
        assert_eq!(graph.add_node(Gain::boxed(1.0)).id(), NodeId::new(41));
    }

    #[test]
    fn test_linear_chain_buffer_reuse() {
        let mut graph = mono_graph();
        let ids: Vec<NodeId> = (0..20).map(|_| graph.add_node(Gain::boxed(1.0)).id()).collect();
        for pair in ids.windows(2) {
            graph.connect(pair[0], 1, pair[1], 0).unwrap();
        }
        graph.prepare_to_render(48000.0, 32);
        let sequence = graph.sequence();
        assert_eq!(sequence.num_audio_buffers(), 2);
        assert_eq!(sequence.node_order(), ids);
    }

    #[test]
    fn test_fan_in_accumulates() {
        let mut graph = mono_graph();
        let input = graph.add_io_node(IoNodeType::AudioInput).id();
        let a = graph.add_node(Gain::boxed(0.25)).id();
        let b = graph.add_node(Gain::boxed(0.5)).id();
        let output = graph.add_io_node(IoNodeType::AudioOutput).id();
        graph.connect(input, 0, a, 0).unwrap();
        graph.connect(input, 0, b, 0).unwrap();
        graph.connect(a, 1, output, 0).unwrap();
        graph.connect(b, 1, output, 0).unwrap();
        graph.prepare_to_render(48000.0, 16);

        let mut audio = AudioBuffer::from_channels(vec![vec![1.0; 16]]);
        let mut midi = MidiBuffer::new();
        graph.renderer().render(&mut audio, &mut midi);
        assert!(audio.channel(0).iter().all(|s| (s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn test_reprepare_with_larger_block() {
        let mut graph = mono_graph();
        let input = graph.add_io_node(IoNodeType::AudioInput).id();
        let gain = graph.add_node(Gain::boxed(0.5)).id();
        let output = graph.add_io_node(IoNodeType::AudioOutput).id();
        graph.connect(input, 0, gain, 0).unwrap();
        graph.connect(gain, 1, output, 0).unwrap();
        let renderer = graph.renderer();
        let mut midi = MidiBuffer::new();

        graph.prepare_to_render(48000.0, 16);
        let mut audio = AudioBuffer::from_channels(vec![vec![1.0; 16]]);
        renderer.render(&mut audio, &mut midi);
        assert!(audio.channel(0).iter().all(|s| (s - 0.5).abs() < 1e-6));

        graph.prepare_to_render(48000.0, 64);
        let mut audio = AudioBuffer::from_channels(vec![vec![1.0; 64]]);
        renderer.render(&mut audio, &mut midi);
        assert!(audio.channel(0).iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_disconnect_node_filters() {
        let mut graph = mono_graph();
        let midi_in = graph.add_io_node(IoNodeType::MidiInput).id();
        let a = graph.add_node(Gain::boxed(1.0)).id();
        let b = graph.add_node(Gain::boxed(1.0)).id();
        graph.connect(midi_in, 0, a, 2).unwrap();
        graph.connect(a, 1, b, 0).unwrap();

        let removed = graph.disconnect_node(a, DisconnectFilter::all().types(false, false, true));
        assert_eq!(removed, 1);
        assert_eq!(graph.connections(), &[Connection::new(a, 1, b, 0)]);
        let removed = graph.disconnect_node(a, DisconnectFilter::all().directions(true, false));
        assert_eq!(removed, 0);
        assert_eq!(graph.disconnect_node(a, DisconnectFilter::all()), 1);
        assert!(graph.connections().is_empty());
    }

    #[test]
    fn test_connect_audio_matches_channels() {
        let mut graph = mono_graph();
        let stereo = graph
            .add_node(Box::new(Gain {
                gain: 1.0,
                channels: 2,
                latency: 0,
            }))
            .id();
        let mono = graph.add_node(Gain::boxed(1.0)).id();

        assert_eq!(graph.connect_audio(stereo, mono).unwrap(), 1);
        assert_eq!(graph.connections(), &[Connection::new(stereo, 2, mono, 0)]);
        assert_eq!(graph.connect_audio(stereo, mono).unwrap(), 0);
        assert!(matches!(
            graph.connect_audio(mono, stereo),
            Err(GraphError::WouldCreateCycle(_))
        ));
        assert_eq!(graph.connections().len(), 1);
        assert!(matches!(
            graph.connect_audio(mono, NodeId::new(99)),
            Err(GraphError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_disconnect_missing_arc() {
        let mut graph = mono_graph();
        let a = graph.add_node(Gain::boxed(1.0)).id();
        let conn = Connection::new(a, 1, a, 0);
        assert!(matches!(graph.disconnect(&conn), Err(GraphError::ArcNotFound(_))));
    }

    #[test]
    fn test_removed_node_released_after_sequence_dropped() {
        let mut graph = mono_graph();
        let node = graph.add_node(Gain::boxed(1.0));
        graph.prepare_to_render(48000.0, 32);
        let held = graph.sequence();
        graph.remove_node(node.id()).unwrap();
        drop(node);
        graph.rebuild();
        assert_eq!(graph.pending_release_count(), 1);
        drop(held);
        assert_eq!(graph.collect_garbage(), 1);
        assert_eq!(graph.pending_release_count(), 0);
    }

    #[test]
    fn test_latency_longest_path() {
        let mut graph = mono_graph();
        let input = graph.add_io_node(IoNodeType::AudioInput).id();
        let slow = graph.add_node(Box::new(Gain {
            gain: 1.0,
            channels: 1,
            latency: 64,
        }));
        let fast = graph.add_node(Gain::boxed(1.0)).id();
        let output = graph.add_io_node(IoNodeType::AudioOutput).id();
        graph.connect(input, 0, slow.id(), 0).unwrap();
        graph.connect(input, 0, fast, 0).unwrap();
        graph.connect(slow.id(), 1, output, 0).unwrap();
        graph.connect(fast, 1, output, 0).unwrap();
        graph.prepare_to_render(48000.0, 32);
        assert_eq!(graph.latency_samples(), 64);
    }

    #[test]
    fn test_io_change_drops_illegal_arcs() {
        let mut graph = GraphProcessor::new(IoConfig::stereo());
        let input = graph.add_io_node(IoNodeType::AudioInput).id();
        let a = graph.add_node(Gain::boxed(1.0)).id();
        graph.connect(input, 0, a, 0).unwrap();
        graph.connect(input, 1, a, 0).unwrap();
        graph.set_io_config(IoConfig {
            audio_inputs: 1,
            ..IoConfig::stereo()
        });
        assert_eq!(graph.connections(), &[Connection::new(input, 0, a, 0)]);
        assert_eq!(graph.node(input).map(|n| n.num_ports(PortType::Audio, false)), Some(1));
    }

    #[test]
    fn test_enablement_task_releases_and_rebuilds() {
        let mut graph = mono_graph();
        let node = graph.add_node(Gain::boxed(1.0));
        graph.prepare_to_render(48000.0, 32);
        assert!(graph.sequence().contains(node.id()));

        node.set_enabled(false);
        let mut events = Vec::new();
        let needs_rebuild = graph.process_pending(&mut |e| events.push(*e));
        assert!(needs_rebuild);
        assert_eq!(events, vec![GraphEvent::EnablementChanged(node.id())]);
        assert!(!node.is_prepared());
        graph.rebuild();
        assert!(!graph.sequence().contains(node.id()));

        node.set_enabled(true);
        graph.process_pending(&mut |_| {});
        graph.rebuild();
        assert!(node.is_prepared());
        assert!(graph.sequence().contains(node.id()));
    }

    #[test]
    fn test_checkpoint_restore() {
        let mut graph = mono_graph();
        let a = graph.add_node(Gain::boxed(1.0)).id();
        let checkpoint = graph.checkpoint();
        let b = graph.add_node(Gain::boxed(1.0)).id();
        graph.connect(a, 1, b, 0).unwrap();
        graph.restore(checkpoint);
        assert_eq!(graph.num_nodes(), 1);
        assert!(graph.connections().is_empty());
        assert_eq!(graph.pending_release_count(), 1);
    }
}
