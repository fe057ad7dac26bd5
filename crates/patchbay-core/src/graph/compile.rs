//! Render sequence compiler.
//!
//! Three phases, all on the control thread:
//!
//! 1. Kahn's topological sort over the included nodes. Ready nodes are taken
//!    smallest id first, so an unchanged topology always yields the same order.
//! 2. Emission in virtual-buffer space: every lane of every node gets its own
//!    virtual buffer. Before a node renders, each input lane is cleared
//!    (unconnected), copied (one source) or copied then accumulated (several
//!    sources); output-only lanes are cleared.
//! 3. Liveness assignment: virtual buffers are folded onto physical pool slots
//!    whose live ranges do not overlap.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;

use crate::graph::sequence::{BufferRef, LaneSpan, RenderOp, RenderSequence, SequenceParts};
use crate::graph::{Connection, IoConfig};
use crate::node::{GraphNode, NodeId};
use crate::port::{PortConfig, PortList, PortType};

/// Inputs to one compilation.
pub(crate) struct CompileContext<'a> {
    pub nodes: &'a BTreeMap<NodeId, Arc<GraphNode>>,
    pub connections: &'a [Connection],
    pub io: IoConfig,
    pub block_size: usize,
    /// Leave unprepared nodes out of the sequence.
    pub skip_unprepared: bool,
}

/// First-write / last-read step of each virtual buffer.
#[derive(Debug, Default)]
struct Liveness {
    first_write: Vec<usize>,
    last_read: Vec<usize>,
}

impl Liveness {
    fn alloc(&mut self) -> usize {
        self.first_write.push(usize::MAX);
        self.last_read.push(0);
        self.first_write.len() - 1
    }

    fn write(&mut self, vbuf: usize, step: usize) {
        if self.first_write[vbuf] == usize::MAX {
            self.first_write[vbuf] = step;
        }
        self.last_read[vbuf] = self.last_read[vbuf].max(step);
    }

    fn read(&mut self, vbuf: usize, step: usize) {
        self.last_read[vbuf] = self.last_read[vbuf].max(step);
    }

    /// Greedy register allocation. Returns the physical slot of every
    /// virtual buffer and the number of slots.
    fn assign(&self) -> (Vec<usize>, usize) {
        let count = self.first_write.len();
        let mut order: Vec<usize> = (0..count).collect();
        order.sort_by_key(|&v| self.first_write[v]);

        let mut phys_of = vec![0usize; count];
        let mut phys_count = 0usize;
        // (step at which the slot becomes free, slot)
        let mut free_at: Vec<(usize, usize)> = Vec::new();

        for vbuf in order {
            let (fw, lr) = (self.first_write[vbuf], self.last_read[vbuf]);
            if fw == usize::MAX {
                continue;
            }
            let phys = match free_at.iter().position(|&(free, _)| free <= fw) {
                Some(at) => free_at.swap_remove(at).1,
                None => {
                    phys_count += 1;
                    phys_count - 1
                }
            };
            phys_of[vbuf] = phys;
            free_at.push((lr + 1, phys));
        }
        (phys_of, phys_count)
    }
}

/// A connection between two included nodes, by slot.
struct SlotArc<'a> {
    src: usize,
    dst: usize,
    conn: &'a Connection,
}

enum RawOp {
    Clear(BufferRef),
    Copy(BufferRef, BufferRef),
    Accumulate(BufferRef, BufferRef),
    Render {
        node: NodeId,
        slot: usize,
        audio: Vec<usize>,
        midi: Vec<usize>,
    },
}

/// Lane a port occupies in its node's buffers: audio ports map to their
/// channel, control ports follow the audio lanes, MIDI ports map to their
/// MIDI slot.
fn lane_of(ports: &PortList, config: &PortConfig, port: u32) -> Option<BufferRef> {
    let p = ports.get(port)?;
    let channel = p.channel as usize;
    Some(match p.port_type {
        PortType::Audio => BufferRef::Audio(channel),
        PortType::Control => BufferRef::Audio(config.audio_lanes() + channel),
        PortType::Midi => BufferRef::Midi(channel),
    })
}

/// Kahn's algorithm over slots, smallest node id first among ready nodes.
fn topological_order(included: &[&Arc<GraphNode>], arcs: &[SlotArc<'_>]) -> Vec<usize> {
    let n = included.len();
    let mut in_degree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for arc in arcs {
        successors[arc.src].push(arc.dst);
        in_degree[arc.dst] += 1;
    }

    let mut ready: BinaryHeap<Reverse<(NodeId, usize)>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(|i| Reverse((included[i].id(), i)))
        .collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse((_, slot))) = ready.pop() {
        order.push(slot);
        for &next in &successors[slot] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse((included[next].id(), next)));
            }
        }
    }

    if order.len() < n {
        tracing::warn!(
            unsorted = n - order.len(),
            "graph_compile: cycle among nodes, appending them in id order"
        );
        for slot in 0..n {
            if !order.contains(&slot) {
                order.push(slot);
            }
        }
    }
    order
}

/// Compiles the current topology into a sequence.
pub(crate) fn compile(ctx: &CompileContext<'_>) -> RenderSequence {
    let included: Vec<&Arc<GraphNode>> = ctx
        .nodes
        .values()
        .filter(|node| !ctx.skip_unprepared || node.is_prepared())
        .collect();
    let slot_of: HashMap<NodeId, usize> = included
        .iter()
        .enumerate()
        .map(|(slot, node)| (node.id(), slot))
        .collect();

    // Incoming arcs per destination slot, in a stable order.
    let mut arcs: Vec<SlotArc<'_>> = ctx
        .connections
        .iter()
        .filter_map(|conn| {
            let src = *slot_of.get(&conn.source_node)?;
            let dst = *slot_of.get(&conn.dest_node)?;
            Some(SlotArc { src, dst, conn })
        })
        .collect();
    arcs.sort_by_key(|a| (a.dst, a.conn.dest_port, a.conn.source_node, a.conn.source_port));

    let order = topological_order(&included, &arcs);
    let layouts: Vec<Arc<PortList>> = included.iter().map(|node| node.ports()).collect();
    let configs: Vec<PortConfig> = layouts.iter().map(|ports| ports.config()).collect();

    let mut audio_live = Liveness::default();
    let mut midi_live = Liveness::default();
    let mut audio_vbufs: Vec<Vec<usize>> = vec![Vec::new(); included.len()];
    let mut midi_vbufs: Vec<Vec<usize>> = vec![Vec::new(); included.len()];
    let mut raw: Vec<RawOp> = Vec::new();

    for &slot in &order {
        let config = &configs[slot];
        let audio: Vec<usize> = (0..config.total_lanes()).map(|_| audio_live.alloc()).collect();
        let midi: Vec<usize> = (0..config.midi_slots()).map(|_| midi_live.alloc()).collect();
        let audio_lanes = config.audio_lanes();

        // Source vbufs feeding each lane of this node.
        let mut audio_feeds: Vec<Vec<usize>> = vec![Vec::new(); audio.len()];
        let mut midi_feeds: Vec<Vec<usize>> = vec![Vec::new(); midi.len()];
        for arc in arcs.iter().filter(|a| a.dst == slot) {
            let (src_slot, conn) = (arc.src, arc.conn);
            let source = lane_of(&layouts[src_slot], &configs[src_slot], conn.source_port);
            let dest = lane_of(&layouts[slot], config, conn.dest_port);
            match (source, dest) {
                (Some(BufferRef::Audio(s)), Some(BufferRef::Audio(d))) => {
                    if let (Some(&v), Some(feeds)) = (audio_vbufs[src_slot].get(s), audio_feeds.get_mut(d)) {
                        feeds.push(v);
                    }
                }
                (Some(BufferRef::Midi(s)), Some(BufferRef::Midi(d))) => {
                    if let (Some(&v), Some(feeds)) = (midi_vbufs[src_slot].get(s), midi_feeds.get_mut(d)) {
                        feeds.push(v);
                    }
                }
                _ => {}
            }
        }

        for (lane, &dest) in audio.iter().enumerate() {
            let is_input = if lane < audio_lanes {
                lane < config.audio_inputs as usize
            } else {
                lane - audio_lanes < config.control_inputs as usize
            };
            let feeds = if is_input { audio_feeds[lane].as_slice() } else { &[] };
            emit_feeds(&mut raw, &mut audio_live, feeds, dest, BufferRef::Audio);
        }
        for (lane, &dest) in midi.iter().enumerate() {
            let feeds = if lane < config.midi_inputs as usize {
                midi_feeds[lane].as_slice()
            } else {
                &[]
            };
            emit_feeds(&mut raw, &mut midi_live, feeds, dest, BufferRef::Midi);
        }

        let step = raw.len();
        for &v in &audio {
            audio_live.read(v, step);
        }
        for &v in &midi {
            midi_live.read(v, step);
        }
        raw.push(RawOp::Render {
            node: included[slot].id(),
            slot,
            audio: audio.clone(),
            midi: midi.clone(),
        });
        audio_vbufs[slot] = audio;
        midi_vbufs[slot] = midi;
    }

    let (audio_phys, audio_buffers) = audio_live.assign();
    let (midi_phys, midi_buffers) = midi_live.assign();
    let map = |r: BufferRef| match r {
        BufferRef::Audio(v) => BufferRef::Audio(audio_phys[v]),
        BufferRef::Midi(v) => BufferRef::Midi(midi_phys[v]),
    };

    // Sequence node list is indexed by execution slot.
    let mut seq_slot = vec![0usize; included.len()];
    let mut nodes = Vec::with_capacity(order.len());
    for &slot in &order {
        seq_slot[slot] = nodes.len();
        nodes.push(Arc::clone(included[slot]));
    }

    let mut audio_table = Vec::new();
    let mut midi_table = Vec::new();
    let ops: Vec<RenderOp> = raw
        .into_iter()
        .map(|op| match op {
            RawOp::Clear(r) => RenderOp::ClearBuffer(map(r)),
            RawOp::Copy(s, d) => RenderOp::CopyBuffer {
                source: map(s),
                dest: map(d),
            },
            RawOp::Accumulate(s, d) => RenderOp::AccumulateBuffer {
                source: map(s),
                dest: map(d),
            },
            RawOp::Render {
                node,
                slot,
                audio,
                midi,
            } => {
                let audio_span = LaneSpan {
                    start: audio_table.len(),
                    len: audio.len(),
                };
                audio_table.extend(audio.iter().map(|&v| audio_phys[v]));
                let midi_span = LaneSpan {
                    start: midi_table.len(),
                    len: midi.len(),
                };
                midi_table.extend(midi.iter().map(|&v| midi_phys[v]));
                RenderOp::RenderNode {
                    node,
                    slot: seq_slot[slot],
                    audio: audio_span,
                    midi: midi_span,
                }
            }
        })
        .collect();

    let latency = total_latency(&included, &order, &arcs);

    tracing::debug!(
        nodes = nodes.len(),
        ops = ops.len(),
        audio_buffers,
        midi_buffers,
        latency,
        "graph_compile"
    );
    for (i, op) in ops.iter().enumerate() {
        tracing::trace!("  op[{i}]: {op}");
    }

    RenderSequence::from_parts(
        SequenceParts {
            ops,
            nodes,
            audio_lanes: audio_table,
            midi_lanes: midi_table,
            audio_buffers,
            midi_buffers,
            latency,
        },
        ctx.io,
        ctx.block_size,
    )
}

fn emit_feeds(
    raw: &mut Vec<RawOp>,
    live: &mut Liveness,
    feeds: &[usize],
    dest: usize,
    wrap: fn(usize) -> BufferRef,
) {
    let step = raw.len();
    match feeds.split_first() {
        None => {
            raw.push(RawOp::Clear(wrap(dest)));
            live.write(dest, step);
        }
        Some((&first, rest)) => {
            raw.push(RawOp::Copy(wrap(first), wrap(dest)));
            live.read(first, step);
            live.write(dest, step);
            for &source in rest {
                let step = raw.len();
                raw.push(RawOp::Accumulate(wrap(source), wrap(dest)));
                live.read(source, step);
                live.write(dest, step);
            }
        }
    }
}

/// Longest-path latency to the audio outputs, or to any sink if the graph
/// has no audio output node.
fn total_latency(included: &[&Arc<GraphNode>], order: &[usize], arcs: &[SlotArc<'_>]) -> usize {
    let mut latency = vec![0usize; included.len()];
    for &slot in order {
        let incoming = arcs
            .iter()
            .filter(|a| a.dst == slot)
            .map(|a| latency[a.src])
            .max()
            .unwrap_or(0);
        latency[slot] = incoming + included[slot].latency_samples();
    }
    let outputs = (0..included.len()).filter(|&s| included[s].is_audio_output_node());
    let at_outputs = outputs.map(|s| latency[s]).max();
    at_outputs.unwrap_or_else(|| latency.iter().copied().max().unwrap_or(0))
}
