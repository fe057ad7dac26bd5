//! Integration tests for patchbay-core.
//!
//! Drives whole graphs through the public API: build, prepare, render one
//! or more blocks, and check the host buffers. Covers end-to-end gain,
//! mute/bypass composition, cycle rejection, removal of suspended nodes,
//! render determinism, nested graphs, control and MIDI routing, and manager
//! load/save under a concurrently running render thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use patchbay_core::description::{ArcDescription, GraphDescription, NodeDescription, PropertyValue};
use patchbay_core::processors::{GainProcessor, IoNodeType, PassthroughProcessor};
use patchbay_core::{
    AudioBuffer, DisconnectFilter, GraphError, GraphEvent, GraphManager, GraphNode,
    GraphProcessor, IoConfig, MidiBuffer, MidiMessage, MidiPipe, NodeId, PortConfig, PortType,
    Processor,
};

const SAMPLE_RATE: f64 = 48000.0;
const BLOCK: usize = 64;

fn mono() -> IoConfig {
    IoConfig {
        audio_inputs: 1,
        audio_outputs: 1,
        midi_input: true,
        midi_output: true,
    }
}

fn constant(value: f32) -> AudioBuffer {
    AudioBuffer::from_channels(vec![vec![value; BLOCK]])
}

fn render(graph: &GraphProcessor, input: f32) -> AudioBuffer {
    let mut audio = constant(input);
    let mut midi = MidiBuffer::new();
    graph.renderer().render(&mut audio, &mut midi);
    audio
}

fn assert_all(buffer: &AudioBuffer, channel: usize, expected: f32) {
    for (i, &s) in buffer.channel(channel).iter().enumerate() {
        assert!(
            (s - expected).abs() < 1e-6,
            "sample {i}: expected {expected}, got {s}"
        );
    }
}

/// A(audio in) -> B(gain 0.5) -> C(audio out).
struct Chain {
    graph: GraphProcessor,
    b: Arc<GraphNode>,
}

fn chain() -> Chain {
    let mut graph = GraphProcessor::new(mono());
    let a = graph.add_io_node(IoNodeType::AudioInput).id();
    let b = graph.add_node(Box::new(GainProcessor::new(0.5, 1)));
    let c = graph.add_io_node(IoNodeType::AudioOutput).id();
    graph.connect(a, 0, b.id(), 0).unwrap();
    graph.connect(b.id(), 1, c, 0).unwrap();
    graph.prepare_to_render(SAMPLE_RATE, BLOCK);
    Chain { graph, b }
}

// ============================================================================
// End-to-end rendering
// ============================================================================

#[test]
fn constant_input_is_halved() {
    let chain = chain();
    let out = render(&chain.graph, 0.8);
    assert_all(&out, 0, 0.4);
}

#[test]
fn mute_silences_output_regardless_of_bypass() {
    let chain = chain();
    chain.b.set_muted(true);
    assert_all(&render(&chain.graph, 0.8), 0, 0.0);

    chain.b.set_bypassed(true);
    assert_all(&render(&chain.graph, 0.8), 0, 0.0);

    chain.b.set_muted(false);
    assert_all(&render(&chain.graph, 0.8), 0, 0.8);
}

#[test]
fn gain_change_ramps_over_one_block() {
    let chain = chain();
    chain.b.set_gain(0.0);
    assert_eq!(chain.b.gain(), 0.0);
    assert_eq!(chain.b.last_gain(), 1.0);

    let ramp = render(&chain.graph, 1.0);
    let first = ramp.channel(0)[0];
    let last = ramp.channel(0)[BLOCK - 1];
    assert!((first - 0.5).abs() < 1e-6);
    assert!(last < first && last > 0.0);
    assert_eq!(chain.b.last_gain(), 0.0);

    assert_all(&render(&chain.graph, 1.0), 0, 0.0);
}

#[test]
fn suspend_then_remove_leaves_other_paths_alone() {
    let mut graph = GraphProcessor::new(mono());
    let input = graph.add_io_node(IoNodeType::AudioInput).id();
    let keep = graph.add_node(Box::new(GainProcessor::new(0.25, 1))).id();
    let doomed = graph.add_node(Box::new(GainProcessor::new(0.5, 1)));
    let output = graph.add_io_node(IoNodeType::AudioOutput).id();
    for node in [keep, doomed.id()] {
        graph.connect(input, 0, node, 0).unwrap();
        graph.connect(node, 1, output, 0).unwrap();
    }
    graph.prepare_to_render(SAMPLE_RATE, BLOCK);
    assert_all(&render(&graph, 1.0), 0, 0.75);

    doomed.suspend_processing(true);
    assert_all(&render(&graph, 1.0), 0, 0.25);

    let id = doomed.id();
    drop(doomed);
    graph.remove_node(id).unwrap();
    graph.rebuild();
    assert_all(&render(&graph, 1.0), 0, 0.25);
    assert_eq!(graph.pending_release_count(), 0);
}

#[test]
fn rendering_is_deterministic_across_rebuilds() {
    let mut graph = GraphProcessor::new(mono());
    let input = graph.add_io_node(IoNodeType::AudioInput).id();
    let gains: Vec<NodeId> = [0.9, 0.3, 0.6, 0.1]
        .into_iter()
        .map(|g| graph.add_node(Box::new(GainProcessor::new(g, 1))).id())
        .collect();
    let output = graph.add_io_node(IoNodeType::AudioOutput).id();
    graph.connect(input, 0, gains[0], 0).unwrap();
    graph.connect(input, 0, gains[1], 0).unwrap();
    graph.connect(gains[0], 1, gains[2], 0).unwrap();
    graph.connect(gains[1], 1, gains[2], 0).unwrap();
    graph.connect(gains[2], 1, gains[3], 0).unwrap();
    graph.connect(gains[2], 1, output, 0).unwrap();
    graph.connect(gains[3], 1, output, 0).unwrap();
    graph.prepare_to_render(SAMPLE_RATE, BLOCK);

    let first_order = graph.sequence().node_order();
    let first = render(&graph, 0.5);
    graph.rebuild();
    assert_eq!(graph.sequence().node_order(), first_order);
    let second = render(&graph, 0.5);
    assert_eq!(first, second);
    // (0.9 + 0.3) * 0.6 * (1 + 0.1) * 0.5
    assert_all(&first, 0, 0.396);
}

#[test]
fn short_host_block_renders_prefix() {
    let chain = chain();
    let mut audio = AudioBuffer::from_channels(vec![vec![1.0; 16]]);
    let mut midi = MidiBuffer::new();
    chain.graph.renderer().render(&mut audio, &mut midi);
    assert_eq!(audio.num_samples(), 16);
    assert_all(&audio, 0, 0.5);
}

// ============================================================================
// Topology errors
// ============================================================================

#[test]
fn reverse_arc_is_a_cycle() {
    let mut graph = GraphProcessor::new(mono());
    let a = graph.add_node(Box::new(GainProcessor::new(1.0, 1))).id();
    let b = graph.add_node(Box::new(GainProcessor::new(1.0, 1))).id();
    graph.connect(a, 1, b, 0).unwrap();
    let err = graph.connect(b, 1, a, 0).unwrap_err();
    assert!(matches!(err, GraphError::WouldCreateCycle(_)));
    assert_eq!(graph.connections().len(), 1);
}

#[test]
fn audio_to_midi_is_a_type_mismatch() {
    let mut graph = GraphProcessor::new(mono());
    let midi_in = graph.add_io_node(IoNodeType::MidiInput).id();
    let thru = graph.add_node(Box::new(PassthroughProcessor::new(1, true))).id();
    // passthrough ports: 0 audio in, 1 audio out, 2 midi in, 3 midi out
    let err = graph.connect(midi_in, 0, thru, 0).unwrap_err();
    assert!(matches!(
        err,
        GraphError::TypeMismatch {
            source_type: PortType::Midi,
            dest_type: PortType::Audio,
        }
    ));
    assert_eq!(err.to_string(), "cannot connect midi output to audio input");
    assert!(std::error::Error::source(&err).is_none());
    graph.connect(midi_in, 0, thru, 2).unwrap();
}

// ============================================================================
// Control ports
// ============================================================================

/// Writes a constant to its single control output.
struct Level(f32);

impl Processor for Level {
    fn name(&self) -> &str {
        "Level"
    }
    fn identifier(&self) -> &str {
        "test.level"
    }
    fn port_config(&self) -> PortConfig {
        PortConfig::audio(0, 0).with_control(0, 1)
    }
    fn prepare(&mut self, _sample_rate: f64, _max_block_size: usize) {}
    fn process(&mut self, audio: &mut AudioBuffer, _midi: &mut MidiPipe) {
        audio.channel_mut(0).fill(self.0);
    }
}

/// Scales its audio by its control input, sample by sample.
struct Vca;

impl Processor for Vca {
    fn name(&self) -> &str {
        "VCA"
    }
    fn identifier(&self) -> &str {
        "test.vca"
    }
    fn port_config(&self) -> PortConfig {
        PortConfig::audio(1, 1).with_control(1, 0)
    }
    fn prepare(&mut self, _sample_rate: f64, _max_block_size: usize) {}
    fn process(&mut self, audio: &mut AudioBuffer, _midi: &mut MidiPipe) {
        for i in 0..audio.num_samples() {
            let gain = audio.channel(1)[i];
            audio.channel_mut(0)[i] *= gain;
        }
    }
}

#[test]
fn control_output_drives_control_input() {
    let mut graph = GraphProcessor::new(mono());
    let input = graph.add_io_node(IoNodeType::AudioInput).id();
    let level = graph.add_node(Box::new(Level(0.25))).id();
    let vca = graph.add_node(Box::new(Vca)).id();
    let output = graph.add_io_node(IoNodeType::AudioOutput).id();
    // vca ports: 0 audio in, 1 audio out, 2 control in; level port 0 is control out
    let err = graph.connect(level, 0, vca, 0).unwrap_err();
    assert!(matches!(
        err,
        GraphError::TypeMismatch {
            source_type: PortType::Control,
            dest_type: PortType::Audio,
        }
    ));
    graph.connect(input, 0, vca, 0).unwrap();
    graph.connect(level, 0, vca, 2).unwrap();
    graph.connect(vca, 1, output, 0).unwrap();
    graph.prepare_to_render(SAMPLE_RATE, BLOCK);

    assert_all(&render(&graph, 0.8), 0, 0.2);

    graph.disconnect_node(vca, DisconnectFilter::all().types(false, true, false));
    graph.rebuild();
    assert_all(&render(&graph, 0.8), 0, 0.0);
}

// ============================================================================
// MIDI
// ============================================================================

#[test]
fn midi_flows_through_filters_to_host() {
    let mut graph = GraphProcessor::new(mono());
    let midi_in = graph.add_io_node(IoNodeType::MidiInput).id();
    let thru = graph.add_node(Box::new(PassthroughProcessor::new(1, true)));
    let midi_out = graph.add_io_node(IoNodeType::MidiOutput).id();
    graph.connect(midi_in, 0, thru.id(), 2).unwrap();
    graph.connect(thru.id(), 3, midi_out, 0).unwrap();
    thru.set_key_range(60, 72).unwrap();
    thru.set_transpose(-12).unwrap();
    graph.prepare_to_render(SAMPLE_RATE, BLOCK);

    let mut audio = constant(0.0);
    let mut midi = MidiBuffer::new();
    midi.push(MidiMessage::note_on(1, 64, 100, 3));
    midi.push(MidiMessage::note_on(1, 80, 100, 5));
    midi.push(MidiMessage::controller(1, 7, 90, 8));
    graph.renderer().render(&mut audio, &mut midi);

    let events: Vec<(u32, Option<u8>)> = midi.iter().map(|m| (m.time, m.note_number())).collect();
    assert_eq!(events, vec![(3, Some(52)), (8, None)]);
}

// ============================================================================
// Nested graphs
// ============================================================================

#[test]
fn sub_graph_renders_inside_parent() {
    let mut inner = GraphProcessor::new(IoConfig {
        midi_input: false,
        midi_output: false,
        ..mono()
    });
    let i_in = inner.add_io_node(IoNodeType::AudioInput).id();
    let i_gain = inner.add_node(Box::new(GainProcessor::new(0.5, 1))).id();
    let i_out = inner.add_io_node(IoNodeType::AudioOutput).id();
    inner.connect(i_in, 0, i_gain, 0).unwrap();
    inner.connect(i_gain, 1, i_out, 0).unwrap();

    let mut graph = GraphProcessor::new(mono());
    let input = graph.add_io_node(IoNodeType::AudioInput).id();
    let sub = graph.add_sub_graph(inner, None).unwrap();
    let output = graph.add_io_node(IoNodeType::AudioOutput).id();
    assert_eq!(sub.port_config(), PortConfig::audio(1, 1));
    graph.connect(input, 0, sub.id(), 0).unwrap();
    graph.connect(sub.id(), 1, output, 0).unwrap();
    graph.prepare_to_render(SAMPLE_RATE, BLOCK);

    assert_all(&render(&graph, 0.6), 0, 0.3);
    sub.set_gain(2.0);
    render(&graph, 0.6);
    assert_all(&render(&graph, 0.6), 0, 0.6);
}

// ============================================================================
// Manager: load, save, missing arcs
// ============================================================================

fn described_chain() -> GraphDescription {
    GraphDescription {
        name: "chain".into(),
        io: Some(IoConfig {
            midi_input: false,
            midi_output: false,
            ..mono()
        }),
        nodes: vec![
            NodeDescription::new("audio.input").with_id(1),
            NodeDescription::new("gain")
                .with_id(2)
                .with_name("Half")
                .with_property("gain", PropertyValue::Float(0.5))
                .with_property("channels", PropertyValue::Int(1)),
            NodeDescription::new("audio.output").with_id(3),
        ],
        arcs: vec![ArcDescription::new(1, 0, 2, 0), ArcDescription::new(2, 1, 3, 0)],
    }
}

#[test]
fn manager_load_render_describe() {
    let mut manager = GraphManager::with_registry(IoConfig::stereo());
    let report = manager.load(&described_chain());
    assert_eq!(report.nodes, 3);
    assert_eq!(report.arcs, 2);
    assert!(report.placeholders.is_empty());
    assert_eq!(report.io_changes, 0);

    manager.prepare_to_render(SAMPLE_RATE, BLOCK);
    let mut audio = constant(0.8);
    let mut midi = MidiBuffer::new();
    manager.renderer().render(&mut audio, &mut midi);
    assert_all(&audio, 0, 0.4);

    let saved = manager.describe();
    assert_eq!(saved.name, "chain");
    assert_eq!(saved.arcs, described_chain().arcs);
    let gain = saved.node(2).unwrap();
    assert_eq!(gain.name, "Half");
    assert_eq!(gain.state, 0.5f32.to_le_bytes().to_vec());

    let mut again = GraphManager::with_registry(IoConfig::stereo());
    again.load(&saved);
    assert_eq!(again.describe(), saved);
}

#[test]
fn unknown_processor_becomes_placeholder_and_keeps_arcs() {
    let mut desc = described_chain();
    desc.nodes[1] = NodeDescription::new("vendor.fancy")
        .with_id(2)
        .with_ports(PortConfig::audio(1, 1));
    desc.nodes[1].state = vec![9, 9, 9];

    let mut manager = GraphManager::with_registry(IoConfig::stereo());
    let report = manager.load(&desc);
    assert_eq!(report.placeholders, vec![NodeId::new(2)]);
    assert_eq!(report.arcs, 2);

    manager.prepare_to_render(SAMPLE_RATE, BLOCK);
    let mut audio = constant(0.8);
    let mut midi = MidiBuffer::new();
    manager.renderer().render(&mut audio, &mut midi);
    assert_all(&audio, 0, 0.0);

    let saved = manager.describe();
    let node = saved.node(2).unwrap();
    assert_eq!(node.identifier, "vendor.fancy");
    assert_eq!(node.state, vec![9, 9, 9]);
}

#[test]
fn missing_arcs_are_retried_and_purged() {
    let mut desc = described_chain();
    // port 3 does not exist on a mono gain yet; node 9 does not exist at all
    desc.arcs.push(ArcDescription::new(1, 0, 2, 3));
    desc.arcs.push(ArcDescription::new(9, 0, 3, 0));

    let mut manager = GraphManager::with_registry(IoConfig::stereo());
    let report = manager.load(&desc);
    assert_eq!(report.missing.len(), 1);
    assert!(report.missing[0].missing);
    assert_eq!(report.purged, vec![ArcDescription::new(9, 0, 3, 0)]);

    let saved = manager.describe();
    assert!(saved.arcs.iter().any(|a| a.missing && a.dest_port == 3));

    manager.remove_node(NodeId::new(2)).unwrap();
    assert!(manager.missing_arcs().is_empty());
}

#[test]
fn reload_keeps_rendering_old_graph_until_published() {
    let mut manager = GraphManager::with_registry(IoConfig::stereo());
    manager.load(&described_chain());
    manager.prepare_to_render(SAMPLE_RATE, BLOCK);

    let renderer = manager.renderer();
    let heard = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = Arc::clone(&heard);
    manager.subscribe(move |event| {
        if matches!(event, GraphEvent::NodeAdded(_)) {
            let mut audio = constant(0.8);
            let mut midi = MidiBuffer::new();
            renderer.render(&mut audio, &mut midi);
            log.lock().unwrap().push(audio.channel(0)[0]);
        }
    });

    let before = manager.graph().rebuild_count();
    manager.load(&described_chain());
    assert_eq!(manager.graph().rebuild_count(), before + 1);
    let heard = heard.lock().unwrap();
    assert_eq!(heard.len(), 3);
    assert!(heard.iter().all(|s| (s - 0.4).abs() < 1e-6), "{heard:?}");
    drop(heard);

    let mut audio = constant(0.8);
    let mut midi = MidiBuffer::new();
    manager.renderer().render(&mut audio, &mut midi);
    assert_all(&audio, 0, 0.4);
}

#[test]
fn describing_while_rendering_never_drops_blocks() {
    let mut manager = GraphManager::with_registry(IoConfig::stereo());
    manager.load(&described_chain());
    manager.prepare_to_render(SAMPLE_RATE, BLOCK);

    let renderer = manager.renderer();
    let stop = Arc::new(AtomicBool::new(false));
    let done = Arc::clone(&stop);
    let render_thread = std::thread::spawn(move || {
        let (mut blocks, mut silent) = (0usize, 0usize);
        while blocks == 0 || !done.load(Ordering::Acquire) {
            let mut audio = constant(0.8);
            let mut midi = MidiBuffer::new();
            renderer.render(&mut audio, &mut midi);
            if audio.channel(0).iter().any(|&s| s == 0.0) {
                silent += 1;
            }
            blocks += 1;
        }
        (blocks, silent)
    });

    for _ in 0..2000 {
        let saved = manager.describe();
        assert_eq!(saved.nodes.len(), 3);
    }
    stop.store(true, Ordering::Release);
    let (blocks, silent) = render_thread.join().unwrap();
    assert!(blocks > 0);
    assert_eq!(silent, 0, "{silent} of {blocks} blocks were silent");
}
