//! Integration tests for patchbay-config.
//!
//! Save and load sessions through real files, then render the loaded graph.

use patchbay_config::{ConfigError, EngineConfig, SessionFile};
use patchbay_core::description::{ArcDescription, GraphDescription, NodeDescription, PropertyValue};
use patchbay_core::{AudioBuffer, GraphManager, MidiBuffer, NodeId};
use tempfile::TempDir;

fn mono_engine() -> EngineConfig {
    EngineConfig {
        block_size: 64,
        audio_inputs: 1,
        audio_outputs: 1,
        midi_input: false,
        midi_output: false,
        ..EngineConfig::default()
    }
}

fn half_gain_graph() -> GraphDescription {
    GraphDescription {
        nodes: vec![
            NodeDescription::new("audio.input").with_id(1),
            NodeDescription::new("gain")
                .with_id(2)
                .with_property("gain", PropertyValue::Float(0.5))
                .with_property("channels", PropertyValue::Int(1)),
            NodeDescription::new("audio.output").with_id(3),
        ],
        arcs: vec![ArcDescription::new(1, 0, 2, 0), ArcDescription::new(2, 1, 3, 0)],
        ..GraphDescription::default()
    }
}

#[test]
fn save_creates_directories_and_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sessions").join("half.toml");

    let session = SessionFile::new("Half")
        .with_engine(mono_engine())
        .with_graph(half_gain_graph());
    session.save(&path).unwrap();
    assert!(path.exists());

    let loaded = SessionFile::load(&path).unwrap();
    assert_eq!(loaded, session);
}

#[test]
fn loaded_session_renders() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("half.toml");
    SessionFile::new("Half")
        .with_engine(mono_engine())
        .with_graph(half_gain_graph())
        .save(&path)
        .unwrap();

    let session = SessionFile::load(&path).unwrap();
    let (mut manager, report) = session.build_manager().unwrap();
    assert!(report.missing.is_empty());
    manager.prepare_to_render(session.engine.sample_rate_hz(), session.engine.block_size);

    let mut audio = AudioBuffer::from_channels(vec![vec![0.6; 64]]);
    let mut midi = MidiBuffer::new();
    manager.renderer().render(&mut audio, &mut midi);
    for &s in audio.channel(0) {
        assert!((s - 0.3).abs() < 1e-6, "got {s}");
    }
}

#[test]
fn capture_keeps_edits() {
    let (mut manager, _) = SessionFile::new("Edit")
        .with_engine(mono_engine())
        .with_graph(half_gain_graph())
        .build_manager()
        .unwrap();
    manager
        .node(NodeId::new(2))
        .unwrap()
        .set_bypassed(true);

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("edit.toml");
    SessionFile::capture(&manager, mono_engine()).save(&path).unwrap();

    let reloaded = SessionFile::load(&path).unwrap();
    assert_eq!(reloaded.name, "Edit");
    assert!(reloaded.graph.node(2).unwrap().bypassed);

    let mut again = GraphManager::with_registry(reloaded.engine.io());
    again.load(&reloaded.graph);
    assert!(again.node(NodeId::new(2)).unwrap().is_bypassed());
}

#[test]
fn engine_io_adds_missing_io_nodes() {
    let mut graph = half_gain_graph();
    graph.nodes.retain(|n| n.identifier != "audio.output");
    graph.arcs.truncate(1);

    let (manager, report) = SessionFile::new("Io")
        .with_engine(EngineConfig {
            midi_input: true,
            ..mono_engine()
        })
        .with_graph(graph)
        .build_manager()
        .unwrap();
    assert_eq!(report.io_changes, 2);
    assert!(manager.graph().nodes().any(|n| n.is_audio_output_node()));
    assert!(manager.graph().nodes().any(|n| n.is_midi_input_node()));
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = TempDir::new().unwrap();
    let err = SessionFile::load(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
