//! Integration tests for patchbay-cli.
//!
//! Runs the built `patchbay` binary against session files in a temp dir.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

/// Helper to get the path to the `patchbay` binary built by cargo.
fn patchbay_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_patchbay"))
}

fn run(args: &[&str]) -> Output {
    patchbay_bin()
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run patchbay")
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("temp path is utf-8")
}

const SINE_SESSION: &str = r#"
name = "Tone"

[engine]
sample_rate = 8000
block_size = 64
audio_inputs = 0
audio_outputs = 1
midi_input = false
midi_output = false

[[graph.nodes]]
id = 1
identifier = "sine"
properties = { frequency = 1000.0, amplitude = 0.5, channels = 1 }

[[graph.nodes]]
id = 2
identifier = "audio.output"

[[graph.arcs]]
source_node = 1
source_port = 0
dest_node = 2
dest_port = 0
"#;

// ---------------------------------------------------------------------------
// processors / new
// ---------------------------------------------------------------------------

#[test]
fn cli_processors_lists_builtins() {
    let output = run(&["processors"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Available Processors"));
    for id in ["gain", "passthrough", "sine", "audio.input", "graph"] {
        assert!(stdout.contains(id), "missing {id}");
    }
}

#[test]
fn cli_new_writes_valid_session() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("starter.toml");
    assert!(run(&["new", path_str(&path)]).status.success());
    assert!(path.exists());

    let output = run(&["validate", path_str(&path)]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(": ok"));

    // refuses to overwrite without --force
    assert!(!run(&["new", path_str(&path)]).status.success());
}

// ---------------------------------------------------------------------------
// validate / info
// ---------------------------------------------------------------------------

#[test]
fn cli_validate_reports_every_problem() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    let text = SINE_SESSION
        .replace("block_size = 64", "block_size = 3")
        .replace("dest_node = 2", "dest_node = 9");
    std::fs::write(&path, text).unwrap();

    let output = run(&["validate", path_str(&path)]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("block size 3"), "got: {stdout}");
    assert!(stdout.contains("undeclared node 9"), "got: {stdout}");
}

#[test]
fn cli_info_shows_sequence() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.toml");
    std::fs::write(&path, SINE_SESSION).unwrap();

    let output = run(&["info", path_str(&path), "--ops"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Session:     Tone"));
    assert!(stdout.contains("Nodes (2)"));
    assert!(stdout.contains("Render node 1"));
}

// ---------------------------------------------------------------------------
// render
// ---------------------------------------------------------------------------

#[test]
fn cli_render_writes_wav() {
    let dir = TempDir::new().unwrap();
    let session = dir.path().join("tone.toml");
    let wav = dir.path().join("tone.wav");
    std::fs::write(&session, SINE_SESSION).unwrap();

    let output = run(&[
        "render",
        path_str(&session),
        "--output",
        path_str(&wav),
        "--duration",
        "0.1",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let reader = hound::WavReader::open(&wav).unwrap();
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().sample_rate, 8000);
    let samples: Vec<f32> = reader.into_samples::<f32>().map(Result::unwrap).collect();
    assert_eq!(samples.len(), 800);
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.45 && peak <= 0.5 + 1e-4, "peak {peak}");
}

#[test]
fn cli_render_missing_session_fails() {
    let dir = TempDir::new().unwrap();
    let output = run(&[
        "render",
        path_str(&dir.path().join("nope.toml")),
        "--output",
        path_str(&dir.path().join("out.wav")),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("loading session"));
}
