//! Show what a session loads into.

use crate::commands::common::load_session;
use clap::Args;
use patchbay_core::{GraphManager, GraphNode, PortType};
use std::path::PathBuf;

/// Display session information.
#[derive(Args)]
pub struct InfoArgs {
    /// Session file (TOML)
    pub session: PathBuf,

    /// List every op of the compiled render sequence
    #[arg(long)]
    pub ops: bool,

    /// Print the loaded graph as JSON instead
    #[arg(long)]
    pub json: bool,
}

/// Run the info command.
pub fn run(args: InfoArgs) -> anyhow::Result<()> {
    let (session, mut manager, report) = load_session(&args.session)?;
    let engine = session.engine;
    manager.prepare_to_render(engine.sample_rate_hz(), engine.block_size);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&manager.describe())?);
        return Ok(());
    }

    println!("Session:     {}", if session.name.is_empty() { "(unnamed)" } else { &session.name });
    println!("Engine:      {} Hz, {} frames per block", engine.sample_rate, engine.block_size);
    println!(
        "Host IO:     {} in / {} out, MIDI in {}, MIDI out {}",
        engine.audio_inputs,
        engine.audio_outputs,
        yes_no(engine.midi_input),
        yes_no(engine.midi_output)
    );
    println!();

    print_nodes(&manager);
    println!();

    let connections = manager.graph().connections();
    println!("Arcs ({}):", connections.len());
    for conn in connections {
        println!("  {conn}");
    }
    if !manager.missing_arcs().is_empty() {
        println!("Missing arcs ({}):", manager.missing_arcs().len());
        for arc in manager.missing_arcs() {
            println!(
                "  {}:{} -> {}:{}",
                arc.source_node, arc.source_port, arc.dest_node, arc.dest_port
            );
        }
    }
    println!();

    let sequence = manager.graph().sequence();
    println!("Render sequence:");
    println!("  Ops:           {}", sequence.ops().len());
    println!("  Audio buffers: {}", sequence.num_audio_buffers());
    println!("  MIDI buffers:  {}", sequence.num_midi_buffers());
    println!("  Latency:       {} samples", sequence.latency_samples());
    let order: Vec<String> = sequence.node_order().iter().map(ToString::to_string).collect();
    println!("  Node order:    {}", order.join(" "));
    if args.ops {
        for (i, op) in sequence.ops().iter().enumerate() {
            println!("  {i:4}  {op}");
        }
    }

    if !report.warnings.is_empty() {
        println!();
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  {warning}");
        }
    }

    Ok(())
}

fn print_nodes(manager: &GraphManager) {
    println!("Nodes ({}):", manager.graph().num_nodes());
    println!(
        "  {:>4}  {:<16} {:<20} {:>9} {:>9} {:>7}  {}",
        "ID", "TYPE", "NAME", "AUDIO", "MIDI", "LATENCY", "FLAGS"
    );
    for node in manager.graph().nodes() {
        println!(
            "  {:>4}  {:<16} {:<20} {:>9} {:>9} {:>7}  {}",
            node.id().to_string(),
            node.identifier(),
            node.name(),
            port_counts(node, PortType::Audio),
            port_counts(node, PortType::Midi),
            node.latency_samples(),
            flags(node)
        );
    }
}

fn port_counts(node: &GraphNode, port_type: PortType) -> String {
    format!(
        "{}/{}",
        node.num_ports(port_type, true),
        node.num_ports(port_type, false)
    )
}

fn flags(node: &GraphNode) -> String {
    let mut flags = Vec::new();
    if !node.is_enabled() {
        flags.push("disabled");
    }
    if node.is_bypassed() {
        flags.push("bypassed");
    }
    if node.is_muted() {
        flags.push("muted");
    }
    if !node.is_prepared() {
        flags.push("unprepared");
    }
    if node.oversampling_factor() > 1 {
        flags.push("oversampled");
    }
    flags.join(",")
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
