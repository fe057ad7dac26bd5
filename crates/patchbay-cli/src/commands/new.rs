//! Starter session files.

use anyhow::Context;
use clap::Args;
use patchbay_config::{EngineConfig, SessionFile};
use patchbay_core::description::{ArcDescription, GraphDescription, NodeDescription, PropertyValue};
use std::path::PathBuf;

/// Write a starter session.
#[derive(Args)]
pub struct NewArgs {
    /// Session file to create
    pub path: PathBuf,

    /// Session name
    #[arg(long, default_value = "Untitled")]
    pub name: String,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

/// Run the new command.
pub fn run(args: NewArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.force || !args.path.exists(),
        "{} already exists (use --force to overwrite)",
        args.path.display()
    );

    let session = SessionFile::new(args.name)
        .with_engine(EngineConfig::default())
        .with_graph(starter_graph());
    session
        .save(&args.path)
        .with_context(|| format!("writing {}", args.path.display()))?;
    println!("Wrote {}", args.path.display());
    Ok(())
}

/// Stereo input through a gain stage to the stereo output.
fn starter_graph() -> GraphDescription {
    let mut arcs = Vec::new();
    for ch in 0..2 {
        arcs.push(ArcDescription::new(1, ch, 2, ch));
        arcs.push(ArcDescription::new(2, 2 + ch, 3, ch));
    }
    GraphDescription {
        nodes: vec![
            NodeDescription::new("audio.input").with_id(1),
            NodeDescription::new("gain")
                .with_id(2)
                .with_name("Trim")
                .with_property("gain", PropertyValue::Float(1.0)),
            NodeDescription::new("audio.output").with_id(3),
        ],
        arcs,
        ..GraphDescription::default()
    }
}
