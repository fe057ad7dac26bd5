//! List the processor types sessions can name.

use clap::Args;
use patchbay_core::registry::{ProcessorCategory, ProcessorRegistry};

/// List built-in processor types.
#[derive(Args)]
pub struct ProcessorsArgs {
    /// Only show one category (io, utility, generator, graph)
    #[arg(long)]
    pub category: Option<String>,
}

const CATEGORIES: [ProcessorCategory; 4] = [
    ProcessorCategory::Io,
    ProcessorCategory::Utility,
    ProcessorCategory::Generator,
    ProcessorCategory::Graph,
];

/// Run the processors command.
pub fn run(args: ProcessorsArgs) -> anyhow::Result<()> {
    let registry = ProcessorRegistry::new();
    let selected: Vec<ProcessorCategory> = match &args.category {
        Some(name) => {
            let category = CATEGORIES
                .into_iter()
                .find(|c| c.name().eq_ignore_ascii_case(name))
                .ok_or_else(|| anyhow::anyhow!("unknown category '{name}'"))?;
            vec![category]
        }
        None => CATEGORIES.to_vec(),
    };

    println!("Available Processors:");
    for category in selected {
        println!();
        println!("{}:", category.name());
        for descriptor in registry.descriptors_in_category(category) {
            println!("  {:<14} {}", descriptor.id, descriptor.description);
        }
    }
    Ok(())
}
