//! Processor factory and the built-in registry.
//!
//! The graph never names concrete processor types. Loading a description
//! goes through a [`ProcessorFactory`], which turns a [`NodeDescription`]
//! into a boxed [`Processor`]. [`ProcessorRegistry`] is the built-in factory;
//! hosts with their own plugin formats implement the trait themselves.
//!
//! # Example
//!
//! ```rust
//! use patchbay_core::description::{NodeDescription, PropertyValue};
//! use patchbay_core::registry::{ProcessorCategory, ProcessorFactory, ProcessorRegistry};
//!
//! let registry = ProcessorRegistry::new();
//! for descriptor in registry.descriptors_in_category(ProcessorCategory::Utility) {
//!     println!("{}: {}", descriptor.id, descriptor.description);
//! }
//!
//! let desc = NodeDescription::new("gain").with_property("gain", PropertyValue::Float(0.5));
//! let gain = registry.create(&desc).unwrap();
//! assert_eq!(gain.identifier(), "gain");
//! ```

use crate::description::{NodeDescription, PropertyValue, SUBGRAPH_IDENTIFIER};
use crate::node::MAX_METER_CHANNELS;
use crate::processor::Processor;
use crate::processors::{GainProcessor, IoNodeType, PassthroughProcessor, SineProcessor};

/// Failure to produce a processor from a description.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FactoryError {
    /// No processor type with this identifier.
    #[error("unknown processor '{0}'")]
    UnknownIdentifier(String),
    /// A property is out of range or has the wrong type.
    #[error("{identifier}: invalid property '{name}': {reason}")]
    InvalidProperty {
        /// Processor identifier.
        identifier: String,
        /// Property name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The type is known but cannot be instantiated here.
    #[error("cannot create '{identifier}': {reason}")]
    Instantiation {
        /// Processor identifier.
        identifier: String,
        /// Why.
        reason: String,
    },
}

/// Creates processors from descriptions.
pub trait ProcessorFactory: Send {
    /// Builds a processor for `desc`. Node-level settings (flags, gains,
    /// state) are applied by the caller afterwards.
    fn create(&self, desc: &NodeDescription) -> Result<Box<dyn Processor>, FactoryError>;
}

/// Grouping used by hosts to build menus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorCategory {
    /// Host audio and MIDI IO.
    Io,
    /// Gain stages and routing helpers.
    Utility,
    /// Signal sources.
    Generator,
    /// Nested graphs.
    Graph,
}

impl ProcessorCategory {
    /// Human-readable name.
    pub const fn name(&self) -> &'static str {
        match self {
            ProcessorCategory::Io => "IO",
            ProcessorCategory::Utility => "Utility",
            ProcessorCategory::Generator => "Generator",
            ProcessorCategory::Graph => "Graph",
        }
    }
}

/// Describes a processor type in the registry.
#[derive(Debug, Clone)]
pub struct ProcessorDescriptor {
    /// Unique identifier (lowercase, dotted for IO).
    pub id: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Brief description.
    pub description: &'static str,
    /// Category.
    pub category: ProcessorCategory,
}

/// Constructor from a description.
pub type Constructor = fn(&NodeDescription) -> Result<Box<dyn Processor>, FactoryError>;

struct RegistryEntry {
    descriptor: ProcessorDescriptor,
    /// `None` for types only the graph itself can create.
    constructor: Option<Constructor>,
}

/// Registry of processor types, usable as a [`ProcessorFactory`].
pub struct ProcessorRegistry {
    entries: Vec<RegistryEntry>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.descriptor.id))
            .finish()
    }
}

impl ProcessorRegistry {
    /// Registry with every built-in type.
    pub fn new() -> Self {
        let mut registry = Self {
            entries: Vec::with_capacity(8),
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        for io in IoNodeType::ALL {
            self.entries.push(RegistryEntry {
                descriptor: ProcessorDescriptor {
                    id: io.identifier(),
                    name: io.name(),
                    description: "Host IO node, created by the graph",
                    category: ProcessorCategory::Io,
                },
                constructor: None,
            });
        }
        self.entries.push(RegistryEntry {
            descriptor: ProcessorDescriptor {
                id: SUBGRAPH_IDENTIFIER,
                name: "Graph",
                description: "Nested graph rendered as one node",
                category: ProcessorCategory::Graph,
            },
            constructor: None,
        });

        self.register(
            ProcessorDescriptor {
                id: "gain",
                name: "Gain",
                description: "Constant linear gain on every channel",
                category: ProcessorCategory::Utility,
            },
            |desc| {
                let gain = finite(desc, "gain", 1.0)?;
                let channels = channels(desc, 2)?;
                Ok(Box::new(GainProcessor::new(gain, channels)))
            },
        );

        self.register(
            ProcessorDescriptor {
                id: "passthrough",
                name: "Passthrough",
                description: "Unity audio and MIDI pass-through",
                category: ProcessorCategory::Utility,
            },
            |desc| {
                let channels = channels(desc, 2)?;
                let midi = matches!(desc.properties.get("midi"), Some(PropertyValue::Bool(true)));
                Ok(Box::new(PassthroughProcessor::new(channels, midi)))
            },
        );

        self.register(
            ProcessorDescriptor {
                id: "sine",
                name: "Sine",
                description: "Sine test tone",
                category: ProcessorCategory::Generator,
            },
            |desc| {
                let frequency = finite(desc, "frequency", 440.0)?;
                if frequency <= 0.0 {
                    return Err(invalid(desc, "frequency", "must be positive"));
                }
                let amplitude = finite(desc, "amplitude", 0.5)?;
                let channels = channels(desc, 2)?;
                Ok(Box::new(SineProcessor::new(frequency, amplitude, channels)))
            },
        );
    }

    /// Adds a type. A later registration with the same id shadows the
    /// earlier one.
    pub fn register(&mut self, descriptor: ProcessorDescriptor, constructor: Constructor) {
        self.entries.retain(|e| e.descriptor.id != descriptor.id);
        self.entries.push(RegistryEntry {
            descriptor,
            constructor: Some(constructor),
        });
    }

    /// Every registered type.
    pub fn descriptors(&self) -> impl Iterator<Item = &ProcessorDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    /// Registered types in one category.
    pub fn descriptors_in_category(&self, category: ProcessorCategory) -> impl Iterator<Item = &ProcessorDescriptor> {
        self.descriptors().filter(move |d| d.category == category)
    }

    /// Descriptor by id.
    pub fn descriptor(&self, id: &str) -> Option<&ProcessorDescriptor> {
        self.descriptors().find(|d| d.id == id)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.descriptor(id).is_some()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ProcessorFactory for ProcessorRegistry {
    fn create(&self, desc: &NodeDescription) -> Result<Box<dyn Processor>, FactoryError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.descriptor.id == desc.identifier)
            .ok_or_else(|| FactoryError::UnknownIdentifier(desc.identifier.clone()))?;
        match entry.constructor {
            Some(constructor) => constructor(desc),
            None => Err(FactoryError::Instantiation {
                identifier: desc.identifier.clone(),
                reason: "created by the graph, not the factory".into(),
            }),
        }
    }
}

fn invalid(desc: &NodeDescription, name: &str, reason: &str) -> FactoryError {
    FactoryError::InvalidProperty {
        identifier: desc.identifier.clone(),
        name: name.to_owned(),
        reason: reason.to_owned(),
    }
}

fn finite(desc: &NodeDescription, name: &str, default: f32) -> Result<f32, FactoryError> {
    let value = desc.number(name, f64::from(default)) as f32;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid(desc, name, "must be finite"))
    }
}

fn channels(desc: &NodeDescription, default: u32) -> Result<u32, FactoryError> {
    let value = desc.number("channels", f64::from(default));
    if value.fract() != 0.0 || !(1.0..=MAX_METER_CHANNELS as f64).contains(&value) {
        return Err(invalid(
            desc,
            "channels",
            &format!("must be a whole number in 1..={MAX_METER_CHANNELS}"),
        ));
    }
    Ok(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortConfig;

    #[test]
    fn test_registry_has_builtins() {
        let registry = ProcessorRegistry::new();
        for id in ["gain", "passthrough", "sine", "audio.input", "midi.output", "graph"] {
            assert!(registry.contains(id), "{id} missing");
        }
        assert_eq!(registry.descriptors_in_category(ProcessorCategory::Io).count(), 4);
    }

    #[test]
    fn test_create_reads_properties() {
        let registry = ProcessorRegistry::new();
        let desc = NodeDescription::new("sine")
            .with_property("channels", PropertyValue::Int(1))
            .with_property("frequency", PropertyValue::Float(220.0));
        let sine = registry.create(&desc).unwrap();
        assert_eq!(sine.port_config(), PortConfig::audio(0, 1));

        let thru = NodeDescription::new("passthrough").with_property("midi", PropertyValue::Bool(true));
        let thru = registry.create(&thru).unwrap();
        assert_eq!(thru.port_config().midi_inputs, 1);
    }

    #[test]
    fn test_create_errors() {
        let registry = ProcessorRegistry::new();
        assert!(matches!(
            registry.create(&NodeDescription::new("reverb")),
            Err(FactoryError::UnknownIdentifier(_))
        ));
        assert!(matches!(
            registry.create(&NodeDescription::new("audio.input")),
            Err(FactoryError::Instantiation { .. })
        ));
        let bad = NodeDescription::new("gain").with_property("channels", PropertyValue::Int(0));
        assert!(matches!(
            registry.create(&bad),
            Err(FactoryError::InvalidProperty { .. })
        ));
        let bad = NodeDescription::new("sine").with_property("frequency", PropertyValue::Float(-1.0));
        assert!(registry.create(&bad).is_err());
    }

    #[test]
    fn test_register_shadows() {
        let mut registry = ProcessorRegistry::new();
        let before = registry.len();
        registry.register(
            ProcessorDescriptor {
                id: "gain",
                name: "Half",
                description: "Always half",
                category: ProcessorCategory::Utility,
            },
            |_| Ok(Box::new(GainProcessor::new(0.5, 1))),
        );
        assert_eq!(registry.len(), before);
        assert_eq!(registry.descriptor("gain").map(|d| d.name), Some("Half"));
    }
}
