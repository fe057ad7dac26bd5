//! Session files: an engine configuration plus one graph, stored as TOML.

use std::path::Path;

use patchbay_core::{GraphDescription, GraphManager, LoadReport};
use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::error::ConfigError;
use crate::validation::validate_session;

/// A saved session.
///
/// ```toml
/// name = "Live set"
///
/// [engine]
/// sample_rate = 48000
/// block_size = 256
///
/// [[graph.nodes]]
/// id = 1
/// identifier = "audio.input"
///
/// [[graph.nodes]]
/// id = 2
/// identifier = "gain"
/// properties = { gain = 0.5 }
///
/// [[graph.arcs]]
/// source_node = 1
/// source_port = 0
/// dest_node = 2
/// dest_port = 0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    /// Session name.
    #[serde(default)]
    pub name: String,
    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// The graph.
    #[serde(default)]
    pub graph: GraphDescription,
}

impl SessionFile {
    /// Create an empty session.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the engine settings.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set the graph.
    pub fn with_graph(mut self, graph: GraphDescription) -> Self {
        self.graph = graph;
        self
    }

    /// Snapshot a running manager.
    pub fn capture(manager: &GraphManager, engine: EngineConfig) -> Self {
        Self {
            name: manager.name().to_owned(),
            engine,
            graph: manager.describe(),
        }
    }

    /// Load a session from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;
        let session = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), nodes = session.graph.nodes.len(), "session read");
        Ok(session)
    }

    /// Load a session from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the session to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::write(parent, e))?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write(path, e))?;
        Ok(())
    }

    /// Serialize the session to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates the session and loads its graph into a new manager using
    /// the built-in processor registry.
    ///
    /// The engine's IO replaces whatever IO the graph itself records, so IO
    /// nodes are added or removed to match the engine. The manager is not
    /// prepared; call `prepare_to_render` with the engine's rate and block
    /// size before rendering.
    pub fn build_manager(&self) -> Result<(GraphManager, LoadReport), ConfigError> {
        validate_session(self)?;
        let io = self.engine.io();
        let mut graph = self.graph.clone();
        graph.io = Some(io);
        if graph.name.is_empty() {
            graph.name.clone_from(&self.name);
        }

        let mut manager = GraphManager::with_registry(io);
        let report = manager.load(&graph);
        Ok((manager, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchbay_core::description::{ArcDescription, NodeDescription, PropertyValue};

    const SESSION: &str = r#"
name = "Test"

[engine]
block_size = 128
audio_inputs = 1
audio_outputs = 1
midi_input = false
midi_output = false

[[graph.nodes]]
id = 1
identifier = "audio.input"

[[graph.nodes]]
id = 2
identifier = "gain"
properties = { gain = 0.5, channels = 1 }

[[graph.nodes]]
id = 3
identifier = "audio.output"

[[graph.arcs]]
source_node = 1
source_port = 0
dest_node = 2
dest_port = 0

[[graph.arcs]]
source_node = 2
source_port = 1
dest_node = 3
dest_port = 0
"#;

    #[test]
    fn parses_hand_written_session() {
        let session = SessionFile::from_toml(SESSION).unwrap();
        assert_eq!(session.name, "Test");
        assert_eq!(session.engine.sample_rate, 48000);
        assert_eq!(session.engine.block_size, 128);
        assert_eq!(session.graph.nodes.len(), 3);
        assert_eq!(session.graph.arcs[1], ArcDescription::new(2, 1, 3, 0));
        let gain = session.graph.node(2).unwrap();
        assert_eq!(gain.properties.get("gain"), Some(&PropertyValue::Float(0.5)));
        assert_eq!(gain.properties.get("channels"), Some(&PropertyValue::Int(1)));
    }

    #[test]
    fn builds_manager_with_engine_io() {
        let session = SessionFile::from_toml(SESSION).unwrap();
        let (manager, report) = session.build_manager().unwrap();
        assert_eq!(report.nodes, 3);
        assert_eq!(report.arcs, 2);
        assert_eq!(report.io_changes, 0);
        assert_eq!(manager.name(), "Test");
        assert_eq!(manager.graph().io_config(), session.engine.io());
    }

    #[test]
    fn invalid_session_is_rejected() {
        let mut session = SessionFile::from_toml(SESSION).unwrap();
        session.graph.arcs.push(ArcDescription::new(2, 1, 9, 0));
        assert!(matches!(session.build_manager(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn toml_text_round_trips() {
        let session = SessionFile::new("Round").with_graph(GraphDescription {
            nodes: vec![
                NodeDescription::new("sine")
                    .with_id(4)
                    .with_property("frequency", PropertyValue::Float(220.0)),
            ],
            ..GraphDescription::default()
        });
        let text = session.to_toml().unwrap();
        assert_eq!(SessionFile::from_toml(&text).unwrap(), session);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            SessionFile::from_toml("name = ["),
            Err(ConfigError::Parse(_))
        ));
    }
}
