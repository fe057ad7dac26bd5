//! Session validation.
//!
//! Loading a graph description never fails: the manager turns bad arcs into
//! missing or purged arcs and unknown processors into placeholders. This
//! module is the strict check run before that, for files a user edited by
//! hand. Every problem is collected, not just the first.
//!
//! # Example
//!
//! ```rust
//! use patchbay_config::{EngineConfig, validate_engine};
//!
//! validate_engine(&EngineConfig::default()).expect("defaults are valid");
//!
//! let bad = EngineConfig { block_size: 3, ..EngineConfig::default() };
//! assert!(validate_engine(&bad).is_err());
//! ```

use std::collections::HashSet;
use std::ops::RangeInclusive;

use patchbay_core::description::GraphDescription;
use patchbay_core::node::MAX_TRANSPOSE;
use patchbay_core::oversample::is_valid_factor;
use thiserror::Error;

use crate::engine::EngineConfig;
use crate::session::SessionFile;

/// Accepted sample rates in Hz.
pub const SAMPLE_RATE_RANGE: RangeInclusive<u32> = 8000..=384_000;

/// Accepted block sizes in frames.
pub const BLOCK_SIZE_RANGE: RangeInclusive<usize> = 16..=8192;

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Sample rate out of range.
    #[error("sample rate {0} Hz outside 8000..=384000")]
    SampleRate(u32),

    /// Block size out of range.
    #[error("block size {0} outside 16..=8192")]
    BlockSize(usize),

    /// Two nodes in the same graph share an id.
    #[error("node id {0} is used more than once")]
    DuplicateNodeId(u32),

    /// An arc names a node the graph does not declare.
    #[error("arc {source_node}:{source_port} -> {dest_node}:{dest_port} references undeclared node {node}")]
    UndeclaredNode {
        /// Arc source node.
        source_node: u32,
        /// Arc source port.
        source_port: u32,
        /// Arc destination node.
        dest_node: u32,
        /// Arc destination port.
        dest_port: u32,
        /// The node that is not declared.
        node: u32,
    },

    /// Oversampling factor is not 1, 2, 4 or 8.
    #[error("node '{node}': oversampling factor {factor} is not 1, 2, 4 or 8")]
    Oversampling {
        /// Node label.
        node: String,
        /// Offending factor.
        factor: u32,
    },

    /// Key range inverted or outside 0..=127.
    #[error("node '{node}': key range {low}..={high} is invalid")]
    KeyRange {
        /// Node label.
        node: String,
        /// Lowest note.
        low: u8,
        /// Highest note.
        high: u8,
    },

    /// Transpose outside -24..=24.
    #[error("node '{node}': transpose {semitones} outside -24..=24")]
    Transpose {
        /// Node label.
        node: String,
        /// Offending value.
        semitones: i32,
    },

    /// Multiple validation errors.
    #[error("multiple validation errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Checks sample rate and block size.
pub fn validate_engine(engine: &EngineConfig) -> ValidationResult<()> {
    let mut errors = Vec::new();
    check_engine(engine, &mut errors);
    collapse(errors)
}

/// Checks a graph description and every nested graph inside it.
pub fn validate_graph(graph: &GraphDescription) -> ValidationResult<()> {
    let mut errors = Vec::new();
    check_graph(graph, &mut errors);
    collapse(errors)
}

/// Checks a whole session.
pub fn validate_session(session: &SessionFile) -> ValidationResult<()> {
    let mut errors = Vec::new();
    check_engine(&session.engine, &mut errors);
    check_graph(&session.graph, &mut errors);
    collapse(errors)
}

fn collapse(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

fn check_engine(engine: &EngineConfig, errors: &mut Vec<ValidationError>) {
    if !SAMPLE_RATE_RANGE.contains(&engine.sample_rate) {
        errors.push(ValidationError::SampleRate(engine.sample_rate));
    }
    if !BLOCK_SIZE_RANGE.contains(&engine.block_size) {
        errors.push(ValidationError::BlockSize(engine.block_size));
    }
}

fn check_graph(graph: &GraphDescription, errors: &mut Vec<ValidationError>) {
    let mut declared = HashSet::new();
    for node in &graph.nodes {
        if let Some(id) = node.id {
            if !declared.insert(id) {
                errors.push(ValidationError::DuplicateNodeId(id));
            }
        }

        let label = match node.id {
            Some(id) => format!("{} #{id}", node.identifier),
            None => node.identifier.clone(),
        };
        if !is_valid_factor(node.oversampling as usize) {
            errors.push(ValidationError::Oversampling {
                node: label.clone(),
                factor: node.oversampling,
            });
        }
        if node.key_low > node.key_high || node.key_high > 127 {
            errors.push(ValidationError::KeyRange {
                node: label.clone(),
                low: node.key_low,
                high: node.key_high,
            });
        }
        if node.transpose.abs() > MAX_TRANSPOSE {
            errors.push(ValidationError::Transpose {
                node: label,
                semitones: node.transpose,
            });
        }

        if let Some(inner) = &node.graph {
            check_graph(inner, errors);
        }
    }

    for arc in &graph.arcs {
        for node in [arc.source_node, arc.dest_node] {
            if !declared.contains(&node) {
                errors.push(ValidationError::UndeclaredNode {
                    source_node: arc.source_node,
                    source_port: arc.source_port,
                    dest_node: arc.dest_node,
                    dest_port: arc.dest_port,
                    node,
                });
            }
        }
    }
}
