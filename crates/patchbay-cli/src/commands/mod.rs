//! CLI command implementations.

pub mod common;
pub mod info;
pub mod new;
pub mod processors;
pub mod render;
pub mod validate;
