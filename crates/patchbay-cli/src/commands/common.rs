//! Shared CLI helpers used across multiple commands.

use anyhow::Context;
use patchbay_config::SessionFile;
use patchbay_core::{GraphManager, LoadReport};
use std::path::Path;

/// Read a session file.
pub fn read_session(path: &Path) -> anyhow::Result<SessionFile> {
    SessionFile::load(path).with_context(|| format!("loading session {}", path.display()))
}

/// Read a session and load its graph. Load warnings are logged, not fatal.
pub fn load_session(path: &Path) -> anyhow::Result<(SessionFile, GraphManager, LoadReport)> {
    let session = read_session(path)?;
    let (manager, report) = session
        .build_manager()
        .with_context(|| format!("building graph from {}", path.display()))?;
    if !report.placeholders.is_empty() {
        tracing::warn!(
            count = report.placeholders.len(),
            "some processors are unavailable and render silence"
        );
    }
    Ok((session, manager, report))
}
