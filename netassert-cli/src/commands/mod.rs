//! CLI command implementations.

pub mod list;
pub mod run;

use anyhow::{Context, Result};
use std::path::Path;

use netassert_core::ConfigDocument;

/// Read and parse the test configuration document.
pub async fn load_document(path: &Path) -> Result<ConfigDocument> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read test configuration {}", path.display()))?;
    ConfigDocument::parse(&content)
        .with_context(|| format!("Failed to parse test configuration {}", path.display()))
}
