//! Blocklist persistence
//!
//! The file is a pretty-printed JSON array of pattern strings, in order.

use std::path::Path;

use tracing::info;

use super::Blocklist;
use crate::error::Result;

/// Read patterns from `path`. A missing file is an empty list.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let patterns: Vec<String> = serde_json::from_str(&content)?;
    info!("Loaded {} blocklist patterns from {}", patterns.len(), path.display());
    Ok(patterns)
}

/// Load `path` into a new [`Blocklist`]
pub fn load_blocklist<P: AsRef<Path>>(path: P) -> Result<Blocklist> {
    Ok(Blocklist::with_patterns(load(path)?))
}

/// Write patterns to `path`
pub fn save<P: AsRef<Path>>(path: P, patterns: &[String]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(patterns)?;
    std::fs::write(path, json)?;
    info!("Saved {} blocklist patterns to {}", patterns.len(), path.display());
    Ok(())
}

/// Write the current contents of `list` to `path`
pub fn save_blocklist<P: AsRef<Path>>(path: P, list: &Blocklist) -> Result<()> {
    save(path, &list.patterns())
}
