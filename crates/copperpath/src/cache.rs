//! Generated toolpaths persisted next to the source layer, so unchanged
//! inputs skip generation on the next run.

use crate::types::Toolpath;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extension appended to the layer file name for its cache.
pub const CACHE_EXTENSION: &str = "tmp";

/// Every parameter that changes the generated toolpaths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolpathsCacheKey {
    pub layer_id: i32,
    pub tool_diameter: i32,
    pub additional_passes: i32,
    pub additional_passes_overlap: i32,
    pub additional_passes_pads_only: bool,
    pub rub_out_initial_offset: i32,
    pub rub_out_overlap: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolpathsCache {
    /// Source modification time (epoch ms) the entries were computed from.
    last_modified: u64,
    entries: BTreeMap<ToolpathsCacheKey, Vec<Toolpath>>,
}

/// On-disk layout; JSON maps need string keys, so entries are a list.
#[derive(Serialize, Deserialize)]
struct CacheFile {
    last_modified: u64,
    entries: Vec<CacheEntry>,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    key: ToolpathsCacheKey,
    toolpaths: Vec<Toolpath>,
}

impl ToolpathsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache from `path`. A missing file yields an empty cache.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = fs::read(path).with_context(|| format!("read toolpath cache {}", path.display()))?;
        let file: CacheFile = serde_json::from_slice(&data).context("deserialize toolpath cache")?;
        Ok(Self {
            last_modified: file.last_modified,
            entries: file.entries.into_iter().map(|e| (e.key, e.toolpaths)).collect(),
        })
    }

    /// The cache for a source last modified at `source_modified`, or an empty
    /// one when the stored data is stale, unreadable or corrupt.
    pub fn load_for_source<P: AsRef<Path>>(path: P, source_modified: Option<u64>) -> Self {
        let path = path.as_ref();
        match Self::load_from_path(path) {
            Ok(cache) if cache.has_valid_data(source_modified) => cache,
            Ok(cache) => {
                if !cache.is_empty() {
                    info!(path = %path.display(), "toolpath cache is stale, ignoring it");
                }
                Self::new()
            }
            Err(err) => {
                info!(path = %path.display(), "ignoring toolpath cache: {err:#}");
                Self::new()
            }
        }
    }

    /// Whether the entries still describe a source modified at
    /// `source_modified`. An unknown modification time never matches.
    pub fn has_valid_data(&self, source_modified: Option<u64>) -> bool {
        source_modified.is_some_and(|modified| modified <= self.last_modified)
    }

    pub fn get(&self, key: &ToolpathsCacheKey) -> Option<&[Toolpath]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn insert(&mut self, key: ToolpathsCacheKey, toolpaths: Vec<Toolpath>) {
        self.entries.insert(key, toolpaths);
    }

    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    pub fn set_last_modified(&mut self, modified: u64) {
        self.last_modified = modified;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the cache to `path`. The data goes to a sibling file first and
    /// is renamed over the target, so readers never see a partial file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create toolpath cache directory {}", parent.display()))?;
        }
        let file = CacheFile {
            last_modified: self.last_modified,
            entries: self
                .entries
                .iter()
                .map(|(key, toolpaths)| CacheEntry {
                    key: *key,
                    toolpaths: toolpaths.clone(),
                })
                .collect(),
        };
        let data = serde_json::to_vec(&file).context("serialize toolpath cache to JSON bytes")?;
        let partial = partial_path(path);
        fs::write(&partial, data).with_context(|| format!("write toolpath cache {}", partial.display()))?;
        fs::rename(&partial, path)
            .with_context(|| format!("replace toolpath cache {}", path.display()))?;
        debug!(path = %path.display(), entries = self.len(), "saved toolpath cache");
        Ok(())
    }
}

/// Cache location for a layer file: the same path with `.tmp` appended.
pub fn cache_path_for<P: AsRef<Path>>(source: P) -> PathBuf {
    let mut name = source.as_ref().as_os_str().to_owned();
    name.push(".");
    name.push(CACHE_EXTENSION);
    PathBuf::from(name)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}
