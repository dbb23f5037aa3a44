//! # Costwise Code Index
//!
//! Content-addressed BM25 retrieval over workspace files, consulted before
//! model dispatch. A high-confidence hit short-circuits execution, so the
//! index sits on the hot path but is strictly best-effort: when its state
//! directory cannot be prepared the index degrades to a no-op and the rest
//! of the router proceeds.
//!
//! Concurrency: the index is built under a write lock and searched under
//! read locks; re-indexing is atomic at the document-path level.

mod bm25;
mod error;
mod stats;
mod tokenize;
mod walker;

pub use bm25::{content_hash, Bm25Index, CodeDocument, SearchResult};
pub use error::{IndexError, Result};
pub use stats::IndexStats;

use globset::GlobSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use walker::{build_exclude_set, DirectoryIndexer};

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexState {
    bm25: Option<Bm25Index>,
    file_hashes: BTreeMap<String, String>,
}

/// Thread-safe handle over the BM25 index with persistence and the
/// degraded no-op mode.
pub struct CodeIndex {
    state: RwLock<IndexState>,
    persist_path: Option<PathBuf>,
    exclude: GlobSet,
    chunk_lines: usize,
    k1: f64,
    b: f64,
    /// Reason the index is disabled, when it is.
    disabled: Option<String>,
    warned: AtomicBool,
}

impl CodeIndex {
    /// Open (or create) the index under `state_dir`. Failure to prepare the
    /// state directory yields a disabled index rather than an error: the
    /// router must keep working without retrieval.
    pub fn open(
        state_dir: &Path,
        exclude_patterns: &[String],
        chunk_lines: usize,
        k1: f64,
        b: f64,
    ) -> Self {
        let exclude = build_exclude_set(exclude_patterns);

        if let Err(e) = std::fs::create_dir_all(state_dir) {
            return Self::disabled(
                format!("state dir {}: {e}", state_dir.display()),
                exclude,
                chunk_lines,
                k1,
                b,
            );
        }

        let persist_path = state_dir.join("code-index.json");
        let state = match load_state(&persist_path) {
            Ok(Some(state)) => state,
            Ok(None) => IndexState::default(),
            Err(e) => {
                log::warn!("Discarding corrupted code index: {e}");
                IndexState::default()
            }
        };

        Self {
            state: RwLock::new(state),
            persist_path: Some(persist_path),
            exclude,
            chunk_lines,
            k1,
            b,
            disabled: None,
            warned: AtomicBool::new(false),
        }
    }

    /// An index that accepts every call and does nothing. Used when runtime
    /// prerequisites for the search backend are absent.
    pub fn disabled(
        reason: String,
        exclude: GlobSet,
        chunk_lines: usize,
        k1: f64,
        b: f64,
    ) -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            persist_path: None,
            exclude,
            chunk_lines,
            k1,
            b,
            disabled: Some(reason),
            warned: AtomicBool::new(false),
        }
    }

    /// In-memory index for tests and ephemeral use.
    pub fn in_memory(k1: f64, b: f64, chunk_lines: usize) -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            persist_path: None,
            exclude: GlobSet::empty(),
            chunk_lines,
            k1,
            b,
            disabled: None,
            warned: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.disabled.is_none()
    }

    /// Log the degraded-mode warning exactly once per process.
    fn warn_disabled(&self) -> bool {
        if let Some(reason) = &self.disabled {
            if !self.warned.swap(true, Ordering::Relaxed) {
                log::warn!("Code index disabled, retrieval is a no-op: {reason}");
            }
            return true;
        }
        false
    }

    /// Add or replace documents keyed by path.
    pub async fn index(&self, documents: Vec<CodeDocument>) -> Result<()> {
        if self.warn_disabled() {
            return Err(IndexError::DependencyUnavailable(
                self.disabled.clone().unwrap_or_default(),
            ));
        }
        let mut state = self.state.write().await;
        self.bm25_mut(&mut state).index(documents);
        self.persist(&state)
    }

    /// Walk a directory tree into the index, honoring exclude patterns and
    /// skipping unchanged files unless `force`.
    pub async fn index_directory(&self, root: &Path, force: bool) -> Result<IndexStats> {
        if self.warn_disabled() {
            return Err(IndexError::DependencyUnavailable(
                self.disabled.clone().unwrap_or_default(),
            ));
        }
        let mut state = self.state.write().await;
        let IndexState { bm25, file_hashes } = &mut *state;
        let index = bm25.get_or_insert_with(|| Bm25Index::new(self.k1, self.b));
        let stats = DirectoryIndexer::new(index, file_hashes, &self.exclude, self.chunk_lines)
            .index_directory(root, force)?;
        self.persist(&state)?;
        Ok(stats)
    }

    /// Ranked retrieval. A disabled index returns no results.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        if self.warn_disabled() {
            return Vec::new();
        }
        let state = self.state.read().await;
        match &state.bm25 {
            Some(index) => index.search(query, limit),
            None => Vec::new(),
        }
    }

    pub async fn document_count(&self) -> usize {
        let state = self.state.read().await;
        state.bm25.as_ref().map_or(0, |i| i.document_count())
    }

    /// Best match plus its cache confidence, for the pre-dispatch lookup.
    pub async fn cache_hit(&self, query: &str) -> Option<(SearchResult, f64)> {
        if self.warn_disabled() {
            return None;
        }
        let state = self.state.read().await;
        state.bm25.as_ref()?.cache_hit(query)
    }

    fn bm25_mut<'a>(&self, state: &'a mut IndexState) -> &'a mut Bm25Index {
        state
            .bm25
            .get_or_insert_with(|| Bm25Index::new(self.k1, self.b))
    }

    fn persist(&self, state: &IndexState) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let json = serde_json::to_string(state)
            .map_err(|e| IndexError::Persist(format!("serialize index: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn load_state(path: &Path) -> Result<Option<IndexState>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let state = serde_json::from_str(&raw)
        .map_err(|e| IndexError::Persist(format!("parse {}: {e}", path.display())))?;
    Ok(Some(state))
}
