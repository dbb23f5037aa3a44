use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary of one indexing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks: usize,
    pub errors: usize,
    pub elapsed_ms: u64,
    /// Indexed file counts per detected language.
    pub languages: BTreeMap<String, usize>,
}
