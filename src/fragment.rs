//! Fragment and dispatch types shared between the coordinator and its
//! worker pool.

use crate::state::DataType;

/// Attempts a worker makes for one sequence before consulting the extended
/// retry policy.
pub const FRAG_MAX_TRIES: u32 = 10;

/// Additional full rounds of `FRAG_MAX_TRIES` a worker may spend on one
/// sequence before giving up on it.
pub const FRAG_FULL_RETRIES: u32 = 3;

/// Chunk size for output-file writes; only the first chunk of a fragment is
/// subject to sidx stripping.
pub const BUFFER_SIZE: usize = 8192;

/// One fetched chunk of the stream, produced by a worker and consumed
/// exactly once by the coordinator.
#[derive(Debug)]
pub struct Fragment {
    pub seq: i64,
    /// Server-advertised highest live sequence at fetch time, -1 when the
    /// header was absent.
    pub head_seq: i64,
    /// Spill file path when fragments are written to disk first.
    pub file_name: String,
    /// In-memory payload; `None` when spilled to disk or abandoned.
    pub payload: Option<Vec<u8>>,
    /// Set when the worker gave up on this sequence without fetching it.
    pub abandoned: bool,
}

/// Dispatch token, produced by the coordinator and consumed by exactly one
/// worker.
#[derive(Debug, Clone, Copy)]
pub struct SeqRequest {
    pub cur_seq: i64,
    /// Last known server head, -1 before any response has been seen.
    pub max_seq: i64,
}

/// Sent on the progress channel once per successfully written fragment.
#[derive(Debug, Clone, Copy)]
pub struct ProgressInfo {
    pub data_type: DataType,
    pub byte_count: usize,
    pub max_seq: i64,
}

/// Substitute a sequence number into a download URL template.
///
/// Templates normally end in `&sq=%d`; that suffix is handled first so
/// percent-escapes earlier in the URL can never be mistaken for the
/// placeholder. Any other template shape falls back to first-`%d`
/// substitution.
pub fn seq_url(template: &str, seq: i64) -> String {
    if let Some(base) = template.strip_suffix("&sq=%d") {
        return format!("{}&sq={}", base, seq);
    }

    template.replacen("%d", &seq.to_string(), 1)
}

/// Path of the spill file holding one fragment's bytes between worker
/// publication and coordinator write.
pub fn frag_file_path(base_path: &str, seq: i64) -> String {
    format!("{}.frag{}.ts", base_path, seq)
}
