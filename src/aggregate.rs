//! Match aggregation and chunking
//!
//! Transforms raw per-file match lists into bounded, presentation-ready
//! chunks. The chunk cap bounds response payload size for files with
//! pathological match density (a common token matched thousands of times);
//! overflow is a silent, counted truncation, never an error. Aggregation is
//! deterministic: identical raw input yields identical chunk output, because
//! results are cached and compared across paginated requests.

use crate::model::{
    Chunk, MatchLine, RawMatch, CHUNK_PROXIMITY_LINES, MAX_CHUNKS_PER_FILE, MAX_LINES_PER_CHUNK,
};
use serde::Deserialize;

/// Chunking bounds, defaulted from the contract constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AggregationLimits {
    /// Maximum chunks kept per file
    #[serde(default = "default_max_chunks")]
    pub max_chunks_per_file: usize,
    /// Maximum line gap between matches sharing a chunk
    #[serde(default = "default_proximity")]
    pub chunk_proximity_lines: u32,
    /// Maximum match lines per chunk
    #[serde(default = "default_max_lines")]
    pub max_lines_per_chunk: usize,
}

fn default_max_chunks() -> usize {
    MAX_CHUNKS_PER_FILE
}

fn default_proximity() -> u32 {
    CHUNK_PROXIMITY_LINES
}

fn default_max_lines() -> usize {
    MAX_LINES_PER_CHUNK
}

impl Default for AggregationLimits {
    fn default() -> Self {
        Self {
            max_chunks_per_file: MAX_CHUNKS_PER_FILE,
            chunk_proximity_lines: CHUNK_PROXIMITY_LINES,
            max_lines_per_chunk: MAX_LINES_PER_CHUNK,
        }
    }
}

/// Aggregated matches for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregated {
    /// Chunks kept after capping, in ascending line order
    pub chunks: Vec<Chunk>,
    /// Matches actually returned (sum of kept chunk sizes)
    pub match_count: u32,
    /// True number of matches found, before capping
    pub match_count_total: u32,
}

/// Group a file's raw matches into bounded chunks.
///
/// Matches are ordered by line number and deduplicated per line before
/// grouping. A match starts a new chunk when the gap to the previous match
/// exceeds the proximity bound or the current chunk is full. Matches beyond
/// the chunk cap are dropped from the output but still counted in
/// `match_count_total`; they are never merged into a kept chunk.
pub fn aggregate(raw: &[RawMatch], limits: &AggregationLimits) -> Aggregated {
    if raw.is_empty() || limits.max_chunks_per_file == 0 {
        return Aggregated {
            chunks: Vec::new(),
            match_count: 0,
            match_count_total: raw.len() as u32,
        };
    }

    let mut ordered: Vec<&RawMatch> = raw.iter().collect();
    ordered.sort_by_key(|m| m.line_number);
    ordered.dedup_by_key(|m| m.line_number);

    let match_count_total = ordered.len() as u32;

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<MatchLine> = Vec::new();
    let mut last_line: Option<u32> = None;
    let mut truncated = false;

    for m in ordered {
        let starts_new_chunk = match last_line {
            Some(last) => {
                m.line_number - last > limits.chunk_proximity_lines
                    || current.len() >= limits.max_lines_per_chunk
            }
            None => false,
        };

        if starts_new_chunk {
            if chunks.len() + 1 == limits.max_chunks_per_file && !current.is_empty() {
                // The chunk we are about to close is the last one allowed.
                flush_chunk(&mut chunks, &mut current);
                truncated = true;
                break;
            }
            flush_chunk(&mut chunks, &mut current);
        }

        current.push(MatchLine {
            line_number: m.line_number,
            text: m.text.clone(),
            rich_text: m.rich_text.clone(),
        });
        last_line = Some(m.line_number);
    }

    if !truncated {
        flush_chunk(&mut chunks, &mut current);
    }

    debug_assert!(chunks.len() <= limits.max_chunks_per_file);

    let match_count: u32 = chunks.iter().map(|c| c.match_count_in_chunk).sum();

    Aggregated {
        chunks,
        match_count,
        match_count_total,
    }
}

fn flush_chunk(chunks: &mut Vec<Chunk>, current: &mut Vec<MatchLine>) {
    if current.is_empty() {
        return;
    }
    let lines = std::mem::take(current);
    chunks.push(Chunk {
        match_count_in_chunk: lines.len() as u32,
        lines,
    });
}
