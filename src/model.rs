//! Search result value types
//!
//! These are the wire-stable records handed back to callers. Field names are
//! part of the external contract: serializers downstream depend on the exact
//! snake_case names, so renames here are breaking changes.

use serde::{Deserialize, Serialize};

/// Maximum number of chunks returned per file.
///
/// Matches beyond this cap are dropped from `chunks` but still counted in
/// `match_count_total`. API documentation describes truncation behavior in
/// terms of this constant, so changing the default is a contract change.
pub const MAX_CHUNKS_PER_FILE: usize = 5;

/// Maximum line gap between two matches that still land in the same chunk.
pub const CHUNK_PROXIMITY_LINES: u32 = 2;

/// Maximum number of match lines a single chunk may hold.
pub const MAX_LINES_PER_CHUNK: usize = 20;

/// A single matched line within a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchLine {
    /// 1-based line number within the file
    pub line_number: u32,
    /// Plain line text
    pub text: String,
    /// Line text with the matched span wrapped in `<mark>` tags
    pub rich_text: String,
}

/// An ordered group of nearby match lines within one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Number of match lines in this chunk
    pub match_count_in_chunk: u32,
    /// Match lines in ascending line-number order
    pub lines: Vec<MatchLine>,
}

/// Per-file search result.
///
/// Immutable once constructed; equality is attribute-wise. Invariants held
/// by construction via [`crate::aggregate::aggregate`]:
/// `match_count <= match_count_total` and `match_count` never exceeds the
/// number of lines the chunk cap admits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundBlob {
    /// Path of the file within its repository
    pub path: String,
    /// Bounded, ordered chunks of matches
    pub chunks: Vec<Chunk>,
    /// URL of the file in the hosting web UI
    pub file_url: String,
    /// URL of the file's blame view
    pub blame_url: String,
    /// True number of matches found in the file, before capping
    pub match_count_total: u32,
    /// Number of matches actually returned, bounded by the chunk cap
    pub match_count: u32,
    /// Full path of the owning project
    pub project_path: String,
}

impl FoundBlob {
    /// Whether the chunk cap dropped matches from this result
    pub fn truncated(&self) -> bool {
        self.match_count < self.match_count_total
    }
}

/// A raw match line as produced by a node, before aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMatch {
    pub line_number: u32,
    pub text: String,
    pub rich_text: String,
}

/// All raw matches a node found in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFileMatches {
    /// Path of the file within its repository
    pub path: String,
    /// Full path of the owning project
    pub project_path: String,
    /// Default ref the content was indexed at
    pub ref_name: String,
    /// Matches in the order the node scanned them
    pub matches: Vec<RawMatch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blob() -> FoundBlob {
        FoundBlob {
            path: "src/main.rs".to_string(),
            chunks: vec![Chunk {
                match_count_in_chunk: 2,
                lines: vec![
                    MatchLine {
                        line_number: 3,
                        text: "fn main() {".to_string(),
                        rich_text: "fn <mark>main</mark>() {".to_string(),
                    },
                    MatchLine {
                        line_number: 4,
                        text: "    main_loop();".to_string(),
                        rich_text: "    <mark>main</mark>_loop();".to_string(),
                    },
                ],
            }],
            file_url: "https://git.example.com/acme/app/-/blob/main/src/main.rs".to_string(),
            blame_url: "https://git.example.com/acme/app/-/blame/main/src/main.rs".to_string(),
            match_count_total: 2,
            match_count: 2,
            project_path: "acme/app".to_string(),
        }
    }

    #[test]
    fn test_wire_roundtrip_preserves_all_fields() {
        let blob = sample_blob();
        let json = serde_json::to_string(&blob).unwrap();
        let decoded: FoundBlob = serde_json::from_str(&json).unwrap();
        assert_eq!(blob, decoded);
    }

    #[test]
    fn test_wire_field_names_are_stable() {
        let blob = sample_blob();
        let value = serde_json::to_value(&blob).unwrap();
        let obj = value.as_object().unwrap();

        for field in [
            "path",
            "chunks",
            "file_url",
            "blame_url",
            "match_count_total",
            "match_count",
            "project_path",
        ] {
            assert!(obj.contains_key(field), "missing wire field: {}", field);
        }

        let line = &value["chunks"][0]["lines"][0];
        assert_eq!(line["line_number"], 3);
        assert!(line["text"].is_string());
        assert!(line["rich_text"].is_string());
    }

    #[test]
    fn test_truncated() {
        let mut blob = sample_blob();
        assert!(!blob.truncated());
        blob.match_count_total = 100;
        assert!(blob.truncated());
    }
}
