//! Protocol messages for node communication
//!
//! Uses a simple length-prefixed JSON protocol:
//! - 4 bytes (little-endian u32): message length
//! - N bytes: JSON-encoded message

use crate::model::RawFileMatches;
use crate::routing::{Repository, RepositoryId};
use crate::update::RefDelta;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Request from the search core to a node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Execute a search against the repositories this node serves
    Search {
        /// The search term, literal or regex
        term: String,
        /// Whether `term` is a regex (validated upstream)
        regex: bool,
        /// Candidate repositories; empty means "use namespace_prefix"
        repository_ids: Vec<RepositoryId>,
        /// Restrict to project paths under this namespace prefix
        #[serde(default)]
        namespace_prefix: Option<String>,
        /// Wall-clock budget the node should honor while scanning
        timeout_ms: u64,
    },

    /// Push a repository delta (or full reindex) into this node's index
    Update {
        repository: Repository,
        delta: RefDelta,
        /// Replace the repository's whole document set with the delta
        force: bool,
    },

    /// Check node health and get stats
    Status,

    /// Graceful shutdown request
    Shutdown,

    /// Ping for connection testing
    Ping,
}

/// Response from a node to the search core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Raw per-file search results
    Search(SearchResponse),

    /// Update applied (or rejected)
    Updated { success: bool, message: String },

    /// Node status
    Status(StatusResponse),

    /// Shutdown acknowledged
    ShuttingDown,

    /// Pong response
    Pong,

    /// Error response
    Error { message: String },
}

/// Raw search results for one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Per-file match lists, uncapped; the caller aggregates and truncates
    pub files: Vec<RawFileMatches>,
    /// Time taken in milliseconds
    pub duration_ms: f64,
    /// Whether results came from the node's query cache
    pub cached: bool,
    /// The scan hit its wall-clock budget and results are partial
    pub timed_out: bool,
}

/// Node status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Node uptime in seconds
    pub uptime_secs: u64,
    /// Number of repositories indexed on this node
    pub repositories_indexed: usize,
    /// Total documents across all repositories
    pub documents_indexed: usize,
    /// Total queries served
    pub queries_served: u64,
    /// Total updates applied
    pub updates_applied: u64,
    /// Cache hit rate (0.0 - 1.0)
    pub cache_hit_rate: f32,
}

/// Maximum accepted message size. The raw-match payload is the guard against
/// unbounded allocations; per-file truncation happens caller-side.
const MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

/// Write a message to a stream with length prefix
pub fn write_message<W: Write>(writer: &mut W, msg: &impl Serialize) -> std::io::Result<()> {
    let json = serde_json::to_vec(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let len = json.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&json)?;
    writer.flush()?;

    Ok(())
}

/// Read a message from a stream with length prefix
pub fn read_message<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> std::io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Message too large",
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;

    serde_json::from_slice(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawMatch;
    use crate::update::Document;
    use std::io::Cursor;

    #[test]
    fn test_roundtrip_search_request() {
        let req = Request::Search {
            term: "fn main".to_string(),
            regex: false,
            repository_ids: vec![RepositoryId(1), RepositoryId(7)],
            namespace_prefix: None,
            timeout_ms: 30_000,
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &req).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Request = read_message(&mut cursor).unwrap();

        match decoded {
            Request::Search {
                term,
                regex,
                repository_ids,
                namespace_prefix,
                timeout_ms,
            } => {
                assert_eq!(term, "fn main");
                assert!(!regex);
                assert_eq!(repository_ids, vec![RepositoryId(1), RepositoryId(7)]);
                assert_eq!(namespace_prefix, None);
                assert_eq!(timeout_ms, 30_000);
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_roundtrip_update_request() {
        let req = Request::Update {
            repository: Repository {
                id: RepositoryId(3),
                project_path: "acme/app".to_string(),
                default_ref: "main".to_string(),
            },
            delta: RefDelta {
                ref_name: "main".to_string(),
                oid: "abc123".to_string(),
                documents: vec![Document {
                    path: "src/lib.rs".to_string(),
                    content: "pub fn add() {}".to_string(),
                }],
                deleted_paths: vec!["src/old.rs".to_string()],
            },
            force: true,
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &req).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Request = read_message(&mut cursor).unwrap();

        match decoded {
            Request::Update {
                repository,
                delta,
                force,
            } => {
                assert_eq!(repository.id, RepositoryId(3));
                assert_eq!(delta.ref_name, "main");
                assert_eq!(delta.documents.len(), 1);
                assert_eq!(delta.deleted_paths, vec!["src/old.rs".to_string()]);
                assert!(force);
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_roundtrip_search_response() {
        let resp = Response::Search(SearchResponse {
            files: vec![RawFileMatches {
                path: "src/main.rs".to_string(),
                project_path: "acme/app".to_string(),
                ref_name: "main".to_string(),
                matches: vec![RawMatch {
                    line_number: 42,
                    text: "let answer = 42;".to_string(),
                    rich_text: "let <mark>answer</mark> = 42;".to_string(),
                }],
            }],
            duration_ms: 12.5,
            cached: false,
            timed_out: false,
        });

        let mut buf = Vec::new();
        write_message(&mut buf, &resp).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Response = read_message(&mut cursor).unwrap();

        match decoded {
            Response::Search(sr) => {
                assert_eq!(sr.files.len(), 1);
                assert_eq!(sr.files[0].matches[0].line_number, 42);
                assert!(!sr.timed_out);
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_MESSAGE_BYTES as u32 + 1).to_le_bytes());

        let mut cursor = Cursor::new(buf);
        let result: std::io::Result<Request> = read_message(&mut cursor);
        assert!(result.is_err());
    }
}
