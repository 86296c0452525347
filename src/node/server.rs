//! Node daemon
//!
//! Keeps a shard's repository indexes in memory and serves search and update
//! requests over TCP. Updates take the store's write lock, so concurrent
//! pushes for the same repository serialize on the node with last-write-wins
//! ref state; searches share a read lock and never block each other.

use crate::node::protocol::{
    read_message, write_message, Request, Response, SearchResponse, StatusResponse,
};
use crate::node::store::{ScanScope, ShardStore};
use crate::routing::{Repository, RepositoryId};
use crate::update::RefDelta;
use anyhow::{Context, Result};
use lru::LruCache;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// LRU cache size for search results
const CACHE_SIZE: usize = 128;

/// Connection timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Statistics for the node
struct NodeStats {
    start_time: Instant,
    queries_served: AtomicU64,
    updates_applied: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl NodeStats {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            queries_served: AtomicU64::new(0),
            updates_applied: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    fn cache_hit_rate(&self) -> f32 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f32 / total as f32
        }
    }
}

/// The node daemon
pub struct NodeServer {
    store: RwLock<ShardStore>,
    /// Complete (non-partial) search results keyed by request shape
    query_cache: Mutex<LruCache<String, SearchResponse>>,
    stats: NodeStats,
    shutdown: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl NodeServer {
    /// Create a new node server wrapped in Arc
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store: RwLock::new(ShardStore::new()),
            query_cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_SIZE).unwrap())),
            stats: NodeStats::new(),
            shutdown: AtomicBool::new(false),
            local_addr: Mutex::new(None),
        })
    }

    /// Bind to an address and serve until shutdown (blocking).
    pub fn bind_and_run(self: &Arc<Self>, addr: &str) -> Result<()> {
        let listener =
            TcpListener::bind(addr).with_context(|| format!("Failed to bind to {}", addr))?;
        self.run(listener)
    }

    /// Bind to an ephemeral local port and serve from a background thread.
    /// Returns the bound address, for embedding a node in-process.
    pub fn spawn(self: &Arc<Self>) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind("127.0.0.1:0").context("Failed to bind")?;
        let addr = listener.local_addr()?;

        let server = Arc::clone(self);
        let handle = thread::spawn(move || {
            if let Err(e) = server.run(listener) {
                eprintln!("shqd: server error: {}", e);
            }
        });

        Ok((addr, handle))
    }

    /// Serve connections on the listener (blocking).
    pub fn run(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap() = Some(addr);

        eprintln!("shqd: listening on {}", addr);

        for stream in listener.incoming() {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match stream {
                Ok(stream) => {
                    let _ = stream.set_read_timeout(Some(CONNECTION_TIMEOUT));
                    let _ = stream.set_write_timeout(Some(CONNECTION_TIMEOUT));

                    let server = Arc::clone(self);
                    thread::spawn(move || {
                        if let Err(e) = server.handle_connection(stream) {
                            eprintln!("shqd: connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    eprintln!("shqd: accept error: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Handle a single client connection
    fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let mut reader = std::io::BufReader::new(stream.try_clone()?);
        let mut writer = std::io::BufWriter::new(stream);

        loop {
            let request: Request = match read_message(&mut reader) {
                Ok(req) => req,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Client disconnected
                    break;
                }
                Err(e) => {
                    let resp = Response::Error {
                        message: format!("Invalid request: {}", e),
                    };
                    write_message(&mut writer, &resp)?;
                    continue;
                }
            };

            let response = self.handle_request(request);
            let shutting_down = matches!(response, Response::ShuttingDown);

            write_message(&mut writer, &response)?;

            if shutting_down {
                self.nudge_acceptor();
                break;
            }
        }

        Ok(())
    }

    /// Handle a single request
    fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Search {
                term,
                regex,
                repository_ids,
                namespace_prefix,
                timeout_ms,
            } => self.handle_search(term, regex, repository_ids, namespace_prefix, timeout_ms),

            Request::Update {
                repository,
                delta,
                force,
            } => self.handle_update(repository, delta, force),

            Request::Status => self.handle_status(),

            Request::Shutdown => {
                self.shutdown.store(true, Ordering::Relaxed);
                Response::ShuttingDown
            }

            Request::Ping => Response::Pong,
        }
    }

    fn handle_search(
        &self,
        term: String,
        regex: bool,
        repository_ids: Vec<RepositoryId>,
        namespace_prefix: Option<String>,
        timeout_ms: u64,
    ) -> Response {
        let start = Instant::now();
        self.stats.queries_served.fetch_add(1, Ordering::Relaxed);

        let cache_key = cache_key(&term, regex, &repository_ids, namespace_prefix.as_deref());

        if let Ok(mut cache) = self.query_cache.lock()
            && let Some(cached) = cache.get(&cache_key)
        {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            let mut response = cached.clone();
            response.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
            response.cached = true;
            return Response::Search(response);
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let scope = match namespace_prefix {
            Some(prefix) => ScanScope::Namespace(prefix),
            None => ScanScope::Repositories(repository_ids),
        };
        let deadline = start + Duration::from_millis(timeout_ms);

        let store = match self.store.read() {
            Ok(s) => s,
            Err(_) => {
                return Response::Error {
                    message: "store lock poisoned".to_string(),
                }
            }
        };

        let outcome = match store.search(&term, regex, &scope, deadline) {
            Ok(o) => o,
            Err(e) => {
                return Response::Error {
                    message: format!("Invalid pattern: {}", e),
                }
            }
        };
        drop(store);

        let response = SearchResponse {
            files: outcome.files,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            cached: false,
            timed_out: outcome.timed_out,
        };

        // Only complete scans are worth caching
        if !response.timed_out
            && let Ok(mut cache) = self.query_cache.lock()
        {
            cache.put(cache_key, response.clone());
        }

        Response::Search(response)
    }

    fn handle_update(&self, repository: Repository, delta: RefDelta, force: bool) -> Response {
        let mut store = match self.store.write() {
            Ok(s) => s,
            Err(_) => {
                return Response::Updated {
                    success: false,
                    message: "store lock poisoned".to_string(),
                }
            }
        };

        let documents = store.apply(&repository, &delta, force);
        drop(store);

        // Indexed content changed; cached results are stale
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.clear();
        }

        self.stats.updates_applied.fetch_add(1, Ordering::Relaxed);

        Response::Updated {
            success: true,
            message: format!(
                "{} now at {} ({} documents indexed)",
                delta.ref_name, delta.oid, documents
            ),
        }
    }

    fn handle_status(&self) -> Response {
        let store = match self.store.read() {
            Ok(s) => s,
            Err(_) => {
                return Response::Error {
                    message: "store lock poisoned".to_string(),
                }
            }
        };

        Response::Status(StatusResponse {
            uptime_secs: self.stats.start_time.elapsed().as_secs(),
            repositories_indexed: store.repository_count(),
            documents_indexed: store.document_count(),
            queries_served: self.stats.queries_served.load(Ordering::Relaxed),
            updates_applied: self.stats.updates_applied.load(Ordering::Relaxed),
            cache_hit_rate: self.stats.cache_hit_rate(),
        })
    }

    /// Wake the accept loop so it can observe the shutdown flag.
    fn nudge_acceptor(&self) {
        if let Some(addr) = *self.local_addr.lock().unwrap() {
            let _ = TcpStream::connect_timeout(&addr, Duration::from_secs(1));
        }
    }
}

fn cache_key(
    term: &str,
    regex: bool,
    repository_ids: &[RepositoryId],
    namespace_prefix: Option<&str>,
) -> String {
    let mut ids: Vec<u64> = repository_ids.iter().map(|id| id.0).collect();
    ids.sort_unstable();
    format!(
        "{}\u{0}{}\u{0}{:?}\u{0}{}",
        term,
        regex,
        ids,
        namespace_prefix.unwrap_or("")
    )
}
