//! Integration tests running real node daemons on loopback TCP.
//!
//! Each test spins up one or more in-process node servers on ephemeral
//! ports, wires a registry to them, and drives the search core end to end:
//! index pushes, fan-out queries, timeouts, and degraded results.

use shq::config::ClusterConfig;
use shq::node::{NodeClient, NodeServer};
use shq::query::{QueryExecutor, SearchQuery};
use shq::routing::{IndexRegistry, Node, NodeId, NodeState, Repository, RepositoryId, Scope};
use shq::update::{Document, RefDelta, UpdateJob, UpdatePipeline, UpdateWorker};
use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn node(id: &str, address: String) -> Node {
    Node {
        id: NodeId::from(id),
        address,
        state: NodeState::Ready,
    }
}

fn repo(id: u64, project_path: &str) -> Repository {
    Repository {
        id: RepositoryId(id),
        project_path: project_path.to_string(),
        default_ref: "main".to_string(),
    }
}

fn delta(oid: &str, docs: &[(&str, &str)]) -> RefDelta {
    RefDelta {
        ref_name: "main".to_string(),
        oid: oid.to_string(),
        documents: docs
            .iter()
            .map(|(p, c)| Document {
                path: p.to_string(),
                content: c.to_string(),
            })
            .collect(),
        deleted_paths: Vec::new(),
    }
}

fn config() -> ClusterConfig {
    ClusterConfig {
        base_url: "https://git.example.com".to_string(),
        query_timeout_ms: 5_000,
        update_timeout_ms: 5_000,
        allow_namespace_search: true,
        update_batch_window_ms: 10,
        ..Default::default()
    }
}

/// Spin up a node daemon and return its registry entry.
fn spawn_node(id: &str) -> Node {
    let server = NodeServer::new();
    let (addr, _handle) = server.spawn().expect("failed to spawn node");
    node(id, addr.to_string())
}

#[test]
fn test_update_then_search_reads_own_write() {
    let config = config();
    let mut registry = IndexRegistry::new();
    registry.add_node(spawn_node("node-a"));
    registry
        .assign(repo(1, "acme/app"), NodeId::from("node-a"))
        .unwrap();

    let pipeline = UpdatePipeline::new(&registry, &config);
    let responses = pipeline
        .update_index(
            RepositoryId(1),
            &delta("c0ffee", &[("src/main.rs", "fn main() {\n    start();\n}\n")]),
            false,
        )
        .unwrap();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].success, "{}", responses[0].message);

    let executor = QueryExecutor::new(&registry, &config);
    let results = executor
        .search(&SearchQuery::new("fn main", Scope::Project(RepositoryId(1))))
        .unwrap();

    assert!(!results.degraded());
    assert_eq!(results.file_count, 1);
    let blob = &results.blobs[0];
    assert_eq!(blob.path, "src/main.rs");
    assert_eq!(blob.project_path, "acme/app");
    assert_eq!(blob.match_count, 1);
    assert_eq!(blob.match_count_total, 1);
    assert_eq!(
        blob.file_url,
        "https://git.example.com/acme/app/-/blob/main/src/main.rs"
    );
    assert_eq!(
        blob.blame_url,
        "https://git.example.com/acme/app/-/blame/main/src/main.rs"
    );
    assert_eq!(blob.chunks[0].lines[0].rich_text, "<mark>fn main</mark>() {");
}

#[test]
fn test_fan_out_degrades_on_partial_node_failure() {
    let config = config();
    let mut registry = IndexRegistry::new();
    registry.add_node(spawn_node("node-live"));
    // Reserved port; connection refused immediately
    registry.add_node(node("node-dead", "127.0.0.1:1".to_string()));
    registry
        .assign(repo(1, "acme/app"), NodeId::from("node-live"))
        .unwrap();
    registry
        .assign(repo(2, "acme/lib"), NodeId::from("node-dead"))
        .unwrap();

    let pipeline = UpdatePipeline::new(&registry, &config);
    pipeline
        .update_index(RepositoryId(1), &delta("aaa", &[("a.rs", "needle here")]), false)
        .unwrap();

    // The dead node also fails the update path, surfaced per node
    let responses = pipeline
        .update_index(RepositoryId(2), &delta("bbb", &[("b.rs", "needle too")]), false)
        .unwrap();
    assert!(!responses[0].success);

    let executor = QueryExecutor::new(&registry, &config);
    let results = executor
        .search(&SearchQuery::new(
            "needle",
            Scope::Projects(vec![RepositoryId(1), RepositoryId(2)]),
        ))
        .unwrap();

    // Best result wins: the live node's matches come back, the dead node is
    // reported, and the overall search is degraded but not failed.
    assert_eq!(results.file_count, 1);
    assert_eq!(results.blobs[0].project_path, "acme/app");
    assert_eq!(results.failures.len(), 1);
    assert_eq!(results.failures[0].node, NodeId::from("node-dead"));
    assert!(results.degraded());
}

#[test]
fn test_query_against_mute_node_times_out_within_budget() {
    let config = config();

    // A listener that never answers: connections sit in the backlog and any
    // request byte is never read back.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut registry = IndexRegistry::new();
    registry.add_node(node("node-mute", addr.to_string()));
    registry
        .assign(repo(1, "acme/app"), NodeId::from("node-mute"))
        .unwrap();

    let executor = QueryExecutor::new(&registry, &config);
    let timeout = Duration::from_millis(100);
    let query = SearchQuery::new("term", Scope::Project(RepositoryId(1))).with_timeout(timeout);

    let start = Instant::now();
    let results = executor.search(&query).unwrap();
    let elapsed = start.elapsed();

    assert!(results.timed_out);
    assert!(results.blobs.is_empty());
    assert_eq!(results.failures.len(), 1);
    assert!(results.failures[0].timed_out);
    // Bounded margin above the budget, never indefinite blocking
    assert!(
        elapsed < timeout + Duration::from_secs(2),
        "query blocked for {:?}",
        elapsed
    );

    drop(listener);
}

#[test]
fn test_concurrent_searches_do_not_interfere() {
    let config = config();
    let mut registry = IndexRegistry::new();
    registry.add_node(spawn_node("node-a"));
    registry
        .assign(repo(1, "acme/app"), NodeId::from("node-a"))
        .unwrap();

    let pipeline = UpdatePipeline::new(&registry, &config);
    pipeline
        .update_index(
            RepositoryId(1),
            &delta(
                "aaa",
                &[
                    ("alpha.rs", "alpha content\nalpha again"),
                    ("beta.rs", "beta content"),
                ],
            ),
            false,
        )
        .unwrap();

    let executor = QueryExecutor::new(&registry, &config);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let executor = &executor;
                scope.spawn(move || {
                    let term = if i % 2 == 0 { "alpha" } else { "beta" };
                    let results = executor
                        .search(&SearchQuery::new(term, Scope::Project(RepositoryId(1))))
                        .unwrap();
                    assert_eq!(results.file_count, 1, "term {} bled across queries", term);
                    assert!(results.blobs[0].path.starts_with(term));
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    });
}

#[test]
fn test_visibility_filter_removes_unauthorized_matches() {
    let config = config();
    let mut registry = IndexRegistry::new();
    registry.add_node(spawn_node("node-a"));
    registry
        .assign(repo(1, "acme/private"), NodeId::from("node-a"))
        .unwrap();

    let pipeline = UpdatePipeline::new(&registry, &config);
    pipeline
        .update_index(
            RepositoryId(1),
            &delta("aaa", &[("auth.rs", "let username_regex = compile();")]),
            false,
        )
        .unwrap();

    let executor = QueryExecutor::new(&registry, &config);
    let mut results = executor
        .search(&SearchQuery::new(
            "username_regex",
            Scope::Project(RepositoryId(1)),
        ))
        .unwrap();

    // The raw executor found matches; it never filters per-blob permissions
    assert_eq!(results.file_count, 1);

    // Caller's permission check denies everything in this scope
    results.retain_visible(|_| false);
    assert_eq!(results.file_count, 0);
    assert_eq!(results.match_count, 0);
    assert_eq!(results.match_count_total, 0);
}

#[test]
fn test_chunk_cap_holds_over_the_wire() {
    let config = config();
    let mut registry = IndexRegistry::new();
    registry.add_node(spawn_node("node-a"));
    registry
        .assign(repo(1, "acme/app"), NodeId::from("node-a"))
        .unwrap();

    // Matches far apart: one chunk each, far more than the cap
    let content: String = (0..30)
        .map(|i| format!("token {}\n{}", i, "filler\n".repeat(8)))
        .collect();

    let pipeline = UpdatePipeline::new(&registry, &config);
    pipeline
        .update_index(RepositoryId(1), &delta("aaa", &[("hot.txt", &content)]), false)
        .unwrap();

    let executor = QueryExecutor::new(&registry, &config);
    let results = executor
        .search(&SearchQuery::new("token", Scope::Project(RepositoryId(1))))
        .unwrap();

    let blob = &results.blobs[0];
    assert_eq!(blob.match_count_total, 30);
    assert_eq!(blob.chunks.len(), config.aggregation.max_chunks_per_file);
    assert_eq!(blob.match_count, blob.chunks.len() as u32);
    assert!(blob.truncated());

    // Chunk line numbers strictly ascend across the whole blob
    let mut prev = 0;
    for chunk in &blob.chunks {
        for line in &chunk.lines {
            assert!(line.line_number > prev);
            prev = line.line_number;
        }
    }
}

#[test]
fn test_namespace_search_spans_nodes() {
    let config = config();
    let mut registry = IndexRegistry::new();
    registry.add_node(spawn_node("node-a"));
    registry.add_node(spawn_node("node-b"));
    registry
        .assign(repo(1, "acme/app"), NodeId::from("node-a"))
        .unwrap();
    registry
        .assign(repo(2, "acme/lib"), NodeId::from("node-b"))
        .unwrap();
    registry
        .assign(repo(3, "other/tool"), NodeId::from("node-b"))
        .unwrap();

    let pipeline = UpdatePipeline::new(&registry, &config);
    for (id, doc) in [
        (1, ("app.rs", "shared_token in app")),
        (2, ("lib.rs", "shared_token in lib")),
        (3, ("tool.rs", "shared_token in tool")),
    ] {
        pipeline
            .update_index(RepositoryId(id), &delta("aaa", &[doc]), false)
            .unwrap();
    }

    let executor = QueryExecutor::new(&registry, &config);
    let results = executor
        .search(&SearchQuery::new(
            "shared_token",
            Scope::Namespace("acme".to_string()),
        ))
        .unwrap();

    let projects: Vec<&str> = results
        .blobs
        .iter()
        .map(|b| b.project_path.as_str())
        .collect();
    assert_eq!(projects, vec!["acme/app", "acme/lib"]);
}

#[test]
fn test_regex_search_end_to_end() {
    let config = config();
    let mut registry = IndexRegistry::new();
    registry.add_node(spawn_node("node-a"));
    registry
        .assign(repo(1, "acme/app"), NodeId::from("node-a"))
        .unwrap();

    let pipeline = UpdatePipeline::new(&registry, &config);
    pipeline
        .update_index(
            RepositoryId(1),
            &delta(
                "aaa",
                &[("handlers.rs", "fn handle_get() {}\nfn handle_post() {}\nfn other() {}")],
            ),
            false,
        )
        .unwrap();

    let executor = QueryExecutor::new(&registry, &config);
    let results = executor
        .search(
            &SearchQuery::new(r"handle_\w+", Scope::Project(RepositoryId(1))).regex(true),
        )
        .unwrap();

    assert_eq!(results.match_count_total, 2);
    assert_eq!(
        results.blobs[0].chunks[0].lines[0].rich_text,
        "fn <mark>handle_get</mark>() {}"
    );
}

#[test]
fn test_force_reindex_drops_stale_documents() {
    let config = config();
    let mut registry = IndexRegistry::new();
    registry.add_node(spawn_node("node-a"));
    registry
        .assign(repo(1, "acme/app"), NodeId::from("node-a"))
        .unwrap();

    let pipeline = UpdatePipeline::new(&registry, &config);
    pipeline
        .update_index(RepositoryId(1), &delta("aaa", &[("stale.rs", "old_symbol")]), false)
        .unwrap();
    pipeline
        .update_index(RepositoryId(1), &delta("bbb", &[("fresh.rs", "new_symbol")]), true)
        .unwrap();

    let executor = QueryExecutor::new(&registry, &config);
    let stale = executor
        .search(&SearchQuery::new("old_symbol", Scope::Project(RepositoryId(1))))
        .unwrap();
    assert_eq!(stale.file_count, 0);

    let fresh = executor
        .search(&SearchQuery::new("new_symbol", Scope::Project(RepositoryId(1))))
        .unwrap();
    assert_eq!(fresh.file_count, 1);
}

#[test]
fn test_async_worker_coalesces_and_applies_in_order() {
    let config = Arc::new(config());
    let mut registry = IndexRegistry::new();
    registry.add_node(spawn_node("node-a"));
    registry
        .assign(repo(1, "acme/app"), NodeId::from("node-a"))
        .unwrap();
    let registry = Arc::new(registry);

    let (obs_tx, obs_rx) = mpsc::channel();
    let worker =
        UpdateWorker::spawn_with_observer(Arc::clone(&registry), Arc::clone(&config), Some(obs_tx));

    // Two quick writes to the same ref coalesce into one push
    worker.schedule(UpdateJob {
        repository: RepositoryId(1),
        delta: delta("aaa", &[("a.rs", "first draft")]),
        force: false,
    });
    worker.schedule(UpdateJob {
        repository: RepositoryId(1),
        delta: delta("bbb", &[("a.rs", "second draft")]),
        force: false,
    });
    worker.flush();

    let responses = obs_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].success);
    // Coalesced into a single batch: no second report pending
    assert!(obs_rx.try_recv().is_err());

    let executor = QueryExecutor::new(&registry, &config);
    let results = executor
        .search(&SearchQuery::new("second draft", Scope::Project(RepositoryId(1))))
        .unwrap();
    assert_eq!(results.file_count, 1);

    worker.shutdown();
}

#[test]
fn test_status_and_shutdown_over_the_wire() {
    let config = config();
    let server = NodeServer::new();
    let (addr, handle) = server.spawn().unwrap();
    let n = node("node-a", addr.to_string());

    let mut client = NodeClient::connect(&n, config.query_timeout()).unwrap();
    client.ping().unwrap();

    let status = client.status().unwrap();
    assert_eq!(status.repositories_indexed, 0);

    client.shutdown().unwrap();
    handle.join().unwrap();
}
