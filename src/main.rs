use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shq::config::ClusterConfig;
use shq::node::{NodeClient, NodeServer};
use shq::output;
use shq::query::{QueryExecutor, SearchQuery};
use shq::routing::{IndexRegistry, Node, NodeId, RepositoryId, Scope};
use shq::update::{Document, RefDelta, UpdatePipeline};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "shq")]
#[command(about = "Multi-shard, node-aware exact and regex code search engine")]
struct Cli {
    /// Cluster configuration file
    #[arg(short, long, default_value = "cluster.json")]
    cluster: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node daemon (keeps a shard's indexes in memory)
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:6430")]
        listen: String,
    },
    /// Search indexed repositories
    Search {
        /// The search term
        term: String,

        /// Repository ids to search
        #[arg(short, long = "repo")]
        repos: Vec<u64>,

        /// Search every repository under a namespace prefix
        #[arg(short, long)]
        namespace: Option<String>,

        /// Treat the term as a regex
        #[arg(short = 'e', long)]
        regex: bool,

        /// Per-node wall-clock budget in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Restrict the query to one node
        #[arg(long)]
        node: Option<String>,

        /// Emit results as JSON instead of colored text
        #[arg(long)]
        json: bool,
    },
    /// Push a repository delta into its owning node
    Update {
        /// Repository id
        repo: u64,

        /// Ref the delta advances
        #[arg(long, default_value = "main")]
        r#ref: String,

        /// Commit id the ref now points at
        #[arg(long, default_value = "manual")]
        oid: String,

        /// Replace the repository's whole document set
        #[arg(short, long)]
        force: bool,

        /// Paths to remove from the index
        #[arg(long = "delete")]
        deleted: Vec<String>,

        /// Files to push (content read from disk)
        files: Vec<PathBuf>,
    },
    /// Show a node's status
    Status {
        /// Node id from the cluster configuration
        node: String,
    },
    /// Ping a node
    Ping { node: String },
    /// Ask a node to shut down gracefully
    Shutdown { node: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen } => {
            let server = NodeServer::new();
            server.bind_and_run(&listen)?;
        }
        Commands::Search {
            term,
            repos,
            namespace,
            regex,
            timeout_ms,
            node,
            json,
        } => {
            let (config, registry) = load_cluster(&cli.cluster)?;

            let scope = match (namespace, repos.as_slice()) {
                (Some(prefix), []) => Scope::Namespace(prefix),
                (None, [repo]) => Scope::Project(RepositoryId(*repo)),
                (None, repos) if !repos.is_empty() => {
                    Scope::Projects(repos.iter().map(|id| RepositoryId(*id)).collect())
                }
                (Some(_), _) => bail!("--namespace cannot be combined with --repo"),
                (None, _) => bail!("pass at least one --repo or a --namespace"),
            };

            let mut query = SearchQuery::new(term, scope).regex(regex);
            if let Some(ms) = timeout_ms {
                query = query.with_timeout(Duration::from_millis(ms));
            }
            if let Some(id) = node {
                query = query.pinned_to(NodeId(id));
            }

            let executor = QueryExecutor::new(&registry, &config);
            let results = executor.search(&query)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results.blobs)?);
            } else {
                output::print_results(&results, true)?;
            }
        }
        Commands::Update {
            repo,
            r#ref,
            oid,
            force,
            deleted,
            files,
        } => {
            let (config, registry) = load_cluster(&cli.cluster)?;

            let mut documents = Vec::with_capacity(files.len());
            for path in files {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                documents.push(Document {
                    path: path.to_string_lossy().into_owned(),
                    content,
                });
            }

            let delta = RefDelta {
                ref_name: r#ref,
                oid,
                documents,
                deleted_paths: deleted,
            };

            let pipeline = UpdatePipeline::new(&registry, &config);
            let responses = pipeline.update_index(RepositoryId(repo), &delta, force)?;

            let mut failed = false;
            for resp in &responses {
                println!(
                    "{}: {} ({})",
                    resp.node,
                    if resp.success { "ok" } else { "FAILED" },
                    resp.message
                );
                failed |= !resp.success;
            }
            if failed && responses.iter().all(|r| !r.success) {
                bail!("update failed on every node");
            }
        }
        Commands::Status { node } => {
            let (config, registry) = load_cluster(&cli.cluster)?;
            let mut client = connect(&registry, &config, &node)?;
            let status = client.status()?;

            println!("Uptime:        {}s", status.uptime_secs);
            println!("Repositories:  {}", status.repositories_indexed);
            println!("Documents:     {}", status.documents_indexed);
            println!("Queries:       {}", status.queries_served);
            println!("Updates:       {}", status.updates_applied);
            println!("Cache hits:    {:.1}%", status.cache_hit_rate * 100.0);
        }
        Commands::Ping { node } => {
            let (config, registry) = load_cluster(&cli.cluster)?;
            let mut client = connect(&registry, &config, &node)?;
            client.ping()?;
            println!("{}: pong", node);
        }
        Commands::Shutdown { node } => {
            let (config, registry) = load_cluster(&cli.cluster)?;
            let mut client = connect(&registry, &config, &node)?;
            client.shutdown()?;
            println!("{}: shutting down", node);
        }
    }

    Ok(())
}

fn load_cluster(path: &PathBuf) -> Result<(ClusterConfig, IndexRegistry)> {
    let config = ClusterConfig::load(path)?;
    let registry = config.registry()?;
    Ok((config, registry))
}

fn connect(
    registry: &IndexRegistry,
    config: &ClusterConfig,
    node_id: &str,
) -> Result<NodeClient> {
    let node: &Node = registry
        .node(&NodeId::from(node_id))
        .with_context(|| format!("node '{}' is not in the cluster configuration", node_id))?;
    Ok(NodeClient::connect(node, config.query_timeout())?)
}
