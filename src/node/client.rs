//! Client for talking to a node daemon
//!
//! Every call carries a hard wall-clock budget enforced at this boundary:
//! connect, read, and write timeouts are all derived from it. There is no
//! cooperative cancellation into the node; a call either returns before the
//! deadline or surfaces a timeout.

use crate::error::{SearchError, SearchResult};
use crate::node::protocol::{
    read_message, write_message, Request, Response, SearchResponse, StatusResponse,
};
use crate::routing::{Node, NodeId, Repository, RepositoryId};
use crate::update::RefDelta;
use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Client for one node daemon
#[derive(Debug)]
pub struct NodeClient {
    node_id: NodeId,
    timeout: Duration,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl NodeClient {
    /// Connect to a node within the given wall-clock budget.
    pub fn connect(node: &Node, timeout: Duration) -> SearchResult<Self> {
        let addr = node
            .address
            .to_socket_addrs()
            .map_err(|e| SearchError::NodeUnavailable {
                node: node.id.clone(),
                source: e,
            })?
            .next()
            .ok_or_else(|| SearchError::NodeUnavailable {
                node: node.id.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "address resolved to nothing",
                ),
            })?;

        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| Self::classify(node.id.clone(), timeout, e))?;

        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);

        Ok(Self {
            node_id: node.id.clone(),
            timeout,
            reader,
            writer,
        })
    }

    /// Execute a search against this node's repositories.
    pub fn search(
        &mut self,
        term: &str,
        regex: bool,
        repository_ids: Vec<RepositoryId>,
        namespace_prefix: Option<String>,
    ) -> SearchResult<SearchResponse> {
        let request = Request::Search {
            term: term.to_string(),
            regex,
            repository_ids,
            namespace_prefix,
            timeout_ms: self.timeout.as_millis() as u64,
        };

        match self.request(&request)? {
            Response::Search(sr) => Ok(sr),
            other => Err(self.unexpected(other)),
        }
    }

    /// Push a ref delta (or full reindex) into this node's index.
    ///
    /// A rejected push comes back as `(false, message)` rather than an error;
    /// only transport failures error out.
    pub fn update(
        &mut self,
        repository: &Repository,
        delta: &RefDelta,
        force: bool,
    ) -> SearchResult<(bool, String)> {
        let request = Request::Update {
            repository: repository.clone(),
            delta: delta.clone(),
            force,
        };

        match self.request(&request)? {
            Response::Updated { success, message } => Ok((success, message)),
            other => Err(self.unexpected(other)),
        }
    }

    /// Get node status
    pub fn status(&mut self) -> SearchResult<StatusResponse> {
        match self.request(&Request::Status)? {
            Response::Status(status) => Ok(status),
            other => Err(self.unexpected(other)),
        }
    }

    /// Request graceful shutdown
    pub fn shutdown(&mut self) -> SearchResult<()> {
        match self.request(&Request::Shutdown)? {
            Response::ShuttingDown => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    /// Ping the node
    pub fn ping(&mut self) -> SearchResult<()> {
        match self.request(&Request::Ping)? {
            Response::Pong => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    fn request(&mut self, request: &Request) -> SearchResult<Response> {
        write_message(&mut self.writer, request)
            .map_err(|e| Self::classify(self.node_id.clone(), self.timeout, e))?;

        let response: Response = read_message(&mut self.reader)
            .map_err(|e| Self::classify(self.node_id.clone(), self.timeout, e))?;

        if let Response::Error { message } = response {
            return Err(SearchError::NodeError {
                node: self.node_id.clone(),
                message,
            });
        }

        Ok(response)
    }

    fn unexpected(&self, response: Response) -> SearchError {
        SearchError::Protocol {
            node: self.node_id.clone(),
            message: format!("unexpected response variant: {:?}", response),
        }
    }

    /// Map an I/O failure to the error taxonomy. Read/write timeouts show up
    /// as `WouldBlock` on unix and `TimedOut` on windows.
    fn classify(node: NodeId, timeout: Duration, e: std::io::Error) -> SearchError {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                SearchError::Timeout { node, timeout }
            }
            std::io::ErrorKind::InvalidData => SearchError::Protocol {
                node,
                message: e.to_string(),
            },
            _ => SearchError::NodeUnavailable { node, source: e },
        }
    }
}
