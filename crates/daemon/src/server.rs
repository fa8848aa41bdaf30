// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket server and connection handling.
//!
//! One connection carries one node. Requests are handed to the lock manager
//! as they arrive; responses the manager routes to the node are written back
//! on the same socket.

use std::sync::Arc;

use lockd_core::{Clock, LockError, LockManager, LockResponse, LockStats, NodeId, NodeRouter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{
    self, ProtocolError, Request, Response, DEFAULT_TIMEOUT, PROTOCOL_VERSION,
};

/// Serve one node connection until it closes
///
/// Whatever the outcome, the node is detached from the router and its locks
/// are released before this returns.
pub async fn handle_connection<C: Clock>(
    manager: Arc<LockManager<C>>,
    router: Arc<NodeRouter>,
    stream: UnixStream,
) -> Result<(), ServerError> {
    let (mut reader, mut writer) = stream.into_split();

    let node = match protocol::read_request_timeout(&mut reader, DEFAULT_TIMEOUT).await {
        Ok(Request::Hello { node, version }) => {
            if version != PROTOCOL_VERSION {
                warn!(%node, %version, "protocol version mismatch");
            }
            node
        }
        Ok(other) => {
            let message = format!("expected Hello, got {:?}", other);
            reject(&mut writer, &message).await;
            return Err(ServerError::Protocol(ProtocolError::Unexpected(message)));
        }
        Err(ProtocolError::ConnectionClosed) => {
            debug!("Client disconnected before hello");
            return Ok(());
        }
        Err(ProtocolError::Timeout) => return Err(ServerError::Timeout),
        Err(e) => return Err(ServerError::Protocol(e)),
    };

    let Some(responses) = router.try_register(node) else {
        reject(&mut writer, &format!("node {} is already connected", node)).await;
        return Err(ServerError::DuplicateNode(node));
    };

    let result = serve(&manager, node, reader, &mut writer, responses).await;

    router.unregister(node);
    manager.node_disconnected(node);
    info!(%node, "node connection closed");
    result
}

async fn serve<C: Clock>(
    manager: &LockManager<C>,
    node: NodeId,
    reader: OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    mut responses: mpsc::UnboundedReceiver<LockResponse>,
) -> Result<(), ServerError> {
    protocol::write_response(
        writer,
        &Response::Welcome {
            version: PROTOCOL_VERSION.to_string(),
        },
    )
    .await?;
    info!(%node, "node connected");

    // Frame reads are not cancel-safe, so they run outside the select
    let (requests_tx, mut requests) = mpsc::unbounded_channel();
    let read_task = tokio::spawn(read_requests(reader, requests_tx));

    let result = loop {
        tokio::select! {
            request = requests.recv() => {
                let request = match request {
                    Some(Ok(request)) => request,
                    Some(Err(ProtocolError::ConnectionClosed)) | None => break Ok(()),
                    Some(Err(e)) => break Err(ServerError::Protocol(e)),
                };
                if let Some(response) = handle_request(manager, node, request) {
                    if let Err(e) = protocol::write_response(writer, &response).await {
                        break Err(e.into());
                    }
                }
            }
            response = responses.recv() => {
                let Some(response) = response else {
                    break Ok(());
                };
                if let Err(e) = protocol::write_response(writer, &Response::Lock { response }).await {
                    break Err(e.into());
                }
            }
        }
    };

    read_task.abort();
    result
}

async fn read_requests(
    mut reader: OwnedReadHalf,
    requests: mpsc::UnboundedSender<Result<Request, ProtocolError>>,
) {
    loop {
        let request = protocol::read_request(&mut reader).await;
        let done = request.is_err();
        if requests.send(request).is_err() || done {
            return;
        }
    }
}

/// Handle one request, returning the direct reply if it has one
///
/// Lock messages are answered asynchronously through the router, including
/// the errors the manager reports for them.
fn handle_request<C: Clock>(
    manager: &LockManager<C>,
    node: NodeId,
    request: Request,
) -> Option<Response> {
    match request {
        Request::Message { message } => {
            if message.node() != node {
                return Some(Response::Error {
                    message: format!(
                        "message for node {} sent on connection of node {}",
                        message.node(),
                        node
                    ),
                });
            }
            match manager.handle(message) {
                Ok(()) => None,
                Err(e @ LockError::NotRunning(_)) => Some(Response::Error {
                    message: e.to_string(),
                }),
                Err(e) => {
                    debug!(%node, error = %e, "lock message failed");
                    None
                }
            }
        }
        Request::Stats => Some(Response::Stats {
            stats: LockStats::collect(manager),
        }),
        Request::Hello { .. } => Some(Response::Error {
            message: "connection already greeted".to_string(),
        }),
    }
}

async fn reject(writer: &mut OwnedWriteHalf, message: &str) {
    let response = Response::Error {
        message: message.to_string(),
    };
    if let Err(e) = protocol::write_response(writer, &response).await {
        debug!(error = %e, "failed to send rejection");
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Request timeout")]
    Timeout,

    #[error("Node {0} is already connected")]
    DuplicateNode(NodeId),
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
