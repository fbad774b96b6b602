//! Client socket server
//!
//! Accepts TCP connections and speaks the newline-delimited JSON frame
//! protocol with each client. Every client gets a reader loop and a
//! writer task; frames are enqueued to the hardware in arrival order,
//! and only the wait for each reply runs on its own task so a pending
//! command never blocks an emergency stop from the same connection.

use crate::hardware::{HardwareHandle, HardwareResult};
use cablekit_communication::{
    decode_command_frame, now_millis, BroadcastFrame, CommandFrame, DeviceCommand, DeviceReply,
    ResponseFrame,
};
use cablekit_core::{validate_target, BoundsPolicy, CommandId, CommandKind, WorkspaceBounds};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

/// Connected clients and their outbound line queues
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client's outbound queue, returning its id
    pub fn register(&self, sender: mpsc::UnboundedSender<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.clients.lock().insert(id, sender);
        id
    }

    /// Remove a client
    pub fn unregister(&self, id: u64) {
        self.clients.lock().remove(&id);
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Queue a line to every connected client
    pub fn broadcast_line(&self, line: &str) {
        for sender in self.clients.lock().values() {
            let _ = sender.send(line.to_string());
        }
    }
}

/// Shared context for command handling
pub struct ServerContext {
    /// Handle to the hardware service
    pub hardware: HardwareHandle,
    /// Configured workspace volume
    pub bounds: WorkspaceBounds,
    /// Configured out-of-bounds policy
    pub policy: BoundsPolicy,
}

/// Accept clients until the listener is closed
pub async fn run_server(
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    ctx: Arc<ServerContext>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::info!(peer = %peer, "client connected");
                let registry = registry.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_client(stream, registry.clone(), ctx).await;
                });
            }
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
            }
        }
    }
}

async fn handle_client(stream: TcpStream, registry: Arc<ClientRegistry>, ctx: Arc<ServerContext>) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let id = registry.register(tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let payload = format!("{}\n", line);
            if write_half.write_all(payload.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    // New clients get the current status right away rather than waiting
    // for the next periodic broadcast.
    let initial = BroadcastFrame::StatusUpdate {
        data: ctx.hardware.status(),
        timestamp: now_millis(),
    };
    let _ = tx.send(initial.encode());

    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match decode_command_frame(&line) {
            // Dispatch synchronously so pipelined commands from one
            // client reach the hardware queue in arrival order; only
            // the wait for the reply is spawned, so a pending command
            // never blocks an emergency stop from the same connection.
            Ok(frame) => match dispatch_command(frame, &ctx) {
                Dispatch::Immediate(response) => {
                    let _ = tx.send(response.encode());
                }
                Dispatch::Pending(frame_id, reply) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(settle(frame_id, reply).await.encode());
                    });
                }
            },
            Err(e) => match e.id {
                Some(frame_id) => {
                    let _ = tx.send(ResponseFrame::err(frame_id, e.error.to_string()).encode());
                }
                None => {
                    tracing::warn!(client = id, "dropping malformed frame: {}", e.error);
                }
            },
        }
    }

    registry.unregister(id);
    writer.abort();
    tracing::info!(client = id, "client disconnected");
}

/// Outcome of dispatching one decoded command frame
pub enum Dispatch {
    /// Answered without touching the hardware queue
    Immediate(ResponseFrame),
    /// Enqueued; the receiver resolves with the correlated reply
    Pending(CommandId, oneshot::Receiver<HardwareResult>),
}

/// Resolve a command frame to a response or a queued hardware request.
///
/// Synchronous by design: the hardware enqueue happens before this
/// returns, so callers handling frames in order get FIFO arrival at
/// the hardware queue.
pub fn dispatch_command(frame: CommandFrame, ctx: &ServerContext) -> Dispatch {
    match frame.command {
        // Served from the status mirror; the periodic position poll
        // keeps the mirror fresh without an extra round trip here.
        CommandKind::GetStatus => Dispatch::Immediate(
            match serde_json::to_value(ctx.hardware.status()) {
                Ok(value) => ResponseFrame::ok(frame.id, Some(value)),
                Err(e) => ResponseFrame::err(frame.id, e.to_string()),
            },
        ),

        CommandKind::Move => {
            let Some(target) = frame.data else {
                return Dispatch::Immediate(ResponseFrame::err(
                    frame.id,
                    "move command without a target",
                ));
            };
            match validate_target(&target, &ctx.bounds, ctx.policy) {
                Ok(accepted) => Dispatch::Pending(
                    frame.id,
                    ctx.hardware.submit(DeviceCommand::Move(accepted)),
                ),
                Err(e) => Dispatch::Immediate(ResponseFrame::err(frame.id, e.to_string())),
            }
        }

        kind => match DeviceCommand::from_request(kind, frame.data) {
            Some(command) => Dispatch::Pending(frame.id, ctx.hardware.submit(command)),
            None => Dispatch::Immediate(ResponseFrame::err(
                frame.id,
                "command missing required data",
            )),
        },
    }
}

async fn settle(id: CommandId, reply: oneshot::Receiver<HardwareResult>) -> ResponseFrame {
    let outcome = reply
        .await
        .unwrap_or_else(|_| Err("hardware service stopped".to_string()));
    match outcome {
        Ok(DeviceReply::Pos(position)) => {
            ResponseFrame::ok(id, serde_json::to_value(position).ok())
        }
        Ok(DeviceReply::Status(status)) => {
            ResponseFrame::ok(id, Some(json!({ "status": status.as_str() })))
        }
        Ok(_) => ResponseFrame::ok(id, None),
        Err(reason) => ResponseFrame::err(id, reason),
    }
}
