//! Client command channel
//!
//! Layers request/response correlation on top of the network link.
//! Every submitted command gets a unique id and resolves to exactly one
//! outcome: the matching response, a rejection, a timeout, or transport
//! closure. Commands submitted while the link is down are queued and
//! flushed in order once it comes back.

use crate::link::{LinkEvent, LinkState, NetworkLink, ReconnectPolicy};
use crate::protocol::frames::{decode_client_bound, BroadcastFrame, ClientBound, CommandFrame};
use cablekit_core::{Command, CommandError, CommandId, CommandKind, Position};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Result payload of a resolved command
pub type ResponseData = Option<serde_json::Value>;

type PendingSender = oneshot::Sender<Result<ResponseData, CommandError>>;

/// Command channel configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandChannelConfig {
    /// Deadline from submission to resolution, queued time included
    pub timeout: Duration,
}

impl Default for CommandChannelConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct ChannelInner {
    pending: Mutex<HashMap<CommandId, PendingSender>>,
    queue: Mutex<VecDeque<Command>>,
}

/// Correlated command channel over a [`NetworkLink`]
pub struct CommandChannel {
    link: Arc<NetworkLink>,
    inner: Arc<ChannelInner>,
    config: CommandChannelConfig,
}

impl CommandChannel {
    /// Create a channel and start connecting.
    ///
    /// Returns the channel together with the receiver for unsolicited
    /// broadcast frames.
    pub fn connect(
        addr: impl Into<String>,
        policy: ReconnectPolicy,
        config: CommandChannelConfig,
    ) -> (Self, mpsc::UnboundedReceiver<BroadcastFrame>) {
        let (link, events) = NetworkLink::new(addr, policy);
        link.open();
        let link = Arc::new(link);

        let inner = Arc::new(ChannelInner::default());
        let (broadcasts, broadcasts_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_events(
            link.clone(),
            events,
            inner.clone(),
            broadcasts,
        ));

        (
            Self {
                link,
                inner,
                config,
            },
            broadcasts_rx,
        )
    }

    /// Current state of the underlying link
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Restart connecting after the link exhausted its retries
    pub fn reopen(&self) {
        self.link.open();
    }

    /// Submit a command and wait for its resolution.
    ///
    /// While the link is down the command waits in the offline queue;
    /// the timeout clock runs regardless, so a long outage resolves the
    /// command as timed out rather than holding it forever.
    pub async fn submit(
        &self,
        kind: CommandKind,
        payload: Option<Position>,
    ) -> Result<ResponseData, CommandError> {
        let command = Command::new(kind, payload);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(command.id.clone(), tx);

        if self.link.state() == LinkState::Connected {
            self.link.send(CommandFrame::from_command(&command).encode());
        } else {
            tracing::debug!(command = %kind, "link offline, queueing command");
            self.inner.queue.lock().push_back(command.clone());
        }

        let timeout_ms = self.config.timeout.as_millis() as u64;
        match tokio::time::timeout(self.config.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CommandError::TransportClosed),
            Err(_) => {
                self.inner.pending.lock().remove(&command.id);
                self.inner.queue.lock().retain(|c| c.id != command.id);
                Err(CommandError::Timeout { timeout_ms })
            }
        }
    }

    /// Move the end-effector to a target position
    pub async fn move_to(&self, target: Position) -> Result<ResponseData, CommandError> {
        self.submit(CommandKind::Move, Some(target)).await
    }

    /// Move to the home position
    pub async fn home(&self) -> Result<ResponseData, CommandError> {
        self.submit(CommandKind::Home, None).await
    }

    /// Start a calibration cycle
    pub async fn calibrate(&self) -> Result<ResponseData, CommandError> {
        self.submit(CommandKind::Calibrate, None).await
    }

    /// Enable motion
    pub async fn activate(&self) -> Result<ResponseData, CommandError> {
        self.submit(CommandKind::Activate, None).await
    }

    /// Disable motion
    pub async fn deactivate(&self) -> Result<ResponseData, CommandError> {
        self.submit(CommandKind::Deactivate, None).await
    }

    /// Raise a software emergency stop
    pub async fn emergency_stop(&self) -> Result<ResponseData, CommandError> {
        self.submit(CommandKind::EmergencyStop, None).await
    }

    /// Clear an emergency stop
    pub async fn reset(&self) -> Result<ResponseData, CommandError> {
        self.submit(CommandKind::Reset, None).await
    }

    /// Query current status
    pub async fn get_status(&self) -> Result<ResponseData, CommandError> {
        self.submit(CommandKind::GetStatus, None).await
    }
}

async fn run_events(
    link: Arc<NetworkLink>,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    inner: Arc<ChannelInner>,
    broadcasts: mpsc::UnboundedSender<BroadcastFrame>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Opened => {
                let queued: Vec<Command> = inner.queue.lock().drain(..).collect();
                for command in queued {
                    // A command whose timeout already fired has left the
                    // pending map and must not be sent.
                    if inner.pending.lock().contains_key(&command.id) {
                        link.send(CommandFrame::from_command(&command).encode());
                    }
                }
            }
            LinkEvent::Message(line) => match decode_client_bound(&line) {
                Ok(ClientBound::Response(response)) => {
                    let sender = inner.pending.lock().remove(&response.id);
                    match sender {
                        Some(tx) => {
                            let result = if response.success {
                                Ok(response.data)
                            } else {
                                Err(CommandError::Rejected {
                                    reason: response
                                        .error
                                        .unwrap_or_else(|| "unknown error".to_string()),
                                })
                            };
                            let _ = tx.send(result);
                        }
                        None => {
                            tracing::trace!(id = %response.id, "dropping unmatched response");
                        }
                    }
                }
                Ok(ClientBound::Broadcast(frame)) => {
                    let _ = broadcasts.send(frame);
                }
                Err(e) => tracing::warn!("dropping malformed frame: {}", e),
            },
            LinkEvent::Closed { will_retry } => {
                if !will_retry {
                    let pending: Vec<(CommandId, PendingSender)> =
                        inner.pending.lock().drain().collect();
                    for (_, tx) in pending {
                        let _ = tx.send(Err(CommandError::TransportClosed));
                    }
                    inner.queue.lock().clear();
                }
            }
            LinkEvent::Error(e) => tracing::debug!("link error: {}", e),
        }
    }
}
