//! Client network link
//!
//! Owns a TCP connection to the relay and the reconnect policy around
//! it. The link delivers received lines and connection lifecycle events
//! over a channel; it holds no outbound buffer of its own, so lines
//! sent while disconnected are dropped. Offline queueing belongs to the
//! command channel layered above.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Reconnect behavior after a lost connection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry; later retries back off linearly
    pub base_delay: Duration,
    /// Consecutive failed attempts before the link gives up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.max(1)
    }
}

/// Connection state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection and no attempt running
    Disconnected,
    /// A connection attempt is in progress
    Connecting,
    /// Connected and exchanging frames
    Connected,
}

/// Events delivered to the link owner
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A connection was established
    Opened,
    /// A complete line arrived
    Message(String),
    /// The connection closed; `will_retry` says whether the link keeps
    /// trying on its own
    Closed {
        /// False once the retry budget is spent.
        will_retry: bool,
    },
    /// A connect attempt or read failed
    Error(String),
}

/// TCP link to the relay with automatic reconnection
pub struct NetworkLink {
    addr: String,
    policy: ReconnectPolicy,
    state: Arc<Mutex<LinkState>>,
    running: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<LinkEvent>,
    outbound: mpsc::UnboundedSender<String>,
    outbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl NetworkLink {
    /// Create a link for the given address.
    ///
    /// The link starts disconnected; call [`Self::open`] to begin
    /// connecting. Returned alongside the receiver for link events.
    pub fn new(
        addr: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let link = Self {
            addr: addr.into(),
            policy,
            state: Arc::new(Mutex::new(LinkState::Disconnected)),
            running: Arc::new(AtomicBool::new(false)),
            events,
            outbound,
            outbound_rx: Arc::new(tokio::sync::Mutex::new(outbound_rx)),
        };
        (link, events_rx)
    }

    /// Current connection state
    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    /// Start (or restart after exhausted retries) the connect loop.
    ///
    /// No-op while a loop is already running.
    pub fn open(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let addr = self.addr.clone();
        let policy = self.policy;
        let state = self.state.clone();
        let running = self.running.clone();
        let events = self.events.clone();
        let outbound_rx = self.outbound_rx.clone();
        tokio::spawn(async move {
            run_link(addr, policy, state, running, events, outbound_rx).await;
        });
    }

    /// Send a line to the relay.
    ///
    /// Dropped with a trace log when the link is not connected; the
    /// link never buffers.
    pub fn send(&self, line: impl Into<String>) {
        if self.state() != LinkState::Connected {
            tracing::trace!("dropping outbound line while disconnected");
            return;
        }
        let _ = self.outbound.send(line.into());
    }
}

async fn run_link(
    addr: String,
    policy: ReconnectPolicy,
    state: Arc<Mutex<LinkState>>,
    running: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<LinkEvent>,
    outbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
) {
    let mut attempt: u32 = 0;
    loop {
        *state.lock() = LinkState::Connecting;
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                attempt = 0;
                *state.lock() = LinkState::Connected;
                tracing::info!(addr = %addr, "link established");
                let _ = events.send(LinkEvent::Opened);

                let (read_half, mut write_half) = stream.into_split();
                let mut lines = BufReader::new(read_half).lines();
                let mut rx = outbound_rx.lock().await;
                loop {
                    tokio::select! {
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => {
                                let _ = events.send(LinkEvent::Message(line));
                            }
                            Ok(None) => break,
                            Err(e) => {
                                let _ = events.send(LinkEvent::Error(e.to_string()));
                                break;
                            }
                        },
                        outgoing = rx.recv() => match outgoing {
                            Some(line) => {
                                let payload = format!("{}\n", line);
                                if write_half.write_all(payload.as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                            // Link owner dropped; shut the loop down.
                            None => {
                                *state.lock() = LinkState::Disconnected;
                                running.store(false, Ordering::SeqCst);
                                return;
                            }
                        },
                    }
                }
                *state.lock() = LinkState::Disconnected;
            }
            Err(e) => {
                tracing::warn!(addr = %addr, attempt = attempt + 1, "connect failed: {}", e);
                let _ = events.send(LinkEvent::Error(e.to_string()));
            }
        }

        attempt += 1;
        let will_retry = attempt < policy.max_attempts;
        let _ = events.send(LinkEvent::Closed { will_retry });
        if !will_retry {
            tracing::warn!(addr = %addr, attempts = attempt, "retry budget exhausted");
            *state.lock() = LinkState::Disconnected;
            running.store(false, Ordering::SeqCst);
            return;
        }
        tokio::time::sleep(policy.delay_for(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn retry_delay_scales_linearly_with_the_attempt() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(250),
            max_attempts: 5,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_millis(750));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1250));
    }

    #[tokio::test]
    async fn connects_and_delivers_lines_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (link, mut events) = NetworkLink::new(addr.to_string(), ReconnectPolicy::default());
        link.open();

        let (mut server, _) = listener.accept().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), LinkEvent::Opened);

        server.write_all(b"hello\n").await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            LinkEvent::Message("hello".to_string())
        );

        link.send("world");
        let mut buf = [0u8; 16];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world\n");
    }

    #[tokio::test]
    async fn lost_connection_reports_closed_with_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (link, mut events) = NetworkLink::new(
            addr.to_string(),
            ReconnectPolicy {
                base_delay: Duration::from_millis(10),
                max_attempts: 3,
            },
        );
        link.open();

        let (server, _) = listener.accept().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), LinkEvent::Opened);

        drop(server);
        assert_eq!(
            events.recv().await.unwrap(),
            LinkEvent::Closed { will_retry: true }
        );

        // The listener is still up, so the retry succeeds.
        let (_server, _) = listener.accept().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), LinkEvent::Opened);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_attempts() {
        // Bind then drop to get an address nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (link, mut events) = NetworkLink::new(
            addr.to_string(),
            ReconnectPolicy {
                base_delay: Duration::from_millis(1),
                max_attempts: 2,
            },
        );
        link.open();

        let mut final_close = None;
        while let Some(event) = events.recv().await {
            if let LinkEvent::Closed { will_retry } = event {
                final_close = Some(will_retry);
                if !will_retry {
                    break;
                }
            }
        }
        assert_eq!(final_close, Some(false));
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn send_while_disconnected_is_dropped() {
        let (link, _events) = NetworkLink::new("127.0.0.1:1", ReconnectPolicy::default());
        link.send("never delivered");
        assert_eq!(link.state(), LinkState::Disconnected);
    }
}
