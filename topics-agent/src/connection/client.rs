//! Connection client for the topics console

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use topics_protocol::{Direction, FrameCodec, Message, Registry};
use topics_utils::{Result, TopicsError};

use super::handler::{ConsoleHandler, ConsoleSender};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The console already serves another agent
    Rejected,
}

/// Agent connection to a topics console
pub struct AgentConnection {
    /// Console address (host:port)
    addr: String,
    pid: i32,
    /// Current state, also updated by the connection task
    state: Arc<Mutex<ConnectionState>>,
    /// Channel for outgoing messages
    tx: mpsc::Sender<Message>,
    /// Channel for receiving messages
    rx: mpsc::Receiver<Message>,
    /// Handle to the connection task
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl AgentConnection {
    /// Connect to the console at `addr` and announce `pid`
    pub async fn connect(addr: &str, pid: i32) -> Result<Self> {
        let registry = Registry::standard()
            .map_err(|e| TopicsError::ProtocolRegistration(e.to_string()))?;
        Self::connect_with_registry(addr, pid, Arc::new(registry)).await
    }

    pub async fn connect_with_registry(
        addr: &str,
        pid: i32,
        registry: Arc<Registry>,
    ) -> Result<Self> {
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));

        let stream = TcpStream::connect(addr).await.map_err(|e| {
            *state.lock() = ConnectionState::Disconnected;
            TopicsError::Connection(format!("Failed to connect to {}: {}", addr, e))
        })?;

        // Create framed transport with codec
        let mut framed = Framed::new(stream, FrameCodec::new());
        framed
            .send(registry.encode(&Message::Init { pid }))
            .await
            .map_err(|e| TopicsError::transport(e.to_string()))?;

        // Set up channels
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Message>(100);
        let (incoming_tx, incoming_rx) = mpsc::channel::<Message>(100);

        *state.lock() = ConnectionState::Connected;
        tracing::info!(pid, "Connected to console at {}", addr);

        let handle = tokio::spawn(Self::connection_task(
            framed,
            registry,
            outgoing_rx,
            incoming_tx,
            Arc::clone(&state),
        ));

        Ok(Self {
            addr: addr.to_string(),
            pid,
            state,
            tx: outgoing_tx,
            rx: incoming_rx,
            task_handle: Some(handle),
        })
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Disconnect from the console
    pub async fn disconnect(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
        *self.state.lock() = ConnectionState::Disconnected;
    }

    /// Send a message to the console
    pub async fn send(&self, msg: Message) -> Result<()> {
        if msg.kind().direction() != Direction::Inbound {
            return Err(TopicsError::protocol(format!(
                "{} is only sent by the console",
                msg.kind()
            )));
        }
        if self.state() != ConnectionState::Connected {
            return Err(TopicsError::connection("Not connected"));
        }

        self.tx
            .send(msg)
            .await
            .map_err(|_| TopicsError::ConnectionClosed)?;

        Ok(())
    }

    /// Receive next message from the console
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Try to receive without blocking
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Clonable handle for reporting from application threads
    pub fn sender(&self) -> ConsoleSender {
        ConsoleSender::new(self.tx.clone())
    }

    /// Feed every console message to `handler` until the connection ends
    pub async fn run<H: ConsoleHandler>(mut self, mut handler: H) {
        let console = self.sender();
        while let Some(msg) = self.recv().await {
            handler.handle(msg, &console);
        }
        handler.disconnected();
    }

    /// Background task that handles the actual socket I/O
    async fn connection_task(
        mut framed: Framed<TcpStream, FrameCodec>,
        registry: Arc<Registry>,
        mut outgoing: mpsc::Receiver<Message>,
        incoming: mpsc::Sender<Message>,
        state: Arc<Mutex<ConnectionState>>,
    ) {
        loop {
            tokio::select! {
                // Handle outgoing messages
                Some(msg) = outgoing.recv() => {
                    let body = registry.encode(&msg);
                    if let Err(e) = framed.send(body).await {
                        tracing::error!("Failed to send message: {}", e);
                        break;
                    }
                }

                // Handle incoming messages
                result = framed.next() => {
                    match result {
                        Some(Ok(body)) => {
                            let msg = match registry.decode_frame(&body) {
                                Ok(msg) => msg,
                                Err(e) if e.is_recoverable() => {
                                    tracing::warn!("Discarding frame from console: {}", e);
                                    continue;
                                }
                                Err(e) => {
                                    tracing::error!("Console frame undecodable: {}", e);
                                    break;
                                }
                            };
                            tracing::debug!(kind = %msg.kind(), "Received message from console");

                            let busy = msg == Message::Busy;
                            if busy {
                                tracing::warn!("Console is busy with another agent");
                                *state.lock() = ConnectionState::Rejected;
                            }
                            if incoming.send(msg).await.is_err() {
                                tracing::debug!("Incoming channel closed, receiver dropped");
                                break;
                            }
                            if busy {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!("Failed to receive message: {}", e);
                            break;
                        }
                        None => {
                            tracing::info!("Console closed connection");
                            break;
                        }
                    }
                }
            }
        }

        let mut state = state.lock();
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Disconnected;
        }
    }
}

impl Drop for AgentConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}
