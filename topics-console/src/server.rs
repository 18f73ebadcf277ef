//! Agent listener and duplex connection loop
//!
//! At most one agent is attached at a time. Extra connections receive a
//! `Busy` frame and are closed. The attached agent is served by a single
//! duplex task that alternates between reading inbound frames and flushing
//! the outbound queue; writers wake it through [`DuplexWaker`].

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};

use topics_protocol::{Direction, FrameCodec, Message, Registry, MAX_FRAME_SIZE};
use topics_utils::{Result, TopicsError};

use crate::collab::Outbound;
use crate::dispatch::InboundHandler;
use crate::session::Session;
use crate::waker::DuplexWaker;

/// Exit code sent to the target when the console detaches or shuts down
pub const CONSOLE_EXIT_CODE: i32 = 3;

/// Lifecycle of the agent connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingPeer,
    Active,
    /// Terminal
    ShuttingDown,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::AwaitingPeer => "awaiting agent",
            ConnectionState::Active => "active",
            ConnectionState::ShuttingDown => "shutting down",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Send `Exit` to the attached agent on detach and shutdown
    pub close_on_detach: bool,
    pub max_frame_size: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            close_on_detach: false,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// State and outbound queue, guarded together so a write can never land
/// in the queue of a connection that is already gone
struct Link {
    state: ConnectionState,
    outbound: VecDeque<Message>,
    detach_tx: Option<oneshot::Sender<()>>,
    peer: Option<SocketAddr>,
}

struct Shared {
    registry: Arc<Registry>,
    session: Arc<Session>,
    handler: Arc<dyn InboundHandler>,
    options: ServerOptions,
    link: Mutex<Link>,
    waker: DuplexWaker,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Why a duplex loop ended
enum LoopExit {
    PeerClosed,
    Transport(String),
    Detached,
    Shutdown,
}

enum LoopEvent {
    Frame(Option<std::result::Result<bytes::BytesMut, topics_protocol::CodecError>>),
    Wake,
    Detach,
    Shutdown,
}

/// Handle to the running agent server
#[derive(Clone)]
pub struct AgentServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl AgentServer {
    /// Bind `addr` and start accepting agents
    pub async fn attach_session(
        addr: &str,
        options: ServerOptions,
        registry: Arc<Registry>,
        session: Arc<Session>,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TopicsError::transport(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;
        info!("Agent listener bound to {}", local_addr);

        let (state_tx, _) = watch::channel(ConnectionState::AwaitingPeer);
        let (shutdown_tx, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            registry,
            session,
            handler,
            options,
            link: Mutex::new(Link {
                state: ConnectionState::AwaitingPeer,
                outbound: VecDeque::new(),
                detach_tx: None,
                peer: None,
            }),
            waker: DuplexWaker::new(),
            state_tx,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let shutdown_rx = shared.shutdown_tx.subscribe();
        let accept = tokio::spawn(run_accept_loop(listener, Arc::clone(&shared), shutdown_rx));
        shared.track(accept);

        Ok(Self { shared, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link.lock().state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.shared.link.lock().peer
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Queue a message for the attached agent
    pub fn write(&self, message: Message) -> Result<()> {
        let kind = message.kind();
        if kind.direction() != Direction::Outbound {
            return Err(TopicsError::protocol(format!(
                "{} is only sent by the agent",
                kind
            )));
        }

        {
            let mut link = self.shared.link.lock();
            if link.state != ConnectionState::Active {
                return Err(TopicsError::NotConnected);
            }
            link.outbound.push_back(message);
        }

        let woke = self.shared.waker.interrupt();
        trace!(%kind, woke, "queued outbound message");
        Ok(())
    }

    /// Drop the attached agent after flushing what is already queued.
    ///
    /// With `close_on_detach` the agent is told to `Exit` first.
    pub fn detach(&self) -> Result<()> {
        let detach_tx = {
            let mut link = self.shared.link.lock();
            if link.state != ConnectionState::Active {
                return Err(TopicsError::NotConnected);
            }
            if self.shared.options.close_on_detach && link.detach_tx.is_some() {
                link.outbound.push_back(Message::Exit {
                    exit_code: CONSOLE_EXIT_CODE,
                    message: "Console detached".into(),
                });
            }
            link.detach_tx.take()
        };

        if let Some(tx) = detach_tx {
            let _ = tx.send(());
        }
        Ok(())
    }

    /// Stop accepting, say goodbye to the agent and join every task
    pub async fn shutdown(&self, timeout: Duration) {
        {
            let mut link = self.shared.link.lock();
            if link.state == ConnectionState::ShuttingDown {
                return;
            }
            let was_active = link.state == ConnectionState::Active;
            link.outbound.clear();
            if was_active && self.shared.options.close_on_detach {
                link.outbound.push_back(Message::Exit {
                    exit_code: CONSOLE_EXIT_CODE,
                    message: "Console exit".into(),
                });
            }
            self.shared.set_state(&mut link, ConnectionState::ShuttingDown);
        }

        let _ = self.shared.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.shared.tasks.lock());
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => info!("Agent server stopped"),
            Err(_) => {
                warn!(
                    "Agent server tasks did not stop within {:?}, aborting",
                    timeout
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

impl Outbound for AgentServer {
    fn write(&self, message: Message) -> Result<()> {
        AgentServer::write(self, message)
    }
}

impl Shared {
    fn set_state(&self, link: &mut Link, state: ConnectionState) {
        if link.state != state {
            debug!(from = %link.state, to = %state, "connection state change");
        }
        link.state = state;
        self.state_tx.send_replace(state);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn has_pending(&self) -> bool {
        !self.link.lock().outbound.is_empty()
    }

    fn codec(&self) -> FrameCodec {
        FrameCodec::with_max_frame_size(self.options.max_frame_size)
    }

    /// Encode and write everything queued so far
    async fn flush(&self, sink: &mut FramedWrite<OwnedWriteHalf, FrameCodec>) -> Result<()> {
        let pending: Vec<Message> = self.link.lock().outbound.drain(..).collect();
        if pending.is_empty() {
            return Ok(());
        }

        for message in &pending {
            let body = self.registry.encode(message);
            sink.feed(body)
                .await
                .map_err(|e| TopicsError::transport(e.to_string()))?;
        }
        sink.flush()
            .await
            .map_err(|e| TopicsError::transport(e.to_string()))?;

        trace!(count = pending.len(), "flushed outbound messages");
        Ok(())
    }

    fn dispatch(&self, body: &[u8]) {
        match self.registry.decode_frame(body) {
            Ok(message) => {
                let kind = message.kind();
                if kind.direction() != Direction::Inbound {
                    warn!(%kind, "discarding console-only message sent by agent");
                    return;
                }
                trace!(%kind, "inbound message");
                self.handler.handle(message);
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, len = body.len(), "discarding undecodable frame");
            }
            Err(e) => {
                error!(error = %e, len = body.len(), "unexpected frame decode failure");
            }
        }
    }

    fn on_disconnect(&self, exit: LoopExit) {
        let peer = {
            let mut link = self.link.lock();
            // Undelivered messages die with the connection
            link.outbound.clear();
            link.detach_tx = None;
            // Before the slot reopens, so the next agent's Init survives
            self.session.clear();
            if link.state != ConnectionState::ShuttingDown {
                self.set_state(&mut link, ConnectionState::AwaitingPeer);
            }
            link.peer.take()
        };
        let peer = peer.map(|p| p.to_string()).unwrap_or_else(|| "?".into());

        match exit {
            LoopExit::PeerClosed => info!("Agent {} closed the connection", peer),
            LoopExit::Transport(e) => warn!("Agent {} connection failed: {}", peer, e),
            LoopExit::Detached => info!("Detached from agent {}", peer),
            LoopExit::Shutdown => debug!("Closed agent {} for shutdown", peer),
        }

        self.handler.on_disconnected();
    }
}

/// Run the agent accept loop
async fn run_accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        debug!("New agent connection from {}", peer);
                        admit(&shared, stream, peer);
                    }
                    Err(e) => {
                        error!("Agent accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping agent accept loop");
                break;
            }
        }
    }
}

fn admit(shared: &Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    // Subscribe before looking at the state so a concurrent shutdown
    // cannot slip between the check and the subscription
    let shutdown_rx = shared.shutdown_tx.subscribe();

    let admitted = {
        let mut link = shared.link.lock();
        match link.state {
            ConnectionState::AwaitingPeer => {
                let (detach_tx, detach_rx) = oneshot::channel();
                link.outbound.clear();
                link.detach_tx = Some(detach_tx);
                link.peer = Some(peer);
                shared.set_state(&mut link, ConnectionState::Active);
                Some(detach_rx)
            }
            ConnectionState::Active => None,
            ConnectionState::ShuttingDown => {
                debug!("Dropping agent connection from {} during shutdown", peer);
                return;
            }
        }
    };

    match admitted {
        Some(detach_rx) => {
            shared.handler.on_connected(peer);
            let task = tokio::spawn(run_duplex_loop(
                Arc::clone(shared),
                stream,
                detach_rx,
                shutdown_rx,
            ));
            shared.track(task);
        }
        None => {
            info!("Rejecting agent {}: another agent is attached", peer);
            let task = tokio::spawn(reject_busy(Arc::clone(shared), stream, peer));
            shared.track(task);
        }
    }
}

async fn reject_busy(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let body = shared.registry.encode(&Message::Busy);
    let mut framed = FramedWrite::new(stream, shared.codec());
    if let Err(e) = framed.send(body).await {
        debug!("Failed to send Busy to {}: {}", peer, e);
    }
    // Dropping the stream closes it
}

async fn run_duplex_loop(
    shared: Arc<Shared>,
    stream: TcpStream,
    mut detach_rx: oneshot::Receiver<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (reader, writer) = stream.into_split();
    let mut inbound = FramedRead::new(reader, shared.codec());
    let mut outbound = FramedWrite::new(writer, shared.codec());

    let exit = loop {
        if let Err(e) = shared.flush(&mut outbound).await {
            break LoopExit::Transport(e.to_string());
        }

        shared.waker.park();
        if shared.has_pending() {
            shared.waker.unpark();
            continue;
        }

        let event = tokio::select! {
            frame = inbound.next() => LoopEvent::Frame(frame),
            _ = shared.waker.woken() => LoopEvent::Wake,
            _ = &mut detach_rx => LoopEvent::Detach,
            _ = shutdown_rx.recv() => LoopEvent::Shutdown,
        };
        shared.waker.unpark();

        match event {
            LoopEvent::Frame(Some(Ok(body))) => shared.dispatch(&body),
            LoopEvent::Frame(Some(Err(e))) if e.is_recoverable() => {
                warn!("Skipping bad frame: {}", e);
            }
            LoopEvent::Frame(Some(Err(e))) => break LoopExit::Transport(e.to_string()),
            LoopEvent::Frame(None) => break LoopExit::PeerClosed,
            LoopEvent::Wake => trace!("duplex loop woken for outbound"),
            LoopEvent::Detach => {
                if let Err(e) = shared.flush(&mut outbound).await {
                    debug!("Flush before detach failed: {}", e);
                }
                break LoopExit::Detached;
            }
            LoopEvent::Shutdown => {
                if let Err(e) = shared.flush(&mut outbound).await {
                    debug!("Flush before shutdown failed: {}", e);
                }
                break LoopExit::Shutdown;
            }
        }
    };

    shared.on_disconnect(exit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SessionDispatcher;
    use bytes::Bytes;

    type AgentRead = FramedRead<tokio::net::tcp::OwnedReadHalf, FrameCodec>;
    type AgentWrite = FramedWrite<OwnedWriteHalf, FrameCodec>;

    struct TestAgent {
        read: AgentRead,
        write: AgentWrite,
        registry: Arc<Registry>,
    }

    impl TestAgent {
        async fn connect(addr: SocketAddr, registry: Arc<Registry>) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (r, w) = stream.into_split();
            Self {
                read: FramedRead::new(r, FrameCodec::new()),
                write: FramedWrite::new(w, FrameCodec::new()),
                registry,
            }
        }

        async fn send(&mut self, message: &Message) {
            let body = self.registry.encode(message);
            self.write.send(body).await.unwrap();
        }

        async fn send_raw(&mut self, body: Bytes) {
            self.write.send(body).await.unwrap();
        }

        async fn recv(&mut self) -> Option<Message> {
            let frame = tokio::time::timeout(Duration::from_secs(2), self.read.next())
                .await
                .expect("timed out waiting for frame")?;
            Some(self.registry.decode_frame(&frame.ok()?).unwrap())
        }

        async fn assert_silent(&mut self) {
            let next = tokio::time::timeout(Duration::from_millis(200), self.read.next()).await;
            assert!(next.is_err(), "unexpected frame: {:?}", next);
        }
    }

    async fn start(options: ServerOptions) -> (AgentServer, Arc<Session>, Arc<Registry>) {
        let registry = Arc::new(Registry::standard().unwrap());
        let session = Arc::new(Session::new(8));
        let handler = Arc::new(SessionDispatcher::new(Arc::clone(&session)));
        let server = AgentServer::attach_session(
            "127.0.0.1:0",
            options,
            Arc::clone(&registry),
            Arc::clone(&session),
            handler,
        )
        .await
        .unwrap();
        (server, session, registry)
    }

    async fn wait_for_state(server: &AgentServer, target: ConnectionState) {
        let mut rx = server.subscribe_state();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached")
            .unwrap();
    }

    async fn wait_for_pid(session: &Session, pid: i32) {
        for _ in 0..200 {
            if session.pid() == Some(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pid {} never recorded", pid);
    }

    #[tokio::test]
    async fn test_init_then_instrumentation_request() {
        let (server, session, registry) = start(ServerOptions::default()).await;
        assert_eq!(server.state(), ConnectionState::AwaitingPeer);

        let mut agent = TestAgent::connect(server.local_addr(), registry).await;
        agent.send(&Message::Init { pid: 42 }).await;

        wait_for_pid(&session, 42).await;
        assert_eq!(server.state(), ConnectionState::Active);

        let request = Message::RequestMethodInstrumentation {
            class_name: "com.example.Foo".into(),
            method_name: "bar".into(),
            descriptor: "()V".into(),
        };
        server.write(request.clone()).unwrap();
        assert_eq!(agent.recv().await, Some(request));
        agent.assert_silent().await;

        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_second_agent_gets_busy() {
        let (server, session, registry) = start(ServerOptions::default()).await;

        let mut first = TestAgent::connect(server.local_addr(), Arc::clone(&registry)).await;
        first.send(&Message::Init { pid: 1 }).await;
        wait_for_pid(&session, 1).await;

        let mut second = TestAgent::connect(server.local_addr(), Arc::clone(&registry)).await;
        assert_eq!(second.recv().await, Some(Message::Busy));
        assert_eq!(second.recv().await, None);

        // The first agent is still served
        assert_eq!(server.state(), ConnectionState::Active);
        server.write(Message::Resume { thread_id: 5 }).unwrap();
        assert_eq!(first.recv().await, Some(Message::Resume { thread_id: 5 }));

        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_peer_close_returns_to_awaiting() {
        let (server, session, registry) = start(ServerOptions::default()).await;

        let mut agent = TestAgent::connect(server.local_addr(), Arc::clone(&registry)).await;
        agent.send(&Message::Init { pid: 7 }).await;
        wait_for_pid(&session, 7).await;

        drop(agent);
        wait_for_state(&server, ConnectionState::AwaitingPeer).await;

        assert!(session.pid().is_none());
        assert!(matches!(
            server.write(Message::Resume { thread_id: 1 }),
            Err(TopicsError::NotConnected)
        ));

        // The slot is free again
        let mut again = TestAgent::connect(server.local_addr(), registry).await;
        again.send(&Message::Init { pid: 8 }).await;
        wait_for_pid(&session, 8).await;

        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_immediate_reconnect_keeps_new_pid() {
        let (server, session, registry) = start(ServerOptions::default()).await;
        let mut state_rx = server.subscribe_state();

        for round in 0..20 {
            let pid = 100 + round;
            let mut agent = TestAgent::connect(server.local_addr(), Arc::clone(&registry)).await;
            agent.send(&Message::Init { pid }).await;
            agent
                .send(&Message::BreakpointHit {
                    breakpoint_id: 1,
                    class_name: "com.example.Foo".into(),
                    line: 10,
                    thread_id: 1,
                    thread_name: "main".into(),
                    frames: Vec::new(),
                    locals: Vec::new(),
                })
                .await;
            wait_for_pid(&session, pid).await;
            for _ in 0..200 {
                if session.current_breakpoint().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert!(session.current_breakpoint().is_some());

            drop(agent);
            tokio::time::timeout(
                Duration::from_secs(2),
                state_rx.wait_for(|s| *s == ConnectionState::AwaitingPeer),
            )
            .await
            .expect("agent never released")
            .unwrap();

            // The old connection is fully cleared once the slot reopens
            assert!(session.pid().is_none());
            assert!(session.current_breakpoint().is_none());

            let mut next = TestAgent::connect(server.local_addr(), Arc::clone(&registry)).await;
            next.send(&Message::Init { pid: pid + 1000 }).await;
            wait_for_pid(&session, pid + 1000).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(session.pid(), Some(pid + 1000));

            drop(next);
            tokio::time::timeout(
                Duration::from_secs(2),
                state_rx.wait_for(|s| *s == ConnectionState::AwaitingPeer),
            )
            .await
            .expect("agent never released")
            .unwrap();
        }

        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_oversized_frame_drops_connection() {
        let options = ServerOptions {
            max_frame_size: 64,
            ..ServerOptions::default()
        };
        let (server, session, registry) = start(options).await;

        let mut agent = TestAgent::connect(server.local_addr(), registry).await;
        agent.send(&Message::Init { pid: 3 }).await;
        wait_for_pid(&session, 3).await;

        agent.send_raw(Bytes::from(vec![0u8; 128])).await;
        wait_for_state(&server, ConnectionState::AwaitingPeer).await;
        assert!(session.pid().is_none());

        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_bad_frames_are_skipped() {
        let (server, session, registry) = start(ServerOptions::default()).await;
        let mut agent = TestAgent::connect(server.local_addr(), registry).await;

        // Unknown id, truncated Init, then a console-only kind
        agent.send_raw(Bytes::from_static(&[0, 0, 0, 99])).await;
        agent.send_raw(Bytes::from_static(&[0, 0, 0, 0, 1])).await;
        agent.send(&Message::Busy).await;
        agent.send(&Message::Init { pid: 11 }).await;

        wait_for_pid(&session, 11).await;
        assert_eq!(server.state(), ConnectionState::Active);

        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_write_rejects_inbound_kind() {
        let (server, _session, _registry) = start(ServerOptions::default()).await;
        assert!(matches!(
            server.write(Message::Init { pid: 1 }),
            Err(TopicsError::Protocol(_))
        ));
        assert!(matches!(
            server.write(Message::Exit {
                exit_code: 0,
                message: String::new()
            }),
            Err(TopicsError::NotConnected)
        ));
        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_burst_of_writes_arrives_in_order() {
        let (server, session, registry) = start(ServerOptions::default()).await;
        let mut agent = TestAgent::connect(server.local_addr(), registry).await;
        agent.send(&Message::Init { pid: 2 }).await;
        wait_for_pid(&session, 2).await;

        for id in 0..50 {
            server.write(Message::ClearBreakpoint { breakpoint_id: id }).unwrap();
        }
        for id in 0..50 {
            assert_eq!(
                agent.recv().await,
                Some(Message::ClearBreakpoint { breakpoint_id: id })
            );
        }

        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_detach_closes_agent() {
        let (server, session, registry) = start(ServerOptions::default()).await;
        let mut agent = TestAgent::connect(server.local_addr(), registry).await;
        agent.send(&Message::Init { pid: 4 }).await;
        wait_for_pid(&session, 4).await;

        server.write(Message::Resume { thread_id: 9 }).unwrap();
        server.detach().unwrap();

        assert_eq!(agent.recv().await, Some(Message::Resume { thread_id: 9 }));
        assert_eq!(agent.recv().await, None);
        wait_for_state(&server, ConnectionState::AwaitingPeer).await;
        assert!(matches!(server.detach(), Err(TopicsError::NotConnected)));

        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_detach_sends_exit_when_configured() {
        let options = ServerOptions {
            close_on_detach: true,
            ..ServerOptions::default()
        };
        let (server, session, registry) = start(options).await;
        let mut agent = TestAgent::connect(server.local_addr(), registry).await;
        agent.send(&Message::Init { pid: 6 }).await;
        wait_for_pid(&session, 6).await;

        server.write(Message::Resume { thread_id: 2 }).unwrap();
        server.detach().unwrap();

        assert_eq!(agent.recv().await, Some(Message::Resume { thread_id: 2 }));
        assert_eq!(
            agent.recv().await,
            Some(Message::Exit {
                exit_code: CONSOLE_EXIT_CODE,
                message: "Console detached".into()
            })
        );
        assert_eq!(agent.recv().await, None);
        wait_for_state(&server, ConnectionState::AwaitingPeer).await;

        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_detach_without_close_sends_no_exit() {
        let (server, session, registry) = start(ServerOptions::default()).await;
        let mut agent = TestAgent::connect(server.local_addr(), registry).await;
        agent.send(&Message::Init { pid: 12 }).await;
        wait_for_pid(&session, 12).await;

        server.detach().unwrap();
        assert_eq!(agent.recv().await, None);

        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_peer_is_reported_while_active() {
        let (server, session, registry) = start(ServerOptions::default()).await;
        assert!(server.peer().is_none());

        let mut agent = TestAgent::connect(server.local_addr(), registry).await;
        agent.send(&Message::Init { pid: 13 }).await;
        wait_for_pid(&session, 13).await;
        assert_eq!(server.peer().map(|p| p.ip()), Some(server.local_addr().ip()));

        drop(agent);
        wait_for_state(&server, ConnectionState::AwaitingPeer).await;
        assert!(server.peer().is_none());

        server.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_shutdown_sends_exit_when_configured() {
        let options = ServerOptions {
            close_on_detach: true,
            ..ServerOptions::default()
        };
        let (server, session, registry) = start(options).await;
        let mut agent = TestAgent::connect(server.local_addr(), registry).await;
        agent.send(&Message::Init { pid: 5 }).await;
        wait_for_pid(&session, 5).await;

        server.shutdown(Duration::from_secs(2)).await;

        assert_eq!(
            agent.recv().await,
            Some(Message::Exit {
                exit_code: CONSOLE_EXIT_CODE,
                message: "Console exit".into()
            })
        );
        assert_eq!(agent.recv().await, None);
        assert_eq!(server.state(), ConnectionState::ShuttingDown);
    }

    #[tokio::test]
    async fn test_shutdown_without_agent_stops_accepting() {
        let (server, _session, _registry) = start(ServerOptions::default()).await;
        let addr = server.local_addr();

        tokio::time::timeout(Duration::from_secs(2), server.shutdown(Duration::from_secs(1)))
            .await
            .expect("shutdown hung");

        assert_eq!(server.state(), ConnectionState::ShuttingDown);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_failure_is_transport_error() {
        let (server, session, registry) = start(ServerOptions::default()).await;
        let addr = server.local_addr().to_string();

        let result = AgentServer::attach_session(
            &addr,
            ServerOptions::default(),
            registry,
            Arc::clone(&session),
            Arc::new(SessionDispatcher::new(session)),
        )
        .await;
        assert!(matches!(result, Err(TopicsError::Transport(_))));

        server.shutdown(Duration::from_secs(2)).await;
    }
}
