//! Connection state machine for MiniTel-Lite.
//!
//! [`MiniTelClient`] owns one TCP connection. Commands are strictly
//! half-duplex: each `send_*` call writes one frame and waits for the single
//! response that answers it. A background reader task feeds socket bytes
//! through a [`StreamAssembler`] and validates every frame against the
//! outstanding exchange.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ connect ┌────────────┐  tcp up  ┌───────────┐
//! │ Disconnected │────────>│ Connecting │─────────>│ Connected │<──┐
//! └──────────────┘         └────────────┘          └───────────┘   │ response
//!        ▲                                            │ send_*     │
//!        │                                            ▼            │
//!        │     ┌────────────┐  close / violation ┌──────────────────┐
//!        └─────│ Terminated │<───────────────────│ AwaitingResponse │
//!              └────────────┘                    └──────────────────┘
//! ```
//!
//! # Sequencing
//!
//! The nonce starts at 0 on every connect. Each request is sent with the
//! current nonce, its response must carry `nonce + 1`, and the counter then
//! moves on by 2 whether the command succeeded or not. Any deviation is fatal
//! to the connection.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};

use minitel_protocol::{encode, Command, Frame, ProtocolError, Result, StreamAssembler};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::{AbortHandle, JoinHandle};

use crate::events::{ClientEvent, Direction, EVENT_BUFFER_SIZE};

/// Default timeout for establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Amount the nonce advances per request/response round trip.
pub const NONCE_STEP: u32 = 2;

/// Size of a single socket read.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Connection state of a [`MiniTelClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Connected, no command outstanding.
    Connected,
    /// Connected, one command awaiting its response.
    AwaitingResponse,
    /// Connection is being torn down after a close or a fatal error.
    Terminated,
}

/// Read-only copy of the client's protocol state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSnapshot {
    /// Connection state at the time of the snapshot.
    pub state: ConnectionState,
    /// Nonce the next request will carry.
    pub current_nonce: u32,
    /// Last request written on this connection.
    pub last_command: Option<Command>,
    /// DUMP requests answered with DUMP_OK on this connection.
    pub dump_success_count: u32,
}

impl ClientSnapshot {
    /// Returns whether the connection is open.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::AwaitingResponse
        )
    }
}

/// The single request awaiting its response.
struct PendingExchange {
    command: Command,
    sent_nonce: u32,
    reply: oneshot::Sender<Result<Frame>>,
}

/// Why a connection is being torn down.
enum Teardown {
    /// The peer closed the socket.
    PeerClosed,
    /// A read or write on the socket failed.
    Transport(ProtocolError),
    /// A protocol violation or an expired response deadline.
    Fatal(ProtocolError),
}

/// Everything mutated by commands and by the reader task.
struct Session {
    state: ConnectionState,
    nonce: u32,
    last_command: Option<Command>,
    last_sent_nonce: Option<u32>,
    dump_success_count: u32,
    pending: Option<PendingExchange>,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
    /// Incremented on every connect attempt.
    connection_id: u64,
    events: broadcast::Sender<ClientEvent>,
}

impl Session {
    fn new(events: broadcast::Sender<ClientEvent>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            nonce: 0,
            last_command: None,
            last_sent_nonce: None,
            dump_success_count: 0,
            pending: None,
            writer: None,
            reader: None,
            connection_id: 0,
            events,
        }
    }

    fn emit(&self, event: ClientEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            state: self.state,
            current_nonce: self.nonce,
            last_command: self.last_command,
            dump_success_count: self.dump_success_count,
        }
    }

    /// Reset the per-connection counters for a fresh connection.
    fn reset_sequence(&mut self) {
        self.nonce = 0;
        self.last_command = None;
        self.last_sent_nonce = None;
        self.dump_success_count = 0;
        self.pending = None;
    }

    /// Record a request that has just been written to the socket.
    fn record_sent(&mut self, command: Command, nonce: u32) -> oneshot::Receiver<Result<Frame>> {
        let (reply, rx) = oneshot::channel();
        self.pending = Some(PendingExchange {
            command,
            sent_nonce: nonce,
            reply,
        });
        self.state = ConnectionState::AwaitingResponse;
        self.last_command = Some(command);
        self.last_sent_nonce = Some(nonce);
        self.nonce = nonce.wrapping_add(NONCE_STEP);

        self.emit(ClientEvent::FrameTransmitted {
            direction: Direction::Outgoing,
            command: command.name(),
            nonce,
            payload_size: 0,
            timestamp: SystemTime::now(),
        });
        rx
    }

    /// Validate an incoming frame and resolve the outstanding exchange.
    fn accept_frame(&mut self, frame: Frame) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Err(self.unsolicited(&frame));
        };

        let expected = pending.sent_nonce.wrapping_add(1);
        if frame.nonce != expected {
            self.pending = Some(pending);
            return Err(ProtocolError::InvalidNonce {
                expected,
                got: frame.nonce,
            });
        }

        let accepted = pending.command.accepted_responses();
        let Some(response) = frame.known_command().filter(|c| accepted.contains(c)) else {
            self.pending = Some(pending);
            return Err(ProtocolError::UnexpectedResponse {
                command: frame.command,
                nonce: frame.nonce,
            });
        };

        if response == Command::DumpOk {
            self.dump_success_count += 1;
        }
        self.state = ConnectionState::Connected;

        tracing::debug!(
            "{} answered {} (nonce {})",
            response,
            pending.command,
            frame.nonce
        );

        self.emit(ClientEvent::FrameTransmitted {
            direction: Direction::Incoming,
            command: response.name(),
            nonce: frame.nonce,
            payload_size: frame.payload.len(),
            timestamp: SystemTime::now(),
        });
        self.emit(ClientEvent::FrameReceived(frame.clone()));

        // The caller may have given up (timeout or dropped future)
        let _ = pending.reply.send(Ok(frame));
        Ok(())
    }

    /// Error for a frame that arrived with nothing outstanding.
    fn unsolicited(&self, frame: &Frame) -> ProtocolError {
        match self.last_sent_nonce {
            Some(sent) if frame.nonce != sent.wrapping_add(1) => ProtocolError::InvalidNonce {
                expected: sent.wrapping_add(1),
                got: frame.nonce,
            },
            _ => ProtocolError::UnexpectedResponse {
                command: frame.command,
                nonce: frame.nonce,
            },
        }
    }

    /// Close the connection, reject the pending exchange and notify subscribers.
    ///
    /// `stop_reader` is false when called from the reader task itself.
    fn terminate(&mut self, reason: Teardown, stop_reader: bool) {
        self.state = ConnectionState::Terminated;
        let pending = self.pending.take();

        let (error, rejection) = match reason {
            Teardown::PeerClosed => {
                tracing::info!("Server closed the connection");
                let error = pending
                    .as_ref()
                    .map(|_| ProtocolError::UnexpectedDisconnection);
                (error, ProtocolError::UnexpectedDisconnection)
            }
            Teardown::Transport(err) => {
                tracing::warn!("Transport failure: {}", err);
                (Some(err), ProtocolError::UnexpectedDisconnection)
            }
            Teardown::Fatal(err) => {
                tracing::error!("Fatal protocol error, closing connection: {}", err);
                (Some(err.clone()), err)
            }
        };

        if let Some(error) = error {
            self.emit(ClientEvent::Error(error));
        }
        if let Some(pending) = pending {
            let _ = pending.reply.send(Err(rejection));
        }

        // Dropping the write half sends FIN
        self.writer = None;
        if let Some(reader) = self.reader.take() {
            if stop_reader {
                reader.abort();
            }
        }

        self.state = ConnectionState::Disconnected;
        self.emit(ClientEvent::Disconnected);
    }
}

/// MiniTel-Lite protocol client.
///
/// Owns at most one connection at a time. All protocol state lives in a
/// session shared with the reader task; commands and frame processing are
/// serialized through its lock.
pub struct MiniTelClient {
    session: Arc<Mutex<Session>>,
    events: broadcast::Sender<ClientEvent>,
    /// Abort handle of the latest reader task, reachable without the session lock.
    reader_abort: StdMutex<Option<AbortHandle>>,
    /// Optional bound on how long a command waits for its response.
    response_timeout: Option<Duration>,
}

impl Default for MiniTelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MiniTelClient {
    /// Creates a disconnected client with no response timeout.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            session: Arc::new(Mutex::new(Session::new(events.clone()))),
            events,
            reader_abort: StdMutex::new(None),
            response_timeout: None,
        }
    }

    /// Bounds how long each command waits for its response.
    ///
    /// When the deadline elapses the command fails with
    /// [`ProtocolError::ResponseTimeout`] and the connection is closed, since
    /// a late response would break nonce sequencing.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Returns the configured response timeout.
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }

    /// Subscribes to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Returns a copy of the current protocol state.
    pub async fn snapshot(&self) -> ClientSnapshot {
        self.session.lock().await.snapshot()
    }

    /// Returns whether the connection is open.
    pub async fn is_connected(&self) -> bool {
        self.snapshot().await.is_connected()
    }

    /// Opens the TCP connection.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::AlreadyConnected`] if a connection is open or opening
    /// - [`ProtocolError::ConnectTimeout`] if `timeout` elapses first
    /// - [`ProtocolError::ConnectionError`] if the transport refuses or fails
    /// - [`ProtocolError::ConnectCancelled`] if [`disconnect`](Self::disconnect)
    ///   ran before the connect completed
    pub async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let addr = format!("{}:{}", host, port);
        let attempt = {
            let mut session = self.session.lock().await;
            match session.state {
                ConnectionState::Disconnected | ConnectionState::Terminated => {}
                _ => return Err(ProtocolError::AlreadyConnected),
            }
            session.state = ConnectionState::Connecting;
            session.connection_id += 1;
            session.connection_id
        };

        tracing::info!("Connecting to {}", addr);
        let outcome = tokio::time::timeout(timeout, TcpStream::connect((host, port))).await;

        let mut session = self.session.lock().await;
        if session.state != ConnectionState::Connecting || session.connection_id != attempt {
            tracing::info!("Connect to {} cancelled", addr);
            return Err(ProtocolError::ConnectCancelled);
        }
        let stream = match outcome {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                let err = ProtocolError::connection(addr, &err);
                return Err(Self::connect_failed(&mut session, err));
            }
            Err(_) => {
                let err = ProtocolError::ConnectTimeout {
                    addr,
                    timeout_ms: timeout.as_millis() as u64,
                };
                return Err(Self::connect_failed(&mut session, err));
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", err);
        }
        let (read_half, write_half) = stream.into_split();

        session.reset_sequence();
        session.writer = Some(write_half);
        session.state = ConnectionState::Connected;
        let reader = tokio::spawn(read_loop(Arc::clone(&self.session), read_half));
        if let Ok(mut slot) = self.reader_abort.lock() {
            *slot = Some(reader.abort_handle());
        }
        session.reader = Some(reader);

        tracing::info!("Connected to {}", addr);
        session.emit(ClientEvent::Connected);
        Ok(())
    }

    fn connect_failed(session: &mut Session, err: ProtocolError) -> ProtocolError {
        tracing::warn!("Connection attempt failed: {}", err);
        session.state = ConnectionState::Disconnected;
        session.emit(ClientEvent::Error(err.clone()));
        err
    }

    /// Sends HELLO and waits for HELLO_ACK.
    pub async fn send_hello(&self) -> Result<Frame> {
        self.exchange(Command::Hello).await
    }

    /// Sends DUMP and waits for DUMP_OK or DUMP_FAILED.
    ///
    /// Both responses resolve successfully; inspect the frame's command to
    /// tell them apart. Requires a previously dispatched command.
    pub async fn send_dump(&self) -> Result<Frame> {
        self.exchange(Command::Dump).await
    }

    /// Sends STOP and waits for STOP_OK.
    pub async fn send_stop(&self) -> Result<Frame> {
        self.exchange(Command::Stop).await
    }

    /// Closes the connection.
    ///
    /// An outstanding command is dropped rather than rejected with a
    /// protocol error; its caller observes [`ProtocolError::ExchangeCancelled`].
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;

        let was_open = session.writer.is_some();
        if let Some(mut writer) = session.writer.take() {
            if let Err(err) = writer.shutdown().await {
                tracing::debug!("Error shutting down connection: {}", err);
            }
        }
        if let Some(reader) = session.reader.take() {
            reader.abort();
        }
        session.pending = None;
        session.state = ConnectionState::Disconnected;

        if was_open {
            tracing::info!("Disconnected");
            session.emit(ClientEvent::Disconnected);
        }
    }

    async fn exchange(&self, command: Command) -> Result<Frame> {
        let (connection_id, sent_nonce, mut reply) = {
            let mut session = self.session.lock().await;

            match session.state {
                ConnectionState::Connected => {}
                ConnectionState::AwaitingResponse => {
                    let (name, nonce) = session
                        .pending
                        .as_ref()
                        .map_or((command.name(), session.nonce), |p| {
                            (p.command.name(), p.sent_nonce)
                        });
                    return Err(ProtocolError::CommandInFlight {
                        command: name,
                        nonce,
                    });
                }
                _ => return Err(ProtocolError::NotConnected),
            }

            if command == Command::Dump && session.last_command.is_none() {
                return Err(ProtocolError::HelloRequired);
            }

            let nonce = session.nonce;
            let wire = encode(command.code(), nonce, &[])?;

            let Some(writer) = session.writer.as_mut() else {
                return Err(ProtocolError::NotConnected);
            };
            let written = writer.write_all(&wire).await;
            if let Err(err) = written {
                let err = ProtocolError::from(err);
                session.terminate(Teardown::Transport(err.clone()), true);
                return Err(err);
            }

            tracing::debug!("Sent {} (nonce {})", command, nonce);
            let reply = session.record_sent(command, nonce);
            (session.connection_id, nonce, reply)
        };

        let outcome = match self.response_timeout {
            None => reply.await,
            Some(limit) => match tokio::time::timeout(limit, &mut reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return self
                        .expire(connection_id, command, sent_nonce, limit, reply)
                        .await
                }
            },
        };

        // A dropped sender means disconnect() discarded the exchange
        outcome.unwrap_or(Err(ProtocolError::ExchangeCancelled))
    }

    /// Handles an elapsed response deadline.
    async fn expire(
        &self,
        connection_id: u64,
        command: Command,
        nonce: u32,
        limit: Duration,
        mut reply: oneshot::Receiver<Result<Frame>>,
    ) -> Result<Frame> {
        let mut session = self.session.lock().await;

        // The exchange may have settled between the deadline and the lock
        match reply.try_recv() {
            Ok(result) => return result,
            Err(TryRecvError::Closed) => return Err(ProtocolError::ExchangeCancelled),
            Err(TryRecvError::Empty) => {}
        }

        let err = ProtocolError::ResponseTimeout {
            command: command.name(),
            nonce,
            timeout_ms: limit.as_millis() as u64,
        };
        let still_pending = session.connection_id == connection_id
            && session
                .pending
                .as_ref()
                .is_some_and(|p| p.sent_nonce == nonce);
        if still_pending {
            session.terminate(Teardown::Fatal(err.clone()), true);
        }
        Err(err)
    }
}

impl Drop for MiniTelClient {
    fn drop(&mut self) {
        // The reader holds the session; aborting it releases the socket
        if let Ok(slot) = self.reader_abort.get_mut() {
            if let Some(reader) = slot.take() {
                reader.abort();
            }
        }
    }
}

/// Reads from the socket until it closes or a fatal error occurs.
async fn read_loop(shared: Arc<Mutex<Session>>, mut reader: OwnedReadHalf) {
    let mut assembler = StreamAssembler::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = reader.read(&mut buf).await;
        let mut session = shared.lock().await;

        let n = match read {
            Ok(0) => {
                session.terminate(Teardown::PeerClosed, false);
                return;
            }
            Ok(n) => n,
            Err(err) => {
                session.terminate(Teardown::Transport(err.into()), false);
                return;
            }
        };
        tracing::trace!("Read {} bytes", n);

        for result in assembler.push(&buf[..n]) {
            if let Err(err) = result.and_then(|frame| session.accept_frame(frame)) {
                session.terminate(Teardown::Fatal(err), false);
                return;
            }
        }
    }
}
