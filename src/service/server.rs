// Copyright 2025 pebblemq contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use crate::network::{
    Connection, ConnectionId, ConnectionRegistry, ConnectionState, ReadState,
};
use crate::service::dispatcher::FrameDispatcher;
use crate::service::{BrokerError, BrokerResult, NetworkConfig};

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const FIRST_CONNECTION_TOKEN: usize = 2;

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_EVENTS: usize = 128;

/// Requests delivered to the reactor from other threads through the
/// command channel, each followed by a waker nudge.
#[derive(Debug)]
pub enum Command {
    /// Enqueue a fully built payload on an established connection; the
    /// entry point for an out-of-scope delivery layer.
    Deliver {
        connection_id: ConnectionId,
        payload: Bytes,
    },
    /// Tear a connection down on behalf of an external collaborator, e.g. a
    /// keep-alive expiry.
    Disconnect { connection_id: ConnectionId },
    /// Stop the reactor after the current poll cycle.
    Shutdown,
}

/// Why a connection is being torn down; picks the log level.
enum Teardown {
    PeerClosed,
    Error(BrokerError),
    Requested(&'static str),
}

/// Cross-thread handle to a running reactor.
#[derive(Clone)]
pub struct ServerHandle {
    command_tx: Sender<Command>,
    waker: Arc<Waker>,
    running: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn deliver(&self, connection_id: ConnectionId, payload: Bytes) -> BrokerResult<()> {
        self.send(Command::Deliver {
            connection_id,
            payload,
        })
    }

    pub fn disconnect(&self, connection_id: ConnectionId) -> BrokerResult<()> {
        self.send(Command::Disconnect { connection_id })
    }

    pub fn shutdown(&self) -> BrokerResult<()> {
        self.send(Command::Shutdown)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn send(&self, command: Command) -> BrokerResult<()> {
        self.command_tx
            .send(command)
            .map_err(|e| BrokerError::ChannelSend(e.to_string()))?;
        self.waker.wake()?;
        Ok(())
    }
}

/// Single-threaded, readiness-driven reactor.
///
/// One thread owns the listener, the registry and every connection; nothing
/// here is shared or locked. The loop never waits on an individual socket:
/// a read or write that would block is deferred to the next readiness
/// notification, so one slow peer cannot stall the rest. All per-connection
/// failures are contained by tearing down that connection; the loop itself
/// keeps serving.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    connections: ConnectionRegistry,
    dispatcher: FrameDispatcher,
    next_token: usize,
    command_rx: Receiver<Command>,
    running: Arc<AtomicBool>,
    config: NetworkConfig,
    local_addr: SocketAddr,
}

impl Server {
    /// Registers the listener and the waker with a fresh poll instance.
    /// Failure here is startup failure and is fatal to the caller.
    pub fn new(
        mut listener: TcpListener,
        dispatcher: FrameDispatcher,
        config: NetworkConfig,
    ) -> BrokerResult<(Server, ServerHandle)> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (command_tx, command_rx) = channel();
        let running = Arc::new(AtomicBool::new(true));
        let local_addr = listener.local_addr()?;

        let server = Server {
            poll,
            listener,
            connections: ConnectionRegistry::new(),
            dispatcher,
            next_token: FIRST_CONNECTION_TOKEN,
            command_rx,
            running: running.clone(),
            config,
            local_addr,
        };
        let handle = ServerHandle {
            command_tx,
            waker,
            running,
        };
        Ok((server, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the readiness loop until a shutdown command arrives or every
    /// handle is dropped.
    pub fn run(mut self) -> BrokerResult<()> {
        let mut events = Events::with_capacity(MAX_EVENTS);
        info!("reactor listening on {}", self.local_addr);

        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!("poll failed: {}", e);
                continue;
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.on_acceptable(),
                    WAKER_TOKEN => {}
                    token => {
                        if event.is_readable() {
                            self.on_readable(token);
                        }
                        // the read path may have torn the connection down in
                        // this same cycle; the registry lookup below no-ops
                        if event.is_writable() {
                            self.on_writable(token);
                        }
                    }
                }
            }

            self.drain_commands();
        }

        for (_, mut connection) in self.connections.drain() {
            debug!(
                peer = connection.peer_description(),
                "closing connection on shutdown"
            );
            let _ = self.poll.registry().deregister(connection.stream_mut());
        }
        info!("reactor stopped");
        Ok(())
    }

    /// Accepts until the listener reports would-block, so a burst of
    /// connections is not starved under edge-triggered readiness.
    fn on_acceptable(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    if self.connections.len() >= self.config.max_connections {
                        warn!(%peer_addr, "connection limit reached, refusing");
                        drop(stream);
                        continue;
                    }
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    let _ = stream.set_nodelay(true);
                    let mut connection = Connection::new(stream, token, peer_addr, &self.config);
                    if let Err(e) = self.poll.registry().register(
                        connection.stream_mut(),
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        error!("failed to register accepted connection: {}", e);
                        continue;
                    }
                    info!(
                        peer = connection.peer_description(),
                        clients = self.connections.len() + 1,
                        "new connection"
                    );
                    self.connections.insert(token, connection);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("could not accept connection: {}", e);
                    break;
                }
            }
        }
    }

    /// Reads until the socket blocks, decoding and dispatching every
    /// complete frame after each read; a single readiness event may carry
    /// several frames.
    fn on_readable(&mut self, token: Token) {
        loop {
            let Some(connection) = self.connections.get_mut(token) else {
                return;
            };
            if connection.state() == ConnectionState::Closing {
                return;
            }
            match connection.receive() {
                Ok(ReadState::Closed) => {
                    self.teardown(token, Teardown::PeerClosed);
                    return;
                }
                Ok(ReadState::Blocked) => break,
                Ok(ReadState::Received(n)) => {
                    debug!("read {} bytes from client", n);
                    if let Err(e) = self.decode_and_dispatch(token) {
                        self.teardown(token, Teardown::Error(e));
                        return;
                    }
                }
                Err(e) => {
                    self.teardown(token, Teardown::Error(e));
                    return;
                }
            }
        }
        // handlers may have enqueued responses; flush them now instead of
        // waiting for a writability event that may already have fired
        self.on_writable(token);
    }

    fn decode_and_dispatch(&mut self, token: Token) -> BrokerResult<()> {
        loop {
            let Some(connection) = self.connections.get_mut(token) else {
                return Ok(());
            };
            if connection.state() == ConnectionState::Closing {
                return Ok(());
            }
            let Some(frame) = connection.next_frame()? else {
                return Ok(());
            };
            debug!(
                peer = connection.peer_description(),
                length = frame.remaining_length,
                "frame complete"
            );
            self.dispatcher.dispatch(connection, frame)?;
        }
    }

    /// Drains the connection's outbound queue until it empties or the
    /// socket blocks; a blocked queue resumes on the next writability
    /// event.
    fn on_writable(&mut self, token: Token) {
        let Some(connection) = self.connections.get_mut(token) else {
            return;
        };
        if connection.state() == ConnectionState::Closing {
            return;
        }
        if let Err(e) = connection.flush_outbound() {
            self.teardown(token, Teardown::Error(e));
        }
    }

    /// Removes the connection and releases everything it owns. Safe to hit
    /// twice in one readiness cycle: the second trigger finds no entry.
    fn teardown(&mut self, token: Token, cause: Teardown) {
        let Some(mut connection) = self.connections.remove(token) else {
            return;
        };
        connection.mark_closing();
        match cause {
            Teardown::PeerClosed => {
                info!(peer = connection.peer_description(), "client disconnected");
            }
            Teardown::Error(ref e) if e.is_peer_fault() => {
                warn!(
                    peer = connection.peer_description(),
                    "closing connection: {}", e
                );
            }
            Teardown::Error(ref e) => {
                error!(
                    peer = connection.peer_description(),
                    "connection error: {}", e
                );
            }
            Teardown::Requested(reason) => {
                info!(
                    peer = connection.peer_description(),
                    "closing connection: {}", reason
                );
            }
        }
        if connection.outbound_len() > 0 {
            debug!(
                peer = connection.peer_description(),
                envelopes = connection.outbound_len(),
                "discarding undelivered envelopes"
            );
        }
        if let Err(e) = self.poll.registry().deregister(connection.stream_mut()) {
            debug!("deregister failed: {}", e);
        }
        debug!(clients = self.connections.len(), "connection released");
        // dropping the connection closes the socket and frees its buffers
    }

    fn drain_commands(&mut self) {
        loop {
            match self.command_rx.try_recv() {
                Ok(Command::Deliver {
                    connection_id,
                    payload,
                }) => {
                    let token = connection_id.token();
                    let Some(connection) = self.connections.get_mut(token) else {
                        debug!(?connection_id, "deliver to unknown connection dropped");
                        continue;
                    };
                    if connection.state() != ConnectionState::Established {
                        debug!(?connection_id, "deliver before establishment dropped");
                        continue;
                    }
                    connection.enqueue(payload);
                    self.on_writable(token);
                }
                Ok(Command::Disconnect { connection_id }) => {
                    self.teardown(
                        connection_id.token(),
                        Teardown::Requested("close requested"),
                    );
                }
                Ok(Command::Shutdown) => {
                    self.running.store(false, Ordering::Relaxed);
                    return;
                }
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    // every handle is gone; nothing can ever stop us later
                    self.running.store(false, Ordering::Relaxed);
                    return;
                }
            }
        }
    }
}
