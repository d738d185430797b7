use std::io::{ErrorKind, Read};
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use mio::net::TcpStream;
use mio::Token;

use crate::network::{Frame, OutboundQueue, SendState};
use crate::service::{BrokerError, BrokerResult, NetworkConfig};

/// Bytes pulled off the socket per read call.
const READ_CHUNK: usize = 4096;

/// Handshake progress of one connection.
///
/// `Closing` is terminal and reachable from any state; once entered, no
/// further frames are dispatched and only teardown proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingConnect,
    Established,
    Closing,
}

/// Outcome of one non-blocking read into the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Bytes were appended to the receive buffer.
    Received(usize),
    /// The socket has nothing to offer; wait for the next readiness event.
    Blocked,
    /// Zero-length read: the peer closed its end.
    Closed,
}

/// Represents a connection to a client.
///
/// Aggregates the socket, the handshake state, the receive buffer feeding
/// the frame decoder, and the outbound envelope queue. Identity fields are
/// populated by the establishment handler and stay empty before that, so a
/// connection torn down early has nothing to release beyond its buffers.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    token: Token,
    state: ConnectionState,
    receive_buffer: BytesMut,
    max_frame_size: usize,
    outbound: OutboundQueue,
    peer_description: String,
    client_id: Option<String>,
    will_topic: Option<String>,
    will_message: Option<Bytes>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        token: Token,
        peer_addr: SocketAddr,
        config: &NetworkConfig,
    ) -> Connection {
        Connection {
            stream,
            token,
            state: ConnectionState::AwaitingConnect,
            receive_buffer: BytesMut::with_capacity(config.conn_read_buffer_size),
            max_frame_size: config.max_frame_size,
            outbound: OutboundQueue::new(),
            // numeric host:service form; reverse resolution is diagnostics
            // tooling territory and must not block the reactor
            peer_description: peer_addr.to_string(),
            client_id: None,
            will_topic: None,
            will_message: None,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer_description(&self) -> &str {
        &self.peer_description
    }

    /// Advances the handshake after an accepted establishment frame.
    pub fn mark_established(&mut self) {
        debug_assert_eq!(self.state, ConnectionState::AwaitingConnect);
        self.state = ConnectionState::Established;
    }

    /// Moves the connection into its terminal state; reads and writes are
    /// no longer dispatched afterwards.
    pub fn mark_closing(&mut self) {
        self.state = ConnectionState::Closing;
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn set_client_id(&mut self, client_id: String) {
        self.client_id = Some(client_id);
    }

    pub fn will(&self) -> Option<(&str, &Bytes)> {
        match (&self.will_topic, &self.will_message) {
            (Some(topic), Some(message)) => Some((topic, message)),
            _ => None,
        }
    }

    pub fn set_will(&mut self, topic: String, message: Bytes) {
        self.will_topic = Some(topic);
        self.will_message = Some(message);
    }

    /// Performs one non-blocking read into the tail of the receive buffer,
    /// bounded by the configured frame-size limit.
    ///
    /// A full buffer without a complete frame means the peer declared a
    /// frame the decoder will never accept, and is reported as a framing
    /// error rather than letting the buffer grow without bound.
    pub fn receive(&mut self) -> BrokerResult<ReadState> {
        let headroom = self.max_frame_size.saturating_sub(self.receive_buffer.len());
        if headroom == 0 {
            return Err(BrokerError::MalformedFrame(
                "receive buffer is full without a complete frame".to_string(),
            ));
        }
        let mut chunk = [0u8; READ_CHUNK];
        let limit = headroom.min(READ_CHUNK);
        loop {
            match self.stream.read(&mut chunk[..limit]) {
                Ok(0) => return Ok(ReadState::Closed),
                Ok(n) => {
                    self.receive_buffer.extend_from_slice(&chunk[..n]);
                    return Ok(ReadState::Received(n));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadState::Blocked),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Attempts to extract the next complete frame from the receive buffer.
    pub fn next_frame(&mut self) -> BrokerResult<Option<Frame>> {
        Frame::parse(&mut self.receive_buffer, self.max_frame_size)
    }

    /// Hands a fully built payload to the outbound queue.
    pub fn enqueue(&mut self, payload: Bytes) {
        self.outbound.enqueue(payload);
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Drains the outbound queue into the socket until it empties or the
    /// socket blocks.
    pub fn flush_outbound(&mut self) -> BrokerResult<SendState> {
        self.outbound.drain(&mut self.stream)
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}


#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::test_support::connection_pair;
    use super::*;

    fn receive_with_retry(connection: &mut Connection) -> ReadState {
        // loopback delivery is fast but not instant
        for _ in 0..50 {
            match connection.receive().unwrap() {
                ReadState::Blocked => std::thread::sleep(Duration::from_millis(10)),
                state => return state,
            }
        }
        ReadState::Blocked
    }

    #[test]
    fn test_new_connection_defaults() {
        let (connection, _peer) = connection_pair();
        assert_eq!(connection.state(), ConnectionState::AwaitingConnect);
        assert!(connection.client_id().is_none());
        assert!(connection.will().is_none());
        assert_eq!(connection.outbound_len(), 0);
        assert!(connection.peer_description().starts_with("127.0.0.1:"));
    }

    #[test]
    fn test_state_transitions() {
        let (mut connection, _peer) = connection_pair();
        connection.mark_established();
        assert_eq!(connection.state(), ConnectionState::Established);
        connection.mark_closing();
        assert_eq!(connection.state(), ConnectionState::Closing);
    }

    #[test]
    fn test_receive_appends_and_decodes() {
        let (mut connection, mut peer) = connection_pair();
        peer.write_all(&[0x10, 0x00, 0xC0, 0x00]).unwrap();

        let mut total = 0;
        while total < 4 {
            match receive_with_retry(&mut connection) {
                ReadState::Received(n) => total += n,
                state => panic!("unexpected read state {:?}", state),
            }
        }

        let first = connection.next_frame().unwrap().unwrap();
        assert_eq!(first.type_nibble(), 1);
        let second = connection.next_frame().unwrap().unwrap();
        assert_eq!(second.type_nibble(), 12);
        assert!(connection.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_peer_close_is_reported() {
        let (mut connection, peer) = connection_pair();
        drop(peer);
        let mut state = connection.receive().unwrap();
        for _ in 0..50 {
            if state == ReadState::Closed {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
            state = connection.receive().unwrap();
        }
        assert_eq!(state, ReadState::Closed);
    }

    #[test]
    fn test_flush_writes_enqueued_payloads() {
        use std::io::Read as _;

        let (mut connection, mut peer) = connection_pair();
        connection.enqueue(Bytes::from_static(&[0x20, 0x02, 0x00, 0x00]));
        connection.enqueue(Bytes::from_static(&[0xD0, 0x00]));
        let state = connection.flush_outbound().unwrap();
        assert_eq!(state, SendState::Empty);

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut received = [0u8; 6];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(&received, &[0x20, 0x02, 0x00, 0x00, 0xD0, 0x00]);
    }
}
