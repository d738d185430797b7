use std::collections::HashMap;

use tracing::debug;

use crate::network::{Connection, ConnectionState, Frame};
use crate::protocol::PacketType;
use crate::service::{BrokerError, BrokerResult};

/// What a handler decided about the frame it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The frame was processed; an establishment frame advances the
    /// handshake.
    Accept,
    /// The frame is unacceptable and the connection should be torn down.
    Reject,
    /// The frame was examined and deliberately dropped.
    Ignore,
}

/// One member of the protocol handler suite.
///
/// Handlers receive the connection (identity fields plus the outbound
/// queue's `enqueue` seam) and the decoded frame, and must not perform I/O;
/// anything they enqueue is flushed by the reactor.
pub trait PacketHandler: Send {
    fn handle(&mut self, connection: &mut Connection, frame: &mut Frame) -> Verdict;
}

/// Routes complete frames to registered handlers, gated by the connection's
/// handshake state.
#[derive(Default)]
pub struct FrameDispatcher {
    handlers: HashMap<PacketType, Box<dyn PacketHandler>>,
}

impl FrameDispatcher {
    pub fn new() -> FrameDispatcher {
        FrameDispatcher {
            handlers: HashMap::new(),
        }
    }

    /// Registers the handler responsible for one packet type, replacing any
    /// previous registration.
    pub fn register(&mut self, packet_type: PacketType, handler: Box<dyn PacketHandler>) {
        self.handlers.insert(packet_type, handler);
    }

    /// Validates `frame` against the handshake state and invokes its
    /// handler.
    ///
    /// While the connection awaits its establishment frame, anything else is
    /// a protocol violation and no handler runs. Once established, frames
    /// without a registered handler (including reserved type nibbles) are
    /// logged and dropped; a handler rejection is fatal to the connection.
    pub fn dispatch(&mut self, connection: &mut Connection, mut frame: Frame) -> BrokerResult<()> {
        if connection.state() == ConnectionState::Closing {
            return Ok(());
        }

        let packet_type = PacketType::from_nibble(frame.type_nibble());
        if connection.state() == ConnectionState::AwaitingConnect
            && packet_type != Some(PacketType::Connect)
        {
            return Err(BrokerError::ProtocolViolation(format!(
                "expected a connect frame but got type {:#x}",
                frame.type_nibble()
            )));
        }
        if connection.state() == ConnectionState::Established
            && packet_type == Some(PacketType::Connect)
        {
            return Err(BrokerError::ProtocolViolation(
                "second connect frame on an established connection".to_string(),
            ));
        }

        let Some(packet_type) = packet_type else {
            debug!(
                peer = connection.peer_description(),
                nibble = frame.type_nibble(),
                "frame with reserved type nibble ignored"
            );
            return Ok(());
        };
        let Some(handler) = self.handlers.get_mut(&packet_type) else {
            debug!(
                peer = connection.peer_description(),
                ?packet_type,
                "no handler registered, frame ignored"
            );
            return Ok(());
        };

        match handler.handle(connection, &mut frame) {
            Verdict::Accept => {
                if packet_type == PacketType::Connect
                    && connection.state() == ConnectionState::AwaitingConnect
                {
                    connection.mark_established();
                    debug!(
                        peer = connection.peer_description(),
                        "handshake complete, connection established"
                    );
                }
                Ok(())
            }
            Verdict::Reject => Err(BrokerError::ProtocolViolation(format!(
                "{:?} frame rejected by its handler",
                packet_type
            ))),
            Verdict::Ignore => Ok(()),
        }
    }
}
