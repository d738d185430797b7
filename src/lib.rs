mod network;
mod protocol;
mod service;

pub use network::{
    decode_remaining_length, encode_frame, encode_remaining_length, Connection, ConnectionId,
    ConnectionRegistry, ConnectionState, Envelope, Frame, OutboundQueue, ReadState, SendState,
    MAX_REMAINING_LENGTH,
};
pub use protocol::{
    encode_connack, encode_pingresp, ConnectHandler, ConnectPacket, LastWill, PacketType,
    PingHandler, CONNACK_ACCEPTED, CONNACK_IDENTIFIER_REJECTED, CONNACK_UNACCEPTABLE_PROTOCOL,
};
pub use service::{
    setup_local_tracing, setup_tracing, Broker, BrokerConfig, BrokerError, BrokerHandle,
    BrokerResult, Command, FrameDispatcher, GeneralConfig, LogGuard, NetworkConfig, PacketHandler,
    Server, ServerHandle, Verdict,
};
