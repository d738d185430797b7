//! Wire-protocol vocabulary: the packet-type table, the
//! connection-establishment payload, and the built-in handler suite the
//! broker registers (establishment and keep-alive probe).

pub use connect::{
    encode_connack, encode_pingresp, ConnectPacket, LastWill, CONNACK_ACCEPTED,
    CONNACK_IDENTIFIER_REJECTED, CONNACK_UNACCEPTABLE_PROTOCOL,
};
pub use handlers::{ConnectHandler, PingHandler};
pub use packet::PacketType;

mod connect;
mod handlers;
mod packet;
