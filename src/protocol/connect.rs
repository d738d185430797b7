use bytes::{Buf, Bytes, BytesMut};

use crate::service::{BrokerError, BrokerResult};

/// CONNACK return codes (MQTT 3.1.1, table 3.1).
pub const CONNACK_ACCEPTED: u8 = 0x00;
pub const CONNACK_UNACCEPTABLE_PROTOCOL: u8 = 0x01;
pub const CONNACK_IDENTIFIER_REJECTED: u8 = 0x02;

/// A client's last-will announcement, published on its behalf when the
/// connection dies. Delivery itself belongs to the fan-out layer; this core
/// only records it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub message: Bytes,
    pub qos: u8,
    pub retain: bool,
}

/// Parsed payload of a connection-establishment frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive_secs: u16,
    pub will: Option<LastWill>,
}

impl ConnectPacket {
    /// Parses the CONNECT variable header and payload.
    ///
    /// Accepts protocol level 3 ("MQIsdp") and 4 ("MQTT"). Username and
    /// password fields are parsed past and dropped; credential checking is
    /// not this core's concern.
    pub fn parse(payload: &mut BytesMut) -> BrokerResult<ConnectPacket> {
        let protocol_name = take_string(payload)?;
        if protocol_name != "MQTT" && protocol_name != "MQIsdp" {
            return Err(BrokerError::MalformedPacket(format!(
                "unknown protocol name {:?}",
                protocol_name
            )));
        }
        if payload.remaining() < 4 {
            return Err(truncated());
        }
        let level = payload.get_u8();
        if level != 3 && level != 4 {
            return Err(BrokerError::ProtocolViolation(format!(
                "unsupported protocol level {}",
                level
            )));
        }
        let flags = payload.get_u8();
        if flags & 0x01 != 0 {
            return Err(BrokerError::MalformedPacket(
                "reserved connect flag is set".to_string(),
            ));
        }
        let keep_alive_secs = payload.get_u16();

        let client_id = take_string(payload)?;
        let will = if flags & 0x04 != 0 {
            let qos = (flags >> 3) & 0x03;
            if qos > 2 {
                return Err(BrokerError::MalformedPacket(format!(
                    "invalid will qos {}",
                    qos
                )));
            }
            Some(LastWill {
                topic: take_string(payload)?,
                message: take_bytes(payload)?,
                qos,
                retain: flags & 0x20 != 0,
            })
        } else {
            None
        };
        if flags & 0x80 != 0 {
            take_string(payload)?; // user name
        }
        if flags & 0x40 != 0 {
            take_bytes(payload)?; // password
        }

        Ok(ConnectPacket {
            client_id,
            clean_session: flags & 0x02 != 0,
            keep_alive_secs,
            will,
        })
    }
}

/// Builds a CONNACK frame for the outbound queue.
pub fn encode_connack(session_present: bool, return_code: u8) -> Bytes {
    let ack_flags = u8::from(session_present);
    Bytes::from(vec![0x20, 0x02, ack_flags, return_code])
}

/// Builds a PINGRESP frame, the header-only reply to a keep-alive probe.
pub fn encode_pingresp() -> Bytes {
    Bytes::from_static(&[0xD0, 0x00])
}

fn take_bytes(buf: &mut BytesMut) -> BrokerResult<Bytes> {
    if buf.remaining() < 2 {
        return Err(truncated());
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    Ok(buf.split_to(len).freeze())
}

fn take_string(buf: &mut BytesMut) -> BrokerResult<String> {
    let raw = take_bytes(buf)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| BrokerError::MalformedPacket("string field is not valid utf-8".to_string()))
}

fn truncated() -> BrokerError {
    BrokerError::MalformedPacket("connect payload ends mid-field".to_string())
}
