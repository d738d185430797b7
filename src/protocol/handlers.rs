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

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::network::{Connection, Frame};
use crate::protocol::connect::{
    encode_connack, encode_pingresp, ConnectPacket, CONNACK_ACCEPTED,
};
use crate::service::{PacketHandler, Verdict};

/// Establishment handler: parses the connect payload, populates the
/// connection's identity fields, and answers with a CONNACK through the
/// outbound queue.
///
/// A zero-length payload is treated as a bare establishment and accepted
/// with a broker-assigned identifier, as is an explicit empty client
/// identifier.
pub struct ConnectHandler;

impl PacketHandler for ConnectHandler {
    fn handle(&mut self, connection: &mut Connection, frame: &mut Frame) -> Verdict {
        let packet = if frame.payload.is_empty() {
            None
        } else {
            match ConnectPacket::parse(&mut frame.payload) {
                Ok(packet) => Some(packet),
                Err(e) => {
                    warn!(
                        peer = connection.peer_description(),
                        "rejecting connect: {}", e
                    );
                    return Verdict::Reject;
                }
            }
        };

        let (client_id, will, keep_alive_secs) = match packet {
            Some(packet) => {
                let client_id = if packet.client_id.is_empty() {
                    assigned_client_id()
                } else {
                    packet.client_id
                };
                (client_id, packet.will, packet.keep_alive_secs)
            }
            None => (assigned_client_id(), None, 0),
        };

        connection.set_client_id(client_id);
        if let Some(will) = will {
            connection.set_will(will.topic, will.message);
        }
        connection.enqueue(encode_connack(false, CONNACK_ACCEPTED));
        info!(
            peer = connection.peer_description(),
            client_id = connection.client_id().unwrap_or(""),
            keep_alive_secs,
            "client connected"
        );
        Verdict::Accept
    }
}

/// Keep-alive probe handler. Timer bookkeeping belongs to an external
/// keep-alive subsystem; here the probe is simply answered.
pub struct PingHandler;

impl PacketHandler for PingHandler {
    fn handle(&mut self, connection: &mut Connection, _frame: &mut Frame) -> Verdict {
        debug!(peer = connection.peer_description(), "keep-alive probe");
        connection.enqueue(encode_pingresp());
        Verdict::Accept
    }
}

fn assigned_client_id() -> String {
    format!("auto-{}", Uuid::new_v4().simple())
}
