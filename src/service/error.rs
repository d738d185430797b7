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

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, thiserror::Error)]
#[error("broker core error")]
pub enum BrokerError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel send error: {0}")]
    ChannelSend(String),

    #[error("config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    /// wire-level errors, fatal to the offending connection only
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// marker error
    Incomplete,
}

impl BrokerError {
    /// Errors that terminate a single connection without being worth an
    /// error-level log line (the peer misbehaved, the broker did not).
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            BrokerError::MalformedFrame(_)
                | BrokerError::MalformedPacket(_)
                | BrokerError::ProtocolViolation(_)
        )
    }
}
