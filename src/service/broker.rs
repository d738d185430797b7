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

use std::net::SocketAddr;
use std::thread::{self, JoinHandle};

use mio::net::TcpListener;
use tracing::{error, info};

use crate::protocol::{ConnectHandler, PacketType, PingHandler};
use crate::service::{
    BrokerConfig, BrokerError, BrokerResult, FrameDispatcher, Server, ServerHandle,
};

/// Assembles the network core and runs it on a dedicated reactor thread.
pub struct Broker {
    config: BrokerConfig,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Broker {
        Broker { config }
    }

    /// Binds the listener, registers the built-in handler suite and spawns
    /// the reactor. Bind or multiplexer failure here is the only
    /// process-fatal error in the core.
    pub fn start(self) -> BrokerResult<BrokerHandle> {
        let listen_address = format!("{}:{}", self.config.network.ip, self.config.network.port);
        let addr: SocketAddr = listen_address.parse().map_err(|_| {
            BrokerError::InvalidValue(format!("listen address: {}", listen_address))
        })?;
        let listener = TcpListener::bind(addr).map_err(|e| {
            error!("failed to bind server to address {}: {}", listen_address, e);
            BrokerError::Io(e)
        })?;

        let mut dispatcher = FrameDispatcher::new();
        dispatcher.register(PacketType::Connect, Box::new(ConnectHandler));
        dispatcher.register(PacketType::PingReq, Box::new(PingHandler));

        let (server, server_handle) = Server::new(listener, dispatcher, self.config.network)?;
        let local_addr = server.local_addr();
        info!("broker id {} starting on {}", self.config.general.id, local_addr);

        let thread = thread::Builder::new()
            .name("pebblemq-reactor".to_string())
            .spawn(move || {
                if let Err(e) = server.run() {
                    error!("reactor exited with error: {}", e);
                }
            })?;

        Ok(BrokerHandle {
            server: server_handle,
            local_addr,
            thread: Some(thread),
        })
    }
}

/// Owner's handle to a started broker: the reactor's command surface plus
/// the thread to join on shutdown.
pub struct BrokerHandle {
    server: ServerHandle,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl BrokerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The reactor's cross-thread command surface (deliver, disconnect,
    /// shutdown), for external collaborators such as a keep-alive subsystem.
    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    /// Asks the reactor to stop and waits for it to finish.
    pub fn shutdown(&mut self) -> BrokerResult<()> {
        if let Some(thread) = self.thread.take() {
            self.server.shutdown()?;
            thread
                .join()
                .map_err(|_| BrokerError::IllegalState("reactor thread panicked".to_string()))?;
            info!("broker shutdown complete");
        }
        Ok(())
    }

    /// Blocks until the reactor stops on its own (a shutdown sent through
    /// another clone of the handle, or a reactor failure).
    pub fn join(&mut self) -> BrokerResult<()> {
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| BrokerError::IllegalState("reactor thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
