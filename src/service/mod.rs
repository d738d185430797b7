pub use broker::{Broker, BrokerHandle};
pub use config::{BrokerConfig, GeneralConfig, NetworkConfig};
pub use dispatcher::{FrameDispatcher, PacketHandler, Verdict};
pub use error::{BrokerError, BrokerResult};
pub use server::{Command, Server, ServerHandle};
pub use tracing_config::{setup_local_tracing, setup_tracing, LogGuard};

mod broker;
mod config;
mod dispatcher;
mod error;
mod server;
mod tracing_config;
