use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{BrokerError, BrokerResult};

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct GeneralConfig {
    pub id: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connections: usize,
    /// Initial capacity of each connection's receive buffer.
    pub conn_read_buffer_size: usize,
    /// Upper bound on a single frame; a peer declaring more is cut off.
    pub max_frame_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> NetworkConfig {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 1883,
            max_connections: 1024,
            conn_read_buffer_size: 4 * 1024,
            max_frame_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct BrokerConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
}

impl BrokerConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> BrokerResult<BrokerConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(BrokerError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let broker_config: BrokerConfig = config.try_deserialize()?;

        Ok(broker_config)
    }
}
