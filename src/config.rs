use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TLS options for a connection. Client certs and server validation are
/// pass-through: the core negotiates TLS once after TCP accept and otherwise
/// stays out of certificate policy decisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    pub enabled: bool,
    pub target_host: Option<String>,
    pub client_cert_pem: Option<Vec<u8>>,
    pub client_key_pem: Option<Vec<u8>>,
    /// When true, skip server certificate verification (development only).
    pub insecure_skip_verify: bool,
}

/// Options recognized when establishing a single connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub endpoints: Vec<String>,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub keepalive_secs: Option<u64>,
    pub tls: TlsConfig,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_name: Option<String>,
    pub database: i64,
    pub abort_on_connect_fail: bool,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub prefer_resp3: bool,
    pub cluster_mode: bool,
    pub send_buffer_size: usize,
    pub recv_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            endpoints: vec!["127.0.0.1:6379".to_string()],
            connect_timeout_ms: 5_000,
            command_timeout_ms: 0,
            keepalive_secs: None,
            tls: TlsConfig::default(),
            username: None,
            password: None,
            client_name: None,
            database: 0,
            abort_on_connect_fail: true,
            auto_reconnect: false,
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: 50,
            reconnect_max_delay_ms: 5_000,
            prefer_resp3: true,
            cluster_mode: false,
            send_buffer_size: 64 * 1024,
            recv_buffer_size: 64 * 1024,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        if self.command_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.command_timeout_ms))
        }
    }
}

/// Options recognized by the cluster router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub max_redirects: u32,
    pub topology_refresh_interval_secs: u64,
    pub allow_read_from_replicas: bool,
    pub auto_handle_moved: bool,
    pub auto_handle_ask: bool,
    pub throw_on_all_unavailable: bool,
    pub validate_cross_slot: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            max_redirects: 5,
            topology_refresh_interval_secs: 300,
            allow_read_from_replicas: false,
            auto_handle_moved: true,
            auto_handle_ask: true,
            throw_on_all_unavailable: true,
            validate_cross_slot: true,
        }
    }
}

/// Tunables for the auto-pipeliner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub max_batch: usize,
    pub batch_window_micros: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            max_batch: 100,
            batch_window_micros: 100,
        }
    }
}
