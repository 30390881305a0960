//! Reconnection supervisor: a handle held behind an atomic swap, the same
//! shape `cluster::router` uses for its topology snapshot — hold an
//! `ArcSwap`, publish a fresh value, let readers keep using the stale one
//! until they next load it.
//!
//! Policy: the initial `connect` always honors `abort_on_connect_fail` (fail
//! fast vs. keep retrying in the background). Once a connection is
//! established, `auto_reconnect` decides whether a later disconnect is
//! resupervised at all; `max_reconnect_attempts == 0` means retry forever,
//! matching `ConnectionConfig`'s documented default.
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::RedisResult;
use crate::resp::Frame;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

/// A `Connection` handle that transparently replaces itself on disconnect,
/// when `ConnectionConfig::auto_reconnect` is set. Callers fetch the
/// live connection with `current()` before each use rather than holding one
/// across an await point, so a mid-flight swap is always picked up.
#[derive(Clone)]
pub struct ManagedConnection {
    endpoint: String,
    config: ConnectionConfig,
    current: Arc<ArcSwap<Connection>>,
}

impl ManagedConnection {
    /// Establishes the first connection and, if it succeeds and
    /// `auto_reconnect` is enabled, starts the background supervisor.
    /// A failed first attempt is returned as an error regardless of
    /// `abort_on_connect_fail` — that flag governs what happens after a
    /// previously healthy connection drops, not the initial dial.
    pub async fn connect(endpoint: &str, config: ConnectionConfig) -> RedisResult<ManagedConnection> {
        let conn = Connection::connect(endpoint, config.clone()).await?;
        let managed = ManagedConnection {
            endpoint: endpoint.to_string(),
            config: config.clone(),
            current: Arc::new(ArcSwap::from_pointee(conn)),
        };
        if config.auto_reconnect {
            managed.spawn_supervisor();
        }
        Ok(managed)
    }

    /// Returns the current live connection. Cheap: `ArcSwap::load_full`
    /// is a single atomic load plus a refcount bump.
    pub fn current(&self) -> Arc<Connection> {
        self.current.load_full()
    }

    /// Convenience pass-through: executes against whatever connection is
    /// current at call time.
    pub async fn execute(&self, name: &[u8], args: &[&[u8]]) -> RedisResult<Frame> {
        self.current().execute(name, args).await
    }

    fn spawn_supervisor(&self) {
        let endpoint = self.endpoint.clone();
        let config = self.config.clone();
        let current = self.current.clone();
        tokio::spawn(supervise(endpoint, config, current));
    }
}

async fn supervise(endpoint: String, config: ConnectionConfig, current: Arc<ArcSwap<Connection>>) {
    loop {
        current.load_full().closed().await;
        tracing::warn!(%endpoint, "connection lost, attempting to reconnect");

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if config.max_reconnect_attempts != 0 && attempt > config.max_reconnect_attempts {
                tracing::error!(%endpoint, attempt, "exhausted reconnect attempts, giving up");
                return;
            }
            tokio::time::sleep(backoff_delay(&config, attempt)).await;
            match Connection::connect(&endpoint, config.clone()).await {
                Ok(conn) => {
                    tracing::info!(%endpoint, attempt, "reconnected");
                    current.store(Arc::new(conn));
                    break;
                }
                Err(e) => {
                    tracing::warn!(%endpoint, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }
}

/// Exponential backoff with a ceiling, per `reconnect_base_delay_ms` /
/// `reconnect_max_delay_ms`. `attempt` is 1-based; `attempt == 1`
/// yields the base delay.
fn backoff_delay(config: &ConnectionConfig, attempt: u32) -> Duration {
    let shift = (attempt - 1).min(20);
    let scaled = config.reconnect_base_delay_ms.saturating_mul(1u64 << shift);
    Duration::from_millis(scaled.min(config.reconnect_max_delay_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_the_ceiling() {
        let config = ConnectionConfig {
            reconnect_base_delay_ms: 50,
            reconnect_max_delay_ms: 1_000,
            ..ConnectionConfig::default()
        };
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(50));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 10), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(&config, 63), Duration::from_millis(1_000));
    }
}
