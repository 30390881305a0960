//! Cluster redirect loop, cross-slot validation, and replica round robin.
//! Built as a bounded-retry wrapper around `Connection::execute`, keeping
//! redirect handling out of the codec and connection engine entirely.
//! Per-primary replica round robin is a plain monotonic counter, one per
//! primary id, cycled modulo the replica count — no randomness involved.
use crate::cluster::slot::hash_slot;
use crate::cluster::topology::TopologySnapshot;
use crate::config::{ClusterConfig, ConnectionConfig};
use crate::connection::Connection;
use crate::error::{RedirectKind, RedisError, RedisResult};
use crate::resp::Frame;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    cluster_config: ClusterConfig,
    connect_config: ConnectionConfig,
    topology: ArcSwap<TopologySnapshot>,
    connections: Mutex<HashMap<SocketAddr, Connection>>,
    replica_cursor: Mutex<HashMap<String, usize>>,
}

/// A cluster-aware client exposing the same `execute` surface as a single
/// `Connection`, performing hash-slot routing and MOVED/ASK redirection
/// transparently.
#[derive(Clone)]
pub struct ClusterClient {
    inner: Arc<Inner>,
}

impl ClusterClient {
    /// Connects to the first reachable seed, builds the initial topology
    /// from `CLUSTER SLOTS`, and — unless disabled — starts the periodic
    /// refresh loop.
    pub async fn connect(
        seeds: &[String],
        connect_config: ConnectionConfig,
        cluster_config: ClusterConfig,
    ) -> RedisResult<ClusterClient> {
        let inner = Arc::new(Inner {
            cluster_config: cluster_config.clone(),
            connect_config,
            topology: ArcSwap::from_pointee(TopologySnapshot::empty()),
            connections: Mutex::new(HashMap::new()),
            replica_cursor: Mutex::new(HashMap::new()),
        });
        let client = ClusterClient { inner };
        client.refresh_topology(seeds).await?;
        if cluster_config.topology_refresh_interval_secs > 0 {
            client.spawn_refresh_loop(seeds.to_vec());
        }
        Ok(client)
    }

    /// Routes and executes a command whose key arguments are `keys` (empty
    /// for keyless commands, which go to any known primary). `readonly`
    /// enables replica round robin when the cluster config allows it.
    pub async fn execute_keyed(
        &self,
        name: &[u8],
        args: &[&[u8]],
        keys: &[&[u8]],
        readonly: bool,
    ) -> RedisResult<Frame> {
        let slot = self.resolve_slot(keys)?;
        let mut target = self.pick_target(slot, readonly, !keys.is_empty())?;
        let mut asking = false;
        let mut redirects = 0u32;

        loop {
            let conn = self.connection_for(target).await?;
            if asking {
                conn.execute(b"ASKING", &[]).await?;
            }
            match conn.execute(name, args).await {
                Ok(frame) => return Ok(frame),
                Err(redirect @ RedisError::Redirect {
                    kind: RedirectKind::Moved,
                    slot: redirect_slot,
                    addr,
                }) => {
                    if !should_auto_handle(RedirectKind::Moved, &self.inner.cluster_config) {
                        return Err(redirect);
                    }
                    redirects += 1;
                    if redirects > self.inner.cluster_config.max_redirects {
                        return Err(RedisError::RoutingExhausted);
                    }
                    self.inner
                        .topology
                        .rcu(|old| Arc::new(old.with_moved(redirect_slot, addr)));
                    target = addr;
                    asking = false;
                }
                Err(redirect @ RedisError::Redirect {
                    kind: RedirectKind::Ask,
                    addr,
                    ..
                }) => {
                    if !should_auto_handle(RedirectKind::Ask, &self.inner.cluster_config) {
                        return Err(redirect);
                    }
                    redirects += 1;
                    if redirects > self.inner.cluster_config.max_redirects {
                        return Err(RedisError::RoutingExhausted);
                    }
                    // ASK never updates the cache: one-shot redirect.
                    target = addr;
                    asking = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Keyless convenience entry point (PING, INFO, ...): routes to any
    /// known primary.
    pub async fn execute(&self, name: &[u8], args: &[&[u8]]) -> RedisResult<Frame> {
        self.execute_keyed(name, args, &[], false).await
    }

    /// Client-side multi-key validation: when enabled, fails before
    /// dispatch if the keys span more than one slot.
    fn resolve_slot(&self, keys: &[&[u8]]) -> RedisResult<u16> {
        if keys.is_empty() {
            return Ok(0);
        }
        let first_slot = hash_slot(keys[0]);
        if self.inner.cluster_config.validate_cross_slot && keys.len() > 1 {
            let distinct: HashSet<u16> = keys.iter().map(|k| hash_slot(k)).collect();
            if distinct.len() > 1 {
                return Err(RedisError::CrossSlot(distinct.len()));
            }
        }
        Ok(first_slot)
    }

    fn pick_target(&self, slot: u16, readonly: bool, has_keys: bool) -> RedisResult<SocketAddr> {
        let snapshot = self.inner.topology.load();
        if !has_keys {
            return snapshot
                .nodes
                .iter()
                .find(|n| n.is_primary())
                .map(|n| n.endpoint)
                .ok_or_else(|| RedisError::ConnectFailure("no known cluster nodes".into()));
        }
        let primary = snapshot
            .primary_for_slot(slot)
            .ok_or_else(|| RedisError::ConnectFailure(format!("no primary owns slot {}", slot)))?;

        if readonly && self.inner.cluster_config.allow_read_from_replicas {
            let replicas = snapshot.replicas_for_primary(&primary.id);
            if !replicas.is_empty() {
                let mut cursor = self.inner.replica_cursor.lock();
                let counter = cursor.entry(primary.id.clone()).or_insert(0);
                let chosen = replicas[*counter % replicas.len()];
                *counter = counter.wrapping_add(1);
                return Ok(chosen.endpoint);
            }
        }
        Ok(primary.endpoint)
    }

    async fn connection_for(&self, addr: SocketAddr) -> RedisResult<Connection> {
        if let Some(conn) = self.inner.connections.lock().get(&addr).cloned() {
            if conn.state() != crate::connection::ConnectionState::Closed {
                return Ok(conn);
            }
        }
        let mut cfg = self.inner.connect_config.clone();
        cfg.endpoints = vec![addr.to_string()];
        let conn = Connection::connect(&addr.to_string(), cfg).await?;
        self.inner.connections.lock().insert(addr, conn.clone());
        Ok(conn)
    }

    async fn refresh_topology(&self, seeds: &[String]) -> RedisResult<()> {
        if self.inner.cluster_config.throw_on_all_unavailable {
            let mut last_err = None;
            for seed in seeds {
                match self.try_refresh_from(seed).await {
                    Ok(()) => return Ok(()),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err.unwrap_or(RedisError::ConnectFailure("no cluster seeds supplied".into())))
        } else {
            for seed in seeds {
                if self.try_refresh_from(seed).await.is_ok() {
                    return Ok(());
                }
            }
            Ok(())
        }
    }

    async fn try_refresh_from(&self, seed: &str) -> RedisResult<()> {
        let mut cfg = self.inner.connect_config.clone();
        cfg.endpoints = vec![seed.to_string()];
        let conn = Connection::connect(seed, cfg).await?;
        let reply = conn.execute(b"CLUSTER", &[b"SLOTS"]).await?;
        let epoch = self.inner.topology.load().epoch + 1;
        let snapshot = TopologySnapshot::parse_cluster_slots(&reply, epoch)?;
        self.inner.topology.store(Arc::new(snapshot));
        conn.close().await;
        Ok(())
    }

    fn spawn_refresh_loop(&self, seeds: Vec<String>) {
        let client = self.clone();
        let interval = Duration::from_secs(self.inner.cluster_config.topology_refresh_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = client.refresh_topology(&seeds).await {
                    tracing::warn!(error = %e, "periodic cluster topology refresh failed");
                }
            }
        });
    }
}

/// Whether a redirect of `kind` should be chased locally. When disabled for
/// that kind, the `Redirect` error is surfaced to the caller instead —
/// §7's "exposed otherwise".
fn should_auto_handle(kind: RedirectKind, config: &ClusterConfig) -> bool {
    match kind {
        RedirectKind::Moved => config.auto_handle_moved,
        RedirectKind::Ask => config.auto_handle_ask,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_slot_detection() {
        let cluster_config = ClusterConfig {
            validate_cross_slot: true,
            ..ClusterConfig::default()
        };
        let inner = Inner {
            cluster_config,
            connect_config: ConnectionConfig::default(),
            topology: ArcSwap::from_pointee(TopologySnapshot::empty()),
            connections: Mutex::new(HashMap::new()),
            replica_cursor: Mutex::new(HashMap::new()),
        };
        let client = ClusterClient {
            inner: Arc::new(inner),
        };
        let err = client
            .resolve_slot(&[b"{a}x", b"{b}y"])
            .expect_err("keys in different hash tags must fail cross-slot validation");
        assert!(matches!(err, RedisError::CrossSlot(2)));
    }

    #[test]
    fn same_hash_tag_keys_pass_cross_slot_validation() {
        let inner = Inner {
            cluster_config: ClusterConfig::default(),
            connect_config: ConnectionConfig::default(),
            topology: ArcSwap::from_pointee(TopologySnapshot::empty()),
            connections: Mutex::new(HashMap::new()),
            replica_cursor: Mutex::new(HashMap::new()),
        };
        let client = ClusterClient {
            inner: Arc::new(inner),
        };
        assert!(client.resolve_slot(&[b"{user1}.a", b"{user1}.b"]).is_ok());
    }

    #[test]
    fn redirect_gating_respects_each_config_flag_independently() {
        let both_on = ClusterConfig::default();
        assert!(should_auto_handle(RedirectKind::Moved, &both_on));
        assert!(should_auto_handle(RedirectKind::Ask, &both_on));

        let moved_off = ClusterConfig {
            auto_handle_moved: false,
            ..ClusterConfig::default()
        };
        assert!(!should_auto_handle(RedirectKind::Moved, &moved_off));
        assert!(should_auto_handle(RedirectKind::Ask, &moved_off));

        let ask_off = ClusterConfig {
            auto_handle_ask: false,
            ..ClusterConfig::default()
        };
        assert!(should_auto_handle(RedirectKind::Moved, &ask_off));
        assert!(!should_auto_handle(RedirectKind::Ask, &ask_off));
    }
}
