//! Wire-protocol engine and client for Valkey/Redis-speaking servers:
//! RESP2/RESP3 codec, a full-duplex pipelined connection, pub/sub, MULTI/EXEC
//! transactions, cluster-aware routing, an auto-pipeliner, and a reconnect
//! supervisor. See `DESIGN.md` for how each module is grounded.
pub mod cluster;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod pipeliner;
pub mod pool;
pub mod pubsub;
pub mod queue;
pub mod reconnect;
pub mod resp;
pub mod transaction;
pub mod transport;

pub use cluster::ClusterClient;
pub use config::{ClusterConfig, ConnectionConfig, PipelineConfig, TlsConfig};
pub use connection::{Connection, ConnectionState};
pub use error::{RedirectKind, RedisError, RedisResult};
pub use pipeliner::AutoPipeliner;
pub use pubsub::{Message, Subscriber};
pub use reconnect::ManagedConnection;
pub use resp::Frame;
pub use transaction::Transaction;
