//! Thin typed command facade. The wire engine only knows `execute(name,
//! args) -> Frame`; this module adds the handful of typed wrappers real
//! callers reach for, encoding the common argument shapes as client-side
//! encoders over that entry point. Not an exhaustive command set — the full
//! Valkey command surface is out of scope here; this is a representative
//! slice covering the common data types, so every method has a concrete
//! round trip to check itself against.
use crate::cluster::ClusterClient;
use crate::connection::Connection;
use crate::error::{RedisError, RedisResult};
use crate::reconnect::ManagedConnection;
use crate::resp::Frame;
use bytes::Bytes;

/// Extracts an `i64` from whatever numeric-ish shape a server actually sent
/// back (`Integer` is canonical; a `SimpleString`/`BulkString` digit string
/// is accepted too, since some commands reply that way).
fn as_integer(frame: Frame) -> RedisResult<i64> {
    match frame {
        Frame::Integer(i) => Ok(i),
        Frame::SimpleString(b) | Frame::BulkString(b) => std::str::from_utf8(&b)
            .map_err(RedisError::from)?
            .parse::<i64>()
            .map_err(RedisError::from),
        other => Err(RedisError::ProtocolViolation(format!(
            "expected an integer reply, got {:?}",
            other
        ))),
    }
}

fn as_optional_bytes(frame: Frame) -> RedisResult<Option<Bytes>> {
    match frame {
        Frame::Null => Ok(None),
        Frame::BulkString(b) | Frame::SimpleString(b) => Ok(Some(b)),
        other => Err(RedisError::ProtocolViolation(format!(
            "expected a bulk string or nil reply, got {:?}",
            other
        ))),
    }
}

fn expect_ok(frame: Frame) -> RedisResult<()> {
    match frame {
        Frame::SimpleString(_) => Ok(()),
        other => Err(RedisError::ProtocolViolation(format!(
            "expected a simple status reply, got {:?}",
            other
        ))),
    }
}

macro_rules! typed_commands {
    ($ty:ty, $dispatch:ident) => {
        impl $ty {
            /// `PING` — liveness check, no key so it never needs routing.
            pub async fn ping(&self) -> RedisResult<()> {
                let frame = $dispatch!(self, b"PING", &[], &[]);
                expect_ok(frame)
            }

            /// `GET key`.
            pub async fn get(&self, key: &[u8]) -> RedisResult<Option<Bytes>> {
                let frame = $dispatch!(self, b"GET", &[key], &[key]);
                as_optional_bytes(frame)
            }

            /// `SET key value`.
            pub async fn set(&self, key: &[u8], value: &[u8]) -> RedisResult<()> {
                let frame = $dispatch!(self, b"SET", &[key, value], &[key]);
                expect_ok(frame)
            }

            /// `INCR key`.
            pub async fn incr(&self, key: &[u8]) -> RedisResult<i64> {
                let frame = $dispatch!(self, b"INCR", &[key], &[key]);
                as_integer(frame)
            }

            /// `LPUSH key value`.
            pub async fn lpush(&self, key: &[u8], value: &[u8]) -> RedisResult<i64> {
                let frame = $dispatch!(self, b"LPUSH", &[key, value], &[key]);
                as_integer(frame)
            }

            /// `RPUSH key value`.
            pub async fn rpush(&self, key: &[u8], value: &[u8]) -> RedisResult<i64> {
                let frame = $dispatch!(self, b"RPUSH", &[key, value], &[key]);
                as_integer(frame)
            }

            /// `LPOP key`.
            pub async fn lpop(&self, key: &[u8]) -> RedisResult<Option<Bytes>> {
                let frame = $dispatch!(self, b"LPOP", &[key], &[key]);
                as_optional_bytes(frame)
            }

            /// `RPOP key`.
            pub async fn rpop(&self, key: &[u8]) -> RedisResult<Option<Bytes>> {
                let frame = $dispatch!(self, b"RPOP", &[key], &[key]);
                as_optional_bytes(frame)
            }

            /// `DEL key` — number of keys actually removed (0 or 1 here,
            /// since this wrapper only takes a single key).
            pub async fn del(&self, key: &[u8]) -> RedisResult<i64> {
                let frame = $dispatch!(self, b"DEL", &[key], &[key]);
                as_integer(frame)
            }

            /// `EXPIRE key seconds` — 1 if the timeout was set, 0 if the key
            /// doesn't exist.
            pub async fn expire(&self, key: &[u8], seconds: i64) -> RedisResult<bool> {
                let ttl = seconds.to_string();
                let frame = $dispatch!(self, b"EXPIRE", &[key, ttl.as_bytes()], &[key]);
                Ok(as_integer(frame)? != 0)
            }

            /// `HSET key field value`.
            pub async fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> RedisResult<i64> {
                let frame = $dispatch!(self, b"HSET", &[key, field, value], &[key]);
                as_integer(frame)
            }

            /// `HGET key field`.
            pub async fn hget(&self, key: &[u8], field: &[u8]) -> RedisResult<Option<Bytes>> {
                let frame = $dispatch!(self, b"HGET", &[key, field], &[key]);
                as_optional_bytes(frame)
            }

            /// `PUBLISH channel message` — number of subscribers that
            /// received it.
            pub async fn publish(&self, channel: &[u8], message: &[u8]) -> RedisResult<i64> {
                let frame = $dispatch!(self, b"PUBLISH", &[channel, message], &[]);
                as_integer(frame)
            }
        }
    };
}

macro_rules! dispatch_single {
    ($self:ident, $name:expr, $args:expr, $keys:expr) => {
        $self.execute($name, $args).await?
    };
}

macro_rules! dispatch_keyed {
    ($self:ident, $name:expr, $args:expr, $keys:expr) => {
        $self.execute_keyed($name, $args, $keys, false).await?
    };
}

typed_commands!(Connection, dispatch_single);
typed_commands!(ManagedConnection, dispatch_single);
typed_commands!(ClusterClient, dispatch_keyed);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_reply_accepts_both_canonical_and_string_shapes() {
        assert_eq!(as_integer(Frame::Integer(42)).unwrap(), 42);
        assert_eq!(
            as_integer(Frame::SimpleString(Bytes::from_static(b"7"))).unwrap(),
            7
        );
        assert!(as_integer(Frame::Null).is_err());
    }

    #[test]
    fn optional_bytes_reply_maps_nil_to_none() {
        assert_eq!(as_optional_bytes(Frame::Null).unwrap(), None);
        assert_eq!(
            as_optional_bytes(Frame::BulkString(Bytes::from_static(b"v"))).unwrap(),
            Some(Bytes::from_static(b"v"))
        );
    }

    #[test]
    fn status_reply_rejects_non_simple_strings() {
        assert!(expect_ok(Frame::SimpleString(Bytes::from_static(b"OK"))).is_ok());
        assert!(expect_ok(Frame::Integer(1)).is_err());
    }
}
