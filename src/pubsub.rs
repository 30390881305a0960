//! Pub/Sub subscriber path. A subscriber owns a dedicated connection
//! transitioned into `PubSubMode`; every frame the response loop receives
//! after that point is routed to this module's demux channel instead of the
//! request queue, rather than back to a caller's oneshot.
use crate::connection::Connection;
use crate::error::{RedisError, RedisResult};
use crate::resp::Frame;
use bytes::Bytes;
use std::collections::HashSet;
use tokio::sync::mpsc;

/// One decoded pub/sub event, classified from the array/push payload shape
/// by its message-type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Subscribe { channel: Bytes, count: i64 },
    Unsubscribe { channel: Bytes, count: i64 },
    PSubscribe { pattern: Bytes, count: i64 },
    PUnsubscribe { pattern: Bytes, count: i64 },
    Message { channel: Bytes, payload: Bytes },
    PMessage { pattern: Bytes, channel: Bytes, payload: Bytes },
}

/// A subscriber connection: once constructed the underlying `Connection` is
/// exclusively in `PubSubMode` and can no longer serve ordinary RPC.
pub struct Subscriber {
    conn: Connection,
    rx: mpsc::UnboundedReceiver<Frame>,
    channels: HashSet<Bytes>,
    patterns: HashSet<Bytes>,
}

impl Subscriber {
    /// Transitions an already-`Ready` connection into `PubSubMode`.
    pub fn new(conn: Connection) -> RedisResult<Subscriber> {
        let rx = conn.enter_pubsub_mode()?;
        Ok(Subscriber {
            conn,
            rx,
            channels: HashSet::new(),
            patterns: HashSet::new(),
        })
    }

    /// Subscribes to the given channels. Client-side idempotent: channels
    /// already subscribed are not re-sent to the server.
    pub async fn subscribe(&mut self, channels: &[&[u8]]) -> RedisResult<()> {
        let fresh: Vec<&[u8]> = channels
            .iter()
            .copied()
            .filter(|c| !self.channels.contains(*c))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        self.conn.send_no_reply(b"SUBSCRIBE", &fresh).await?;
        for c in fresh {
            self.channels.insert(Bytes::copy_from_slice(c));
        }
        Ok(())
    }

    pub async fn psubscribe(&mut self, patterns: &[&[u8]]) -> RedisResult<()> {
        let fresh: Vec<&[u8]> = patterns
            .iter()
            .copied()
            .filter(|p| !self.patterns.contains(*p))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        self.conn.send_no_reply(b"PSUBSCRIBE", &fresh).await?;
        for p in fresh {
            self.patterns.insert(Bytes::copy_from_slice(p));
        }
        Ok(())
    }

    pub async fn unsubscribe(&mut self, channels: &[&[u8]]) -> RedisResult<()> {
        self.conn.send_no_reply(b"UNSUBSCRIBE", channels).await?;
        for c in channels {
            self.channels.remove(*c);
        }
        Ok(())
    }

    /// Unsubscribe-all: no arguments tells the server to drop every
    /// subscription on this connection.
    pub async fn unsubscribe_all(&mut self) -> RedisResult<()> {
        self.conn.send_no_reply(b"UNSUBSCRIBE", &[]).await?;
        self.channels.clear();
        Ok(())
    }

    pub async fn punsubscribe(&mut self, patterns: &[&[u8]]) -> RedisResult<()> {
        self.conn.send_no_reply(b"PUNSUBSCRIBE", patterns).await?;
        for p in patterns {
            self.patterns.remove(*p);
        }
        Ok(())
    }

    pub async fn punsubscribe_all(&mut self) -> RedisResult<()> {
        self.conn.send_no_reply(b"PUNSUBSCRIBE", &[]).await?;
        self.patterns.clear();
        Ok(())
    }

    /// Pulls the next decoded message, or `None` once the connection has
    /// closed.
    pub async fn next(&mut self) -> Option<RedisResult<Message>> {
        let frame = self.rx.recv().await?;
        Some(classify(frame))
    }
}

/// Classifies a decoded array/push frame by its case-insensitive first
/// element. Only reachable while the owning connection is in
/// `PubSubMode`, which is the hard invariant that keeps this detector from
/// ever misclassifying an ordinary command reply.
fn classify(frame: Frame) -> RedisResult<Message> {
    let elements = frame
        .elements()
        .ok_or_else(|| RedisError::ProtocolViolation("pub/sub frame was not an array".into()))?;
    let tag = elements
        .first()
        .and_then(Frame::as_bytes)
        .ok_or_else(|| RedisError::ProtocolViolation("pub/sub frame missing type tag".into()))?;

    match (tag.to_ascii_lowercase().as_slice(), elements.len()) {
        (b"subscribe", 3) => Ok(Message::Subscribe {
            channel: field(&elements[1])?,
            count: integer(&elements[2])?,
        }),
        (b"unsubscribe", 3) => Ok(Message::Unsubscribe {
            channel: field(&elements[1])?,
            count: integer(&elements[2])?,
        }),
        (b"psubscribe", 3) => Ok(Message::PSubscribe {
            pattern: field(&elements[1])?,
            count: integer(&elements[2])?,
        }),
        (b"punsubscribe", 3) => Ok(Message::PUnsubscribe {
            pattern: field(&elements[1])?,
            count: integer(&elements[2])?,
        }),
        (b"message", 3) => Ok(Message::Message {
            channel: field(&elements[1])?,
            payload: field(&elements[2])?,
        }),
        (b"pmessage", 4) => Ok(Message::PMessage {
            pattern: field(&elements[1])?,
            channel: field(&elements[2])?,
            payload: field(&elements[3])?,
        }),
        _ => Err(RedisError::ProtocolViolation(format!(
            "unrecognized pub/sub frame shape: {:?}",
            String::from_utf8_lossy(tag)
        ))),
    }
}

fn field(frame: &Frame) -> RedisResult<Bytes> {
    frame
        .as_bytes()
        .map(Bytes::copy_from_slice)
        .ok_or_else(|| RedisError::ProtocolViolation("expected a string field".into()))
}

fn integer(frame: &Frame) -> RedisResult<i64> {
    match frame {
        Frame::Integer(i) => Ok(*i),
        other => Err(RedisError::ProtocolViolation(format!(
            "expected an integer field, got {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_subscribe_ack() {
        let frame = Frame::Array(vec![
            Frame::bulk_string(&b"subscribe"[..]),
            Frame::bulk_string(&b"news"[..]),
            Frame::Integer(1),
        ]);
        assert_eq!(
            classify(frame).unwrap(),
            Message::Subscribe {
                channel: Bytes::from_static(b"news"),
                count: 1,
            }
        );
    }

    #[test]
    fn classifies_pmessage() {
        let frame = Frame::Push(vec![
            Frame::bulk_string(&b"pmessage"[..]),
            Frame::bulk_string(&b"news.*"[..]),
            Frame::bulk_string(&b"news.sports"[..]),
            Frame::bulk_string(&b"payload"[..]),
        ]);
        assert_eq!(
            classify(frame).unwrap(),
            Message::PMessage {
                pattern: Bytes::from_static(b"news.*"),
                channel: Bytes::from_static(b"news.sports"),
                payload: Bytes::from_static(b"payload"),
            }
        );
    }

    #[test]
    fn case_insensitive_tag_matching() {
        let frame = Frame::Array(vec![
            Frame::bulk_string(&b"MESSAGE"[..]),
            Frame::bulk_string(&b"chan"[..]),
            Frame::bulk_string(&b"hi"[..]),
        ]);
        assert!(matches!(classify(frame).unwrap(), Message::Message { .. }));
    }

    #[test]
    fn unrecognized_shape_is_a_protocol_violation() {
        let frame = Frame::Array(vec![Frame::Integer(1)]);
        assert!(classify(frame).is_err());
    }
}
