//! MULTI/EXEC transaction buffer, built directly on `Connection::execute`
//! and the connection engine's own command-writing idiom.
use crate::connection::Connection;
use crate::error::{RedisError, RedisResult};
use crate::resp::Frame;

/// Defers queued operations as `(command, args)` tuples until `execute` or
/// `discard`. Frozen once terminal: further queueing after either is
/// rejected.
pub struct Transaction<'c> {
    conn: &'c Connection,
    queued: Vec<(Vec<u8>, Vec<Vec<u8>>)>,
    done: bool,
}

impl<'c> Transaction<'c> {
    pub fn new(conn: &'c Connection) -> Transaction<'c> {
        Transaction {
            conn,
            queued: Vec::new(),
            done: false,
        }
    }

    /// Queues a command for the eventual `MULTI`/`EXEC` batch. No bytes are
    /// sent to the wire until `execute` runs.
    pub fn queue(&mut self, name: &[u8], args: &[&[u8]]) -> RedisResult<()> {
        require_not_frozen(self.done)?;
        self.queued.push((
            name.to_vec(),
            args.iter().map(|a| a.to_vec()).collect(),
        ));
        Ok(())
    }

    /// Writes `MULTI`, each queued op (discarding the `QUEUED` acks), then
    /// `EXEC`. A null `EXEC` reply (WATCH invalidation, say) is reported as
    /// `TransactionAborted`; otherwise the per-op results come back as one
    /// `Frame` per queued op, in order.
    pub async fn execute(mut self) -> RedisResult<Vec<Frame>> {
        self.done = true;
        self.conn.execute(b"MULTI", &[]).await?;
        for (name, args) in &self.queued {
            let arg_refs: Vec<&[u8]> = args.iter().map(Vec::as_slice).collect();
            // The server replies QUEUED for each; we don't need the ack
            // itself, just to consume it in FIFO order before EXEC.
            self.conn.execute(name, &arg_refs).await?;
        }
        match self.conn.execute(b"EXEC", &[]).await? {
            Frame::Null => Err(RedisError::TransactionAborted),
            Frame::Array(results) => Ok(results),
            other => Err(RedisError::ProtocolViolation(format!(
                "EXEC returned non-array, non-null frame: {:?}",
                other
            ))),
        }
    }

    /// Writes `DISCARD` and drops the buffer without running any op.
    pub async fn discard(mut self) -> RedisResult<()> {
        self.done = true;
        self.conn.execute(b"DISCARD", &[]).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }
}

/// A frozen transaction (already executed or discarded) rejects further
/// queueing.
fn require_not_frozen(done: bool) -> RedisResult<()> {
    if done {
        Err(RedisError::TransactionAborted)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_transaction_rejects_further_queueing() {
        assert!(require_not_frozen(true).is_err());
        assert!(require_not_frozen(false).is_ok());
    }
}
