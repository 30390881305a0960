//! Time-windowed auto-pipeline coalescer: a single background task owns the
//! submission receiver and drains it in a loop, pulling a time-boxed batch
//! instead of resolving one submission at a time.
use crate::config::PipelineConfig;
use crate::connection::Connection;
use crate::error::{RedisError, RedisResult};
use crate::resp::Frame;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

struct Submission {
    name: Vec<u8>,
    args: Vec<Vec<u8>>,
    reply: oneshot::Sender<RedisResult<Frame>>,
}

/// Coalesces concurrent `submit` calls targeting one connection into
/// batched `execute_batch` dispatches, amortizing syscall cost when many
/// callers submit at once. Each submission still resolves
/// independently; batching preserves submission order.
#[derive(Clone)]
pub struct AutoPipeliner {
    tx: mpsc::UnboundedSender<Submission>,
}

impl AutoPipeliner {
    pub fn new(conn: Connection, config: PipelineConfig) -> AutoPipeliner {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(coalesce_loop(conn, config, rx));
        AutoPipeliner { tx }
    }

    pub async fn submit(&self, name: &[u8], args: &[&[u8]]) -> RedisResult<Frame> {
        let (reply, reply_rx) = oneshot::channel();
        let submission = Submission {
            name: name.to_vec(),
            args: args.iter().map(|a| a.to_vec()).collect(),
            reply,
        };
        self.tx
            .send(submission)
            .map_err(|_| RedisError::Disconnected("auto-pipeliner task is gone".into()))?;
        reply_rx
            .await
            .map_err(|_| RedisError::Disconnected("auto-pipeliner task is gone".into()))?
    }
}

async fn coalesce_loop(
    conn: Connection,
    config: PipelineConfig,
    mut rx: mpsc::UnboundedReceiver<Submission>,
) {
    let window = std::time::Duration::from_micros(config.batch_window_micros);
    loop {
        let first = match rx.recv().await {
            Some(s) => s,
            None => return,
        };
        let mut batch = vec![first];
        let deadline = Instant::now() + window;

        while batch.len() < config.max_batch {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(s)) => batch.push(s),
                Ok(None) | Err(_) => break,
            }
        }

        let commands: Vec<(Vec<u8>, Vec<Vec<u8>>)> = batch
            .iter()
            .map(|s| (s.name.clone(), s.args.clone()))
            .collect();
        let results = conn.execute_batch(&commands).await;
        for (submission, result) in batch.into_iter().zip(results) {
            let _ = submission.reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_batch_window_and_size_match_spec() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_batch, 100);
        assert_eq!(config.batch_window_micros, 100);
    }
}
