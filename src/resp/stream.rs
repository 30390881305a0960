//! Incremental frame reader over any `AsyncRead`: grow a `BytesMut`, try the
//! parser, and only pull more bytes off the source when the parser reports
//! `Incomplete`.
use super::frame::Frame;
use super::parser::{self, ParseError};
use crate::error::{RedisError, RedisResult};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> FrameReader<R> {
        FrameReader {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Reads and decodes exactly one frame, awaiting more socket bytes as
    /// needed. A structural parse failure is reported as a protocol
    /// violation; the caller must close the connection, never resynchronize
    /// the stream.
    pub async fn read_frame(&mut self) -> RedisResult<Frame> {
        loop {
            if !self.buf.is_empty() {
                match parser::read_frame(&self.buf) {
                    Ok((consumed, frame)) => {
                        self.buf.advance(consumed);
                        return Ok(frame);
                    }
                    Err(ParseError::Incomplete) => {}
                    Err(ParseError::Protocol(msg)) => {
                        return Err(RedisError::ProtocolViolation(msg));
                    }
                }
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(RedisError::Disconnected("connection closed by peer".into()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn reads_one_frame_at_a_time_from_a_trickling_source() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(b"+O").await.unwrap();
            tx.write_all(b"K\r\n:4").await.unwrap();
            tx.write_all(b"2\r\n").await.unwrap();
        });
        assert_eq!(
            reader.read_frame().await.unwrap(),
            Frame::SimpleString(Bytes::from_static(b"OK"))
        );
        assert_eq!(reader.read_frame().await.unwrap(), Frame::Integer(42));
    }

    #[tokio::test]
    async fn eof_before_a_full_frame_is_disconnected() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(tx);
        let mut reader = FrameReader::new(rx);
        assert!(matches!(
            reader.read_frame().await,
            Err(RedisError::Disconnected(_))
        ));
    }
}
