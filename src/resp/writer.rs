//! RESP writer, covering the full frame inventory plus a dedicated
//! command-array fast path.
use super::frame::Frame;
use crate::error::RedisResult;
use async_recursion::async_recursion;
use tokio::io::{AsyncWriteExt, BufWriter};

const CRLF: &[u8] = b"\r\n";

/// Writes frames and pre-formatted commands to any buffered async sink. The
/// caller controls flushing so multiple frames (a pipelined batch) can share
/// one `flush` call.
pub struct Writer<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWriteExt + Unpin + Send> Writer<W> {
    pub fn new(inner: W) -> Writer<W> {
        Writer {
            inner: BufWriter::new(inner),
        }
    }

    /// Serializes a command as `Array(1 + args.len)` of bulk strings, the
    /// shape every Redis/Valkey command takes on the wire.
    pub async fn write_command(&mut self, name: &[u8], args: &[&[u8]]) -> RedisResult<()> {
        self.write_array_header(1 + args.len()).await?;
        self.write_bulk(name).await?;
        for arg in args {
            self.write_bulk(arg).await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> RedisResult<()> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Flushes then half-closes the underlying sink, cascading EOF to
    /// whatever drains the other end of the pipe.
    pub async fn shutdown(&mut self) -> RedisResult<()> {
        self.inner.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> RedisResult<()> {
        write_frame_inner(&mut self.inner, frame).await
    }

    async fn write_array_header(&mut self, len: usize) -> RedisResult<()> {
        self.inner.write_u8(b'*').await?;
        self.inner.write_all(len.to_string().as_bytes()).await?;
        self.inner.write_all(CRLF).await?;
        Ok(())
    }

    async fn write_bulk(&mut self, data: &[u8]) -> RedisResult<()> {
        self.inner.write_u8(b'$').await?;
        self.inner.write_all(data.len().to_string().as_bytes()).await?;
        self.inner.write_all(CRLF).await?;
        self.inner.write_all(data).await?;
        self.inner.write_all(CRLF).await?;
        Ok(())
    }
}

#[async_recursion]
async fn write_frame_inner<W>(writer: &mut W, frame: &Frame) -> RedisResult<()>
where
    W: AsyncWriteExt + Unpin + Send,
{
    match frame {
        Frame::SimpleString(s) => {
            writer.write_u8(b'+').await?;
            writer.write_all(s).await?;
            writer.write_all(CRLF).await?;
        }
        Frame::SimpleError(s) => {
            writer.write_u8(b'-').await?;
            writer.write_all(s).await?;
            writer.write_all(CRLF).await?;
        }
        Frame::Integer(i) => {
            writer.write_u8(b':').await?;
            writer.write_all(i.to_string().as_bytes()).await?;
            writer.write_all(CRLF).await?;
        }
        Frame::BulkString(s) => {
            writer.write_u8(b'$').await?;
            writer.write_all(s.len().to_string().as_bytes()).await?;
            writer.write_all(CRLF).await?;
            writer.write_all(s).await?;
            writer.write_all(CRLF).await?;
        }
        Frame::Array(items) => {
            writer.write_u8(b'*').await?;
            writer.write_all(items.len().to_string().as_bytes()).await?;
            writer.write_all(CRLF).await?;
            for item in items {
                write_frame_inner(writer, item).await?;
            }
        }
        Frame::Null => {
            writer.write_all(b"_").await?;
            writer.write_all(CRLF).await?;
        }
        Frame::Boolean(b) => {
            writer.write_u8(b'#').await?;
            writer.write_u8(if *b { b't' } else { b'f' }).await?;
            writer.write_all(CRLF).await?;
        }
        Frame::Double(d) => {
            writer.write_u8(b',').await?;
            writer.write_all(format_double(*d).as_bytes()).await?;
            writer.write_all(CRLF).await?;
        }
        Frame::BigNumber(s) => {
            writer.write_u8(b'(').await?;
            writer.write_all(s).await?;
            writer.write_all(CRLF).await?;
        }
        Frame::BulkError(s) => {
            writer.write_u8(b'!').await?;
            writer.write_all(s.len().to_string().as_bytes()).await?;
            writer.write_all(CRLF).await?;
            writer.write_all(s).await?;
            writer.write_all(CRLF).await?;
        }
        Frame::VerbatimString { format, data } => {
            writer.write_u8(b'=').await?;
            writer
                .write_all((data.len() + 4).to_string().as_bytes())
                .await?;
            writer.write_all(CRLF).await?;
            writer.write_all(format).await?;
            writer.write_u8(b':').await?;
            writer.write_all(data).await?;
            writer.write_all(CRLF).await?;
        }
        Frame::Map(pairs) => {
            writer.write_u8(b'%').await?;
            writer.write_all(pairs.len().to_string().as_bytes()).await?;
            writer.write_all(CRLF).await?;
            for (k, v) in pairs {
                write_frame_inner(writer, k).await?;
                write_frame_inner(writer, v).await?;
            }
        }
        Frame::Set(items) => {
            writer.write_u8(b'~').await?;
            writer.write_all(items.len().to_string().as_bytes()).await?;
            writer.write_all(CRLF).await?;
            for item in items {
                write_frame_inner(writer, item).await?;
            }
        }
        Frame::Push(items) => {
            writer.write_u8(b'>').await?;
            writer.write_all(items.len().to_string().as_bytes()).await?;
            writer.write_all(CRLF).await?;
            for item in items {
                write_frame_inner(writer, item).await?;
            }
        }
    }
    Ok(())
}

/// Round-trip-safe decimal formatting; `+inf`/`-inf` map to the RESP literals.
fn format_double(d: f64) -> String {
    if d.is_infinite() {
        if d > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        }
    } else if d.is_nan() {
        "nan".to_string()
    } else {
        // `{}` on f64 already produces the shortest round-trip representation.
        format!("{}", d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn encode(frame: &Frame) -> Vec<u8> {
        let mut buf = Vec::new();
        write_frame_inner(&mut buf, frame).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn encodes_simple_string() {
        let out = encode(&Frame::SimpleString(Bytes::from_static(b"OK"))).await;
        assert_eq!(out, b"+OK\r\n");
    }

    #[tokio::test]
    async fn encodes_bulk_string() {
        let out = encode(&Frame::BulkString(Bytes::from_static(b"foobar"))).await;
        assert_eq!(out, b"$6\r\nfoobar\r\n");
    }

    #[tokio::test]
    async fn encodes_null_as_resp3_underscore() {
        let out = encode(&Frame::Null).await;
        assert_eq!(out, b"_\r\n");
    }

    #[tokio::test]
    async fn encodes_infinities() {
        assert_eq!(encode(&Frame::Double(f64::INFINITY)).await, b",inf\r\n");
        assert_eq!(encode(&Frame::Double(f64::NEG_INFINITY)).await, b",-inf\r\n");
    }

    #[tokio::test]
    async fn command_array_shape() {
        let mut writer = Writer::new(Vec::new());
        writer.write_command(b"SET", &[b"k", b"v"]).await.unwrap();
        writer.flush().await.unwrap();
        // Peel the BufWriter back open for assertion.
        let inner = writer.inner.into_inner();
        assert_eq!(inner, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }
}
