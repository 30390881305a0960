//! Duplex TCP/TLS transport plus the two buffered byte pipes between socket
//! and codec. The live socket is an enum over a plain `TcpStream` and an
//! optional TLS layer on top of it, plus the two back-pressured pipes the
//! connection engine's three loops run over.
use crate::config::{ConnectionConfig, TlsConfig};
use crate::error::{RedisError, RedisResult};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// A byte pipe between socket and codec. Implemented on `tokio::io::duplex`,
/// which gives exactly the back-pressure contract needed: a bounded ring
/// that suspends the writer once the buffer fills (high watermark) and
/// resumes once the reader drains it (low watermark), without inventing a
/// bespoke ring buffer.
pub type Pipe = tokio::io::DuplexStream;

pub fn new_pipe(watermark_bytes: usize) -> (Pipe, Pipe) {
    tokio::io::duplex(watermark_bytes)
}

/// The live transport socket, TCP or TLS. Both variants implement
/// `AsyncRead`/`AsyncWrite` by delegating to the underlying stream.
pub enum Socket {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Socket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Socket::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Socket::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_flush(cx),
            Socket::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Socket::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Socket::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Opens the TCP socket, applies `TCP_NODELAY`/keepalive, and negotiates TLS
/// once on top if configured. `endpoint` is `host:port`.
pub async fn connect(endpoint: &str, config: &ConnectionConfig) -> RedisResult<Socket> {
    let tcp = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(endpoint))
        .await
        .map_err(|_| RedisError::ConnectFailure(format!("timed out connecting to {}", endpoint)))?
        .map_err(|e| RedisError::ConnectFailure(e.to_string()))?;

    tcp.set_nodelay(true)
        .map_err(|e| RedisError::ConnectFailure(e.to_string()))?;
    if let Some(secs) = config.keepalive_secs {
        let sock_ref = socket2::SockRef::from(&tcp);
        let keepalive = socket2::TcpKeepalive::new().with_time(std::time::Duration::from_secs(secs));
        sock_ref
            .set_tcp_keepalive(&keepalive)
            .map_err(|e| RedisError::ConnectFailure(e.to_string()))?;
    }

    if !config.tls.enabled {
        return Ok(Socket::Tcp(tcp));
    }

    let connector = build_tls_connector(&config.tls)?;
    let host = config
        .tls
        .target_host
        .clone()
        .unwrap_or_else(|| endpoint.split(':').next().unwrap_or(endpoint).to_string());
    let server_name = rustls::ServerName::try_from(host.as_str())
        .map_err(|e| RedisError::ConnectFailure(e.to_string()))?;
    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| RedisError::ConnectFailure(e.to_string()))?;
    Ok(Socket::Tls(Box::new(tls_stream)))
}

fn build_tls_connector(tls: &TlsConfig) -> RedisResult<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let verified = if tls.insecure_skip_verify {
        rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
    } else {
        rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
    };

    let mut client_config = match client_cert_chain(tls)? {
        Some((chain, key)) => verified
            .with_client_auth_cert(chain, key)
            .map_err(|e| RedisError::ConnectFailure(e.to_string()))?,
        None => verified.with_no_client_auth(),
    };
    client_config.enable_sni = true;
    Ok(TlsConnector::from(Arc::new(client_config)))
}

/// Parses a caller-supplied client cert/key pair (mutual TLS), pass-through:
/// the core neither generates nor mandates one.
fn client_cert_chain(
    tls: &TlsConfig,
) -> RedisResult<Option<(Vec<rustls::Certificate>, rustls::PrivateKey)>> {
    let (cert_pem, key_pem) = match (&tls.client_cert_pem, &tls.client_key_pem) {
        (Some(c), Some(k)) => (c, k),
        _ => return Ok(None),
    };

    let mut cert_reader = io::BufReader::new(cert_pem.as_slice());
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .map_err(|e| RedisError::ConnectFailure(e.to_string()))?
        .into_iter()
        .map(rustls::Certificate)
        .collect();

    let mut key_reader = io::BufReader::new(key_pem.as_slice());
    let key = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
        .map_err(|e| RedisError::ConnectFailure(e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| RedisError::ConnectFailure("no private key found in client_key_pem".into()))?;

    Ok(Some((certs, rustls::PrivateKey(key))))
}

/// Pass-through verifier for `insecure_skip_verify`; development use only,
/// never the default.
struct NoVerifier;

impl rustls::client::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}
