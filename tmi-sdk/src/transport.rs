//! Line transport: dialing, TLS, and CRLF line I/O.
//!
//! A [`Connector`] produces a byte stream; [`split`] turns it into a
//! [`LineReader`] owned by the read loop and a [`LineWriter`] shared under the
//! client's lock.

use std::sync::Arc;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::BoxFuture;
use crate::command::{CRLF, Command};
use crate::error::ClientError;

/// Longest inbound line kept. Tags may take up to 8191 bytes on top of the
/// 512-byte message.
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// Any duplex byte stream the client can speak TMI over.
pub trait ChatStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ChatStream for T {}

pub type BoxedStream = Box<dyn ChatStream>;

/// Opens a fresh stream to the chat server.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream, ClientError>>;
}

/// TCP + TLS dialer for a `host:port` address.
#[derive(Debug, Clone)]
pub struct Dialer {
    pub server_addr: String,
    pub tls: bool,
}

impl Dialer {
    pub fn new(server_addr: impl Into<String>, tls: bool) -> Self {
        Self {
            server_addr: server_addr.into(),
            tls,
        }
    }

    async fn dial(&self) -> Result<BoxedStream, ClientError> {
        let addr = self.server_addr.clone();
        let mode = if self.tls { "TLS" } else { "plain" };

        tracing::debug!("Resolving {addr}...");
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|source| ClientError::Connect { addr: addr.clone(), source })?;
        tracing::debug!("TCP connected to {addr} ({mode})");

        if !self.tls {
            return Ok(Box::new(tcp));
        }

        let host = addr.rsplit_once(':').map_or(addr.as_str(), |(host, _)| host);
        let dns_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| ClientError::InvalidServerName(host.to_string()))?;
        let connector = TlsConnector::from(Arc::new(rustls_default_config()));
        let tls_stream = connector
            .connect(dns_name, tcp)
            .await
            .map_err(|source| ClientError::TlsHandshake { addr: addr.clone(), source })?;
        tracing::debug!("TLS handshake complete");
        Ok(Box::new(tls_stream))
    }
}

impl Connector for Dialer {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedStream, ClientError>> {
        Box::pin(self.dial())
    }
}

fn install_crypto_provider() {
    // ring wins when both providers are compiled in.
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

/// Split a stream into its reading and writing halves.
pub fn split(stream: BoxedStream) -> (LineReader, LineWriter) {
    let (reader, writer) = tokio::io::split(stream);
    (
        LineReader {
            inner: BufReader::new(reader),
            buf: Vec::new(),
        },
        LineWriter { inner: writer },
    )
}

pub struct LineReader {
    inner: BufReader<ReadHalf<BoxedStream>>,
    /// Bytes of the line being assembled. Kept across calls so a cancelled
    /// read resumes where it stopped.
    buf: Vec<u8>,
}

impl LineReader {
    /// Next line without its terminator, or `None` once the stream has ended.
    ///
    /// Invalid UTF-8 is replaced rather than rejected. Lines longer than
    /// [`MAX_LINE_LEN`] are discarded.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let limit = MAX_LINE_LEN.saturating_sub(self.buf.len()) as u64;
            let n = (&mut self.inner).take(limit).read_until(b'\n', &mut self.buf).await?;
            if self.buf.ends_with(b"\n") {
                break;
            }
            if self.buf.len() >= MAX_LINE_LEN {
                tracing::warn!(max = MAX_LINE_LEN, "Discarding overlong line");
                self.buf.clear();
                self.discard_line().await?;
                continue;
            }
            if n == 0 {
                if self.buf.is_empty() {
                    tracing::trace!("No message to receive");
                    return Ok(None);
                }
                // Stream ended mid-line.
                break;
            }
        }

        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.buf.clear();
        tracing::trace!(line = %line, "<<");
        Ok(Some(line))
    }

    /// Skip input up to and including the next `\n`.
    async fn discard_line(&mut self) -> std::io::Result<()> {
        loop {
            let (used, done) = {
                let chunk = self.inner.fill_buf().await?;
                if chunk.is_empty() {
                    return Ok(());
                }
                match chunk.iter().position(|&b| b == b'\n') {
                    Some(i) => (i + 1, true),
                    None => (chunk.len(), false),
                }
            };
            self.inner.consume(used);
            if done {
                return Ok(());
            }
        }
    }
}

pub struct LineWriter {
    inner: WriteHalf<BoxedStream>,
}

impl LineWriter {
    pub async fn send(&mut self, command: &Command) -> std::io::Result<()> {
        match command {
            Command::Pass(_) => tracing::trace!(">> PASS ***"),
            other => tracing::trace!(line = %other, ">>"),
        }
        self.write_line(&command.to_string()).await
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(CRLF.as_bytes()).await?;
        self.inner.flush().await
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }
}
