//! Errors surfaced by the client.

use crate::irc::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// `connect` was called without a token provider.
    #[error("no credential configured")]
    NoCredential,

    /// The token provider could not hand out a token.
    #[error("credential unavailable: {0:#}")]
    Credential(anyhow::Error),

    /// The server refused the login (bad or expired token).
    #[error("login rejected: {0}")]
    AuthRejected(String),

    #[error("TCP connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {addr} failed: {source}")]
    TlsHandshake {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// No live transport to write to.
    #[error("not connected")]
    NotConnected,

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),
}
