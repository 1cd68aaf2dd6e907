//! Client SDK for Twitch chat (TMI).
//!
//! One [`client::ChatClient`] owns one connection for one identity. Channels
//! are joined with reference counting, so several consumers can share a
//! channel and the `JOIN`/`PART` only goes out for the first and last of them.
//! Chat messages are parsed, the sender is resolved to a profile, and the
//! result is handed to every [`event::ChatListener`] registered on the channel.

use std::future::Future;
use std::pin::Pin;

pub mod auth;
pub mod client;
pub mod command;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod irc;
pub mod registry;
pub mod transport;
pub mod users;

pub use client::{ChatClient, ConnectConfig, ConnectionState, ReconnectConfig};
pub use error::ClientError;
pub use event::ChatListener;
pub use users::UserProfile;

/// Boxed future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
