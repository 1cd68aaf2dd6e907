//! TMI client: connection lifecycle, login handshake, and the read loop.
//!
//! A [`ChatClient`] keeps at most one live transport. All mutable state (the
//! writer half, connection state, channel registry, read-loop handle) sits in
//! one `Session` behind a single async mutex, and every write happens while
//! holding it. The reader half belongs to the one background read loop, so
//! inbound lines are handled strictly in arrival order without blocking
//! writers.
//!
//! ## Reconnection
//!
//! While the caller wants to be connected, a closed stream is redialed right
//! away and the handshake replays every channel in the registry. Consecutive
//! failed redials back off according to [`ReconnectConfig`];
//! [`ReconnectConfig::immediate`] retries without waiting.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::auth::{Scope, TokenProvider};
use crate::command::Command;
use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::event::ChatListener;
use crate::irc::ParsedMessage;
use crate::registry::{ChannelRegistry, canonical_channel};
use crate::transport::{self, Connector, Dialer, LineReader};
use crate::users::UserResolver;

/// Twitch chat over TLS.
pub const TWITCH_SERVER: &str = "irc.chat.twitch.tv:6697";

/// Configuration for connecting to the chat server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Login name; also used for `USER`.
    pub nick: String,
    /// Real name sent in `USER`.
    pub realname: String,
    /// Use TLS.
    pub tls: bool,
    /// Capabilities requested with `CAP REQ`.
    pub capabilities: Vec<String>,
    /// How long the handshake waits for the server's greeting.
    pub greeting_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: TWITCH_SERVER.to_string(),
            nick: "justinfan12345".to_string(),
            realname: "justinfan12345".to_string(),
            tls: true,
            capabilities: vec!["twitch.tv/tags".to_string()],
            greeting_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ConnectConfig {
    pub fn new(nick: impl Into<String>) -> Self {
        let nick = nick.into();
        Self {
            realname: nick.clone(),
            nick,
            ..Default::default()
        }
    }
}

/// Delay policy between failed redials.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failed redial.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Retry as fast as possible, forever.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }
}

struct Backoff {
    config: ReconnectConfig,
    current: Duration,
}

impl Backoff {
    fn new(config: &ReconnectConfig) -> Self {
        Self {
            config: config.clone(),
            current: config.initial_delay,
        }
    }

    fn reset(&mut self) {
        self.current = self.config.initial_delay;
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let jitter = rand_jitter(delay.as_millis() as u64 / 4);
        self.current = Duration::from_millis(
            ((delay.as_millis() as f64 * self.config.backoff_factor) as u64 + jitter)
                .min(self.config.max_delay.as_millis() as u64),
        );
        delay
    }
}

fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Reconnecting,
}

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Session {
    state: ConnectionState,
    /// The caller wants to stay connected.
    desired: bool,
    writer: Option<transport::LineWriter>,
    /// Bumped for every new transport.
    generation: u64,
    registry: ChannelRegistry,
    worker: Option<Worker>,
}

impl Session {
    async fn send(&mut self, command: &Command) -> Result<(), ClientError> {
        let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
        writer.send(command).await.map_err(ClientError::Write)
    }

    /// Like `send`, but only on the transport `generation` refers to.
    async fn send_on(&mut self, generation: u64, command: &Command) -> Result<(), ClientError> {
        if self.generation != generation {
            return Ok(());
        }
        self.send(command).await
    }

    fn worker_alive(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.handle.is_finished())
    }
}

struct Inner {
    config: ConnectConfig,
    connector: Arc<dyn Connector>,
    tokens: Option<Arc<dyn TokenProvider>>,
    dispatcher: Dispatcher,
    session: Mutex<Session>,
}

/// Handle to a chat connection. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

pub struct ChatClientBuilder {
    config: ConnectConfig,
    resolver: Arc<dyn UserResolver>,
    tokens: Option<Arc<dyn TokenProvider>>,
    connector: Option<Arc<dyn Connector>>,
}

impl ChatClientBuilder {
    pub fn tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Replace the TCP/TLS dialer (tests, proxies).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> ChatClient {
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(Dialer::new(self.config.server_addr.clone(), self.config.tls)),
        };
        ChatClient {
            inner: Arc::new(Inner {
                config: self.config,
                connector,
                tokens: self.tokens,
                dispatcher: Dispatcher::new(self.resolver),
                session: Mutex::new(Session {
                    state: ConnectionState::Disconnected,
                    desired: false,
                    writer: None,
                    generation: 0,
                    registry: ChannelRegistry::new(),
                    worker: None,
                }),
            }),
        }
    }
}

impl ChatClient {
    pub fn builder(config: ConnectConfig, resolver: Arc<dyn UserResolver>) -> ChatClientBuilder {
        ChatClientBuilder {
            config,
            resolver,
            tokens: None,
            connector: None,
        }
    }

    /// Dial, log in, and start the read loop.
    ///
    /// Returns `Ok(())` without doing anything if a session is already
    /// running. On failure the client stays disconnected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let Some(tokens) = inner.tokens.as_ref() else {
            tracing::warn!("Missing authentication to connect with server");
            return Err(ClientError::NoCredential);
        };
        tokens.require_scopes(&[Scope::ChatRead, Scope::ChatEdit]);

        let mut session = inner.session.lock().await;
        if session.worker_alive() {
            tracing::debug!("Already connected");
            session.desired = true;
            return Ok(());
        }

        session.desired = true;
        session.state = ConnectionState::Connecting;
        let active = match inner.establish(&mut session).await {
            Ok(active) => active,
            Err(e) => {
                session.desired = false;
                session.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_read_loop(inner.clone(), Some(active), stop_rx));
        session.worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// Send `QUIT`, close the transport, and stop the read loop. Calling it
    /// while disconnected does nothing.
    pub async fn disconnect(&self) {
        let mut session = self.inner.session.lock().await;
        session.desired = false;
        if let Some(worker) = session.worker.take() {
            let _ = worker.stop.send(true);
        }
        if let Some(mut writer) = session.writer.take() {
            if let Err(e) = writer.send(&Command::Quit).await {
                tracing::debug!(error = %e, "QUIT not delivered");
            }
            let _ = writer.shutdown().await;
            tracing::info!("Closed connected client");
        }
        session.state = ConnectionState::Disconnected;
    }

    /// Write one line as-is (CRLF is appended).
    pub async fn send_raw(&self, text: &str) -> Result<(), ClientError> {
        let mut session = self.inner.session.lock().await;
        session.send(&Command::Raw(text.to_string())).await
    }

    /// Send a chat message to a channel.
    pub async fn say(&self, channel: &str, text: &str) -> Result<(), ClientError> {
        let mut session = self.inner.session.lock().await;
        session
            .send(&Command::Privmsg {
                channel: canonical_channel(channel),
                text: text.to_string(),
            })
            .await
    }

    /// Subscribe `listener` to `channel`. The `JOIN` goes out only for the
    /// first subscription; while disconnected it is deferred to the next
    /// handshake.
    ///
    /// If the `JOIN` cannot be written the subscription is rolled back, so an
    /// `Err` always means nothing was registered.
    pub async fn join(&self, channel: &str, listener: Arc<dyn ChatListener>) -> Result<(), ClientError> {
        let mut session = self.inner.session.lock().await;
        if !session.registry.join(channel, listener.clone()) || session.writer.is_none() {
            return Ok(());
        }
        if let Err(e) = session.send(&Command::Join(canonical_channel(channel))).await {
            session.registry.leave(channel, &listener);
            return Err(e);
        }
        Ok(())
    }

    /// Drop one subscription. The `PART` goes out when the last one is gone.
    /// The subscription is gone even if writing the `PART` fails.
    pub async fn leave(&self, channel: &str, listener: &Arc<dyn ChatListener>) -> Result<(), ClientError> {
        let mut session = self.inner.session.lock().await;
        if session.registry.leave(channel, listener) && session.writer.is_some() {
            session.send(&Command::Part(canonical_channel(channel))).await?;
        }
        Ok(())
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.session.lock().await.state
    }

    /// Channels currently subscribed (and replayed on reconnect).
    pub async fn channels(&self) -> Vec<String> {
        self.inner.session.lock().await.registry.channels()
    }

    /// Outstanding subscriptions for `channel`.
    pub async fn subscribers(&self, channel: &str) -> usize {
        self.inner.session.lock().await.registry.ref_count(channel)
    }
}

impl Inner {
    /// Dial a new transport and log in on it. On success the writer is
    /// installed in the session and the reader is returned with its
    /// generation.
    async fn establish(&self, session: &mut Session) -> Result<(LineReader, u64), ClientError> {
        let stream = self.connector.connect().await?;
        let (mut reader, writer) = transport::split(stream);
        session.generation += 1;
        session.writer = Some(writer);

        if let Err(e) = self.login(session, &mut reader).await {
            if let Some(mut writer) = session.writer.take() {
                let _ = writer.shutdown().await;
            }
            return Err(e);
        }
        tracing::info!(
            server = %self.config.server_addr,
            generation = session.generation,
            "Connected"
        );
        Ok((reader, session.generation))
    }

    async fn login(&self, session: &mut Session, reader: &mut LineReader) -> Result<(), ClientError> {
        let tokens = self.tokens.as_ref().ok_or(ClientError::NoCredential)?;
        session.state = ConnectionState::Authenticating;
        tokens.invalidate();
        let token = tokens.access_token().await.map_err(ClientError::Credential)?;

        let nick = &self.config.nick;
        if !self.config.capabilities.is_empty() {
            session
                .send(&Command::CapReq(self.config.capabilities.join(" ")))
                .await?;
        }
        session.send(&Command::pass_oauth(&token)).await?;
        session.send(&Command::Nick(nick.clone())).await?;
        session
            .send(&Command::User {
                name: nick.clone(),
                realname: self.config.realname.clone(),
            })
            .await?;

        // Swallow the greeting before replaying joins.
        match tokio::time::timeout(self.config.greeting_timeout, reader.read_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(reason) = login_rejection(&line) {
                    return Err(ClientError::AuthRejected(reason));
                }
                tracing::debug!(greeting = %line, "Login sent");
            }
            Ok(Ok(None)) => {
                return Err(ClientError::Read(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed during login",
                )));
            }
            Ok(Err(e)) => return Err(ClientError::Read(e)),
            Err(_) => tracing::debug!("No greeting before timeout"),
        }

        for channel in session.registry.channels() {
            session.send(&Command::Join(channel)).await?;
        }
        session.state = ConnectionState::Ready;
        Ok(())
    }

    async fn reestablish(&self, stop: &watch::Receiver<bool>) -> Result<(LineReader, u64), ClientError> {
        let mut session = self.session.lock().await;
        if *stop.borrow() || !session.desired {
            return Err(ClientError::NotConnected);
        }
        session.state = ConnectionState::Reconnecting;
        tracing::info!(server = %self.config.server_addr, "Reconnecting");
        match self.establish(&mut session).await {
            Ok(active) => Ok(active),
            Err(e) => {
                session.state = ConnectionState::Reconnecting;
                Err(e)
            }
        }
    }

    /// Read and handle lines until the stream ends or the loop is stopped.
    async fn pump(&self, reader: &mut LineReader, generation: u64, stop: &mut watch::Receiver<bool>) {
        loop {
            let line = tokio::select! {
                line = reader.read_line() => line,
                _ = stop.changed() => return,
            };
            match line {
                Ok(Some(line)) => {
                    if let Err(e) = self.handle_line(&line, reader, generation).await {
                        tracing::warn!(error = %e, "Failed to handle line");
                    }
                }
                Ok(None) => {
                    tracing::info!("Server closed the connection");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Read failed");
                    return;
                }
            }
        }
    }

    async fn handle_line(&self, line: &str, reader: &mut LineReader, generation: u64) -> Result<(), ClientError> {
        let msg = ParsedMessage::parse(line)?;
        match msg.command.as_str() {
            "PING" => {
                let token = msg.trailing();
                let pong = Command::Pong((!token.is_empty()).then(|| token.to_string()));
                self.session.lock().await.send_on(generation, &pong).await?;
            }
            "RECONNECT" => {
                tracing::info!("Server asked for a fresh login");
                let mut session = self.session.lock().await;
                if session.generation == generation && session.writer.is_some() {
                    self.login(&mut session, reader).await?;
                }
            }
            "PRIVMSG" => {
                let Some(event) = msg.chat_event() else {
                    return Ok(());
                };
                let listeners = self.session.lock().await.registry.listeners(&event.channel);
                self.dispatcher.dispatch(&event, &listeners).await;
            }
            other => tracing::trace!(command = other, "Ignoring"),
        }
        Ok(())
    }

    /// Tear down the transport `generation` refers to, if it is still the
    /// current one.
    async fn stream_closed(&self, generation: u64) {
        let mut session = self.session.lock().await;
        if session.generation != generation {
            return;
        }
        if let Some(mut writer) = session.writer.take() {
            let _ = writer.shutdown().await;
        }
        session.state = if session.desired {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Disconnected
        };
    }
}

/// `:tmi.twitch.tv NOTICE * :Login authentication failed` and friends.
fn login_rejection(line: &str) -> Option<String> {
    let msg = ParsedMessage::parse(line).ok()?;
    if msg.command != "NOTICE" {
        return None;
    }
    let text = msg.trailing();
    let lowered = text.to_ascii_lowercase();
    (lowered.contains("authentication failed") || lowered.contains("improperly formatted auth"))
        .then(|| text.to_string())
}

async fn run_read_loop(
    inner: Arc<Inner>,
    mut pending: Option<(LineReader, u64)>,
    mut stop: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(&inner.config.reconnect);
    loop {
        if *stop.borrow() {
            break;
        }

        let (mut reader, generation) = match pending.take() {
            Some(active) => active,
            None => match inner.reestablish(&stop).await {
                Ok(active) => {
                    backoff.reset();
                    active
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnect failed, retrying"
                    );
                    if delay.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = stop.changed() => {}
                        }
                    }
                    continue;
                }
            },
        };

        inner.pump(&mut reader, generation, &mut stop).await;
        inner.stream_closed(generation).await;
    }
    tracing::debug!("Read loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = Backoff::new(&ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
        });
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(200) && second < Duration::from_millis(225));
        for _ in 0..10 {
            assert!(backoff.next_delay() <= Duration::from_millis(1000));
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn immediate_backoff_never_waits() {
        let mut backoff = Backoff::new(&ReconnectConfig::immediate());
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Duration::ZERO);
        }
    }

    #[test]
    fn detects_login_rejection() {
        assert_eq!(
            login_rejection(":tmi.twitch.tv NOTICE * :Login authentication failed").as_deref(),
            Some("Login authentication failed")
        );
        assert!(login_rejection(":tmi.twitch.tv NOTICE * :Improperly formatted auth").is_some());
        assert!(login_rejection(":tmi.twitch.tv 001 bot :Welcome, GLHF!").is_none());
        assert!(login_rejection(":tmi.twitch.tv NOTICE #c :Slow mode is on").is_none());
    }

    #[test]
    fn default_config_targets_twitch() {
        let config = ConnectConfig::new("mybot");
        assert_eq!(config.server_addr, TWITCH_SERVER);
        assert_eq!(config.nick, "mybot");
        assert_eq!(config.realname, "mybot");
        assert!(config.tls);
        assert_eq!(config.capabilities, vec!["twitch.tv/tags".to_string()]);
    }
}
