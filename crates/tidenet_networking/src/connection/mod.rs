//! # Match Connect Flow
//!
//! Drives a transport through connect → authenticate → join and reports
//! every stage outward.
//!
//! ```text
//!   start_connect ──► Connected ──► authenticate ──► Authenticated ──► join_match ──► MatchJoined
//!        │                               │                                 │
//!        └─ ConnectingFailed / timeout   └─ AuthFailed                     └─ JoinFailed
//! ```
//!
//! A `Disconnected` event at any stage aborts the attempt. A rejected or
//! timed out stage publishes its failure event and closes the transport, so
//! the next attempt starts from scratch. Only one attempt may run at a time;
//! the guard is released and stale transport events are drained when the
//! attempt finishes or its future is dropped. An attempt that ends without
//! joining never leaves the transport connected.

use crate::config::ConnectConfig;
use crate::error::{NetError, NetResult};
use crate::synchronizer::SyncSample;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, trace, warn};

/// Results reported by the transport for the commands it was given.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerClientEvent {
    /// Transport connected; carries the first time sync measurement.
    Connected(SyncSample),
    /// Transport could not connect.
    ConnectingFailed,
    /// Authentication answer: the user id or a rejection message.
    Authenticated(Result<String, String>),
    /// Spectator authentication answer.
    AuthenticatedAsSpectator(Result<(), String>),
    /// Match join answer: the match id or a rejection message.
    MatchJoined(Result<String, String>),
    /// The joined match ended.
    MatchEnded(String),
    /// Server closed the connection.
    Disconnected,
}

/// Transport seam of the connect flow. Commands return immediately; their
/// outcomes arrive later as [`ServerClientEvent`]s.
pub trait GameServerClient: Send {
    /// Opens a connection to `address`.
    fn start_connect(&mut self, address: &str);
    /// Sends player credentials.
    fn authenticate(&mut self, secret: &str);
    /// Asks to watch without a seat.
    fn authenticate_as_spectator(&mut self);
    /// Asks to join the match.
    fn join_match(&mut self);
    /// Closes the connection.
    fn disconnect(&mut self);
    /// True while a connection is open.
    fn is_connected(&self) -> bool;
}

/// Stage outcomes published to the application.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// Connected to the game server.
    Connected(SyncSample),
    /// Connect stage failed.
    ConnectingFailed,
    /// Authenticated as the given user.
    Authenticated(String),
    /// Authentication rejected.
    AuthFailed(String),
    /// Authenticated as a spectator.
    AuthenticatedAsSpectator,
    /// Joined the given match.
    MatchJoined(String),
    /// Match join rejected.
    JoinFailed(String),
    /// The joined match ended.
    MatchEnded(String),
    /// Server dropped the connection.
    DisconnectedByServer,
    /// We closed the connection.
    DisconnectedByClient,
}

#[derive(Clone, Copy, Debug)]
enum Stage {
    Connect,
    Authenticate,
    Join,
}

impl Stage {
    fn failure(self, message: &str) -> (ConnectionEvent, NetError) {
        match self {
            Self::Connect => (ConnectionEvent::ConnectingFailed, NetError::ConnectingFailed),
            Self::Authenticate => (
                ConnectionEvent::AuthFailed(message.to_owned()),
                NetError::AuthFailed(message.to_owned()),
            ),
            Self::Join => (
                ConnectionEvent::JoinFailed(message.to_owned()),
                NetError::JoinFailed(message.to_owned()),
            ),
        }
    }
}

/// Releases the in-flight flag and drops events left over from the attempt.
/// Closes the transport unless the attempt joined a match.
struct AttemptGuard<'a, C: GameServerClient> {
    client: &'a Mutex<C>,
    connecting: &'a AtomicBool,
    events: &'a tokio::sync::Mutex<UnboundedReceiver<ServerClientEvent>>,
    joined: bool,
}

impl<C: GameServerClient> Drop for AttemptGuard<'_, C> {
    fn drop(&mut self) {
        if !self.joined {
            let mut client = self.client.lock();
            if client.is_connected() {
                debug!("attempt abandoned, closing transport");
                client.disconnect();
            }
        }
        if let Ok(mut events) = self.events.try_lock() {
            let mut stale = 0usize;
            while events.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                trace!(stale, "dropped stale transport events");
            }
        }
        self.connecting.store(false, Ordering::Release);
    }
}

/// Connect/authenticate/join driver over a [`GameServerClient`].
pub struct MatchConnectClient<C> {
    client: Mutex<C>,
    events: tokio::sync::Mutex<UnboundedReceiver<ServerClientEvent>>,
    connecting: AtomicBool,
    address: String,
    config: ConnectConfig,
    outward_tx: Sender<ConnectionEvent>,
    outward_rx: Receiver<ConnectionEvent>,
}

impl<C: GameServerClient> MatchConnectClient<C> {
    /// Driver for `client`, whose outcomes arrive on `events`.
    pub fn new(
        client: C,
        events: UnboundedReceiver<ServerClientEvent>,
        address: impl Into<String>,
        config: ConnectConfig,
    ) -> Self {
        let (outward_tx, outward_rx) = unbounded();
        Self {
            client: Mutex::new(client),
            events: tokio::sync::Mutex::new(events),
            connecting: AtomicBool::new(false),
            address: address.into(),
            config,
            outward_tx,
            outward_rx,
        }
    }

    /// Receiver of stage outcomes.
    #[must_use]
    pub fn events(&self) -> Receiver<ConnectionEvent> {
        self.outward_rx.clone()
    }

    /// True while an attempt is in flight.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    /// True while the transport holds a connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.lock().is_connected()
    }

    /// Connects, authenticates with `secret` and joins. Returns the match id.
    ///
    /// # Errors
    ///
    /// `AlreadyConnecting`/`AlreadyConnected` if the guard rejects the
    /// attempt, otherwise the error of the stage that failed.
    pub async fn connect_and_join_as_player(&self, secret: &str) -> NetResult<String> {
        let mut guard = self.begin()?;
        let mut events = self.events.lock().await;

        self.connect(&mut events).await?;

        self.client.lock().authenticate(secret);
        let user_id = self
            .await_stage(&mut events, Stage::Authenticate, |event| match event {
                ServerClientEvent::Authenticated(answer) => Some(answer),
                _ => None,
            })
            .await?;
        match user_id {
            Ok(user_id) => {
                info!(user_id = %user_id, "authenticated");
                self.publish(ConnectionEvent::Authenticated(user_id));
            }
            Err(message) => {
                warn!(%message, "authentication rejected");
                return Err(self.fail(Stage::Authenticate, &message));
            }
        }

        let match_id = self.join(&mut events).await?;
        guard.joined = true;
        Ok(match_id)
    }

    /// Connects as a spectator and joins. Returns the match id.
    ///
    /// # Errors
    ///
    /// Same as [`connect_and_join_as_player`](Self::connect_and_join_as_player).
    pub async fn connect_and_join_as_spectator(&self) -> NetResult<String> {
        let mut guard = self.begin()?;
        let mut events = self.events.lock().await;

        self.connect(&mut events).await?;

        self.client.lock().authenticate_as_spectator();
        let answer = self
            .await_stage(&mut events, Stage::Authenticate, |event| match event {
                ServerClientEvent::AuthenticatedAsSpectator(answer) => Some(answer),
                _ => None,
            })
            .await?;
        if let Err(message) = answer {
            warn!(%message, "spectator authentication rejected");
            return Err(self.fail(Stage::Authenticate, &message));
        }
        info!("authenticated as spectator");
        self.publish(ConnectionEvent::AuthenticatedAsSpectator);

        let match_id = self.join(&mut events).await?;
        guard.joined = true;
        Ok(match_id)
    }

    /// [`connect_and_join_as_player`](Self::connect_and_join_as_player)
    /// retried per [`connect_with_retry`].
    ///
    /// # Errors
    ///
    /// The last attempt's error.
    pub async fn connect_and_join_as_player_with_retry(&self, secret: &str) -> NetResult<String> {
        connect_with_retry(&self.config, move |_| self.connect_and_join_as_player(secret)).await
    }

    /// Closes the connection from our side.
    pub fn disconnect(&self) {
        let mut client = self.client.lock();
        if client.is_connected() {
            client.disconnect();
            info!("disconnected by client");
            self.publish(ConnectionEvent::DisconnectedByClient);
        }
    }

    /// Forwards match-end and disconnect notifications that arrived after
    /// joining. Does nothing while an attempt holds the event stream.
    pub fn poll_events(&self) -> usize {
        let Ok(mut events) = self.events.try_lock() else {
            return 0;
        };
        let mut forwarded = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                ServerClientEvent::MatchEnded(match_id) => {
                    info!(match_id = %match_id, "match ended");
                    self.publish(ConnectionEvent::MatchEnded(match_id));
                    forwarded += 1;
                }
                ServerClientEvent::Disconnected => {
                    info!("disconnected by server");
                    self.publish(ConnectionEvent::DisconnectedByServer);
                    forwarded += 1;
                }
                other => trace!(?other, "ignoring transport event"),
            }
        }
        forwarded
    }

    fn begin(&self) -> NetResult<AttemptGuard<'_, C>> {
        if self.is_connected() {
            return Err(NetError::AlreadyConnected);
        }
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(NetError::AlreadyConnecting);
        }
        Ok(AttemptGuard {
            client: &self.client,
            connecting: &self.connecting,
            events: &self.events,
            joined: false,
        })
    }

    fn publish(&self, event: ConnectionEvent) {
        let _ = self.outward_tx.send(event);
    }

    /// Closes the transport and reports `stage` as failed.
    fn fail(&self, stage: Stage, message: &str) -> NetError {
        let (event, err) = stage.failure(message);
        {
            let mut client = self.client.lock();
            if client.is_connected() {
                client.disconnect();
            }
        }
        self.publish(event);
        err
    }

    async fn connect(&self, events: &mut UnboundedReceiver<ServerClientEvent>) -> NetResult<()> {
        info!(address = %self.address, "connecting");
        self.client.lock().start_connect(&self.address);
        let connected = self
            .await_stage(events, Stage::Connect, |event| match event {
                ServerClientEvent::Connected(sample) => Some(Some(sample)),
                ServerClientEvent::ConnectingFailed => Some(None),
                _ => None,
            })
            .await?;
        if let Some(sample) = connected {
            info!(rtt_ms = sample.round_trip.as_millis(), "connected");
            self.publish(ConnectionEvent::Connected(sample));
            Ok(())
        } else {
            warn!(address = %self.address, "connecting failed");
            Err(self.fail(Stage::Connect, "connecting failed"))
        }
    }

    async fn join(&self, events: &mut UnboundedReceiver<ServerClientEvent>) -> NetResult<String> {
        self.client.lock().join_match();
        let answer = self
            .await_stage(events, Stage::Join, |event| match event {
                ServerClientEvent::MatchJoined(answer) => Some(answer),
                _ => None,
            })
            .await?;
        match answer {
            Ok(match_id) => {
                info!(match_id = %match_id, "match joined");
                self.publish(ConnectionEvent::MatchJoined(match_id.clone()));
                Ok(match_id)
            }
            Err(message) => {
                warn!(%message, "match join rejected");
                Err(self.fail(Stage::Join, &message))
            }
        }
    }

    /// Waits for the event `pick` accepts, racing it against the stage
    /// deadline and a server disconnect. A missed deadline fails the stage.
    async fn await_stage<T>(
        &self,
        events: &mut UnboundedReceiver<ServerClientEvent>,
        stage: Stage,
        mut pick: impl FnMut(ServerClientEvent) -> Option<T>,
    ) -> NetResult<T> {
        let deadline = tokio::time::sleep(self.config.connect_timeout());
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        return Err(NetError::Disconnected);
                    };
                    if event == ServerClientEvent::Disconnected {
                        warn!(?stage, "disconnected while connecting");
                        self.publish(ConnectionEvent::DisconnectedByServer);
                        return Err(NetError::Disconnected);
                    }
                    match pick(event) {
                        Some(picked) => return Ok(picked),
                        None => debug!(?stage, "unexpected transport event"),
                    }
                }
                () = &mut deadline => {
                    warn!(?stage, "stage timed out");
                    return Err(self.fail(stage, "timed out"));
                }
            }
        }
    }
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error or
/// `max_connect_attempts` is used up, sleeping `retry_backoff` in between.
/// The closure receives the 1-based attempt number.
///
/// # Errors
///
/// The last attempt's error.
pub async fn connect_with_retry<T, F, Fut>(config: &ConnectConfig, mut attempt: F) -> NetResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = NetResult<T>>,
{
    let attempts = config.max_connect_attempts.max(1);
    let mut number = 1;
    loop {
        match attempt(number).await {
            Err(err) if err.is_retryable() && number < attempts => {
                warn!(attempt = number, %err, "connect attempt failed, retrying");
                tokio::time::sleep(config.retry_backoff()).await;
                number += 1;
            }
            result => return result,
        }
    }
}
