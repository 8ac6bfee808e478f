//! Best-effort live connection to the backend notification source.
//!
//! State machine: `Disconnected -> Connecting -> Connected`. Losing the
//! socket drops back to `Disconnected` and, unless the fatal flag is set, a
//! reconnect is scheduled with capped exponential backoff. Once the retry
//! budget is spent the subscriber stays `Disconnected` until `connect` is
//! called again.
//!
//! A clean close is retried. A connection-level error on an established
//! socket sets the fatal flag and suppresses reconnects until the next
//! explicit `connect`. Failing to open a socket at all counts against the
//! retry budget and is not fatal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use peerline_shared::ChannelError;

use crate::backoff::{Backoff, BackoffPolicy};
use crate::notifications::{parse_frame, BackendMessage, Notification};

const COMMAND_BUFFER: usize = 64;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Socket error: {0}")]
    Socket(String),
}

/// What a socket produced next.
#[derive(Debug)]
pub enum SocketEvent {
    /// A text frame.
    Frame(String),
    /// The peer closed the socket cleanly, or the stream ended.
    Closed,
    /// Connection-level failure.
    Error(TransportError),
}

/// Opens notification sockets for a user.
#[async_trait]
pub trait NotificationTransport: Send + Sync + 'static {
    async fn open(&self, user_id: &str) -> Result<Box<dyn NotificationSocket>, TransportError>;
}

/// One open notification socket.
#[async_trait]
pub trait NotificationSocket: Send {
    async fn next_event(&mut self) -> SocketEvent;
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connecting,
    Connected,
}

pub type MessageCallback = Arc<dyn Fn(BackendMessage) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&ChannelError) + Send + Sync>;

struct Callbacks {
    on_message: MessageCallback,
    on_error: Option<ErrorCallback>,
}

/// State shared between the handle and its driver task.
///
/// Every driver carries the generation it was started with; anything it does
/// after a newer `connect` or a `disconnect` is ignored.
struct Shared {
    generation: AtomicU64,
    state: watch::Sender<SubscriberState>,
    callbacks: Mutex<Option<Callbacks>>,
    fatal: AtomicBool,
    attempts: AtomicU32,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, generation: u64, state: SubscriberState) {
        if self.is_current(generation) {
            self.state.send_replace(state);
        }
    }

    fn callbacks(&self) -> MutexGuard<'_, Option<Callbacks>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, generation: u64, frame: &str) {
        if !self.is_current(generation) {
            return;
        }
        match parse_frame(frame) {
            Some(Notification::NewMessage { message }) => {
                let on_message = self.callbacks().as_ref().map(|c| c.on_message.clone());
                if let Some(on_message) = on_message {
                    on_message(message);
                }
            }
            Some(Notification::DeviceCount { count, user_id }) => {
                debug!(user = %user_id, count, "Device count update");
            }
            None => {}
        }
    }

    fn report_error(&self, generation: u64, err: ChannelError) {
        if !self.is_current(generation) {
            return;
        }
        let on_error = self
            .callbacks()
            .as_ref()
            .and_then(|c| c.on_error.clone());
        if let Some(on_error) = on_error {
            on_error(&err);
        }
    }
}

enum DriverCommand {
    Send(String),
    Close,
}

struct Driver {
    cmd_tx: mpsc::Sender<DriverCommand>,
    handle: JoinHandle<()>,
}

pub struct ReconnectingSubscriber {
    transport: Arc<dyn NotificationTransport>,
    policy: BackoffPolicy,
    shared: Arc<Shared>,
    driver: Mutex<Option<Driver>>,
}

impl ReconnectingSubscriber {
    pub fn new(transport: Arc<dyn NotificationTransport>, policy: BackoffPolicy) -> Self {
        let (state, _) = watch::channel(SubscriberState::Disconnected);
        Self {
            transport,
            policy,
            shared: Arc::new(Shared {
                generation: AtomicU64::new(0),
                state,
                callbacks: Mutex::new(None),
                fatal: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Start (or restart) the connection for `user_id`.
    ///
    /// Replaces any existing connection and callbacks, clears the fatal flag
    /// and starts with a fresh retry budget. Must be called from within a
    /// tokio runtime.
    pub fn connect<F>(&self, user_id: &str, on_message: F, on_error: Option<ErrorCallback>)
    where
        F: Fn(BackendMessage) + Send + Sync + 'static,
    {
        let generation = self.stop_driver();

        *self.shared.callbacks() = Some(Callbacks {
            on_message: Arc::new(on_message),
            on_error,
        });
        self.shared.fatal.store(false, Ordering::SeqCst);
        self.shared.attempts.store(0, Ordering::SeqCst);

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(drive(
            self.transport.clone(),
            user_id.to_string(),
            self.policy.clone(),
            self.shared.clone(),
            generation,
            cmd_rx,
        ));

        info!(user = %user_id, "Notification subscriber started");
        *self.lock_driver() = Some(Driver { cmd_tx, handle });
    }

    /// Tear down the socket, reset counters and drop the callbacks.
    /// Safe to call at any time, any number of times.
    pub fn disconnect(&self) {
        self.stop_driver();
        *self.shared.callbacks() = None;
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.shared.state.send_replace(SubscriberState::Disconnected);
    }

    /// Send a JSON payload over the live socket.
    ///
    /// Nothing is buffered: when not `Connected` this logs a warning and
    /// returns `false`.
    pub fn send<T: Serialize>(&self, payload: &T) -> bool {
        if self.state() != SubscriberState::Connected {
            warn!("Notification socket not connected, cannot send");
            return false;
        }
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize outgoing payload");
                return false;
            }
        };
        match self.lock_driver().as_ref() {
            Some(driver) => driver.cmd_tx.try_send(DriverCommand::Send(text)).is_ok(),
            None => false,
        }
    }

    pub fn state(&self) -> SubscriberState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SubscriberState::Connected
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.shared.state.subscribe()
    }

    /// Consecutive reconnect attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Whether a connection-level error is currently suppressing reconnects.
    pub fn is_fatal(&self) -> bool {
        self.shared.fatal.load(Ordering::SeqCst)
    }

    /// Stop the current driver, if any, and return the next generation.
    fn stop_driver(&self) -> u64 {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(driver) = self.lock_driver().take() {
            if driver.cmd_tx.try_send(DriverCommand::Close).is_err() {
                driver.handle.abort();
            }
        }
        generation
    }

    fn lock_driver(&self) -> MutexGuard<'_, Option<Driver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ReconnectingSubscriber {
    fn drop(&mut self) {
        if let Some(driver) = self.lock_driver().take() {
            driver.handle.abort();
        }
    }
}

enum PumpExit {
    Shutdown,
    Closed,
    Error(TransportError),
}

async fn drive(
    transport: Arc<dyn NotificationTransport>,
    user_id: String,
    policy: BackoffPolicy,
    shared: Arc<Shared>,
    generation: u64,
    mut cmd_rx: mpsc::Receiver<DriverCommand>,
) {
    let mut backoff = Backoff::new(policy);

    loop {
        shared.set_state(generation, SubscriberState::Connecting);
        debug!(user = %user_id, "Opening notification socket");

        match transport.open(&user_id).await {
            Ok(mut socket) => {
                if !shared.is_current(generation) {
                    socket.close().await;
                    return;
                }
                backoff.reset();
                shared.attempts.store(0, Ordering::SeqCst);
                shared.set_state(generation, SubscriberState::Connected);
                info!(user = %user_id, "Notification socket connected");

                match pump(socket.as_mut(), &shared, generation, &mut cmd_rx).await {
                    PumpExit::Shutdown => {
                        socket.close().await;
                        shared.set_state(generation, SubscriberState::Disconnected);
                        debug!(user = %user_id, "Notification socket shut down");
                        return;
                    }
                    PumpExit::Closed => {
                        info!(user = %user_id, "Notification socket closed");
                    }
                    PumpExit::Error(e) => {
                        error!(user = %user_id, error = %e, "Notification socket failed");
                        if shared.is_current(generation) {
                            shared.fatal.store(true, Ordering::SeqCst);
                        }
                        shared.set_state(generation, SubscriberState::Disconnected);
                        shared.report_error(generation, ChannelError::Subscription(e.into()));
                        info!(user = %user_id, "Not reconnecting after connection error");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(user = %user_id, error = %e, "Failed to open notification socket");
            }
        }

        shared.set_state(generation, SubscriberState::Disconnected);

        let Some(delay) = backoff.next_delay() else {
            error!(
                user = %user_id,
                attempts = backoff.attempts(),
                "Max reconnection attempts reached"
            );
            shared.report_error(
                generation,
                ChannelError::Subscription(anyhow::anyhow!(
                    "gave up after {} reconnect attempts",
                    backoff.attempts()
                )),
            );
            return;
        };

        if shared.is_current(generation) {
            shared.attempts.store(backoff.attempts(), Ordering::SeqCst);
        }
        info!(
            user = %user_id,
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(DriverCommand::Send(_)) => {
                        warn!("Notification socket not connected, dropping payload");
                    }
                    Some(DriverCommand::Close) | None => return,
                },
            }
        }
    }
}

async fn pump(
    socket: &mut dyn NotificationSocket,
    shared: &Shared,
    generation: u64,
    cmd_rx: &mut mpsc::Receiver<DriverCommand>,
) -> PumpExit {
    loop {
        tokio::select! {
            event = socket.next_event() => match event {
                SocketEvent::Frame(text) => shared.dispatch(generation, &text),
                SocketEvent::Closed => return PumpExit::Closed,
                SocketEvent::Error(e) => return PumpExit::Error(e),
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(DriverCommand::Send(text)) => {
                    if let Err(e) = socket.send_text(text).await {
                        return PumpExit::Error(e);
                    }
                }
                Some(DriverCommand::Close) | None => return PumpExit::Shutdown,
            },
        }
    }
}

/// A socket that replays scripted events, then stays open.
///
/// Handy for tests and for wiring the subscriber without a backend.
pub struct ScriptedSocket {
    events: VecDeque<SocketEvent>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSocket {
    pub fn new(events: Vec<SocketEvent>, sent: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            events: events.into(),
            sent,
        }
    }
}

#[async_trait]
impl NotificationSocket for ScriptedSocket {
    async fn next_event(&mut self) -> SocketEvent {
        match self.events.pop_front() {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text);
        Ok(())
    }

    async fn close(&mut self) {}
}
