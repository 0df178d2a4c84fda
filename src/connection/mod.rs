//! Push-channel lifecycle management.
//!
//! The [`ConnectionManager`] owns the long-lived push channel:
//! authenticate, open at the resume cursor, run the read loop, detect
//! failure, back off, reconnect. Each received message fans out to raw
//! subscribers; binary messages additionally decode into packets, apply to
//! the [`StateStore`], and fan the resulting [`SubscriptionMessage`] out
//! to decoded subscribers.
//!
//! Connectivity is observable, never thrown: stream consumers see
//! [`ConnectionState`] transitions (or [`is_connected`]), and transport
//! failures are absorbed by the reconnect machine. Reconnect spacing is a
//! fixed interval; the exponential policy in [`crate::limits`] applies to
//! individual requests, not to this long-lived stream.
//!
//! [`is_connected`]: ConnectionManager::is_connected


use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{RwLock, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::{StateStore, SubscriptionMessage};
use crate::transport::{Authenticator, PushChannel, PushMessage, PushTransport};
use crate::wire::Packet;
use crate::{NvrError, Result};

/// Lifecycle state of the push channel. Written only by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Configuration for the push-channel lifecycle.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Push-channel URL; the resume cursor is appended as a query
    /// parameter when one is known.
    pub url: String,
    /// Fixed spacing between reconnect attempts after a failure.
    pub reconnect_interval: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        ConnectionConfig { url: url.into(), reconnect_interval: Duration::from_secs(5) }
    }
}

type RawCallback = Arc<dyn Fn(&PushMessage) + Send + Sync>;
type DecodedCallback = Arc<dyn Fn(&SubscriptionMessage) + Send + Sync>;

/// Which registry a [`Subscription`] belongs to.
#[derive(Debug, Clone, Copy)]
enum SubscriptionKind {
    Raw,
    Decoded,
}

/// Subscriber registry. Callbacks are snapshotted out of the lock before
/// invocation so a callback may itself subscribe or unsubscribe.
#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    raw: StdMutex<HashMap<u64, RawCallback>>,
    decoded: StdMutex<HashMap<u64, DecodedCallback>>,
}

impl Subscribers {
    fn add_raw(self: &Arc<Self>, callback: RawCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.raw.lock().unwrap_or_else(PoisonError::into_inner).insert(id, callback);
        Subscription { registry: Arc::downgrade(self), kind: SubscriptionKind::Raw, id }
    }

    fn add_decoded(self: &Arc<Self>, callback: DecodedCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.decoded.lock().unwrap_or_else(PoisonError::into_inner).insert(id, callback);
        Subscription { registry: Arc::downgrade(self), kind: SubscriptionKind::Decoded, id }
    }

    fn remove(&self, kind: SubscriptionKind, id: u64) {
        match kind {
            SubscriptionKind::Raw => {
                self.raw.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
            }
            SubscriptionKind::Decoded => {
                self.decoded.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
            }
        }
    }

    fn notify_raw(&self, message: &PushMessage) {
        let callbacks: Vec<RawCallback> = {
            let guard = self.raw.lock().unwrap_or_else(PoisonError::into_inner);
            guard.values().cloned().collect()
        };
        for callback in callbacks {
            // A panicking subscriber must not abort the read loop or
            // starve the remaining subscribers.
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                warn!("raw subscriber panicked");
            }
        }
    }

    fn notify_decoded(&self, message: &SubscriptionMessage) {
        let callbacks: Vec<DecodedCallback> = {
            let guard = self.decoded.lock().unwrap_or_else(PoisonError::into_inner);
            guard.values().cloned().collect()
        };
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                warn!("decoded subscriber panicked");
            }
        }
    }
}

/// Capability to cancel a subscription. The callback stays registered
/// until [`unsubscribe`](Subscription::unsubscribe) is called (dropping
/// the handle alone does not remove it).
#[must_use = "keep the handle to be able to unsubscribe later"]
pub struct Subscription {
    registry: Weak<Subscribers>,
    kind: SubscriptionKind,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, self.id);
        }
    }
}

/// Shared context between the manager handle and its read-loop task.
struct Shared {
    url: String,
    reconnect_interval: Duration,
    authenticator: Arc<dyn Authenticator>,
    transport: Arc<dyn PushTransport>,
    store: Arc<RwLock<StateStore>>,
    subscribers: Arc<Subscribers>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(?current, ?state, "connection state transition");
                *current = state;
                true
            }
        });
    }

    async fn open_channel(&self, force_refresh: bool) -> Result<Box<dyn PushChannel>> {
        let credentials = self.authenticator.credentials(force_refresh).await?;
        let cursor = self.store.read().await.last_update_id().map(str::to_string);
        let url = resume_url(&self.url, cursor.as_deref());
        self.transport.open(&url, &credentials).await
    }
}

/// Owns the push-channel lifecycle and fans messages out to subscribers.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: StdMutex<CancellationToken>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        authenticator: Arc<dyn Authenticator>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        Self::with_store(config, authenticator, transport, StateStore::new())
    }

    /// Manager over a pre-populated store (e.g. one filled from a REST
    /// bootstrap fetch before the push channel opens).
    pub fn with_store(
        config: ConnectionConfig,
        authenticator: Arc<dyn Authenticator>,
        transport: Arc<dyn PushTransport>,
        store: StateStore,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        ConnectionManager {
            shared: Arc::new(Shared {
                url: config.url,
                reconnect_interval: config.reconnect_interval,
                authenticator,
                transport,
                store: Arc::new(RwLock::new(store)),
                subscribers: Arc::new(Subscribers::default()),
                state_tx,
            }),
            state_rx,
            cancel: StdMutex::new(CancellationToken::new()),
        }
    }

    /// Open the push channel and start the read loop.
    ///
    /// No-op when already connecting or connected. The channel is opened
    /// at the base URL with the last known update id appended as a resume
    /// cursor, so the server can replay anything missed since the previous
    /// connection.
    ///
    /// # Errors
    ///
    /// [`NvrError::Auth`] when credentials are rejected (the caller should
    /// fix credentials before trying again) and [`NvrError::Transport`]
    /// when the channel cannot be opened. Failures after this call
    /// succeeds are handled internally by the reconnect machine.
    pub async fn connect(&self) -> Result<()> {
        let previous = self.shared.state_tx.send_replace(ConnectionState::Connecting);
        if previous != ConnectionState::Disconnected {
            self.shared.state_tx.send_replace(previous);
            return Ok(());
        }

        // A previous connection's reconnect loop may still be backing off
        // (the published state is Disconnected throughout that window).
        // This connection supersedes it: cancel its token before spawning
        // so exactly one read loop exists per manager.
        let cancel = CancellationToken::new();
        {
            let mut current = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            current.cancel();
            *current = cancel.clone();
        }

        info!(url = %self.shared.url, "connecting push channel");
        let channel = match self.shared.open_channel(false).await {
            Ok(channel) => channel,
            Err(error) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(error);
            }
        };
        self.shared.set_state(ConnectionState::Connected);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            read_loop(shared, channel, cancel).await;
        });

        info!("push channel connected");
        Ok(())
    }

    /// Close the push channel and stop the read loop. Cancels any pending
    /// reconnect timer. Idempotent; in-flight outbound requests are
    /// unaffected.
    pub fn disconnect(&self) {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).cancel();
        self.shared.set_state(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Observable connectivity, for callers that fall back to polling the
    /// event log while the channel is down.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connection state transitions as a stream, current state first.
    pub fn state_changes(&self) -> impl Stream<Item = ConnectionState> + Send + Unpin + 'static {
        WatchStream::new(self.state_rx.clone())
    }

    /// Subscribe to every message received on the channel, before any
    /// decoding.
    pub fn subscribe_raw<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PushMessage) + Send + Sync + 'static,
    {
        self.shared.subscribers.add_raw(Arc::new(callback))
    }

    /// Subscribe to decoded state changes.
    pub fn subscribe_decoded<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SubscriptionMessage) + Send + Sync + 'static,
    {
        self.shared.subscribers.add_decoded(Arc::new(callback))
    }

    /// The mirrored object graph. Readers get snapshots that may trail the
    /// read loop slightly; only the read loop writes.
    pub fn store(&self) -> Arc<RwLock<StateStore>> {
        Arc::clone(&self.shared.store)
    }

    /// Current resume cursor.
    pub async fn last_update_id(&self) -> Option<String> {
        self.shared.store.read().await.last_update_id().map(str::to_string)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        debug!("dropping connection manager");
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).cancel();
    }
}

/// Append the resume cursor to the push-channel URL.
fn resume_url(base: &str, cursor: Option<&str>) -> String {
    match cursor {
        None => base.to_string(),
        Some(id) if base.contains('?') => format!("{base}&lastUpdateId={id}"),
        Some(id) => format!("{base}?lastUpdateId={id}"),
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut channel: Box<dyn PushChannel>,
    cancel: CancellationToken,
) {
    info!("push read loop started");
    let mut processed = 0u64;

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = channel.close().await;
                shared.set_state(ConnectionState::Disconnected);
                info!(processed, "push read loop cancelled");
                return;
            }
            received = channel.next_message() => received,
        };

        let failure = match received {
            Ok(Some(message)) => {
                processed += 1;
                match dispatch(&shared, message).await {
                    Ok(()) => None,
                    Err(error) => Some(error),
                }
            }
            Ok(None) => Some(NvrError::transport("push channel closed by remote")),
            Err(error) => Some(error),
        };

        if let Some(error) = failure {
            warn!(error = %error, processed, "push channel lost");
            let _ = channel.close().await;
            shared.set_state(ConnectionState::Disconnected);

            match reconnect(&shared, &cancel).await {
                Some(new_channel) => channel = new_channel,
                None => {
                    info!(processed, "push read loop cancelled during reconnect");
                    return;
                }
            }
        }
    }
}

/// Process one received message. An error return means the byte stream is
/// unrecoverable and the connection must be reset; everything scoped to a
/// single packet is logged and dropped here.
async fn dispatch(shared: &Arc<Shared>, message: PushMessage) -> Result<()> {
    shared.subscribers.notify_raw(&message);

    let PushMessage::Binary(bytes) = &message else {
        return Ok(());
    };

    let packet = match Packet::decode(bytes) {
        Ok(packet) => packet,
        Err(error) if error.is_stream_corrupt() => return Err(error),
        Err(error) => {
            warn!(error = %error, "dropping undecodable message");
            return Ok(());
        }
    };

    let applied = shared.store.write().await.apply_packet(&packet);
    match applied {
        Ok(Some(subscription_message)) => shared.subscribers.notify_decoded(&subscription_message),
        Ok(None) => {}
        Err(error) => debug!(error = %error, "dropping packet with unusable content"),
    }
    Ok(())
}

/// Re-open the channel at a fixed interval until it succeeds or the token
/// cancels. An auth rejection forces a credential refresh on the next
/// attempt.
async fn reconnect(
    shared: &Arc<Shared>,
    cancel: &CancellationToken,
) -> Option<Box<dyn PushChannel>> {
    let mut force_refresh = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(shared.reconnect_interval) => {}
        }

        shared.set_state(ConnectionState::Connecting);
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return None,
            attempt = shared.open_channel(force_refresh) => attempt,
        };
        match attempt {
            Ok(channel) => {
                shared.set_state(ConnectionState::Connected);
                info!("push channel reconnected");
                return Some(channel);
            }
            Err(error) => {
                force_refresh = matches!(error, NvrError::Auth { .. });
                warn!(error = %error, force_refresh, "reconnect attempt failed");
                shared.set_state(ConnectionState::Disconnected);
            }
        }
    }
}
