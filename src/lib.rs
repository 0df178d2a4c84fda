//! Async, type-safe Rust client for NVR push-channel state synchronization.
//!
//! `nvrsync` keeps a live, local mirror of a network video recorder's
//! object graph. It decodes the device's binary-framed push protocol,
//! applies incremental add/update/remove actions to typed objects,
//! attributes events to cameras, and survives connection loss with
//! cursor-based resume. The out-of-band command path is protected by a
//! sliding-window rate limiter and an exponential-backoff retry policy.
//!
//! # Architecture
//!
//! - **Wire** ([`wire`]): frame and packet codecs for the binary push
//!   protocol (8-byte header, optional deflate, JSON payloads).
//! - **State** ([`state`]): the [`StateStore`] mirror, the model-key
//!   object factory, deep-merge update application, and per-camera event
//!   attribution.
//! - **Connection** ([`connection`]): the [`ConnectionManager`] lifecycle
//!   state machine with subscriber fan-out and fixed-interval reconnect.
//! - **Limits** ([`limits`]): [`RateLimiter`] and [`RetryPolicy`] guarding
//!   the outbound request path.
//!
//! Authentication and the socket itself are collaborator traits
//! ([`transport`]); a production deployment implements them over a
//! cookie/token login and a websocket.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nvrsync::{ConnectionConfig, ConnectionManager};
//! # use nvrsync::transport::{Authenticator, PushTransport};
//! # async fn example(
//! #     authenticator: Arc<dyn Authenticator>,
//! #     transport: Arc<dyn PushTransport>,
//! # ) -> nvrsync::Result<()> {
//! let manager = ConnectionManager::new(
//!     ConnectionConfig::new("wss://nvr.local/proxy/protect/ws/updates"),
//!     authenticator,
//!     transport,
//! );
//!
//! let subscription = manager.subscribe_decoded(|message| {
//!     println!("{:?} {:?}", message.action, message.new_update_id);
//! });
//!
//! manager.connect().await?;
//! // ... later
//! subscription.unsubscribe();
//! manager.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod connection;
mod error;
pub mod limits;
pub mod state;
pub mod transport;
pub mod wire;

// Core exports
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, Subscription};
pub use error::{NvrError, Result};
pub use limits::{RateLimiter, RetryPolicy, send_with_retry};
pub use state::{
    Camera, Event, EventKind, ModelKey, StateStore, SubscriptionMessage, TypedObject,
};
pub use transport::{AuthCredentials, PushMessage};
pub use wire::{Action, ActionKind, Frame, FramePayload, Packet, PayloadFormat};
