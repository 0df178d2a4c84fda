//! Collaborator seams for authentication and the push channel.
//!
//! The core never opens sockets or performs HTTP itself; it consumes these
//! traits. A production implementation pairs a cookie/token login flow
//! with a websocket (tokio-tungstenite fits the [`PushChannel`] contract
//! directly); tests script them.

use crate::Result;

/// Credentials attached to requests and to the push-channel handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCredentials {
    /// Bearer token or session cookie value.
    pub token: String,
    /// Cross-site request forgery token, when the device issues one.
    pub csrf_token: Option<String>,
}

/// Supplies and refreshes credentials.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Return usable credentials.
    ///
    /// With `force_refresh` the implementation must re-authenticate rather
    /// than serve a cached session; the connection manager forces this
    /// after the device rejects the previous credentials.
    async fn credentials(&self, force_refresh: bool) -> Result<AuthCredentials>;
}

/// One message received from the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    /// Binary frame pair carrying a state-change packet.
    Binary(Vec<u8>),
    /// Textual control traffic; forwarded to raw subscribers only.
    Text(String),
}

/// Factory that opens a persistent push channel at a URL.
#[async_trait::async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Open a bidirectional message stream at `url`, authenticated with
    /// `credentials`.
    ///
    /// # Errors
    ///
    /// [`NvrError::Auth`](crate::NvrError::Auth) when the device rejects
    /// the credentials (triggers a forced refresh before the next
    /// attempt), [`NvrError::Transport`](crate::NvrError::Transport) for
    /// anything else.
    async fn open(&self, url: &str, credentials: &AuthCredentials) -> Result<Box<dyn PushChannel>>;
}

/// An open push channel yielding messages in arrival order.
#[async_trait::async_trait]
pub trait PushChannel: Send + 'static {
    /// Receive the next message.
    ///
    /// Returns:
    /// - `Ok(Some(message))` - next message, in order
    /// - `Ok(None)` - stream closed cleanly by the remote
    /// - `Err(e)` - transport failure
    async fn next_message(&mut self) -> Result<Option<PushMessage>>;

    /// Close the channel. Must be safe to call after an error.
    async fn close(&mut self) -> Result<()>;
}
