//! Two-frame packet assembly.
//!
//! One logical push message is exactly two consecutive frames with no
//! separator: an *action* frame (the small JSON envelope saying what is
//! changing) immediately followed by a *data* frame (the object payload
//! the envelope applies to).

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::frame::Frame;
use crate::{NvrError, Result};

/// What an action envelope asks the state mirror to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Add,
    Update,
    Remove,
}

impl ActionKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(ActionKind::Add),
            "update" => Some(ActionKind::Update),
            "remove" => Some(ActionKind::Remove),
            _ => None,
        }
    }
}

/// Parsed action envelope from a packet's action frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub model_key: String,
    pub id: Option<String>,
    pub new_update_id: Option<String>,
}

/// Raw envelope shape as it appears on the wire. `action` and `modelKey`
/// are required; everything else is optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionEnvelope {
    action: String,
    model_key: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    new_update_id: Option<String>,
}

/// One logical push message: action frame plus data frame.
///
/// Owned by the decode call that produced it and not mutated afterward;
/// [`Packet::encode`] emits a fresh byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub action_frame: Frame,
    pub data_frame: Frame,
}

impl Packet {
    /// Decode a packet from a complete message buffer.
    ///
    /// The data frame must begin exactly where the action frame ends.
    /// Either frame failing to decode propagates the frame-level error;
    /// trailing bytes after the data frame are tolerated and logged.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (action_frame, data_offset) = Frame::decode(buf, 0)?;
        let (data_frame, end) = Frame::decode(buf, data_offset)?;

        if end < buf.len() {
            debug!(trailing = buf.len() - end, "ignoring trailing bytes after data frame");
        }

        Ok(Packet { action_frame, data_frame })
    }

    /// Encode both frames back into one contiguous buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = self.action_frame.encode()?;
        out.extend(self.data_frame.encode()?);
        Ok(out)
    }

    /// Parse the action envelope from the action frame's JSON.
    ///
    /// # Errors
    ///
    /// [`NvrError::ContentDecode`] when the action frame is not JSON, is
    /// missing `action`/`modelKey`, or names an action outside the
    /// add/update/remove vocabulary. These are packet-scoped: the caller
    /// drops the packet and the connection stays open.
    pub fn action(&self) -> Result<Action> {
        let value = self
            .action_frame
            .payload
            .as_json()
            .ok_or_else(|| NvrError::content_decode("action frame", "payload is not JSON"))?;

        let envelope: ActionEnvelope = ActionEnvelope::deserialize(value)
            .map_err(|e| NvrError::content_decode("action frame", e.to_string()))?;

        let kind = ActionKind::parse(&envelope.action).ok_or_else(|| {
            NvrError::content_decode(
                "action frame",
                format!("unknown action '{}'", envelope.action),
            )
        })?;

        Ok(Action {
            kind,
            model_key: envelope.model_key,
            id: envelope.id,
            new_update_id: envelope.new_update_id,
        })
    }

    /// The `newUpdateId` resume cursor, if the action frame carries one.
    ///
    /// Read leniently: the cursor must advance even when the rest of the
    /// envelope is unrecognized.
    pub fn new_update_id(&self) -> Option<&str> {
        self.action_frame.payload.as_json()?.get("newUpdateId")?.as_str()
    }

    /// The data frame's JSON payload, when it has one.
    pub fn data(&self) -> Option<&Value> {
        self.data_frame.payload.as_json()
    }
}
