//! Binary wire protocol for the push channel.

mod frame;
mod packet;

pub use frame::{FRAME_HEADER_SIZE, Frame, FramePayload, PayloadFormat};
pub use packet::{Action, ActionKind, Packet};
