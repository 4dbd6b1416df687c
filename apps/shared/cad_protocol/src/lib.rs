pub mod codec;
pub mod error;
pub mod layout;
pub mod message;
pub mod records;

pub use codec::{EncodeSummary, decode_draw_batch, decode_input, encode_draw_batch, encode_input};
pub use error::{ProtocolError, Result};
pub use layout::RegionLayout;
pub use message::ChannelMessage;
pub use records::{
    Color, ColorParseError, DrawBatch, DrawCommand, InputState, KeyCode, MouseButton, MouseButtons,
    TimingInfo,
};
