use serde::{Deserialize, Serialize};

use crate::records::{DrawBatch, InputState};

/// Self-contained envelope used by the message-passing transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelMessage {
    /// Render thread -> worker: newest input snapshot
    Input {
        /// Publish sequence of this snapshot
        sequence: u64,
        state: InputState,
    },

    /// Worker -> render thread: one frame's draw output
    Draw(DrawBatch),
}

impl ChannelMessage {
    /// Serialize message to bytes using bincode
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes using bincode
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Color, DrawCommand};

    #[test]
    fn test_message_bytes_are_self_contained() {
        let mut state = InputState::default();
        state.keys_pressed.insert("Space".into());
        let input = ChannelMessage::Input { sequence: 3, state };

        let draw = ChannelMessage::Draw(DrawBatch::new(
            4,
            3,
            vec![DrawCommand::Clear { color: Color::BLACK }, DrawCommand::Stroke],
        ));

        for message in [input, draw] {
            let bytes = message.to_bytes().unwrap();
            assert_eq!(ChannelMessage::from_bytes(&bytes).unwrap(), message);
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(ChannelMessage::from_bytes(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }
}
