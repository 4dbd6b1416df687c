use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cad_protocol::codec::DRAW_HEADER_BYTES;
use cad_protocol::{ChannelMessage, DrawBatch, InputState, decode_draw_batch, decode_input, encode_draw_batch, encode_input};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::{Channel, ChannelMode, OverflowLog, lock};

/// Copying fallback transport
///
/// Every write serializes a [`ChannelMessage`] to bincode bytes and queues
/// it. Every read drains the queue and decodes only the newest message, so
/// older undelivered records are discarded (last write wins).
///
/// Records pass through the binary codec before they are queued, so text
/// truncation, key caps and tail-drop match the shared-memory transport.
pub struct MessageChannel {
    max_commands: usize,
    draw_byte_capacity: usize,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    input_rx: Mutex<InputSide>,
    input_scratch: Mutex<Vec<u8>>,
    draw_tx: mpsc::UnboundedSender<Vec<u8>>,
    draw_rx: Mutex<DrawSide>,
    draw_writer: Mutex<DrawWriter>,
    input_seq: AtomicU64,
    input_ack: AtomicU64,
    draw_seq: AtomicU64,
    dropped: AtomicU64,
    stop: AtomicBool,
    closed: AtomicBool,
}

struct InputSide {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    last: InputState,
}

struct DrawSide {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    last_sequence: u64,
}

#[derive(Default)]
struct DrawWriter {
    scratch: Vec<u8>,
    overflow: OverflowLog,
}

/// Drain everything queued and keep only the newest message
fn drain_newest(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Option<Vec<u8>> {
    let mut newest = None;
    let mut skipped = 0usize;
    while let Ok(bytes) = rx.try_recv() {
        if newest.replace(bytes).is_some() {
            skipped += 1;
        }
    }
    if skipped > 0 {
        trace!("Discarded {} superseded messages", skipped);
    }
    newest
}

impl MessageChannel {
    /// `draw_byte_capacity` mirrors the shared transport's slot capacity so
    /// both transports drop exactly the same commands.
    pub fn new(max_commands: usize, draw_byte_capacity: usize) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (draw_tx, draw_rx) = mpsc::unbounded_channel();

        Self {
            max_commands,
            draw_byte_capacity: draw_byte_capacity.max(DRAW_HEADER_BYTES),
            input_tx,
            input_rx: Mutex::new(InputSide {
                rx: input_rx,
                last: InputState::default(),
            }),
            input_scratch: Mutex::new(Vec::new()),
            draw_tx,
            draw_rx: Mutex::new(DrawSide {
                rx: draw_rx,
                last_sequence: 0,
            }),
            draw_writer: Mutex::new(DrawWriter::default()),
            input_seq: AtomicU64::new(0),
            input_ack: AtomicU64::new(0),
            draw_seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn send(&self, tx: &mpsc::UnboundedSender<Vec<u8>>, message: &ChannelMessage) -> bool {
        match message.to_bytes() {
            Ok(bytes) => tx.send(bytes).is_ok(),
            Err(e) => {
                warn!("Failed to serialize channel message: {}", e);
                false
            }
        }
    }

    /// The input exactly as the shared transport would deliver it
    fn normalize_input(&self, state: &InputState) -> Option<InputState> {
        let mut scratch = lock(&self.input_scratch);
        encode_input(state, &mut scratch);
        match decode_input(&scratch) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Input snapshot {} does not survive encoding: {}", state.frame_number, e);
                None
            }
        }
    }

    /// Apply the same tail-drop and truncation as the shared transport
    fn trim(&self, batch: &DrawBatch, writer: &mut DrawWriter) -> Option<DrawBatch> {
        let summary = encode_draw_batch(batch, self.max_commands, self.draw_byte_capacity, &mut writer.scratch);
        if summary.dropped > 0 {
            self.dropped.fetch_add(summary.dropped as u64, Ordering::Relaxed);
            writer
                .overflow
                .record(self.mode(), batch.sequence, summary.dropped, summary.written);
        }

        match decode_draw_batch(&writer.scratch) {
            Ok(trimmed) => Some(trimmed),
            Err(e) => {
                warn!("Draw batch {} does not survive encoding: {}", batch.sequence, e);
                None
            }
        }
    }
}

impl Channel for MessageChannel {
    fn mode(&self) -> ChannelMode {
        ChannelMode::Message
    }

    fn write_input(&self, state: &InputState) {
        if self.is_closed() {
            return;
        }
        let Some(state) = self.normalize_input(state) else {
            return;
        };
        let sequence = self.input_seq.load(Ordering::Relaxed) + 1;
        let message = ChannelMessage::Input { sequence, state };
        if self.send(&self.input_tx, &message) {
            self.input_seq.store(sequence, Ordering::Release);
        }
    }

    fn read_input(&self) -> InputState {
        let mut side = lock(&self.input_rx);
        if let Some(bytes) = drain_newest(&mut side.rx) {
            match ChannelMessage::from_bytes(&bytes) {
                Ok(ChannelMessage::Input { state, .. }) => side.last = state,
                Ok(other) => warn!("Unexpected message on input queue: {:?}", other),
                Err(e) => warn!("Discarding undecodable input message: {}", e),
            }
        }
        side.last.clone()
    }

    fn input_sequence(&self) -> u64 {
        self.input_seq.load(Ordering::Acquire)
    }

    fn acknowledge_input(&self, frame_number: u64) {
        self.input_ack.fetch_max(frame_number, Ordering::AcqRel);
    }

    fn input_acknowledged(&self) -> u64 {
        self.input_ack.load(Ordering::Acquire)
    }

    fn write_draw_batch(&self, batch: &DrawBatch) {
        if self.is_closed() {
            return;
        }
        let trimmed = {
            let mut writer = lock(&self.draw_writer);
            self.trim(batch, &mut writer)
        };
        let Some(trimmed) = trimmed else {
            return;
        };
        if self.send(&self.draw_tx, &ChannelMessage::Draw(trimmed)) {
            self.draw_seq.store(batch.sequence, Ordering::Release);
        }
    }

    fn read_draw_batch(&self) -> Option<DrawBatch> {
        if self.is_closed() {
            return None;
        }
        let mut side = lock(&self.draw_rx);
        let bytes = drain_newest(&mut side.rx)?;
        match ChannelMessage::from_bytes(&bytes) {
            Ok(ChannelMessage::Draw(batch)) if batch.sequence > side.last_sequence => {
                side.last_sequence = batch.sequence;
                Some(batch)
            }
            Ok(ChannelMessage::Draw(_)) => None,
            Ok(other) => {
                warn!("Unexpected message on draw queue: {:?}", other);
                None
            }
            Err(e) => {
                warn!("Discarding undecodable draw message: {}", e);
                None
            }
        }
    }

    fn draw_sequence(&self) -> u64 {
        self.draw_seq.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn dropped_commands(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cad_protocol::DrawCommand;

    #[test]
    fn test_last_write_wins() {
        let ch = MessageChannel::new(64, 4096);
        for frame in 1..=3 {
            ch.write_input(&InputState {
                frame_number: frame,
                ..Default::default()
            });
        }
        assert_eq!(ch.input_sequence(), 3);
        assert_eq!(ch.read_input().frame_number, 3);
        assert_eq!(ch.read_input().frame_number, 3);
    }

    #[test]
    fn test_draw_read_returns_newest_once() {
        let ch = MessageChannel::new(64, 4096);
        ch.write_draw_batch(&DrawBatch::new(1, 1, vec![DrawCommand::Fill]));
        ch.write_draw_batch(&DrawBatch::new(2, 2, vec![DrawCommand::Stroke]));

        let batch = ch.read_draw_batch().unwrap();
        assert_eq!(batch.sequence, 2);
        assert_eq!(batch.commands, vec![DrawCommand::Stroke]);
        assert!(ch.read_draw_batch().is_none());
    }

    #[test]
    fn test_overflow_tail_drops() {
        let ch = MessageChannel::new(3, 4096);
        ch.write_draw_batch(&DrawBatch::new(1, 1, vec![DrawCommand::Save; 8]));
        let batch = ch.read_draw_batch().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.dropped, 5);
        assert_eq!(ch.dropped_commands(), 5);
    }

    #[test]
    fn test_records_are_normalized_like_the_wire() {
        let ch = MessageChannel::new(64, 64 * 1024);
        let long_text = "é".repeat(1500);
        ch.write_draw_batch(&DrawBatch::new(1, 1, vec![DrawCommand::Text { x: 0.0, y: 0.0, text: long_text }]));
        match &ch.read_draw_batch().unwrap().commands[..] {
            [DrawCommand::Text { text, .. }] => {
                assert!(text.len() <= cad_protocol::codec::MAX_TEXT_BYTES);
                assert!(text.chars().all(|c| c == 'é'));
            }
            other => panic!("unexpected commands {other:?}"),
        }

        let mut state = InputState { frame_number: 1, ..Default::default() };
        state.keys_down.insert("K".repeat(100));
        state.keys_down.insert("KeyA".into());
        ch.write_input(&state);
        let seen = ch.read_input();
        assert_eq!(seen.keys_down.len(), 1);
        assert!(seen.is_key_down("KeyA"));
    }

    #[test]
    fn test_acknowledgement_only_moves_forward() {
        let ch = MessageChannel::new(64, 4096);
        assert_eq!(ch.input_acknowledged(), 0);
        ch.acknowledge_input(5);
        ch.acknowledge_input(3);
        assert_eq!(ch.input_acknowledged(), 5);
    }

    #[test]
    fn test_close_stops_delivery() {
        let ch = MessageChannel::new(64, 4096);
        ch.write_draw_batch(&DrawBatch::new(1, 1, vec![]));
        ch.close();
        assert!(ch.read_draw_batch().is_none());
        ch.write_input(&InputState::default());
        assert_eq!(ch.input_sequence(), 0);
    }
}
