use std::sync::atomic::{AtomicU64, Ordering, fence};
use std::sync::{Arc, Mutex};

use cad_protocol::layout::{
    LEN_PREFIX_BYTES, RegionLayout, SlotLayout, WORD_BYTES, control, frame_payload, pack_word,
    unpack_word, words_for_bytes,
};
use cad_protocol::{DrawBatch, InputState, decode_draw_batch, decode_input, encode_draw_batch, encode_input};
use tracing::{debug, trace, warn};

use super::{Channel, ChannelMode, OverflowLog, lock};
use crate::error::ChannelError;

/// Fixed region of atomic words shared by both threads
pub(crate) struct SharedRegion {
    words: Box<[AtomicU64]>,
    layout: RegionLayout,
}

impl SharedRegion {
    /// Allocate and zero a region, failing instead of aborting on OOM
    pub(crate) fn allocate(layout: RegionLayout) -> Result<Self, ChannelError> {
        let mut words: Vec<AtomicU64> = Vec::new();
        words
            .try_reserve_exact(layout.total_words)
            .map_err(|_| ChannelError::Allocation(layout.total_bytes()))?;
        words.resize_with(layout.total_words, || AtomicU64::new(0));

        Ok(Self {
            words: words.into_boxed_slice(),
            layout,
        })
    }

    fn control(&self, index: usize) -> &AtomicU64 {
        &self.words[index]
    }

    /// Copy `framed` into a slot under its sequence word
    ///
    /// The sequence word is odd for the duration of the copy. Only the single
    /// writer of a direction ever calls this for that direction's slots.
    fn write_slot(&self, slot: &SlotLayout, framed: &[u8]) {
        let seq = &self.words[slot.seq_word];
        let start = seq.load(Ordering::Relaxed);
        seq.store(start.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        for (i, chunk) in framed.chunks(WORD_BYTES).enumerate() {
            self.words[slot.data_word + i].store(pack_word(chunk), Ordering::Relaxed);
        }

        seq.store(start.wrapping_add(2), Ordering::Release);
    }

    /// Copy a slot's payload into `out`
    ///
    /// Returns `false` if a writer touched the slot during the copy, in which
    /// case `out` holds garbage and must be discarded.
    fn read_slot(&self, slot: &SlotLayout, out: &mut Vec<u8>) -> bool {
        let seq = &self.words[slot.seq_word];
        let before = seq.load(Ordering::Acquire);
        if before & 1 == 1 {
            return false;
        }

        let first = self.words[slot.data_word].load(Ordering::Relaxed);
        let len = (first & 0xffff_ffff) as usize;
        if len > slot.payload_capacity() {
            return false;
        }

        let total = LEN_PREFIX_BYTES + len;
        out.clear();
        out.resize(words_for_bytes(total) * WORD_BYTES, 0);
        for (i, chunk) in out.chunks_mut(WORD_BYTES).enumerate() {
            unpack_word(self.words[slot.data_word + i].load(Ordering::Relaxed), chunk);
        }

        fence(Ordering::Acquire);
        let after = seq.load(Ordering::Relaxed);
        if before != after {
            return false;
        }

        out.truncate(total);
        out.drain(..LEN_PREFIX_BYTES);
        true
    }
}

#[derive(Default)]
struct WriterScratch {
    payload: Vec<u8>,
    framed: Vec<u8>,
}

#[derive(Default)]
struct InputReader {
    scratch: Vec<u8>,
    last_sequence: u64,
    last: InputState,
}

#[derive(Default)]
struct DrawReader {
    scratch: Vec<u8>,
    last_sequence: u64,
}

#[derive(Default)]
struct DrawWriter {
    scratch: WriterScratch,
    overflow: OverflowLog,
}

/// Lock-free transport over a shared region of atomic words
///
/// Writers serialize into a reused scratch buffer, copy it into the inactive
/// slot, then flip the slot index and bump the sequence with release stores.
/// Readers acquire the sequence and index and copy only the active slot; a
/// copy that raced a writer is discarded and the previous snapshot is kept.
pub struct SharedMemoryChannel {
    region: Arc<SharedRegion>,
    max_commands: usize,
    input_writer: Mutex<WriterScratch>,
    input_reader: Mutex<InputReader>,
    draw_writer: Mutex<DrawWriter>,
    draw_reader: Mutex<DrawReader>,
}

impl SharedMemoryChannel {
    pub fn new(
        input_slot_bytes: usize,
        draw_slot_bytes: usize,
        max_commands: usize,
    ) -> Result<Self, ChannelError> {
        let layout = RegionLayout::new(input_slot_bytes, draw_slot_bytes);
        let region = SharedRegion::allocate(layout)?;

        debug!(
            "Shared region allocated: {} bytes (input slots {} B, draw slots {} B)",
            layout.total_bytes(),
            layout.input[0].payload_capacity(),
            layout.draw[0].payload_capacity()
        );

        Ok(Self {
            region: Arc::new(region),
            max_commands,
            input_writer: Mutex::new(WriterScratch::default()),
            input_reader: Mutex::new(InputReader::default()),
            draw_writer: Mutex::new(DrawWriter::default()),
            draw_reader: Mutex::new(DrawReader::default()),
        })
    }

    pub fn layout(&self) -> RegionLayout {
        self.region.layout
    }

    /// Publish `framed` into the inactive slot of a double buffer
    fn publish(&self, slots: &[SlotLayout; 2], active_word: usize, seq_word: usize, seq: u64, framed: &[u8]) {
        let active = self.region.control(active_word).load(Ordering::Relaxed) as usize & 1;
        let next = active ^ 1;
        self.region.write_slot(&slots[next], framed);
        self.region.control(active_word).store(next as u64, Ordering::Release);
        self.region.control(seq_word).store(seq, Ordering::Release);
    }

    fn flag(&self, index: usize) -> bool {
        self.region.control(index).load(Ordering::Acquire) != 0
    }
}

impl Channel for SharedMemoryChannel {
    fn mode(&self) -> ChannelMode {
        ChannelMode::SharedMemory
    }

    fn write_input(&self, state: &InputState) {
        if self.is_closed() {
            return;
        }

        let mut w = lock(&self.input_writer);
        let WriterScratch { payload, framed } = &mut *w;
        encode_input(state, payload);
        frame_payload(payload, framed);

        let seq = self.input_sequence() + 1;
        self.publish(&self.region.layout.input, control::ACTIVE_INPUT, control::INPUT_SEQ, seq, framed);
    }

    fn read_input(&self) -> InputState {
        let mut r = lock(&self.input_reader);
        let seq = self.input_sequence();
        if seq == r.last_sequence {
            return r.last.clone();
        }

        let active = self.region.control(control::ACTIVE_INPUT).load(Ordering::Acquire) as usize & 1;
        let slot = self.region.layout.input[active];
        let InputReader { scratch, last_sequence, last } = &mut *r;

        if self.region.read_slot(&slot, scratch) {
            match decode_input(scratch) {
                Ok(state) => {
                    *last = state;
                    *last_sequence = seq;
                }
                Err(e) => warn!("Discarding undecodable input record {}: {}", seq, e),
            }
        } else {
            trace!("Input slot {} changed during read, keeping previous snapshot", active);
        }

        last.clone()
    }

    fn input_sequence(&self) -> u64 {
        self.region.control(control::INPUT_SEQ).load(Ordering::Acquire)
    }

    fn acknowledge_input(&self, frame_number: u64) {
        self.region
            .control(control::INPUT_ACK)
            .fetch_max(frame_number, Ordering::AcqRel);
    }

    fn input_acknowledged(&self) -> u64 {
        self.region.control(control::INPUT_ACK).load(Ordering::Acquire)
    }

    fn write_draw_batch(&self, batch: &DrawBatch) {
        if self.is_closed() {
            return;
        }

        let mut w = lock(&self.draw_writer);
        let DrawWriter { scratch, overflow } = &mut *w;
        let slot = self.region.layout.draw[0];
        let summary = encode_draw_batch(batch, self.max_commands, slot.payload_capacity(), &mut scratch.payload);

        if summary.dropped > 0 {
            self.region
                .control(control::DROPPED)
                .fetch_add(summary.dropped as u64, Ordering::Relaxed);
            overflow.record(self.mode(), batch.sequence, summary.dropped, summary.written);
        }

        frame_payload(&scratch.payload, &mut scratch.framed);
        self.publish(
            &self.region.layout.draw,
            control::ACTIVE_DRAW,
            control::DRAW_SEQ,
            batch.sequence,
            &scratch.framed,
        );
    }

    fn read_draw_batch(&self) -> Option<DrawBatch> {
        let mut r = lock(&self.draw_reader);
        let seq = self.draw_sequence();
        if seq == r.last_sequence || self.is_closed() {
            return None;
        }

        let active = self.region.control(control::ACTIVE_DRAW).load(Ordering::Acquire) as usize & 1;
        let slot = self.region.layout.draw[active];
        if !self.region.read_slot(&slot, &mut r.scratch) {
            trace!("Draw slot {} changed during read, reusing previous batch", active);
            return None;
        }

        match decode_draw_batch(&r.scratch) {
            Ok(batch) if batch.sequence > r.last_sequence => {
                r.last_sequence = batch.sequence;
                Some(batch)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Discarding undecodable draw batch {}: {}", seq, e);
                None
            }
        }
    }

    fn draw_sequence(&self) -> u64 {
        self.region.control(control::DRAW_SEQ).load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.region.control(control::STOP).store(1, Ordering::Release);
    }

    fn is_stop_requested(&self) -> bool {
        self.flag(control::STOP)
    }

    fn close(&self) {
        self.region.control(control::CLOSED).store(1, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.flag(control::CLOSED)
    }

    fn dropped_commands(&self) -> u64 {
        self.region.control(control::DROPPED).load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cad_protocol::{Color, DrawCommand};

    fn channel() -> SharedMemoryChannel {
        SharedMemoryChannel::new(8 * 1024, 16 * 1024, 1024).unwrap()
    }

    fn input(frame: u64) -> InputState {
        let mut state = InputState {
            frame_number: frame,
            ..Default::default()
        };
        state.keys_down.insert(format!("Key{}", frame % 26));
        state
    }

    #[test]
    fn test_fresh_channel_has_nothing() {
        let ch = channel();
        assert_eq!(ch.input_sequence(), 0);
        assert_eq!(ch.read_input(), InputState::default());
        assert!(ch.read_draw_batch().is_none());
    }

    #[test]
    fn test_latest_input_wins() {
        let ch = channel();
        for frame in 1..=5 {
            ch.write_input(&input(frame));
        }
        assert_eq!(ch.input_sequence(), 5);
        assert_eq!(ch.read_input(), input(5));
        // Nothing new: same snapshot again
        assert_eq!(ch.read_input(), input(5));
    }

    #[test]
    fn test_draw_batch_read_once() {
        let ch = channel();
        let batch = DrawBatch::new(1, 1, vec![DrawCommand::Clear { color: Color::WHITE }]);
        ch.write_draw_batch(&batch);

        assert_eq!(ch.read_draw_batch(), Some(batch));
        assert_eq!(ch.read_draw_batch(), None);
    }

    #[test]
    fn test_slot_copy_detects_concurrent_write() {
        let ch = channel();
        ch.write_input(&input(1));

        let layout = ch.layout();
        let active = ch.region.control(control::ACTIVE_INPUT).load(Ordering::Relaxed) as usize;
        let slot = layout.input[active];

        // Simulate a writer midway through the slot.
        ch.region.words[slot.seq_word].fetch_add(1, Ordering::Relaxed);
        let mut out = Vec::new();
        assert!(!ch.region.read_slot(&slot, &mut out));

        ch.region.words[slot.seq_word].fetch_add(1, Ordering::Relaxed);
        assert!(ch.region.read_slot(&slot, &mut out));
    }

    #[test]
    fn test_overflow_is_counted() {
        let ch = SharedMemoryChannel::new(8 * 1024, 16 * 1024, 4).unwrap();
        let commands = vec![DrawCommand::Fill; 10];
        ch.write_draw_batch(&DrawBatch::new(1, 1, commands));

        let batch = ch.read_draw_batch().unwrap();
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.dropped, 6);
        assert_eq!(ch.dropped_commands(), 6);
    }

    #[test]
    fn test_closed_channel_ignores_writes() {
        let ch = channel();
        ch.close();
        ch.write_input(&input(1));
        ch.write_draw_batch(&DrawBatch::new(1, 1, vec![]));
        assert_eq!(ch.input_sequence(), 0);
        assert_eq!(ch.draw_sequence(), 0);
        assert!(ch.is_closed());
    }

    #[test]
    fn test_stop_flag_is_idempotent() {
        let ch = channel();
        assert!(!ch.is_stop_requested());
        ch.request_stop();
        ch.request_stop();
        assert!(ch.is_stop_requested());
    }

    #[test]
    fn test_acknowledgement_is_monotonic() {
        let ch = channel();
        assert_eq!(ch.input_acknowledged(), 0);
        ch.acknowledge_input(8);
        ch.acknowledge_input(2);
        assert_eq!(ch.input_acknowledged(), 8);
        assert_eq!(ch.input_sequence(), 0);
    }
}
