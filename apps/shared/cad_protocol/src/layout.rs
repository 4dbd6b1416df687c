//! Word layout of the shared region used by the shared-memory transport
//!
//! The region is a flat array of 64-bit words:
//!
//! ```text
//! [control block: CONTROL_WORDS]
//! [input slot 0][input slot 1]
//! [draw slot 0][draw slot 1]
//! ```
//!
//! Each slot starts with a sequence word (odd while a write is in progress)
//! followed by data words holding `[u32 len][payload][padding]`, packed
//! little-endian.

use crate::codec::{DRAW_HEADER_BYTES, max_input_record_bytes};

pub const WORD_BYTES: usize = 8;

/// Bytes of the length prefix in front of every slot payload
pub const LEN_PREFIX_BYTES: usize = 4;

/// Control block word indices
pub mod control {
    /// Sequence of the last published input record
    pub const INPUT_SEQ: usize = 0;
    /// Sequence of the last published draw batch
    pub const DRAW_SEQ: usize = 1;
    /// Non-zero once a stop was requested
    pub const STOP: usize = 2;
    /// Non-zero once the channel was closed
    pub const CLOSED: usize = 3;
    /// Index (0 or 1) of the input slot holding the newest record
    pub const ACTIVE_INPUT: usize = 4;
    /// Index (0 or 1) of the draw slot holding the newest batch
    pub const ACTIVE_DRAW: usize = 5;
    /// Total draw commands tail-dropped so far
    pub const DROPPED: usize = 6;
    /// Newest input frame number the worker has read
    pub const INPUT_ACK: usize = 7;
}

pub const CONTROL_WORDS: usize = 8;

/// Round `value` up to a multiple of `align` (a power of two)
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

pub const fn words_for_bytes(bytes: usize) -> usize {
    align_up(bytes, WORD_BYTES) / WORD_BYTES
}

/// Position of one slot inside the region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    /// Word index of the slot's sequence word
    pub seq_word: usize,
    /// Word index of the first data word
    pub data_word: usize,
    /// Number of data words
    pub data_words: usize,
}

impl SlotLayout {
    /// Largest payload the slot can hold, excluding the length prefix
    pub fn payload_capacity(&self) -> usize {
        self.data_words * WORD_BYTES - LEN_PREFIX_BYTES
    }

    /// First word index past the slot
    pub fn end_word(&self) -> usize {
        self.data_word + self.data_words
    }
}

/// Full layout of a shared region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    pub input: [SlotLayout; 2],
    pub draw: [SlotLayout; 2],
    pub total_words: usize,
}

impl RegionLayout {
    /// Smallest input slot (payload bytes) that fits any encoded input record
    pub const MIN_INPUT_BYTES: usize = max_input_record_bytes();
    /// Smallest draw slot (payload bytes): an empty batch
    pub const MIN_DRAW_BYTES: usize = DRAW_HEADER_BYTES;

    /// Lay out a region for the requested payload capacities
    ///
    /// Capacities are raised to the minimum a record needs and rounded up to
    /// whole words.
    pub fn new(input_slot_bytes: usize, draw_slot_bytes: usize) -> Self {
        let input_words = words_for_bytes(input_slot_bytes.max(Self::MIN_INPUT_BYTES) + LEN_PREFIX_BYTES);
        let draw_words = words_for_bytes(draw_slot_bytes.max(Self::MIN_DRAW_BYTES) + LEN_PREFIX_BYTES);

        let mut cursor = CONTROL_WORDS;
        let mut slot = |data_words: usize| {
            let layout = SlotLayout {
                seq_word: cursor,
                data_word: cursor + 1,
                data_words,
            };
            cursor = layout.end_word();
            layout
        };

        let input = [slot(input_words), slot(input_words)];
        let draw = [slot(draw_words), slot(draw_words)];

        Self {
            input,
            draw,
            total_words: cursor,
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.total_words * WORD_BYTES
    }
}

/// Pack up to eight bytes into a little-endian word, zero padded
pub fn pack_word(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; WORD_BYTES];
    let n = bytes.len().min(WORD_BYTES);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

/// Unpack a little-endian word into up to eight bytes
pub fn unpack_word(word: u64, out: &mut [u8]) {
    let bytes = word.to_le_bytes();
    let n = out.len().min(WORD_BYTES);
    out[..n].copy_from_slice(&bytes[..n]);
}

/// Frame `payload` as `[u32 len][payload]` into `out`, replacing its contents
pub fn frame_payload(payload: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 8), 16);
        assert_eq!(words_for_bytes(17), 3);
    }

    #[test]
    fn test_region_slots_are_disjoint_and_ordered() {
        let layout = RegionLayout::new(16 * 1024, 64 * 1024);
        let slots = [layout.input[0], layout.input[1], layout.draw[0], layout.draw[1]];

        assert_eq!(slots[0].seq_word, CONTROL_WORDS);
        for pair in slots.windows(2) {
            assert_eq!(pair[0].end_word(), pair[1].seq_word);
        }
        assert_eq!(layout.total_words, slots[3].end_word());
        assert!(layout.draw[0].payload_capacity() >= 64 * 1024);
        assert!(layout.input[0].payload_capacity() >= 16 * 1024);
    }

    #[test]
    fn test_region_raises_tiny_capacities() {
        let layout = RegionLayout::new(1, 1);
        assert!(layout.input[0].payload_capacity() >= RegionLayout::MIN_INPUT_BYTES);
        assert!(layout.draw[0].payload_capacity() >= RegionLayout::MIN_DRAW_BYTES);
    }

    #[test]
    fn test_word_packing() {
        let word = pack_word(&[1, 2, 3]);
        assert_eq!(word, 0x030201);

        let mut out = [0u8; 3];
        unpack_word(word, &mut out);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_frame_payload_prefixes_length() {
        let mut out = vec![9, 9, 9];
        frame_payload(&[7, 8], &mut out);
        assert_eq!(out, vec![2, 0, 0, 0, 7, 8]);
    }
}
