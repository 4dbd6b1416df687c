//! Little-endian binary codec for [`InputState`] and [`DrawBatch`]
//!
//! Used by the shared-memory transport, where every record has to fit in a
//! fixed-size slot. Encoding never fails: oversized strings are truncated or
//! skipped, and draw commands that do not fit are tail-dropped and counted.
//! Decoding validates everything and returns a typed [`ProtocolError`].

use std::collections::BTreeSet;

use crate::error::{ProtocolError, Result};
use crate::records::{
    Color, DrawBatch, DrawCommand, InputState, KeyCode, MouseButtons, TimingInfo,
};

/// Longest key identifier carried in an input record
pub const MAX_KEY_BYTES: usize = 64;
/// Most keys carried per set in an input record
pub const MAX_KEYS: usize = 64;
/// Longest text payload of a `Text` command
pub const MAX_TEXT_BYTES: usize = 1024;
/// Longest image id or font family
pub const MAX_NAME_BYTES: usize = 256;

/// Fixed part of an encoded input record
const INPUT_HEADER_BYTES: usize = 8 + 8 + 8 + 8 + 4 + 4 + 1 + 1;
/// Fixed part of an encoded draw batch: sequence, frame, dropped, count
pub const DRAW_HEADER_BYTES: usize = 8 + 8 + 4 + 4;

const DROPPED_OFFSET: usize = 16;
const COUNT_OFFSET: usize = 20;

/// Upper bound on the size of any encoded input record
pub const fn max_input_record_bytes() -> usize {
    INPUT_HEADER_BYTES + 2 * (2 + MAX_KEYS * (2 + MAX_KEY_BYTES))
}

mod tag {
    pub const CLEAR: u8 = 0;
    pub const RECT: u8 = 1;
    pub const FILL_RECT: u8 = 2;
    pub const CIRCLE: u8 = 3;
    pub const FILL_CIRCLE: u8 = 4;
    pub const LINE: u8 = 5;
    pub const TEXT: u8 = 6;
    pub const IMAGE: u8 = 7;
    pub const BEGIN_PATH: u8 = 8;
    pub const MOVE_TO: u8 = 9;
    pub const LINE_TO: u8 = 10;
    pub const ARC: u8 = 11;
    pub const CLOSE_PATH: u8 = 12;
    pub const FILL: u8 = 13;
    pub const STROKE: u8 = 14;
    pub const SET_FILL_COLOR: u8 = 15;
    pub const SET_STROKE_COLOR: u8 = 16;
    pub const SET_LINE_WIDTH: u8 = 17;
    pub const SET_FONT: u8 = 18;
    pub const SAVE: u8 = 19;
    pub const RESTORE: u8 = 20;
    pub const TRANSLATE: u8 = 21;
    pub const ROTATE: u8 = 22;
    pub const SCALE: u8 = 23;
    pub const SET_TRANSFORM: u8 = 24;
}

/// Cut `s` to at most `max` bytes without splitting a character
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Appends little-endian fields to a byte buffer
pub struct WireWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> WireWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn color(&mut self, c: Color) {
        self.u32(c.to_u32());
    }

    /// Write `u16 len + utf8`, truncated to `max` bytes on a char boundary
    pub fn str(&mut self, s: &str, max: usize) {
        let s = truncate_utf8(s, max.min(u16::MAX as usize));
        self.u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Overwrite a previously written u32 in place
    fn patch_u32(&mut self, offset: usize, v: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }
}

/// Reads little-endian fields from a byte slice with bounds checks
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    pub fn color(&mut self) -> Result<Color> {
        Ok(Color::from_u32(self.u32()?))
    }

    pub fn str(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8(offset))
    }

    /// Fail if any bytes remain unread
    pub fn finish(self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}

fn write_key_set(w: &mut WireWriter<'_>, keys: &BTreeSet<KeyCode>) {
    let kept: Vec<&KeyCode> = keys
        .iter()
        .filter(|k| k.len() <= MAX_KEY_BYTES)
        .take(MAX_KEYS)
        .collect();
    w.u16(kept.len() as u16);
    for key in kept {
        w.str(key, MAX_KEY_BYTES);
    }
}

fn read_key_set(r: &mut WireReader<'_>) -> Result<BTreeSet<KeyCode>> {
    let count = r.u16()? as usize;
    let mut keys = BTreeSet::new();
    for _ in 0..count {
        keys.insert(r.str()?);
    }
    Ok(keys)
}

/// Encode an input snapshot, replacing the contents of `out`
///
/// Keys longer than [`MAX_KEY_BYTES`] are skipped and each set keeps at most
/// [`MAX_KEYS`] entries, so the result never exceeds
/// [`max_input_record_bytes`].
pub fn encode_input(state: &InputState, out: &mut Vec<u8>) {
    out.clear();
    let mut w = WireWriter::new(out);
    w.u64(state.frame_number);
    w.u64(state.acked_frame);
    w.f64(state.timing.delta);
    w.f64(state.timing.elapsed);
    w.f32(state.mouse_x);
    w.f32(state.mouse_y);
    w.u8(state.buttons_down.bits());
    w.u8(state.buttons_pressed.bits());
    write_key_set(&mut w, &state.keys_down);
    write_key_set(&mut w, &state.keys_pressed);
}

pub fn decode_input(bytes: &[u8]) -> Result<InputState> {
    let mut r = WireReader::new(bytes);
    let frame_number = r.u64()?;
    let acked_frame = r.u64()?;
    let delta = r.f64()?;
    let elapsed = r.f64()?;
    let mouse_x = r.f32()?;
    let mouse_y = r.f32()?;
    let buttons_down = MouseButtons::from_bits(r.u8()?);
    let buttons_pressed = MouseButtons::from_bits(r.u8()?);
    let keys_down = read_key_set(&mut r)?;
    let keys_pressed = read_key_set(&mut r)?;
    r.finish()?;

    Ok(InputState {
        frame_number,
        acked_frame,
        timing: TimingInfo { delta, elapsed },
        keys_down,
        keys_pressed,
        mouse_x,
        mouse_y,
        buttons_down,
        buttons_pressed,
    })
}

fn write_command(w: &mut WireWriter<'_>, cmd: &DrawCommand) {
    match cmd {
        DrawCommand::Clear { color } => {
            w.u8(tag::CLEAR);
            w.color(*color);
        }
        DrawCommand::Rect { x, y, w: width, h } => {
            w.u8(tag::RECT);
            for v in [*x, *y, *width, *h] {
                w.f32(v);
            }
        }
        DrawCommand::FillRect { x, y, w: width, h } => {
            w.u8(tag::FILL_RECT);
            for v in [*x, *y, *width, *h] {
                w.f32(v);
            }
        }
        DrawCommand::Circle { x, y, radius } => {
            w.u8(tag::CIRCLE);
            for v in [*x, *y, *radius] {
                w.f32(v);
            }
        }
        DrawCommand::FillCircle { x, y, radius } => {
            w.u8(tag::FILL_CIRCLE);
            for v in [*x, *y, *radius] {
                w.f32(v);
            }
        }
        DrawCommand::Line { x1, y1, x2, y2 } => {
            w.u8(tag::LINE);
            for v in [*x1, *y1, *x2, *y2] {
                w.f32(v);
            }
        }
        DrawCommand::Text { x, y, text } => {
            w.u8(tag::TEXT);
            w.f32(*x);
            w.f32(*y);
            w.str(text, MAX_TEXT_BYTES);
        }
        DrawCommand::Image { image_id, x, y, w: width, h } => {
            w.u8(tag::IMAGE);
            w.str(image_id, MAX_NAME_BYTES);
            for v in [*x, *y, *width, *h] {
                w.f32(v);
            }
        }
        DrawCommand::BeginPath => w.u8(tag::BEGIN_PATH),
        DrawCommand::MoveTo { x, y } => {
            w.u8(tag::MOVE_TO);
            w.f32(*x);
            w.f32(*y);
        }
        DrawCommand::LineTo { x, y } => {
            w.u8(tag::LINE_TO);
            w.f32(*x);
            w.f32(*y);
        }
        DrawCommand::Arc { x, y, radius, start_angle, end_angle } => {
            w.u8(tag::ARC);
            for v in [*x, *y, *radius, *start_angle, *end_angle] {
                w.f32(v);
            }
        }
        DrawCommand::ClosePath => w.u8(tag::CLOSE_PATH),
        DrawCommand::Fill => w.u8(tag::FILL),
        DrawCommand::Stroke => w.u8(tag::STROKE),
        DrawCommand::SetFillColor { color } => {
            w.u8(tag::SET_FILL_COLOR);
            w.color(*color);
        }
        DrawCommand::SetStrokeColor { color } => {
            w.u8(tag::SET_STROKE_COLOR);
            w.color(*color);
        }
        DrawCommand::SetLineWidth { width } => {
            w.u8(tag::SET_LINE_WIDTH);
            w.f32(*width);
        }
        DrawCommand::SetFont { size, family } => {
            w.u8(tag::SET_FONT);
            w.f32(*size);
            w.str(family, MAX_NAME_BYTES);
        }
        DrawCommand::Save => w.u8(tag::SAVE),
        DrawCommand::Restore => w.u8(tag::RESTORE),
        DrawCommand::Translate { x, y } => {
            w.u8(tag::TRANSLATE);
            w.f32(*x);
            w.f32(*y);
        }
        DrawCommand::Rotate { radians } => {
            w.u8(tag::ROTATE);
            w.f32(*radians);
        }
        DrawCommand::Scale { x, y } => {
            w.u8(tag::SCALE);
            w.f32(*x);
            w.f32(*y);
        }
        DrawCommand::SetTransform { a, b, c, d, e, f } => {
            w.u8(tag::SET_TRANSFORM);
            for v in [*a, *b, *c, *d, *e, *f] {
                w.f32(v);
            }
        }
    }
}

fn read_command(r: &mut WireReader<'_>) -> Result<DrawCommand> {
    let cmd = match r.u8()? {
        tag::CLEAR => DrawCommand::Clear { color: r.color()? },
        tag::RECT => DrawCommand::Rect { x: r.f32()?, y: r.f32()?, w: r.f32()?, h: r.f32()? },
        tag::FILL_RECT => {
            DrawCommand::FillRect { x: r.f32()?, y: r.f32()?, w: r.f32()?, h: r.f32()? }
        }
        tag::CIRCLE => DrawCommand::Circle { x: r.f32()?, y: r.f32()?, radius: r.f32()? },
        tag::FILL_CIRCLE => {
            DrawCommand::FillCircle { x: r.f32()?, y: r.f32()?, radius: r.f32()? }
        }
        tag::LINE => {
            DrawCommand::Line { x1: r.f32()?, y1: r.f32()?, x2: r.f32()?, y2: r.f32()? }
        }
        tag::TEXT => DrawCommand::Text { x: r.f32()?, y: r.f32()?, text: r.str()? },
        tag::IMAGE => DrawCommand::Image {
            image_id: r.str()?,
            x: r.f32()?,
            y: r.f32()?,
            w: r.f32()?,
            h: r.f32()?,
        },
        tag::BEGIN_PATH => DrawCommand::BeginPath,
        tag::MOVE_TO => DrawCommand::MoveTo { x: r.f32()?, y: r.f32()? },
        tag::LINE_TO => DrawCommand::LineTo { x: r.f32()?, y: r.f32()? },
        tag::ARC => DrawCommand::Arc {
            x: r.f32()?,
            y: r.f32()?,
            radius: r.f32()?,
            start_angle: r.f32()?,
            end_angle: r.f32()?,
        },
        tag::CLOSE_PATH => DrawCommand::ClosePath,
        tag::FILL => DrawCommand::Fill,
        tag::STROKE => DrawCommand::Stroke,
        tag::SET_FILL_COLOR => DrawCommand::SetFillColor { color: r.color()? },
        tag::SET_STROKE_COLOR => DrawCommand::SetStrokeColor { color: r.color()? },
        tag::SET_LINE_WIDTH => DrawCommand::SetLineWidth { width: r.f32()? },
        tag::SET_FONT => DrawCommand::SetFont { size: r.f32()?, family: r.str()? },
        tag::SAVE => DrawCommand::Save,
        tag::RESTORE => DrawCommand::Restore,
        tag::TRANSLATE => DrawCommand::Translate { x: r.f32()?, y: r.f32()? },
        tag::ROTATE => DrawCommand::Rotate { radians: r.f32()? },
        tag::SCALE => DrawCommand::Scale { x: r.f32()?, y: r.f32()? },
        tag::SET_TRANSFORM => DrawCommand::SetTransform {
            a: r.f32()?,
            b: r.f32()?,
            c: r.f32()?,
            d: r.f32()?,
            e: r.f32()?,
            f: r.f32()?,
        },
        other => return Err(ProtocolError::UnknownCommandTag(other)),
    };
    Ok(cmd)
}

/// Outcome of [`encode_draw_batch`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeSummary {
    /// Commands actually encoded
    pub written: usize,
    /// Commands tail-dropped by this call (not counting `batch.dropped`)
    pub dropped: usize,
}

/// Encode a draw batch into `out`, replacing its contents
///
/// At most `max_commands` commands are written, and the encoding never grows
/// past `max_bytes` (the header is always written). The first command that
/// does not fit ends the batch: it and every later command are dropped, so
/// the surviving prefix is deterministic. The encoded `dropped` field carries
/// `batch.dropped` plus whatever this call dropped.
pub fn encode_draw_batch(
    batch: &DrawBatch,
    max_commands: usize,
    max_bytes: usize,
    out: &mut Vec<u8>,
) -> EncodeSummary {
    out.clear();
    let mut w = WireWriter::new(out);
    w.u64(batch.sequence);
    w.u64(batch.frame_number);
    w.u32(0);
    w.u32(0);

    let mut written = 0usize;
    for cmd in batch.commands.iter().take(max_commands) {
        let mark = w.len();
        write_command(&mut w, cmd);
        if w.len() > max_bytes {
            w.buf.truncate(mark);
            break;
        }
        written += 1;
    }

    let dropped = batch.commands.len() - written;
    let total_dropped = batch.dropped.saturating_add(dropped.min(u32::MAX as usize) as u32);
    w.patch_u32(DROPPED_OFFSET, total_dropped);
    w.patch_u32(COUNT_OFFSET, written as u32);

    EncodeSummary { written, dropped }
}

pub fn decode_draw_batch(bytes: &[u8]) -> Result<DrawBatch> {
    let mut r = WireReader::new(bytes);
    let sequence = r.u64()?;
    let frame_number = r.u64()?;
    let dropped = r.u32()?;
    let count = r.u32()? as usize;

    // Every command needs at least its tag byte.
    if count > r.remaining() {
        return Err(ProtocolError::Truncated {
            offset: r.position(),
            needed: count,
            available: r.remaining(),
        });
    }

    let mut commands = Vec::with_capacity(count);
    for _ in 0..count {
        commands.push(read_command(&mut r)?);
    }
    r.finish()?;

    Ok(DrawBatch {
        sequence,
        frame_number,
        dropped,
        commands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::MouseButton;

    fn sample_input() -> InputState {
        let mut state = InputState {
            frame_number: 42,
            acked_frame: 40,
            timing: TimingInfo { delta: 1.0 / 60.0, elapsed: 3.5 },
            mouse_x: 10.5,
            mouse_y: -2.0,
            ..Default::default()
        };
        state.keys_down.insert("KeyA".into());
        state.keys_down.insert("ArrowUp".into());
        state.keys_pressed.insert("KeyA".into());
        state.buttons_down.insert(MouseButton::Left);
        state.buttons_pressed.insert(MouseButton::Left);
        state
    }

    fn every_command() -> Vec<DrawCommand> {
        vec![
            DrawCommand::Clear { color: Color::BLACK },
            DrawCommand::Rect { x: 1.0, y: 2.0, w: 3.0, h: 4.0 },
            DrawCommand::FillRect { x: 1.0, y: 2.0, w: 3.0, h: 4.0 },
            DrawCommand::Circle { x: 5.0, y: 5.0, radius: 2.0 },
            DrawCommand::FillCircle { x: 5.0, y: 5.0, radius: 2.0 },
            DrawCommand::Line { x1: 0.0, y1: 0.0, x2: 9.0, y2: 9.0 },
            DrawCommand::Text { x: 0.0, y: 0.0, text: "héllo".into() },
            DrawCommand::Image { image_id: "ship".into(), x: 0.0, y: 0.0, w: 8.0, h: 8.0 },
            DrawCommand::BeginPath,
            DrawCommand::MoveTo { x: 1.0, y: 1.0 },
            DrawCommand::LineTo { x: 2.0, y: 2.0 },
            DrawCommand::Arc { x: 0.0, y: 0.0, radius: 1.0, start_angle: 0.0, end_angle: 3.0 },
            DrawCommand::ClosePath,
            DrawCommand::Fill,
            DrawCommand::Stroke,
            DrawCommand::SetFillColor { color: Color::rgba(1, 2, 3, 4) },
            DrawCommand::SetStrokeColor { color: Color::WHITE },
            DrawCommand::SetLineWidth { width: 2.5 },
            DrawCommand::SetFont { size: 12.0, family: "monospace".into() },
            DrawCommand::Save,
            DrawCommand::Restore,
            DrawCommand::Translate { x: 3.0, y: 4.0 },
            DrawCommand::Rotate { radians: 0.5 },
            DrawCommand::Scale { x: 2.0, y: 2.0 },
            DrawCommand::SetTransform { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 },
        ]
    }

    #[test]
    fn test_input_round_trip() {
        let state = sample_input();
        let mut buf = Vec::new();
        encode_input(&state, &mut buf);
        assert!(buf.len() <= max_input_record_bytes());
        assert_eq!(decode_input(&buf).unwrap(), state);
    }

    #[test]
    fn test_input_skips_oversized_keys() {
        let mut state = sample_input();
        state.keys_down.insert("K".repeat(MAX_KEY_BYTES + 1));
        for i in 0..(MAX_KEYS + 10) {
            state.keys_pressed.insert(format!("Key{i:03}"));
        }

        let mut buf = Vec::new();
        encode_input(&state, &mut buf);
        assert!(buf.len() <= max_input_record_bytes());

        let decoded = decode_input(&buf).unwrap();
        assert_eq!(decoded.keys_down.len(), 2);
        assert_eq!(decoded.keys_pressed.len(), MAX_KEYS);
    }

    #[test]
    fn test_draw_batch_covers_every_command() {
        let batch = DrawBatch::new(7, 99, every_command());
        let mut buf = Vec::new();
        let summary = encode_draw_batch(&batch, usize::MAX, usize::MAX, &mut buf);
        assert_eq!(summary, EncodeSummary { written: batch.len(), dropped: 0 });
        assert_eq!(decode_draw_batch(&buf).unwrap(), batch);
    }

    #[test]
    fn test_draw_batch_tail_drops_on_command_cap() {
        let batch = DrawBatch::new(1, 1, every_command());
        let mut buf = Vec::new();
        let summary = encode_draw_batch(&batch, 3, usize::MAX, &mut buf);
        assert_eq!(summary.written, 3);
        assert_eq!(summary.dropped, batch.len() - 3);

        let decoded = decode_draw_batch(&buf).unwrap();
        assert_eq!(decoded.commands, batch.commands[..3].to_vec());
        assert_eq!(decoded.dropped as usize, batch.len() - 3);
    }

    #[test]
    fn test_draw_batch_tail_drops_on_byte_cap() {
        let commands: Vec<_> = (0..100)
            .map(|i| DrawCommand::FillRect { x: i as f32, y: 0.0, w: 1.0, h: 1.0 })
            .collect();
        let batch = DrawBatch::new(1, 1, commands);
        let mut buf = Vec::new();
        // 17 bytes per FillRect
        let summary = encode_draw_batch(&batch, usize::MAX, DRAW_HEADER_BYTES + 17 * 10 + 5, &mut buf);
        assert_eq!(summary.written, 10);
        assert_eq!(summary.dropped, 90);
        assert_eq!(buf.len(), DRAW_HEADER_BYTES + 17 * 10);

        let decoded = decode_draw_batch(&buf).unwrap();
        assert_eq!(decoded.len(), 10);
        assert_eq!(decoded.dropped, 90);
    }

    #[test]
    fn test_text_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_TEXT_BYTES);
        let batch = DrawBatch::new(1, 1, vec![DrawCommand::Text { x: 0.0, y: 0.0, text: long }]);
        let mut buf = Vec::new();
        encode_draw_batch(&batch, usize::MAX, usize::MAX, &mut buf);

        match &decode_draw_batch(&buf).unwrap().commands[0] {
            DrawCommand::Text { text, .. } => {
                assert_eq!(text.len(), MAX_TEXT_BYTES);
                assert!(text.chars().all(|c| c == 'é'));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        let batch = DrawBatch::new(1, 1, vec![DrawCommand::Fill]);
        let mut buf = Vec::new();
        encode_draw_batch(&batch, usize::MAX, usize::MAX, &mut buf);

        let mut bad_tag = buf.clone();
        *bad_tag.last_mut().unwrap() = 200;
        assert!(matches!(decode_draw_batch(&bad_tag), Err(ProtocolError::UnknownCommandTag(200))));

        assert!(matches!(
            decode_draw_batch(&buf[..buf.len() - 1]),
            Err(ProtocolError::Truncated { .. })
        ));

        let mut trailing = buf.clone();
        trailing.push(0);
        assert!(matches!(decode_draw_batch(&trailing), Err(ProtocolError::TrailingBytes(1))));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let mut buf = Vec::new();
        encode_input(&InputState::default(), &mut buf);
        // Replace the empty "down" set with one 2-byte invalid key.
        buf.truncate(buf.len() - 4);
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&[0xff, 0xfe]);
        buf.extend_from_slice(&0u16.to_le_bytes());
        assert!(matches!(decode_input(&buf), Err(ProtocolError::InvalidUtf8(_))));
    }
}
