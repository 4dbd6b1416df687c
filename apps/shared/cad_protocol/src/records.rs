//! Records exchanged between the render thread and the worker thread
//!
//! These are the only values that cross the thread boundary. Both transports
//! carry exactly these types: the shared-memory transport through the binary
//! codec in [`crate::codec`], the message transport through the bincode
//! envelope in [`crate::message`].

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Key identifier (matches web KeyboardEvent.code, e.g. "KeyA", "ArrowUp")
pub type KeyCode = String;

/// Per-frame timing, computed on the render thread
///
/// `delta` is never negative and `elapsed` never decreases across frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    /// Seconds since the previous frame
    pub delta: f64,
    /// Seconds since the loop started
    pub elapsed: f64,
}

impl TimingInfo {
    /// Build the timing for the next frame, clamping against clock skew
    pub fn advance(self, delta: f64) -> Self {
        let delta = if delta.is_finite() && delta > 0.0 { delta } else { 0.0 };
        Self {
            delta,
            elapsed: self.elapsed + delta,
        }
    }
}

/// Mouse buttons tracked by the input snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MouseButton {
    Left = 0,
    Right = 1,
    Middle = 2,
    Back = 3,
    Forward = 4,
}

impl MouseButton {
    pub const ALL: [MouseButton; 5] = [
        MouseButton::Left,
        MouseButton::Right,
        MouseButton::Middle,
        MouseButton::Back,
        MouseButton::Forward,
    ];

    /// Convert from the numeric index used by scripts (0 = left, 1 = right, ...)
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(MouseButton::Left),
            1 => Some(MouseButton::Right),
            2 => Some(MouseButton::Middle),
            3 => Some(MouseButton::Back),
            4 => Some(MouseButton::Forward),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Bit set of mouse buttons
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MouseButtons(u8);

impl MouseButtons {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0b1_1111)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, button: MouseButton) -> bool {
        self.0 & button.bit() != 0
    }

    pub fn insert(&mut self, button: MouseButton) {
        self.0 |= button.bit();
    }

    pub fn remove(&mut self, button: MouseButton) {
        self.0 &= !button.bit();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Iterate over the buttons in the set
    pub fn iter(self) -> impl Iterator<Item = MouseButton> {
        MouseButton::ALL.into_iter().filter(move |b| self.contains(*b))
    }
}

/// Snapshot of keyboard and mouse state for one frame
///
/// "Down" sets are sticky until release. "Pressed" sets hold every edge the
/// worker has not acknowledged yet, so a key tapped and released between two
/// polls still shows up as pressed even if the worker skips snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputState {
    /// Render-thread frame this snapshot was captured for
    pub frame_number: u64,
    /// Newest frame the worker had acknowledged when this was captured
    pub acked_frame: u64,
    /// Timing of that frame
    pub timing: TimingInfo,
    /// Keys currently held
    pub keys_down: BTreeSet<KeyCode>,
    /// Keys that went down and are not yet acknowledged
    pub keys_pressed: BTreeSet<KeyCode>,
    /// Mouse position, surface relative
    pub mouse_x: f32,
    pub mouse_y: f32,
    /// Buttons currently held
    pub buttons_down: MouseButtons,
    /// Buttons that went down and are not yet acknowledged
    pub buttons_pressed: MouseButtons,
}

impl InputState {
    pub fn is_key_down(&self, key: &str) -> bool {
        self.keys_down.contains(key)
    }

    pub fn is_key_pressed(&self, key: &str) -> bool {
        self.keys_pressed.contains(key)
    }

    pub fn is_mouse_down(&self, button: MouseButton) -> bool {
        self.buttons_down.contains(button)
    }

    pub fn is_mouse_pressed(&self, button: MouseButton) -> bool {
        self.buttons_pressed.contains(button)
    }

    pub fn mouse_position(&self) -> (f32, f32) {
        (self.mouse_x, self.mouse_y)
    }
}

/// Packed RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Error returned when parsing a color string fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorParseError {
    InvalidHex,
    InvalidLength,
    InvalidRgbFormat,
    UnknownName(String),
}

impl fmt::Display for ColorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorParseError::InvalidHex => write!(f, "invalid hex digit in color"),
            ColorParseError::InvalidLength => {
                write!(f, "hex color must have 3, 4, 6 or 8 digits")
            }
            ColorParseError::InvalidRgbFormat => {
                write!(f, "expected rgb(r, g, b) or rgba(r, g, b, a)")
            }
            ColorParseError::UnknownName(name) => write!(f, "unknown color name '{}'", name),
        }
    }
}

impl std::error::Error for ColorParseError {}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes([self.r, self.g, self.b, self.a])
    }

    pub fn from_u32(value: u32) -> Self {
        let [r, g, b, a] = value.to_be_bytes();
        Self { r, g, b, a }
    }

    /// Parse a CSS-like color
    ///
    /// Supports "#RGB", "#RGBA", "#RRGGBB", "#RRGGBBAA", "rgb(r,g,b)",
    /// "rgba(r,g,b,a)" with `a` in 0.0-1.0, and a handful of names.
    pub fn parse(input: &str) -> Result<Self, ColorParseError> {
        let s = input.trim();

        if let Some(inner) = s.strip_prefix("rgba(").and_then(|r| r.strip_suffix(')')) {
            return Self::parse_channels(inner, true);
        }
        if let Some(inner) = s.strip_prefix("rgb(").and_then(|r| r.strip_suffix(')')) {
            return Self::parse_channels(inner, false);
        }
        if let Some(hex) = s.strip_prefix('#') {
            return Self::parse_hex(hex);
        }

        match s.to_ascii_lowercase().as_str() {
            "black" => Ok(Color::BLACK),
            "white" => Ok(Color::WHITE),
            "red" => Ok(Color::rgb(255, 0, 0)),
            "green" => Ok(Color::rgb(0, 128, 0)),
            "lime" => Ok(Color::rgb(0, 255, 0)),
            "blue" => Ok(Color::rgb(0, 0, 255)),
            "yellow" => Ok(Color::rgb(255, 255, 0)),
            "cyan" => Ok(Color::rgb(0, 255, 255)),
            "magenta" => Ok(Color::rgb(255, 0, 255)),
            "gray" | "grey" => Ok(Color::rgb(128, 128, 128)),
            "orange" => Ok(Color::rgb(255, 165, 0)),
            "transparent" => Ok(Color::TRANSPARENT),
            _ => Err(ColorParseError::UnknownName(s.to_string())),
        }
    }

    fn parse_hex(hex: &str) -> Result<Self, ColorParseError> {
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ColorParseError::InvalidHex);
        }
        let digit = |i: usize| -> Result<u8, ColorParseError> {
            u8::from_str_radix(&hex[i..i + 1].repeat(2), 16).map_err(|_| ColorParseError::InvalidHex)
        };
        let pair = |i: usize| -> Result<u8, ColorParseError> {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ColorParseError::InvalidHex)
        };

        match hex.len() {
            3 => Ok(Color::rgb(digit(0)?, digit(1)?, digit(2)?)),
            4 => Ok(Color::rgba(digit(0)?, digit(1)?, digit(2)?, digit(3)?)),
            6 => Ok(Color::rgb(pair(0)?, pair(2)?, pair(4)?)),
            8 => Ok(Color::rgba(pair(0)?, pair(2)?, pair(4)?, pair(6)?)),
            _ => Err(ColorParseError::InvalidLength),
        }
    }

    fn parse_channels(inner: &str, with_alpha: bool) -> Result<Self, ColorParseError> {
        let parts: Vec<&str> = inner.split(',').map(|p| p.trim()).collect();
        let expected = if with_alpha { 4 } else { 3 };
        if parts.len() != expected {
            return Err(ColorParseError::InvalidRgbFormat);
        }

        let channel = |p: &str| -> Result<u8, ColorParseError> {
            let v: f32 = p.parse().map_err(|_| ColorParseError::InvalidRgbFormat)?;
            Ok(v.clamp(0.0, 255.0).round() as u8)
        };
        let r = channel(parts[0])?;
        let g = channel(parts[1])?;
        let b = channel(parts[2])?;
        let a = if with_alpha {
            let v: f32 = parts[3].parse().map_err(|_| ColorParseError::InvalidRgbFormat)?;
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        } else {
            255
        };
        Ok(Color::rgba(r, g, b, a))
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

/// One drawing operation produced by the script during a frame
///
/// Closed set: the rasterizer matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DrawCommand {
    /// Clear the whole surface to a color
    Clear { color: Color },
    /// Outline a rectangle with the current stroke style
    Rect { x: f32, y: f32, w: f32, h: f32 },
    /// Fill a rectangle with the current fill color
    FillRect { x: f32, y: f32, w: f32, h: f32 },
    Circle { x: f32, y: f32, radius: f32 },
    FillCircle { x: f32, y: f32, radius: f32 },
    Line { x1: f32, y1: f32, x2: f32, y2: f32 },
    Text { x: f32, y: f32, text: String },
    /// Blit a previously loaded image, scaled to `w`×`h`
    Image { image_id: String, x: f32, y: f32, w: f32, h: f32 },

    BeginPath,
    MoveTo { x: f32, y: f32 },
    LineTo { x: f32, y: f32 },
    /// Arc around (x, y), angles in radians
    Arc { x: f32, y: f32, radius: f32, start_angle: f32, end_angle: f32 },
    ClosePath,
    Fill,
    Stroke,

    SetFillColor { color: Color },
    SetStrokeColor { color: Color },
    SetLineWidth { width: f32 },
    SetFont { size: f32, family: String },

    Save,
    Restore,
    Translate { x: f32, y: f32 },
    Rotate { radians: f32 },
    Scale { x: f32, y: f32 },
    /// Replace the current transform with the affine matrix [a b c d e f]
    SetTransform { a: f32, b: f32, c: f32, d: f32, e: f32, f: f32 },
}

impl DrawCommand {
    /// Short name used in logs and diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            DrawCommand::Clear { .. } => "clear",
            DrawCommand::Rect { .. } => "rect",
            DrawCommand::FillRect { .. } => "fillRect",
            DrawCommand::Circle { .. } => "circle",
            DrawCommand::FillCircle { .. } => "fillCircle",
            DrawCommand::Line { .. } => "line",
            DrawCommand::Text { .. } => "text",
            DrawCommand::Image { .. } => "image",
            DrawCommand::BeginPath => "beginPath",
            DrawCommand::MoveTo { .. } => "moveTo",
            DrawCommand::LineTo { .. } => "lineTo",
            DrawCommand::Arc { .. } => "arc",
            DrawCommand::ClosePath => "closePath",
            DrawCommand::Fill => "fill",
            DrawCommand::Stroke => "stroke",
            DrawCommand::SetFillColor { .. } => "setFillColor",
            DrawCommand::SetStrokeColor { .. } => "setStrokeColor",
            DrawCommand::SetLineWidth { .. } => "setLineWidth",
            DrawCommand::SetFont { .. } => "setFont",
            DrawCommand::Save => "save",
            DrawCommand::Restore => "restore",
            DrawCommand::Translate { .. } => "translate",
            DrawCommand::Rotate { .. } => "rotate",
            DrawCommand::Scale { .. } => "scale",
            DrawCommand::SetTransform { .. } => "setTransform",
        }
    }
}

/// One frame's ordered draw output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawBatch {
    /// Monotonically increasing publish counter, assigned by the worker
    pub sequence: u64,
    /// Frame number of the input this batch answers
    pub frame_number: u64,
    /// Commands dropped because the frame exceeded the channel capacity
    pub dropped: u32,
    pub commands: Vec<DrawCommand>,
}

impl DrawBatch {
    pub fn new(sequence: u64, frame_number: u64, commands: Vec<DrawCommand>) -> Self {
        Self {
            sequence,
            frame_number,
            dropped: 0,
            commands,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_advance_clamps_negative_delta() {
        let t = TimingInfo::default().advance(0.5).advance(-1.0);
        assert_eq!(t.delta, 0.0);
        assert_eq!(t.elapsed, 0.5);

        let t = t.advance(f64::NAN);
        assert_eq!(t.delta, 0.0);
        assert_eq!(t.elapsed, 0.5);
    }

    #[test]
    fn test_mouse_buttons_set() {
        let mut buttons = MouseButtons::empty();
        buttons.insert(MouseButton::Left);
        buttons.insert(MouseButton::Middle);
        assert!(buttons.contains(MouseButton::Left));
        assert!(!buttons.contains(MouseButton::Right));
        assert_eq!(buttons.iter().collect::<Vec<_>>(), vec![MouseButton::Left, MouseButton::Middle]);

        buttons.remove(MouseButton::Left);
        assert_eq!(buttons.bits(), 0b100);
        assert_eq!(MouseButtons::from_bits(0xFF).bits(), 0b1_1111);
    }

    #[test]
    fn test_color_parse_hex() {
        assert_eq!(Color::parse("#fff").unwrap(), Color::WHITE);
        assert_eq!(Color::parse("#ff000080").unwrap(), Color::rgba(255, 0, 0, 128));
        assert_eq!(Color::parse("#0a0B0c").unwrap(), Color::rgb(10, 11, 12));
        assert_eq!(Color::parse("#12345"), Err(ColorParseError::InvalidLength));
        assert_eq!(Color::parse("#zzz"), Err(ColorParseError::InvalidHex));
    }

    #[test]
    fn test_color_parse_functions_and_names() {
        assert_eq!(Color::parse("rgb(1, 2, 3)").unwrap(), Color::rgb(1, 2, 3));
        assert_eq!(Color::parse("rgba(255,0,0,0.5)").unwrap(), Color::rgba(255, 0, 0, 128));
        assert_eq!(Color::parse("Red").unwrap(), Color::rgb(255, 0, 0));
        assert!(matches!(Color::parse("chartreuse-ish"), Err(ColorParseError::UnknownName(_))));
        assert_eq!(Color::parse("rgb(1,2)"), Err(ColorParseError::InvalidRgbFormat));
    }

    #[test]
    fn test_color_packing() {
        let c = Color::rgba(1, 2, 3, 4);
        assert_eq!(c.to_u32(), 0x01020304);
        assert_eq!(Color::from_u32(0x01020304), c);
    }

    #[test]
    fn test_input_state_queries() {
        let mut state = InputState::default();
        state.keys_down.insert("KeyA".to_string());
        state.keys_pressed.insert("Space".to_string());
        state.buttons_pressed.insert(MouseButton::Right);

        assert!(state.is_key_down("KeyA"));
        assert!(!state.is_key_pressed("KeyA"));
        assert!(state.is_key_pressed("Space"));
        assert!(state.is_mouse_pressed(MouseButton::Right));
        assert!(!state.is_mouse_down(MouseButton::Right));
    }
}
