//! Drawing and input query surface handed to the frame callback

use cad_protocol::{Color, DrawCommand, InputState, MouseButton};

/// Accumulates draw commands for one frame
///
/// Tracks the save/restore depth so an unbalanced `restore` is dropped
/// instead of reaching the rasterizer.
#[derive(Debug, Default)]
pub struct Canvas {
    commands: Vec<DrawCommand>,
    depth: usize,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: DrawCommand) {
        match command {
            DrawCommand::Save => self.depth += 1,
            DrawCommand::Restore => {
                if self.depth == 0 {
                    return;
                }
                self.depth -= 1;
            }
            _ => {}
        }
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Take the accumulated commands, leaving the canvas empty
    pub fn take(&mut self) -> Vec<DrawCommand> {
        self.depth = 0;
        std::mem::take(&mut self.commands)
    }

    pub fn reset(&mut self) {
        self.commands.clear();
        self.depth = 0;
    }

    pub fn clear(&mut self, color: Color) {
        self.push(DrawCommand::Clear { color });
    }

    pub fn rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        self.push(DrawCommand::Rect { x, y, w, h });
    }

    pub fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        self.push(DrawCommand::FillRect { x, y, w, h });
    }

    pub fn circle(&mut self, x: f32, y: f32, radius: f32) {
        self.push(DrawCommand::Circle { x, y, radius });
    }

    pub fn fill_circle(&mut self, x: f32, y: f32, radius: f32) {
        self.push(DrawCommand::FillCircle { x, y, radius });
    }

    pub fn line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32) {
        self.push(DrawCommand::Line { x1, y1, x2, y2 });
    }

    pub fn text(&mut self, x: f32, y: f32, text: impl Into<String>) {
        self.push(DrawCommand::Text { x, y, text: text.into() });
    }

    pub fn image(&mut self, image_id: impl Into<String>, x: f32, y: f32, w: f32, h: f32) {
        self.push(DrawCommand::Image {
            image_id: image_id.into(),
            x,
            y,
            w,
            h,
        });
    }

    pub fn begin_path(&mut self) {
        self.push(DrawCommand::BeginPath);
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        self.push(DrawCommand::MoveTo { x, y });
    }

    pub fn line_to(&mut self, x: f32, y: f32) {
        self.push(DrawCommand::LineTo { x, y });
    }

    pub fn arc(&mut self, x: f32, y: f32, radius: f32, start_angle: f32, end_angle: f32) {
        self.push(DrawCommand::Arc { x, y, radius, start_angle, end_angle });
    }

    pub fn close_path(&mut self) {
        self.push(DrawCommand::ClosePath);
    }

    pub fn fill(&mut self) {
        self.push(DrawCommand::Fill);
    }

    pub fn stroke(&mut self) {
        self.push(DrawCommand::Stroke);
    }

    pub fn set_fill_color(&mut self, color: Color) {
        self.push(DrawCommand::SetFillColor { color });
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        self.push(DrawCommand::SetStrokeColor { color });
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.push(DrawCommand::SetLineWidth { width });
    }

    pub fn set_font(&mut self, size: f32, family: impl Into<String>) {
        self.push(DrawCommand::SetFont { size, family: family.into() });
    }

    pub fn save(&mut self) {
        self.push(DrawCommand::Save);
    }

    pub fn restore(&mut self) {
        self.push(DrawCommand::Restore);
    }

    pub fn translate(&mut self, x: f32, y: f32) {
        self.push(DrawCommand::Translate { x, y });
    }

    pub fn rotate(&mut self, radians: f32) {
        self.push(DrawCommand::Rotate { radians });
    }

    pub fn scale(&mut self, x: f32, y: f32) {
        self.push(DrawCommand::Scale { x, y });
    }

    pub fn set_transform(&mut self, a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) {
        self.push(DrawCommand::SetTransform { a, b, c, d, e, f });
    }
}

/// What the frame callback sees: the input snapshot plus a canvas
///
/// The "pressed" queries read the edge-triggered sets captured on the render
/// thread, not a diff of two "down" snapshots, so a key tapped between two
/// frames is still reported.
pub struct FrameContext<'a> {
    input: &'a InputState,
    pub canvas: &'a mut Canvas,
}

impl<'a> FrameContext<'a> {
    pub fn new(input: &'a InputState, canvas: &'a mut Canvas) -> Self {
        Self { input, canvas }
    }

    pub fn input(&self) -> &InputState {
        self.input
    }

    pub fn is_key_down(&self, key: &str) -> bool {
        self.input.is_key_down(key)
    }

    pub fn is_key_pressed(&self, key: &str) -> bool {
        self.input.is_key_pressed(key)
    }

    pub fn keys_down(&self) -> impl Iterator<Item = &str> {
        self.input.keys_down.iter().map(String::as_str)
    }

    pub fn keys_pressed(&self) -> impl Iterator<Item = &str> {
        self.input.keys_pressed.iter().map(String::as_str)
    }

    pub fn mouse_position(&self) -> (f32, f32) {
        self.input.mouse_position()
    }

    pub fn is_mouse_down(&self, button: MouseButton) -> bool {
        self.input.is_mouse_down(button)
    }

    pub fn is_mouse_pressed(&self, button: MouseButton) -> bool {
        self.input.is_mouse_pressed(button)
    }

    /// Seconds since the previous frame
    pub fn delta(&self) -> f64 {
        self.input.timing.delta
    }

    /// Seconds since the loop started
    pub fn elapsed(&self) -> f64 {
        self.input.timing.elapsed
    }

    pub fn frame_number(&self) -> u64 {
        self.input.frame_number
    }
}
