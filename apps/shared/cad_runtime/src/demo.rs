//! Built-in demo engine: a ball bouncing around a fixed playfield
//!
//! Arrow keys push the ball, Space cycles its color and a left click moves
//! it to the pointer.

use cad_protocol::{Color, MouseButton};

use crate::error::ScriptError;
use crate::worker::{EngineFactory, FrameContext, ScriptEngine};

const PALETTE: [Color; 4] = [
    Color::rgb(255, 200, 0),
    Color::rgb(0, 200, 255),
    Color::rgb(255, 80, 120),
    Color::rgb(120, 255, 120),
];

/// Speed added per second while an arrow key is held
const PUSH: f32 = 120.0;

pub struct BouncingDemo {
    width: f32,
    height: f32,
    radius: f32,
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    color: usize,
}

impl BouncingDemo {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            radius: (width.min(height) / 12.0).max(1.0),
            x: width / 2.0,
            y: height / 2.0,
            vx: width / 3.0,
            vy: height / 4.0,
            color: 0,
        }
    }

    pub fn factory(width: f32, height: f32) -> EngineFactory {
        Box::new(move || Ok(Box::new(BouncingDemo::new(width, height)) as Box<dyn ScriptEngine>))
    }

    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    fn step(&mut self, dt: f32) {
        self.x += self.vx * dt;
        self.y += self.vy * dt;

        let (min_x, max_x) = (self.radius, self.width - self.radius);
        let (min_y, max_y) = (self.radius, self.height - self.radius);
        if self.x < min_x || self.x > max_x {
            self.vx = -self.vx;
            self.x = self.x.clamp(min_x, max_x.max(min_x));
        }
        if self.y < min_y || self.y > max_y {
            self.vy = -self.vy;
            self.y = self.y.clamp(min_y, max_y.max(min_y));
        }
    }
}

impl ScriptEngine for BouncingDemo {
    fn engine_name(&self) -> &str {
        "native"
    }

    fn script_name(&self) -> &str {
        "bouncing-demo"
    }

    fn on_frame(&mut self, frame: &mut FrameContext<'_>) -> Result<(), ScriptError> {
        let dt = frame.delta() as f32;

        if frame.is_key_down("ArrowLeft") {
            self.vx -= PUSH * dt;
        }
        if frame.is_key_down("ArrowRight") {
            self.vx += PUSH * dt;
        }
        if frame.is_key_down("ArrowUp") {
            self.vy -= PUSH * dt;
        }
        if frame.is_key_down("ArrowDown") {
            self.vy += PUSH * dt;
        }
        if frame.is_key_pressed("Space") {
            self.color = (self.color + 1) % PALETTE.len();
        }
        if frame.is_mouse_pressed(MouseButton::Left) {
            let (mx, my) = frame.mouse_position();
            self.x = mx;
            self.y = my;
        }

        self.step(dt);

        let label = format!("frame {}  t={:.1}s", frame.frame_number(), frame.elapsed());
        let canvas = &mut *frame.canvas;
        canvas.clear(Color::BLACK);
        canvas.set_stroke_color(Color::WHITE);
        canvas.rect(0.0, 0.0, self.width, self.height);
        canvas.set_fill_color(PALETTE[self.color]);
        canvas.fill_circle(self.x, self.y, self.radius);
        canvas.set_fill_color(Color::WHITE);
        canvas.text(1.0, 1.0, label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Canvas;
    use cad_protocol::{DrawCommand, InputState, TimingInfo};

    fn frame_input(frame_number: u64, delta: f64) -> InputState {
        InputState {
            frame_number,
            timing: TimingInfo::default().advance(delta),
            ..Default::default()
        }
    }

    #[test]
    fn test_ball_stays_inside_playfield() {
        let mut demo = BouncingDemo::new(80.0, 24.0);
        let mut canvas = Canvas::new();
        for n in 1..500 {
            let input = frame_input(n, 0.05);
            demo.on_frame(&mut FrameContext::new(&input, &mut canvas)).unwrap();
            let (x, y) = demo.position();
            assert!((0.0..=80.0).contains(&x), "x out of bounds: {x}");
            assert!((0.0..=24.0).contains(&y), "y out of bounds: {y}");
        }
    }

    #[test]
    fn test_space_cycles_color() {
        let mut demo = BouncingDemo::new(80.0, 24.0);
        let mut input = frame_input(1, 0.0);
        input.keys_pressed.insert("Space".into());

        let mut canvas = Canvas::new();
        demo.on_frame(&mut FrameContext::new(&input, &mut canvas)).unwrap();
        assert!(canvas.commands().contains(&DrawCommand::SetFillColor { color: PALETTE[1] }));
    }

    #[test]
    fn test_frame_label_reports_frame_and_time() {
        let mut demo = BouncingDemo::new(80.0, 24.0);
        let input = frame_input(12, 2.5);

        let mut canvas = Canvas::new();
        demo.on_frame(&mut FrameContext::new(&input, &mut canvas)).unwrap();
        assert_eq!(
            canvas.commands().last(),
            Some(&DrawCommand::Text { x: 1.0, y: 1.0, text: "frame 12  t=2.5s".to_string() })
        );
    }

    #[test]
    fn test_click_moves_ball() {
        let mut demo = BouncingDemo::new(80.0, 24.0);
        let mut input = frame_input(1, 0.0);
        input.buttons_pressed.insert(MouseButton::Left);
        input.mouse_x = 10.0;
        input.mouse_y = 8.0;

        let mut canvas = Canvas::new();
        demo.on_frame(&mut FrameContext::new(&input, &mut canvas)).unwrap();
        assert_eq!(demo.position(), (10.0, 8.0));
    }
}
