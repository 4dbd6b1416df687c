//! Render-thread input capture
//!
//! Device events are folded into [`InputCapture`] as they arrive. Once per
//! frame the loop takes an [`InputState`] snapshot. A key that goes down and
//! back up between two snapshots is reported as pressed, and it keeps being
//! reported until the worker acknowledges a frame that carried it. A worker
//! slower than the render loop therefore never misses a tap.
//!
//! Tapping the same key again before the first tap is acknowledged yields a
//! single press.

use std::collections::{BTreeMap, BTreeSet};

use cad_protocol::{InputState, KeyCode, MouseButton, MouseButtons, TimingInfo};

/// Raw device event delivered to the capture
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    KeyDown(KeyCode),
    KeyUp(KeyCode),
    MouseMove { x: f32, y: f32 },
    MouseDown(MouseButton),
    MouseUp(MouseButton),
    /// Focus lost: everything held is released
    Blur,
}

/// Pending press edge, with the first frame that published it
type Origin = Option<u64>;

#[derive(Debug, Default)]
pub struct InputCapture {
    keys_down: BTreeSet<KeyCode>,
    keys_pressed: BTreeMap<KeyCode, Origin>,
    mouse_x: f32,
    mouse_y: f32,
    buttons_down: MouseButtons,
    buttons_pressed: MouseButtons,
    button_origins: [Origin; MouseButton::ALL.len()],
}

impl InputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: InputEvent) {
        match event {
            InputEvent::KeyDown(key) => {
                // Auto-repeat keeps the key down without a new edge.
                if !self.keys_down.contains(&key) {
                    self.keys_pressed.insert(key.clone(), None);
                    self.keys_down.insert(key);
                }
            }
            InputEvent::KeyUp(key) => {
                self.keys_down.remove(&key);
            }
            InputEvent::MouseMove { x, y } => {
                self.mouse_x = x;
                self.mouse_y = y;
            }
            InputEvent::MouseDown(button) => {
                if !self.buttons_down.contains(button) {
                    self.buttons_pressed.insert(button);
                    self.button_origins[button as usize] = None;
                    self.buttons_down.insert(button);
                }
            }
            InputEvent::MouseUp(button) => self.buttons_down.remove(button),
            InputEvent::Blur => {
                self.keys_down.clear();
                self.buttons_down.clear();
            }
        }
    }

    /// Snapshot for `frame_number`
    ///
    /// Edges first published at or before `acked_frame` were seen by the
    /// worker and are dropped. Everything else still pending is reported as
    /// pressed.
    pub fn snapshot(&mut self, frame_number: u64, timing: TimingInfo, acked_frame: u64) -> InputState {
        let seen = |origin: &Origin| matches!(origin, Some(frame) if *frame <= acked_frame);

        self.keys_pressed.retain(|_, origin| !seen(&*origin));
        for origin in self.keys_pressed.values_mut() {
            origin.get_or_insert(frame_number);
        }

        for button in self.buttons_pressed.iter() {
            let origin = &mut self.button_origins[button as usize];
            if seen(&*origin) {
                *origin = None;
                self.buttons_pressed.remove(button);
            } else {
                origin.get_or_insert(frame_number);
            }
        }

        InputState {
            frame_number,
            acked_frame,
            timing,
            keys_down: self.keys_down.clone(),
            keys_pressed: self.keys_pressed.keys().cloned().collect(),
            mouse_x: self.mouse_x,
            mouse_y: self.mouse_y,
            buttons_down: self.buttons_down,
            buttons_pressed: self.buttons_pressed,
        }
    }

    /// Forget edges that no snapshot has carried yet
    ///
    /// Edges already published stay pending until the worker acknowledges them.
    pub fn clear_pressed(&mut self) {
        self.keys_pressed.retain(|_, origin| origin.is_some());
        for button in self.buttons_pressed.iter() {
            if self.button_origins[button as usize].is_none() {
                self.buttons_pressed.remove(button);
            }
        }
    }

    pub fn is_key_down(&self, key: &str) -> bool {
        self.keys_down.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> KeyCode {
        name.to_string()
    }

    #[test]
    fn test_tap_is_pressed_until_acknowledged() {
        let mut capture = InputCapture::new();
        capture.apply(InputEvent::KeyDown(key("Space")));
        capture.apply(InputEvent::KeyUp(key("Space")));

        let frame = capture.snapshot(1, TimingInfo::default(), 0);
        assert!(frame.is_key_pressed("Space"));
        assert!(!frame.is_key_down("Space"));

        // Worker has not caught up yet
        let again = capture.snapshot(2, TimingInfo::default(), 0);
        assert!(again.is_key_pressed("Space"));
        assert_eq!(again.acked_frame, 0);

        let next = capture.snapshot(3, TimingInfo::default(), 1);
        assert!(!next.is_key_pressed("Space"));
    }

    #[test]
    fn test_unacknowledged_edge_survives_many_frames() {
        let mut capture = InputCapture::new();
        capture.apply(InputEvent::MouseDown(MouseButton::Left));
        capture.apply(InputEvent::MouseUp(MouseButton::Left));

        for frame in 5..20 {
            let state = capture.snapshot(frame, TimingInfo::default(), 4);
            assert!(state.is_mouse_pressed(MouseButton::Left), "lost at frame {frame}");
        }
        // Acknowledging a later frame retires the edge published at 5
        let state = capture.snapshot(20, TimingInfo::default(), 12);
        assert!(state.buttons_pressed.is_empty());
    }

    #[test]
    fn test_held_key_pressed_only_until_acknowledged() {
        let mut capture = InputCapture::new();
        capture.apply(InputEvent::KeyDown(key("KeyA")));
        capture.apply(InputEvent::KeyDown(key("KeyA")));

        let first = capture.snapshot(1, TimingInfo::default(), 0);
        assert!(first.is_key_pressed("KeyA") && first.is_key_down("KeyA"));

        capture.apply(InputEvent::KeyDown(key("KeyA")));
        let second = capture.snapshot(2, TimingInfo::default(), 1);
        assert!(!second.is_key_pressed("KeyA"));
        assert!(second.is_key_down("KeyA"));
    }

    #[test]
    fn test_new_tap_after_publication_is_not_retired() {
        let mut capture = InputCapture::new();
        capture.apply(InputEvent::KeyDown(key("KeyZ")));
        capture.apply(InputEvent::KeyUp(key("KeyZ")));
        capture.snapshot(1, TimingInfo::default(), 0);

        // Second tap lands before the ack for frame 1 is observed
        capture.apply(InputEvent::KeyDown(key("KeyZ")));
        capture.apply(InputEvent::KeyUp(key("KeyZ")));
        let state = capture.snapshot(2, TimingInfo::default(), 1);
        assert!(state.is_key_pressed("KeyZ"));

        let state = capture.snapshot(3, TimingInfo::default(), 2);
        assert!(!state.is_key_pressed("KeyZ"));
    }

    #[test]
    fn test_mouse_edges_and_position() {
        let mut capture = InputCapture::new();
        capture.apply(InputEvent::MouseMove { x: 3.0, y: 4.0 });
        capture.apply(InputEvent::MouseDown(MouseButton::Left));
        capture.apply(InputEvent::MouseUp(MouseButton::Left));
        capture.apply(InputEvent::MouseDown(MouseButton::Right));

        let frame = capture.snapshot(1, TimingInfo::default(), 0);
        assert_eq!(frame.mouse_position(), (3.0, 4.0));
        assert!(frame.is_mouse_pressed(MouseButton::Left));
        assert!(!frame.is_mouse_down(MouseButton::Left));
        assert!(frame.is_mouse_down(MouseButton::Right));

        let next = capture.snapshot(2, TimingInfo::default(), 1);
        assert!(next.buttons_pressed.is_empty());
        assert!(next.is_mouse_down(MouseButton::Right));
    }

    #[test]
    fn test_blur_releases_everything() {
        let mut capture = InputCapture::new();
        capture.apply(InputEvent::KeyDown(key("ShiftLeft")));
        capture.apply(InputEvent::MouseDown(MouseButton::Middle));
        capture.apply(InputEvent::Blur);

        let frame = capture.snapshot(1, TimingInfo::default(), 0);
        assert!(frame.keys_down.is_empty());
        assert!(frame.buttons_down.is_empty());
        // The edge still happened before focus was lost
        assert!(frame.is_key_pressed("ShiftLeft"));
    }

    #[test]
    fn test_clear_pressed_keeps_held_state() {
        let mut capture = InputCapture::new();
        capture.apply(InputEvent::KeyDown(key("KeyD")));
        capture.clear_pressed();

        let frame = capture.snapshot(1, TimingInfo::default(), 0);
        assert!(frame.is_key_down("KeyD"));
        assert!(!frame.is_key_pressed("KeyD"));
    }

    #[test]
    fn test_clear_pressed_keeps_published_edges() {
        let mut capture = InputCapture::new();
        capture.apply(InputEvent::KeyDown(key("KeyQ")));
        capture.apply(InputEvent::MouseDown(MouseButton::Back));
        capture.snapshot(1, TimingInfo::default(), 0);

        capture.apply(InputEvent::KeyDown(key("KeyW")));
        capture.apply(InputEvent::MouseDown(MouseButton::Forward));
        capture.clear_pressed();

        let frame = capture.snapshot(2, TimingInfo::default(), 0);
        assert!(frame.is_key_pressed("KeyQ"));
        assert!(!frame.is_key_pressed("KeyW"));
        assert!(frame.is_mouse_pressed(MouseButton::Back));
        assert!(!frame.is_mouse_pressed(MouseButton::Forward));
    }
}
