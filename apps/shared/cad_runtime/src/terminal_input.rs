//! Terminal input source
//!
//! Puts the terminal in raw mode and turns crossterm key, mouse and focus
//! events into [`InputEvent`]s with web-style key codes ("KeyA", "ArrowUp").
//!
//! Most terminals only report key presses. Unless the kitty keyboard protocol
//! is available, every press is delivered as a tap (down immediately followed
//! by up); the edge-triggered pressed set keeps such taps visible to scripts.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{
    self, DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture, Event,
    KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags, MouseButton as TermButton,
    MouseEvent, MouseEventKind, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error};

use cad_protocol::MouseButton;

use crate::input::InputEvent;

/// Web `KeyboardEvent.code` for a crossterm key, if it has one
pub fn key_code_to_web(code: &KeyCode) -> Option<String> {
    let name = match code {
        KeyCode::Char(c) if c.is_ascii_alphabetic() => format!("Key{}", c.to_ascii_uppercase()),
        KeyCode::Char(c) if c.is_ascii_digit() => format!("Digit{}", c),
        KeyCode::Char(c) => {
            let name = match c {
                ' ' => "Space",
                '-' | '_' => "Minus",
                '=' | '+' => "Equal",
                '[' | '{' => "BracketLeft",
                ']' | '}' => "BracketRight",
                '\\' | '|' => "Backslash",
                ';' | ':' => "Semicolon",
                '\'' | '"' => "Quote",
                '`' | '~' => "Backquote",
                ',' | '<' => "Comma",
                '.' | '>' => "Period",
                '/' | '?' => "Slash",
                _ => return None,
            };
            name.to_string()
        }
        KeyCode::F(n) => format!("F{}", n),
        KeyCode::Enter => "Enter".to_string(),
        KeyCode::Esc => "Escape".to_string(),
        KeyCode::Backspace => "Backspace".to_string(),
        KeyCode::Tab | KeyCode::BackTab => "Tab".to_string(),
        KeyCode::Delete => "Delete".to_string(),
        KeyCode::Insert => "Insert".to_string(),
        KeyCode::Home => "Home".to_string(),
        KeyCode::End => "End".to_string(),
        KeyCode::PageUp => "PageUp".to_string(),
        KeyCode::PageDown => "PageDown".to_string(),
        KeyCode::Up => "ArrowUp".to_string(),
        KeyCode::Down => "ArrowDown".to_string(),
        KeyCode::Left => "ArrowLeft".to_string(),
        KeyCode::Right => "ArrowRight".to_string(),
        KeyCode::CapsLock => "CapsLock".to_string(),
        KeyCode::ScrollLock => "ScrollLock".to_string(),
        KeyCode::NumLock => "NumLock".to_string(),
        KeyCode::PrintScreen => "PrintScreen".to_string(),
        KeyCode::Pause => "Pause".to_string(),
        KeyCode::Menu => "ContextMenu".to_string(),
        _ => return None,
    };
    Some(name)
}

fn mouse_button(button: TermButton) -> MouseButton {
    match button {
        TermButton::Left => MouseButton::Left,
        TermButton::Right => MouseButton::Right,
        TermButton::Middle => MouseButton::Middle,
    }
}

/// True for the key combination that ends the session (Ctrl+C)
pub fn is_interrupt(key_event: &KeyEvent) -> bool {
    key_event.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key_event.code, KeyCode::Char('c') | KeyCode::Char('C'))
}

/// Convert a key event into capture events
///
/// With `reports_release` false, a press becomes a down/up tap.
pub fn key_event_to_input(key_event: &KeyEvent, reports_release: bool) -> Vec<InputEvent> {
    let Some(code) = key_code_to_web(&key_event.code) else {
        return Vec::new();
    };

    match (key_event.kind, reports_release) {
        (KeyEventKind::Press, true) | (KeyEventKind::Repeat, true) => vec![InputEvent::KeyDown(code)],
        (KeyEventKind::Release, true) => vec![InputEvent::KeyUp(code)],
        (KeyEventKind::Release, false) => Vec::new(),
        (_, false) => vec![InputEvent::KeyDown(code.clone()), InputEvent::KeyUp(code)],
    }
}

/// Convert a mouse event; cell coordinates become surface coordinates
pub fn mouse_event_to_input(mouse_event: &MouseEvent) -> Option<InputEvent> {
    let x = mouse_event.column as f32;
    let y = mouse_event.row as f32;
    match mouse_event.kind {
        MouseEventKind::Down(button) => Some(InputEvent::MouseDown(mouse_button(button))),
        MouseEventKind::Up(button) => Some(InputEvent::MouseUp(mouse_button(button))),
        MouseEventKind::Moved | MouseEventKind::Drag(_) => Some(InputEvent::MouseMove { x, y }),
        _ => None,
    }
}

/// Handle for the terminal reader thread
///
/// Dropping it stops the thread and restores the terminal.
pub struct TerminalReaderHandle {
    cancel_tx: Option<mpsc::Sender<()>>,
    join_handle: Option<std::thread::JoinHandle<()>>,
    interrupt: Arc<Notify>,
}

impl TerminalReaderHandle {
    /// Notified when the user presses Ctrl+C
    pub fn interrupt(&self) -> Arc<Notify> {
        Arc::clone(&self.interrupt)
    }

    /// Stop the reader and wait for the terminal to be restored
    pub fn stop(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TerminalReaderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start reading terminal events into `events`
///
/// Enables raw mode, mouse capture and focus reporting; all three are undone
/// when the returned handle is stopped or dropped.
pub fn spawn_terminal_event_reader(events: mpsc::UnboundedSender<InputEvent>) -> io::Result<TerminalReaderHandle> {
    terminal::enable_raw_mode()?;
    cad_log::set_raw_mode_active(true);

    let mut stdout = io::stdout();
    if let Err(e) = execute!(stdout, EnableMouseCapture, EnableFocusChange) {
        debug!("Mouse capture or focus reporting unavailable: {}", e);
    }

    // Key release events need the kitty keyboard protocol
    let reports_release = terminal::supports_keyboard_enhancement().unwrap_or(false)
        && execute!(
            stdout,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )
        .is_ok();
    debug!(
        "Terminal input started (key releases {})",
        if reports_release { "reported" } else { "synthesized" }
    );

    let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);
    let interrupt = Arc::new(Notify::new());
    let thread_interrupt = Arc::clone(&interrupt);

    let join_handle = std::thread::Builder::new()
        .name("cad-terminal-input".to_string())
        .spawn(move || {
            loop {
                if cancel_rx.try_recv().is_ok() {
                    break;
                }

                match event::poll(Duration::from_millis(50)) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        error!("Error polling terminal events: {}", e);
                        break;
                    }
                }

                let converted = match event::read() {
                    Ok(Event::Key(key_event)) if is_interrupt(&key_event) => {
                        thread_interrupt.notify_one();
                        Vec::new()
                    }
                    Ok(Event::Key(key_event)) => key_event_to_input(&key_event, reports_release),
                    Ok(Event::Mouse(mouse_event)) => mouse_event_to_input(&mouse_event).into_iter().collect(),
                    Ok(Event::FocusLost) => vec![InputEvent::Blur],
                    Ok(_) => Vec::new(),
                    Err(e) => {
                        error!("Error reading terminal event: {}", e);
                        break;
                    }
                };

                if converted.into_iter().any(|ev| events.send(ev).is_err()) {
                    break;
                }
            }

            let mut stdout = io::stdout();
            if reports_release {
                let _ = execute!(stdout, PopKeyboardEnhancementFlags);
            }
            let _ = execute!(stdout, DisableMouseCapture, DisableFocusChange);

            cad_log::set_raw_mode_active(false);
            if let Err(e) = terminal::disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
            debug!("Terminal input stopped");
        });

    let join_handle = match join_handle {
        Ok(handle) => handle,
        Err(e) => {
            cad_log::set_raw_mode_active(false);
            let _ = terminal::disable_raw_mode();
            return Err(e);
        }
    };

    Ok(TerminalReaderHandle {
        cancel_tx: Some(cancel_tx),
        join_handle: Some(join_handle),
        interrupt,
    })
}

/// Check if stdin is connected to a terminal (TTY)
pub fn is_terminal() -> bool {
    atty::is(atty::Stream::Stdin)
}
