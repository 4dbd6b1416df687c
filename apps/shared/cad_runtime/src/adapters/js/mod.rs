//! JavaScript engine (QuickJS)
//!
//! Runs a frame script through rquickjs. The script sees three globals:
//! `draw` (canvas commands), `input` (the current input snapshot) and `time`
//! (frame timing), plus a `console` that logs through tracing.

pub mod bindings;
mod engine;

pub use engine::{JsEngine, ON_FRAME, js_engine_factory};
