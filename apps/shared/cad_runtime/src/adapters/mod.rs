//! Script engine adapters
//!
//! Each adapter implements [`crate::worker::ScriptEngine`] for one scripting
//! language and is compiled in behind its own feature.

#[cfg(feature = "js")]
pub mod js;

#[cfg(feature = "js")]
pub use js::{JsEngine, js_engine_factory};
