//! Cadence runtime
//!
//! Runs a per-frame script callback on a dedicated worker thread while the
//! render thread keeps a steady frame clock. The two threads only exchange
//! fixed-layout records through a [`Channel`]: input snapshots one way, draw
//! batches the other.
//!
//! # Architecture
//!
//! - **Session**: host-facing lifecycle (start, pause, resume, stop, terminate)
//! - **GameLoop**: render-thread controller, frame pacing and rasterization
//! - **Channel**: shared-memory transport with a message-passing fallback
//! - **WorkerRuntime**: drives a [`ScriptEngine`] once per new input snapshot
//! - **Adapters**: script engines (JavaScript via QuickJS behind the `js` feature)

pub mod adapters;
pub mod channel;
pub mod config;
pub mod demo;
pub mod engine_kind;
pub mod error;
pub mod game_loop;
pub mod input;
pub mod rasterizer;
pub mod session;
pub mod terminal_input;
pub mod worker;

pub use channel::{Channel, ChannelFactory, ChannelMode, ChannelSettings, SharedMemoryCapability};
pub use config::{ByteSize, FrameErrorPolicy, SessionConfig, TransportPreference};
pub use demo::BouncingDemo;
pub use engine_kind::{EngineKind, engine_factory_for};
pub use error::{ChannelError, FatalError, FrameError, ScriptError, SessionError};
pub use game_loop::{FramePacer, FrameStats, GameLoop, LoopState, RunExit, StopOutcome};
pub use input::{InputCapture, InputEvent};
pub use rasterizer::{Rasterizer, RecordingRasterizer, RenderLog, RenderedFrame};
pub use session::{FatalErrorHook, Session};
pub use worker::{EngineFactory, FnEngine, FrameContext, ScriptEngine, WorkerEvent, fn_engine_factory};
