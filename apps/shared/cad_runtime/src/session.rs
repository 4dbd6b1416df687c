//! Host-facing session wrapper
//!
//! A [`Session`] owns one game loop and reports unrecoverable failures to an
//! optional fatal-error hook. Everything a session needs lives inside the
//! value; dropping it terminates the worker.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{ChannelFactory, ChannelMode};
use crate::config::SessionConfig;
use crate::error::{FatalError, FrameError, SessionError};
use crate::game_loop::{FrameStats, GameLoop, LoopState, RunExit, StopOutcome};
use crate::input::InputEvent;
use crate::rasterizer::Rasterizer;
use crate::worker::EngineFactory;

/// Callback invoked once per fatal error
pub type FatalErrorHook = Box<dyn Fn(&FatalError) + Send + Sync>;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub struct Session {
    id: u64,
    game_loop: GameLoop,
    on_fatal: Option<FatalErrorHook>,
}

impl Session {
    pub fn create(config: SessionConfig, engine: EngineFactory, rasterizer: Box<dyn Rasterizer>) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        info!(session = id, "Creating session (transport preference: {:?})", config.transport);
        Self {
            id,
            game_loop: GameLoop::new(config, engine, rasterizer),
            on_fatal: None,
        }
    }

    /// Replace the channel factory, e.g. to deny shared memory
    pub fn with_channel_factory(mut self, factory: ChannelFactory) -> Self {
        self.game_loop = self.game_loop.with_channel_factory(factory);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn on_fatal_error(&mut self, hook: impl Fn(&FatalError) + Send + Sync + 'static) {
        self.on_fatal = Some(Box::new(hook));
    }

    /// Pass `error` through, firing the fatal hook if it is fatal
    fn report(&self, error: SessionError) -> SessionError {
        if let SessionError::Fatal(fatal) = &error {
            warn!(session = self.id, "Session failed: {}", fatal);
            if let Some(hook) = &self.on_fatal {
                hook(fatal);
            }
        }
        error
    }

    /// Start the worker and wait for its ready handshake
    pub async fn start(&mut self) -> Result<ChannelMode, SessionError> {
        self.game_loop.start().await.map_err(|e| self.report(e))
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.game_loop.pause()
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        self.game_loop.resume()
    }

    /// Cooperative stop with a bounded wait, then terminate
    pub async fn stop(&mut self) -> StopOutcome {
        self.game_loop.stop().await
    }

    /// Release everything now. Safe from any state, including `Starting`
    /// after a start future was dropped before the worker became ready.
    pub fn terminate(&mut self) {
        self.game_loop.terminate();
    }

    /// Transport in use, once started
    pub fn mode(&self) -> Option<ChannelMode> {
        self.game_loop.mode()
    }

    pub fn state(&self) -> LoopState {
        self.game_loop.state()
    }

    pub fn stats(&self) -> FrameStats {
        self.game_loop.stats()
    }

    pub fn last_frame_error(&self) -> Option<&FrameError> {
        self.game_loop.last_frame_error()
    }

    pub fn input_sender(&self) -> mpsc::UnboundedSender<InputEvent> {
        self.game_loop.input_sender()
    }

    /// Run one frame now, for hosts that drive their own clock
    pub fn tick(&mut self) -> Result<(), SessionError> {
        self.game_loop.tick(Instant::now()).map_err(|e| self.report(e))
    }

    /// Drive frames until `max_frames`, `shutdown` resolving, or a fatal error
    ///
    /// The session keeps running afterwards unless the error was fatal; call
    /// [`Session::stop`] to end it.
    pub async fn run<F>(&mut self, max_frames: Option<u64>, shutdown: F) -> Result<RunExit, SessionError>
    where
        F: Future<Output = ()>,
    {
        let exit = tokio::select! {
            exit = self.game_loop.run(max_frames) => exit,
            _ = shutdown => Ok(RunExit::Interrupted),
        };

        let exit = exit.map_err(|e| self.report(e))?;
        debug!(session = self.id, "Frame loop returned: {:?}", exit);
        Ok(exit)
    }
}
