//! Render-thread game loop controller
//!
//! The controller owns the channel, the worker thread handle and the
//! rasterizer. Each tick of the frame clock it publishes the current input
//! snapshot and renders whatever batch the worker last completed. It never
//! waits on the worker while running; the only waits are the bounded ready
//! handshake in [`GameLoop::start`] and the bounded stop acknowledgement in
//! [`GameLoop::stop`].

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cad_protocol::{DrawBatch, TimingInfo};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error, info, trace, warn};

use crate::channel::{Channel, ChannelFactory, ChannelMode, ChannelSettings};
use crate::config::{FrameErrorPolicy, SessionConfig};
use crate::error::{FatalError, FrameError, SessionError};
use crate::input::{InputCapture, InputEvent};
use crate::rasterizer::Rasterizer;
use crate::worker::{EngineFactory, WorkerEvent, spawn_worker};

/// How often frame statistics are written to the log
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Terminated,
}

impl LoopState {
    /// Frame clock ticks have an effect in this state
    pub fn is_active(self) -> bool {
        matches!(self, LoopState::Running | LoopState::Paused)
    }
}

/// Fixed-period frame deadlines with drift correction
///
/// Deadlines advance by exactly one period while the loop keeps up. When the
/// render thread was starved for more than a full period the schedule
/// restarts from the current instant instead of replaying missed frames.
#[derive(Debug, Clone)]
pub struct FramePacer {
    period: Duration,
    next_deadline: Instant,
}

impl FramePacer {
    pub fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_deadline: now + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Schedule the next deadline after a tick that ran at `now`
    ///
    /// Returns the number of whole periods that were skipped.
    pub fn advance(&mut self, now: Instant) -> u64 {
        let lateness = now.saturating_duration_since(self.next_deadline);
        if lateness > self.period {
            let missed = (lateness.as_nanos() / self.period.as_nanos().max(1)) as u64;
            self.next_deadline = now + self.period;
            missed
        } else {
            self.next_deadline += self.period;
            0
        }
    }

    /// Restart the schedule one period from `now`
    pub fn reset(&mut self, now: Instant) {
        self.next_deadline = now + self.period;
    }
}

/// Counters describing how the render loop has been doing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Frames handed to the rasterizer, new or re-used
    pub frames_rendered: u64,
    /// Frames that re-rendered the previous batch
    pub frames_reused: u64,
    /// Ticks that ran more than one period behind schedule
    pub late_frames: u64,
    /// Periods skipped by drift correction
    pub missed_periods: u64,
    pub frame_errors: u64,
    pub dropped_commands: u64,
    /// Rendered frames per second over the last complete one-second window
    pub fps: f64,
}

/// One-second window for the FPS figure
#[derive(Debug, Default)]
struct FpsWindow {
    started: Option<Instant>,
    frames: u64,
}

impl FpsWindow {
    /// Count one frame; returns the rate when a window closes
    fn record(&mut self, now: Instant) -> Option<f64> {
        let started = *self.started.get_or_insert(now);
        self.frames += 1;

        let span = now.saturating_duration_since(started);
        if span < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frames as f64 / span.as_secs_f64();
        self.started = Some(now);
        self.frames = 0;
        Some(fps)
    }

    fn reset(&mut self) {
        self.started = None;
        self.frames = 0;
    }
}

/// How [`GameLoop::stop`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker acknowledged the stop request in time
    Acknowledged,
    /// The worker was detached after the stop timeout
    Terminated,
    /// Nothing was running
    AlreadyTerminated,
}

/// Why [`GameLoop::run`] returned without a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The requested number of frames was rendered
    FrameLimit,
    /// The loop left the running states
    Stopped,
    /// The host asked the loop to end
    Interrupted,
}

pub struct GameLoop {
    config: SessionConfig,
    state: LoopState,
    engine_factory: Option<EngineFactory>,
    channel_factory: ChannelFactory,
    rasterizer: Box<dyn Rasterizer>,

    channel: Option<Arc<dyn Channel>>,
    mode: Option<ChannelMode>,
    worker: Option<JoinHandle<()>>,
    worker_events: Option<mpsc::UnboundedReceiver<WorkerEvent>>,

    input_tx: mpsc::UnboundedSender<InputEvent>,
    input_rx: mpsc::UnboundedReceiver<InputEvent>,
    capture: InputCapture,

    last_batch: Option<DrawBatch>,
    last_frame_error: Option<FrameError>,
    frame_number: u64,
    ticks: u64,
    timing: TimingInfo,
    last_tick: Option<Instant>,
    pacer: FramePacer,
    stats: FrameStats,
    fps_window: FpsWindow,
    stats_logged_at: Option<Instant>,
}

impl GameLoop {
    pub fn new(config: SessionConfig, engine: EngineFactory, rasterizer: Box<dyn Rasterizer>) -> Self {
        let channel_factory = ChannelFactory::new(ChannelSettings::from(&config));
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let pacer = FramePacer::new(config.frame_period(), Instant::now());

        Self {
            config,
            state: LoopState::Idle,
            engine_factory: Some(engine),
            channel_factory,
            rasterizer,
            channel: None,
            mode: None,
            worker: None,
            worker_events: None,
            input_tx,
            input_rx,
            capture: InputCapture::new(),
            last_batch: None,
            last_frame_error: None,
            frame_number: 0,
            ticks: 0,
            timing: TimingInfo::default(),
            last_tick: None,
            pacer,
            stats: FrameStats::default(),
            fps_window: FpsWindow::default(),
            stats_logged_at: None,
        }
    }

    /// Replace the channel factory, e.g. to force a transport
    pub fn with_channel_factory(mut self, factory: ChannelFactory) -> Self {
        self.channel_factory = factory;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Transport in use, once started
    pub fn mode(&self) -> Option<ChannelMode> {
        self.mode
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> FrameStats {
        let mut stats = self.stats.clone();
        if let Some(channel) = &self.channel {
            stats.dropped_commands = channel.dropped_commands();
        }
        stats
    }

    /// Most recent recoverable error reported by the worker
    pub fn last_frame_error(&self) -> Option<&FrameError> {
        self.last_frame_error.as_ref()
    }

    /// Sender for device events; events are folded in on the next tick
    pub fn input_sender(&self) -> mpsc::UnboundedSender<InputEvent> {
        self.input_tx.clone()
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state,
        }
    }

    /// Build the channel, spawn the worker and wait for its ready handshake
    pub async fn start(&mut self) -> Result<ChannelMode, SessionError> {
        if self.state != LoopState::Idle {
            return Err(self.invalid("start"));
        }
        let Some(engine_factory) = self.engine_factory.take() else {
            return Err(self.invalid("start"));
        };

        self.state = LoopState::Starting;
        let (channel, mode) = self.channel_factory.create();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.channel = Some(Arc::clone(&channel));
        self.mode = Some(mode);

        let handle = match spawn_worker(
            engine_factory,
            Arc::clone(&channel),
            events_tx,
            self.config.worker_idle_poll(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to spawn worker thread: {}", e);
                self.terminate();
                return Err(FatalError::Spawn(e.to_string()).into());
            }
        };
        self.worker = Some(handle);
        self.worker_events = Some(events_rx);

        let ready_timeout = self.config.ready_timeout();
        let handshake = match self.worker_events.as_mut() {
            Some(events) => tokio::time::timeout(ready_timeout, Self::await_ready(events)).await,
            None => Ok(Err(FatalError::WorkerCrashed("worker events unavailable".to_string()))),
        };

        let failure = match handshake {
            Ok(Ok(())) => None,
            Ok(Err(fatal)) => Some(fatal),
            Err(_) => Some(FatalError::ReadyTimeout(ready_timeout)),
        };
        if let Some(fatal) = failure {
            error!("Session start failed: {}", fatal);
            self.terminate();
            return Err(fatal.into());
        }

        let now = Instant::now();
        self.pacer.reset(now);
        self.state = LoopState::Running;
        info!("Game loop running at {} fps on {} channel", self.config.target_fps, mode);
        Ok(mode)
    }

    async fn await_ready(events: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Result<(), FatalError> {
        loop {
            match events.recv().await {
                Some(WorkerEvent::Ready { engine, script }) => {
                    debug!("Worker ready: {}::{}", engine, script);
                    return Ok(());
                }
                Some(WorkerEvent::Crashed { reason }) => return Err(FatalError::EngineStart(reason)),
                Some(other) => trace!("Ignoring worker event before ready: {:?}", other),
                None => {
                    return Err(FatalError::WorkerCrashed(
                        "worker exited before becoming ready".to_string(),
                    ));
                }
            }
        }
    }

    /// Handle events the worker sent since the previous tick
    fn drain_worker_events(&mut self) -> Result<(), FatalError> {
        let Some(events) = self.worker_events.as_mut() else {
            return Ok(());
        };

        loop {
            match events.try_recv() {
                Ok(WorkerEvent::FrameError { frame_number, error }) => {
                    self.stats.frame_errors += 1;
                    debug!("Frame {} reported an error: {}", frame_number, error);
                    self.last_frame_error = Some(error.clone());
                    if self.config.on_frame_error == FrameErrorPolicy::Stop {
                        return Err(FatalError::FrameErrorPolicy(error));
                    }
                }
                Ok(WorkerEvent::Crashed { reason }) => return Err(FatalError::WorkerCrashed(reason)),
                Ok(WorkerEvent::StopAcknowledged) => {
                    return Err(FatalError::WorkerCrashed(
                        "worker stopped without being asked".to_string(),
                    ));
                }
                Ok(WorkerEvent::Ready { .. }) => {}
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(FatalError::WorkerCrashed("worker thread exited".to_string()));
                }
            }
        }
    }

    /// Run one frame of the render loop at `now`
    ///
    /// Fatal errors terminate the loop before they are returned.
    pub fn tick(&mut self, now: Instant) -> Result<(), SessionError> {
        if !self.state.is_active() {
            return Err(self.invalid("tick"));
        }

        if let Err(fatal) = self.drain_worker_events() {
            error!("Fatal worker error: {}", fatal);
            self.terminate();
            return Err(fatal.into());
        }

        while let Ok(event) = self.input_rx.try_recv() {
            self.capture.apply(event);
        }

        let missed = self.pacer.advance(now);
        if missed > 0 {
            self.stats.late_frames += 1;
            self.stats.missed_periods += missed;
            trace!("Render loop {} periods behind, resynchronizing", missed);
        }

        let delta = self
            .last_tick
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .unwrap_or(0.0);
        self.last_tick = Some(now);

        let mut reused = true;
        if self.state == LoopState::Running {
            // Paused ticks only move last_tick, so paused time never reaches elapsed.
            self.timing = self.timing.advance(delta);
            if let Some(channel) = &self.channel {
                self.frame_number += 1;
                let snapshot = self
                    .capture
                    .snapshot(self.frame_number, self.timing, channel.input_acknowledged());
                channel.write_input(&snapshot);

                if let Some(batch) = channel.read_draw_batch() {
                    self.last_batch = Some(batch);
                    reused = false;
                }
            }
        }

        self.ticks += 1;
        if let Some(batch) = &self.last_batch {
            if let Err(e) = self.rasterizer.render(batch, reused) {
                warn!("Rasterizer failed on batch {}: {}", batch.sequence, e);
            }
            self.stats.frames_rendered += 1;
            if reused {
                self.stats.frames_reused += 1;
            }
            if let Some(fps) = self.fps_window.record(now) {
                self.stats.fps = fps;
            }
        }

        self.maybe_log_stats(now);
        Ok(())
    }

    fn maybe_log_stats(&mut self, now: Instant) {
        let logged_at = *self.stats_logged_at.get_or_insert(now);
        if now.saturating_duration_since(logged_at) < STATS_LOG_INTERVAL {
            return;
        }
        self.stats_logged_at = Some(now);
        let stats = self.stats();
        debug!(
            "Frame stats: {:.1} fps, {} rendered, {} re-used, {} late, {} errors, {} commands dropped",
            stats.fps,
            stats.frames_rendered,
            stats.frames_reused,
            stats.late_frames,
            stats.frame_errors,
            stats.dropped_commands
        );
    }

    /// Suspend input publishing; the last batch keeps being rendered
    pub fn pause(&mut self) -> Result<(), SessionError> {
        if self.state != LoopState::Running {
            return Err(self.invalid("pause"));
        }
        self.state = LoopState::Paused;
        info!("Game loop paused at frame {}", self.frame_number);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.state != LoopState::Paused {
            return Err(self.invalid("resume"));
        }
        let now = Instant::now();
        // Edges that arrived while paused belong to no frame.
        self.capture.clear_pressed();
        self.pacer.reset(now);
        self.fps_window.reset();
        // Paused time is not game time.
        self.last_tick = Some(now);
        self.state = LoopState::Running;
        info!("Game loop resumed at frame {}", self.frame_number);
        Ok(())
    }

    /// Ask the worker to stop, then terminate
    ///
    /// Waits at most the configured stop timeout for the acknowledgement.
    pub async fn stop(&mut self) -> StopOutcome {
        match self.state {
            LoopState::Terminated => return StopOutcome::AlreadyTerminated,
            LoopState::Idle => {
                self.terminate();
                return StopOutcome::AlreadyTerminated;
            }
            _ => {}
        }

        self.state = LoopState::Stopping;
        if let Some(channel) = &self.channel {
            channel.request_stop();
        }

        let stop_timeout = self.config.stop_timeout();
        let acknowledged = match self.worker_events.as_mut() {
            Some(events) => tokio::time::timeout(stop_timeout, Self::await_stop(events))
                .await
                .unwrap_or(false),
            None => false,
        };

        if acknowledged {
            info!("Worker acknowledged stop");
        } else {
            warn!("Worker did not acknowledge stop within {:?}, terminating", stop_timeout);
        }
        self.terminate();

        if acknowledged {
            StopOutcome::Acknowledged
        } else {
            StopOutcome::Terminated
        }
    }

    async fn await_stop(events: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> bool {
        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::StopAcknowledged => return true,
                WorkerEvent::Crashed { reason } => {
                    warn!("Worker crashed while stopping: {}", reason);
                    return false;
                }
                _ => {}
            }
        }
        false
    }

    /// Release the channel and the worker unconditionally. Idempotent.
    ///
    /// A worker that is still inside its callback is detached; it observes the
    /// closed channel at its next checkpoint.
    pub fn terminate(&mut self) {
        if self.state == LoopState::Terminated {
            return;
        }

        if let Some(channel) = self.channel.take() {
            channel.request_stop();
            channel.close();
            self.stats.dropped_commands = channel.dropped_commands();
        }

        if let Some(handle) = self.worker.take() {
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("Worker thread ended with a panic");
                }
            } else {
                debug!("Detaching worker thread");
            }
        }

        self.worker_events = None;
        self.engine_factory = None;
        self.state = LoopState::Terminated;
        info!("Game loop terminated after {} frames", self.frame_number);
    }

    /// Drive the loop from the frame clock
    ///
    /// Returns after `max_frames` ticks, when the loop leaves the running
    /// states, or with the fatal error that terminated it.
    pub async fn run(&mut self, max_frames: Option<u64>) -> Result<RunExit, SessionError> {
        let limit = max_frames.map(|n| self.ticks + n);
        loop {
            if !self.state.is_active() {
                return Ok(RunExit::Stopped);
            }
            if limit.is_some_and(|limit| self.ticks >= limit) {
                return Ok(RunExit::FrameLimit);
            }

            tokio::time::sleep_until(self.pacer.deadline().into()).await;
            self.tick(Instant::now())?;
        }
    }
}

impl Drop for GameLoop {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rasterizer::RecordingRasterizer;
    use crate::worker::fn_engine_factory;

    const PERIOD: Duration = Duration::from_millis(16);

    #[test]
    fn test_pacer_advances_by_period() {
        let t0 = Instant::now();
        let mut pacer = FramePacer::new(PERIOD, t0);
        assert_eq!(pacer.deadline(), t0 + PERIOD);

        // Slightly late is still on schedule
        assert_eq!(pacer.advance(t0 + PERIOD + Duration::from_millis(3)), 0);
        assert_eq!(pacer.deadline(), t0 + 2 * PERIOD);
    }

    #[test]
    fn test_pacer_does_not_replay_missed_periods() {
        let t0 = Instant::now();
        let mut pacer = FramePacer::new(PERIOD, t0);

        let now = t0 + Duration::from_millis(100);
        assert_eq!(pacer.advance(now), 5);
        assert_eq!(pacer.deadline(), now + PERIOD);
        assert!(pacer.deadline() > now);
    }

    #[test]
    fn test_fps_window() {
        let t0 = Instant::now();
        let mut window = FpsWindow::default();
        for i in 0..60 {
            assert_eq!(window.record(t0 + Duration::from_millis(i * 10)), None);
        }
        let fps = window.record(t0 + Duration::from_secs(1)).unwrap();
        assert!((fps - 61.0).abs() < 0.01);
    }

    fn idle_loop() -> GameLoop {
        let (raster, _log) = RecordingRasterizer::new();
        GameLoop::new(
            SessionConfig::default(),
            fn_engine_factory("idle", |_| Ok(())),
            Box::new(raster),
        )
    }

    #[test]
    fn test_invalid_transitions() {
        let mut game_loop = idle_loop();
        assert!(matches!(
            game_loop.pause(),
            Err(SessionError::InvalidState { operation: "pause", state: LoopState::Idle })
        ));
        assert!(game_loop.resume().is_err());
        assert!(game_loop.tick(Instant::now()).is_err());
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let mut game_loop = idle_loop();
        game_loop.terminate();
        game_loop.terminate();
        assert_eq!(game_loop.state(), LoopState::Terminated);
        assert!(game_loop.mode().is_none());
    }

    #[tokio::test]
    async fn test_paused_ticks_do_not_advance_time() {
        let (raster, _log) = RecordingRasterizer::new();
        let mut game_loop = GameLoop::new(
            SessionConfig::default(),
            fn_engine_factory("clock", |_| Ok(())),
            Box::new(raster),
        );
        game_loop.start().await.unwrap();

        let t0 = Instant::now();
        let step = Duration::from_millis(100);
        for k in 0..10 {
            game_loop.tick(t0 + step * k).unwrap();
        }
        let running_elapsed = game_loop.timing.elapsed;
        assert!((running_elapsed - 0.9).abs() < 1e-6);

        game_loop.pause().unwrap();
        let mut now = t0 + step * 10;
        for _ in 0..60 {
            game_loop.tick(now).unwrap();
            now += step;
        }
        assert_eq!(game_loop.timing.elapsed, running_elapsed);
        assert_eq!(game_loop.frame_number, 10);

        game_loop.resume().unwrap();
        game_loop.tick(Instant::now()).unwrap();
        assert!(game_loop.timing.elapsed - running_elapsed < 1.0);
        assert_eq!(game_loop.frame_number, 11);

        game_loop.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut game_loop = idle_loop();
        assert_eq!(game_loop.stop().await, StopOutcome::AlreadyTerminated);
        assert_eq!(game_loop.state(), LoopState::Terminated);
    }
}
