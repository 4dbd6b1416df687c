//! Worker-side runtime
//!
//! Runs on the worker thread: owns the script engine, waits for new input
//! on the channel, invokes the frame callback once per new input sequence
//! and publishes what it drew as one [`DrawBatch`].

mod canvas;
pub mod errors;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use std::collections::BTreeSet;

use cad_protocol::{DrawBatch, InputState, KeyCode, MouseButtons};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

pub use canvas::{Canvas, FrameContext};

use crate::channel::Channel;
use crate::error::{FrameError, ScriptError};

/// A script engine driven one frame at a time
///
/// Engines are created on the worker thread through an [`EngineFactory`], so
/// they do not need to be `Send`.
pub trait ScriptEngine {
    /// Short engine label used in logs ("js", "native")
    fn engine_name(&self) -> &str;

    /// Name of the loaded script
    fn script_name(&self) -> &str;

    /// Called once before the first frame
    fn start(&mut self) -> Result<(), ScriptError> {
        Ok(())
    }

    /// The per-frame callback. Must return without blocking.
    fn on_frame(&mut self, frame: &mut FrameContext<'_>) -> Result<(), ScriptError>;

    /// Called once after the last frame
    fn stop(&mut self) {}

    /// Give the engine a check it can poll to abort a runaway callback
    fn set_interrupt(&mut self, _should_abort: Arc<dyn Fn() -> bool + Send + Sync>) {}
}

/// Builds the engine on the worker thread
pub type EngineFactory = Box<dyn FnOnce() -> Result<Box<dyn ScriptEngine>, ScriptError> + Send>;

/// Closure-backed engine for native callbacks and tests
pub struct FnEngine<F> {
    name: String,
    callback: F,
}

impl<F> FnEngine<F>
where
    F: FnMut(&mut FrameContext<'_>) -> Result<(), ScriptError>,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

impl<F> ScriptEngine for FnEngine<F>
where
    F: FnMut(&mut FrameContext<'_>) -> Result<(), ScriptError>,
{
    fn engine_name(&self) -> &str {
        "native"
    }

    fn script_name(&self) -> &str {
        &self.name
    }

    fn on_frame(&mut self, frame: &mut FrameContext<'_>) -> Result<(), ScriptError> {
        (self.callback)(frame)
    }
}

/// Wrap a closure as an [`EngineFactory`]
pub fn fn_engine_factory<F>(name: impl Into<String>, callback: F) -> EngineFactory
where
    F: FnMut(&mut FrameContext<'_>) -> Result<(), ScriptError> + Send + 'static,
{
    let name = name.into();
    Box::new(move || Ok(Box::new(FnEngine::new(name, callback)) as Box<dyn ScriptEngine>))
}

/// Events the worker reports to the render thread
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Engine built and started; frames may flow
    Ready { engine: String, script: String },
    /// The callback failed for one frame
    FrameError { frame_number: u64, error: FrameError },
    /// Worker observed the stop request and shut the engine down
    StopAcknowledged,
    /// Worker cannot continue
    Crashed { reason: String },
}

/// How a frame invocation ended
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Batch with this sequence was published
    Published(u64),
    Failed(FrameError),
}

pub struct WorkerRuntime {
    engine: Box<dyn ScriptEngine>,
    channel: Arc<dyn Channel>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    idle_poll: Duration,
    canvas: Canvas,
    last_input_sequence: u64,
    next_batch_sequence: u64,
    last_consumed: Option<ConsumedEdges>,
}

/// Press edges carried by the last snapshot the callback saw
#[derive(Debug)]
struct ConsumedEdges {
    frame_number: u64,
    keys: BTreeSet<KeyCode>,
    buttons: MouseButtons,
}

impl WorkerRuntime {
    pub fn new(
        engine: Box<dyn ScriptEngine>,
        channel: Arc<dyn Channel>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        idle_poll: Duration,
    ) -> Self {
        Self {
            engine,
            channel,
            events,
            idle_poll,
            canvas: Canvas::new(),
            last_input_sequence: 0,
            next_batch_sequence: 0,
            last_consumed: None,
        }
    }

    fn should_exit(&self) -> bool {
        self.channel.is_stop_requested() || self.channel.is_closed()
    }

    /// Run the frame callback for one input snapshot
    ///
    /// On success the commands are published as one batch. On failure
    /// nothing is published, so the render thread keeps the previous batch.
    pub fn run_frame(&mut self, input: &InputState) -> FrameOutcome {
        self.canvas.reset();

        let engine = &mut self.engine;
        let canvas = &mut self.canvas;
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut frame = FrameContext::new(input, canvas);
            engine.on_frame(&mut frame)
        }));

        match result {
            Ok(Ok(())) => {
                self.next_batch_sequence += 1;
                let batch = DrawBatch::new(self.next_batch_sequence, input.frame_number, self.canvas.take());
                trace!(
                    "Publishing batch {} for frame {} ({} commands)",
                    batch.sequence,
                    batch.frame_number,
                    batch.len()
                );
                self.channel.write_draw_batch(&batch);
                FrameOutcome::Published(batch.sequence)
            }
            Ok(Err(script_error)) => FrameOutcome::Failed(errors::classify(script_error)),
            Err(payload) => FrameOutcome::Failed(FrameError::Panic(errors::panic_message(payload.as_ref()))),
        }
    }

    /// Check the channel once; run the callback if new input arrived
    ///
    /// Returns `false` once the worker should exit.
    pub fn poll_once(&mut self) -> bool {
        if self.should_exit() {
            return false;
        }

        let sequence = self.channel.input_sequence();
        if sequence == self.last_input_sequence {
            return true;
        }
        self.last_input_sequence = sequence;

        let mut input = self.channel.read_input();
        self.channel.acknowledge_input(input.frame_number);
        self.drop_consumed_edges(&mut input);
        if let FrameOutcome::Failed(error) = self.run_frame(&input) {
            warn!(
                engine = self.engine.engine_name(),
                script = self.engine.script_name(),
                "Frame {} failed: {}",
                input.frame_number,
                error
            );
            let _ = self.events.send(WorkerEvent::FrameError {
                frame_number: input.frame_number,
                error,
            });
        }
        true
    }

    /// Remove edges the previous callback already saw
    ///
    /// The render thread keeps an edge pending until it observes our ack. If
    /// it built `input` before seeing the ack for the last consumed frame,
    /// edges that frame carried may be repeated here.
    fn drop_consumed_edges(&mut self, input: &mut InputState) {
        let raw = ConsumedEdges {
            frame_number: input.frame_number,
            keys: input.keys_pressed.clone(),
            buttons: input.buttons_pressed,
        };
        let Some(last) = self.last_consumed.replace(raw) else {
            return;
        };
        if input.acked_frame >= last.frame_number {
            return;
        }
        input.keys_pressed.retain(|key| !last.keys.contains(key));
        for button in last.buttons.iter() {
            input.buttons_pressed.remove(button);
        }
        trace!(
            frame = input.frame_number,
            acked = input.acked_frame,
            "Dropped edges already delivered in frame {}",
            last.frame_number
        );
    }

    /// Worker main loop
    ///
    /// Invokes the callback only for input sequences it has not seen, so a
    /// slow callback simply picks up the newest input on its next turn.
    pub fn run(mut self) {
        while self.poll_once() {
            if self.channel.input_sequence() == self.last_input_sequence {
                thread::sleep(self.idle_poll);
            }
        }

        self.engine.stop();

        if self.channel.is_stop_requested() {
            debug!("Worker observed stop request");
            let _ = self.events.send(WorkerEvent::StopAcknowledged);
        } else {
            debug!("Worker exiting on closed channel");
        }
    }
}

/// Spawn the worker thread
///
/// The engine is built and started on the new thread. Start-up failures and
/// panics anywhere in the thread are reported as [`WorkerEvent::Crashed`].
pub fn spawn_worker(
    factory: EngineFactory,
    channel: Arc<dyn Channel>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    idle_poll: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("cad-worker".to_string()).spawn(move || {
        let crash_events = events.clone();
        let result = catch_unwind(AssertUnwindSafe(move || {
            let mut engine = match factory() {
                Ok(engine) => engine,
                Err(e) => {
                    let _ = events.send(WorkerEvent::Crashed {
                        reason: format!("engine could not be created: {}", e),
                    });
                    return;
                }
            };

            let watched = Arc::clone(&channel);
            engine.set_interrupt(Arc::new(move || watched.is_stop_requested() || watched.is_closed()));

            if let Err(e) = engine.start() {
                let _ = events.send(WorkerEvent::Crashed {
                    reason: format!("engine failed to start: {}", e),
                });
                return;
            }

            info!(
                engine = engine.engine_name(),
                script = engine.script_name(),
                "Worker ready"
            );
            let _ = events.send(WorkerEvent::Ready {
                engine: engine.engine_name().to_string(),
                script: engine.script_name().to_string(),
            });

            WorkerRuntime::new(engine, channel, events, idle_poll).run();
        }));

        if let Err(payload) = result {
            let reason = errors::panic_message(payload.as_ref());
            let _ = crash_events.send(WorkerEvent::Crashed {
                reason: format!("worker panicked: {}", reason),
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageChannel;
    use cad_protocol::{Color, DrawCommand, MouseButton};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn runtime(
        callback: impl FnMut(&mut FrameContext<'_>) -> Result<(), ScriptError> + 'static,
    ) -> (WorkerRuntime, Arc<dyn Channel>, mpsc::UnboundedReceiver<WorkerEvent>) {
        let channel: Arc<dyn Channel> = Arc::new(MessageChannel::new(64, 64 * 1024));
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Box::new(FnEngine::new("test", callback));
        let runtime = WorkerRuntime::new(engine, Arc::clone(&channel), tx, Duration::from_micros(100));
        (runtime, channel, rx)
    }

    #[test]
    fn test_callback_runs_once_per_input_sequence() {
        let mut calls = 0u32;
        let (mut rt, channel, _rx) = runtime(move |frame| {
            calls += 1;
            frame.canvas.fill_rect(calls as f32, 0.0, 1.0, 1.0);
            Ok(())
        });

        assert!(rt.poll_once());
        assert!(channel.read_draw_batch().is_none());

        channel.write_input(&InputState { frame_number: 1, ..Default::default() });
        assert!(rt.poll_once());
        assert!(rt.poll_once());

        let batch = channel.read_draw_batch().unwrap();
        assert_eq!(batch.sequence, 1);
        assert_eq!(batch.frame_number, 1);
        assert_eq!(batch.commands, vec![DrawCommand::FillRect { x: 1.0, y: 0.0, w: 1.0, h: 1.0 }]);
        assert!(channel.read_draw_batch().is_none());
    }

    #[test]
    fn test_consumed_input_is_acknowledged() {
        let (mut rt, channel, _rx) = runtime(|_| Ok(()));
        assert_eq!(channel.input_acknowledged(), 0);

        channel.write_input(&InputState { frame_number: 9, ..Default::default() });
        assert!(rt.poll_once());
        assert_eq!(channel.input_acknowledged(), 9);
    }

    #[test]
    fn test_repeated_edges_are_seen_once() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let (mut rt, channel, _rx) = runtime(move |frame| {
            log.borrow_mut().push((
                frame.frame_number(),
                frame.is_key_pressed("Space"),
                frame.is_mouse_pressed(MouseButton::Left),
            ));
            Ok(())
        });

        let mut first = InputState { frame_number: 1, ..Default::default() };
        first.keys_pressed.insert("Space".into());
        first.buttons_pressed.insert(MouseButton::Left);
        channel.write_input(&first);
        rt.poll_once();

        // Built before the ack for frame 1 was visible, so the edges repeat
        let mut second = InputState { frame_number: 2, acked_frame: 0, ..first.clone() };
        second.keys_pressed.insert("Enter".into());
        channel.write_input(&second);
        rt.poll_once();

        // The ack was visible here, so a pressed Space is a new tap
        let third = InputState { frame_number: 3, acked_frame: 2, ..first.clone() };
        channel.write_input(&third);
        rt.poll_once();

        assert_eq!(*seen.borrow(), vec![(1, true, true), (2, false, false), (3, true, true)]);
    }

    #[test]
    fn test_script_error_reported_and_nothing_published() {
        let (mut rt, channel, mut rx) = runtime(|_| {
            Err(ScriptError::new("x is not defined").with_stack("    at onFrame (game.js:4)"))
        });

        channel.write_input(&InputState { frame_number: 7, ..Default::default() });
        assert!(rt.poll_once());
        assert!(channel.read_draw_batch().is_none());

        match rx.try_recv().unwrap() {
            WorkerEvent::FrameError { frame_number, error } => {
                assert_eq!(frame_number, 7);
                assert_eq!(error.location(), Some("game.js:4"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_panic_is_contained() {
        let (mut rt, _channel, _rx) = runtime(|_| panic!("kaboom"));
        match rt.run_frame(&InputState::default()) {
            FrameOutcome::Failed(FrameError::Panic(message)) => assert_eq!(message, "kaboom"),
            other => panic!("unexpected outcome {other:?}"),
        }

        // The runtime still works after a panicking frame
        assert!(matches!(rt.run_frame(&InputState::default()), FrameOutcome::Failed(_)));
    }

    #[test]
    fn test_failed_frame_discards_partial_commands() {
        let mut fail = true;
        let (mut rt, channel, _rx) = runtime(move |frame| {
            frame.canvas.clear(Color::BLACK);
            if std::mem::replace(&mut fail, false) {
                return Err(ScriptError::new("first frame fails"));
            }
            Ok(())
        });

        rt.run_frame(&InputState::default());
        assert_eq!(rt.run_frame(&InputState::default()), FrameOutcome::Published(1));
        assert_eq!(channel.read_draw_batch().unwrap().len(), 1);
    }

    #[test]
    fn test_stop_request_ends_loop_with_ack() {
        let (rt, channel, mut rx) = runtime(|_| Ok(()));
        channel.request_stop();
        rt.run();
        assert_eq!(rx.try_recv().unwrap(), WorkerEvent::StopAcknowledged);
    }

    #[test]
    fn test_spawned_worker_reports_ready_then_stops() {
        let channel: Arc<dyn Channel> = Arc::new(MessageChannel::new(64, 64 * 1024));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_worker(
            fn_engine_factory("spawned", |_| Ok(())),
            Arc::clone(&channel),
            tx,
            Duration::from_micros(200),
        )
        .unwrap();

        assert!(matches!(rx.blocking_recv(), Some(WorkerEvent::Ready { .. })));
        channel.request_stop();
        handle.join().unwrap();
        assert_eq!(rx.blocking_recv(), Some(WorkerEvent::StopAcknowledged));
    }

    #[test]
    fn test_failing_factory_reports_crash() {
        let channel: Arc<dyn Channel> = Arc::new(MessageChannel::new(64, 64 * 1024));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let factory: EngineFactory = Box::new(|| Err(ScriptError::new("syntax error")));
        let handle = spawn_worker(factory, channel, tx, Duration::from_micros(200)).unwrap();
        handle.join().unwrap();

        match rx.blocking_recv() {
            Some(WorkerEvent::Crashed { reason }) => assert!(reason.contains("syntax error")),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
