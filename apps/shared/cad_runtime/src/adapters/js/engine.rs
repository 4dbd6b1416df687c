use std::path::{Path, PathBuf};
use std::sync::Arc;

use rquickjs::{Context, Ctx, Function, Module, Object, Runtime, Value};
use tracing::{debug, info};

use super::bindings::{self, FrameState, SharedFrameState};
use crate::channel::lock;
use crate::error::ScriptError;
use crate::worker::{EngineFactory, FrameContext, ScriptEngine};

const PRELUDE: &str = include_str!("prelude.js");

/// Global slot holding the resolved frame callback
const ON_FRAME_GLOBAL: &str = "__cad_on_frame";

/// Name of the exported (or global) frame callback
pub const ON_FRAME: &str = "onFrame";

/// QuickJS engine running one script
///
/// The script is evaluated as an ES module and must export `onFrame`; a
/// plain global `onFrame` function is accepted as well.
pub struct JsEngine {
    script_name: String,
    source: String,
    runtime: Runtime,
    context: Context,
    state: SharedFrameState,
}

impl JsEngine {
    pub fn from_source(script_name: impl Into<String>, source: impl Into<String>) -> Result<Self, ScriptError> {
        let runtime = Runtime::new().map_err(|e| ScriptError::new(format!("QuickJS runtime: {}", e)))?;
        let context = Context::full(&runtime).map_err(|e| ScriptError::new(format!("QuickJS context: {}", e)))?;

        Ok(Self {
            script_name: script_name.into(),
            source: source.into(),
            runtime,
            context,
            state: SharedFrameState::default(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ScriptError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| ScriptError::new(format!("Cannot read script '{}': {}", path.display(), e)))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_source(name, source)
    }
}

/// Engine factory loading `path` on the worker thread
pub fn js_engine_factory(path: PathBuf) -> EngineFactory {
    Box::new(move || Ok(Box::new(JsEngine::from_file(&path)?) as Box<dyn ScriptEngine>))
}

/// Convert a failed call into a [`ScriptError`], consuming the pending exception
fn script_error(ctx: &Ctx<'_>, error: rquickjs::Error) -> ScriptError {
    if !error.is_exception() {
        return ScriptError::new(error.to_string());
    }

    let exception: Value = ctx.catch();
    if let Some(obj) = exception.as_object() {
        let get = |key: &str| {
            obj.get::<_, Option<String>>(key)
                .ok()
                .flatten()
                .filter(|s| !s.is_empty())
        };

        let mut script_error = ScriptError::new(get("message").unwrap_or_default());
        if let Some(name) = get("name") {
            script_error = script_error.with_name(name);
        }
        if let Some(stack) = get("stack") {
            script_error = script_error.with_stack(stack);
        }
        return script_error;
    }

    if let Some(s) = exception.as_string() {
        if let Ok(message) = s.to_string() {
            return ScriptError::new(message);
        }
    }

    ScriptError::new("Unknown JavaScript error")
}

fn load_script(ctx: &Ctx<'_>, state: &SharedFrameState, name: &str, source: &str) -> rquickjs::Result<()> {
    bindings::setup_native_api(ctx, state, name)?;
    ctx.eval::<(), _>(PRELUDE)?;

    let (module, promise) = Module::declare(ctx.clone(), name, source)?.eval()?;
    promise.finish::<()>()?;

    let namespace: Object = module.namespace()?;
    let on_frame = match namespace.get::<_, Option<Function>>(ON_FRAME)? {
        Some(f) => f,
        None => ctx
            .globals()
            .get::<_, Option<Function>>(ON_FRAME)?
            .ok_or_else(|| bindings::throw_error(ctx, &format!("{} must export an {} function", name, ON_FRAME)))?,
    };
    ctx.globals().set(ON_FRAME_GLOBAL, on_frame)?;
    Ok(())
}

impl ScriptEngine for JsEngine {
    fn engine_name(&self) -> &str {
        "js"
    }

    fn script_name(&self) -> &str {
        &self.script_name
    }

    fn start(&mut self) -> Result<(), ScriptError> {
        debug!("Evaluating {} ({} bytes)", self.script_name, self.source.len());
        let state = Arc::clone(&self.state);
        self.context.with(|ctx| {
            load_script(&ctx, &state, &self.script_name, &self.source).map_err(|e| script_error(&ctx, e))
        })?;
        info!(engine = "js", script = self.script_name.as_str(), "Script loaded");
        Ok(())
    }

    fn on_frame(&mut self, frame: &mut FrameContext<'_>) -> Result<(), ScriptError> {
        {
            let mut state = lock(&self.state);
            state.input = frame.input().clone();
            state.commands.clear();
        }

        let result = self.context.with(|ctx| {
            let on_frame: Function = ctx.globals().get(ON_FRAME_GLOBAL).map_err(|e| script_error(&ctx, e))?;
            on_frame.call::<(), ()>(()).map_err(|e| script_error(&ctx, e))
        });

        // Settle promises the callback queued; they cannot block the frame.
        while self.runtime.is_job_pending() {
            if self.runtime.execute_pending_job().is_err() {
                break;
            }
        }

        let FrameState { commands, .. } = std::mem::take(&mut *lock(&self.state));
        result?;
        for command in commands {
            frame.canvas.push(command);
        }
        Ok(())
    }

    fn set_interrupt(&mut self, should_abort: Arc<dyn Fn() -> bool + Send + Sync>) {
        self.runtime
            .set_interrupt_handler(Some(Box::new(move || should_abort())));
    }
}
