use std::time::Duration;

use cad_protocol::ProtocolError;
use cad_schema::SchemaError;
use thiserror::Error;

use crate::game_loop::LoopState;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Could not allocate a shared region of {0} bytes")]
    Allocation(usize),

    #[error("Shared memory is not available: {0}")]
    Unavailable(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Error raised by a script engine while loading or running a frame
///
/// Mirrors what script runtimes report: an optional error class name, the
/// message, and the raw stack trace text if there is one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub name: Option<String>,
    pub message: String,
    pub stack: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: None,
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Recoverable error from one invocation of the frame callback
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("{message} (at {location})")]
    Script {
        message: String,
        location: String,
        stack: Option<String>,
    },

    #[error(
        "Blocking call inside the frame callback (at {location}): {message}. \
         The frame callback must return without waiting; poll input each frame \
         with isKeyDown/isKeyPressed/isMouseDown instead"
    )]
    BlockingCall { message: String, location: String },

    #[error("Frame callback panicked: {0}")]
    Panic(String),
}

impl FrameError {
    pub fn location(&self) -> Option<&str> {
        match self {
            FrameError::Script { location, .. } | FrameError::BlockingCall { location, .. } => {
                Some(location)
            }
            FrameError::Panic(_) => None,
        }
    }
}

/// Unrecoverable session failure, reported through the fatal-error hook
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    #[error("Worker did not become ready within {0:?}")]
    ReadyTimeout(Duration),

    #[error("Script engine failed to start: {0}")]
    EngineStart(String),

    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("Worker thread could not be spawned: {0}")]
    Spawn(String),

    #[error("Stopped after frame error: {0}")]
    FrameErrorPolicy(FrameError),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LoopState,
    },

    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error("Configuration error: {0}")]
    Config(#[from] SchemaError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}
