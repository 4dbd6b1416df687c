//! Cross-thread channel between the render thread and the worker thread
//!
//! Two transports implement [`Channel`]:
//!
//! - [`SharedMemoryChannel`]: one region of atomic words with double-buffered
//!   slots and seqlock-validated copies. Nothing on either side ever waits.
//! - [`MessageChannel`]: copies each record into a self-contained message and
//!   keeps only the newest one per kind on read.
//!
//! [`ChannelFactory`] picks one at session creation. Everything above the
//! factory only sees `Arc<dyn Channel>`.
//!
//! Each direction has exactly one writer and one reader. Per-side scratch
//! state (encode buffers, last snapshot) sits behind a mutex that only that
//! side ever locks, so the two threads never contend on a lock.

mod factory;
mod message;
mod shared_memory;

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use cad_protocol::{DrawBatch, InputState};
use tracing::warn;

pub use factory::{ChannelFactory, ChannelSettings, SharedMemoryCapability};
pub use message::MessageChannel;
pub use shared_memory::SharedMemoryChannel;

/// Transport chosen for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelMode {
    SharedMemory,
    Message,
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelMode::SharedMemory => write!(f, "shared-memory"),
            ChannelMode::Message => write!(f, "message"),
        }
    }
}

/// Bidirectional, non-blocking record exchange
///
/// Input flows render thread -> worker, draw batches flow worker -> render
/// thread. A read never observes a half-written record: it returns either the
/// newest complete one or the previous complete one.
pub trait Channel: Send + Sync {
    fn mode(&self) -> ChannelMode;

    /// Publish a new input snapshot (render thread)
    fn write_input(&self, state: &InputState);

    /// Latest complete input snapshot (worker)
    ///
    /// Returns the previously read snapshot when nothing newer is readable.
    fn read_input(&self) -> InputState;

    /// Number of input snapshots published so far
    fn input_sequence(&self) -> u64;

    /// Record that the worker has read the snapshot for `frame_number`
    ///
    /// Never moves backwards.
    fn acknowledge_input(&self, frame_number: u64);

    /// Newest frame number the worker has acknowledged (render thread)
    fn input_acknowledged(&self) -> u64;

    /// Publish one frame's draw output (worker)
    ///
    /// `batch.sequence` must increase with every call. Commands beyond the
    /// per-frame command cap or byte capacity are tail-dropped and counted.
    fn write_draw_batch(&self, batch: &DrawBatch);

    /// Newest batch published since the previous call (render thread)
    ///
    /// `None` when no new batch was published, so callers never process the
    /// same frame twice.
    fn read_draw_batch(&self) -> Option<DrawBatch>;

    /// Sequence of the newest published draw batch
    fn draw_sequence(&self) -> u64;

    /// Ask the worker to stop at its next checkpoint. Idempotent.
    fn request_stop(&self);

    fn is_stop_requested(&self) -> bool;

    /// Release the channel; later writes are ignored
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Total draw commands dropped for overflow
    fn dropped_commands(&self) -> u64;
}

/// Lock a side-local mutex, recovering from poisoning
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Rate-limited overflow warning shared by both transports
#[derive(Debug)]
pub(crate) struct OverflowLog {
    interval: Duration,
    last_logged: Option<Instant>,
    suppressed: u64,
}

impl OverflowLog {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_logged: None,
            suppressed: 0,
        }
    }

    pub(crate) fn record(&mut self, mode: ChannelMode, sequence: u64, dropped: usize, kept: usize) {
        let now = Instant::now();
        let due = self
            .last_logged
            .is_none_or(|last| now.duration_since(last) >= self.interval);

        if due {
            warn!(
                "Draw batch {} over capacity on {} channel: kept {} commands, dropped {} ({} earlier overflows not logged)",
                sequence, mode, kept, dropped, self.suppressed
            );
            self.last_logged = Some(now);
            self.suppressed = 0;
        } else {
            self.suppressed += 1;
        }
    }
}

impl Default for OverflowLog {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_log_rate_limits() {
        let mut log = OverflowLog::new(Duration::from_secs(3600));
        log.record(ChannelMode::Message, 1, 5, 10);
        assert!(log.last_logged.is_some());
        log.record(ChannelMode::Message, 2, 5, 10);
        log.record(ChannelMode::Message, 3, 5, 10);
        assert_eq!(log.suppressed, 2);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ChannelMode::SharedMemory.to_string(), "shared-memory");
        assert_eq!(ChannelMode::Message.to_string(), "message");
    }
}
