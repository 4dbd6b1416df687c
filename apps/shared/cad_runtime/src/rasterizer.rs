//! Rasterizer seam
//!
//! The render loop hands every frame's batch to a [`Rasterizer`]. When the
//! worker produced nothing new, the previous batch is handed over again with
//! `reused` set.

use std::sync::{Arc, Mutex};

use cad_protocol::DrawBatch;

pub trait Rasterizer: Send {
    fn render(&mut self, batch: &DrawBatch, reused: bool) -> Result<(), Box<dyn std::error::Error>>;
}

/// One frame seen by a [`RecordingRasterizer`]
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFrame {
    pub batch: DrawBatch,
    pub reused: bool,
}

/// Frames recorded so far, shared with whoever created the rasterizer
pub type RenderLog = Arc<Mutex<Vec<RenderedFrame>>>;

/// Rasterizer that only records what it was asked to draw
#[derive(Default)]
pub struct RecordingRasterizer {
    log: RenderLog,
}

impl RecordingRasterizer {
    pub fn new() -> (Self, RenderLog) {
        let log = RenderLog::default();
        (Self { log: Arc::clone(&log) }, log)
    }
}

impl Rasterizer for RecordingRasterizer {
    fn render(&mut self, batch: &DrawBatch, reused: bool) -> Result<(), Box<dyn std::error::Error>> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RenderedFrame {
                batch: batch.clone(),
                reused,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_rasterizer_shares_log() {
        let (mut raster, log) = RecordingRasterizer::new();
        raster.render(&DrawBatch::new(1, 1, vec![]), false).unwrap();
        raster.render(&DrawBatch::new(1, 1, vec![]), true).unwrap();

        let frames = log.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert!(!frames[0].reused);
        assert!(frames[1].reused);
    }
}
