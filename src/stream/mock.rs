use crate::error::AppError;
use crate::occupancy::Detection;
use crate::stream::{FrameInput, FrameSource};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Frame source that replays scripted detections, for tests and demos.
#[derive(Debug)]
pub struct ScriptedSource {
    frames: VecDeque<Vec<Detection>>,
    repeat: Option<Vec<Detection>>,
    image: Vec<u8>,
    fail_after: Option<u64>,
    next_index: u64,
    pulled: Arc<AtomicU64>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedSource {
    /// Finite source yielding one frame per entry, then end-of-stream.
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames: frames.into(),
            repeat: None,
            image: Vec::new(),
            fail_after: None,
            next_index: 0,
            pulled: Arc::new(AtomicU64::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Source that never ends, yielding `frame` every time.
    pub fn infinite(frame: Vec<Detection>) -> Self {
        let mut source = Self::new(Vec::new());
        source.repeat = Some(frame);
        source
    }

    /// Report an error instead of frame number `frames` (zero-based).
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = image;
        self
    }

    /// Number of frames handed out so far.
    pub fn pull_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.pulled)
    }

    /// Number of `release` calls so far.
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<FrameInput>, AppError> {
        if self.fail_after == Some(self.next_index) {
            return Err(AppError::Source("mock source failed".to_string()));
        }

        let detections = match self.frames.pop_front() {
            Some(detections) => detections,
            None => match &self.repeat {
                Some(detections) => detections.clone(),
                None => return Ok(None),
            },
        };

        let index = self.next_index;
        self.next_index += 1;
        self.pulled.fetch_add(1, Ordering::SeqCst);
        Ok(Some(FrameInput {
            index,
            image: self.image.clone(),
            detections,
        }))
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
