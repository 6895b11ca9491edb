//! Test doubles shared by the device-layer tests.

use std::sync::{Arc, Mutex};

use crate::can::{CanSink, Frame};
use crate::core::error::Result;

/// CAN sink that records every sent frame.
pub(crate) struct MockSink {
    frames: Mutex<Vec<Frame>>,
}

impl MockSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
        })
    }

    /// All frames sent so far.
    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    /// Number of frames sent so far.
    pub(crate) fn sent_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl CanSink for MockSink {
    fn send(&self, frame: &Frame) -> Result<()> {
        self.frames.lock().unwrap().push(*frame);
        Ok(())
    }
}
