use crate::foundation::core::Fps;
use crate::foundation::error::TimelineResult;
use crate::render::runtime::Layer;

/// Configuration provided to a [`FrameSink`] when a render pass starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkConfig {
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Output rate.
    pub fps: Fps,
}

/// Consumer of composited output frames.
///
/// Ordering contract: `push_frame` is called with strictly increasing indices
/// starting at zero, except that a failed index is offered again on retry.
/// Frames are pushed from the encode worker thread.
pub trait FrameSink: Send {
    /// A render pass starts.
    fn begin(&mut self, cfg: SinkConfig) -> TimelineResult<()>;
    /// Write frame `idx`.
    fn push_frame(&mut self, idx: u64, frame: &Layer) -> TimelineResult<()>;
    /// Drop every frame at or after `len`, undoing a cancelled pass.
    fn truncate(&mut self, len: u64) -> TimelineResult<()>;
    /// The pass finished.
    fn end(&mut self) -> TimelineResult<()>;
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    ended: bool,
    /// Frames in output order.
    pub frames: Vec<(u64, Layer)>,
}

impl InMemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Config from the latest `begin`.
    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg
    }

    /// Whether `end` was called since the latest `begin`.
    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> TimelineResult<()> {
        self.cfg = Some(cfg);
        self.ended = false;
        self.frames.clear();
        Ok(())
    }

    fn push_frame(&mut self, idx: u64, frame: &Layer) -> TimelineResult<()> {
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> TimelineResult<()> {
        self.frames.retain(|(idx, _)| *idx < len);
        Ok(())
    }

    fn end(&mut self) -> TimelineResult<()> {
        self.ended = true;
        Ok(())
    }
}
