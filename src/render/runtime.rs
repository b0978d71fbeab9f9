//! Collaborator contracts the renderer drives.
//!
//! The engine never interprets pixels, decodes clips or runs effect code. It
//! only tells these collaborators what to do and when.

use smallvec::SmallVec;

use crate::event::model::ParamValue;
use crate::foundation::core::Timecode;
use crate::foundation::error::TimelineResult;
use crate::foundation::ids::{ClipId, FilterId};

/// An RGBA8 image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major RGBA8 bytes, `width * height * 4` long.
    pub data: Vec<u8>,
}

impl Layer {
    /// Transparent black layer.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Whether every byte is zero.
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

/// Opaque handle to one effect instance owned by an [`EffectRuntime`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceHandle(pub u64);

/// Instances created for one filter init. Compound filters expand to several
/// chained instances; simple filters to one.
pub type InstanceChain = SmallVec<[InstanceHandle; 2]>;

/// One instance of the filter map being applied to a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveEffect {
    /// Runtime handle.
    pub instance: InstanceHandle,
    /// Filter the instance belongs to.
    pub filter: FilterId,
    /// Input tracks, in channel order.
    pub in_tracks: SmallVec<[i32; 2]>,
    /// Output tracks, in channel order.
    pub out_tracks: SmallVec<[i32; 2]>,
}

/// Frame and clip store.
pub trait FrameSource {
    /// Pixels of `frame` of `clip`, shown on `track` at output time `tc`.
    fn pull_frame(
        &mut self,
        track: usize,
        clip: ClipId,
        frame: i64,
        tc: Timecode,
    ) -> TimelineResult<Layer>;

    /// Clip that actually supplies `clip`'s frames, when it is a proxy.
    fn primary_source(&self, clip: ClipId) -> ClipId {
        clip
    }
}

/// Effect runtime.
pub trait EffectRuntime {
    /// Create the instance chain for `filter`.
    fn instantiate(&mut self, filter: FilterId) -> TimelineResult<InstanceChain>;

    /// Prepare an instance for processing.
    fn init(&mut self, instance: InstanceHandle) -> TimelineResult<()>;

    /// Tear an instance down. The handle is not used again.
    fn deinit(&mut self, instance: InstanceHandle) -> TimelineResult<()>;

    /// Set parameter `index` of `instance`.
    fn set_parameter_value(
        &mut self,
        instance: InstanceHandle,
        index: usize,
        value: &ParamValue,
    ) -> TimelineResult<()>;

    /// Current value of parameter `index` of `instance`.
    fn get_parameter_value(&self, instance: InstanceHandle, index: usize) -> Option<ParamValue>;

    /// Composite `layers` (indexed by track) through `active`, in order.
    fn apply(
        &mut self,
        layers: &[Layer],
        active: &[ActiveEffect],
        tc: Timecode,
    ) -> TimelineResult<Layer>;
}

/// One batched audio chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSegment {
    /// Playing tracks; negative tracks are backing audio.
    pub tracks: Vec<i32>,
    /// Clip feeding each track.
    pub clips: Vec<ClipId>,
    /// Clip being rendered into, if any.
    pub dest_clip: Option<ClipId>,
    /// Playback velocity of each track.
    pub velocities: Vec<f64>,
    /// Seek position of each track at `from_tc`, seconds.
    pub seeks: Vec<f64>,
    /// Start of the chunk.
    pub from_tc: Timecode,
    /// End of the chunk (exclusive).
    pub to_tc: Timecode,
    /// Mix volume of each track.
    pub volumes: Vec<f64>,
    /// Output sample rate, Hz.
    pub sample_rate: u32,
}

impl AudioSegment {
    /// Chunk length in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.to_tc.since(self.from_tc) as f64 / crate::foundation::core::TICKS_PER_SECOND as f64
    }
}

/// Audio mixer/writer.
pub trait AudioRenderer {
    /// Mix and write one chunk.
    fn render_audio_segment(&mut self, segment: &AudioSegment) -> TimelineResult<()>;

    /// Discard everything written at or after `tc`.
    fn truncate(&mut self, tc: Timecode) -> TimelineResult<()> {
        let _ = tc;
        Ok(())
    }
}
