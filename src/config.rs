//! Engine configuration, loadable from JSON.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::foundation::core::{Fps, Timecode};
use crate::foundation::error::{TimelineError, TimelineResult};

/// Options controlling one [`crate::RenderSession`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSessionOpts {
    /// Output frame rate.
    pub fps: Fps,
    /// Width of blank layers produced for empty tracks.
    pub width: u32,
    /// Height of blank layers produced for empty tracks.
    pub height: u32,
    /// Emit video frames.
    pub render_video: bool,
    /// Emit batched audio blocks.
    pub render_audio: bool,
    /// Treat every track as fully visible when mixing audio.
    pub bleedthrough: bool,
    /// Output audio sample rate, Hz.
    pub audio_sample_rate: u32,
    /// Upper bound on the span of one batched audio block.
    pub max_audio_block: Timecode,
}

impl Default for RenderSessionOpts {
    fn default() -> Self {
        Self {
            fps: Fps::default(),
            width: 640,
            height: 360,
            render_video: true,
            render_audio: true,
            bleedthrough: false,
            audio_sample_rate: 48_000,
            max_audio_block: Timecode(1000),
        }
    }
}

impl RenderSessionOpts {
    /// Reject values no session can run with.
    pub fn validate(&self) -> TimelineResult<()> {
        Fps::new(self.fps.num, self.fps.den)?;
        if self.width == 0 || self.height == 0 {
            return Err(TimelineError::validation(
                "layer width and height must be > 0",
            ));
        }
        if self.audio_sample_rate == 0 {
            return Err(TimelineError::validation("audio_sample_rate must be > 0"));
        }
        if self.max_audio_block <= Timecode::ZERO {
            return Err(TimelineError::validation("max_audio_block must be > 0"));
        }
        Ok(())
    }
}

/// Options for [`crate::QuantizerState`].
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuantiseOpts {
    /// Target grid.
    pub fps: Fps,
    /// Collapse record gaps before quantising.
    pub close_gaps: bool,
    /// Timecode that becomes zero when gaps are closed.
    pub play_start: Timecode,
}

impl Default for QuantiseOpts {
    fn default() -> Self {
        Self {
            fps: Fps::default(),
            close_gaps: true,
            play_start: Timecode::ZERO,
        }
    }
}

/// Top-level configuration document.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Render session options.
    pub render: RenderSessionOpts,
    /// Quantiser options.
    pub quantise: QuantiseOpts,
}

impl EngineConfig {
    /// Parse and validate a config from a JSON reader.
    pub fn from_reader<R: std::io::Read>(r: R) -> TimelineResult<Self> {
        let cfg: EngineConfig = serde_json::from_reader(r)
            .map_err(|e| TimelineError::validation(format!("parse engine config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a config from a JSON string.
    pub fn from_json_str(s: &str) -> TimelineResult<Self> {
        Self::from_reader(s.as_bytes())
    }

    /// Parse and validate a config file.
    pub fn from_path(path: impl AsRef<Path>) -> TimelineResult<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            TimelineError::validation(format!("open engine config '{}': {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(f))
    }

    /// Validate both sections.
    pub fn validate(&self) -> TimelineResult<()> {
        self.render.validate()?;
        Fps::new(self.quantise.fps.num, self.quantise.fps.den)?;
        if self.quantise.play_start < Timecode::ZERO {
            return Err(TimelineError::validation("play_start must be >= 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
