use crate::foundation::error::{TimelineError, TimelineResult};

/// Timeline ticks per second. One tick is one millisecond.
pub const TICKS_PER_SECOND: i64 = 1000;

/// A position on the timeline, in ticks.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Timecode(pub i64);

impl Timecode {
    /// Timeline origin.
    pub const ZERO: Timecode = Timecode(0);
    /// Sentinel larger than any real timecode.
    pub const MAX: Timecode = Timecode(i64::MAX);

    /// Convert to seconds.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }

    /// Convert seconds into the nearest tick.
    pub fn from_secs_f64(secs: f64) -> Self {
        Timecode((secs * TICKS_PER_SECOND as f64).round() as i64)
    }

    /// Saturating tick offset.
    pub fn offset(self, delta: i64) -> Self {
        Timecode(self.0.saturating_add(delta))
    }

    /// Signed distance `self - earlier` in ticks.
    pub fn since(self, earlier: Timecode) -> i64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::fmt::Display for Timecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}t", self.0)
    }
}

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32, // must be > 0
}

impl Default for Fps {
    fn default() -> Self {
        Self { num: 25, den: 1 }
    }
}

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> TimelineResult<Self> {
        if den == 0 {
            return Err(TimelineError::validation("Fps den must be > 0"));
        }
        if num == 0 {
            return Err(TimelineError::validation("Fps num must be > 0"));
        }
        let fps = Self { num, den };
        if fps.as_f64() > TICKS_PER_SECOND as f64 {
            return Err(TimelineError::validation(
                "Fps must not exceed the tick rate (one frame per tick)",
            ));
        }
        Ok(fps)
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }

    /// Duration of one frame in ticks, rounded.
    pub fn frame_ticks(self) -> i64 {
        self.frame_to_tc(1).0
    }

    /// Timecode of grid frame `n`, rounded to the nearest tick.
    pub fn frame_to_tc(self, n: i64) -> Timecode {
        let a = i128::from(n) * i128::from(TICKS_PER_SECOND) * i128::from(self.den);
        Timecode(div_round(a, i128::from(self.num)) as i64)
    }

    /// Nearest grid frame for `tc`.
    pub fn tc_to_frame_round(self, tc: Timecode) -> i64 {
        let a = i128::from(tc.0) * i128::from(self.num);
        div_round(a, i128::from(TICKS_PER_SECOND) * i128::from(self.den)) as i64
    }

    /// Last grid frame at or before `tc`.
    pub fn tc_to_frame_floor(self, tc: Timecode) -> i64 {
        let a = i128::from(tc.0) * i128::from(self.num);
        a.div_euclid(i128::from(TICKS_PER_SECOND) * i128::from(self.den)) as i64
    }

    /// Snap `tc` to the nearest grid boundary.
    pub fn snap_tc(self, tc: Timecode) -> Timecode {
        self.frame_to_tc(self.tc_to_frame_round(tc))
    }

    /// Return `true` when `tc` already sits on a grid boundary.
    pub fn is_on_grid(self, tc: Timecode) -> bool {
        self.snap_tc(tc) == tc
    }
}

/// Round-half-up division for a positive divisor.
fn div_round(a: i128, b: i128) -> i128 {
    (2 * a + b).div_euclid(2 * b)
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
