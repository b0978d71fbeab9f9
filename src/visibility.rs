//! Per-track visibility at a timecode, derived from audio-transition filters.

use crate::event::list::EventList;
use crate::foundation::core::Timecode;
use crate::foundation::error::TimelineResult;
use crate::foundation::ids::EventId;

impl EventList {
    /// Visibility of each of `tracks` tracks at `tc`, in `[0, 1]`.
    ///
    /// Starts from an identity contribution matrix and applies every
    /// audio-transition instance of the governing filter map, in map order:
    /// the output track's row becomes the blend of its two input rows at the
    /// transition's current position. The result is the row of the front-most
    /// track showing a frame at `tc`; with no such track every entry is zero.
    /// `bleedthrough` short-circuits to all ones.
    pub fn get_track_visibility_at_tc(
        &self,
        tc: Timecode,
        tracks: usize,
        bleedthrough: bool,
    ) -> TimelineResult<Vec<f64>> {
        if bleedthrough {
            return Ok(vec![1.0; tracks]);
        }
        let Some(front) = self.front_track_at(tc, tracks) else {
            return Ok(vec![0.0; tracks]);
        };

        let mut matrix: Vec<Vec<f64>> = (0..tracks)
            .map(|i| (0..tracks).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();

        for init in self.active_instances_at(tc) {
            let Some((a, b, out, t)) = self.transition_at(init, tc, tracks)? else {
                continue;
            };
            let row: Vec<f64> = matrix[a]
                .iter()
                .zip(&matrix[b])
                .map(|(x, y)| x * (1.0 - t) + y * t)
                .collect();
            matrix[out] = row;
        }
        Ok(matrix.swap_remove(front))
    }

    fn front_track_at(&self, tc: Timecode, tracks: usize) -> Option<usize> {
        let id = self.get_frame_event_at_or_before(tc, None)?;
        let frame = self.get(id)?.event().as_frame()?;
        (0..tracks).find(|&t| !frame.track(t).is_blank())
    }

    /// `(first input, second input, output, position)` of a transition
    /// instance, or `None` when `init` is not a usable transition.
    fn transition_at(
        &self,
        init: EventId,
        tc: Timecode,
        tracks: usize,
    ) -> TimelineResult<Option<(usize, usize, usize, f64)>> {
        let fi = self.filter_init(init)?;
        let Some(tp) = fi.info.transition else {
            return Ok(None);
        };
        let track = |t: Option<&i32>| t.and_then(|&t| usize::try_from(t).ok()).filter(|&t| t < tracks);
        let (Some(a), Some(b), Some(out)) = (
            track(fi.in_tracks.first()),
            track(fi.in_tracks.get(1)),
            track(fi.out_tracks.first()),
        ) else {
            return Ok(None);
        };

        let value = self
            .get_param_value_at(init, tp.index, tc)?
            .and_then(|v| v.as_f64())
            .unwrap_or(tp.min);
        let span = tp.max - tp.min;
        let t = if span == 0.0 {
            0.0
        } else {
            ((value - tp.min) / span).clamp(0.0, 1.0)
        };
        Ok(Some((a, b, out, t)))
    }
}

#[cfg(test)]
#[path = "../tests/unit/visibility.rs"]
mod tests;
