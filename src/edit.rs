//! Compound edits that keep pairs, chains and filter maps consistent.

use crate::event::list::EventList;
use crate::event::model::{Event, FilterInitEvent, ParamValue};
use crate::foundation::core::{Fps, Timecode};
use crate::foundation::error::{TimelineError, TimelineResult};
use crate::foundation::ids::EventId;

/// Direction for [`EventList::move_event_left`] / [`EventList::move_event_right`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Nudge {
    Left,
    Right,
}

impl EventList {
    /// Add a complete effect instance active over `[start, end)`.
    ///
    /// Inserts the init, its deinit, one init-time default change per entry of
    /// `defaults`, and repairs every filter map. On failure nothing is left
    /// behind.
    pub fn add_filter_instance(
        &mut self,
        start: Timecode,
        end: Timecode,
        init: FilterInitEvent,
        defaults: &[ParamValue],
    ) -> TimelineResult<EventId> {
        if end < start {
            return Err(TimelineError::validation(format!(
                "instance window ends at {end} before it starts at {start}"
            )));
        }
        if defaults.len() > init.info.num_params {
            return Err(TimelineError::validation(format!(
                "{} defaults given for {} parameters",
                defaults.len(),
                init.info.num_params
            )));
        }

        let hint = self.get_event_at_or_before(start, None);
        let id = self.insert_filter_init_event_at(start, init, hint)?;
        if let Err(err) = self.complete_instance(id, end, defaults) {
            if let Err(rollback) = self.remove_filter_from_event_list(id) {
                tracing::warn!(%id, error = %rollback, "rollback of partial instance failed");
            }
            return Err(err);
        }
        tracing::debug!(%id, %start, %end, "added filter instance");
        Ok(id)
    }

    fn complete_instance(
        &mut self,
        init: EventId,
        end: Timecode,
        defaults: &[ParamValue],
    ) -> TimelineResult<()> {
        let start = self.timecode(init)?;
        self.insert_filter_deinit_event_at(end, init, Some(init))?;
        for (index, value) in defaults.iter().enumerate() {
            self.insert_param_change_event_at(init, index, start, value.clone())?;
        }
        self.rebuild_filter_maps_for(init)
    }

    /// Move `init` to `tc`, keeping its deinit.
    ///
    /// Moving past the deinit removes the whole instance and returns `None`.
    /// Param changes left outside the new window are clamped onto it.
    pub fn move_filter_init_event(
        &mut self,
        init: EventId,
        tc: Timecode,
    ) -> TimelineResult<Option<EventId>> {
        let end = self.window_end(init)?;
        if tc > end {
            self.remove_filter_from_event_list(init)?;
            return Ok(None);
        }
        self.clamp_param_changes(init, tc, end)?;
        self.move_to(init, tc)?;
        self.rebuild_filter_maps_for(init)?;
        Ok(Some(init))
    }

    /// Move the deinit of `init` to `tc`.
    ///
    /// Moving before the init removes the whole instance and returns `None`.
    pub fn move_filter_deinit_event(
        &mut self,
        init: EventId,
        tc: Timecode,
    ) -> TimelineResult<Option<EventId>> {
        let deinit = self.filter_init(init)?.deinit().ok_or_else(|| {
            TimelineError::malformed(format!("filter init {init} has no deinit to move"))
        })?;
        let start = self.timecode(init)?;
        if tc < start {
            self.remove_filter_from_event_list(init)?;
            return Ok(None);
        }
        self.clamp_param_changes(init, start, tc)?;
        self.move_to(deinit, tc)?;
        self.rebuild_filter_maps_for(init)?;
        Ok(Some(deinit))
    }

    /// Shift a whole instance so it starts at `start`, keeping its length.
    ///
    /// Param changes are remapped with [`EventList::rescale_param_changes`]
    /// and snapped to `fps` when given.
    pub fn move_filter_instance(
        &mut self,
        init: EventId,
        start: Timecode,
        fps: Option<Fps>,
    ) -> TimelineResult<()> {
        let old_start = self.timecode(init)?;
        let delta = start.since(old_start);
        match self.filter_init(init)?.deinit() {
            Some(deinit) => {
                let end = self.timecode(deinit)?.offset(delta);
                self.rescale_param_changes(init, start, deinit, end, fps)?;
                self.move_to(deinit, end)?;
            }
            None => {
                let num = self.filter_init(init)?.chains().len();
                for index in 0..num {
                    let chain = self.param_chain(init, index)?;
                    let mut moves = Vec::with_capacity(chain.len());
                    for id in chain {
                        let mut nt = self.timecode(id)?.offset(delta);
                        if let Some(fps) = fps {
                            nt = fps.snap_tc(nt).max(start);
                        }
                        moves.push((id, nt));
                    }
                    self.relink_in_order(moves)?;
                }
            }
        }
        self.move_to(init, start)?;
        self.rebuild_filter_maps_for(init)
    }

    /// Nudge `id` one grid step earlier. See [`EventList::move_event_right`].
    pub fn move_event_left(&mut self, id: EventId, fps: Fps) -> TimelineResult<Option<EventId>> {
        self.nudge(id, fps, Nudge::Left)
    }

    /// Nudge `id` one grid step later.
    ///
    /// Off-grid events snap to the neighbouring grid point in the direction of
    /// travel. An init or deinit crossing its partner removes the whole
    /// instance; param changes stay inside their owner's window and chain
    /// order; a frame landing on another frame overwrites it. Returns the id
    /// that now carries the event, or `None` if it was removed.
    pub fn move_event_right(&mut self, id: EventId, fps: Fps) -> TimelineResult<Option<EventId>> {
        self.nudge(id, fps, Nudge::Right)
    }

    fn nudge(&mut self, id: EventId, fps: Fps, dir: Nudge) -> TimelineResult<Option<EventId>> {
        let tc = self.timecode(id)?;
        let n = fps.tc_to_frame_round(tc);
        let grid = fps.frame_to_tc(n);
        let target = match dir {
            Nudge::Left if grid < tc => grid,
            Nudge::Left => fps.frame_to_tc(n - 1).max(Timecode::ZERO),
            Nudge::Right if grid > tc => grid,
            Nudge::Right => fps.frame_to_tc(n + 1),
        };
        if target == tc {
            return Ok(Some(id));
        }

        match self.event(id)? {
            Event::FilterInit(_) => self.move_filter_init_event(id, target),
            Event::FilterDeinit(fd) => {
                let init = fd.init();
                self.move_filter_deinit_event(init, target)
            }
            Event::ParamChange(pc) => {
                let (init, prev, next) = (pc.init(), pc.prev_change(), pc.next_change());
                let mut lo = self.timecode(init)?;
                let mut hi = self.window_end(init)?;
                if let Some(p) = prev {
                    lo = lo.max(self.timecode(p)?);
                }
                if let Some(n) = next {
                    hi = hi.min(self.timecode(n)?);
                }
                self.move_to(id, target.clamp(lo, hi))?;
                Ok(Some(id))
            }
            Event::Frame(_) => match self.get_frame_event_at(target, Some(id)) {
                Some(existing) => {
                    let Event::Frame(frame) = self.delete(id)? else {
                        return Err(TimelineError::malformed(format!("{id} stopped being a frame")));
                    };
                    Ok(Some(self.insert_frame_event_at(target, frame, Some(existing))?))
                }
                None => {
                    self.move_to(id, target)?;
                    Ok(Some(id))
                }
            },
            Event::AudioFrame(_) | Event::Marker(_) => {
                self.move_to(id, target)?;
                Ok(Some(id))
            }
            Event::FilterMap(_) => Err(TimelineError::validation(
                "filter maps follow their instances; move the instance instead",
            )),
        }
    }

    /// Clamp every change of `init` into `[start, end]`, preserving chain order.
    fn clamp_param_changes(
        &mut self,
        init: EventId,
        start: Timecode,
        end: Timecode,
    ) -> TimelineResult<()> {
        let num = self.filter_init(init)?.chains().len();
        for index in 0..num {
            let chain = self.param_chain(init, index)?;
            let mut moves = Vec::with_capacity(chain.len());
            let mut clamped = false;
            for id in chain {
                let tc = self.timecode(id)?;
                let nt = tc.clamp(start, end);
                clamped |= nt != tc;
                moves.push((id, nt));
            }
            if clamped {
                self.relink_in_order(moves)?;
            }
        }
        Ok(())
    }

    /// Unlink every node in `moves`, then relink each at its new timecode in
    /// the given order so equal timecodes keep that order.
    fn relink_in_order(&mut self, moves: Vec<(EventId, Timecode)>) -> TimelineResult<()> {
        let mut hint = None;
        for &(id, _) in &moves {
            if hint.is_none() {
                hint = self.get_prev(id);
            }
            self.unlink(id)?;
        }
        for (id, tc) in moves {
            self.relink_at(id, tc, hint)?;
            hint = Some(id);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/unit/edit.rs"]
mod tests;
