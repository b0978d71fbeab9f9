//! Per-instance, per-parameter change chains.
//!
//! Each chain is a secondary `prev_change`/`next_change` list threaded through
//! param-change events that are also members of the main list. Chain order
//! always matches main-list order.

use crate::event::list::EventList;
use crate::event::model::{Event, ParamChangeEvent, ParamValue};
use crate::foundation::core::{Fps, Timecode};
use crate::foundation::error::{TimelineError, TimelineResult};
use crate::foundation::ids::EventId;

impl EventList {
    /// Append a change to the tail of `init`'s chain for parameter `index`.
    ///
    /// If the tail already sits at `tc` and is not the init-time default, it
    /// is deleted and superseded by the new change. Changes earlier than the
    /// tail are spliced into the chain at their timecode.
    pub fn append_param_change_event(
        &mut self,
        init: EventId,
        index: usize,
        tc: Timecode,
        value: ParamValue,
    ) -> TimelineResult<EventId> {
        let (first, last) = self.chain_bounds(init, index)?;
        let init_tc = self.timecode(init)?;
        if let Some(tail) = last {
            let tail_tc = self.timecode(tail)?;
            let is_default = Some(tail) == first && tail_tc == init_tc;
            if tail_tc == tc && !is_default {
                self.check_param_window(init, tc)?;
                self.delete_param_change(tail)?;
            }
        }
        self.insert_param_change_event_at(init, index, tc, value)
    }

    /// Insert a change for parameter `index` of `init` at `tc`, splicing it
    /// into the chain after any change at the same timecode.
    pub fn insert_param_change_event_at(
        &mut self,
        init: EventId,
        index: usize,
        tc: Timecode,
        value: ParamValue,
    ) -> TimelineResult<EventId> {
        let (first, last) = self.chain_bounds(init, index)?;
        self.check_param_window(init, tc)?;

        let mut after = last;
        while let Some(a) = after {
            if self.timecode(a)? <= tc {
                break;
            }
            after = self.param_change(a)?.prev_change;
        }
        let before = match after {
            Some(a) => self.param_change(a)?.next_change,
            None => first,
        };

        let hint = after.or(Some(init));
        let id = self.insert_event_at(
            tc,
            Event::ParamChange(ParamChangeEvent {
                init,
                index,
                value,
                next_change: before,
                prev_change: after,
            }),
            hint,
        )?;
        self.link_chain_neighbours(init, index, after, id, before)?;
        Ok(id)
    }

    /// Remove a param change from its chain and the list, returning its value.
    pub fn delete_param_change(&mut self, id: EventId) -> TimelineResult<ParamValue> {
        let (init, index, prev, next) = {
            let pc = self.param_change(id)?;
            (pc.init, pc.index, pc.prev_change, pc.next_change)
        };
        self.unlink_from_chain(init, index, prev, next)?;
        match self.delete(id)? {
            Event::ParamChange(pc) => Ok(pc.value),
            _ => Err(TimelineError::malformed(format!("{id} was not a param change"))),
        }
    }

    /// Ids of parameter `index`'s chain, in order.
    pub fn param_chain(&self, init: EventId, index: usize) -> TimelineResult<Vec<EventId>> {
        let (mut cur, _) = self.chain_bounds(init, index)?;
        let mut out = Vec::new();
        while let Some(c) = cur {
            out.push(c);
            cur = self.param_change(c)?.next_change;
        }
        Ok(out)
    }

    /// Value of parameter `index` of `init` at `tc`.
    ///
    /// Numeric values interpolate linearly between the surrounding changes;
    /// before the first change the first value holds, after the last the last
    /// value holds. `None` when the chain is empty.
    pub fn get_param_value_at(
        &self,
        init: EventId,
        index: usize,
        tc: Timecode,
    ) -> TimelineResult<Option<ParamValue>> {
        let (first, _) = self.chain_bounds(init, index)?;
        let Some(first) = first else {
            return Ok(None);
        };

        let mut at = first;
        loop {
            let pc = self.param_change(at)?;
            match pc.next_change {
                Some(n) if self.timecode(n)? <= tc => at = n,
                _ => break,
            }
        }

        let at_tc = self.timecode(at)?;
        let pc = self.param_change(at)?;
        if at_tc > tc {
            return Ok(Some(pc.value.clone()));
        }
        match pc.next_change {
            Some(n) => {
                let next_tc = self.timecode(n)?;
                let span = next_tc.since(at_tc);
                if span <= 0 {
                    return Ok(Some(pc.value.clone()));
                }
                let t = tc.since(at_tc) as f64 / span as f64;
                Ok(Some(pc.value.lerp(&self.param_change(n)?.value, t)))
            }
            None => Ok(Some(pc.value.clone())),
        }
    }

    /// Remap every change of `init` from its current window onto
    /// `[new_init_tc, new_deinit_tc]`.
    ///
    /// Timecodes scale proportionally, then snap to the `fps` grid when given,
    /// and are clamped into the new window. Main-list and chain order are both
    /// preserved. `init` and `deinit` themselves are not moved.
    pub fn rescale_param_changes(
        &mut self,
        init: EventId,
        new_init_tc: Timecode,
        deinit: EventId,
        new_deinit_tc: Timecode,
        fps: Option<Fps>,
    ) -> TimelineResult<()> {
        if self.filter_init(init)?.deinit != Some(deinit) {
            return Err(TimelineError::malformed(format!(
                "{deinit} is not the deinit of {init}"
            )));
        }
        if new_deinit_tc < new_init_tc {
            return Err(TimelineError::validation(
                "rescaled window must not end before it starts",
            ));
        }
        let old_start = self.timecode(init)?;
        let old_span = self.timecode(deinit)?.since(old_start);
        let new_span = new_deinit_tc.since(new_init_tc);

        let chains: Vec<Vec<EventId>> = (0..self.filter_init(init)?.chains.len())
            .map(|i| self.param_chain(init, i))
            .collect::<TimelineResult<_>>()?;

        let remap = |tc: Timecode| -> Timecode {
            let mut nt = if old_span <= 0 {
                new_init_tc
            } else {
                let rel = i128::from(tc.since(old_start)) * i128::from(new_span);
                let scaled = (2 * rel + i128::from(old_span)).div_euclid(2 * i128::from(old_span));
                new_init_tc.offset(scaled as i64)
            };
            if let Some(fps) = fps {
                nt = fps.snap_tc(nt);
            }
            nt.clamp(new_init_tc, new_deinit_tc)
        };

        let mut moves = Vec::new();
        for chain in &chains {
            for &id in chain {
                let nt = remap(self.timecode(id)?);
                moves.push((id, nt));
            }
        }
        for &(id, _) in &moves {
            self.unlink(id)?;
        }
        let mut hint = Some(init);
        for (id, nt) in moves {
            self.relink_at(id, nt, hint)?;
            hint = Some(id);
        }
        Ok(())
    }

    pub(crate) fn param_change(&self, id: EventId) -> TimelineResult<&ParamChangeEvent> {
        match self.event(id)? {
            Event::ParamChange(pc) => Ok(pc),
            _ => Err(TimelineError::malformed(format!("{id} is not a param change"))),
        }
    }

    fn param_change_mut(&mut self, id: EventId) -> TimelineResult<&mut ParamChangeEvent> {
        match self.event_mut(id)? {
            Event::ParamChange(pc) => Ok(pc),
            _ => Err(TimelineError::malformed(format!("{id} is not a param change"))),
        }
    }

    fn chain_bounds(
        &self,
        init: EventId,
        index: usize,
    ) -> TimelineResult<(Option<EventId>, Option<EventId>)> {
        let chain = self.filter_init(init)?.chain(index).ok_or_else(|| {
            TimelineError::malformed(format!("{init} has no parameter {index}"))
        })?;
        Ok((chain.first, chain.last))
    }

    fn check_param_window(&self, init: EventId, tc: Timecode) -> TimelineResult<()> {
        let start = self.timecode(init)?;
        let end = self.window_end(init)?;
        if tc < start || tc > end {
            return Err(TimelineError::malformed(format!(
                "param change at {tc} is outside the window of {init}"
            )));
        }
        Ok(())
    }

    fn link_chain_neighbours(
        &mut self,
        init: EventId,
        index: usize,
        prev: Option<EventId>,
        id: EventId,
        next: Option<EventId>,
    ) -> TimelineResult<()> {
        match prev {
            Some(p) => self.param_change_mut(p)?.next_change = Some(id),
            None => self.filter_init_mut(init)?.chains[index].first = Some(id),
        }
        match next {
            Some(n) => self.param_change_mut(n)?.prev_change = Some(id),
            None => self.filter_init_mut(init)?.chains[index].last = Some(id),
        }
        Ok(())
    }

    fn unlink_from_chain(
        &mut self,
        init: EventId,
        index: usize,
        prev: Option<EventId>,
        next: Option<EventId>,
    ) -> TimelineResult<()> {
        match prev {
            Some(p) => self.param_change_mut(p)?.next_change = next,
            None => {
                if let Some(chain) = self.filter_init_mut(init)?.chains.get_mut(index) {
                    chain.first = next;
                }
            }
        }
        match next {
            Some(n) => self.param_change_mut(n)?.prev_change = prev,
            None => {
                if let Some(chain) = self.filter_init_mut(init)?.chains.get_mut(index) {
                    chain.last = prev;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/unit/params.rs"]
mod tests;
