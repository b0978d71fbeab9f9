//! Filter-map maintenance.
//!
//! A filter map lists the instances active from its timecode until the next
//! map. Order matters: process-last instances always evaluate after the rest,
//! and within each group the order is the chaining order.

use crate::event::list::EventList;
use crate::event::model::{Event, FilterMapEvent};
use crate::foundation::core::Timecode;
use crate::foundation::error::{TimelineError, TimelineResult};
use crate::foundation::ids::EventId;

/// Ordered structural equality of two filter maps.
pub fn compare_filter_maps(a: &[EventId], b: &[EventId]) -> bool {
    a == b
}

/// Remove `init` from `map`; returns whether it was present.
pub fn remove_event_from_filter_map(map: &mut Vec<EventId>, init: EventId) -> bool {
    let before = map.len();
    map.retain(|&e| e != init);
    map.len() != before
}

impl EventList {
    /// (Re)insert `init` into `map`.
    ///
    /// Process-last instances go after every other instance. Within a group the
    /// position follows `hint` (a neighbouring map) when it lists `init`,
    /// otherwise `init` goes to the end of its group. Calling this twice gives
    /// the same map.
    pub fn add_init_event_to_filter_map(
        &self,
        map: &mut Vec<EventId>,
        init: EventId,
        hint: Option<&[EventId]>,
    ) -> TimelineResult<()> {
        remove_event_from_filter_map(map, init);
        let last = self.filter_init(init)?.info.process_last;
        let is_last = |e: EventId| {
            self.filter_init(e)
                .map(|fi| fi.info.process_last)
                .unwrap_or(false)
        };

        let (lo, hi) = if last {
            let lo = map.iter().rposition(|&e| !is_last(e)).map_or(0, |i| i + 1);
            (lo, map.len())
        } else {
            (0, map.iter().position(|&e| is_last(e)).unwrap_or(map.len()))
        };

        let pos = match hint.and_then(|h| h.iter().position(|&e| e == init).map(|p| (h, p))) {
            Some((h, init_pos)) => {
                let mut pos = lo;
                for (i, e) in map.iter().enumerate().take(hi).skip(lo) {
                    if h.iter().position(|x| x == e).is_some_and(|p| p < init_pos) {
                        pos = i + 1;
                    }
                }
                pos
            }
            None => hi,
        };
        map.try_reserve(1)?;
        map.insert(pos, init);
        Ok(())
    }

    /// Nearest filter map strictly before `event`.
    ///
    /// With `track` set, only maps with an instance reading or writing that
    /// track qualify.
    pub fn get_filter_map_before(&self, event: EventId, track: Option<i32>) -> Option<EventId> {
        let mut cur = self.get_prev(event);
        while let Some(c) = cur {
            if self.map_matches(c, track) {
                return Some(c);
            }
            cur = self.get_prev(c);
        }
        None
    }

    /// Nearest filter map strictly after `event`.
    pub fn get_filter_map_after(&self, event: EventId, track: Option<i32>) -> Option<EventId> {
        let mut cur = self.get_next(event);
        while let Some(c) = cur {
            if self.map_matches(c, track) {
                return Some(c);
            }
            cur = self.get_next(c);
        }
        None
    }

    /// The map governing `tc`: the last filter map at or before it.
    pub fn get_active_filter_map_at(&self, tc: Timecode) -> Option<EventId> {
        let mut cur = self.get_event_at_or_before(tc, None);
        while let Some(c) = cur {
            let node = self.get(c)?;
            if matches!(node.event, Event::FilterMap(_)) {
                return Some(c);
            }
            cur = node.prev;
        }
        None
    }

    /// Instances active at `tc` according to the governing map.
    pub fn active_instances_at(&self, tc: Timecode) -> Vec<EventId> {
        self.get_active_filter_map_at(tc)
            .and_then(|m| self.get(m))
            .and_then(|n| n.event.as_filter_map())
            .map(|m| m.inits.clone())
            .unwrap_or_default()
    }

    /// Contents of map `id`.
    pub fn filter_map_inits(&self, id: EventId) -> TimelineResult<&[EventId]> {
        match self.event(id)? {
            Event::FilterMap(m) => Ok(&m.inits),
            _ => Err(TimelineError::malformed(format!("{id} is not a filter map"))),
        }
    }

    /// Append a filter map. See [`EventList::insert_filter_map_at`].
    pub fn append_filter_map_event(
        &mut self,
        tc: Timecode,
        inits: Vec<EventId>,
    ) -> TimelineResult<Option<EventId>> {
        let hint = self.get_last();
        self.insert_filter_map_at(tc, inits, hint)
    }

    /// Insert (or overwrite) the filter map at `tc`.
    ///
    /// Every instance must be active at `tc`. Returns `None` when the map
    /// turned out redundant and was pruned.
    pub fn insert_filter_map_at(
        &mut self,
        tc: Timecode,
        inits: Vec<EventId>,
        hint: Option<EventId>,
    ) -> TimelineResult<Option<EventId>> {
        for &init in &inits {
            if !self.is_active_at(init, tc)? {
                return Err(TimelineError::malformed(format!(
                    "instance {init} is not active at {tc}"
                )));
            }
        }
        let id = match self.filter_map_exactly_at(tc, hint) {
            Some(existing) => {
                if let Event::FilterMap(m) = self.event_mut(existing)? {
                    m.inits = inits;
                }
                existing
            }
            None => self.insert_event_at(tc, Event::FilterMap(FilterMapEvent { inits }), hint)?,
        };
        self.dedupe_filter_maps()?;
        Ok(self.contains(id).then_some(id))
    }

    /// Delete superseded and redundant filter maps; returns how many went.
    ///
    /// A map is superseded when another map follows at the same timecode, and
    /// redundant when it equals the preceding map (the list starts with an
    /// implicit empty map).
    pub fn dedupe_filter_maps(&mut self) -> TimelineResult<usize> {
        let maps: Vec<(EventId, Timecode)> = self
            .iter()
            .filter(|(_, n)| matches!(n.event, Event::FilterMap(_)))
            .map(|(id, n)| (id, n.tc))
            .collect();

        let mut doomed = Vec::new();
        let mut prev: Vec<EventId> = Vec::new();
        for (i, &(id, tc)) in maps.iter().enumerate() {
            if maps.get(i + 1).is_some_and(|&(_, next_tc)| next_tc == tc) {
                doomed.push(id);
                continue;
            }
            let inits = self.filter_map_inits(id)?;
            if compare_filter_maps(inits, &prev) {
                doomed.push(id);
            } else {
                prev = inits.to_vec();
            }
        }
        for &id in &doomed {
            self.delete(id)?;
        }
        if !doomed.is_empty() {
            tracing::debug!(removed = doomed.len(), "pruned filter maps");
        }
        Ok(doomed.len())
    }

    /// Drop map entries that are not active at their map's timecode, or whose
    /// init no longer exists. Returns how many entries went.
    pub(crate) fn prune_inactive_map_entries(&mut self) -> TimelineResult<usize> {
        let maps: Vec<(EventId, Timecode)> = self
            .iter()
            .filter(|(_, n)| matches!(n.event, Event::FilterMap(_)))
            .map(|(id, n)| (id, n.tc))
            .collect();
        let mut removed = 0;
        for (id, tc) in maps {
            let mut inits = self.filter_map_inits(id)?.to_vec();
            let before = inits.len();
            inits.retain(|&i| self.contains(i) && self.is_active_at(i, tc).unwrap_or(false));
            if inits.len() != before {
                removed += before - inits.len();
                if let Event::FilterMap(m) = self.event_mut(id)? {
                    m.inits = inits;
                }
            }
        }
        Ok(removed)
    }

    /// Remove an instance entirely: its init, deinit, every param change in
    /// its chains, and its entry in every filter map of its window. Maps left
    /// redundant are pruned.
    #[tracing::instrument(skip(self))]
    pub fn remove_filter_from_event_list(&mut self, init: EventId) -> TimelineResult<()> {
        let fi = self.filter_init(init)?;
        let start = self.timecode(init)?;
        let deinit = fi.deinit;
        let end = self.window_end(init)?;

        let mut changes = Vec::new();
        for chain in fi.chains.clone() {
            let mut cur = chain.first;
            while let Some(c) = cur {
                changes.push(c);
                cur = self
                    .event(c)?
                    .as_param_change()
                    .and_then(|p| p.next_change);
            }
        }

        let mut cur = Some(init);
        while let Some(c) = cur {
            let node = self.node(c)?;
            if node.tc > end {
                break;
            }
            let next = node.next;
            if node.tc >= start
                && let Event::FilterMap(m) = self.event_mut(c)?
            {
                remove_event_from_filter_map(&mut m.inits, init);
            }
            cur = next;
        }

        for c in changes {
            self.delete(c)?;
        }
        if let Some(d) = deinit {
            self.delete(d)?;
        }
        self.delete(init)?;
        self.dedupe_filter_maps()?;
        Ok(())
    }

    /// Make every filter map agree with `init`'s current window.
    ///
    /// `init` is removed from all maps, maps are created at the window
    /// boundaries where missing, `init` is added to every map inside
    /// `[init, deinit)`, and redundant maps are pruned.
    pub fn rebuild_filter_maps_for(&mut self, init: EventId) -> TimelineResult<()> {
        let start = self.timecode(init)?;
        let end = self.window_end(init)?;

        let map_ids: Vec<EventId> = self
            .iter()
            .filter(|(_, n)| matches!(n.event, Event::FilterMap(_)))
            .map(|(id, _)| id)
            .collect();
        for id in map_ids {
            if let Event::FilterMap(m) = self.event_mut(id)? {
                remove_event_from_filter_map(&mut m.inits, init);
            }
        }

        if self.filter_map_exactly_at(start, Some(init)).is_none() {
            let base = self.active_instances_before(start);
            self.insert_event_at(start, Event::FilterMap(FilterMapEvent { inits: base }), Some(init))?;
        }
        if end != Timecode::MAX && self.filter_map_exactly_at(end, None).is_none() {
            let base = self.active_instances_before(end);
            self.insert_event_at(end, Event::FilterMap(FilterMapEvent { inits: base }), None)?;
        }

        let mut hint: Option<Vec<EventId>> = None;
        let mut cur = Some(init);
        while let Some(c) = cur {
            let node = self.node(c)?;
            if node.tc >= end {
                break;
            }
            let next = node.next;
            if matches!(node.event, Event::FilterMap(_)) {
                let mut inits = match self.event_mut(c)? {
                    Event::FilterMap(m) => std::mem::take(&mut m.inits),
                    _ => Vec::new(),
                };
                let added = self.add_init_event_to_filter_map(&mut inits, init, hint.as_deref());
                let snapshot = inits.clone();
                if let Event::FilterMap(m) = self.event_mut(c)? {
                    m.inits = inits;
                }
                added?;
                hint = Some(snapshot);
            }
            cur = next;
        }

        self.dedupe_filter_maps()?;
        Ok(())
    }

    /// Contents of the last map strictly before `tc`.
    fn active_instances_before(&self, tc: Timecode) -> Vec<EventId> {
        let mut cur = self.get_event_at_or_before(tc, None);
        while let Some(c) = cur {
            let Some(node) = self.get(c) else { break };
            if node.tc < tc
                && let Event::FilterMap(m) = &node.event
            {
                return m.inits.clone();
            }
            cur = node.prev;
        }
        Vec::new()
    }

    fn filter_map_exactly_at(&self, tc: Timecode, hint: Option<EventId>) -> Option<EventId> {
        let mut cur = self.get_event_at_or_before(tc, hint);
        while let Some(c) = cur {
            let node = self.get(c)?;
            if node.tc != tc {
                return None;
            }
            if matches!(node.event, Event::FilterMap(_)) {
                return Some(c);
            }
            cur = node.prev;
        }
        None
    }

    fn map_matches(&self, id: EventId, track: Option<i32>) -> bool {
        let Some(Event::FilterMap(m)) = self.get(id).map(|n| &n.event) else {
            return false;
        };
        match track {
            None => true,
            Some(t) => m.inits.iter().any(|&i| {
                self.filter_init(i)
                    .map(|fi| fi.touches_track(t))
                    .unwrap_or(false)
            }),
        }
    }
}

#[cfg(test)]
#[path = "../tests/unit/filter_map.rs"]
mod tests;
