use std::collections::HashSet;

use crate::event::list::EventList;
use crate::event::model::Event;
use crate::foundation::core::Timecode;
use crate::foundation::error::{TimelineError, TimelineResult};
use crate::foundation::ids::EventId;

impl EventList {
    /// Verify every structural and referential invariant of the list.
    ///
    /// Checks link symmetry, `(timecode, rank)` ordering (skipped while the
    /// list is unordered), init/deinit pairing, param-change windows and chain
    /// order, filter-map membership, and that no two consecutive filter maps
    /// carry the same active set.
    pub fn check_integrity(&self) -> TimelineResult<()> {
        let forward = self.check_links()?;

        let mut prev_map: Vec<EventId> = Vec::new();
        for &id in &forward {
            let node = self.node(id)?;
            match &node.event {
                Event::FilterInit(fi) => {
                    let end = match fi.deinit {
                        Some(d) => {
                            let dn = self.node(d)?;
                            match &dn.event {
                                Event::FilterDeinit(fd) if fd.init == id => {}
                                _ => {
                                    return Err(TimelineError::malformed(format!(
                                        "init {id} points at {d}, which does not close it"
                                    )));
                                }
                            }
                            if dn.tc < node.tc {
                                return Err(TimelineError::malformed(format!(
                                    "deinit {d} precedes init {id}"
                                )));
                            }
                            dn.tc
                        }
                        None => Timecode::MAX,
                    };
                    for (index, chain) in fi.chains.iter().enumerate() {
                        self.check_chain(id, index, chain.first, chain.last, node.tc, end)?;
                    }
                }
                Event::FilterDeinit(fd) => {
                    let init = self.node(fd.init).map_err(|_| {
                        TimelineError::malformed(format!("deinit {id} has no init"))
                    })?;
                    match &init.event {
                        Event::FilterInit(fi) if fi.deinit == Some(id) => {}
                        _ => {
                            return Err(TimelineError::malformed(format!(
                                "deinit {id} is not the pair of {}",
                                fd.init
                            )));
                        }
                    }
                }
                Event::ParamChange(pc) => {
                    let owner = self.node(pc.init).map_err(|_| {
                        TimelineError::malformed(format!("param change {id} has no owner"))
                    })?;
                    let Event::FilterInit(fi) = &owner.event else {
                        return Err(TimelineError::malformed(format!(
                            "param change {id} owner is not a filter init"
                        )));
                    };
                    if pc.index >= fi.chains.len() {
                        return Err(TimelineError::malformed(format!(
                            "param change {id} index {} out of range",
                            pc.index
                        )));
                    }
                }
                Event::FilterMap(map) => {
                    let mut seen = HashSet::new();
                    for &init in &map.inits {
                        if !seen.insert(init) {
                            return Err(TimelineError::malformed(format!(
                                "filter map {id} lists {init} twice"
                            )));
                        }
                        if !self.is_active_at(init, node.tc)? {
                            return Err(TimelineError::malformed(format!(
                                "filter map {id} at {} references inactive instance {init}",
                                node.tc
                            )));
                        }
                    }
                    if map.inits == prev_map {
                        return Err(TimelineError::malformed(format!(
                            "filter map {id} duplicates the preceding map"
                        )));
                    }
                    prev_map.clone_from(&map.inits);
                }
                Event::Frame(_) | Event::AudioFrame(_) | Event::Marker(_) => {}
            }
        }
        Ok(())
    }

    /// Whether instance `init` is active at `tc`, i.e. `init.tc <= tc < deinit.tc`.
    pub fn is_active_at(&self, init: EventId, tc: Timecode) -> TimelineResult<bool> {
        let node = self.node(init)?;
        let Event::FilterInit(fi) = &node.event else {
            return Err(TimelineError::malformed(format!(
                "{init} is not a filter init"
            )));
        };
        if node.tc > tc {
            return Ok(false);
        }
        match fi.deinit {
            Some(d) => Ok(tc < self.timecode(d)?),
            None => Ok(true),
        }
    }

    fn check_links(&self) -> TimelineResult<Vec<EventId>> {
        let mut forward = Vec::with_capacity(self.len());
        let mut prev: Option<EventId> = None;
        let mut prev_key = None;
        let mut cur = self.get_first();
        while let Some(id) = cur {
            let node = self.node(id)?;
            if !node.linked || node.prev != prev {
                return Err(TimelineError::malformed(format!(
                    "event {id} has an inconsistent back link"
                )));
            }
            if !self.is_unordered()
                && let Some(k) = prev_key
                && node.key() < k
            {
                return Err(TimelineError::malformed(format!(
                    "event {id} at {} is out of order",
                    node.tc
                )));
            }
            if forward.len() >= self.len() {
                return Err(TimelineError::malformed("list is cyclic or miscounted"));
            }
            forward.push(id);
            prev_key = Some(node.key());
            prev = Some(id);
            cur = node.next;
        }
        if forward.len() != self.len() || self.get_last() != prev {
            return Err(TimelineError::malformed("list tail or length is inconsistent"));
        }
        let backward: Vec<EventId> = self.iter_rev().map(|(id, _)| id).collect();
        if !backward.iter().rev().eq(forward.iter()) {
            return Err(TimelineError::malformed(
                "backward traversal is not the reverse of forward traversal",
            ));
        }
        Ok(forward)
    }

    fn check_chain(
        &self,
        init: EventId,
        index: usize,
        first: Option<EventId>,
        last: Option<EventId>,
        start: Timecode,
        end: Timecode,
    ) -> TimelineResult<()> {
        let mut prev: Option<EventId> = None;
        let mut prev_tc = start;
        let mut cur = first;
        let mut steps = 0usize;
        while let Some(id) = cur {
            let node = self.node(id)?;
            let Event::ParamChange(pc) = &node.event else {
                return Err(TimelineError::malformed(format!(
                    "chain {index} of {init} contains non-param event {id}"
                )));
            };
            if pc.init != init || pc.index != index || pc.prev_change != prev || !node.linked {
                return Err(TimelineError::malformed(format!(
                    "param change {id} is mislinked in chain {index} of {init}"
                )));
            }
            if node.tc < prev_tc || node.tc > end {
                return Err(TimelineError::malformed(format!(
                    "param change {id} at {} lies outside its window or chain order",
                    node.tc
                )));
            }
            steps += 1;
            if steps > self.len() {
                return Err(TimelineError::malformed("param chain is cyclic"));
            }
            prev_tc = node.tc;
            prev = Some(id);
            cur = pc.next_change;
        }
        if prev != last {
            return Err(TimelineError::malformed(format!(
                "chain {index} of {init} has a stale tail"
            )));
        }
        Ok(())
    }
}
