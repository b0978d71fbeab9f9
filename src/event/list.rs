use crate::event::model::{
    AudioFrameEvent, Event, EventNode, FilterDeinitEvent, FilterInitEvent, FrameEvent, MarkerEvent,
};
use crate::foundation::core::Timecode;
use crate::foundation::error::{TimelineError, TimelineResult};
use crate::foundation::ids::EventId;

#[derive(Clone, Debug)]
struct Slot {
    generation: u32,
    node: Option<EventNode>,
}

/// Immutable list metadata.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ListMeta {
    /// Creation time, milliseconds since the Unix epoch.
    pub created_unix_ms: u64,
    /// Engine version that created the list.
    pub engine_version: String,
}

impl Default for ListMeta {
    fn default() -> Self {
        Self {
            created_unix_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            engine_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// A time-ordered, doubly linked list of events.
///
/// Nodes live in a slab owned by the list and are addressed by generational
/// [`EventId`]s. Traversal order is `(timecode, Event::rank)`, stable for
/// equal keys in insertion order.
#[derive(Clone, Debug)]
pub struct EventList {
    slots: Vec<Slot>,
    free: Vec<u32>,
    first: Option<EventId>,
    last: Option<EventId>,
    len: usize,
    unordered: bool,
    meta: ListMeta,
}

impl Default for EventList {
    fn default() -> Self {
        Self::new()
    }
}

impl EventList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::with_meta(ListMeta::default())
    }

    /// Create an empty list carrying `meta`.
    pub fn with_meta(meta: ListMeta) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            first: None,
            last: None,
            len: 0,
            unordered: false,
            meta,
        }
    }

    /// List metadata.
    pub fn meta(&self) -> &ListMeta {
        &self.meta
    }

    /// Number of linked events.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list has no linked events.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether out-of-order no-quantise events are waiting for
    /// [`crate::reorder_noquant`].
    pub fn is_unordered(&self) -> bool {
        self.unordered
    }

    pub(crate) fn set_unordered(&mut self, unordered: bool) {
        self.unordered = unordered;
    }

    /// Look up a node; `None` for deleted or foreign ids.
    pub fn get(&self, id: EventId) -> Option<&EventNode> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    /// Whether `id` refers to a live node.
    pub fn contains(&self, id: EventId) -> bool {
        self.get(id).is_some()
    }

    /// Look up a node, failing with `MalformedEvent` for stale ids.
    pub fn node(&self, id: EventId) -> TimelineResult<&EventNode> {
        self.get(id)
            .ok_or_else(|| TimelineError::malformed(format!("event {id} does not exist")))
    }

    pub(crate) fn node_mut(&mut self, id: EventId) -> TimelineResult<&mut EventNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
            .ok_or_else(|| TimelineError::malformed(format!("event {id} does not exist")))
    }

    /// Payload of `id`.
    pub fn event(&self, id: EventId) -> TimelineResult<&Event> {
        Ok(&self.node(id)?.event)
    }

    pub(crate) fn event_mut(&mut self, id: EventId) -> TimelineResult<&mut Event> {
        Ok(&mut self.node_mut(id)?.event)
    }

    /// Timecode of `id`.
    pub fn timecode(&self, id: EventId) -> TimelineResult<Timecode> {
        Ok(self.node(id)?.tc)
    }

    /// Init payload of `id`, failing if it is not a filter init.
    pub fn filter_init(&self, id: EventId) -> TimelineResult<&FilterInitEvent> {
        match self.event(id)? {
            Event::FilterInit(fi) => Ok(fi),
            other => Err(TimelineError::malformed(format!(
                "{id} is a {:?}, not a filter init",
                other.kind()
            ))),
        }
    }

    pub(crate) fn filter_init_mut(&mut self, id: EventId) -> TimelineResult<&mut FilterInitEvent> {
        match self.event_mut(id)? {
            Event::FilterInit(fi) => Ok(fi),
            _ => Err(TimelineError::malformed(format!("{id} is not a filter init"))),
        }
    }

    /// Timecode of the deinit paired with `init`, or `Timecode::MAX` if unpaired.
    pub fn window_end(&self, init: EventId) -> TimelineResult<Timecode> {
        match self.filter_init(init)?.deinit {
            Some(d) => self.timecode(d),
            None => Ok(Timecode::MAX),
        }
    }

    /// First event.
    pub fn get_first(&self) -> Option<EventId> {
        self.first
    }

    /// Last event.
    pub fn get_last(&self) -> Option<EventId> {
        self.last
    }

    /// Event after `id`.
    pub fn get_next(&self, id: EventId) -> Option<EventId> {
        self.get(id).and_then(|n| n.next)
    }

    /// Event before `id`.
    pub fn get_prev(&self, id: EventId) -> Option<EventId> {
        self.get(id).and_then(|n| n.prev)
    }

    /// Forward iterator.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cur: self.first,
            forward: true,
        }
    }

    /// Backward iterator.
    pub fn iter_rev(&self) -> Iter<'_> {
        Iter {
            list: self,
            cur: self.last,
            forward: false,
        }
    }

    /// Snapshot of all ids in list order.
    pub fn ids(&self) -> Vec<EventId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Last event with `timecode <= tc`, searching from `hint` when given.
    pub fn get_event_at_or_before(&self, tc: Timecode, hint: Option<EventId>) -> Option<EventId> {
        let mut cur = self.linked_hint(hint).or(self.last);
        while let Some(c) = cur {
            if self.slot_tc(c) > tc {
                cur = self.get_prev(c);
            } else {
                break;
            }
        }
        loop {
            let next = match cur {
                Some(c) => self.get_next(c),
                None => self.first,
            };
            match next {
                Some(n) if self.slot_tc(n) <= tc => cur = Some(n),
                _ => return cur,
            }
        }
    }

    /// Frame event sitting exactly at `tc`.
    pub fn get_frame_event_at(&self, tc: Timecode, hint: Option<EventId>) -> Option<EventId> {
        let mut cur = self.get_event_at_or_before(tc, hint);
        while let Some(c) = cur {
            let node = self.get(c)?;
            if node.tc != tc {
                return None;
            }
            if matches!(node.event, Event::Frame(_)) {
                return Some(c);
            }
            cur = node.prev;
        }
        None
    }

    /// Latest frame event with `timecode <= tc`.
    pub fn get_frame_event_at_or_before(
        &self,
        tc: Timecode,
        hint: Option<EventId>,
    ) -> Option<EventId> {
        let mut cur = self.get_event_at_or_before(tc, hint);
        while let Some(c) = cur {
            let node = self.get(c)?;
            if matches!(node.event, Event::Frame(_)) {
                return Some(c);
            }
            cur = node.prev;
        }
        None
    }

    /// Earliest frame event with `timecode >= tc`.
    pub fn get_frame_event_at_or_after(
        &self,
        tc: Timecode,
        hint: Option<EventId>,
    ) -> Option<EventId> {
        let mut cur = match self.get_event_at_or_before(tc, hint) {
            Some(c) if self.slot_tc(c) == tc => {
                // step back to the first node sharing this timecode
                let mut c = c;
                while let Some(p) = self.get_prev(c) {
                    if self.slot_tc(p) != tc {
                        break;
                    }
                    c = p;
                }
                Some(c)
            }
            Some(c) => self.get_next(c),
            None => self.first,
        };
        while let Some(c) = cur {
            let node = self.get(c)?;
            if matches!(node.event, Event::Frame(_)) {
                return Some(c);
            }
            cur = node.next;
        }
        None
    }

    /// Append a frame event. An existing frame at the same timecode is
    /// overwritten, as with [`EventList::insert_frame_event_at`].
    pub fn append_frame_event(&mut self, tc: Timecode, frame: FrameEvent) -> TimelineResult<EventId> {
        let hint = self.last;
        self.insert_frame_event_at(tc, frame, hint)
    }

    /// Insert a frame event at `tc`.
    ///
    /// If a frame event already occupies exactly `tc` its per-track payload is
    /// overwritten in place and its id returned.
    pub fn insert_frame_event_at(
        &mut self,
        tc: Timecode,
        frame: FrameEvent,
        hint: Option<EventId>,
    ) -> TimelineResult<EventId> {
        if let Some(existing) = self.get_frame_event_at(tc, hint) {
            if let Event::Frame(f) = self.event_mut(existing)? {
                f.tracks = frame.tracks;
                if !frame.audio.is_empty() {
                    f.audio = frame.audio;
                }
                if frame.scrap_offset.is_some() {
                    f.scrap_offset = frame.scrap_offset;
                }
                if frame.overlay_text.is_some() {
                    f.overlay_text = frame.overlay_text;
                }
            }
            return Ok(existing);
        }
        self.insert_event_at(tc, Event::Frame(frame), hint)
    }

    /// Append an audio-only event.
    pub fn append_audio_frame_event(
        &mut self,
        tc: Timecode,
        audio: AudioFrameEvent,
    ) -> TimelineResult<EventId> {
        let hint = self.last;
        self.insert_event_at(tc, Event::AudioFrame(audio), hint)
    }

    /// Insert an audio-only event at `tc`.
    pub fn insert_audio_frame_event_at(
        &mut self,
        tc: Timecode,
        audio: AudioFrameEvent,
        hint: Option<EventId>,
    ) -> TimelineResult<EventId> {
        self.insert_event_at(tc, Event::AudioFrame(audio), hint)
    }

    /// Append a filter init. The payload starts unpaired with empty chains.
    pub fn append_filter_init_event(
        &mut self,
        tc: Timecode,
        init: FilterInitEvent,
    ) -> TimelineResult<EventId> {
        let hint = self.last;
        self.insert_filter_init_event_at(tc, init, hint)
    }

    /// Insert a filter init at `tc`.
    pub fn insert_filter_init_event_at(
        &mut self,
        tc: Timecode,
        mut init: FilterInitEvent,
        hint: Option<EventId>,
    ) -> TimelineResult<EventId> {
        init.reset_links();
        self.insert_event_at(tc, Event::FilterInit(init), hint)
    }

    /// Append the deinit closing `init`.
    pub fn append_filter_deinit_event(
        &mut self,
        tc: Timecode,
        init: EventId,
    ) -> TimelineResult<EventId> {
        let hint = self.last;
        self.insert_filter_deinit_event_at(tc, init, hint)
    }

    /// Insert the deinit closing `init` at `tc`.
    ///
    /// Fails with `MalformedEvent` if `init` is not an unpaired filter init,
    /// if `tc` precedes it, or if any of its param changes lie after `tc`.
    pub fn insert_filter_deinit_event_at(
        &mut self,
        tc: Timecode,
        init: EventId,
        hint: Option<EventId>,
    ) -> TimelineResult<EventId> {
        let init_node = self.node(init)?;
        let Event::FilterInit(fi) = &init_node.event else {
            return Err(TimelineError::malformed(format!(
                "deinit target {init} is not a filter init"
            )));
        };
        if fi.deinit.is_some() {
            return Err(TimelineError::malformed(format!(
                "filter init {init} already has a deinit"
            )));
        }
        if tc < init_node.tc {
            return Err(TimelineError::malformed(format!(
                "deinit at {tc} precedes its init at {}",
                init_node.tc
            )));
        }
        for chain in &fi.chains {
            if let Some(last) = chain.last
                && self.timecode(last)? > tc
            {
                return Err(TimelineError::malformed(format!(
                    "param change {last} lies after deinit at {tc}"
                )));
            }
        }
        let id = self.insert_event_at(tc, Event::FilterDeinit(FilterDeinitEvent { init }), hint)?;
        if let Event::FilterInit(fi) = self.event_mut(init)? {
            fi.deinit = Some(id);
        }
        Ok(id)
    }

    /// Append a marker.
    pub fn append_marker_event(
        &mut self,
        tc: Timecode,
        marker: MarkerEvent,
    ) -> TimelineResult<EventId> {
        let hint = self.last;
        self.insert_event_at(tc, Event::Marker(marker), hint)
    }

    /// Insert a marker at `tc`.
    pub fn insert_marker_event_at(
        &mut self,
        tc: Timecode,
        marker: MarkerEvent,
        hint: Option<EventId>,
    ) -> TimelineResult<EventId> {
        self.insert_event_at(tc, Event::Marker(marker), hint)
    }

    /// Append at the tail without ordering, flagging the event no-quantise.
    ///
    /// This is how the audio thread records: its clock may lag the video
    /// stream. The list is marked unordered until
    /// [`crate::reorder_noquant`] runs. Frame, audio-frame, marker and
    /// filter-map payloads are accepted; a filter map must name live inits.
    pub fn append_noquant_event(&mut self, tc: Timecode, event: Event) -> TimelineResult<EventId> {
        match &event {
            Event::Frame(_) | Event::AudioFrame(_) | Event::Marker(_) => {}
            Event::FilterMap(m) => {
                for &init in &m.inits {
                    self.filter_init(init)?;
                }
            }
            _ => {
                return Err(TimelineError::validation(
                    "only frame, audio-frame, marker and filter-map events may be appended unordered",
                ));
            }
        }
        let id = self.alloc(tc, event, true)?;
        let last = self.last;
        if let Some(l) = last
            && self.node(l)?.key() > self.node(id)?.key()
        {
            self.unordered = true;
        }
        self.link_after(last, id)?;
        Ok(id)
    }

    /// Insert any event at its sorted position. Cross-references are not
    /// checked; callers own their consistency.
    pub(crate) fn insert_event_at(
        &mut self,
        tc: Timecode,
        event: Event,
        hint: Option<EventId>,
    ) -> TimelineResult<EventId> {
        let rank = event.rank();
        let id = self.alloc(tc, event, false)?;
        let after = self.find_insert_after(tc, rank, hint);
        self.link_after(after, id)?;
        Ok(id)
    }

    /// Detach `id` from the list without freeing it. Cross-references are
    /// left untouched.
    pub fn unlink(&mut self, id: EventId) -> TimelineResult<()> {
        let node = self.node(id)?;
        if !node.linked {
            return Ok(());
        }
        let (prev, next) = (node.prev, node.next);
        match prev {
            Some(p) => self.node_mut(p)?.next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.node_mut(n)?.prev = prev,
            None => self.last = prev,
        }
        let node = self.node_mut(id)?;
        node.prev = None;
        node.next = None;
        node.linked = false;
        self.len -= 1;
        Ok(())
    }

    /// Re-splice a detached node at `tc`.
    pub fn relink_at(
        &mut self,
        id: EventId,
        tc: Timecode,
        hint: Option<EventId>,
    ) -> TimelineResult<()> {
        let node = self.node_mut(id)?;
        if node.linked {
            return Err(TimelineError::malformed(format!("event {id} is still linked")));
        }
        node.tc = tc;
        let rank = node.event.rank();
        let hint = hint.filter(|h| *h != id);
        let after = self.find_insert_after(tc, rank, hint);
        self.link_after(after, id)
    }

    /// Move a node to `tc`, keeping the list ordered.
    pub fn move_to(&mut self, id: EventId, tc: Timecode) -> TimelineResult<()> {
        let hint = self.get_prev(id).or_else(|| self.get_next(id));
        self.unlink(id)?;
        self.relink_at(id, tc, hint)
    }

    /// Unlink and free `id`, returning its payload.
    ///
    /// Cross-references (maps, chains, pairs) are not repaired.
    pub fn delete(&mut self, id: EventId) -> TimelineResult<Event> {
        self.unlink(id)?;
        let slot = &mut self.slots[id.index as usize];
        let node = slot
            .node
            .take()
            .ok_or_else(|| TimelineError::malformed(format!("event {id} does not exist")))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Ok(node.event)
    }

    /// Replace the payload of `old` with `event`, keeping its timecode.
    ///
    /// The node is re-spliced when the new payload sorts differently. The old
    /// payload is returned; cross-references are not repaired.
    pub fn replace(&mut self, old: EventId, event: Event) -> TimelineResult<Event> {
        let node = self.node_mut(old)?;
        let rank_changed = node.event.rank() != event.rank();
        let tc = node.tc;
        let previous = std::mem::replace(&mut node.event, event);
        if rank_changed && node.linked {
            let hint = self.get_prev(old);
            self.unlink(old)?;
            self.relink_at(old, tc, hint)?;
        }
        Ok(previous)
    }

    /// Relink every node in `order`, which must hold exactly the linked nodes.
    pub(crate) fn rebuild_order(&mut self, order: &[EventId]) -> TimelineResult<()> {
        if order.len() != self.len {
            return Err(TimelineError::malformed(
                "reorder must cover every linked event exactly once",
            ));
        }
        let mut prev: Option<EventId> = None;
        for &id in order {
            let node = self.node_mut(id)?;
            node.prev = prev;
            node.next = None;
            if let Some(p) = prev {
                self.node_mut(p)?.next = Some(id);
            }
            prev = Some(id);
        }
        self.first = order.first().copied();
        self.last = order.last().copied();
        Ok(())
    }

    pub(crate) fn set_noquant(&mut self, id: EventId, noquant: bool) -> TimelineResult<()> {
        self.node_mut(id)?.noquant = noquant;
        Ok(())
    }

    /// Rewrite a timecode without moving the node. Callers restore order
    /// afterwards (see [`EventList::sort_stable`]).
    pub(crate) fn retime(&mut self, id: EventId, tc: Timecode) -> TimelineResult<()> {
        self.node_mut(id)?.tc = tc;
        Ok(())
    }

    /// Stable sort of the whole list by `(timecode, rank)`; returns how many
    /// nodes changed position.
    pub(crate) fn sort_stable(&mut self) -> TimelineResult<usize> {
        let before = self.ids();
        let mut order = before.clone();
        order.sort_by_key(|&id| self.get(id).map(|n| n.key()));
        let moved = before.iter().zip(&order).filter(|(a, b)| a != b).count();
        if moved > 0 {
            self.rebuild_order(&order)?;
        }
        Ok(moved)
    }

    fn alloc(&mut self, tc: Timecode, event: Event, noquant: bool) -> TimelineResult<EventId> {
        let node = EventNode {
            tc,
            prev: None,
            next: None,
            linked: false,
            noquant,
            event,
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return Ok(EventId {
                index,
                generation: slot.generation,
            });
        }
        let index = u32::try_from(self.slots.len())
            .map_err(|_| TimelineError::alloc("event slab exceeds u32 slots"))?;
        self.slots.try_reserve(1)?;
        // keep room to free every slot without reallocating
        let want = self.slots.len() + 1;
        if self.free.capacity() < want {
            self.free.try_reserve(want - self.free.len())?;
        }
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        Ok(EventId {
            index,
            generation: 0,
        })
    }

    fn link_after(&mut self, after: Option<EventId>, id: EventId) -> TimelineResult<()> {
        let next = match after {
            Some(a) => self.node(a)?.next,
            None => self.first,
        };
        {
            let node = self.node_mut(id)?;
            node.prev = after;
            node.next = next;
            node.linked = true;
        }
        match after {
            Some(a) => self.node_mut(a)?.next = Some(id),
            None => self.first = Some(id),
        }
        match next {
            Some(n) => self.node_mut(n)?.prev = Some(id),
            None => self.last = Some(id),
        }
        self.len += 1;
        Ok(())
    }

    /// Node after which an event keyed `(tc, rank)` belongs; `None` means head.
    fn find_insert_after(&self, tc: Timecode, rank: u8, hint: Option<EventId>) -> Option<EventId> {
        let key = (tc, rank);
        let mut cur = self.linked_hint(hint).or(self.last);
        while let Some(c) = cur {
            match self.get(c) {
                Some(n) if n.key() > key => cur = n.prev,
                _ => break,
            }
        }
        loop {
            let next = match cur {
                Some(c) => self.get_next(c),
                None => self.first,
            };
            match next.and_then(|n| self.get(n).map(|node| (n, node.key()))) {
                Some((n, k)) if k <= key => cur = Some(n),
                _ => return cur,
            }
        }
    }

    fn linked_hint(&self, hint: Option<EventId>) -> Option<EventId> {
        hint.filter(|h| self.get(*h).is_some_and(|n| n.linked))
    }

    fn slot_tc(&self, id: EventId) -> Timecode {
        self.get(id).map(|n| n.tc).unwrap_or(Timecode::MAX)
    }
}

/// Iterator over `(EventId, &EventNode)` in list order.
pub struct Iter<'a> {
    list: &'a EventList,
    cur: Option<EventId>,
    forward: bool,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (EventId, &'a EventNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let node = self.list.get(id)?;
        self.cur = if self.forward { node.next } else { node.prev };
        Some((id, node))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/event/list.rs"]
mod tests;
